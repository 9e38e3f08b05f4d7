use strum_macros::{Display, IntoStaticStr};
use thiserror::Error;

use super::{Address, AddressFormatError, Quantity, Timestamp, TransferEvent};

/// Field separator of the notification payload. There is no escaping, so a
/// literal `|` inside a field surfaces as a field-count mismatch.
pub const PAYLOAD_DELIMITER: char = '|';

pub const PAYLOAD_FIELD_COUNT: usize = 9;

/// Positions of the payload fields, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum PayloadField {
    Schema,
    BlockNumber,
    TokenId,
    ContractAddress,
    Quantity,
    FromAddress,
    ToAddress,
    TxHash,
    Timestamp,
}

/// Label-friendly discriminant of [`ParseError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ParseErrorKind {
    MalformedPayload,
    InvalidNumber,
    InvalidAddress,
    AmbiguousTransfer,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("expected {PAYLOAD_FIELD_COUNT} `|`-delimited fields, found {found}")]
    MalformedPayload { found: usize },
    #[error("field `{field}` is not a non-negative integer: {value:?}")]
    InvalidNumber { field: PayloadField, value: String },
    #[error("field `{field}` is not a valid address: {source}")]
    InvalidAddress {
        field: PayloadField,
        #[source]
        source: AddressFormatError,
    },
    #[error("from and to are both the zero address")]
    AmbiguousTransfer,
}

impl ParseError {
    pub fn kind(&self) -> ParseErrorKind {
        match self {
            Self::MalformedPayload { .. } => ParseErrorKind::MalformedPayload,
            Self::InvalidNumber { .. } => ParseErrorKind::InvalidNumber,
            Self::InvalidAddress { .. } => ParseErrorKind::InvalidAddress,
            Self::AmbiguousTransfer => ParseErrorKind::AmbiguousTransfer,
        }
    }

    pub fn field(&self) -> Option<PayloadField> {
        match self {
            Self::InvalidNumber { field, .. } | Self::InvalidAddress { field, .. } => Some(*field),
            Self::MalformedPayload { .. } | Self::AmbiguousTransfer => None,
        }
    }
}

/// Decodes a `schema|block|token|contract|quantity|from|to|tx|timestamp`
/// payload. Surrounding whitespace of each field is ignored.
pub fn parse_payload(payload: &str) -> Result<TransferEvent, ParseError> {
    let fields: Vec<&str> = payload.split(PAYLOAD_DELIMITER).map(str::trim).collect();

    let &[schema, block_number, token_id, contract_address, quantity, from_address, to_address, tx_hash, timestamp] =
        fields.as_slice()
    else {
        return Err(ParseError::MalformedPayload {
            found: fields.len(),
        });
    };

    let block_number = parse_block_number(block_number)?;
    let contract_address = parse_address(PayloadField::ContractAddress, contract_address)?;
    let quantity = Quantity::parse(quantity).ok_or_else(|| ParseError::InvalidNumber {
        field: PayloadField::Quantity,
        value: quantity.to_string(),
    })?;
    let from_address = parse_address(PayloadField::FromAddress, from_address)?;
    let to_address = parse_address(PayloadField::ToAddress, to_address)?;

    if from_address.is_zero() && to_address.is_zero() {
        return Err(ParseError::AmbiguousTransfer);
    }

    Ok(TransferEvent {
        schema: schema.to_string(),
        block_number,
        token_id: token_id.to_string(),
        contract_address,
        quantity,
        from_address,
        to_address,
        tx_hash: tx_hash.to_string(),
        timestamp: Timestamp::parse(timestamp),
    })
}

fn parse_block_number(value: &str) -> Result<u64, ParseError> {
    let invalid = || ParseError::InvalidNumber {
        field: PayloadField::BlockNumber,
        value: value.to_string(),
    };

    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    value.parse().map_err(|_| invalid())
}

fn parse_address(field: PayloadField, value: &str) -> Result<Address, ParseError> {
    Address::parse(value).map_err(|source| ParseError::InvalidAddress { field, source })
}
