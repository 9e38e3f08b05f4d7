//! Transfer notification model shared by the listener and storage crates.

mod classify;
mod parser;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use hex::encode as hex_encode;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use strum_macros::EnumString;
use thiserror::Error;

pub use classify::{classify, ClassifiedEvent, EventKind};
pub use parser::{
    parse_payload, ParseError, ParseErrorKind, PayloadField, PAYLOAD_DELIMITER,
    PAYLOAD_FIELD_COUNT,
};

/// Number of hex characters in an address, excluding the `0x` prefix.
pub const ADDRESS_HEX_LENGTH: usize = 40;

/// Canonical spelling of the well-known "no holder" address.
pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// A single message received on the notification channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNotification {
    pub channel: String,
    pub payload: String,
}

impl RawNotification {
    pub fn new(channel: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}

/// Errors emitted when an address field fails validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressFormatError {
    #[error("address must be exactly {ADDRESS_HEX_LENGTH} hex characters")]
    WrongLength,
    #[error("address contains non-hex characters")]
    NonHex,
}

/// A validated account or contract address, stored as `0x` + lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub fn zero() -> Self {
        Self(ZERO_ADDRESS.to_string())
    }

    /// Accepts an optional `0x`/`0X` prefix and any hex case.
    pub fn parse(value: &str) -> Result<Self, AddressFormatError> {
        let digits = value
            .strip_prefix("0x")
            .or_else(|| value.strip_prefix("0X"))
            .unwrap_or(value);

        if digits.len() != ADDRESS_HEX_LENGTH {
            return Err(AddressFormatError::WrongLength);
        }

        if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AddressFormatError::NonHex);
        }

        let mut owned = String::with_capacity(ADDRESS_HEX_LENGTH + 2);
        owned.push_str("0x");
        owned.push_str(digits);
        owned.make_ascii_lowercase();
        Ok(Self(owned))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == ZERO_ADDRESS
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Address {
    type Err = AddressFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = AddressFormatError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.0
    }
}

/// Non-negative integer amount of arbitrary width (ERC20 amounts are uint256),
/// kept as a canonical decimal string without leading zeros.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quantity(String);

impl Quantity {
    pub fn one() -> Self {
        Self("1".to_string())
    }

    /// Parses a decimal string. An empty value means a single unit. Returns
    /// `None` for signs, separators or any other non-digit input.
    pub fn parse(value: &str) -> Option<Self> {
        if value.is_empty() {
            return Some(Self::one());
        }

        if !value.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        let trimmed = value.trim_start_matches('0');
        if trimmed.is_empty() {
            Some(Self("0".to_string()))
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Producer-defined block timestamp: unix seconds when numeric, otherwise the
/// raw text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    Unix(i64),
    Text(String),
}

impl Timestamp {
    pub fn parse(value: &str) -> Self {
        match value.parse::<i64>() {
            Ok(seconds) => Self::Unix(seconds),
            Err(_) => Self::Text(value.to_string()),
        }
    }

    /// Best-effort conversion; text values are tried as RFC 3339 and then as
    /// `YYYY-MM-DD HH:MM:SS` in UTC.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Unix(seconds) => DateTime::from_timestamp(*seconds, 0),
            Self::Text(text) => DateTime::parse_from_rfc3339(text)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
                .or_else(|| {
                    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
                        .ok()
                        .map(|naive| naive.and_utc())
                }),
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix(seconds) => write!(f, "{seconds}"),
            Self::Text(text) => f.write_str(text),
        }
    }
}

/// Token standards the upstream sink emits in the `schema` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum TokenStandard {
    Erc20,
    Erc721,
    Erc1155,
    #[strum(disabled)]
    Other,
}

impl TokenStandard {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Erc20 => "erc20",
            Self::Erc721 => "erc721",
            Self::Erc1155 => "erc1155",
            Self::Other => "other",
        }
    }
}

/// A parsed and validated transfer notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferEvent {
    pub schema: String,
    pub block_number: u64,
    /// Opaque identifier; may exceed any native integer width.
    pub token_id: String,
    pub contract_address: Address,
    pub quantity: Quantity,
    pub from_address: Address,
    pub to_address: Address,
    pub tx_hash: String,
    pub timestamp: Timestamp,
}

impl TransferEvent {
    pub fn token_standard(&self) -> TokenStandard {
        self.schema.parse().unwrap_or(TokenStandard::Other)
    }

    /// Deterministic SHA3-256 key over every field except the timestamp, used
    /// to make redelivered notifications idempotent downstream.
    pub fn fingerprint(&self) -> String {
        let block_number = self.block_number.to_string();
        let mut hasher = Sha3_256::new();
        for part in [
            self.schema.as_str(),
            block_number.as_str(),
            self.token_id.as_str(),
            self.contract_address.as_str(),
            self.quantity.as_str(),
            self.from_address.as_str(),
            self.to_address.as_str(),
            self.tx_hash.as_str(),
        ] {
            hasher.update(part.as_bytes());
            hasher.update([PAYLOAD_DELIMITER as u8]);
        }
        hex_encode(hasher.finalize())
    }

    /// Re-serializes the canonical field values in wire order.
    pub fn to_payload(&self) -> String {
        [
            self.schema.clone(),
            self.block_number.to_string(),
            self.token_id.clone(),
            self.contract_address.to_string(),
            self.quantity.to_string(),
            self.from_address.to_string(),
            self.to_address.to_string(),
            self.tx_hash.clone(),
            self.timestamp.to_string(),
        ]
        .join(&PAYLOAD_DELIMITER.to_string())
    }
}
