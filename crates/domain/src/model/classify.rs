use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString, IntoStaticStr};

use super::TransferEvent;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EventKind {
    Mint,
    Burn,
    Transfer,
}

impl EventKind {
    /// Zero sender wins over zero recipient; the parser already rejects the
    /// case where both are zero.
    pub fn of(event: &TransferEvent) -> Self {
        if event.from_address.is_zero() {
            Self::Mint
        } else if event.to_address.is_zero() {
            Self::Burn
        } else {
            Self::Transfer
        }
    }

    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// A transfer annotated with its semantic kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedEvent {
    pub kind: EventKind,
    pub event: TransferEvent,
}

pub fn classify(event: TransferEvent) -> ClassifiedEvent {
    ClassifiedEvent {
        kind: EventKind::of(&event),
        event,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{parse_payload, Address, ZERO_ADDRESS};

    const CONTRACT: &str = "0xcccccccccccccccccccccccccccccccccccccccc";
    const ALICE: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const BOB: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    fn event(quantity: &str, from: &str, to: &str) -> TransferEvent {
        parse_payload(&format!(
            "erc1155|1|7|{CONTRACT}|{quantity}|{from}|{to}|0xtx|1700000000"
        ))
        .expect("sample parses")
    }

    #[test]
    fn zero_sender_is_mint() {
        let classified = classify(event("1", ZERO_ADDRESS, ALICE));
        assert_eq!(classified.kind, EventKind::Mint);
    }

    #[test]
    fn zero_recipient_is_burn_and_keeps_quantity() {
        let classified = classify(event("3", ALICE, ZERO_ADDRESS));
        assert_eq!(classified.kind, EventKind::Burn);
        assert_eq!(classified.event.quantity.as_str(), "3");
    }

    #[test]
    fn holder_to_holder_is_transfer() {
        let classified = classify(event("1", ALICE, BOB));
        assert_eq!(classified.kind, EventKind::Transfer);
    }

    #[test]
    fn classification_is_deterministic() {
        for (from, to) in [(ZERO_ADDRESS, ALICE), (ALICE, ZERO_ADDRESS), (ALICE, BOB)] {
            let sample = event("1", from, to);
            assert_eq!(classify(sample.clone()), classify(sample));
        }
    }

    #[test]
    fn zero_sender_takes_priority_when_both_zero() {
        let mut sample = event("1", ZERO_ADDRESS, ALICE);
        sample.to_address = Address::zero();
        assert_eq!(EventKind::of(&sample), EventKind::Mint);
    }

    #[test]
    fn kind_labels_are_lowercase() {
        assert_eq!(EventKind::Burn.as_str(), "burn");
        assert_eq!(EventKind::Mint.to_string(), "mint");
        assert_eq!("transfer".parse::<EventKind>().unwrap(), EventKind::Transfer);
    }
}
