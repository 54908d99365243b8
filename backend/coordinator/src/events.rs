//! Events emitted by the cart contract, decoded from confirmed receipts.
//!
//! These mirror the `BasedCart` contract events. Only the cart-level events
//! are recognised; anything else in a receipt (token `Approval`/`Transfer`,
//! factory bookkeeping) is skipped.

use serde::Serialize;

use crate::abi;
use crate::types::{Address, Amount};

/// keccak256("DeliveryClaimed(address,address)")
const DELIVERY_CLAIMED: &str = "8bbec194a1342715d08e3469209059cd6580c91a941386d171abf2c18ac9c29e";
/// keccak256("DeliveryForfeited(address,address)")
const DELIVERY_FORFEITED: &str = "9875e9215d62e70820ef5a0b7f53e9165034822858675ef015a0977731878ceb";
/// keccak256("FundsDeposited(address,uint256,address)")
const FUNDS_DEPOSITED: &str = "df4dcf17030d087ed1d90ed3c90719c7260706c1c4a88505dd2d0a982887cf43";
/// keccak256("FundsWithdrawn(address,address,uint256)")
const FUNDS_WITHDRAWN: &str = "a92ff919b850e4909ab2261d907ef955f11bc1716733a6cbece38d163a69af8a";

/// All recognised event kinds from the cart contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    DeliveryClaimed,
    DeliveryForfeited,
    FundsDeposited,
    FundsWithdrawn,
}

impl EventKind {
    /// Match the first log topic (hex, with or without `0x`) to an [`EventKind`].
    pub fn from_topic(topic: &str) -> Option<Self> {
        let topic = topic.trim_start_matches("0x").to_ascii_lowercase();
        match topic.as_str() {
            DELIVERY_CLAIMED => Some(Self::DeliveryClaimed),
            DELIVERY_FORFEITED => Some(Self::DeliveryForfeited),
            FUNDS_DEPOSITED => Some(Self::FundsDeposited),
            FUNDS_WITHDRAWN => Some(Self::FundsWithdrawn),
            _ => None,
        }
    }

    pub fn topic(&self) -> &'static str {
        match self {
            Self::DeliveryClaimed => DELIVERY_CLAIMED,
            Self::DeliveryForfeited => DELIVERY_FORFEITED,
            Self::FundsDeposited => FUNDS_DEPOSITED,
            Self::FundsWithdrawn => FUNDS_WITHDRAWN,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeliveryClaimed => "delivery_claimed",
            Self::DeliveryForfeited => "delivery_forfeited",
            Self::FundsDeposited => "funds_deposited",
            Self::FundsWithdrawn => "funds_withdrawn",
        }
    }
}

/// A decoded cart event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CartEvent {
    DeliveryClaimed {
        cart: Address,
        fulfiller: Address,
        owner: Address,
    },
    DeliveryForfeited {
        cart: Address,
        fulfiller: Address,
        owner: Address,
    },
    FundsDeposited {
        cart: Address,
        sender: Address,
        amount: Amount,
        fulfiller: Address,
    },
    FundsWithdrawn {
        cart: Address,
        owner: Address,
        fulfiller: Address,
        amount: Amount,
    },
}

impl CartEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::DeliveryClaimed { .. } => EventKind::DeliveryClaimed,
            Self::DeliveryForfeited { .. } => EventKind::DeliveryForfeited,
            Self::FundsDeposited { .. } => EventKind::FundsDeposited,
            Self::FundsWithdrawn { .. } => EventKind::FundsWithdrawn,
        }
    }

    pub fn cart(&self) -> Address {
        match self {
            Self::DeliveryClaimed { cart, .. }
            | Self::DeliveryForfeited { cart, .. }
            | Self::FundsDeposited { cart, .. }
            | Self::FundsWithdrawn { cart, .. } => *cart,
        }
    }
}

/// A receipt log with hex already stripped into bytes.
#[derive(Debug, Clone)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<String>,
    pub data: Vec<u8>,
}

/// Decode every recognised cart event in a receipt, in log order.
pub fn decode_logs(logs: &[RawLog]) -> Vec<CartEvent> {
    logs.iter().filter_map(decode_log).collect()
}

fn decode_log(log: &RawLog) -> Option<CartEvent> {
    let kind = EventKind::from_topic(log.topics.first()?)?;
    let topic_address = |i: usize| -> Option<Address> {
        let raw = log.topics.get(i)?;
        let bytes = hex::decode(raw.trim_start_matches("0x")).ok()?;
        abi::address_from_topic(&bytes).ok()
    };
    let amount = |word: usize| -> Option<Amount> {
        abi::uint_from_word(&log.data, word)
            .ok()
            .map(Amount::from_scaled)
    };

    let cart = log.address;
    let event = match kind {
        EventKind::DeliveryClaimed => CartEvent::DeliveryClaimed {
            cart,
            fulfiller: topic_address(1)?,
            owner: topic_address(2)?,
        },
        EventKind::DeliveryForfeited => CartEvent::DeliveryForfeited {
            cart,
            fulfiller: topic_address(1)?,
            owner: topic_address(2)?,
        },
        EventKind::FundsDeposited => CartEvent::FundsDeposited {
            cart,
            sender: topic_address(1)?,
            fulfiller: topic_address(2)?,
            amount: amount(0)?,
        },
        EventKind::FundsWithdrawn => CartEvent::FundsWithdrawn {
            cart,
            owner: topic_address(1)?,
            fulfiller: topic_address(2)?,
            amount: amount(0)?,
        },
    };
    Some(event)
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
