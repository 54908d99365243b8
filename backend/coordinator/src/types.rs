//! # Types
//!
//! Shared data structures used across the coordinator.
//!
//! ## Amounts
//!
//! The cart token (USDC) has a fixed precision of [`TOKEN_DECIMALS`]. Every
//! [`Amount`] is carried as the scaled integer the ledger sees; the decimal
//! form only exists at the edges (parsing user input, rendering for display).
//!
//! ## Cart status
//!
//! [`CartStatus`] is derived, never stored:
//!
//! ```text
//! Unclaimed ──claim──► Claimed ──forfeit──► Unclaimed
//!     │                   │
//!     └─withdraw (gone)   └─close success──► Completed
//! ```
//!
//! `Completed` is terminal.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::{CartError, Result};

/// Decimal precision of the cart token.
pub const TOKEN_DECIMALS: u32 = 6;

const SCALE: u128 = 10u128.pow(TOKEN_DECIMALS);

// ─────────────────────────────────────────────────────────
// Address
// ─────────────────────────────────────────────────────────

/// A 20-byte ledger identity.
///
/// Comparison happens on the raw bytes, so `0xABC…` and `0xabc…` are the
/// same address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address([u8; 20]);

impl Address {
    /// The "unset" sentinel.
    pub const ZERO: Address = Address([0u8; 20]);

    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Deterministic address with `n` in the low-order bytes.
    pub fn from_low_u64(n: u64) -> Self {
        let mut bytes = [0u8; 20];
        bytes[12..].copy_from_slice(&n.to_be_bytes());
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// Truncated form used in user-facing messages, e.g. `0xab1...9f0c`.
    pub fn short(&self) -> String {
        let full = self.to_string();
        format!("{}...{}", &full[..5], &full[full.len() - 4..])
    }
}

impl FromStr for Address {
    type Err = CartError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &str| CartError::InvalidField {
            field: "address",
            reason: format!("{reason}: {s}"),
        };
        let digits = s
            .trim()
            .strip_prefix("0x")
            .or_else(|| s.trim().strip_prefix("0X"))
            .ok_or_else(|| invalid("missing 0x prefix"))?;
        if digits.len() != 40 {
            return Err(invalid("expected 40 hex digits"));
        }
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(digits, &mut bytes).map_err(|_| invalid("not hexadecimal"))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ─────────────────────────────────────────────────────────
// Amount
// ─────────────────────────────────────────────────────────

/// Token quantity, scaled by `10^TOKEN_DECIMALS`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(u128);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_scaled(scaled: u128) -> Self {
        Self(scaled)
    }

    /// Whole token units, e.g. `Amount::from_units(25)` is 25 USDC.
    pub fn from_units(units: u64) -> Self {
        Self(u128::from(units) * SCALE)
    }

    pub fn scaled(&self) -> u128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    /// Parse a strictly positive decimal amount as typed by a user.
    ///
    /// Fails with [`CartError::AmountInvalid`] for empty, non-numeric,
    /// non-positive, over-precise or overflowing input.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(CartError::amount("Amount cannot be empty"));
        }

        let (negative, unsigned) = match trimmed.as_bytes()[0] {
            b'-' => (true, &trimmed[1..]),
            b'+' => (false, &trimmed[1..]),
            _ => (false, trimmed),
        };

        let (whole, frac) = match unsigned.split_once('.') {
            Some((w, f)) => (w, f),
            None => (unsigned, ""),
        };
        let numeric = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if (whole.is_empty() && frac.is_empty()) || !numeric(whole) || !numeric(frac) {
            return Err(CartError::amount("Amount must be a number"));
        }

        if frac.len() > TOKEN_DECIMALS as usize {
            return Err(CartError::amount(format!(
                "Amount cannot have more than {TOKEN_DECIMALS} decimal places"
            )));
        }

        let too_large = || CartError::amount("Amount is too large");
        let whole_value: u128 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| too_large())?
        };
        let frac_value: u128 = if frac.is_empty() {
            0
        } else {
            let padded = format!("{frac:0<width$}", width = TOKEN_DECIMALS as usize);
            padded.parse().map_err(|_| too_large())?
        };
        let scaled = whole_value
            .checked_mul(SCALE)
            .and_then(|v| v.checked_add(frac_value))
            .ok_or_else(too_large)?;

        if negative || scaled == 0 {
            return Err(CartError::amount("Amount must be greater than 0"));
        }
        Ok(Self(scaled))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / SCALE;
        let frac = self.0 % SCALE;
        if frac == 0 {
            return write!(f, "{whole}");
        }
        let digits = format!("{frac:0>width$}", width = TOKEN_DECIMALS as usize);
        write!(f, "{whole}.{}", digits.trim_end_matches('0'))
    }
}

impl fmt::Debug for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Amount({self})")
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

// ─────────────────────────────────────────────────────────
// Carts
// ─────────────────────────────────────────────────────────

/// The `getCartInfo()` tuple exactly as the ledger returns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCartInfo {
    pub name: String,
    pub items: Vec<String>,
    pub is_completed: bool,
    /// Scaled at `TOKEN_DECIMALS`.
    pub funds: u128,
    /// Zero address when unclaimed.
    pub fulfiller: Address,
    pub owner: Address,
}

/// Canonical cart entity, normalized from a [`RawCartInfo`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cart {
    pub address: Address,
    pub name: String,
    pub items: Vec<String>,
    pub is_completed: bool,
    pub funds: Amount,
    pub fulfiller: Option<Address>,
    pub owner: Address,
}

/// Exactly one of these holds for any cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CartStatus {
    Unclaimed,
    Claimed(Address),
    Completed,
}

impl CartStatus {
    pub fn derive(is_completed: bool, fulfiller: Option<Address>) -> Self {
        match (is_completed, fulfiller) {
            (true, _) => Self::Completed,
            (false, None) => Self::Unclaimed,
            (false, Some(who)) => Self::Claimed(who),
        }
    }
}

impl Cart {
    pub fn status(&self) -> CartStatus {
        CartStatus::derive(self.is_completed, self.fulfiller)
    }

    pub fn is_owned_by(&self, viewer: Option<Address>) -> bool {
        viewer == Some(self.owner)
    }

    pub fn is_claimed_by(&self, viewer: Option<Address>) -> bool {
        viewer.is_some() && self.fulfiller == viewer
    }
}

/// User-initiated lifecycle actions, used to key pending requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CartAction {
    Create,
    Deposit,
    Claim,
    Forfeit,
    DeleteItems,
    Close,
}

impl CartAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Deposit => "deposit",
            Self::Claim => "claim",
            Self::Forfeit => "forfeit",
            Self::DeleteItems => "delete_items",
            Self::Close => "close",
        }
    }
}

impl fmt::Display for CartAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
