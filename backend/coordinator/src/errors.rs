//! Application-wide error types.

use thiserror::Error;

use crate::types::{Address, CartAction};

#[derive(Debug, Error)]
pub enum CartError {
    /// Local amount validation. Never reaches the network.
    #[error("Invalid {field}: {reason}")]
    AmountInvalid { field: &'static str, reason: String },

    /// Local validation of a non-amount input field.
    #[error("Invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("Submission rejected: {0}")]
    SubmissionRejected(String),

    #[error("Confirmation not observed for transaction {tx_hash}")]
    ConfirmationTimeout { tx_hash: String },

    #[error("Transaction {tx_hash} reverted: {reason}")]
    Reverted { tx_hash: String, reason: String },

    #[error("Ledger read unavailable: {0}")]
    ReadUnavailable(String),

    #[error("Allowance was not granted: {0}")]
    AllowanceRejected(Box<CartError>),

    #[error("Allowance granted but the dependent action failed: {0}")]
    DependentActionFailed(Box<CartError>),

    #[error("{0}")]
    ActionNotPermitted(String),

    #[error("{action} on {target} is already awaiting confirmation")]
    ActionPending { target: Address, action: CartAction },

    #[error("Funding sequence error: {0}")]
    Sequence(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CartError {
    pub(crate) fn amount(reason: impl Into<String>) -> Self {
        Self::AmountInvalid {
            field: "amount",
            reason: reason.into(),
        }
    }

    /// `true` for errors raised before anything was sent to the ledger.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Self::AmountInvalid { .. }
                | Self::InvalidField { .. }
                | Self::ActionNotPermitted(_)
                | Self::ActionPending { .. }
        )
    }

    /// Short machine-readable identifier, used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AmountInvalid { .. } => "amount_invalid",
            Self::InvalidField { .. } => "invalid_field",
            Self::SubmissionRejected(_) => "submission_rejected",
            Self::ConfirmationTimeout { .. } => "confirmation_timeout",
            Self::Reverted { .. } => "reverted",
            Self::ReadUnavailable(_) => "read_unavailable",
            Self::AllowanceRejected(_) => "allowance_rejected",
            Self::DependentActionFailed(_) => "dependent_action_failed",
            Self::ActionNotPermitted(_) => "action_not_permitted",
            Self::ActionPending { .. } => "action_pending",
            Self::Sequence(_) => "sequence",
            Self::Config(_) => "config",
        }
    }
}

pub type Result<T> = std::result::Result<T, CartError>;
