//! # Cart lifecycle rules
//!
//! Pure functions deriving which action a viewer may take on a cart, and why
//! not when they may not. They mirror what the cart contract enforces, so an
//! action offered here is one the ledger accepts and an action refused here
//! is one the ledger would revert.
//!
//! | Status            | Claim panel            | Close panel (owner)        |
//! |-------------------|------------------------|----------------------------|
//! | Unclaimed         | `Claim`                | `Acknowledge` (refund)     |
//! | Claimed by viewer | `Forfeit`              | `ConfirmDelivery` (pay)    |
//! | Claimed by other  | disabled, names holder | `ConfirmDelivery` (pay)    |
//! | Completed         | disabled               | disabled                   |

use serde::Serialize;

use crate::errors::{CartError, Result};
use crate::gateway::LedgerCall;
use crate::types::{Address, Amount, Cart, CartStatus};

// ─────────────────────────────────────────────────────────
// Claim / forfeit
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimAction {
    Claim,
    Forfeit,
}

impl ClaimAction {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Claim => "Confirm Claim",
            Self::Forfeit => "Forfeit Claim",
        }
    }

    pub fn ledger_call(&self, cart: Address) -> LedgerCall {
        match self {
            Self::Claim => LedgerCall::ClaimDelivery { cart },
            Self::Forfeit => LedgerCall::ForfeitDelivery { cart },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimState {
    pub message: String,
    pub action: ClaimAction,
    pub label: &'static str,
    pub disabled: bool,
}

impl ClaimState {
    fn new(message: impl Into<String>, action: ClaimAction, disabled: bool) -> Self {
        Self {
            message: message.into(),
            action,
            label: action.label(),
            disabled,
        }
    }
}

/// Claim panel state for `acting` looking at a cart.
///
/// A disconnected viewer (`acting == None`) is treated like any other
/// identity that does not hold the claim.
pub fn derive_claim_state(
    is_completed: bool,
    fulfiller: Option<Address>,
    acting: Option<Address>,
) -> ClaimState {
    match CartStatus::derive(is_completed, fulfiller) {
        CartStatus::Completed => ClaimState::new(
            "This cart is completed and cannot be claimed.",
            ClaimAction::Claim,
            true,
        ),
        CartStatus::Unclaimed => ClaimState::new(
            "You may claim this cart. If you cannot fulfill the order, please forfeit \
             your claim to give others a chance to claim it.",
            ClaimAction::Claim,
            false,
        ),
        CartStatus::Claimed(holder) if Some(holder) == acting => ClaimState::new(
            "You have already claimed this cart. If you cannot fulfill this order, \
             please forfeit your claim to give someone else a chance.",
            ClaimAction::Forfeit,
            false,
        ),
        CartStatus::Claimed(holder) => ClaimState::new(
            format!(
                "This cart cannot be claimed. It is being fulfilled by {}.",
                holder.short()
            ),
            ClaimAction::Claim,
            true,
        ),
    }
}

// ─────────────────────────────────────────────────────────
// Close
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseAction {
    /// Close and refund the owner.
    Acknowledge,
    /// Close and pay the fulfiller.
    ConfirmDelivery,
}

impl CloseAction {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Acknowledge => "I understand",
            Self::ConfirmDelivery => "Cart Delivered",
        }
    }

    pub fn ledger_call(&self, cart: Address) -> LedgerCall {
        match self {
            Self::Acknowledge => LedgerCall::WithdrawAndDestroy { cart },
            Self::ConfirmDelivery => LedgerCall::CloseSuccessDelivery { cart },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CloseState {
    pub message: String,
    pub action: CloseAction,
    pub label: &'static str,
    pub disabled: bool,
}

impl CloseState {
    fn new(message: impl Into<String>, action: CloseAction, disabled: bool) -> Self {
        Self {
            message: message.into(),
            action,
            label: action.label(),
            disabled,
        }
    }

    /// Both close paths move funds irreversibly and need the owner's explicit
    /// acknowledgement on top of being enabled.
    pub fn dispatchable(&self, acknowledged: bool) -> bool {
        !self.disabled && acknowledged
    }
}

pub fn derive_close_state(is_completed: bool, fulfiller: Option<Address>) -> CloseState {
    match CartStatus::derive(is_completed, fulfiller) {
        CartStatus::Completed => CloseState::new(
            "This cart is completed and cannot be closed.",
            CloseAction::Acknowledge,
            true,
        ),
        CartStatus::Unclaimed => CloseState::new(
            "Closing this cart will return all funds and delete the cart.",
            CloseAction::Acknowledge,
            false,
        ),
        CartStatus::Claimed(holder) => CloseState::new(
            format!(
                "Closing this cart will transfer the balance to {}. I understand this \
                 means I am confirming delivery.",
                holder.short()
            ),
            CloseAction::ConfirmDelivery,
            false,
        ),
    }
}

// ─────────────────────────────────────────────────────────
// Item deletion
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteItemsState {
    pub message: String,
    pub disabled: bool,
}

/// Gate for deleting `selected` items from `cart` as `acting`.
///
/// `confirmed` is the owner's acknowledgement that deleted items cannot be
/// added back.
pub fn derive_delete_items_state(
    cart: &Cart,
    acting: Option<Address>,
    selected: &[String],
    confirmed: bool,
) -> DeleteItemsState {
    let refuse = |message: String| DeleteItemsState {
        message,
        disabled: true,
    };

    if !cart.is_owned_by(acting) {
        return refuse("Only the owner of this cart can delete items.".into());
    }
    match cart.status() {
        CartStatus::Completed => {
            return refuse("This cart is completed and its items cannot be changed.".into())
        }
        CartStatus::Claimed(holder) if Some(holder) != acting => {
            return refuse(format!(
                "Items cannot be changed while {} is fulfilling this cart.",
                holder.short()
            ))
        }
        _ => {}
    }
    if selected.is_empty() {
        return refuse("Select at least one item to delete.".into());
    }
    if let Some(missing) = selected.iter().find(|s| !cart.items.contains(*s)) {
        return refuse(format!("\"{missing}\" is not in this cart."));
    }
    if !confirmed {
        return refuse("Deleted items cannot be added again, are you sure?".into());
    }
    DeleteItemsState {
        message: format!("Deleting {} item(s).", selected.len()),
        disabled: false,
    }
}

// ─────────────────────────────────────────────────────────
// Creation
// ─────────────────────────────────────────────────────────

/// A validated `createCart` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCart {
    pub name: String,
    pub amount: Amount,
    pub items: Vec<String>,
}

/// Validate the creation form, reporting the first failing field.
pub fn validate_new_cart(name: &str, amount: &str, items: &[String]) -> Result<NewCart> {
    let name = name.trim();
    if name.is_empty() {
        return Err(CartError::InvalidField {
            field: "name",
            reason: "Cart name cannot be empty".into(),
        });
    }

    let amount = Amount::parse(amount)?;

    let item_error = |reason: &str| CartError::InvalidField {
        field: "items",
        reason: reason.into(),
    };
    if items.is_empty() {
        return Err(item_error("Cart must have at least one item"));
    }
    let mut cleaned: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        let item = item.trim();
        if item.is_empty() {
            return Err(item_error("Item name cannot be empty"));
        }
        if cleaned.iter().any(|existing| existing == item) {
            return Err(item_error("Item is already in the cart"));
        }
        cleaned.push(item.to_string());
    }

    Ok(NewCart {
        name: name.to_string(),
        amount,
        items: cleaned,
    })
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
