//! Read/write boundary to the external ledger.
//!
//! [`LedgerGateway`] is the only seam through which the coordinator touches
//! the chain. Nothing at this layer retries: a rejected submission, a revert
//! or a failed read goes straight back to the caller.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::abi::{self, Token};
use crate::errors::{CartError, Result};
use crate::events::CartEvent;
use crate::types::{Address, Amount, RawCartInfo};

/// Addresses of the two fixed contracts every session talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Contracts {
    pub factory: Address,
    /// ERC-20 the carts are funded in.
    pub token: Address,
}

/// The fixed write surface of the factory, the carts and the token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerCall {
    Approve { spender: Address, amount: Amount },
    CreateCart { name: String, amount: Amount, items: Vec<String> },
    DepositMoreFunds { cart: Address, amount: Amount },
    ClaimDelivery { cart: Address },
    ForfeitDelivery { cart: Address },
    DeleteItems { cart: Address, items: Vec<String> },
    CloseSuccessDelivery { cart: Address },
    WithdrawAndDestroy { cart: Address },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CallKind {
    Approve,
    CreateCart,
    DepositMoreFunds,
    ClaimDelivery,
    ForfeitDelivery,
    DeleteItems,
    CloseSuccessDelivery,
    WithdrawAndDestroy,
}

impl CallKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::CreateCart => "createCart",
            Self::DepositMoreFunds => "depositMoreFunds",
            Self::ClaimDelivery => "claimDelivery",
            Self::ForfeitDelivery => "forfeitDelivery",
            Self::DeleteItems => "deleteItems",
            Self::CloseSuccessDelivery => "closeSuccessDelivery",
            Self::WithdrawAndDestroy => "withdrawAndDestroy",
        }
    }
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl LedgerCall {
    pub fn kind(&self) -> CallKind {
        match self {
            Self::Approve { .. } => CallKind::Approve,
            Self::CreateCart { .. } => CallKind::CreateCart,
            Self::DepositMoreFunds { .. } => CallKind::DepositMoreFunds,
            Self::ClaimDelivery { .. } => CallKind::ClaimDelivery,
            Self::ForfeitDelivery { .. } => CallKind::ForfeitDelivery,
            Self::DeleteItems { .. } => CallKind::DeleteItems,
            Self::CloseSuccessDelivery { .. } => CallKind::CloseSuccessDelivery,
            Self::WithdrawAndDestroy { .. } => CallKind::WithdrawAndDestroy,
        }
    }

    /// Contract the call is sent to.
    pub fn target(&self, contracts: &Contracts) -> Address {
        match self {
            Self::Approve { .. } => contracts.token,
            Self::CreateCart { .. } => contracts.factory,
            Self::DepositMoreFunds { cart, .. }
            | Self::ClaimDelivery { cart }
            | Self::ForfeitDelivery { cart }
            | Self::DeleteItems { cart, .. }
            | Self::CloseSuccessDelivery { cart }
            | Self::WithdrawAndDestroy { cart } => *cart,
        }
    }

    /// ABI-encoded calldata.
    pub fn calldata(&self) -> Vec<u8> {
        match self {
            Self::Approve { spender, amount } => abi::encode_call(
                abi::APPROVE,
                &[Token::Address(*spender), Token::Uint(amount.scaled())],
            ),
            Self::CreateCart { name, amount, items } => abi::encode_call(
                abi::CREATE_CART,
                &[
                    Token::String(name.clone()),
                    Token::Uint(amount.scaled()),
                    Token::StringArray(items.clone()),
                ],
            ),
            Self::DepositMoreFunds { amount, .. } => {
                abi::encode_call(abi::DEPOSIT_MORE_FUNDS, &[Token::Uint(amount.scaled())])
            }
            Self::ClaimDelivery { .. } => abi::encode_call(abi::CLAIM_DELIVERY, &[]),
            Self::ForfeitDelivery { .. } => abi::encode_call(abi::FORFEIT_DELIVERY, &[]),
            Self::DeleteItems { items, .. } => {
                abi::encode_call(abi::DELETE_ITEMS, &[Token::StringArray(items.clone())])
            }
            Self::CloseSuccessDelivery { .. } => {
                abi::encode_call(abi::CLOSE_SUCCESS_DELIVERY, &[])
            }
            Self::WithdrawAndDestroy { .. } => abi::encode_call(abi::WITHDRAW_AND_DESTROY, &[]),
        }
    }
}

/// Handle for a broadcast transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TxReceipt {
    pub tx_hash: String,
    pub kind: CallKind,
    pub target: Address,
}

/// A transaction the ledger executed successfully.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Confirmation {
    pub tx_hash: String,
    pub block_number: Option<u64>,
    pub events: Vec<CartEvent>,
}

pub trait LedgerGateway: Send + Sync {
    /// Sign and broadcast `call` from `from`.
    fn submit(
        &self,
        from: Address,
        call: LedgerCall,
    ) -> impl Future<Output = Result<TxReceipt>> + Send;

    /// Wait until the transaction is included. Never times out on its own;
    /// see [`confirm`].
    fn await_confirmation(
        &self,
        receipt: &TxReceipt,
    ) -> impl Future<Output = Result<Confirmation>> + Send;

    /// `getAllCartAddresses()` on the factory.
    fn cart_addresses(&self) -> impl Future<Output = Result<Vec<Address>>> + Send;

    /// `getCartInfo()` on a cart.
    fn read_cart(&self, cart: Address) -> impl Future<Output = Result<RawCartInfo>> + Send;
}

/// Await confirmation, giving up after `timeout` or when `cancel` fires.
///
/// Giving up does not un-submit anything: the transaction may still land.
pub async fn confirm<G: LedgerGateway>(
    gateway: &G,
    receipt: &TxReceipt,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Confirmation> {
    let timed_out = || CartError::ConfirmationTimeout {
        tx_hash: receipt.tx_hash.clone(),
    };

    tokio::select! {
        _ = cancel.cancelled() => {
            warn!("Stopped awaiting {} ({}): cancelled", receipt.tx_hash, receipt.kind);
            Err(timed_out())
        }
        res = tokio::time::timeout(timeout, gateway.await_confirmation(receipt)) => match res {
            Ok(confirmed) => confirmed,
            Err(_) => {
                warn!(
                    "No confirmation for {} ({}) after {timeout:?}",
                    receipt.tx_hash, receipt.kind
                );
                Err(timed_out())
            }
        },
    }
}
