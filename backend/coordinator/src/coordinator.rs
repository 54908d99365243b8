//! One viewer session against the ledger.
//!
//! Every mutating operation follows the same path:
//!
//! 1. take the `(cart, action)` pending token, refusing duplicates;
//! 2. validate local input, then re-read the cart from the ledger and
//!    re-derive legality from that fresh state;
//! 3. hand a [`Dispatch`] to [`Coordinator::mutate_then_invalidate`], which
//!    submits (through the allowance sequence when funds move), waits for
//!    confirmation, then invalidates and refetches the roster once.
//!
//! A failure at any step drops the token and leaves the cached roster as it
//! was.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::allowance::FundedSequence;
use crate::cache::{CacheKey, RosterCache, RosterSnapshot};
use crate::errors::{CartError, Result};
use crate::gateway::{self, Confirmation, Contracts, LedgerCall, LedgerGateway};
use crate::lifecycle::{self, ClaimAction, ClaimState, CloseState, DeleteItemsState};
use crate::pending::PendingRegistry;
use crate::roster::{self, Roster};
use crate::types::{Address, Amount, Cart, CartAction};

/// What to send for one mutation.
pub enum Dispatch {
    /// A call that moves no value.
    Direct(LedgerCall),
    /// Run the pinned approve-then-act `sequence`, sending `dependent(amount)`.
    Funded {
        sequence: FundedSequence,
        dependent: Box<dyn FnOnce(Amount) -> LedgerCall + Send>,
    },
}

/// Result of a confirmed mutation.
#[derive(Debug, Clone, Serialize)]
pub struct Mutation {
    pub confirmation: Confirmation,
    /// Present for funded mutations.
    pub approval: Option<Confirmation>,
    /// Roster generation after the post-mutation refetch, `None` if the
    /// refetch failed and the cached roster is still the stale one.
    pub roster_generation: Option<u64>,
}

/// Legal actions on one cart for the session's viewer.
#[derive(Debug, Clone, Serialize)]
pub struct CartActions {
    pub cart: Address,
    pub is_owner: bool,
    pub claim: ClaimState,
    /// Only owners see the close panel.
    pub close: Option<CloseState>,
}

pub struct Coordinator<G> {
    viewer: Address,
    gateway: Arc<G>,
    contracts: Contracts,
    cache: RosterCache,
    pending: PendingRegistry,
    confirmation_timeout: Duration,
    cancel: Mutex<CancellationToken>,
}

impl<G: LedgerGateway> Coordinator<G> {
    pub fn new(
        viewer: Address,
        gateway: Arc<G>,
        contracts: Contracts,
        confirmation_timeout: Duration,
    ) -> Self {
        Self {
            viewer,
            gateway,
            contracts,
            cache: RosterCache::new(),
            pending: PendingRegistry::new(),
            confirmation_timeout,
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn viewer(&self) -> Address {
        self.viewer
    }

    pub fn cache(&self) -> &RosterCache {
        &self.cache
    }

    pub fn is_pending(&self, target: Address, action: CartAction) -> bool {
        self.pending.is_pending(target, action)
    }

    pub fn pending(&self) -> Vec<(Address, CartAction)> {
        self.pending.snapshot()
    }

    fn cancel_token(&self) -> CancellationToken {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .child_token()
    }

    /// Stop awaiting every outstanding confirmation. Submitted transactions
    /// are not withdrawn; their callers see `ConfirmationTimeout`.
    pub fn cancel_pending(&self) {
        let mut root = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        root.cancel();
        *root = CancellationToken::new();
    }

    // ─────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────

    pub async fn refresh(&self) -> Result<Roster> {
        let snapshot = self
            .cache
            .invalidate_and_refetch(CacheKey::AllCarts, &*self.gateway)
            .await?;
        Ok(roster::project(&snapshot, Some(self.viewer)))
    }

    /// The cached roster for this viewer, without touching the ledger.
    pub async fn roster(&self) -> Roster {
        let snapshot = self.cache.snapshot().await;
        roster::project(&snapshot, Some(self.viewer))
    }

    pub async fn snapshot(&self) -> Arc<RosterSnapshot> {
        self.cache.snapshot().await
    }

    /// Claim/close panels for `cart` as of the cached roster.
    pub async fn cart_actions(&self, cart: Address) -> Option<CartActions> {
        let snapshot = self.cache.snapshot().await;
        let cart = snapshot.carts.iter().find(|c| c.address == cart)?;
        Some(self.actions_for(cart))
    }

    fn actions_for(&self, cart: &Cart) -> CartActions {
        let is_owner = cart.is_owned_by(Some(self.viewer));
        CartActions {
            cart: cart.address,
            is_owner,
            claim: lifecycle::derive_claim_state(
                cart.is_completed,
                cart.fulfiller,
                Some(self.viewer),
            ),
            close: is_owner
                .then(|| lifecycle::derive_close_state(cart.is_completed, cart.fulfiller)),
        }
    }

    async fn fresh_cart(&self, cart: Address) -> Result<Cart> {
        let raw = self.gateway.read_cart(cart).await?;
        Ok(roster::normalize(cart, raw))
    }

    fn require_owner(&self, cart: &Cart, action: CartAction) -> Result<()> {
        if cart.is_owned_by(Some(self.viewer)) {
            Ok(())
        } else {
            Err(CartError::ActionNotPermitted(format!(
                "Only the owner of this cart can {}.",
                match action {
                    CartAction::Deposit => "add funds",
                    CartAction::Close => "close it",
                    _ => "do that",
                }
            )))
        }
    }

    // ─────────────────────────────────────────────────────────
    // Pipeline
    // ─────────────────────────────────────────────────────────

    /// Submit `dispatch`, wait for it, then invalidate and refetch the roster.
    pub async fn mutate_then_invalidate(&self, dispatch: Dispatch) -> Result<Mutation> {
        let cancel = self.cancel_token();
        let gateway = &*self.gateway;

        let (approval, confirmation) = match dispatch {
            Dispatch::Direct(call) => {
                let receipt = gateway.submit(self.viewer, call).await?;
                info!("Submitted {} on {}: {}", receipt.kind, receipt.target, receipt.tx_hash);
                let confirmation =
                    gateway::confirm(gateway, &receipt, self.confirmation_timeout, &cancel).await?;
                (None, confirmation)
            }
            Dispatch::Funded {
                sequence,
                dependent,
            } => {
                let outcome = sequence
                    .run(gateway, self.confirmation_timeout, &cancel, dependent)
                    .await?;
                (Some(outcome.approval), outcome.action)
            }
        };

        info!(
            "Confirmed {} in block {:?}",
            confirmation.tx_hash, confirmation.block_number
        );
        for event in &confirmation.events {
            info!("Cart {} emitted {}", event.cart(), event.kind().as_str());
        }

        let roster_generation = match self
            .cache
            .invalidate_and_refetch(CacheKey::AllCarts, gateway)
            .await
        {
            Ok(snapshot) => Some(snapshot.generation),
            Err(e) => {
                warn!(
                    "Mutation {} confirmed but roster refresh failed: {e}",
                    confirmation.tx_hash
                );
                None
            }
        };

        Ok(Mutation {
            confirmation,
            approval,
            roster_generation,
        })
    }

    // ─────────────────────────────────────────────────────────
    // Lifecycle operations
    // ─────────────────────────────────────────────────────────

    /// Approve the factory, then `createCart(name, amount, items)`.
    pub async fn create_cart(
        &self,
        name: &str,
        amount: &str,
        items: &[String],
    ) -> Result<Mutation> {
        let _token = self.pending.try_begin(self.contracts.factory, CartAction::Create)?;
        let lifecycle::NewCart {
            name,
            amount,
            items,
        } = lifecycle::validate_new_cart(name, amount, items)?;
        let sequence = FundedSequence::with_amount(self.viewer, self.contracts.factory, amount)?;

        self.mutate_then_invalidate(Dispatch::Funded {
            sequence,
            dependent: Box::new(move |amount| LedgerCall::CreateCart { name, amount, items }),
        })
        .await
    }

    /// Approve the cart, then `depositMoreFunds(amount)`. Owner only.
    pub async fn deposit(&self, cart: Address, amount: &str) -> Result<Mutation> {
        let _token = self.pending.try_begin(cart, CartAction::Deposit)?;
        let sequence = FundedSequence::begin(self.viewer, cart, amount)?;

        let current = self.fresh_cart(cart).await?;
        self.require_owner(&current, CartAction::Deposit)?;
        if current.is_completed {
            return Err(CartError::ActionNotPermitted(
                "This cart is completed and cannot receive funds.".into(),
            ));
        }

        self.mutate_then_invalidate(Dispatch::Funded {
            sequence,
            dependent: Box::new(move |amount| LedgerCall::DepositMoreFunds { cart, amount }),
        })
        .await
    }

    pub async fn claim(&self, cart: Address) -> Result<Mutation> {
        self.claim_panel(cart, ClaimAction::Claim, CartAction::Claim).await
    }

    pub async fn forfeit(&self, cart: Address) -> Result<Mutation> {
        self.claim_panel(cart, ClaimAction::Forfeit, CartAction::Forfeit)
            .await
    }

    async fn claim_panel(
        &self,
        cart: Address,
        wanted: ClaimAction,
        action: CartAction,
    ) -> Result<Mutation> {
        let _token = self.pending.try_begin(cart, action)?;

        let current = self.fresh_cart(cart).await?;
        let state = lifecycle::derive_claim_state(
            current.is_completed,
            current.fulfiller,
            Some(self.viewer),
        );
        if state.disabled || state.action != wanted {
            return Err(CartError::ActionNotPermitted(state.message));
        }

        self.mutate_then_invalidate(Dispatch::Direct(wanted.ledger_call(cart)))
            .await
    }

    /// Remove `items` from the cart. `confirmed` is the owner's acknowledgement
    /// that deleted items cannot be added back.
    pub async fn delete_items(
        &self,
        cart: Address,
        items: &[String],
        confirmed: bool,
    ) -> Result<Mutation> {
        let _token = self.pending.try_begin(cart, CartAction::DeleteItems)?;

        let current = self.fresh_cart(cart).await?;
        let DeleteItemsState { message, disabled } =
            lifecycle::derive_delete_items_state(&current, Some(self.viewer), items, confirmed);
        if disabled {
            return Err(CartError::ActionNotPermitted(message));
        }

        self.mutate_then_invalidate(Dispatch::Direct(LedgerCall::DeleteItems {
            cart,
            items: items.to_vec(),
        }))
        .await
    }

    /// Close the cart: refund when unclaimed, pay the fulfiller when claimed.
    pub async fn close(&self, cart: Address, acknowledged: bool) -> Result<Mutation> {
        let _token = self.pending.try_begin(cart, CartAction::Close)?;

        let current = self.fresh_cart(cart).await?;
        self.require_owner(&current, CartAction::Close)?;
        let state = lifecycle::derive_close_state(current.is_completed, current.fulfiller);
        if state.disabled {
            return Err(CartError::ActionNotPermitted(state.message));
        }
        if !state.dispatchable(acknowledged) {
            return Err(CartError::ActionNotPermitted(format!(
                "Acknowledgement required: {}",
                state.message
            )));
        }

        self.mutate_then_invalidate(Dispatch::Direct(state.action.ledger_call(cart)))
            .await
    }
}
