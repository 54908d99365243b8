//! Per cart+action request tokens.
//!
//! A [`PendingToken`] marks one `(target, action)` pair as awaiting the
//! ledger. While it is alive a second request for the same pair is refused;
//! dropping it (success, error or panic unwinding) clears the mark. Pairs on
//! different carts never interfere.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::errors::{CartError, Result};
use crate::types::{Address, CartAction};

type Key = (Address, CartAction);

#[derive(Default, Clone)]
pub struct PendingRegistry {
    inner: Arc<Mutex<HashSet<Key>>>,
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<Key>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the `(target, action)` slot or fail with [`CartError::ActionPending`].
    pub fn try_begin(&self, target: Address, action: CartAction) -> Result<PendingToken> {
        if !self.lock().insert((target, action)) {
            return Err(CartError::ActionPending { target, action });
        }
        Ok(PendingToken {
            registry: self.clone(),
            key: (target, action),
        })
    }

    pub fn is_pending(&self, target: Address, action: CartAction) -> bool {
        self.lock().contains(&(target, action))
    }

    /// Every pair currently awaiting the ledger.
    pub fn snapshot(&self) -> Vec<(Address, CartAction)> {
        self.lock().iter().copied().collect()
    }
}

/// Proof that a request is in flight. Releases its slot on drop.
#[must_use = "dropping the token immediately releases the pending slot"]
pub struct PendingToken {
    registry: PendingRegistry,
    key: Key,
}

impl Drop for PendingToken {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.key);
    }
}
