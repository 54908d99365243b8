//! Roster cache, the only client-side state shared between operations.
//!
//! [`RosterCache`] is the sole writer of the cached cart set. Everything else
//! reads an `Arc` snapshot. The freshness window is zero: a snapshot is only
//! fresh between a refetch and the next invalidation, and every confirmed
//! mutation invalidates then refetches the whole roster.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::errors::Result;
use crate::gateway::LedgerGateway;
use crate::roster;
use crate::types::{Address, Cart};

/// Cache keys. There is one logical entry: the full cart roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    AllCarts,
}

/// An immutable view of every cart as of one refetch.
#[derive(Debug, Clone)]
pub struct RosterSnapshot {
    pub carts: Vec<Cart>,
    /// Bumped by every successful refetch; `0` means never fetched.
    pub generation: u64,
    pub fetched_at: Option<DateTime<Utc>>,
    pub stale: bool,
}

impl RosterSnapshot {
    fn empty() -> Self {
        Self {
            carts: Vec::new(),
            generation: 0,
            fetched_at: None,
            stale: true,
        }
    }
}

pub struct RosterCache {
    current: RwLock<Arc<RosterSnapshot>>,
    /// Serializes refetches so two reloads never interleave their writes.
    refetching: Mutex<()>,
    refetches: AtomicU64,
}

impl Default for RosterCache {
    fn default() -> Self {
        Self::new()
    }
}

impl RosterCache {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(RosterSnapshot::empty())),
            refetching: Mutex::new(()),
            refetches: AtomicU64::new(0),
        }
    }

    pub async fn snapshot(&self) -> Arc<RosterSnapshot> {
        self.current.read().await.clone()
    }

    pub async fn is_fresh(&self) -> bool {
        let snapshot = self.current.read().await;
        snapshot.generation > 0 && !snapshot.stale
    }

    /// Number of refetches that replaced the snapshot.
    pub fn refetch_count(&self) -> u64 {
        self.refetches.load(Ordering::SeqCst)
    }

    /// Mark the entry for `key` stale. The data stays readable.
    pub async fn invalidate(&self, key: CacheKey) {
        let CacheKey::AllCarts = key;
        let mut current = self.current.write().await;
        if !current.stale {
            let mut next = RosterSnapshot::clone(&current);
            next.stale = true;
            *current = Arc::new(next);
        }
        debug!("Invalidated {key:?} (generation {})", current.generation);
    }

    /// Reload every cart for `key` and replace the snapshot in one write.
    ///
    /// On any read failure the previous snapshot is left exactly as it was.
    pub async fn refetch<G: LedgerGateway>(
        &self,
        key: CacheKey,
        gateway: &G,
    ) -> Result<Arc<RosterSnapshot>> {
        let CacheKey::AllCarts = key;
        let _guard = self.refetching.lock().await;

        let carts = match load_all(gateway).await {
            Ok(carts) => carts,
            Err(e) => {
                warn!("Roster refetch failed, keeping previous snapshot: {e}");
                return Err(e);
            }
        };

        let mut current = self.current.write().await;
        let next = Arc::new(RosterSnapshot {
            carts,
            generation: current.generation + 1,
            fetched_at: Some(Utc::now()),
            stale: false,
        });
        *current = next.clone();
        self.refetches.fetch_add(1, Ordering::SeqCst);
        debug!(
            "Refetched {key:?}: {} carts (generation {})",
            next.carts.len(),
            next.generation
        );
        Ok(next)
    }

    /// `invalidate` followed by `refetch`, the post-mutation policy.
    pub async fn invalidate_and_refetch<G: LedgerGateway>(
        &self,
        key: CacheKey,
        gateway: &G,
    ) -> Result<Arc<RosterSnapshot>> {
        self.invalidate(key).await;
        self.refetch(key, gateway).await
    }
}

async fn load_all<G: LedgerGateway>(gateway: &G) -> Result<Vec<Cart>> {
    let addresses = gateway.cart_addresses().await?;
    let mut carts = Vec::with_capacity(addresses.len());
    let mut relisted: Option<Vec<Address>> = None;
    for address in addresses {
        match gateway.read_cart(address).await {
            Ok(raw) => carts.push(roster::normalize(address, raw)),
            Err(e) => {
                // A cart destroyed after the listing is gone, not unreadable.
                if relisted.is_none() {
                    relisted = Some(gateway.cart_addresses().await?);
                }
                if relisted.as_ref().is_some_and(|list| list.contains(&address)) {
                    return Err(e);
                }
                debug!("Cart {address} left the factory list during refetch, skipping");
            }
        }
    }
    Ok(carts)
}
