//! Normalization of raw ledger tuples and the per-viewer roster partition.

use serde::Serialize;

use crate::cache::RosterSnapshot;
use crate::types::{Address, Amount, Cart, RawCartInfo};

/// Turn a `getCartInfo()` tuple into a [`Cart`].
pub fn normalize(address: Address, raw: RawCartInfo) -> Cart {
    Cart {
        address,
        name: raw.name,
        items: raw.items,
        is_completed: raw.is_completed,
        funds: Amount::from_scaled(raw.funds),
        fulfiller: (!raw.fulfiller.is_zero()).then_some(raw.fulfiller),
        owner: raw.owner,
    }
}

/// The roster as one viewer sees it.
#[derive(Debug, Clone, Serialize)]
pub struct Roster {
    pub viewer: Option<Address>,
    /// Carts the viewer owns.
    pub mine: Vec<Cart>,
    /// Everyone else's carts.
    pub others: Vec<Cart>,
}

impl Roster {
    /// Carts in `others` the viewer has claimed.
    pub fn claimed_by_me(&self) -> impl Iterator<Item = &Cart> + '_ {
        self.others
            .iter()
            .filter(move |cart| cart.is_claimed_by(self.viewer))
    }

    pub fn find(&self, address: Address) -> Option<&Cart> {
        self.mine
            .iter()
            .chain(self.others.iter())
            .find(|cart| cart.address == address)
    }
}

/// Partition `carts` for `viewer`, keeping ledger order inside each side.
pub fn partition(carts: &[Cart], viewer: Option<Address>) -> Roster {
    let (mine, others): (Vec<Cart>, Vec<Cart>) = carts
        .iter()
        .cloned()
        .partition(|cart| cart.is_owned_by(viewer));
    Roster {
        viewer,
        mine,
        others,
    }
}

pub fn project(snapshot: &RosterSnapshot, viewer: Option<Address>) -> Roster {
    partition(&snapshot.carts, viewer)
}
