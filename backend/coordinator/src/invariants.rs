#![allow(dead_code)]

use std::collections::HashSet;

use crate::roster::Roster;
use crate::types::{Address, Amount, Cart, CartStatus};

/// A completed cart has paid out everything it held.
pub fn assert_completed_is_drained(cart: &Cart) {
    if cart.is_completed {
        assert!(
            cart.funds.is_zero(),
            "completed cart {} still holds {}",
            cart.address,
            cart.funds
        );
    }
}

/// Deposit invariant: after a deposit of `amount`, funds increase by exactly
/// `amount`.
pub fn assert_deposit_invariant(before: Amount, after: Amount, amount: Amount) {
    assert_eq!(
        Some(after),
        before.checked_add(amount),
        "deposit invariant broken: {before} + {amount} != {after}"
    );
}

/// Only these transitions exist:
///   Unclaimed  -> Claimed(x)
///   Claimed(x) -> Unclaimed | Completed
///   Completed  -> (none)
/// Staying in the same status is always allowed.
pub fn assert_valid_status_transition(from: CartStatus, to: CartStatus) {
    let valid = from == to
        || matches!(
            (from, to),
            (CartStatus::Unclaimed, CartStatus::Claimed(_))
                | (CartStatus::Claimed(_), CartStatus::Unclaimed)
                | (CartStatus::Claimed(_), CartStatus::Completed)
        );

    assert!(valid, "invalid status transition from {from:?} to {to:?}");
}

/// Address, name and owner never change after creation; items only shrink.
pub fn assert_immutable_fields(original: &Cart, current: &Cart) {
    assert_eq!(original.address, current.address, "cart address changed");
    assert_eq!(original.name, current.name, "cart name changed");
    assert_eq!(original.owner, current.owner, "cart owner changed");
    for item in &current.items {
        assert!(
            original.items.contains(item),
            "item {item:?} appeared on cart {}",
            current.address
        );
    }
}

/// `mine` and `others` split `carts` exactly, and every cart the viewer
/// claimed is in `others`.
pub fn assert_partition(roster: &Roster, carts: &[Cart], viewer: Address) {
    assert_eq!(roster.mine.len() + roster.others.len(), carts.len());
    assert!(roster.mine.iter().all(|cart| cart.owner == viewer));
    assert!(roster.others.iter().all(|cart| cart.owner != viewer));

    let mine: HashSet<Address> = roster.mine.iter().map(|c| c.address).collect();
    let others: HashSet<Address> = roster.others.iter().map(|c| c.address).collect();
    assert!(mine.is_disjoint(&others), "cart listed on both sides");

    for cart in roster.claimed_by_me() {
        assert_eq!(cart.fulfiller, Some(viewer));
        assert!(others.contains(&cart.address));
    }
}

/// Compare every cart of two consecutive rosters that exists in both.
pub fn assert_roster_transition(before: &[Cart], after: &[Cart]) {
    for old in before {
        if let Some(new) = after.iter().find(|c| c.address == old.address) {
            assert_immutable_fields(old, new);
            assert_valid_status_transition(old.status(), new.status());
        }
    }
    for cart in after {
        assert_completed_is_drained(cart);
    }
}
