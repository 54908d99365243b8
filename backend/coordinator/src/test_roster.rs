use std::sync::Arc;
use std::time::Duration;

use crate::coordinator::Coordinator;
use crate::errors::CartError;
use crate::gateway::Contracts;
use crate::invariants;
use crate::sim::InMemoryLedger;
use crate::types::{Address, Amount};

const TIMEOUT: Duration = Duration::from_secs(5);

fn contracts() -> Contracts {
    Contracts {
        factory: Address::from_low_u64(0xfac),
        token: Address::from_low_u64(0x05dc),
    }
}

fn session(ledger: &Arc<InMemoryLedger>, viewer: Address) -> Coordinator<InMemoryLedger> {
    Coordinator::new(viewer, ledger.clone(), contracts(), TIMEOUT)
}

#[tokio::test]
async fn test_roster_partition_for_three_viewers() {
    let ledger = Arc::new(InMemoryLedger::new(contracts()));
    let a = Address::from_low_u64(0xa);
    let b = Address::from_low_u64(0xb);
    let c = Address::from_low_u64(0xc);
    let a1 = ledger.seed_cart(a, "a1", &["x"], Amount::from_units(1));
    let b1 = ledger.seed_cart(b, "b1", &["x"], Amount::from_units(1));
    let c1 = ledger.seed_cart(c, "c1", &["x"], Amount::from_units(1));
    let a2 = ledger.seed_cart(a, "a2", &["x"], Amount::from_units(1));

    let a_session = session(&ledger, a);
    a_session.claim(b1).await.unwrap();
    session(&ledger, b).claim(c1).await.unwrap();

    let roster = a_session.refresh().await.unwrap();
    let mine: Vec<Address> = roster.mine.iter().map(|cart| cart.address).collect();
    assert_eq!(mine, vec![a1, a2]);
    let others: Vec<Address> = roster.others.iter().map(|cart| cart.address).collect();
    assert_eq!(others, vec![b1, c1]);
    let claimed: Vec<Address> = roster.claimed_by_me().map(|cart| cart.address).collect();
    assert_eq!(claimed, vec![b1]);

    for viewer in [a, b, c] {
        let session = session(&ledger, viewer);
        let roster = session.refresh().await.unwrap();
        let snapshot = session.snapshot().await;
        invariants::assert_partition(&roster, &snapshot.carts, viewer);
    }
}

#[tokio::test]
async fn test_failed_refresh_keeps_previous_roster() {
    let ledger = Arc::new(InMemoryLedger::new(contracts()));
    let owner = Address::from_low_u64(0xa);
    ledger.seed_cart(owner, "a1", &["x"], Amount::from_units(1));
    let coordinator = session(&ledger, owner);
    let before = coordinator.refresh().await.unwrap();

    ledger.set_reads_unavailable(true);
    let err = coordinator.refresh().await.unwrap_err();
    assert!(matches!(err, CartError::ReadUnavailable(_)));

    let after = coordinator.roster().await;
    assert_eq!(after.mine, before.mine);
    assert_eq!(coordinator.snapshot().await.generation, 1);
}

#[tokio::test]
async fn test_confirmed_mutation_survives_failed_refetch() {
    let ledger = Arc::new(InMemoryLedger::new(contracts()));
    let owner = Address::from_low_u64(0xa);
    ledger.mint(owner, Amount::from_units(100));
    let coordinator = session(&ledger, owner);
    coordinator.refresh().await.unwrap();

    // Creation needs no ledger read before dispatch.
    ledger.set_reads_unavailable(true);
    let mutation = coordinator
        .create_cart("Groceries", "10", &["milk".to_string()])
        .await
        .unwrap();
    assert_eq!(mutation.roster_generation, None);

    let snapshot = coordinator.snapshot().await;
    assert!(snapshot.stale);
    assert!(snapshot.carts.is_empty());

    ledger.set_reads_unavailable(false);
    assert_eq!(coordinator.refresh().await.unwrap().mine.len(), 1);
}

#[tokio::test]
async fn test_unknown_cart_has_no_actions() {
    let ledger = Arc::new(InMemoryLedger::new(contracts()));
    let coordinator = session(&ledger, Address::from_low_u64(0xa));
    coordinator.refresh().await.unwrap();
    assert!(coordinator
        .cart_actions(Address::from_low_u64(0xdead))
        .await
        .is_none());
}

#[tokio::test]
async fn test_full_lifecycle_keeps_invariants() {
    let ledger = Arc::new(InMemoryLedger::new(contracts()));
    let owner = Address::from_low_u64(0xa);
    let fulfiller = Address::from_low_u64(0xf);
    ledger.mint(owner, Amount::from_units(500));
    let owner_session = session(&ledger, owner);
    let fulfiller_session = session(&ledger, fulfiller);

    owner_session
        .create_cart(
            "Groceries",
            "100",
            &["milk".to_string(), "eggs".to_string(), "bread".to_string()],
        )
        .await
        .unwrap();
    let mut previous = owner_session.snapshot().await.carts.clone();
    let cart = previous[0].address;

    owner_session.deposit(cart, "50").await.unwrap();
    let current = owner_session.snapshot().await.carts.clone();
    invariants::assert_roster_transition(&previous, &current);
    invariants::assert_deposit_invariant(
        previous[0].funds,
        current[0].funds,
        Amount::from_units(50),
    );
    previous = current;

    owner_session
        .delete_items(cart, &["eggs".to_string()], true)
        .await
        .unwrap();
    let current = owner_session.snapshot().await.carts.clone();
    invariants::assert_roster_transition(&previous, &current);
    previous = current;

    fulfiller_session.claim(cart).await.unwrap();
    fulfiller_session.forfeit(cart).await.unwrap();
    fulfiller_session.claim(cart).await.unwrap();
    let current = owner_session.refresh().await.unwrap().mine;
    invariants::assert_roster_transition(&previous, &current);
    previous = current;

    owner_session.close(cart, true).await.unwrap();
    let current = owner_session.snapshot().await.carts.clone();
    invariants::assert_roster_transition(&previous, &current);
    assert!(current[0].is_completed);
    assert_eq!(ledger.balance_of(fulfiller), Amount::from_units(150));
    assert_eq!(ledger.balance_of(owner), Amount::from_units(350));
}
