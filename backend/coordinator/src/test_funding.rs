use std::sync::Arc;
use std::time::Duration;

use crate::coordinator::Coordinator;
use crate::errors::CartError;
use crate::events::CartEvent;
use crate::gateway::{CallKind, Contracts};
use crate::invariants;
use crate::sim::InMemoryLedger;
use crate::types::{Address, Amount, CartAction};

const TIMEOUT: Duration = Duration::from_secs(5);

fn contracts() -> Contracts {
    Contracts {
        factory: Address::from_low_u64(0xfac),
        token: Address::from_low_u64(0x05dc),
    }
}

fn setup(viewer: Address) -> (Arc<InMemoryLedger>, Coordinator<InMemoryLedger>) {
    setup_with_timeout(viewer, TIMEOUT)
}

fn setup_with_timeout(
    viewer: Address,
    timeout: Duration,
) -> (Arc<InMemoryLedger>, Coordinator<InMemoryLedger>) {
    let ledger = Arc::new(InMemoryLedger::new(contracts()));
    let coordinator = Coordinator::new(viewer, ledger.clone(), contracts(), timeout);
    (ledger, coordinator)
}

async fn funds_of(coordinator: &Coordinator<InMemoryLedger>, cart: Address) -> Amount {
    coordinator
        .snapshot()
        .await
        .carts
        .iter()
        .find(|c| c.address == cart)
        .map(|c| c.funds)
        .unwrap()
}

#[tokio::test]
async fn test_deposit_adds_to_funds_and_refetches_once() {
    let owner = Address::from_low_u64(0xa);
    let (ledger, coordinator) = setup(owner);
    ledger.mint(owner, Amount::from_units(1_000));
    let cart = ledger.seed_cart(owner, "Groceries", &["milk"], Amount::from_units(100));
    coordinator.refresh().await.unwrap();
    assert_eq!(coordinator.cache().refetch_count(), 1);

    let mutation = coordinator.deposit(cart, "50").await.unwrap();

    assert_eq!(funds_of(&coordinator, cart).await, Amount::from_units(150));
    assert_eq!(coordinator.cache().refetch_count(), 2);
    assert_eq!(ledger.address_reads(), 2);
    assert_eq!(mutation.roster_generation, Some(2));
    assert!(mutation.approval.is_some());
    assert_eq!(
        mutation.confirmation.events,
        vec![CartEvent::FundsDeposited {
            cart,
            sender: owner,
            amount: Amount::from_units(50),
            fulfiller: Address::ZERO,
        }]
    );
    assert_eq!(
        ledger.journal(),
        vec![
            "submit:approve",
            "confirm:approve",
            "submit:depositMoreFunds",
            "confirm:depositMoreFunds",
        ]
    );
    invariants::assert_deposit_invariant(
        Amount::from_units(100),
        funds_of(&coordinator, cart).await,
        Amount::from_units(50),
    );
    assert!(!coordinator.is_pending(cart, CartAction::Deposit));
}

#[tokio::test]
async fn test_deposit_on_empty_cart() {
    let owner = Address::from_low_u64(0xa);
    let (ledger, coordinator) = setup(owner);
    ledger.mint(owner, Amount::from_units(100));
    let cart = ledger.seed_cart(owner, "Hardware", &["nails"], Amount::ZERO);

    coordinator.deposit(cart, "25").await.unwrap();

    assert_eq!(funds_of(&coordinator, cart).await, Amount::from_units(25));
    assert_eq!(ledger.balance_of(owner), Amount::from_units(75));
    assert_eq!(ledger.allowance(owner, cart), Amount::ZERO);
}

#[tokio::test]
async fn test_create_cart_approves_factory_then_lists_cart() {
    let owner = Address::from_low_u64(0xa);
    let (ledger, coordinator) = setup(owner);
    ledger.mint(owner, Amount::from_units(1_000));

    let items = vec!["milk".to_string(), " eggs ".to_string()];
    coordinator
        .create_cart("  Groceries ", "20.5", &items)
        .await
        .unwrap();

    let roster = coordinator.roster().await;
    assert_eq!(roster.mine.len(), 1);
    let cart = &roster.mine[0];
    assert_eq!(cart.name, "Groceries");
    assert_eq!(cart.items, vec!["milk", "eggs"]);
    assert_eq!(cart.funds, Amount::from_scaled(20_500_000));
    assert_eq!(cart.fulfiller, None);
    assert_eq!(ledger.allowance(owner, contracts().factory), Amount::ZERO);
    assert_eq!(ledger.balance_of(owner), Amount::from_scaled(979_500_000));
    assert_eq!(ledger.submissions(CallKind::Approve), 1);
    assert_eq!(ledger.submissions(CallKind::CreateCart), 1);
}

#[tokio::test]
async fn test_invalid_input_never_reaches_the_ledger() {
    let owner = Address::from_low_u64(0xa);
    let (ledger, coordinator) = setup(owner);
    let cart = ledger.seed_cart(owner, "Groceries", &["milk"], Amount::ZERO);
    coordinator.refresh().await.unwrap();

    for raw in ["", "abc", "0", "-5", "1.0000001"] {
        let err = coordinator.deposit(cart, raw).await.unwrap_err();
        assert!(matches!(err, CartError::AmountInvalid { .. }), "{raw}: {err}");
        assert!(err.is_local());
    }
    let err = coordinator
        .create_cart("", "10", &["milk".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, CartError::InvalidField { field: "name", .. }));
    let err = coordinator.create_cart("Shop", "10", &[]).await.unwrap_err();
    assert!(matches!(err, CartError::InvalidField { field: "items", .. }));

    assert!(ledger.journal().is_empty());
    assert_eq!(coordinator.cache().refetch_count(), 1);
    assert!(coordinator.pending().is_empty());
}

#[tokio::test]
async fn test_deposit_by_non_owner_is_refused() {
    let owner = Address::from_low_u64(0xa);
    let stranger = Address::from_low_u64(0xb);
    let (ledger, coordinator) = setup(stranger);
    ledger.mint(stranger, Amount::from_units(100));
    let cart = ledger.seed_cart(owner, "Groceries", &["milk"], Amount::ZERO);

    let err = coordinator.deposit(cart, "5").await.unwrap_err();
    assert!(matches!(err, CartError::ActionNotPermitted(_)));
    assert_eq!(ledger.submissions(CallKind::Approve), 0);
}

#[tokio::test]
async fn test_failed_deposit_leaves_cache_untouched() {
    let owner = Address::from_low_u64(0xa);
    let (ledger, coordinator) = setup(owner);
    ledger.mint(owner, Amount::from_units(1_000));
    let cart = ledger.seed_cart(owner, "Groceries", &["milk"], Amount::from_units(100));
    let before = coordinator.refresh().await.unwrap();
    let generation = coordinator.snapshot().await.generation;

    ledger.revert_next(CallKind::DepositMoreFunds);
    let err = coordinator.deposit(cart, "50").await.unwrap_err();
    assert!(matches!(err, CartError::DependentActionFailed(_)));

    let after = coordinator.snapshot().await;
    assert_eq!(after.generation, generation);
    assert!(!after.stale);
    assert_eq!(after.carts, before.mine);
    assert_eq!(coordinator.cache().refetch_count(), 1);
    assert!(!coordinator.is_pending(cart, CartAction::Deposit));
    // The approval landed even though the deposit did not.
    assert_eq!(ledger.allowance(owner, cart), Amount::from_units(50));
}

#[tokio::test]
async fn test_retry_after_failed_deposit_succeeds() {
    let owner = Address::from_low_u64(0xa);
    let (ledger, coordinator) = setup(owner);
    ledger.mint(owner, Amount::from_units(1_000));
    let cart = ledger.seed_cart(owner, "Groceries", &["milk"], Amount::from_units(100));

    ledger.revert_next(CallKind::DepositMoreFunds);
    coordinator.deposit(cart, "50").await.unwrap_err();
    coordinator.deposit(cart, "50").await.unwrap();

    assert_eq!(funds_of(&coordinator, cart).await, Amount::from_units(150));
    assert_eq!(ledger.submissions(CallKind::Approve), 2);
}

#[tokio::test]
async fn test_concurrent_deposits_keep_their_own_amounts() {
    let owner = Address::from_low_u64(0xa);
    let (ledger, coordinator) = setup(owner);
    let coordinator = Arc::new(coordinator);
    ledger.mint(owner, Amount::from_units(100));
    let cart_a = ledger.seed_cart(owner, "Groceries", &["milk"], Amount::from_units(10));
    let cart_b = ledger.seed_cart(owner, "Hardware", &["nails"], Amount::from_units(20));
    ledger.hold_confirmations();

    let deposit = |cart: Address, amount: &'static str| {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.deposit(cart, amount).await })
    };
    let first = deposit(cart_a, "5");
    let second = deposit(cart_b, "7");
    while ledger.submissions(CallKind::Approve) < 2 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(coordinator.is_pending(cart_a, CartAction::Deposit));
    assert!(coordinator.is_pending(cart_b, CartAction::Deposit));
    assert_eq!(ledger.allowance(owner, cart_a), Amount::from_units(5));
    assert_eq!(ledger.allowance(owner, cart_b), Amount::from_units(7));
    ledger.release_confirmations();

    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();
    for (mutation, cart, amount) in [(&first, cart_a, 5), (&second, cart_b, 7)] {
        assert_eq!(
            mutation.confirmation.events,
            vec![CartEvent::FundsDeposited {
                cart,
                sender: owner,
                amount: Amount::from_units(amount),
                fulfiller: Address::ZERO,
            }]
        );
    }

    coordinator.refresh().await.unwrap();
    assert_eq!(funds_of(&coordinator, cart_a).await, Amount::from_units(15));
    assert_eq!(funds_of(&coordinator, cart_b).await, Amount::from_units(27));
    assert_eq!(ledger.balance_of(owner), Amount::from_units(88));
}

#[tokio::test]
async fn test_confirmation_timeout_clears_pending() {
    let owner = Address::from_low_u64(0xa);
    let (ledger, coordinator) = setup_with_timeout(owner, Duration::from_millis(50));
    ledger.mint(owner, Amount::from_units(100));
    let cart = ledger.seed_cart(owner, "Groceries", &["milk"], Amount::ZERO);
    ledger.hold_confirmations();

    let err = coordinator.deposit(cart, "5").await.unwrap_err();
    match err {
        CartError::AllowanceRejected(cause) => {
            assert!(matches!(*cause, CartError::ConfirmationTimeout { .. }))
        }
        other => panic!("expected AllowanceRejected, got {other:?}"),
    }
    assert!(!coordinator.is_pending(cart, CartAction::Deposit));
    assert_eq!(ledger.submissions(CallKind::DepositMoreFunds), 0);
    assert_eq!(coordinator.cache().refetch_count(), 0);
}

#[tokio::test]
async fn test_cancel_pending_stops_waiting() {
    let owner = Address::from_low_u64(0xa);
    let (ledger, coordinator) = setup(owner);
    let coordinator = Arc::new(coordinator);
    ledger.mint(owner, Amount::from_units(100));
    let cart = ledger.seed_cart(owner, "Groceries", &["milk"], Amount::ZERO);
    ledger.hold_confirmations();

    let task = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.deposit(cart, "5").await })
    };
    while ledger.submissions(CallKind::Approve) == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(coordinator.is_pending(cart, CartAction::Deposit));

    coordinator.cancel_pending();
    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(err, CartError::AllowanceRejected(_)));
    assert!(!coordinator.is_pending(cart, CartAction::Deposit));

    // Later operations get a fresh, uncancelled token.
    ledger.release_confirmations();
    coordinator.deposit(cart, "5").await.unwrap();
}
