use std::sync::Arc;
use std::time::Duration;

use crate::coordinator::Coordinator;
use crate::errors::CartError;
use crate::events::EventKind;
use crate::gateway::{CallKind, Contracts, LedgerCall, LedgerGateway};
use crate::invariants;
use crate::lifecycle::{self, ClaimAction, CloseAction};
use crate::roster;
use crate::sim::InMemoryLedger;
use crate::types::{Address, Amount, Cart, CartAction};

const TIMEOUT: Duration = Duration::from_secs(5);

const OWNER: u64 = 0x0a;
const FULFILLER: u64 = 0x0f;
const STRANGER: u64 = 0x05;

fn contracts() -> Contracts {
    Contracts {
        factory: Address::from_low_u64(0xfac),
        token: Address::from_low_u64(0x05dc),
    }
}

fn ledger() -> Arc<InMemoryLedger> {
    Arc::new(InMemoryLedger::new(contracts()))
}

fn session(ledger: &Arc<InMemoryLedger>, viewer: u64) -> Coordinator<InMemoryLedger> {
    Coordinator::new(
        Address::from_low_u64(viewer),
        ledger.clone(),
        contracts(),
        TIMEOUT,
    )
}

async fn read(ledger: &InMemoryLedger, cart: Address) -> Cart {
    roster::normalize(cart, ledger.read_cart(cart).await.unwrap())
}

#[tokio::test]
async fn test_claim_panels_for_holder_and_others() {
    let ledger = ledger();
    let owner = Address::from_low_u64(OWNER);
    let x = Address::from_low_u64(FULFILLER);
    let cart = ledger.seed_cart(owner, "Groceries", &["milk"], Amount::from_units(10));
    let x_session = session(&ledger, FULFILLER);
    let y_session = session(&ledger, STRANGER);

    let mutation = x_session.claim(cart).await.unwrap();
    assert_eq!(
        mutation.confirmation.events[0].kind(),
        EventKind::DeliveryClaimed
    );

    let x_view = x_session.cart_actions(cart).await.unwrap();
    assert_eq!(x_view.claim.action, ClaimAction::Forfeit);
    assert_eq!(x_view.claim.label, "Forfeit Claim");
    assert!(!x_view.claim.disabled);
    assert!(!x_view.is_owner);
    assert!(x_view.close.is_none());

    y_session.refresh().await.unwrap();
    let y_view = y_session.cart_actions(cart).await.unwrap();
    assert!(y_view.claim.disabled);
    assert!(y_view.claim.message.contains(&x.short()));
}

#[tokio::test]
async fn test_claim_uses_fresh_ledger_state() {
    let ledger = ledger();
    let owner = Address::from_low_u64(OWNER);
    let cart = ledger.seed_cart(owner, "Groceries", &["milk"], Amount::from_units(10));
    let x_session = session(&ledger, FULFILLER);
    let y_session = session(&ledger, STRANGER);

    // Y's cache still shows the cart as unclaimed.
    y_session.refresh().await.unwrap();
    x_session.claim(cart).await.unwrap();
    assert!(!y_session.cart_actions(cart).await.unwrap().claim.disabled);

    let err = y_session.claim(cart).await.unwrap_err();
    match err {
        CartError::ActionNotPermitted(message) => {
            assert!(message.contains(&Address::from_low_u64(FULFILLER).short()))
        }
        other => panic!("expected ActionNotPermitted, got {other:?}"),
    }
    assert_eq!(ledger.submissions(CallKind::ClaimDelivery), 1);
}

#[tokio::test]
async fn test_second_claim_while_pending_is_refused() {
    let ledger = ledger();
    let owner = Address::from_low_u64(OWNER);
    let cart = ledger.seed_cart(owner, "Groceries", &["milk"], Amount::from_units(10));
    let x_session = Arc::new(session(&ledger, FULFILLER));
    ledger.hold_confirmations();

    let first = {
        let x_session = x_session.clone();
        tokio::spawn(async move { x_session.claim(cart).await })
    };
    while ledger.submissions(CallKind::ClaimDelivery) == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let err = x_session.claim(cart).await.unwrap_err();
    assert!(matches!(
        err,
        CartError::ActionPending {
            action: CartAction::Claim,
            ..
        }
    ));
    assert_eq!(ledger.submissions(CallKind::ClaimDelivery), 1);

    // Other carts are not blocked.
    let other = ledger.seed_cart(owner, "Hardware", &["nails"], Amount::ZERO);
    assert!(!x_session.is_pending(other, CartAction::Claim));

    ledger.release_confirmations();
    first.await.unwrap().unwrap();
    assert!(!x_session.is_pending(cart, CartAction::Claim));
}

#[tokio::test]
async fn test_forfeit_returns_cart_to_unclaimed() {
    let ledger = ledger();
    let owner = Address::from_low_u64(OWNER);
    let cart = ledger.seed_cart(owner, "Groceries", &["milk"], Amount::from_units(10));
    let x_session = session(&ledger, FULFILLER);

    let err = x_session.forfeit(cart).await.unwrap_err();
    assert!(matches!(err, CartError::ActionNotPermitted(_)));

    x_session.claim(cart).await.unwrap();
    let claimed = read(&ledger, cart).await;
    let mutation = x_session.forfeit(cart).await.unwrap();
    assert_eq!(
        mutation.confirmation.events[0].kind(),
        EventKind::DeliveryForfeited
    );

    let released = read(&ledger, cart).await;
    assert_eq!(released.fulfiller, None);
    invariants::assert_valid_status_transition(claimed.status(), released.status());
    let view = x_session.cart_actions(cart).await.unwrap();
    assert_eq!(view.claim.action, ClaimAction::Claim);
    assert!(!view.claim.disabled);
}

#[tokio::test]
async fn test_close_unclaimed_refunds_and_removes_cart() {
    let ledger = ledger();
    let owner = Address::from_low_u64(OWNER);
    let cart = ledger.seed_cart(owner, "Groceries", &["milk"], Amount::from_units(40));
    let owner_session = session(&ledger, OWNER);
    owner_session.refresh().await.unwrap();

    let view = owner_session.cart_actions(cart).await.unwrap();
    let close = view.close.unwrap();
    assert_eq!(close.action, CloseAction::Acknowledge);
    assert_eq!(close.label, "I understand");

    let err = owner_session.close(cart, false).await.unwrap_err();
    assert!(matches!(err, CartError::ActionNotPermitted(_)));
    assert_eq!(ledger.submissions(CallKind::WithdrawAndDestroy), 0);

    owner_session.close(cart, true).await.unwrap();
    assert!(owner_session.roster().await.find(cart).is_none());
    assert_eq!(ledger.balance_of(owner), Amount::from_units(40));
}

#[tokio::test]
async fn test_close_claimed_pays_fulfiller_and_completes() {
    let ledger = ledger();
    let owner = Address::from_low_u64(OWNER);
    let fulfiller = Address::from_low_u64(FULFILLER);
    let cart = ledger.seed_cart(owner, "Groceries", &["milk"], Amount::from_units(40));
    let owner_session = session(&ledger, OWNER);
    session(&ledger, FULFILLER).claim(cart).await.unwrap();
    let before = owner_session.refresh().await.unwrap();

    let close = owner_session.cart_actions(cart).await.unwrap().close.unwrap();
    assert_eq!(close.action, CloseAction::ConfirmDelivery);
    assert!(close.message.contains(&fulfiller.short()));

    let mutation = owner_session.close(cart, true).await.unwrap();
    assert_eq!(
        mutation.confirmation.events[0].kind(),
        EventKind::FundsWithdrawn
    );
    assert_eq!(ledger.balance_of(fulfiller), Amount::from_units(40));

    let after = owner_session.roster().await;
    let completed = after.find(cart).unwrap();
    assert!(completed.is_completed);
    invariants::assert_roster_transition(&before.mine, &after.mine);

    let view = owner_session.cart_actions(cart).await.unwrap();
    assert!(view.claim.disabled);
    assert!(view.close.unwrap().disabled);
}

#[tokio::test]
async fn test_close_by_non_owner_is_refused() {
    let ledger = ledger();
    let owner = Address::from_low_u64(OWNER);
    let cart = ledger.seed_cart(owner, "Groceries", &["milk"], Amount::from_units(40));

    let err = session(&ledger, STRANGER).close(cart, true).await.unwrap_err();
    assert!(matches!(err, CartError::ActionNotPermitted(_)));
    assert!(ledger.journal().is_empty());
}

#[tokio::test]
async fn test_delete_items_requires_confirmation() {
    let ledger = ledger();
    let owner = Address::from_low_u64(OWNER);
    let cart = ledger.seed_cart(owner, "Groceries", &["milk", "eggs", "bread"], Amount::ZERO);
    let owner_session = session(&ledger, OWNER);
    let selected = vec!["eggs".to_string()];

    let err = owner_session
        .delete_items(cart, &selected, false)
        .await
        .unwrap_err();
    assert!(matches!(err, CartError::ActionNotPermitted(_)));

    let missing = vec!["cheese".to_string()];
    let err = owner_session
        .delete_items(cart, &missing, true)
        .await
        .unwrap_err();
    assert!(matches!(err, CartError::ActionNotPermitted(ref m) if m.contains("cheese")));
    assert_eq!(ledger.submissions(CallKind::DeleteItems), 0);

    owner_session.delete_items(cart, &selected, true).await.unwrap();
    assert_eq!(read(&ledger, cart).await.items, vec!["milk", "bread"]);
}

/// Every action the rules offer is one the ledger accepts, and every action
/// they withhold is one the ledger reverts.
#[tokio::test]
async fn test_derived_legality_matches_ledger() {
    let ledger = ledger();
    let owner = Address::from_low_u64(OWNER);
    let fulfiller = Address::from_low_u64(FULFILLER);
    let stranger = Address::from_low_u64(STRANGER);

    let unclaimed = ledger.seed_cart(owner, "a", &["milk"], Amount::from_units(5));
    let claimed = ledger.seed_cart(owner, "b", &["milk"], Amount::from_units(5));
    let completed = ledger.seed_cart(owner, "c", &["milk"], Amount::from_units(5));
    let self_claimed = ledger.seed_cart(owner, "d", &["milk"], Amount::from_units(5));
    ledger.submit(fulfiller, LedgerCall::ClaimDelivery { cart: claimed }).await.unwrap();
    ledger.submit(fulfiller, LedgerCall::ClaimDelivery { cart: completed }).await.unwrap();
    ledger
        .submit(owner, LedgerCall::CloseSuccessDelivery { cart: completed })
        .await
        .unwrap();
    ledger.submit(owner, LedgerCall::ClaimDelivery { cart: self_claimed }).await.unwrap();

    let selected = vec!["milk".to_string()];
    for address in [unclaimed, claimed, completed, self_claimed] {
        let cart = read(&ledger, address).await;
        for viewer in [owner, fulfiller, stranger] {
            let claim =
                lifecycle::derive_claim_state(cart.is_completed, cart.fulfiller, Some(viewer));
            for action in [ClaimAction::Claim, ClaimAction::Forfeit] {
                let offered = !claim.disabled && claim.action == action;
                assert_eq!(
                    offered,
                    ledger.would_accept(viewer, &action.ledger_call(address)),
                    "{action:?} by {viewer} on {}",
                    cart.name
                );
            }

            let close = lifecycle::derive_close_state(cart.is_completed, cart.fulfiller);
            for action in [CloseAction::Acknowledge, CloseAction::ConfirmDelivery] {
                let offered =
                    cart.is_owned_by(Some(viewer)) && !close.disabled && close.action == action;
                assert_eq!(
                    offered,
                    ledger.would_accept(viewer, &action.ledger_call(address)),
                    "{action:?} by {viewer} on {}",
                    cart.name
                );
            }

            let delete = lifecycle::derive_delete_items_state(&cart, Some(viewer), &selected, true);
            let call = LedgerCall::DeleteItems {
                cart: address,
                items: selected.clone(),
            };
            assert_eq!(
                !delete.disabled,
                ledger.would_accept(viewer, &call),
                "delete by {viewer} on {}",
                cart.name
            );
        }
    }
}
