//! In-memory ledger that enforces the cart contract's rules.
//!
//! Transactions execute in submission order at `submit` time, the way a
//! single block producer would include them; `await_confirmation` reports the
//! stored outcome once confirmations are released. Knobs for rejecting,
//! reverting, failing reads and holding confirmations let tests drive every
//! failure path of the coordinator.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use crate::errors::{CartError, Result};
use crate::events::CartEvent;
use crate::gateway::{CallKind, Confirmation, Contracts, LedgerCall, LedgerGateway, TxReceipt};
use crate::types::{Address, Amount, RawCartInfo};

#[derive(Debug, Clone)]
struct CartRecord {
    name: String,
    items: Vec<String>,
    is_completed: bool,
    funds: u128,
    fulfiller: Address,
    owner: Address,
}

impl CartRecord {
    fn info(&self) -> RawCartInfo {
        RawCartInfo {
            name: self.name.clone(),
            items: self.items.clone(),
            is_completed: self.is_completed,
            funds: self.funds,
            fulfiller: self.fulfiller,
            owner: self.owner,
        }
    }
}

#[derive(Default)]
struct LedgerState {
    balances: HashMap<Address, u128>,
    /// `(owner, spender) -> remaining allowance`
    allowances: HashMap<(Address, Address), u128>,
    carts: HashMap<Address, CartRecord>,
    /// Factory's enumerable set, in creation order.
    listed: Vec<Address>,
    next_cart: u64,
    next_tx: u64,
    outcomes: HashMap<String, std::result::Result<Confirmation, String>>,
    journal: Vec<String>,
    submissions: HashMap<CallKind, usize>,
    reject_next: HashSet<CallKind>,
    revert_next: HashSet<CallKind>,
    reads_unavailable: bool,
    address_reads: usize,
    /// Destroyed right after the next `getAllCartAddresses()` answer.
    destroy_after_listing: Option<Address>,
}

pub struct InMemoryLedger {
    contracts: Contracts,
    state: Mutex<LedgerState>,
    confirmations_open: watch::Sender<bool>,
}

impl InMemoryLedger {
    pub fn new(contracts: Contracts) -> Self {
        let (confirmations_open, _) = watch::channel(true);
        Self {
            contracts,
            state: Mutex::new(LedgerState {
                next_cart: 0x1000,
                ..LedgerState::default()
            }),
            confirmations_open,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Test knobs ───────────────────────────────────────────────────

    pub fn mint(&self, to: Address, amount: Amount) {
        *self.lock().balances.entry(to).or_default() += amount.scaled();
    }

    pub fn balance_of(&self, who: Address) -> Amount {
        Amount::from_scaled(self.lock().balances.get(&who).copied().unwrap_or(0))
    }

    pub fn allowance(&self, owner: Address, spender: Address) -> Amount {
        Amount::from_scaled(
            self.lock()
                .allowances
                .get(&(owner, spender))
                .copied()
                .unwrap_or(0),
        )
    }

    /// Insert a cart directly, bypassing the factory and the token.
    pub fn seed_cart(&self, owner: Address, name: &str, items: &[&str], funds: Amount) -> Address {
        let mut state = self.lock();
        let address = Address::from_low_u64(state.next_cart);
        state.next_cart += 1;
        state.carts.insert(
            address,
            CartRecord {
                name: name.to_string(),
                items: items.iter().map(|s| s.to_string()).collect(),
                is_completed: false,
                funds: funds.scaled(),
                fulfiller: Address::ZERO,
                owner,
            },
        );
        state.listed.push(address);
        address
    }

    /// Make the next submission of `kind` fail before broadcast.
    pub fn reject_next(&self, kind: CallKind) {
        self.lock().reject_next.insert(kind);
    }

    /// Make the next submission of `kind` revert when executed.
    pub fn revert_next(&self, kind: CallKind) {
        self.lock().revert_next.insert(kind);
    }

    pub fn set_reads_unavailable(&self, unavailable: bool) {
        self.lock().reads_unavailable = unavailable;
    }

    /// Withdraw-and-destroy `cart` just after the next address listing is
    /// served, as if another owner's transaction landed mid-refetch.
    pub fn destroy_after_next_listing(&self, cart: Address) {
        self.lock().destroy_after_listing = Some(cart);
    }

    /// Confirmations block until [`Self::release_confirmations`].
    pub fn hold_confirmations(&self) {
        self.confirmations_open.send_replace(false);
    }

    pub fn release_confirmations(&self) {
        self.confirmations_open.send_replace(true);
    }

    /// Number of submissions (accepted for broadcast) of `kind`.
    pub fn submissions(&self, kind: CallKind) -> usize {
        self.lock().submissions.get(&kind).copied().unwrap_or(0)
    }

    /// Number of `getAllCartAddresses()` reads served.
    pub fn address_reads(&self) -> usize {
        self.lock().address_reads
    }

    /// `"submit:<kind>"` / `"confirm:<kind>"` entries in the order they happened.
    pub fn journal(&self) -> Vec<String> {
        self.lock().journal.clone()
    }

    /// Execute `call` from `from` immediately and return whether the ledger
    /// accepted it. Used to compare ledger legality with derived legality.
    pub fn would_accept(&self, from: Address, call: &LedgerCall) -> bool {
        let mut scratch = self.lock().clone_for_dry_run();
        execute(&mut scratch, self.contracts, from, call).is_ok()
    }
}

impl LedgerState {
    fn clone_for_dry_run(&self) -> LedgerState {
        LedgerState {
            balances: self.balances.clone(),
            allowances: self.allowances.clone(),
            carts: self.carts.clone(),
            listed: self.listed.clone(),
            next_cart: self.next_cart,
            ..LedgerState::default()
        }
    }
}

// ─────────────────────────────────────────────────────────
// Contract rules
// ─────────────────────────────────────────────────────────

fn require(condition: bool, reason: &str) -> std::result::Result<(), String> {
    if condition {
        Ok(())
    } else {
        Err(reason.to_string())
    }
}

fn transfer_from(
    state: &mut LedgerState,
    owner: Address,
    spender: Address,
    amount: u128,
) -> std::result::Result<(), String> {
    let allowance = state.allowances.get(&(owner, spender)).copied().unwrap_or(0);
    require(allowance >= amount, "ERC20: insufficient allowance")?;
    let balance = state.balances.get(&owner).copied().unwrap_or(0);
    require(balance >= amount, "ERC20: transfer amount exceeds balance")?;
    state.allowances.insert((owner, spender), allowance - amount);
    state.balances.insert(owner, balance - amount);
    Ok(())
}

fn live_cart<'a>(
    state: &'a mut LedgerState,
    cart: &Address,
) -> std::result::Result<&'a mut CartRecord, String> {
    state
        .carts
        .get_mut(cart)
        .ok_or_else(|| "cart does not exist".to_string())
}

fn execute(
    state: &mut LedgerState,
    contracts: Contracts,
    from: Address,
    call: &LedgerCall,
) -> std::result::Result<Vec<CartEvent>, String> {
    match call {
        LedgerCall::Approve { spender, amount } => {
            state.allowances.insert((from, *spender), amount.scaled());
            Ok(vec![])
        }
        LedgerCall::CreateCart { name, amount, items } => {
            require(!amount.is_zero(), "Initial funds must be greater than 0")?;
            transfer_from(state, from, contracts.factory, amount.scaled())?;
            let address = Address::from_low_u64(state.next_cart);
            state.next_cart += 1;
            state.carts.insert(
                address,
                CartRecord {
                    name: name.clone(),
                    items: items.clone(),
                    is_completed: false,
                    funds: amount.scaled(),
                    fulfiller: Address::ZERO,
                    owner: from,
                },
            );
            state.listed.push(address);
            Ok(vec![])
        }
        LedgerCall::DepositMoreFunds { cart, amount } => {
            let record = live_cart(state, cart)?;
            require(record.owner == from, "Only the owner can deposit")?;
            require(!record.is_completed, "Cart is completed")?;
            require(!amount.is_zero(), "Amount must be greater than 0")?;
            let fulfiller = record.fulfiller;
            transfer_from(state, from, *cart, amount.scaled())?;
            live_cart(state, cart)?.funds += amount.scaled();
            Ok(vec![CartEvent::FundsDeposited {
                cart: *cart,
                sender: from,
                amount: *amount,
                fulfiller,
            }])
        }
        LedgerCall::ClaimDelivery { cart } => {
            let record = live_cart(state, cart)?;
            require(!record.is_completed, "Cart is completed")?;
            require(record.fulfiller.is_zero(), "Cart already claimed")?;
            record.fulfiller = from;
            Ok(vec![CartEvent::DeliveryClaimed {
                cart: *cart,
                fulfiller: from,
                owner: record.owner,
            }])
        }
        LedgerCall::ForfeitDelivery { cart } => {
            let record = live_cart(state, cart)?;
            require(!record.is_completed, "Cart is completed")?;
            require(record.fulfiller == from, "Only the fulfiller can forfeit")?;
            record.fulfiller = Address::ZERO;
            Ok(vec![CartEvent::DeliveryForfeited {
                cart: *cart,
                fulfiller: from,
                owner: record.owner,
            }])
        }
        LedgerCall::DeleteItems { cart, items } => {
            let record = live_cart(state, cart)?;
            require(record.owner == from, "Only the owner can delete items")?;
            require(!record.is_completed, "Cart is completed")?;
            require(
                record.fulfiller.is_zero() || record.fulfiller == from,
                "Cart is being fulfilled",
            )?;
            require(!items.is_empty(), "No items given")?;
            require(
                items.iter().all(|i| record.items.contains(i)),
                "Item not in cart",
            )?;
            record.items.retain(|i| !items.contains(i));
            Ok(vec![])
        }
        LedgerCall::CloseSuccessDelivery { cart } => {
            let record = live_cart(state, cart)?;
            require(record.owner == from, "Only the owner can close")?;
            require(!record.is_completed, "Cart is completed")?;
            require(!record.fulfiller.is_zero(), "Cart has no fulfiller")?;
            let (owner, fulfiller, funds) = (record.owner, record.fulfiller, record.funds);
            record.funds = 0;
            record.is_completed = true;
            *state.balances.entry(fulfiller).or_default() += funds;
            Ok(vec![CartEvent::FundsWithdrawn {
                cart: *cart,
                owner,
                fulfiller,
                amount: Amount::from_scaled(funds),
            }])
        }
        LedgerCall::WithdrawAndDestroy { cart } => {
            let record = live_cart(state, cart)?;
            require(record.owner == from, "Only the owner can withdraw")?;
            require(!record.is_completed, "Cart is completed")?;
            require(record.fulfiller.is_zero(), "Cart is being fulfilled")?;
            let funds = record.funds;
            state.carts.remove(cart);
            state.listed.retain(|a| a != cart);
            *state.balances.entry(from).or_default() += funds;
            Ok(vec![CartEvent::FundsWithdrawn {
                cart: *cart,
                owner: from,
                fulfiller: Address::ZERO,
                amount: Amount::from_scaled(funds),
            }])
        }
    }
}

// ─────────────────────────────────────────────────────────
// Gateway
// ─────────────────────────────────────────────────────────

impl LedgerGateway for InMemoryLedger {
    async fn submit(&self, from: Address, call: LedgerCall) -> Result<TxReceipt> {
        let kind = call.kind();
        let mut state = self.lock();
        if state.reject_next.remove(&kind) {
            return Err(CartError::SubmissionRejected(format!(
                "{kind} declined by signer"
            )));
        }

        state.next_tx += 1;
        let tx_hash = format!("0x{:064x}", state.next_tx);
        *state.submissions.entry(kind).or_default() += 1;
        state.journal.push(format!("submit:{kind}"));

        let outcome = if state.revert_next.remove(&kind) {
            Err(format!("{kind} reverted"))
        } else {
            // Execute against a scratch copy so a revert leaves no partial writes.
            let mut scratch = state.clone_for_dry_run();
            match execute(&mut scratch, self.contracts, from, &call) {
                Ok(events) => {
                    state.balances = scratch.balances;
                    state.allowances = scratch.allowances;
                    state.carts = scratch.carts;
                    state.listed = scratch.listed;
                    state.next_cart = scratch.next_cart;
                    Ok(events)
                }
                Err(reason) => Err(reason),
            }
        };

        let block_number = state.next_tx;
        state.outcomes.insert(
            tx_hash.clone(),
            outcome.map(|events| Confirmation {
                tx_hash: tx_hash.clone(),
                block_number: Some(block_number),
                events,
            }),
        );

        Ok(TxReceipt {
            tx_hash,
            kind,
            target: call.target(&self.contracts),
        })
    }

    async fn await_confirmation(&self, receipt: &TxReceipt) -> Result<Confirmation> {
        let mut open = self.confirmations_open.subscribe();
        // The sender lives as long as `self`, so this only errs on teardown.
        let _ = open.wait_for(|open| *open).await;

        let mut state = self.lock();
        state.journal.push(format!("confirm:{}", receipt.kind));
        match state.outcomes.get(&receipt.tx_hash) {
            Some(Ok(confirmation)) => Ok(confirmation.clone()),
            Some(Err(reason)) => Err(CartError::Reverted {
                tx_hash: receipt.tx_hash.clone(),
                reason: reason.clone(),
            }),
            None => Err(CartError::ReadUnavailable(format!(
                "unknown transaction {}",
                receipt.tx_hash
            ))),
        }
    }

    async fn cart_addresses(&self) -> Result<Vec<Address>> {
        let mut state = self.lock();
        if state.reads_unavailable {
            return Err(CartError::ReadUnavailable("node unreachable".into()));
        }
        state.address_reads += 1;
        let listed = state.listed.clone();
        if let Some(cart) = state.destroy_after_listing.take() {
            state.carts.remove(&cart);
            state.listed.retain(|a| *a != cart);
        }
        Ok(listed)
    }

    async fn read_cart(&self, cart: Address) -> Result<RawCartInfo> {
        let state = self.lock();
        if state.reads_unavailable {
            return Err(CartError::ReadUnavailable("node unreachable".into()));
        }
        state
            .carts
            .get(&cart)
            .map(CartRecord::info)
            .ok_or_else(|| CartError::ReadUnavailable(format!("no cart at {cart}")))
    }
}
