//! Two-phase "approve, then act" sequencing for every value-moving call.
//!
//! ```text
//! Idle ──submit_allowance──► AllowancePending ──confirm_allowance──► AllowanceConfirmed
//!                                                                        │
//!   Done ◄──confirm_dependent── ActionPending ◄──submit_dependent────────┘
//!
//! any failing step ──► Failed
//! ```
//!
//! The amount is parsed and pinned when the sequence is created and is the
//! only value the dependent call can be built from. Two sequences running at
//! once each own their own pinned amount.

use std::fmt;
use std::mem;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{CartError, Result};
use crate::gateway::{self, Confirmation, LedgerCall, LedgerGateway, TxReceipt};
use crate::types::{Address, Amount};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FundingPhase {
    Idle,
    AllowancePending { receipt: TxReceipt },
    AllowanceConfirmed { approval: Confirmation },
    ActionPending { approval: Confirmation, receipt: TxReceipt },
    Done,
    Failed,
}

impl FundingPhase {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AllowancePending { .. } => "allowance_pending",
            Self::AllowanceConfirmed { .. } => "allowance_confirmed",
            Self::ActionPending { .. } => "action_pending",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for FundingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Both confirmations of a completed sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundedOutcome {
    pub amount: Amount,
    pub approval: Confirmation,
    pub action: Confirmation,
}

pub struct FundedSequence {
    from: Address,
    spender: Address,
    amount: Amount,
    phase: FundingPhase,
}

impl FundedSequence {
    /// Validate `raw_amount` and pin it. Nothing touches the network here.
    pub fn begin(from: Address, spender: Address, raw_amount: &str) -> Result<Self> {
        Self::with_amount(from, spender, Amount::parse(raw_amount)?)
    }

    /// Pin an already parsed amount. Zero is refused like in [`Amount::parse`].
    pub fn with_amount(from: Address, spender: Address, amount: Amount) -> Result<Self> {
        if amount.is_zero() {
            return Err(CartError::amount("Amount must be greater than 0"));
        }
        Ok(Self {
            from,
            spender,
            amount,
            phase: FundingPhase::Idle,
        })
    }

    pub fn phase(&self) -> &FundingPhase {
        &self.phase
    }

    fn out_of_order(&self, step: &str) -> CartError {
        CartError::Sequence(format!("cannot {step} while {}", self.phase))
    }

    /// `Idle → AllowancePending`
    pub async fn submit_allowance<G: LedgerGateway>(&mut self, gateway: &G) -> Result<()> {
        if self.phase != FundingPhase::Idle {
            return Err(self.out_of_order("submit allowance"));
        }
        let call = LedgerCall::Approve {
            spender: self.spender,
            amount: self.amount,
        };
        match gateway.submit(self.from, call).await {
            Ok(receipt) => {
                debug!(
                    "Allowance of {} for {} submitted: {}",
                    self.amount, self.spender, receipt.tx_hash
                );
                self.phase = FundingPhase::AllowancePending { receipt };
                Ok(())
            }
            Err(e) => Err(self.fail_allowance(e)),
        }
    }

    /// `AllowancePending → AllowanceConfirmed`
    pub async fn confirm_allowance<G: LedgerGateway>(
        &mut self,
        gateway: &G,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let FundingPhase::AllowancePending { receipt } = &self.phase else {
            return Err(self.out_of_order("confirm allowance"));
        };
        match gateway::confirm(gateway, receipt, timeout, cancel).await {
            Ok(approval) => {
                info!("Allowance of {} for {} confirmed", self.amount, self.spender);
                self.phase = FundingPhase::AllowanceConfirmed { approval };
                Ok(())
            }
            Err(e) => Err(self.fail_allowance(e)),
        }
    }

    /// `AllowanceConfirmed → ActionPending`
    ///
    /// `dependent` receives the pinned amount and builds the call from it.
    pub async fn submit_dependent<G, F>(&mut self, gateway: &G, dependent: F) -> Result<()>
    where
        G: LedgerGateway,
        F: FnOnce(Amount) -> LedgerCall + Send,
    {
        if !matches!(self.phase, FundingPhase::AllowanceConfirmed { .. }) {
            return Err(self.out_of_order("submit dependent action"));
        }
        let call = dependent(self.amount);
        match gateway.submit(self.from, call).await {
            Ok(receipt) => {
                let FundingPhase::AllowanceConfirmed { approval } =
                    mem::replace(&mut self.phase, FundingPhase::Failed)
                else {
                    return Err(self.out_of_order("submit dependent action"));
                };
                debug!("Dependent {} submitted: {}", receipt.kind, receipt.tx_hash);
                self.phase = FundingPhase::ActionPending { approval, receipt };
                Ok(())
            }
            Err(e) => Err(self.fail_dependent(e)),
        }
    }

    /// `ActionPending → Done`
    pub async fn confirm_dependent<G: LedgerGateway>(
        &mut self,
        gateway: &G,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<FundedOutcome> {
        let FundingPhase::ActionPending { receipt, .. } = &self.phase else {
            return Err(self.out_of_order("confirm dependent action"));
        };
        match gateway::confirm(gateway, receipt, timeout, cancel).await {
            Ok(action) => {
                let FundingPhase::ActionPending { approval, .. } =
                    mem::replace(&mut self.phase, FundingPhase::Done)
                else {
                    return Err(self.out_of_order("confirm dependent action"));
                };
                Ok(FundedOutcome {
                    amount: self.amount,
                    approval,
                    action,
                })
            }
            Err(e) => Err(self.fail_dependent(e)),
        }
    }

    fn fail_allowance(&mut self, cause: CartError) -> CartError {
        warn!("Allowance of {} for {} failed: {cause}", self.amount, self.spender);
        self.phase = FundingPhase::Failed;
        CartError::AllowanceRejected(Box::new(cause))
    }

    fn fail_dependent(&mut self, cause: CartError) -> CartError {
        // The allowance stays granted on the ledger; a retry re-approves the
        // same amount, which overwrites rather than stacks.
        warn!(
            "Dependent action failed after allowance of {} for {} was granted: {cause}",
            self.amount, self.spender
        );
        self.phase = FundingPhase::Failed;
        CartError::DependentActionFailed(Box::new(cause))
    }
}

impl FundedSequence {
    /// Drive a fresh sequence through every phase.
    pub async fn run<G, F>(
        mut self,
        gateway: &G,
        timeout: Duration,
        cancel: &CancellationToken,
        dependent: F,
    ) -> Result<FundedOutcome>
    where
        G: LedgerGateway,
        F: FnOnce(Amount) -> LedgerCall + Send,
    {
        self.submit_allowance(gateway).await?;
        self.confirm_allowance(gateway, timeout, cancel).await?;
        self.submit_dependent(gateway, dependent).await?;
        self.confirm_dependent(gateway, timeout, cancel).await
    }
}

/// Run a full funded sequence: approve `spender` for `raw_amount`, wait for
/// it, then submit and confirm `dependent(amount)`.
pub async fn run_funded_action<G, F>(
    gateway: &G,
    from: Address,
    spender: Address,
    raw_amount: &str,
    timeout: Duration,
    cancel: &CancellationToken,
    dependent: F,
) -> Result<FundedOutcome>
where
    G: LedgerGateway,
    F: FnOnce(Amount) -> LedgerCall + Send,
{
    FundedSequence::begin(from, spender, raw_amount)?
        .run(gateway, timeout, cancel, dependent)
        .await
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
