//! Approve-then-act transaction sequencing.
//!
//! ```text
//! read allowance ──(allowance >= required)──────────────────────┐
//!        └──(allowance < required)──► approve(max) ──► confirm ──┤
//!                                                               ▼
//!                                   submit action ──► confirm ──► done
//! ```
//!
//! Approval and action are independent transactions. A retry after an
//! interruption starts again from the allowance read, so an approval that
//! already landed is never re-sent.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info};

use crate::abi::{AbiValue, ContractCall};
use crate::chain::{ChainClient, Receipt};
use crate::errors::Result;
use crate::extractor::ExtractedPlanProposal;
use crate::plan::PlanAction;
use crate::primitives::{Address, TxRef};
use crate::units;

/// Who is acting and against which contracts. Passed into every call rather
/// than held as ambient state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub account: Address,
    /// ERC-20 token whose allowance is checked and approved.
    pub token: Address,
    /// Savings contract: the approval spender and the target of every action.
    pub savings: Address,
    pub plan_id: u128,
    pub token_decimals: u32,
}

/// A savings-contract call together with the allowance it needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionCall {
    pub action: PlanAction,
    pub call: ContractCall,
    /// Base units the savings contract will pull from the account.
    pub required_amount: u128,
}

impl ActionCall {
    /// `startDeposit(amountPerDeposit, totalDepositDays)`; pulls the first deposit.
    pub fn start_plan(ctx: &SessionContext, proposal: &ExtractedPlanProposal) -> Result<Self> {
        let amount = units::to_base_units(proposal.amount_per_deposit, ctx.token_decimals)?;
        Ok(Self {
            action: PlanAction::StartPlan,
            call: ContractCall::new(
                "startDeposit(uint256,uint256)",
                vec![
                    AbiValue::Uint(amount),
                    AbiValue::Uint(u128::from(proposal.total_deposit_days)),
                ],
            ),
            required_amount: amount,
        })
    }

    /// `deposit(planId)`; pulls one per-deposit amount.
    pub fn deposit(ctx: &SessionContext, amount_per_deposit: rust_decimal::Decimal) -> Result<Self> {
        Ok(Self {
            action: PlanAction::Deposit,
            call: ContractCall::new("deposit(uint256)", vec![AbiValue::Uint(ctx.plan_id)]),
            required_amount: units::to_base_units(amount_per_deposit, ctx.token_decimals)?,
        })
    }

    pub fn withdraw(ctx: &SessionContext) -> Self {
        Self {
            action: PlanAction::Withdraw,
            call: ContractCall::new("withdraw(uint256)", vec![AbiValue::Uint(ctx.plan_id)]),
            required_amount: 0,
        }
    }

    pub fn early_withdraw(ctx: &SessionContext) -> Self {
        Self {
            action: PlanAction::EarlyWithdraw,
            call: ContractCall::new("earlyWithdraw(uint256)", vec![AbiValue::Uint(ctx.plan_id)]),
            required_amount: 0,
        }
    }
}

/// Progress of one orchestrated action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum TxProgress {
    CheckingAllowance,
    ApprovalPending { tx: TxRef },
    ApprovalConfirmed { tx: TxRef },
    /// Waiting for the wallet to sign the action.
    AwaitingSignature,
    /// Action broadcast, waiting for confirmation.
    Pending { tx: TxRef },
    Confirmed { receipt: Receipt },
    Failed { kind: String, message: String },
}

impl TxProgress {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed { .. } | Self::Failed { .. })
    }
}

/// The sole mutator of on-chain state from this client.
pub struct TransactionOrchestrator {
    chain: Arc<dyn ChainClient>,
}

impl TransactionOrchestrator {
    pub fn new(chain: Arc<dyn ChainClient>) -> Self {
        Self { chain }
    }

    /// Run `action`, approving first when the allowance is short of its
    /// required amount. Emits progress on `progress` and ends with exactly
    /// one terminal event.
    pub async fn execute(
        &self,
        ctx: &SessionContext,
        action: &ActionCall,
        progress: &UnboundedSender<TxProgress>,
    ) -> Result<Receipt> {
        info!(
            "Executing {} for {} (requires {})",
            action.call.name(),
            ctx.account,
            action.required_amount
        );
        let result = self.run(ctx, action, progress).await;

        match &result {
            Ok(receipt) => {
                info!("{} confirmed: {}", action.call.name(), receipt.tx);
                emit(progress, TxProgress::Confirmed {
                    receipt: receipt.clone(),
                });
            }
            Err(e) => {
                error!("{} failed: {e}", action.call.name());
                emit(progress, TxProgress::Failed {
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                });
            }
        }
        result
    }

    async fn run(
        &self,
        ctx: &SessionContext,
        action: &ActionCall,
        progress: &UnboundedSender<TxProgress>,
    ) -> Result<Receipt> {
        let required_amount = action.required_amount;
        emit(progress, TxProgress::CheckingAllowance);
        let allowance = self
            .chain
            .read_allowance(&ctx.token, &ctx.account, &ctx.savings)
            .await?;

        if allowance < required_amount {
            info!("Allowance {allowance} below {required_amount}; approving");
            let approval = self
                .chain
                .send_approve(&ctx.token, &ctx.account, &ctx.savings)
                .await?;
            emit(progress, TxProgress::ApprovalPending {
                tx: approval.clone(),
            });
            self.chain.await_confirmation(&approval).await?;
            emit(progress, TxProgress::ApprovalConfirmed { tx: approval });
        }

        emit(progress, TxProgress::AwaitingSignature);
        let tx = self
            .chain
            .send_contract_action(&ctx.account, &ctx.savings, &action.call)
            .await?;
        emit(progress, TxProgress::Pending { tx: tx.clone() });
        self.chain.await_confirmation(&tx).await
    }
}

fn emit(progress: &UnboundedSender<TxProgress>, event: TxProgress) {
    // A dropped receiver means nobody is watching; the action still runs.
    let _ = progress.send(event);
}
