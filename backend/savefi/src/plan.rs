//! # Plan lifecycle
//!
//! A [`Plan`] is owned by the savings contract; this module only derives a
//! display phase from it. The phase is a pure function of the plan and the
//! current instant:
//!
//! ```text
//! NoPlan ──start──► DepositWindowNotYetOpen ◄──► DepositWindowOpen ──► Matured
//!                          (cycle_start = next_deposit_deadline − 30d)
//! ```
//!
//! Intervals are closed on the left: a deposit window opens exactly at
//! `cycle_start` and the plan matures exactly at `deposit_end_time`.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Length of one deposit cycle; the contract counts a month as 30 days.
pub const CYCLE_DAYS: i64 = 30;

/// Snapshot of an account's on-chain savings plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub is_started: bool,
    pub is_withdrawn: bool,
    /// Per-deposit amount in token units (not base units).
    pub amount_per_deposit: Decimal,
    pub deposit_end_time: DateTime<Utc>,
    pub next_deposit_deadline: DateTime<Utc>,
    pub total_deposited: Decimal,
    pub accrued_reward_token: Decimal,
}

/// Derived lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanPhase {
    NoPlan,
    Matured,
    DepositWindowOpen,
    DepositWindowNotYetOpen,
    Locked,
}

/// A chain-mutating action a user can take against their plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanAction {
    StartPlan,
    Deposit,
    Withdraw,
    /// Exit before maturity, forfeiting accrued reward tokens.
    EarlyWithdraw,
}

impl PlanPhase {
    /// The action the phase is built around, if any.
    pub fn primary_action(self) -> Option<PlanAction> {
        match self {
            Self::NoPlan => Some(PlanAction::StartPlan),
            Self::Matured => Some(PlanAction::Withdraw),
            Self::DepositWindowOpen => Some(PlanAction::Deposit),
            Self::DepositWindowNotYetOpen => None,
            Self::Locked => Some(PlanAction::EarlyWithdraw),
        }
    }

    /// Every action offered in this phase. A running plan that has not
    /// matured can always be exited early.
    pub fn actions(self) -> Vec<PlanAction> {
        let mut actions: Vec<PlanAction> = self.primary_action().into_iter().collect();
        let running = matches!(
            self,
            Self::DepositWindowOpen | Self::DepositWindowNotYetOpen | Self::Locked
        );
        if running && !actions.contains(&PlanAction::EarlyWithdraw) {
            actions.push(PlanAction::EarlyWithdraw);
        }
        actions
    }
}

impl Plan {
    /// Opening of the current deposit window.
    pub fn cycle_start(&self) -> DateTime<Utc> {
        self.next_deposit_deadline - Duration::days(CYCLE_DAYS)
    }

    /// Whole days until maturity, never negative.
    pub fn remaining_days(&self, now: DateTime<Utc>) -> i64 {
        (self.deposit_end_time - now).num_days().max(0)
    }
}

/// Map a plan and the current instant onto its lifecycle phase.
///
/// Malformed plans (`deposit_end_time < next_deposit_deadline`) still yield
/// a phase, but which one is unspecified.
pub fn derive_phase(plan: &Plan, now: DateTime<Utc>) -> PlanPhase {
    if !plan.is_started {
        return PlanPhase::NoPlan;
    }
    if now >= plan.deposit_end_time {
        return PlanPhase::Matured;
    }

    let cycle_start = plan.cycle_start();
    if cycle_start <= now && now < plan.deposit_end_time {
        PlanPhase::DepositWindowOpen
    } else if now < cycle_start {
        PlanPhase::DepositWindowNotYetOpen
    } else {
        PlanPhase::Locked
    }
}
