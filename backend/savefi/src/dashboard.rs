//! Everything the dashboard shows for one account, assembled from a fresh
//! plan snapshot and history.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::errors::Result;
use crate::ledger::{self, LedgerEntry};
use crate::plan::{derive_phase, Plan, PlanAction, PlanPhase};
use crate::primitives::Address;
use crate::query::PlanQuery;

#[derive(Debug, Clone, Serialize)]
pub struct DashboardView {
    pub account: Address,
    pub plan: Plan,
    pub phase: PlanPhase,
    pub primary_action: Option<PlanAction>,
    pub actions: Vec<PlanAction>,
    pub cycle_start: DateTime<Utc>,
    pub remaining_days: i64,
    pub history: Vec<HistoryLine>,
}

/// A ledger entry plus its explorer link.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryLine {
    #[serde(flatten)]
    pub entry: LedgerEntry,
    pub display_amount: String,
    pub explorer_url: String,
}

pub struct Dashboard {
    query: Arc<dyn PlanQuery>,
    token_decimals: u32,
    explorer_url: String,
}

impl Dashboard {
    pub fn new(query: Arc<dyn PlanQuery>, token_decimals: u32, explorer_url: impl Into<String>) -> Self {
        Self {
            query,
            token_decimals,
            explorer_url: explorer_url.into(),
        }
    }

    /// Fetch plan and history concurrently and derive the view at `now`.
    pub async fn load(&self, account: &Address, now: DateTime<Utc>) -> Result<DashboardView> {
        let (plan, raw_history) = tokio::try_join!(
            self.query.fetch_plan(account),
            self.query.fetch_history(account),
        )?;

        let phase = derive_phase(&plan, now);
        debug!("Dashboard for {account}: phase {phase:?}, {} events", raw_history.len());

        Ok(DashboardView {
            account: account.clone(),
            phase,
            primary_action: phase.primary_action(),
            actions: phase.actions(),
            cycle_start: plan.cycle_start(),
            remaining_days: plan.remaining_days(now),
            history: self.lines(ledger::build(&raw_history, self.token_decimals)),
            plan,
        })
    }

    pub async fn plan(&self, account: &Address) -> Result<Plan> {
        self.query.fetch_plan(account).await
    }

    pub async fn history(&self, account: &Address) -> Result<Vec<HistoryLine>> {
        let raw = self.query.fetch_history(account).await?;
        Ok(self.lines(ledger::build(&raw, self.token_decimals)))
    }

    fn lines(&self, entries: Vec<LedgerEntry>) -> Vec<HistoryLine> {
        entries
            .into_iter()
            .map(|entry| HistoryLine {
                display_amount: entry.display_amount(),
                explorer_url: entry.explorer_url(&self.explorer_url),
                entry,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SaveFiError;
    use crate::ledger::{RawEvent, DEPOSITED_SIGNATURE, WITHDRAWN_SIGNATURE};
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use rust_decimal::Decimal;
    use serde_json::json;

    struct FixedQuery {
        plan: Option<Plan>,
        history: Vec<RawEvent>,
    }

    #[async_trait]
    impl PlanQuery for FixedQuery {
        async fn fetch_plan(&self, _account: &Address) -> Result<Plan> {
            self.plan
                .clone()
                .ok_or_else(|| SaveFiError::Network("indexing API unreachable".into()))
        }

        async fn fetch_history(&self, _account: &Address) -> Result<Vec<RawEvent>> {
            Ok(self.history.clone())
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 15, 0, 0, 0).unwrap()
    }

    fn account() -> Address {
        Address::parse(&format!("0x{}", "d".repeat(40))).unwrap()
    }

    fn raw(signature: &str, amount: &str, tx: &str) -> RawEvent {
        RawEvent {
            user: None,
            amount: json!(amount),
            triggered_at: json!("2025-06-01T00:00:00Z"),
            tx_hash: tx.to_string(),
            event_signature: signature.to_string(),
        }
    }

    #[tokio::test]
    async fn assembles_phase_actions_and_history() {
        let plan = Plan {
            is_started: true,
            is_withdrawn: false,
            amount_per_deposit: Decimal::new(100, 0),
            deposit_end_time: now() + Duration::days(100),
            next_deposit_deadline: now() + Duration::days(10),
            total_deposited: Decimal::new(500, 0),
            accrued_reward_token: Decimal::new(3, 0),
        };
        let query = FixedQuery {
            plan: Some(plan),
            history: vec![
                raw(WITHDRAWN_SIGNATURE, "5000000", "0x2"),
                raw(DEPOSITED_SIGNATURE, "100000000", "0x1"),
            ],
        };
        let dashboard = Dashboard::new(Arc::new(query), 6, "https://sepolia.etherscan.io");

        let view = dashboard.load(&account(), now()).await.unwrap();
        assert_eq!(view.phase, PlanPhase::DepositWindowOpen);
        assert_eq!(view.primary_action, Some(PlanAction::Deposit));
        assert_eq!(view.remaining_days, 100);
        assert_eq!(view.cycle_start, now() - Duration::days(20));
        assert_eq!(view.history.len(), 2);
        assert_eq!(view.history[0].display_amount, "-5");
        assert_eq!(view.history[1].display_amount, "+100");
        assert_eq!(
            view.history[1].explorer_url,
            "https://sepolia.etherscan.io/tx/0x1"
        );
    }

    #[tokio::test]
    async fn fetch_failure_is_not_reported_as_no_plan() {
        let query = FixedQuery {
            plan: None,
            history: vec![],
        };
        let dashboard = Dashboard::new(Arc::new(query), 6, "https://sepolia.etherscan.io");
        let err = dashboard.load(&account(), now()).await.unwrap_err();
        assert!(matches!(err, SaveFiError::Network(_)));
    }
}
