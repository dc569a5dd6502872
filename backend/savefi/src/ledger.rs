//! Savings contract events and the display ledger built from them.
//!
//! The indexing API returns one row per event, already merged across the
//! three event kinds and ordered newest first. [`build`] is the single place
//! those rows are turned into signed, scaled entries.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::primitives::TxRef;
use crate::units;

/// Event signatures queried for an account's history.
pub const PLAN_STARTED_SIGNATURE: &str =
    "DepositPlanStarted(address,address,uint256,uint256,uint256)";
pub const DEPOSITED_SIGNATURE: &str = "Deposited(address,uint256,uint256,bool)";
pub const WITHDRAWN_SIGNATURE: &str = "Withdrawn(address,uint256,bool)";

/// All recognised ledger event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerKind {
    /// `DepositPlanStarted(...)`: first deposit of a new plan.
    PlanStarted,
    /// `Deposited(...)`: a recurring deposit.
    Deposited,
    /// `Withdrawn(...)`: full or early withdrawal.
    Withdrawn,
    /// Anything we don't recognise.
    Other,
}

/// Direction of funds relative to the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sign {
    Credit,
    Debit,
    Neutral,
}

impl LedgerKind {
    /// Classify an event by the prefix of its signature.
    pub fn from_signature(signature: &str) -> Self {
        if signature.starts_with("DepositPlanStarted") {
            Self::PlanStarted
        } else if signature.starts_with("Deposited") {
            Self::Deposited
        } else if signature.starts_with("Withdrawn") {
            Self::Withdrawn
        } else {
            Self::Other
        }
    }

    pub fn sign(self) -> Sign {
        match self {
            Self::PlanStarted | Self::Deposited => Sign::Credit,
            Self::Withdrawn => Sign::Debit,
            Self::Other => Sign::Neutral,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::PlanStarted => "Started Plan",
            Self::Deposited => "Deposited",
            Self::Withdrawn => "Withdrawn",
            Self::Other => "Other",
        }
    }
}

impl Sign {
    pub fn marker(self) -> &'static str {
        match self {
            Self::Credit => "+",
            Self::Debit => "-",
            Self::Neutral => "",
        }
    }
}

/// One row of the indexing API's event query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(default)]
    pub user: Option<String>,
    /// Base-unit integer, rendered as a string or a JSON number.
    pub amount: Value,
    /// RFC 3339 string or Unix seconds.
    pub triggered_at: Value,
    pub tx_hash: String,
    pub event_signature: String,
}

/// A display-ready ledger line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub kind: LedgerKind,
    pub label: String,
    pub sign: Sign,
    pub signed_amount: Decimal,
    pub occurred_at: DateTime<Utc>,
    pub tx_ref: TxRef,
}

impl LedgerEntry {
    /// Unsigned amount prefixed with the sign marker, e.g. `-5`.
    pub fn display_amount(&self) -> String {
        format!("{}{}", self.sign.marker(), self.signed_amount.abs())
    }

    pub fn explorer_url(&self, explorer_base: &str) -> String {
        format!("{}/tx/{}", explorer_base.trim_end_matches('/'), self.tx_ref)
    }
}

/// Turn raw event rows into ledger entries, preserving their order.
///
/// Rows whose amount or timestamp cannot be decoded are skipped.
pub fn build(raw: &[RawEvent], decimals: u32) -> Vec<LedgerEntry> {
    raw.iter()
        .filter_map(|e| decode_single(e, decimals))
        .collect()
}

fn decode_single(raw: &RawEvent, decimals: u32) -> Option<LedgerEntry> {
    let kind = LedgerKind::from_signature(&raw.event_signature);
    let sign = kind.sign();

    let amount = match value_to_base_units(&raw.amount).and_then(|v| units::from_base_units(v, decimals).ok()) {
        Some(a) => a,
        None => {
            warn!("Skipping event {} with undecodable amount {}", raw.tx_hash, raw.amount);
            return None;
        }
    };

    let Some(occurred_at) = parse_timestamp(&raw.triggered_at) else {
        warn!(
            "Skipping event {} with undecodable timestamp {}",
            raw.tx_hash, raw.triggered_at
        );
        return None;
    };

    let signed_amount = match sign {
        Sign::Debit => -amount,
        Sign::Credit | Sign::Neutral => amount,
    };

    Some(LedgerEntry {
        kind,
        label: kind.label().to_string(),
        sign,
        signed_amount,
        occurred_at,
        tx_ref: TxRef(raw.tx_hash.clone()),
    })
}

fn value_to_base_units(value: &Value) -> Option<u128> {
    match value {
        Value::String(s) => units::parse_base_units(s).ok(),
        Value::Number(n) => n.as_u64().map(u128::from),
        _ => None,
    }
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
            .or_else(|| s.parse::<i64>().ok().and_then(|secs| Utc.timestamp_opt(secs, 0).single())),
        Value::Number(n) => n.as_i64().and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        _ => None,
    }
}
