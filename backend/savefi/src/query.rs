//! Plan query service backed by the MultiBaas REST API.
//!
//! Plan state comes from three read-only contract method calls; history
//! comes from one arbitrary event query covering the three plan events.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::errors::{Result, SaveFiError};
use crate::ledger::{RawEvent, DEPOSITED_SIGNATURE, PLAN_STARTED_SIGNATURE, WITHDRAWN_SIGNATURE};
use crate::plan::Plan;
use crate::primitives::Address;
use crate::units;

/// Read access to an account's plan and its history.
#[async_trait]
pub trait PlanQuery: Send + Sync {
    async fn fetch_plan(&self, account: &Address) -> Result<Plan>;

    /// Raw event rows, newest first.
    async fn fetch_history(&self, account: &Address) -> Result<Vec<RawEvent>>;
}

// ─────────────────────────────────────────────────────────
// Response shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    result: Option<T>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MethodCallResult {
    output: Value,
}

#[derive(Debug, Deserialize)]
struct QueryResult {
    rows: Vec<RawEvent>,
}

#[derive(Debug, Clone)]
pub struct MultiBaasClient {
    client: Client,
    base_url: String,
    api_key: String,
    chain: String,
    alias: String,
    label: String,
    token_decimals: u32,
    reward_decimals: u32,
}

impl MultiBaasClient {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        chain: impl Into<String>,
        alias: impl Into<String>,
        label: impl Into<String>,
        token_decimals: u32,
        reward_decimals: u32,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            chain: chain.into(),
            alias: alias.into(),
            label: label.into(),
            token_decimals,
            reward_decimals,
        }
    }

    async fn post<T: serde::de::DeserializeOwned>(&self, url: &str, body: &Value) -> Result<T> {
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| SaveFiError::Network(format!("indexing API unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SaveFiError::Network(format!(
                "indexing API responded with status {status}: {text}"
            )));
        }

        let envelope: ApiEnvelope<T> = response
            .json()
            .await
            .map_err(|e| SaveFiError::MalformedResponse(format!("indexing API body: {e}")))?;
        envelope.result.ok_or_else(|| {
            SaveFiError::MalformedResponse(format!(
                "indexing API returned no result: {}",
                envelope.message.unwrap_or_default()
            ))
        })
    }

    async fn call_method(&self, method: &str, account: &Address) -> Result<Value> {
        let url = format!(
            "{}/api/v0/chains/{}/addresses/{}/contracts/{}/methods/{}",
            self.base_url, self.chain, self.alias, self.label, method
        );
        debug!("Calling {method} for {account}");
        let result: MethodCallResult = self.post(&url, &json!({ "args": [account] })).await?;
        Ok(result.output)
    }
}

#[async_trait]
impl PlanQuery for MultiBaasClient {
    async fn fetch_plan(&self, account: &Address) -> Result<Plan> {
        let (plan, total_deposited, accrued) = tokio::try_join!(
            self.call_method("getDepositPlan", account),
            self.call_method("getUserTotalDepositedAmount", account),
            self.call_method("getUserTotalSaveTokenAmount", account),
        )?;

        Ok(Plan {
            is_started: bool_field(&plan, "isStarted")?,
            is_withdrawn: bool_field(&plan, "isWithdrawn")?,
            amount_per_deposit: units::from_base_units(
                uint_value(field(&plan, "amountPerDeposit")?)?,
                self.token_decimals,
            )?,
            deposit_end_time: timestamp_value(field(&plan, "depositEndTime")?)?,
            next_deposit_deadline: timestamp_value(field(&plan, "nextDepositDeadline")?)?,
            total_deposited: units::from_base_units(uint_value(&total_deposited)?, self.token_decimals)?,
            accrued_reward_token: units::from_base_units(uint_value(&accrued)?, self.reward_decimals)?,
        })
    }

    async fn fetch_history(&self, account: &Address) -> Result<Vec<RawEvent>> {
        let url = format!("{}/api/v0/queries", self.base_url);
        let result: QueryResult = self.post(&url, &history_query(account)).await?;
        debug!("Fetched {} history rows for {account}", result.rows.len());
        Ok(result.rows)
    }
}

/// Arbitrary event query selecting the three plan events for `account`.
pub fn history_query(account: &Address) -> Value {
    let events: Vec<Value> = [
        (PLAN_STARTED_SIGNATURE, 2),
        (DEPOSITED_SIGNATURE, 1),
        (WITHDRAWN_SIGNATURE, 1),
    ]
    .into_iter()
    .map(|(signature, amount_index)| event_filter(account, signature, amount_index))
    .collect();

    json!({
        "order": "DESC",
        "orderBy": "triggered_at",
        "events": events,
    })
}

fn event_filter(account: &Address, signature: &str, amount_index: u32) -> Value {
    json!({
        "eventName": signature,
        "filter": {
            "rule": "and",
            "children": [{
                "fieldType": "input",
                "inputIndex": 0,
                "operator": "Equal",
                "value": account.as_str(),
            }],
        },
        "select": [
            { "name": "user", "type": "input", "alias": "", "inputIndex": 0 },
            { "name": "amount", "type": "input", "alias": "", "inputIndex": amount_index },
            { "name": "triggered_at", "type": "triggered_at", "alias": "" },
            { "name": "tx_hash", "type": "tx_hash", "alias": "" },
            { "name": "event_signature", "type": "event_signature", "alias": "" },
        ],
    })
}

fn field<'a>(output: &'a Value, key: &str) -> Result<&'a Value> {
    output
        .get(key)
        .ok_or_else(|| SaveFiError::MalformedResponse(format!("plan output missing {key}")))
}

fn bool_field(output: &Value, key: &str) -> Result<bool> {
    field(output, key)?
        .as_bool()
        .ok_or_else(|| SaveFiError::MalformedResponse(format!("plan field {key} is not a bool")))
}

fn uint_value(value: &Value) -> Result<u128> {
    match value {
        Value::String(s) => units::parse_base_units(s),
        Value::Number(n) => n
            .as_u64()
            .map(u128::from)
            .ok_or_else(|| SaveFiError::MalformedResponse(format!("not an unsigned integer: {n}"))),
        other => Err(SaveFiError::MalformedResponse(format!(
            "not an unsigned integer: {other}"
        ))),
    }
}

fn timestamp_value(value: &Value) -> Result<DateTime<Utc>> {
    let secs = i64::try_from(uint_value(value)?)
        .map_err(|_| SaveFiError::MalformedResponse(format!("timestamp out of range: {value}")))?;
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| SaveFiError::MalformedResponse(format!("invalid timestamp: {secs}")))
}
