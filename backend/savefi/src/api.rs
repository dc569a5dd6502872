//! Axum REST API handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::advisor::Advisor;
use crate::dashboard::{Dashboard, DashboardView, HistoryLine};
use crate::errors::{Result, SaveFiError};
use crate::extractor::{self, ExtractedPlanProposal, PlanExtractor};
use crate::llm::ChatMessage;
use crate::orchestrator::{ActionCall, SessionContext, TransactionOrchestrator};
use crate::plan::{derive_phase, Plan, PlanAction};
use crate::primitives::Address;
use crate::session::{ActionStatus, Session};

#[derive(Clone)]
pub struct ApiState {
    pub session: Arc<Session>,
    pub orchestrator: Arc<TransactionOrchestrator>,
    pub dashboard: Arc<Dashboard>,
    pub advisor: Arc<Advisor>,
    pub extractor: Arc<PlanExtractor>,
}

// ─────────────────────────────────────────────────────────
// Request / response shapes
// ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct TranscriptRequest {
    pub messages: Vec<ChatMessage>,
}

#[derive(Serialize)]
pub struct ChatResponse {
    pub message: ChatMessage,
}

#[derive(Serialize)]
pub struct HistoryResponse {
    pub account: Address,
    pub count: usize,
    pub history: Vec<HistoryLine>,
}

#[derive(Serialize)]
pub struct LaunchResponse {
    pub id: u64,
    pub action: PlanAction,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

fn status_for(err: &SaveFiError) -> StatusCode {
    match err {
        SaveFiError::Validation(_) | SaveFiError::Extraction { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        SaveFiError::Busy => StatusCode::CONFLICT,
        SaveFiError::WalletRejection(_) | SaveFiError::ContractRevert { .. } => StatusCode::BAD_REQUEST,
        SaveFiError::Network(_)
        | SaveFiError::Http(_)
        | SaveFiError::MalformedResponse(_)
        | SaveFiError::Json(_) => StatusCode::BAD_GATEWAY,
        SaveFiError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: SaveFiError) -> Response {
    let status = status_for(&err);
    if status.is_server_error() {
        warn!("Request failed: {err}");
    }
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
            kind: err.kind(),
            raw: err.raw_text().map(String::from),
        }),
    )
        .into_response()
}

fn respond<T: Serialize>(status: StatusCode, result: Result<T>) -> Response {
    match result {
        Ok(body) => (status, Json(body)).into_response(),
        Err(e) => error_response(e),
    }
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `GET /chat/greeting`
pub async fn greeting(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    Json(ChatResponse {
        message: state.advisor.greeting(),
    })
}

/// `POST /chat`
///
/// Returns the advisor's next message for the transcript.
pub async fn chat(State(state): State<Arc<ApiState>>, Json(req): Json<TranscriptRequest>) -> Response {
    let result = state
        .advisor
        .reply(&req.messages)
        .await
        .map(|message| ChatResponse { message });
    respond(StatusCode::OK, result)
}

/// `POST /plan/proposal`
///
/// Extracts a plan proposal from the transcript. Unparseable completions come
/// back as `422` with the raw text attached.
pub async fn propose_plan(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<TranscriptRequest>,
) -> Response {
    respond(StatusCode::OK, state.extractor.extract(&req.messages).await)
}

/// `GET /accounts/:address/dashboard`
pub async fn get_dashboard(State(state): State<Arc<ApiState>>, Path(address): Path<String>) -> Response {
    let result: Result<DashboardView> = async {
        let account = Address::parse(&address)?;
        state.dashboard.load(&account, Utc::now()).await
    }
    .await;
    respond(StatusCode::OK, result)
}

/// `GET /accounts/:address/history`
pub async fn get_history(State(state): State<Arc<ApiState>>, Path(address): Path<String>) -> Response {
    let result: Result<HistoryResponse> = async {
        let account = Address::parse(&address)?;
        let history = state.dashboard.history(&account).await?;
        Ok(HistoryResponse {
            account,
            count: history.len(),
            history,
        })
    }
    .await;
    respond(StatusCode::OK, result)
}

/// `POST /actions/start-plan`
pub async fn start_plan(
    State(state): State<Arc<ApiState>>,
    Json(proposal): Json<ExtractedPlanProposal>,
) -> Response {
    let result = launch(&state, |ctx, _plan| {
        extractor::validate(
            proposal.amount_per_deposit,
            proposal.total_deposit_days,
            ctx.token_decimals,
        )?;
        ActionCall::start_plan(ctx, &proposal)
    })
    .await;
    respond(StatusCode::ACCEPTED, result)
}

/// `POST /actions/deposit`
pub async fn deposit(State(state): State<Arc<ApiState>>) -> Response {
    let result = launch(&state, |ctx, plan| {
        ActionCall::deposit(ctx, plan.amount_per_deposit)
    })
    .await;
    respond(StatusCode::ACCEPTED, result)
}

/// `POST /actions/withdraw`
pub async fn withdraw(State(state): State<Arc<ApiState>>) -> Response {
    let result = launch(&state, |ctx, _plan| Ok(ActionCall::withdraw(ctx))).await;
    respond(StatusCode::ACCEPTED, result)
}

/// `POST /actions/early-withdraw`
pub async fn early_withdraw(State(state): State<Arc<ApiState>>) -> Response {
    let result = launch(&state, |ctx, _plan| Ok(ActionCall::early_withdraw(ctx))).await;
    respond(StatusCode::ACCEPTED, result)
}

/// `GET /actions/current`
pub async fn current_action(State(state): State<Arc<ApiState>>) -> Response {
    match state.session.status() {
        Some(status) => (StatusCode::OK, Json::<ActionStatus>(status)).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

/// `DELETE /actions/current`
///
/// Stops waiting on the current action and frees the session for a retry.
pub async fn dismiss_action(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    state.session.dismiss();
    StatusCode::NO_CONTENT
}

/// Build an action from a fresh plan snapshot, check it against the plan's
/// phase, then hand it to the session. Busy sessions are rejected before
/// touching the chain.
async fn launch<F>(state: &ApiState, build: F) -> Result<LaunchResponse>
where
    F: FnOnce(&SessionContext, &Plan) -> Result<ActionCall>,
{
    if state.session.is_busy() {
        return Err(SaveFiError::Busy);
    }

    let ctx = state.session.context();
    let plan = state.dashboard.plan(&ctx.account).await?;
    let call = build(ctx, &plan)?;

    let phase = derive_phase(&plan, Utc::now());
    if !phase.actions().contains(&call.action) {
        return Err(SaveFiError::Validation(format!(
            "{:?} is not available while the plan is {:?}",
            call.action, phase
        )));
    }

    let action = call.action;
    let id = state
        .session
        .launch(Arc::clone(&state.orchestrator), call)?;
    Ok(LaunchResponse { id, action })
}
