//! SaveFi plan client entry point.
//!
//! Wires the chain, indexing API and chat-completion clients together and
//! serves the dashboard, advisor chat and plan actions over a small Axum API.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use savefi::advisor::Advisor;
use savefi::api::{self, ApiState};
use savefi::chain::{ChainClient, JsonRpcChainClient};
use savefi::config::Config;
use savefi::dashboard::Dashboard;
use savefi::extractor::PlanExtractor;
use savefi::llm::OpenAiClient;
use savefi::orchestrator::{SessionContext, TransactionOrchestrator};
use savefi::prompts::Prompts;
use savefi::query::MultiBaasClient;
use savefi::session::Session;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;
    let prompts = Prompts::load(
        config.advisor_prompt_path.as_deref(),
        config.extraction_prompt_path.as_deref(),
    )?;

    // One HTTP client shared by the RPC, indexing API and completion calls.
    let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

    // ─── Chain ────────────────────────────────────────────
    let chain = Arc::new(JsonRpcChainClient::new(
        client.clone(),
        config.rpc_url.clone(),
        config.confirmation_poll,
    ));
    match (config.chain_id, chain.chain_id().await) {
        (Some(expected), Ok(actual)) if expected != actual => {
            anyhow::bail!("RPC endpoint is on chain {actual}, expected {expected}");
        }
        (_, Ok(actual)) => info!("Connected to chain {actual} via {}", config.rpc_url),
        (Some(_), Err(e)) => return Err(e.into()),
        (None, Err(e)) => warn!("Could not read chain id: {e}"),
    }

    // ─── Services ─────────────────────────────────────────
    let query = Arc::new(MultiBaasClient::new(
        client.clone(),
        config.indexer_url.clone(),
        config.indexer_api_key.clone(),
        config.indexer_chain.clone(),
        config.savings_alias.clone(),
        config.savings_label.clone(),
        config.token_decimals,
        config.reward_decimals,
    ));
    let llm = Arc::new(OpenAiClient::new(
        client,
        config.openai_base_url.clone(),
        config.openai_api_key.clone(),
        config.openai_model.clone(),
    ));

    let ctx = SessionContext {
        account: config.account.clone(),
        token: config.token_address.clone(),
        savings: config.savings_address.clone(),
        plan_id: config.plan_id,
        token_decimals: config.token_decimals,
    };

    let api_state = Arc::new(ApiState {
        session: Arc::new(Session::new(ctx)),
        orchestrator: Arc::new(TransactionOrchestrator::new(chain)),
        dashboard: Arc::new(Dashboard::new(
            query,
            config.token_decimals,
            config.explorer_url.clone(),
        )),
        advisor: Arc::new(Advisor::new(llm.clone(), prompts.advisor, prompts.greeting)),
        extractor: Arc::new(PlanExtractor::new(
            llm,
            prompts.extraction,
            config.token_decimals,
        )),
    });

    // ─── REST API ─────────────────────────────────────────
    let app = Router::new()
        .route("/health", get(api::health))
        .route("/chat/greeting", get(api::greeting))
        .route("/chat", post(api::chat))
        .route("/plan/proposal", post(api::propose_plan))
        .route("/accounts/:address/dashboard", get(api::get_dashboard))
        .route("/accounts/:address/history", get(api::get_history))
        .route("/actions/start-plan", post(api::start_plan))
        .route("/actions/deposit", post(api::deposit))
        .route("/actions/withdraw", post(api::withdraw))
        .route("/actions/early-withdraw", post(api::early_withdraw))
        .route(
            "/actions/current",
            get(api::current_action).delete(api::dismiss_action),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(api_state);

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for shutdown signal: {e}");
            return;
        }
        info!("Shutdown requested");
        signal.cancel();
    });

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr} for account {}", config.account);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}
