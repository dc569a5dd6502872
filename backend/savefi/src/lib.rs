//! SaveFi plan client.
//!
//! Derives what a savings plan allows at a given instant, runs chain-mutating
//! plan actions through an approve-then-act flow, reads plan state and
//! history from the indexing API, and turns an advisor conversation into a
//! validated plan proposal. `api` exposes all of it over HTTP.

pub mod abi;
pub mod advisor;
pub mod api;
pub mod chain;
pub mod config;
pub mod dashboard;
pub mod errors;
pub mod extractor;
pub mod ledger;
pub mod llm;
pub mod orchestrator;
pub mod plan;
pub mod primitives;
pub mod prompts;
pub mod query;
pub mod session;
pub mod units;

pub use errors::{Result, SaveFiError};
pub use plan::{derive_phase, Plan, PlanAction, PlanPhase};
pub use primitives::{Address, TxRef};
