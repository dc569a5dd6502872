//! Per-session single-flight slot for chain-mutating actions.
//!
//! At most one orchestrated action runs per session. Starting a second one
//! while the first is unresolved fails with [`SaveFiError::Busy`]. Dismissing
//! detaches from the running action (the broadcast transaction is not
//! cancelled, we only stop waiting for it) and frees the slot.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{info, warn};

use crate::errors::{Result, SaveFiError};
use crate::orchestrator::{ActionCall, SessionContext, TransactionOrchestrator, TxProgress};
use crate::plan::PlanAction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    Pending,
    Confirmed,
    Failed,
}

/// What the user sees for the latest action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionStatus {
    pub id: u64,
    pub action: PlanAction,
    pub state: ActionState,
    pub progress: Vec<TxProgress>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Default)]
struct Slot {
    next_id: u64,
    /// Id of the unresolved action holding the slot.
    active: Option<u64>,
    abort: Option<AbortHandle>,
    status: Option<ActionStatus>,
}

pub struct Session {
    ctx: SessionContext,
    slot: Mutex<Slot>,
}

impl Session {
    pub fn new(ctx: SessionContext) -> Self {
        Self {
            ctx,
            slot: Mutex::new(Slot::default()),
        }
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        // A poisoned slot only means a panicking test thread; the data is plain.
        self.slot.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Claim the slot for `action`.
    pub fn begin(&self, action: PlanAction) -> Result<u64> {
        let mut slot = self.slot();
        if slot.active.is_some() {
            return Err(SaveFiError::Busy);
        }
        slot.next_id += 1;
        let id = slot.next_id;
        slot.active = Some(id);
        slot.abort = None;
        slot.status = Some(ActionStatus {
            id,
            action,
            state: ActionState::Pending,
            progress: Vec::new(),
            updated_at: Utc::now(),
        });
        Ok(id)
    }

    /// Record progress for action `id`; ignored once it was dismissed.
    pub fn record(&self, id: u64, progress: TxProgress) {
        let mut slot = self.slot();
        if slot.active != Some(id) {
            return;
        }
        if let Some(status) = slot.status.as_mut().filter(|s| s.id == id) {
            status.state = match &progress {
                TxProgress::Confirmed { .. } => ActionState::Confirmed,
                TxProgress::Failed { .. } => ActionState::Failed,
                _ => ActionState::Pending,
            };
            status.progress.push(progress);
            status.updated_at = Utc::now();
        }
    }

    /// Release the slot held by `id`.
    pub fn finish(&self, id: u64) {
        let mut slot = self.slot();
        if slot.active == Some(id) {
            slot.active = None;
            slot.abort = None;
        }
    }

    /// Stop waiting on the current action, free the slot and clear its status.
    pub fn dismiss(&self) {
        let mut slot = self.slot();
        if let Some(abort) = slot.abort.take() {
            warn!("Detaching from unresolved action {:?}", slot.active);
            abort.abort();
        }
        slot.active = None;
        slot.status = None;
    }

    pub fn status(&self) -> Option<ActionStatus> {
        self.slot().status.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.slot().active.is_some()
    }

    /// Store the task handle for `id`. If `id` was dismissed before the
    /// handle arrived, the task is aborted on the spot.
    fn attach(&self, id: u64, abort: AbortHandle) {
        let mut slot = self.slot();
        if slot.active == Some(id) {
            slot.abort = Some(abort);
        } else {
            abort.abort();
        }
    }

    /// Claim the slot and run `call` in the background, recording progress.
    pub fn launch(self: &Arc<Self>, orchestrator: Arc<TransactionOrchestrator>, call: ActionCall) -> Result<u64> {
        let id = self.begin(call.action)?;
        info!("Launching action {id}: {:?}", call.action);

        let session = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let (tx, mut rx) = mpsc::unbounded_channel();
            let recorder = Arc::clone(&session);
            let forward = tokio::spawn(async move {
                while let Some(progress) = rx.recv().await {
                    recorder.record(id, progress);
                }
            });

            let ctx = session.ctx.clone();
            let _ = orchestrator
                .execute(&ctx, &call, &tx)
                .await;
            drop(tx);
            let _ = forward.await;
            session.finish(id);
        });
        self.attach(id, handle.abort_handle());
        Ok(id)
    }
}
