//! Per-session snapshot channel.
//!
//! Each session's state lives in a `watch` channel holding an immutable
//! `Arc<AnalysisSession>`. The processing task keeps the only working copy
//! and publishes clones of it; readers only ever see whole snapshots. The
//! sole write from outside the task is termination, which flips a running
//! snapshot to `terminated`. Once a terminal snapshot is published nothing
//! replaces it.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;

use super::types::{AnalysisSession, SessionStatus, StageStatus};

type Snapshot = Arc<AnalysisSession>;

/// Error recorded on a stage that was running when its session was terminated.
pub const TERMINATED_STAGE_ERROR: &str = "Session terminated while stage was running";

/// Registry entry for a session: read access plus termination.
#[derive(Clone)]
pub struct SessionHandle {
    tx: Arc<watch::Sender<Snapshot>>,
}

/// Publishing side held by the session's processing task.
pub(crate) struct SessionWriter {
    tx: Arc<watch::Sender<Snapshot>>,
}

impl SessionHandle {
    /// Create the channel seeded with `session`.
    pub(crate) fn new(session: AnalysisSession) -> (Self, SessionWriter) {
        let (tx, _rx) = watch::channel(Arc::new(session));
        let tx = Arc::new(tx);
        (Self { tx: tx.clone() }, SessionWriter { tx })
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> Arc<AnalysisSession> {
        self.tx.borrow().clone()
    }

    /// Receiver notified on every publish.
    pub fn subscribe(&self) -> watch::Receiver<Arc<AnalysisSession>> {
        self.tx.subscribe()
    }

    /// Mark a running session terminated. Returns false if it was already
    /// in a terminal state.
    ///
    /// A stage caught in `running` is closed as failed in the same snapshot,
    /// since its outcome will never be published.
    pub(crate) fn terminate(&self) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_terminal() {
                return false;
            }
            let now = Utc::now();
            let mut next = AnalysisSession::clone(current);
            next.status = SessionStatus::Terminated;
            next.completed_at = Some(now);
            for stage in next
                .stages
                .iter_mut()
                .filter(|s| s.status == StageStatus::Running)
            {
                stage.status = StageStatus::Failed;
                stage.completed_at = Some(now);
                stage.error = Some(TERMINATED_STAGE_ERROR.to_string());
            }
            *current = Arc::new(next);
            true
        })
    }
}

impl SessionWriter {
    /// Whether the published snapshot has left `running`.
    pub(crate) fn is_terminal(&self) -> bool {
        self.tx.borrow().is_terminal()
    }

    /// Publish a copy of the working session. Refused (returns false) once
    /// the published snapshot is terminal.
    pub(crate) fn publish(&self, session: &AnalysisSession) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_terminal() {
                return false;
            }
            *current = Arc::new(session.clone());
            true
        })
    }
}
