//! Shared server state: the pipeline configuration and the run registry.

use crate::config::PipelineConfig;
use crate::error::StageFailure;
use crate::output::{NormalizedResult, Report};
use crate::progress::PipelineProgressCallback;
use crate::state::{RunState, Stage};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Finished runs nobody downloaded are dropped this long after they finish.
pub const RUN_TTL: Duration = Duration::from_secs(60 * 60);

/// One submitted run.
pub struct RunHandle {
    status: watch::Receiver<RunState>,
    pub cancel: CancellationToken,
    pub result: Option<NormalizedResult>,
    pub report: Option<Report>,
    pub created: Instant,
    /// Set once the run task has ended, however it ended.
    pub finished: Option<Instant>,
}

impl RunHandle {
    /// A fresh handle plus the sender the run reports its state through.
    pub fn new() -> (Self, watch::Sender<RunState>) {
        let (tx, rx) = watch::channel(RunState::Active {
            stage: Stage::Uploaded,
        });
        (
            Self {
                status: rx,
                cancel: CancellationToken::new(),
                result: None,
                report: None,
                created: Instant::now(),
                finished: None,
            },
            tx,
        )
    }

    pub fn status(&self) -> RunState {
        self.status.borrow().clone()
    }

    /// Retention runs from the finish, never from submission, so slow runs
    /// stay readable for the full TTL.
    pub fn expired(&self, now: Instant, ttl: Duration) -> bool {
        self.finished
            .is_some_and(|at| now.saturating_duration_since(at) > ttl)
    }
}

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<PipelineConfig>,
    pub runs: Arc<RwLock<HashMap<Uuid, RunHandle>>>,
    pub run_ttl: Duration,
}

impl AppState {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config: Arc::new(config),
            runs: Arc::new(RwLock::new(HashMap::new())),
            run_ttl: RUN_TTL,
        }
    }

    /// Keep finished runs for `ttl` instead of [`RUN_TTL`].
    pub fn with_run_ttl(mut self, ttl: Duration) -> Self {
        self.run_ttl = ttl;
        self
    }

    /// Register a handle, evicting expired ones first.
    pub async fn insert(&self, id: Uuid, handle: RunHandle) {
        let mut runs = self.runs.write().await;
        let now = Instant::now();
        let before = runs.len();
        let ttl = self.run_ttl;
        runs.retain(|_, h| !h.expired(now, ttl));
        if runs.len() < before {
            tracing::debug!("Evicted {} expired run(s)", before - runs.len());
        }
        runs.insert(id, handle);
    }
}

/// Publishes stage transitions of one run into its [`RunHandle`].
pub struct RunProgress {
    pub id: Uuid,
    pub status: watch::Sender<RunState>,
}

impl PipelineProgressCallback for RunProgress {
    fn on_stage_start(&self, stage: Stage) {
        tracing::debug!(run = %self.id, "stage {}", stage);
        self.status.send_replace(RunState::Active { stage });
    }

    fn on_failed(&self, failure: &StageFailure) {
        self.status.send_replace(RunState::Failed {
            stage: failure.stage,
            kind: failure.kind(),
            message: failure.error.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, ScanbriefError};

    #[test]
    fn progress_updates_handle_status() {
        let (handle, tx) = RunHandle::new();
        let progress = RunProgress {
            id: Uuid::new_v4(),
            status: tx,
        };
        progress.on_stage_start(Stage::Querying);
        assert_eq!(
            handle.status(),
            RunState::Active {
                stage: Stage::Querying
            }
        );
        progress.on_failed(&StageFailure::new(Stage::Querying, ScanbriefError::Cancelled));
        assert!(matches!(
            handle.status(),
            RunState::Failed {
                stage: Stage::Querying,
                kind: ErrorKind::Cancelled,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn insert_keeps_live_runs() {
        let state = AppState::new(PipelineConfig::default());
        let (handle, _tx) = RunHandle::new();
        let id = Uuid::new_v4();
        state.insert(id, handle).await;
        let (other, _tx2) = RunHandle::new();
        state.insert(Uuid::new_v4(), other).await;
        assert!(state.runs.read().await.contains_key(&id));
    }

    #[test]
    fn unfinished_runs_never_expire() {
        let (handle, tx) = RunHandle::new();
        tx.send_replace(RunState::Done);
        let much_later = Instant::now() + RUN_TTL * 3;
        assert!(!handle.expired(much_later, RUN_TTL));
    }

    #[test]
    fn expiry_counts_from_finish() {
        let (mut handle, _tx) = RunHandle::new();
        let finished = handle.created + RUN_TTL * 2;
        handle.finished = Some(finished);
        assert!(!handle.expired(finished + RUN_TTL / 2, RUN_TTL));
        assert!(handle.expired(finished + RUN_TTL * 2, RUN_TTL));
    }
}
