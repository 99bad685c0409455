//! The request/result boundary.
//!
//! [`WorkflowService::start`] validates a request, admits it, and returns a
//! session id straight away; the workflow runs on its own task. Callers then
//! poll [`WorkflowService::get_result`] or await [`WorkflowService::wait`].
//! Progress is observed separately through the executor's
//! [`ProgressObserver`](pipeline::ProgressObserver).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use pipeline::{
    EngineConfig, ResourceExhausted, ResourceMonitor, SessionId, ShipyardError, WorkflowOutcome,
    WorkflowState,
};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::PipelineExecutor;

struct RunHandle {
    /// Start order, used to evict the oldest finished runs first.
    started: u64,
    snapshots: watch::Receiver<WorkflowState>,
    task: JoinHandle<()>,
    /// Why the run stopped short of a terminal state, once it has.
    interruption: Arc<Mutex<Option<String>>>,
}

impl RunHandle {
    fn is_active(&self) -> bool {
        !self.task.is_finished()
            && self.interruption.lock().is_none()
            && !self.snapshots.borrow().is_terminal()
    }

    fn outcome(&self, error_limit: usize) -> WorkflowOutcome {
        let state = self.snapshots.borrow().clone();
        if state.is_terminal() {
            return WorkflowOutcome::from_state(&state, error_limit);
        }
        let stopped = self.task.is_finished() || self.snapshots.has_changed().is_err();
        match self.interruption.lock().clone() {
            Some(reason) => WorkflowOutcome::interrupted(&state, reason),
            None if stopped => WorkflowOutcome::interrupted(
                &state,
                "workflow stopped before reaching a terminal state",
            ),
            None => WorkflowOutcome::from_state(&state, error_limit),
        }
    }
}

/// Starts workflows and answers for their results.
///
/// Results of finished workflows are kept until more than
/// `retained_results` of them have piled up; the oldest are then dropped and
/// `get_result` no longer knows those sessions.
///
/// Must be used from within a Tokio runtime.
pub struct WorkflowService {
    executor: Arc<PipelineExecutor>,
    config: EngineConfig,
    resources: Arc<dyn ResourceMonitor>,
    slots: Arc<Semaphore>,
    runs: Mutex<HashMap<SessionId, RunHandle>>,
    next_start: AtomicU64,
}

impl WorkflowService {
    /// Takes its limits and resource monitor from the executor's context.
    pub fn new(executor: Arc<PipelineExecutor>) -> Self {
        let config = executor.context().config.clone();
        let resources = Arc::clone(&executor.context().resources);
        Self {
            slots: Arc::new(Semaphore::new(config.max_concurrent_workflows)),
            executor,
            config,
            resources,
            runs: Mutex::new(HashMap::new()),
            next_start: AtomicU64::new(0),
        }
    }

    /// Validates `request_text` and launches a workflow for it.
    ///
    /// A fresh session id is generated when none is given. Reusing the id of
    /// a finished session replaces its result.
    ///
    /// # Errors
    ///
    /// - [`ShipyardError::InputValidation`] for an empty, oversized or
    ///   control-character-laden request.
    /// - [`ShipyardError::SessionActive`] when the session is still running.
    /// - [`ShipyardError::ResourceExhausted`] when the host is low on memory
    ///   or every workflow slot is taken.
    pub fn start(
        &self,
        request_text: &str,
        session_id: Option<SessionId>,
    ) -> Result<SessionId, ShipyardError> {
        self.config.check_request(request_text)?;
        let session_id = session_id.unwrap_or_else(SessionId::new_random);

        let mut runs = self.runs.lock();
        if runs.get(&session_id).is_some_and(RunHandle::is_active) {
            return Err(ShipyardError::SessionActive { session_id });
        }
        self.resources.check()?;
        let permit = Arc::clone(&self.slots).try_acquire_owned().map_err(|_| {
            ShipyardError::from(ResourceExhausted {
                resource: "workflow slots".to_string(),
                detail: format!(
                    "{} workflows already running",
                    self.config.max_concurrent_workflows
                ),
            })
        })?;

        let state = WorkflowState::create(request_text, session_id.clone())
            .map_err(|e| ShipyardError::invalid_input(e.to_string()))?;

        let (sender, snapshots) = watch::channel(state.clone());
        let interruption = Arc::new(Mutex::new(None));
        let task = tokio::spawn({
            let executor = Arc::clone(&self.executor);
            let interruption = Arc::clone(&interruption);
            let session_id = session_id.clone();
            async move {
                let _permit = permit;
                if let Err(e) = executor.run_publishing(state, &sender).await {
                    error!(session_id = %session_id, error = %e, "Workflow aborted");
                    *interruption.lock() = Some(format!("workflow aborted: {e}"));
                }
            }
        });

        info!(session_id = %session_id, "Workflow started");
        evict_finished(&mut runs, self.config.retained_results);
        runs.insert(
            session_id.clone(),
            RunHandle {
                started: self.next_start.fetch_add(1, Ordering::Relaxed),
                snapshots,
                task,
                interruption,
            },
        );
        Ok(session_id)
    }

    /// The current outcome for `session_id`; `None` for an unknown session.
    ///
    /// Never blocks. A workflow still in flight is reported as non-terminal.
    pub fn get_result(&self, session_id: &SessionId) -> Option<WorkflowOutcome> {
        self.runs
            .lock()
            .get(session_id)
            .map(|run| run.outcome(self.config.error_summary_limit))
    }

    /// Waits until `session_id` stops, then returns its outcome.
    pub async fn wait(&self, session_id: &SessionId) -> Option<WorkflowOutcome> {
        let mut snapshots = {
            let runs = self.runs.lock();
            runs.get(session_id)?.snapshots.clone()
        };
        // An Err means the run ended without a terminal state; get_result
        // reports that as an interruption.
        let _ = snapshots.wait_for(WorkflowState::is_terminal).await;
        self.get_result(session_id)
    }

    /// Stops a running workflow. Returns `false` if it was not running.
    pub fn cancel(&self, session_id: &SessionId) -> bool {
        let runs = self.runs.lock();
        let Some(run) = runs.get(session_id) else {
            return false;
        };
        if !run.is_active() {
            return false;
        }
        *run.interruption.lock() = Some("workflow was cancelled".to_string());
        run.task.abort();
        warn!(session_id = %session_id, "Workflow cancelled");
        true
    }

    /// Sessions whose workflow is still running.
    pub fn active_sessions(&self) -> Vec<SessionId> {
        self.runs
            .lock()
            .iter()
            .filter(|(_, run)| run.is_active())
            .map(|(id, _)| id.clone())
            .collect()
    }
}

/// Drops the oldest finished runs until at most `keep` remain.
fn evict_finished(runs: &mut HashMap<SessionId, RunHandle>, keep: usize) {
    let mut finished: Vec<(u64, SessionId)> = runs
        .iter()
        .filter(|(_, run)| !run.is_active())
        .map(|(id, run)| (run.started, id.clone()))
        .collect();
    if finished.len() <= keep {
        return;
    }
    finished.sort_unstable();
    let excess = finished.len() - keep;
    for (_, session_id) in finished.into_iter().take(excess) {
        runs.remove(&session_id);
        debug!(session_id = %session_id, "Evicted finished workflow result");
    }
}
