//! The graph executor.
//!
//! Starting from [`Step::ENTRY`], the executor runs a step, validates the
//! state it produced, reports progress, and asks the graph for the next step
//! until a terminal step has run. Each step sees exactly the state the
//! previous one returned.

use std::sync::Arc;
use std::time::Instant;

use pipeline::{
    next_step, ProgressObserver, SessionId, StateError, StateUpdate, Step, WorkflowState,
};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, Instrument};

use crate::progress::ProgressEmitter;
use crate::steps;
use crate::NodeContext;

/// The executor could not carry a workflow to a terminal state.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("step '{step}' produced an invalid state transition: {source}")]
    State {
        step: Step,
        #[source]
        source: StateError,
    },

    #[error("workflow {session_id} exceeded the limit of {limit} step executions")]
    StepLimitExceeded { session_id: SessionId, limit: u32 },
}

/// Drives workflows through the fixed step graph.
pub struct PipelineExecutor {
    ctx: Arc<NodeContext>,
    observer: Arc<dyn ProgressObserver>,
}

impl PipelineExecutor {
    /// An executor reporting progress to `observer`.
    pub fn new(ctx: Arc<NodeContext>, observer: Arc<dyn ProgressObserver>) -> Self {
        Self { ctx, observer }
    }

    /// The collaborators and configuration shared by all runs.
    pub fn context(&self) -> &NodeContext {
        &self.ctx
    }

    /// Runs `state` through the graph to a terminal state.
    ///
    /// # Errors
    ///
    /// [`EngineError`] when a step breaks the state model or the step limit is
    /// hit. Agent and environment failures are recorded in the state instead.
    pub async fn run(&self, state: WorkflowState) -> Result<WorkflowState, EngineError> {
        self.drive(state, |_| {}).await
    }

    /// Like [`run`](Self::run), publishing the state after every step.
    pub async fn run_publishing(
        &self,
        state: WorkflowState,
        snapshots: &watch::Sender<WorkflowState>,
    ) -> Result<WorkflowState, EngineError> {
        self.drive(state, |s| {
            snapshots.send_replace(s.clone());
        })
        .await
    }

    async fn drive<F>(&self, state: WorkflowState, publish: F) -> Result<WorkflowState, EngineError>
    where
        F: FnMut(&WorkflowState) + Send,
    {
        let span = tracing::info_span!("workflow", session_id = %state.session_id());
        // Dropped on return and on cancellation alike.
        let _release = SessionRelease {
            ctx: self.ctx.as_ref(),
            session_id: state.session_id().clone(),
        };
        self.drive_inner(state, publish).instrument(span).await
    }

    async fn drive_inner<F>(
        &self,
        mut state: WorkflowState,
        mut publish: F,
    ) -> Result<WorkflowState, EngineError>
    where
        F: FnMut(&WorkflowState) + Send,
    {
        let clock = Instant::now();
        let limit = self.ctx.config.max_steps;
        let mut emitter = ProgressEmitter::new(Arc::clone(&self.observer), state.session_id().clone());
        let mut step = Step::ENTRY;

        for _ in 0..limit {
            emitter.step_started(step, &state);
            let errors_before = state.errors().len();
            let step_clock = Instant::now();

            state = self
                .dispatch(step, state, &clock)
                .instrument(tracing::debug_span!("step", step = %step))
                .await
                .map_err(|source| EngineError::State { step, source })?;
            if cfg!(debug_assertions) {
                state
                    .validate()
                    .map_err(|source| EngineError::State { step, source })?;
            }

            let new_errors = &state.errors()[errors_before..];
            emitter.step_finished(step, &state, new_errors, step_clock.elapsed());
            debug!(
                step = %step,
                retry_count = state.retry_count(),
                new_errors = new_errors.len(),
                duration_ms = step_clock.elapsed().as_millis() as u64,
                "Step finished"
            );
            publish(&state);

            match next_step(step, &state) {
                Some(next) => {
                    debug!(from = %step, to = %next, "Routing");
                    step = next;
                }
                None => {
                    info!(status = %state.status(), elapsed_ms = elapsed_ms(&clock), "Workflow finished");
                    return Ok(state);
                }
            }
        }

        Err(EngineError::StepLimitExceeded {
            session_id: state.session_id().clone(),
            limit,
        })
    }

    async fn dispatch(
        &self,
        step: Step,
        state: WorkflowState,
        clock: &Instant,
    ) -> Result<WorkflowState, StateError> {
        let ctx = self.ctx.as_ref();
        match step {
            Step::Intake => steps::intake::run(enter(state, step)?, ctx).await,
            Step::Plan => steps::plan::run(enter(state, step)?, ctx).await,
            Step::Build => steps::build::run(enter(state, step)?, ctx).await,
            Step::Test => steps::test::run(enter(state, step)?, ctx).await,
            Step::SelfHeal => steps::self_heal::run(enter(state, step)?, ctx).await,
            Step::Deploy => steps::deploy::run(enter(state, step)?, ctx).await,
            Step::Finalize(verdict) => {
                steps::finalize::run(state, verdict, elapsed_ms(clock), ctx).await
            }
        }
    }
}

/// Frees the per-session state shared collaborators keep for a workflow.
struct SessionRelease<'a> {
    ctx: &'a NodeContext,
    session_id: SessionId,
}

impl Drop for SessionRelease<'_> {
    fn drop(&mut self) {
        self.ctx.gateway.limiter().reset(&self.session_id);
        self.ctx.audit.close_session(&self.session_id);
    }
}

/// Marks `step` as the one executing.
fn enter(state: WorkflowState, step: Step) -> Result<WorkflowState, StateError> {
    state.apply_update(step, StateUpdate::default())
}

fn elapsed_ms(clock: &Instant) -> u64 {
    u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX)
}
