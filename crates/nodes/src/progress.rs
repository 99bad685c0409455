//! Progress streaming.
//!
//! [`ProgressEmitter`] numbers and sends the events of one workflow.
//! [`ProgressHub`] is the default observer: it fans events out to any number
//! of subscribers over a broadcast channel and never blocks the pipeline.

use std::sync::Arc;
use std::time::Duration;

use pipeline::{
    ErrorRecord, ProgressEvent, ProgressObserver, ProgressStatus, SessionId, Step, Timestamp,
    WorkflowState, WorkflowStatus,
};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Emits the before/after events for one workflow, in order.
pub struct ProgressEmitter {
    observer: Arc<dyn ProgressObserver>,
    session_id: SessionId,
    sequence: u64,
}

impl ProgressEmitter {
    /// Starts numbering at zero.
    pub fn new(observer: Arc<dyn ProgressObserver>, session_id: SessionId) -> Self {
        Self {
            observer,
            session_id,
            sequence: 0,
        }
    }

    /// Sends the `running` event for `step`.
    pub fn step_started(&mut self, step: Step, state: &WorkflowState) {
        self.emit(
            step,
            ProgressStatus::Running,
            format!("Starting {step}"),
            json!({ "retry_count": state.retry_count() }),
        );
    }

    /// `new_errors` are the errors the step itself recorded.
    pub fn step_finished(
        &mut self,
        step: Step,
        state: &WorkflowState,
        new_errors: &[ErrorRecord],
        took: Duration,
    ) {
        // A step entered after a fatal error does no work and counts as failed.
        let failed = match step {
            Step::Finalize(_) => state.status() != WorkflowStatus::Completed,
            _ => !new_errors.is_empty() || state.has_fatal_error(),
        };
        let status = if failed {
            ProgressStatus::Failed
        } else {
            ProgressStatus::Completed
        };
        let message = match new_errors.last() {
            Some(error) if failed => format!("{step} failed: {}", error.message),
            None if failed && !matches!(step, Step::Finalize(_)) => {
                format!("{step} skipped after a fatal error")
            }
            _ if failed => format!("{step} failed"),
            _ => format!("{step} finished"),
        };
        let errors: Vec<&str> = new_errors.iter().map(|e| e.message.as_str()).collect();
        self.emit(
            step,
            status,
            message,
            json!({
                "retry_count": state.retry_count(),
                "duration_ms": took.as_millis() as u64,
                "errors": errors,
            }),
        );
    }

    fn emit(&mut self, step: Step, status: ProgressStatus, message: String, details: Value) {
        let event = ProgressEvent {
            session_id: self.session_id.clone(),
            sequence: self.sequence,
            step: step.name().to_string(),
            status,
            message,
            details,
            timestamp: Timestamp::now(),
        };
        self.sequence += 1;
        self.observer.notify(event);
    }
}

/// Broadcast fan-out of progress events.
///
/// Events are dropped (and logged at debug) when nobody is subscribed. A
/// subscriber that falls more than `capacity` events behind loses the oldest
/// ones; the remaining events keep their order.
#[derive(Clone)]
pub struct ProgressHub {
    sender: broadcast::Sender<ProgressEvent>,
}

impl ProgressHub {
    /// Events buffered per subscriber before the oldest are dropped.
    pub const DEFAULT_CAPACITY: usize = 256;

    /// A hub buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Receives events of every workflow.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    /// A subscription that only yields events for `session_id`.
    pub fn subscribe_session(&self, session_id: SessionId) -> SessionProgress {
        SessionProgress {
            receiver: self.sender.subscribe(),
            session_id,
        }
    }
}

impl Default for ProgressHub {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl ProgressObserver for ProgressHub {
    fn notify(&self, event: ProgressEvent) {
        if self.sender.send(event).is_err() {
            debug!("No progress subscribers; event dropped");
        }
    }
}

/// Progress events of a single session, in order.
pub struct SessionProgress {
    receiver: broadcast::Receiver<ProgressEvent>,
    session_id: SessionId,
}

impl SessionProgress {
    /// The next event for this session, or `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.session_id == self.session_id => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(session_id = %self.session_id, missed, "Progress subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use pipeline::{ErrorKind, Verdict};

    #[derive(Default)]
    struct Recorder(Mutex<Vec<ProgressEvent>>);

    impl ProgressObserver for Recorder {
        fn notify(&self, event: ProgressEvent) {
            self.0.lock().push(event);
        }
    }

    fn state() -> WorkflowState {
        WorkflowState::create("x", SessionId::new("p-1").unwrap()).unwrap()
    }

    #[test]
    fn emitter_numbers_events_in_order() {
        let recorder = Arc::new(Recorder::default());
        let mut emitter = ProgressEmitter::new(recorder.clone(), SessionId::new("p-1").unwrap());
        let s = state();

        emitter.step_started(Step::Intake, &s);
        emitter.step_finished(Step::Intake, &s, &[], Duration::ZERO);

        let events = recorder.0.lock();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].sequence, 0);
        assert_eq!(events[0].status, ProgressStatus::Running);
        assert_eq!(events[1].sequence, 1);
        assert_eq!(events[1].status, ProgressStatus::Completed);
        assert_eq!(events[1].step, "intake");
    }

    #[test]
    fn a_step_that_recorded_errors_is_reported_failed() {
        let recorder = Arc::new(Recorder::default());
        let mut emitter = ProgressEmitter::new(recorder.clone(), SessionId::new("p-1").unwrap());
        let s = state()
            .record_error(Step::Plan, ErrorKind::ExternalCall, "planner down")
            .unwrap();

        emitter.step_finished(Step::Plan, &s, s.errors(), Duration::ZERO);

        let events = recorder.0.lock();
        assert_eq!(events[0].status, ProgressStatus::Failed);
        assert_eq!(events[0].message, "plan failed: planner down");
    }

    #[test]
    fn a_step_skipped_after_a_fatal_error_is_reported_failed() {
        let recorder = Arc::new(Recorder::default());
        let mut emitter = ProgressEmitter::new(recorder.clone(), SessionId::new("p-1").unwrap());
        let s = state()
            .record_error(Step::Build, ErrorKind::CapabilityExhausted, "budget spent")
            .unwrap();

        emitter.step_finished(Step::Test, &s, &[], Duration::ZERO);

        let events = recorder.0.lock();
        assert_eq!(events[0].status, ProgressStatus::Failed);
        assert_eq!(events[0].message, "test skipped after a fatal error");
    }

    #[test]
    fn finalize_reports_the_verdict() {
        let recorder = Arc::new(Recorder::default());
        let mut emitter = ProgressEmitter::new(recorder.clone(), SessionId::new("p-1").unwrap());
        let done = state().finalize(Verdict::Success, 1).unwrap();

        emitter.step_finished(Step::Finalize(Verdict::Success), &done, &[], Duration::ZERO);
        assert_eq!(recorder.0.lock()[0].status, ProgressStatus::Completed);
    }

    #[test]
    fn hub_without_subscribers_does_not_panic() {
        let hub = ProgressHub::new(4);
        let mut emitter = ProgressEmitter::new(Arc::new(hub), SessionId::new("p-1").unwrap());
        emitter.step_started(Step::Intake, &state());
    }

    #[tokio::test]
    async fn session_subscription_filters_other_workflows() {
        let hub = ProgressHub::new(16);
        let mut mine = hub.subscribe_session(SessionId::new("mine").unwrap());
        let shared: Arc<dyn ProgressObserver> = Arc::new(hub.clone());

        let mut other = ProgressEmitter::new(shared.clone(), SessionId::new("other").unwrap());
        let mut own = ProgressEmitter::new(shared, SessionId::new("mine").unwrap());
        other.step_started(Step::Intake, &state());
        own.step_started(Step::Plan, &state());

        let event = mine.recv().await.unwrap();
        assert_eq!(event.session_id.as_str(), "mine");
        assert_eq!(event.step, "plan");
    }
}
