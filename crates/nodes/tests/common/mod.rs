//! Fakes shared by the integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use nodes::{AgentGateway, AgentRegistry, NodeContext, PipelineExecutor};
use parking_lot::Mutex;
use pipeline::{
    Agent, AgentRequest, AgentResponse, AgentTransportError, ArtifactOperation, AuditLog,
    DeploymentUrl, EngineConfig, EpisodicMemory, MemoryEntry, ProgressEvent, ProgressObserver,
    ReachabilityProbe, ResourceExhausted, ResourceMonitor, SessionId, SessionRateLimiter,
    StepDecision,
};
use serde_json::json;

pub type Reply = Result<AgentResponse, AgentTransportError>;

pub struct ScriptedAgent {
    replies: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    requests: Mutex<Vec<AgentRequest>>,
    stalled: bool,
}

impl ScriptedAgent {
    pub fn always(reply: Reply) -> Arc<Self> {
        Self::sequence(vec![], reply)
    }

    pub fn sequence(replies: Vec<Reply>, then: Reply) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            fallback: then,
            requests: Mutex::new(Vec::new()),
            stalled: false,
        })
    }

    /// Never answers; keeps a workflow in flight.
    pub fn stalled() -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::new()),
            fallback: Err(AgentTransportError::permanent("stalled")),
            requests: Mutex::new(Vec::new()),
            stalled: true,
        })
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<AgentRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    async fn invoke(&self, request: AgentRequest) -> Reply {
        self.requests.lock().push(request);
        if self.stalled {
            return std::future::pending().await;
        }
        self.replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

pub fn plan_ok() -> Reply {
    Ok(AgentResponse::succeeded(json!({
        "summary": "a small web service",
        "units": [{ "name": "api", "description": "HTTP handlers" }, { "name": "storage" }]
    })))
}

pub fn build_ok() -> Reply {
    Ok(AgentResponse::succeeded(json!({
        "artifact_location": "/work/app",
        "files": ["src/main.rs", "Cargo.toml"]
    })))
}

pub fn test_pass() -> Reply {
    Ok(AgentResponse::succeeded(json!({ "checks_run": 3, "failures": [] })))
}

pub fn test_fail() -> Reply {
    Ok(AgentResponse::succeeded(json!({ "checks_run": 3, "failures": ["unit: handler panics"] })))
}

pub fn deployed(url: &str) -> Reply {
    Ok(AgentResponse::succeeded(json!({ "url": url })))
}

pub fn rejected(reason: &str) -> Reply {
    Ok(AgentResponse::failed([reason]))
}

pub struct Agents {
    pub planner: Arc<ScriptedAgent>,
    pub builder: Arc<ScriptedAgent>,
    pub tester: Arc<ScriptedAgent>,
    pub deployer: Option<Arc<ScriptedAgent>>,
}

impl Agents {
    /// Every agent succeeds; the deployer returns a URL.
    pub fn happy() -> Self {
        Self {
            planner: ScriptedAgent::always(plan_ok()),
            builder: ScriptedAgent::always(build_ok()),
            tester: ScriptedAgent::always(test_pass()),
            deployer: Some(ScriptedAgent::always(deployed("https://app.example.test"))),
        }
    }

    fn registry(&self) -> AgentRegistry {
        let registry = AgentRegistry::new(
            self.planner.clone(),
            self.builder.clone(),
            self.tester.clone(),
        );
        match &self.deployer {
            Some(d) => registry.with_deployer(d.clone()),
            None => registry,
        }
    }
}

#[derive(Default)]
pub struct RecordingAudit {
    pub decisions: Mutex<Vec<StepDecision>>,
    pub operations: Mutex<Vec<ArtifactOperation>>,
    pub closed: Mutex<Vec<SessionId>>,
}

impl AuditLog for RecordingAudit {
    fn log_step_decision(&self, decision: StepDecision) {
        self.decisions.lock().push(decision);
    }

    fn log_artifact_operation(&self, operation: ArtifactOperation) {
        self.operations.lock().push(operation);
    }

    fn close_session(&self, session_id: &SessionId) {
        self.closed.lock().push(session_id.clone());
    }
}

#[derive(Default)]
pub struct RecordingMemory {
    pub entries: Mutex<Vec<MemoryEntry>>,
}

#[async_trait]
impl EpisodicMemory for RecordingMemory {
    async fn get_context(&self, _: &SessionId, _: &str, _: usize) -> Option<String> {
        None
    }

    fn add_entry(&self, entry: MemoryEntry) {
        self.entries.lock().push(entry);
    }
}

pub struct Healthy;

impl ResourceMonitor for Healthy {
    fn check(&self) -> Result<(), ResourceExhausted> {
        Ok(())
    }
}

pub struct OutOfMemory;

impl ResourceMonitor for OutOfMemory {
    fn check(&self) -> Result<(), ResourceExhausted> {
        Err(ResourceExhausted {
            resource: "memory".into(),
            detail: "10 KiB available".into(),
        })
    }
}

pub struct Reachable(pub bool);

#[async_trait]
impl ReachabilityProbe for Reachable {
    async fn is_reachable(&self, _: &DeploymentUrl) -> bool {
        self.0
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    pub events: Mutex<Vec<ProgressEvent>>,
}

impl ProgressObserver for RecordingObserver {
    fn notify(&self, event: ProgressEvent) {
        self.events.lock().push(event);
    }
}

pub fn test_config() -> EngineConfig {
    EngineConfig {
        backoff_base_ms: 1,
        deploy_poll_timeout_ms: 50,
        deploy_poll_interval_ms: 10,
        ..EngineConfig::default()
    }
}

pub struct Harness {
    pub executor: Arc<PipelineExecutor>,
    pub progress: Arc<RecordingObserver>,
    pub audit: Arc<RecordingAudit>,
    pub memory: Arc<RecordingMemory>,
}

impl Harness {
    pub fn new(agents: &Agents) -> Self {
        Self::with(agents, test_config(), Arc::new(Healthy), Arc::new(Reachable(true)))
    }

    pub fn with(
        agents: &Agents,
        config: EngineConfig,
        resources: Arc<dyn ResourceMonitor>,
        probe: Arc<dyn ReachabilityProbe>,
    ) -> Self {
        let progress = Arc::new(RecordingObserver::default());
        let audit = Arc::new(RecordingAudit::default());
        let memory = Arc::new(RecordingMemory::default());
        let gateway = AgentGateway::new(
            agents.registry(),
            Arc::new(SessionRateLimiter::new(config.session_call_budget)),
            config.backoff(),
        )
        .with_max_retry_after(config.max_retry_after());
        let ctx = NodeContext::new(
            gateway,
            audit.clone(),
            memory.clone(),
            resources,
            probe,
            config,
        );
        Self {
            executor: Arc::new(PipelineExecutor::new(Arc::new(ctx), progress.clone())),
            progress,
            audit,
            memory,
        }
    }

    /// Names of the steps that were started, in order.
    pub fn steps_run(&self) -> Vec<String> {
        self.progress
            .events
            .lock()
            .iter()
            .filter(|e| e.status == pipeline::ProgressStatus::Running)
            .map(|e| e.step.clone())
            .collect()
    }
}
