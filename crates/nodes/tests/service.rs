//! The start/get_result boundary.

mod common;

use std::sync::Arc;

use common::*;
use nodes::WorkflowService;
use pipeline::{EngineConfig, SessionId, ShipyardError, WorkflowStatus};

fn service(h: &Harness) -> WorkflowService {
    WorkflowService::new(h.executor.clone())
}

fn sid(s: &str) -> SessionId {
    SessionId::new(s).unwrap()
}

#[tokio::test]
async fn started_workflow_reports_success() {
    let agents = Agents::happy();
    let h = Harness::new(&agents);
    let svc = service(&h);

    let id = svc.start("build me a todo app", None).unwrap();
    let outcome = svc.wait(&id).await.unwrap();

    assert!(outcome.success);
    assert!(outcome.terminal);
    assert_eq!(outcome.status, WorkflowStatus::Completed);
    assert_eq!(outcome.artifact_location.unwrap().as_str(), "/work/app");
    assert_eq!(
        outcome.deployment_url.unwrap().as_str(),
        "https://app.example.test"
    );
    assert!(outcome.error.is_none());
    assert_eq!(svc.get_result(&id).unwrap(), svc.wait(&id).await.unwrap());
}

#[tokio::test]
async fn caller_chosen_session_id_is_kept() {
    let agents = Agents::happy();
    let h = Harness::new(&agents);
    let svc = service(&h);

    let id = svc.start("ship it", Some(sid("mine"))).unwrap();
    assert_eq!(id, sid("mine"));
    svc.wait(&id).await.unwrap();

    // A finished session can be reused.
    assert!(svc.start("ship it again", Some(sid("mine"))).is_ok());
}

#[tokio::test]
async fn invalid_requests_are_rejected_up_front() {
    let agents = Agents::happy();
    let config = EngineConfig {
        max_request_chars: 10,
        ..test_config()
    };
    let h = Harness::with(&agents, config, Arc::new(Healthy), Arc::new(Reachable(true)));
    let svc = service(&h);

    for bad in ["", "   \n", "far too long a request", "bell\u{7}"] {
        assert!(
            matches!(svc.start(bad, None), Err(ShipyardError::InputValidation { .. })),
            "{bad:?} should be rejected"
        );
    }
    assert_eq!(agents.planner.calls(), 0);
}

#[tokio::test]
async fn unknown_session_has_no_result() {
    let agents = Agents::happy();
    let h = Harness::new(&agents);
    assert!(service(&h).get_result(&sid("nobody")).is_none());
}

#[tokio::test]
async fn running_workflow_is_not_terminal_and_blocks_its_session() {
    let agents = Agents {
        planner: ScriptedAgent::stalled(),
        ..Agents::happy()
    };
    let h = Harness::new(&agents);
    let svc = service(&h);

    let id = svc.start("slow one", Some(sid("busy"))).unwrap();
    let outcome = svc.get_result(&id).unwrap();
    assert!(!outcome.terminal);
    assert!(!outcome.success);
    assert!(outcome.error.unwrap().contains("still running"));

    assert_eq!(
        svc.start("again", Some(sid("busy"))),
        Err(ShipyardError::SessionActive { session_id: sid("busy") })
    );
    assert_eq!(svc.active_sessions(), vec![sid("busy")]);
    assert!(svc.cancel(&id));
}

#[tokio::test]
async fn cancelled_workflow_ends_as_a_failure() {
    let agents = Agents {
        planner: ScriptedAgent::stalled(),
        ..Agents::happy()
    };
    let h = Harness::new(&agents);
    let svc = service(&h);

    let id = svc.start("slow one", None).unwrap();
    assert!(svc.cancel(&id));
    let outcome = svc.wait(&id).await.unwrap();

    assert!(outcome.terminal);
    assert!(!outcome.success);
    assert_eq!(outcome.error.as_deref(), Some("workflow was cancelled"));
    assert!(!svc.cancel(&id));
}

#[tokio::test]
async fn workflow_slots_are_limited() {
    let agents = Agents {
        planner: ScriptedAgent::stalled(),
        ..Agents::happy()
    };
    let config = EngineConfig {
        max_concurrent_workflows: 1,
        ..test_config()
    };
    let h = Harness::with(&agents, config, Arc::new(Healthy), Arc::new(Reachable(true)));
    let svc = service(&h);

    let first = svc.start("one", None).unwrap();
    assert!(matches!(
        svc.start("two", None),
        Err(ShipyardError::ResourceExhausted { .. })
    ));

    svc.cancel(&first);
    svc.wait(&first).await.unwrap();
    // The slot is released once the cancelled task has stopped.
    tokio::task::yield_now().await;
    assert!(svc.start("three", None).is_ok());
}

#[tokio::test]
async fn low_memory_refuses_new_work() {
    let agents = Agents::happy();
    let h = Harness::with(&agents, test_config(), Arc::new(OutOfMemory), Arc::new(Reachable(true)));

    let err = service(&h).start("anything", None).unwrap_err();
    assert!(matches!(err, ShipyardError::ResourceExhausted { ref resource, .. } if resource == "memory"));
}

#[tokio::test]
async fn failed_workflow_explains_itself() {
    let agents = Agents {
        tester: ScriptedAgent::always(test_fail()),
        ..Agents::happy()
    };
    let h = Harness::new(&agents);
    let svc = service(&h);

    let id = svc.start("never passes", None).unwrap();
    let outcome = svc.wait(&id).await.unwrap();

    assert_eq!(outcome.status, WorkflowStatus::Failed);
    assert_eq!(outcome.retry_count, 3);
    let error = outcome.error.unwrap();
    assert!(error.starts_with("test: "), "{error}");
    assert!(error.contains("more)"), "{error}");
}

#[tokio::test]
async fn only_the_newest_finished_results_are_kept() {
    let agents = Agents::happy();
    let config = EngineConfig {
        retained_results: 2,
        ..test_config()
    };
    let h = Harness::with(&agents, config, Arc::new(Healthy), Arc::new(Reachable(true)));
    let svc = service(&h);

    let ids: Vec<SessionId> = ["r1", "r2", "r3", "r4", "r5"].into_iter().map(sid).collect();
    for id in &ids {
        svc.start("ship it", Some(id.clone())).unwrap();
        assert!(svc.wait(id).await.unwrap().success);
    }

    assert!(svc.get_result(&ids[0]).is_none());
    assert!(svc.get_result(&ids[1]).is_none());
    for id in &ids[2..] {
        assert!(svc.get_result(id).is_some(), "{id} should still be known");
    }
    assert!(svc.active_sessions().is_empty());
}
