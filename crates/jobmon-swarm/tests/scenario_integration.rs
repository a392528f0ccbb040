//! §8 scenario 5 (cold resume) and scenario 6 (concurrency cap), exercised
//! against a scripted fake of the state service's HTTP surface. Grounded on
//! the `sweengineeringlabs-swe-cloud` pack repo's integration-test style
//! (spin up a fake server, drive the real client against it) — here the fake
//! server is a `wiremock::MockServer` standing in for `jobmon-state`, since
//! the repository layer has no harness for a real Postgres instance.

use std::collections::HashMap;
use std::time::Duration;

use jobmon_core::client::Requester;
use jobmon_core::constants::{TaskStatus, WorkflowRunStatus};
use jobmon_swarm::{build_from_workflow_id, run, OrchestratorConfig, ServerGateway};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn gateway_against(server: &MockServer) -> ServerGateway {
    let requester = Requester::new(server.uri(), Duration::from_secs(5));
    ServerGateway::new(requester)
}

/// The concurrency cap asserted in each test comes from the workflow's own
/// `max_concurrently_running`, returned by the `get_max_concurrently_running`
/// mock and carried on `SwarmState`, not from `OrchestratorConfig` itself.
fn base_config(workflow_id: i64, workflow_run_id: i64) -> OrchestratorConfig {
    let mut queue_ids = HashMap::new();
    queue_ids.insert("default".to_string(), 7);
    OrchestratorConfig {
        workflow_id,
        workflow_run_id,
        cluster_id: 1,
        task_resources_type_id: 1,
        queue_ids,
        poll_interval: Duration::from_millis(1),
        wedged_workflow_sync_interval: Duration::from_secs(600),
        per_tick_scheduling_timeout: Duration::from_secs(5),
        triage_interval: Duration::from_secs(90),
        heartbeat_buffer: 3.0,
        fail_fast: false,
    }
}

/// Scenario 5: a workflow resumed with one task already DONE and its one
/// downstream ready to run. The orchestrator should queue the downstream and
/// converge to DONE in a single tick once the fake gateway reports it
/// finished.
#[tokio::test]
async fn cold_resume_converges_a_partially_complete_workflow_to_done() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/workflow/1/get_max_concurrently_running"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"max_concurrently_running": 5})))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/workflow/1/get_edges"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"edges": [[20, 10]]})))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/workflow/get_tasks/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "tasks": {
                "1": {
                    "node_id": 10, "array_id": null, "status": "DONE", "max_attempts": 3,
                    "resource_scales": {}, "fallback_queues": [], "requested_resources": {"cores": 1},
                    "cluster_name": "dummy", "queue_name": "default", "max_concurrently_running": 5
                },
                "2": {
                    "node_id": 20, "array_id": null, "status": "REGISTERING", "max_attempts": 3,
                    "resource_scales": {}, "fallback_queues": [], "requested_resources": {"cores": 1},
                    "cluster_name": "dummy", "queue_name": "default", "max_concurrently_running": 5
                }
            }
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/workflow_run/1/log_heartbeat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "RUNNING"})))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/workflow_run/1/distributor_alive"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"alive": true})))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/workflow/1/task_status_updates"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "time": "2026-01-01T00:00:00Z",
            "tasks_by_status": {"DONE": [1]}
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/workflow_run/1/set_status_for_triaging"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "ok"})))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/task/bind_resources"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"task_resources_id": 99})))
        .mount(&server)
        .await;

    // the fake distributor/worker pair completes the task instantly so the
    // orchestrator can reach termination within one tick.
    Mock::given(method("POST"))
        .and(path("/array/0/queue_task_batch"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "tasks_by_status": {"DONE": [2]}
        })))
        .mount(&server)
        .await;

    let gateway = gateway_against(&server).await;
    let mut state = build_from_workflow_id(&gateway, 1, 1).await.unwrap();
    assert_eq!(state.num_previously_complete, 1);
    assert_eq!(state.tasks[&2].num_upstreams_done, 1);

    let (_tx, rx) = tokio::sync::watch::channel(false);
    let config = base_config(1, 1);
    let result = run(&gateway, &mut state, &config, rx).await.unwrap();

    assert_eq!(result.final_status, WorkflowRunStatus::Done);
    assert_eq!(result.num_done, 2);
    assert_eq!(result.num_previously_complete, 1);
    assert_eq!(state.tasks[&2].status, TaskStatus::Done);
}

/// Scenario 6: two independent, immediately-ready tasks under a
/// workflow-wide cap of one concurrently running task. Only one should be
/// queued in the first tick; the other stays parked in `ready_to_run`.
#[tokio::test]
async fn workflow_concurrency_cap_limits_one_tick_to_one_batch() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/workflow/2/get_max_concurrently_running"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"max_concurrently_running": 1})))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/workflow/2/get_edges"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"edges": []})))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/workflow/get_tasks/2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "tasks": {
                "10": {
                    "node_id": 100, "array_id": null, "status": "REGISTERING", "max_attempts": 3,
                    "resource_scales": {}, "fallback_queues": [], "requested_resources": {"cores": 1},
                    "cluster_name": "dummy", "queue_name": "default", "max_concurrently_running": 1
                },
                "11": {
                    "node_id": 101, "array_id": null, "status": "REGISTERING", "max_attempts": 3,
                    "resource_scales": {}, "fallback_queues": [], "requested_resources": {"cores": 1},
                    "cluster_name": "dummy", "queue_name": "default", "max_concurrently_running": 1
                }
            }
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/workflow_run/2/log_heartbeat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "RUNNING"})))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/workflow_run/2/distributor_alive"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"alive": true})))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/workflow/2/task_status_updates"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "time": "2026-01-01T00:00:00Z",
            "tasks_by_status": {}
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/workflow_run/2/set_status_for_triaging"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "ok"})))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/task/bind_resources"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"task_resources_id": 55})))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/array/0/queue_task_batch"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "tasks_by_status": {"QUEUED": [10]}
        })))
        .mount(&server)
        .await;

    let gateway = gateway_against(&server).await;
    let mut state = build_from_workflow_id(&gateway, 2, 2).await.unwrap();
    assert_eq!(state.ready_to_run.len(), 2);

    let (tx, rx) = tokio::sync::watch::channel(false);
    let config = base_config(2, 2);

    // the fake gateway never reports either task finishing, so capacity
    // never frees up and at most one of the two ever gets queued no matter
    // how many ticks run; the loop is stopped the same way a Ctrl-C
    // shutdown would stop it, since there's no distributor here to let the
    // run reach termination on its own.
    let handle = tokio::spawn(async move { run(&gateway, &mut state, &config, rx).await });
    tokio::time::sleep(Duration::from_millis(200)).await;
    tx.send(true).unwrap();
    let result = handle.await.unwrap().unwrap();

    assert_eq!(result.final_status, WorkflowRunStatus::Stopped);
    let queued = result
        .task_statuses
        .values()
        .filter(|s| **s == TaskStatus::Queued)
        .count();
    let still_registering = result
        .task_statuses
        .values()
        .filter(|s| **s == TaskStatus::Registering)
        .count();
    assert_eq!(queued, 1);
    assert_eq!(still_registering, 1);
}
