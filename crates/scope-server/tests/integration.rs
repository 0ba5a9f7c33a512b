use std::time::Duration;

use axum::http::StatusCode;
use http_body_util::BodyExt;
use scope_core::{
    ActionContext, ActionDefinition, ActionRegistry, Agent, AssignationStatus, Callable, ParamSpec,
    ParamType, ScopeConfig, YieldStream,
};
use serde_json::{json, Value};
use tower::ServiceExt;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn test_agent() -> Agent {
    let mut registry = ActionRegistry::new();
    registry
        .register(
            ActionDefinition::new(
                "capture_image",
                Callable::single_shot(|_, _| async { Ok(json!({"image_id": "img-1"})) }),
            )
            .describe("Capture a single frame")
            .tag("imaging"),
        )
        .unwrap();
    registry
        .register(
            ActionDefinition::new(
                "time_lapse",
                Callable::streaming(|args, _| {
                    let frames = args["num_frames"].as_u64().unwrap_or(0);
                    YieldStream::spawn(move |y| async move {
                        for frame in 0..frames {
                            y.send(json!({"frame": frame})).await?;
                        }
                        Ok(())
                    })
                }),
            )
            .param(ParamSpec::required("num_frames", ParamType::Integer))
            .tag("imaging"),
        )
        .unwrap();
    registry
        .register(
            ActionDefinition::new(
                "hold",
                Callable::single_shot(|_, ctx: ActionContext| async move {
                    ctx.sleep(Duration::from_secs(3600)).await?;
                    Ok(Value::Null)
                }),
            )
            .tag("test"),
        )
        .unwrap();
    Agent::new(registry, ScopeConfig::default())
}

async fn send(app: axum::Router, req: axum::http::Request<axum::body::Body>) -> (StatusCode, Value) {
    let response = app.oneshot(req).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

/// Send a GET request via `oneshot` and return (status, parsed JSON body).
async fn get(agent: &Agent, uri: &str) -> (StatusCode, Value) {
    let req = axum::http::Request::builder()
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap();
    send(scope_server::build_router(agent.clone()), req).await
}

/// Send a request with a JSON body and return (status, parsed JSON body).
async fn with_json(agent: &Agent, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
    let req = axum::http::Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(axum::body::Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();
    send(scope_server::build_router(agent.clone()), req).await
}

async fn delete(agent: &Agent, uri: &str) -> (StatusCode, Value) {
    let req = axum::http::Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap();
    send(scope_server::build_router(agent.clone()), req).await
}

async fn wait_for_status(agent: &Agent, id: &str, status: &str) -> Value {
    for _ in 0..1000 {
        let (_, json) = get(agent, &format!("/api/assignations/{id}")).await;
        if json["status"] == status {
            return json;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("assignation {id} never reached {status}");
}

// ---------------------------------------------------------------------------
// Status & actions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn status_reports_agent_summary() {
    let agent = test_agent();
    let (status, json) = get(&agent, "/api/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["actions"], 3);
    assert_eq!(json["state_version"], 0);
}

#[tokio::test]
async fn list_actions_in_registration_order() {
    let agent = test_agent();
    let (status, json) = get(&agent, "/api/actions").await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<_> = json
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["capture_image", "time_lapse", "hold"]);
}

#[tokio::test]
async fn list_actions_by_tag() {
    let agent = test_agent();
    let (_, json) = get(&agent, "/api/actions?tag=imaging").await;
    assert_eq!(json.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn get_action_returns_schema() {
    let agent = test_agent();
    let (status, json) = get(&agent, "/api/actions/time_lapse").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["kind"], "streaming");
    assert_eq!(json["params"][0]["name"], "num_frames");
    assert_eq!(json["params"][0]["type"], "integer");
}

#[tokio::test]
async fn get_unknown_action_is_404() {
    let agent = test_agent();
    let (status, _) = get(&agent, "/api/actions/warp_drive").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Assignations
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submit_returns_pending_snapshot_then_completes() {
    let agent = test_agent();
    let (status, json) = with_json(
        &agent,
        "POST",
        "/api/assignations",
        json!({"action": "capture_image", "args": {}, "reference": "ui-1"}),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["status"], "PENDING");
    assert_eq!(json["action"], "capture_image");
    assert_eq!(json["reference"], "ui-1");
    assert!(json["created_at"].is_string());

    let id = json["id"].as_str().unwrap();
    let done = wait_for_status(&agent, id, "DONE").await;
    assert_eq!(done["result"]["image_id"], "img-1");
}

#[tokio::test]
async fn submit_streaming_accumulates_yields() {
    let agent = test_agent();
    let (_, json) = with_json(
        &agent,
        "POST",
        "/api/assignations",
        json!({"action": "time_lapse", "args": {"num_frames": 3}}),
    )
    .await;
    let done = wait_for_status(&agent, json["id"].as_str().unwrap(), "DONE").await;
    assert_eq!(done["yields"].as_array().unwrap().len(), 3);
    assert_eq!(done["yields"][2]["frame"], 2);
    assert_eq!(done["result"], Value::Null);
}

#[tokio::test]
async fn submit_unknown_action_is_404() {
    let agent = test_agent();
    let (status, json) = with_json(
        &agent,
        "POST",
        "/api/assignations",
        json!({"action": "warp_drive"}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].as_str().unwrap().contains("warp_drive"));
}

#[tokio::test]
async fn submit_invalid_args_lists_every_violation() {
    let agent = test_agent();
    let (status, json) = with_json(
        &agent,
        "POST",
        "/api/assignations",
        json!({"action": "time_lapse", "args": {"num_frames": "three", "fps": 2}}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let kinds: Vec<_> = json["violations"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v["kind"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(kinds, vec!["wrong_type", "unexpected_argument"]);

    let (_, list) = get(&agent, "/api/assignations").await;
    assert_eq!(list.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn get_unknown_assignation_is_404() {
    let agent = test_agent();
    let (status, _) = get(
        &agent,
        "/api/assignations/00000000-0000-0000-0000-000000000000",
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cancel_running_then_cancel_again_conflicts() {
    let agent = test_agent();
    let (_, json) = with_json(&agent, "POST", "/api/assignations", json!({"action": "hold"})).await;
    let id = json["id"].as_str().unwrap().to_string();
    wait_for_status(&agent, &id, "RUNNING").await;

    let (status, _) = with_json(
        &agent,
        "POST",
        &format!("/api/assignations/{id}/cancel"),
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    wait_for_status(&agent, &id, "CANCELLED").await;

    let (status, json) = with_json(
        &agent,
        "POST",
        &format!("/api/assignations/{id}/cancel"),
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(json["error"].as_str().unwrap().contains("CANCELLED"));
}

#[tokio::test]
async fn timeout_ms_cancels_after_deadline() {
    let agent = test_agent();
    let (_, json) = with_json(
        &agent,
        "POST",
        "/api/assignations",
        json!({"action": "hold", "timeout_ms": 20}),
    )
    .await;
    wait_for_status(&agent, json["id"].as_str().unwrap(), "CANCELLED").await;
}

#[tokio::test]
async fn list_filters_by_status() {
    let agent = test_agent();
    let (_, done) = with_json(
        &agent,
        "POST",
        "/api/assignations",
        json!({"action": "capture_image"}),
    )
    .await;
    wait_for_status(&agent, done["id"].as_str().unwrap(), "DONE").await;
    let (_, held) = with_json(&agent, "POST", "/api/assignations", json!({"action": "hold"})).await;
    wait_for_status(&agent, held["id"].as_str().unwrap(), "RUNNING").await;

    let (status, json) = get(&agent, "/api/assignations?status=running").await;
    assert_eq!(status, StatusCode::OK);
    let list = json.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["id"], held["id"]);

    let (_, all) = get(&agent, "/api/assignations").await;
    assert_eq!(all[0]["id"], done["id"]);
    assert_eq!(all[1]["id"], held["id"]);
}

#[tokio::test]
async fn list_with_unknown_status_is_400() {
    let agent = test_agent();
    let (status, _) = get(&agent, "/api/assignations?status=sleeping").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn evict_only_terminal_assignations() {
    let agent = test_agent();
    let (_, held) = with_json(&agent, "POST", "/api/assignations", json!({"action": "hold"})).await;
    let id = held["id"].as_str().unwrap().to_string();
    wait_for_status(&agent, &id, "RUNNING").await;

    let (status, _) = delete(&agent, &format!("/api/assignations/{id}")).await;
    assert_eq!(status, StatusCode::CONFLICT);

    agent.cancel(id.parse().unwrap()).await.unwrap();
    wait_for_status(&agent, &id, "CANCELLED").await;
    let (status, json) = delete(&agent, &format!("/api/assignations/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "CANCELLED");

    let (status, _) = get(&agent, &format!("/api/assignations/{id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[tokio::test]
async fn state_write_is_readable_before_broadcast() {
    let agent = test_agent();
    let (status, json) = with_json(
        &agent,
        "PUT",
        "/api/state",
        json!({"path": "stage.position", "value": [1, 2, 3]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["published_version"], Value::Null);

    let (status, json) = get(&agent, "/api/state?path=stage.position").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["value"], json!([1, 2, 3]));
    assert_eq!(json["version"], 0);

    let (_, snapshot) = get(&agent, "/api/state").await;
    assert_eq!(snapshot["state"]["stage"]["position"], json!([1, 2, 3]));
    assert_eq!(agent.state().pending().await, 1);
}

#[tokio::test]
async fn immediate_write_publishes_a_version() {
    let agent = test_agent();
    let mut sub = agent.subscribe().await;
    let (_, json) = with_json(
        &agent,
        "PATCH",
        "/api/state",
        json!({"updates": {"a.b": 1, "a.c": 2}, "immediate": true}),
    )
    .await;
    assert_eq!(json["published_version"], 1);

    let event = sub.recv().await.unwrap();
    assert_eq!(event.kind(), "state_update");
}

#[tokio::test]
async fn state_missing_path_is_404() {
    let agent = test_agent();
    let (status, _) = get(&agent, "/api/state?path=nope.nothing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn state_invalid_path_is_400() {
    let agent = test_agent();
    let (status, _) = with_json(
        &agent,
        "PUT",
        "/api/state",
        json!({"path": "a..b", "value": 1}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn state_delete_removes_only_that_key() {
    let agent = test_agent();
    with_json(
        &agent,
        "PATCH",
        "/api/state",
        json!({"updates": {"stage.x": 1, "stage.y": 2}}),
    )
    .await;

    let (status, json) = delete(&agent, "/api/state/stage.x").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["removed"], 1);

    let (status, _) = get(&agent, "/api/state?path=stage.x").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, json) = get(&agent, "/api/state?path=stage.y").await;
    assert_eq!(json["value"], 2);

    let (status, _) = delete(&agent, "/api/state/stage.x").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn immediate_delete_publishes_the_removal() {
    let agent = test_agent();
    with_json(
        &agent,
        "PUT",
        "/api/state",
        json!({"path": "lasers.488", "value": 20, "immediate": true}),
    )
    .await;
    let mut sub = agent.subscribe().await;

    let (status, json) = delete(&agent, "/api/state/lasers.488?immediate=true").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["published_version"], 2);

    let Some(scope_core::Event::StateUpdate { version, removed, .. }) = sub.recv().await else {
        panic!("expected state_update");
    };
    assert_eq!(version, 2);
    assert_eq!(removed, vec!["lasers.488".to_string()]);
}

#[tokio::test]
async fn clear_removes_every_key() {
    let agent = test_agent();
    with_json(
        &agent,
        "PATCH",
        "/api/state",
        json!({"updates": {"stage.x": 1, "camera.exposure": 0.1}}),
    )
    .await;

    let (status, json) = delete(&agent, "/api/state").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["published_version"], Value::Null);

    let (_, snapshot) = get(&agent, "/api/state").await;
    assert_eq!(snapshot["state"], json!({}));
    assert_eq!(agent.state().flush().await, Some(1));
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[tokio::test]
async fn events_stream_starts_with_connected() {
    let agent = test_agent();
    let req = axum::http::Request::builder()
        .uri("/api/events")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = scope_server::build_router(agent.clone())
        .oneshot(req)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(agent.connections().subscriber_count().await, 1);

    let mut body = response.into_body();
    let frame = body.frame().await.unwrap().unwrap();
    let text = String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap();
    assert!(text.contains("event: connected"), "got {text}");

    agent.assign("capture_image", json!({}), None).await.unwrap();
    let frame = body.frame().await.unwrap().unwrap();
    let text = String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap();
    assert!(text.contains("event: assignation_created"), "got {text}");
    assert!(text.contains(&format!("\"status\":\"{}\"", AssignationStatus::Pending)));
}
