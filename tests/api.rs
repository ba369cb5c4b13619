#![allow(missing_docs)]
// HTTP API tests driven through the router with tower's oneshot, no
// listener bound.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::util::ServiceExt;

use common::happy_orchestrator;
use labforge::api::{build_router, AppState};

fn router() -> Router {
    let state = Arc::new(AppState {
        orchestrator: happy_orchestrator(),
    });
    build_router(state, &["*".to_owned()])
}

async fn send(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = match body {
        Some(body) => Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&body).expect("serialize")))
            .expect("request"),
        None => Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .expect("request"),
    };

    let response = router.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = response.into_body().collect().await.expect("body").to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, value)
}

async fn create_lab(router: &Router, prompt: &str) -> String {
    let (status, body) = send(
        router,
        Method::POST,
        "/api/labs/create",
        Some(json!({"prompt": prompt, "dry_run": true})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "create failed: {body}");
    assert_eq!(body["status"], "planner_running");
    body["lab_id"].as_str().expect("lab_id").to_owned()
}

async fn poll_until(router: &Router, lab_id: &str, wanted: &str) -> Value {
    for _ in 0..500 {
        let (status, body) =
            send(router, Method::GET, &format!("/api/labs/{lab_id}/status"), None).await;
        assert_eq!(status, StatusCode::OK);
        let current = body["status"].as_str().expect("status").to_owned();
        if current == wanted {
            return body;
        }
        if current == "failed" {
            panic!("lab failed while waiting for {wanted}: {body}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("lab {lab_id} never reached {wanted}");
}

#[tokio::test]
async fn create_then_poll_to_completion() {
    let router = router();
    let lab_id = create_lab(&router, "Build a 2-router static-routing lab").await;

    let body = poll_until(&router, &lab_id, "completed").await;
    assert_eq!(body["lab_id"], lab_id.as_str());
    assert!(body["current_agent"].is_null());
    assert!(body["error"].is_null());
    assert_eq!(body["prompt"], "Build a 2-router static-routing lab");
    assert_eq!(
        body["progress"]["exercise_spec"]["title"],
        "Static Routing Basics"
    );
    assert_eq!(body["retry_count"], 0);

    // Timestamps are ISO-8601 and ordered.
    let created = body["created_at"].as_str().expect("created_at");
    let updated = body["updated_at"].as_str().expect("updated_at");
    let created = chrono::DateTime::parse_from_rfc3339(created).expect("rfc3339");
    let updated = chrono::DateTime::parse_from_rfc3339(updated).expect("rfc3339");
    assert!(updated >= created);

    // The pending queue never leaks into the payload.
    let raw = serde_json::to_string(&body).expect("serialize");
    assert!(!raw.contains("pending_messages"));

    // Conversation shape per the wire contract.
    let messages = body["conversation"]["messages"].as_array().expect("messages");
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(body["conversation"]["awaiting_user_input"], false);
}

#[tokio::test]
async fn get_and_status_return_the_same_payload() {
    let router = router();
    let lab_id = create_lab(&router, "Build a 2-router static-routing lab").await;
    poll_until(&router, &lab_id, "completed").await;

    let (status_a, by_status) =
        send(&router, Method::GET, &format!("/api/labs/{lab_id}/status"), None).await;
    let (status_b, by_id) = send(&router, Method::GET, &format!("/api/labs/{lab_id}"), None).await;
    assert_eq!(status_a, StatusCode::OK);
    assert_eq!(status_b, StatusCode::OK);
    assert_eq!(by_status["lab_id"], by_id["lab_id"]);
    assert_eq!(by_status["status"], by_id["status"]);
    assert_eq!(by_status["progress"], by_id["progress"]);
}

#[tokio::test]
async fn short_prompt_is_rejected_at_the_boundary() {
    let router = router();

    // 9 chars: rejected.
    let (status, body) = send(
        &router,
        Method::POST,
        "/api/labs/create",
        Some(json!({"prompt": "exactly 9"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().expect("error").contains("10"));

    // 10 chars: accepted.
    let (status, body) = send(
        &router,
        Method::POST,
        "/api/labs/create",
        Some(json!({"prompt": "exactly 10", "dry_run": true})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "10-char prompt should pass: {body}");
}

#[tokio::test]
async fn unknown_lab_is_404() {
    let router = router();

    let (status, body) = send(&router, Method::GET, "/api/labs/no-such-lab/status", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().expect("error").contains("not found"));

    let (status, _) = send(
        &router,
        Method::POST,
        "/api/labs/no-such-lab/message",
        Some(json!({"content": "hello there"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn empty_message_is_rejected() {
    let router = router();
    let lab_id = create_lab(&router, "Build a 2-router static-routing lab").await;

    let (status, body) = send(
        &router,
        Method::POST,
        &format!("/api/labs/{lab_id}/message"),
        Some(json!({"content": "   "})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().expect("error").contains("empty"));
}

#[tokio::test]
async fn message_to_finished_lab_is_rejected() {
    let router = router();
    let lab_id = create_lab(&router, "Build a 2-router static-routing lab").await;
    poll_until(&router, &lab_id, "completed").await;

    let (status, body) = send(
        &router,
        Method::POST,
        &format!("/api/labs/{lab_id}/message"),
        Some(json!({"content": "one more thing"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "status is completed");
}

#[tokio::test]
async fn list_is_newest_first_with_spec_titles() {
    let router = router();
    let first = create_lab(&router, "Build the first static-routing lab").await;
    poll_until(&router, &first, "completed").await;
    let second = create_lab(&router, "Build the second static-routing lab").await;
    poll_until(&router, &second, "completed").await;

    let (status, body) = send(&router, Method::GET, "/api/labs", None).await;
    assert_eq!(status, StatusCode::OK);
    let labs = body.as_array().expect("array");
    assert_eq!(labs.len(), 2);
    assert_eq!(labs[0]["lab_id"], second.as_str());
    assert_eq!(labs[1]["lab_id"], first.as_str());
    // Completed labs take their title from the exercise spec.
    assert_eq!(labs[0]["title"], "Static Routing Basics");
    assert_eq!(labs[0]["status"], "completed");
}

#[tokio::test]
async fn health_reports_lab_count() {
    let router = router();
    let (status, body) = send(&router, Method::GET, "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["labs"], 0);

    create_lab(&router, "Build a 2-router static-routing lab").await;
    let (_, body) = send(&router, Method::GET, "/api/health", None).await;
    assert_eq!(body["labs"], 1);
}
