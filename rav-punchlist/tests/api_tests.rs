//! HTTP API integration tests
//!
//! Exercise the router in-process with `tower::ServiceExt::oneshot`.

mod helpers;

use axum::http::StatusCode;
use helpers::*;
use rav_punchlist::db;
use rav_punchlist::models::{NewPunchListItem, Priority, VoiceMessageStatus};
use serde_json::json;

async fn seed_plumbing_item(app: &TestApp) -> i64 {
    let project_id = seed_project(&app.pool, "Austin").await;
    db::items::insert_item(
        &app.pool,
        &NewPunchListItem {
            project_id,
            voice_message_id: None,
            description: "Replace kitchen faucet".to_string(),
            room: Some("kitchen".to_string()),
            trade_category: Some("plumber".to_string()),
            priority: Priority::High,
            estimated_hours: Some(2.0),
        },
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn test_health_needs_no_auth() {
    let app = TestApp::new("").await;
    let response = app.send(get_request("/health", None)).await;
    assert_status(&response, StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "rav-punchlist");
    assert_eq!(body["database"], true);
    assert_eq!(body["adapters"]["extractor"], "keyword-rules");
}

#[tokio::test]
async fn test_process_requires_token() {
    let app = TestApp::new("").await;
    let response = app
        .send(json_request("POST", "/api/punch-list/process", None, json!({"action": "process_pipeline"})))
        .await;
    assert_status(&response, StatusCode::UNAUTHORIZED);

    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Unauthorized");
    assert_eq!(body["code"], "UNAUTHORIZED");
    assert!(body["timestamp"].is_string());

    let response = app
        .send(json_request(
            "POST",
            "/api/punch-list/process",
            Some("not-a-token"),
            json!({"action": "process_pipeline"}),
        ))
        .await;
    assert_status(&response, StatusCode::UNAUTHORIZED);
    assert_eq!(count(&app.pool, "pipeline_runs").await, 0);
}

#[tokio::test]
async fn test_readonly_token_cannot_run_actions() {
    let app = TestApp::new("").await;
    let response = app
        .send(json_request(
            "POST",
            "/api/punch-list/process",
            Some(READONLY_TOKEN),
            json!({"action": "process_pipeline"}),
        ))
        .await;
    assert_status(&response, StatusCode::FORBIDDEN);
    assert_eq!(count(&app.pool, "pipeline_runs").await, 0);
}

#[tokio::test]
async fn test_bogus_action_is_rejected_before_processing() {
    let app = TestApp::new("some transcript").await;
    let project_id = seed_project(&app.pool, "Austin").await;
    let vm_id = seed_voice_message(&app.pool, project_id, "https://media.example/a.ogg").await;

    let response = app
        .send(json_request("POST", "/api/punch-list/process", Some(ADMIN_TOKEN), json!({"action": "bogus"})))
        .await;
    assert_status(&response, StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["code"], "BAD_REQUEST");

    assert_eq!(count(&app.pool, "pipeline_runs").await, 0);
    let message = db::voice_messages::get_voice_message(&app.pool, vm_id).await.unwrap().unwrap();
    assert_eq!(message.status, VoiceMessageStatus::Received);
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let app = TestApp::new("").await;
    let response = app
        .send(json_request("POST", "/api/punch-list/process", Some(ADMIN_TOKEN), json!({"limits": 3})))
        .await;
    assert_status(&response, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_process_pipeline_records_a_run() {
    let app = TestApp::new("").await;
    let response = app
        .send(json_request(
            "POST",
            "/api/punch-list/process",
            Some(ADMIN_TOKEN),
            json!({"action": "process_pipeline"}),
        ))
        .await;
    assert_status(&response, StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["action"], "process_pipeline");
    assert_eq!(body["results"]["stages"].as_array().unwrap().len(), 5);
    assert!(body["run_id"].is_string());
    assert_eq!(count(&app.pool, "pipeline_runs").await, 1);
}

#[tokio::test]
async fn test_limits_in_body_override_defaults() {
    let app = TestApp::new("the sink is clogged").await;
    let project_id = seed_project(&app.pool, "Austin").await;
    seed_voice_message(&app.pool, project_id, "https://media.example/a.ogg").await;
    seed_voice_message(&app.pool, project_id, "https://media.example/b.ogg").await;

    let response = app
        .send(json_request(
            "POST",
            "/api/punch-list/process",
            Some(ADMIN_TOKEN),
            json!({"action": "process_transcriptions", "limits": {"transcriptions": 1}}),
        ))
        .await;
    assert_status(&response, StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["results"]["stage"], "transcribe");
    assert_eq!(body["results"]["processed"], 1);
    assert_eq!(count(&app.pool, "voice_transcriptions").await, 1);
}

#[tokio::test]
async fn test_process_voice_message_validation() {
    let app = TestApp::new("").await;

    let response = app
        .send(json_request(
            "POST",
            "/api/punch-list/process",
            Some(ADMIN_TOKEN),
            json!({"action": "process_voice_message"}),
        ))
        .await;
    assert_status(&response, StatusCode::BAD_REQUEST);

    let response = app
        .send(json_request(
            "POST",
            "/api/punch-list/process",
            Some(ADMIN_TOKEN),
            json!({"action": "process_voice_message", "voice_message_id": 4242}),
        ))
        .await;
    assert_status(&response, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_diagnostics_for_readers() {
    let app = TestApp::new("").await;

    for action in ["status", "extraction_stats", "assignment_stats", "health"] {
        let uri = format!("/api/punch-list/process?action={}", action);
        let response = app.send(get_request(&uri, Some(READONLY_TOKEN))).await;
        assert_status(&response, StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["action"], action);
    }

    let response = app
        .send(get_request("/api/punch-list/process?action=status", Some(READONLY_TOKEN)))
        .await;
    let body = body_json(response).await;
    assert!(body["data"]["counts"]["voice_messages"].is_object());
    assert!(body["data"]["recent_runs"].is_array());

    let response = app
        .send(get_request("/api/punch-list/process?action=nope", Some(READONLY_TOKEN)))
        .await;
    assert_status(&response, StatusCode::BAD_REQUEST);

    let response = app.send(get_request("/api/punch-list/process?action=status", None)).await;
    assert_status(&response, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_cron_without_secret_writes_nothing() {
    let app = TestApp::new("a transcript").await;
    let project_id = seed_project(&app.pool, "Austin").await;
    let vm_id = seed_voice_message(&app.pool, project_id, "https://media.example/a.ogg").await;

    for auth in [None, Some("wrong-secret"), Some(ADMIN_TOKEN)] {
        let response = app
            .send(json_request("POST", "/api/cron/punch-list", auth, json!({})))
            .await;
        assert_status(&response, StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Unauthorized");
    }

    assert_eq!(count(&app.pool, "pipeline_runs").await, 0);
    assert_eq!(count(&app.pool, "voice_transcriptions").await, 0);
    let message = db::voice_messages::get_voice_message(&app.pool, vm_id).await.unwrap().unwrap();
    assert_eq!(message.status, VoiceMessageStatus::Received);
}

#[tokio::test]
async fn test_cron_runs_the_full_sweep() {
    let app = TestApp::new("").await;
    let response = app
        .send(
            axum::http::Request::builder()
                .method("POST")
                .uri("/api/cron/punch-list")
                .header("authorization", format!("Bearer {}", CRON_SECRET))
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await;
    assert_status(&response, StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["action"], "process_pipeline");
    let stages = body["stages"].as_array().unwrap();
    assert_eq!(stages.len(), 5);
    assert_eq!(stages[0]["stage"], "transcribe");
    assert_eq!(stages[0]["processed"], 0);
    assert!(body["duration_ms"].is_u64());
    assert_eq!(count(&app.pool, "pipeline_runs").await, 1);
}

#[tokio::test]
async fn test_cron_rejects_unknown_action() {
    let app = TestApp::new("").await;
    let response = app
        .send(json_request("POST", "/api/cron/punch-list", Some(CRON_SECRET), json!({"action": "bogus"})))
        .await;
    assert_status(&response, StatusCode::BAD_REQUEST);
    assert_eq!(count(&app.pool, "pipeline_runs").await, 0);
}

#[tokio::test]
async fn test_candidates_are_ranked() {
    let app = TestApp::new("").await;
    let item_id = seed_plumbing_item(&app).await;
    let best = seed_contractor(&app.pool, "Flow Right Plumbing", "plumber", "Austin", "+15550002000", 5.0).await;
    seed_contractor(&app.pool, "Pipe Dreams", "plumber", "Austin", "+15550003000", 3.0).await;
    seed_contractor(&app.pool, "Bright Sparks", "electrician", "Austin", "+15550004000", 5.0).await;

    let uri = format!("/api/punch-list/items/{}/candidates", item_id);
    let response = app.send(get_request(&uri, Some(READONLY_TOKEN))).await;
    assert_status(&response, StatusCode::OK);

    let body = body_json(response).await;
    let candidates = body["candidates"].as_array().unwrap();
    assert_eq!(candidates.len(), 2);
    assert_eq!(candidates[0]["contractor_id"], best);
    assert!(candidates[0]["score"].as_i64() >= candidates[1]["score"].as_i64());
    assert!(candidates[0]["reason"].as_str().unwrap().contains("Flow Right Plumbing"));

    let response = app
        .send(get_request(&format!("{}?limit=1", uri), Some(READONLY_TOKEN)))
        .await;
    let body = body_json(response).await;
    assert_eq!(body["candidates"].as_array().unwrap().len(), 1);

    let response = app
        .send(get_request("/api/punch-list/items/9999/candidates", Some(READONLY_TOKEN)))
        .await;
    assert_status(&response, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_manual_assignment() {
    let app = TestApp::new("").await;
    let item_id = seed_plumbing_item(&app).await;
    let first = seed_contractor(&app.pool, "Flow Right Plumbing", "plumber", "Austin", "+15550002000", 5.0).await;
    let second = seed_contractor(&app.pool, "Pipe Dreams", "plumber", "Austin", "+15550003000", 3.0).await;
    let uri = format!("/api/punch-list/items/{}/assign", item_id);

    let response = app
        .send(json_request("POST", &uri, Some(READONLY_TOKEN), json!({"contractor_id": first})))
        .await;
    assert_status(&response, StatusCode::FORBIDDEN);

    let response = app
        .send(json_request(
            "POST",
            &uri,
            Some(ADMIN_TOKEN),
            json!({"contractor_id": second, "reason": "Homeowner asked for them"}),
        ))
        .await;
    assert_status(&response, StatusCode::OK);
    let body = body_json(response).await;
    let assignment_id = body["assignment_id"].as_i64().unwrap();

    let assignment = db::assignments::get_assignment(&app.pool, assignment_id).await.unwrap().unwrap();
    assert_eq!(assignment.contractor_id, second);
    assert_eq!(assignment.assignment_reason.as_deref(), Some("Homeowner asked for them"));

    let response = app
        .send(json_request("POST", &uri, Some(ADMIN_TOKEN), json!({"contractor_id": first})))
        .await;
    assert_status(&response, StatusCode::CONFLICT);
    assert_eq!(active_assignments(&app.pool, item_id).await, 1);

    let response = app
        .send(json_request("POST", &uri, Some(ADMIN_TOKEN), json!({"contractor_id": 777})))
        .await;
    assert_status(&response, StatusCode::NOT_FOUND);
}
