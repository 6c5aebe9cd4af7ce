//! Pipeline orchestrator integration tests
//!
//! Drive the stages against a real SQLite file with fake transcription and
//! messaging adapters.

mod helpers;

use helpers::*;
use rav_common::config::StageLimits;
use rav_punchlist::db;
use rav_punchlist::models::{
    ContractorResponse, DeliveryStatus, ItemStatus, NewPunchListItem, NewVoiceMessage, Priority,
    VoiceMessageStatus,
};
use rav_punchlist::services::assignment::assign_manually;
use rav_punchlist::services::reply_parser::handle_reply;
use rav_punchlist::services::{ExtractionError, ManualAssignOutcome};
use sqlx::SqlitePool;
use std::sync::Arc;

const TOILET: &str = "toilet is leaking, needs new wax ring, high priority, bathroom";
const PLUMBER_PHONE: &str = "+15550002000";

async fn seed_item(app: &TestApp, project_id: i64, description: &str, trade: &str) -> i64 {
    seed_item_with_trade(app, project_id, description, Some(trade)).await
}

async fn seed_item_with_trade(
    app: &TestApp,
    project_id: i64,
    description: &str,
    trade: Option<&str>,
) -> i64 {
    db::items::insert_item(
        &app.pool,
        &NewPunchListItem {
            project_id,
            voice_message_id: None,
            description: description.to_string(),
            room: None,
            trade_category: trade.map(str::to_string),
            priority: Priority::Medium,
            estimated_hours: None,
        },
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn test_empty_pipeline_is_a_clean_no_op() {
    let app = TestApp::new(TOILET).await;

    let report = app.pipeline.process_pipeline(&StageLimits::CRON).await;

    assert_eq!(report.stages.len(), 5);
    for stage in &report.stages {
        assert_eq!(stage.processed, 0, "stage {}", stage.stage);
        assert_eq!(stage.errors, 0, "stage {}", stage.stage);
        assert!(stage.stage_error.is_none(), "stage {}", stage.stage);
    }
    assert_eq!(report.total_processed, 0);
    assert_eq!(report.total_errors, 0);
    assert_eq!(count(&app.pool, "punch_list_items").await, 0);
    assert_eq!(count(&app.pool, "punch_list_assignments").await, 0);
    assert!(app.gateway.sent().is_empty());
}

#[tokio::test]
async fn test_leaking_toilet_end_to_end() {
    let app = TestApp::new(TOILET).await;
    let project_id = seed_project(&app.pool, "Austin").await;
    let plumber = seed_contractor(&app.pool, "Flow Right Plumbing", "plumber", "Austin", PLUMBER_PHONE, 4.5).await;
    let vm_id = seed_voice_message(&app.pool, project_id, "https://media.example/vm1.ogg").await;

    let report = app.pipeline.process_voice_message(vm_id).await.unwrap();
    assert_eq!(report.total_errors, 0);

    let message = db::voice_messages::get_voice_message(&app.pool, vm_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.status, VoiceMessageStatus::Transcribed);

    let transcript = db::transcriptions::get_transcription(&app.pool, vm_id)
        .await
        .unwrap()
        .expect("transcript stored");
    assert_eq!(transcript.transcription_text, TOILET);
    assert_eq!(transcript.service_name, "fake-whisper");

    let items = db::items::list_for_voice_message(&app.pool, vm_id).await.unwrap();
    let item = items
        .iter()
        .find(|i| i.trade_category.as_deref() == Some("plumber"))
        .expect("plumbing item extracted");
    assert_eq!(item.priority, Priority::High);
    assert_eq!(item.status, ItemStatus::Assigned);

    let assignments = db::assignments::list_for_item(&app.pool, item.id).await.unwrap();
    assert_eq!(assignments.len(), 1);
    assert_eq!(assignments[0].contractor_id, plumber);
    assert_eq!(assignments[0].contractor_response, ContractorResponse::Pending);
    assert_eq!(assignments[0].delivery_status, DeliveryStatus::Sent);

    let sent = app.gateway.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, PLUMBER_PHONE);
    assert!(sent[0].1.contains(&format!("Ref #{}", assignments[0].id)));
}

#[tokio::test]
async fn test_processing_the_same_message_twice_changes_nothing() {
    let app = TestApp::new(TOILET).await;
    let project_id = seed_project(&app.pool, "Austin").await;
    seed_contractor(&app.pool, "Flow Right Plumbing", "plumber", "Austin", PLUMBER_PHONE, 4.5).await;
    let vm_id = seed_voice_message(&app.pool, project_id, "https://media.example/vm1.ogg").await;

    app.pipeline.process_voice_message(vm_id).await.unwrap();
    let second = app.pipeline.process_voice_message(vm_id).await.unwrap();

    assert_eq!(second.total_processed, 0);
    assert_eq!(count(&app.pool, "punch_list_items").await, 1);
    assert_eq!(count(&app.pool, "punch_list_assignments").await, 1);
    assert_eq!(app.gateway.sent().len(), 1);
}

#[tokio::test]
async fn test_unknown_voice_message_is_not_found() {
    let app = TestApp::new(TOILET).await;
    let err = app.pipeline.process_voice_message(999).await.unwrap_err();
    assert!(matches!(err, rav_common::Error::NotFound(_)));
}

#[tokio::test]
async fn test_one_failing_transcription_does_not_stop_the_batch() {
    let app = TestApp::new(TOILET).await;
    let project_id = seed_project(&app.pool, "Austin").await;
    let bad = seed_voice_message(&app.pool, project_id, "https://media.example/fail.ogg").await;
    let good = seed_voice_message(&app.pool, project_id, "https://media.example/ok.ogg").await;

    let report = app.pipeline.process_transcriptions(10).await.unwrap();

    assert_eq!(report.processed, 1);
    assert_eq!(report.errors, 1);
    assert_eq!(report.items.len(), 2);

    let bad = db::voice_messages::get_voice_message(&app.pool, bad).await.unwrap().unwrap();
    let good = db::voice_messages::get_voice_message(&app.pool, good).await.unwrap().unwrap();
    assert_eq!(bad.status, VoiceMessageStatus::Failed);
    assert!(bad.error_message.is_some());
    assert_eq!(good.status, VoiceMessageStatus::Transcribed);
}

#[tokio::test]
async fn test_concurrent_assignment_passes_create_one_active_assignment() {
    let app = TestApp::new(TOILET).await;
    let project_id = seed_project(&app.pool, "Austin").await;
    seed_contractor(&app.pool, "Flow Right Plumbing", "plumber", "Austin", PLUMBER_PHONE, 4.5).await;
    seed_contractor(&app.pool, "Pipe Dreams", "plumber", "Austin", "+15550003000", 4.0).await;
    let item_id = seed_item(&app, project_id, "Replace kitchen faucet", "plumber").await;

    let (a, b) = tokio::join!(
        app.pipeline.process_assignments(10),
        app.pipeline.process_assignments(10)
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.processed + b.processed, 1);
    assert_eq!(active_assignments(&app.pool, item_id).await, 1);
}

#[tokio::test]
async fn test_item_without_candidates_waits_as_pending() {
    let app = TestApp::new(TOILET).await;
    let project_id = seed_project(&app.pool, "Austin").await;
    seed_contractor(&app.pool, "Bright Sparks", "electrician", "Austin", PLUMBER_PHONE, 5.0).await;
    let item_id = seed_item(&app, project_id, "Replace kitchen faucet", "plumber").await;

    let report = app.pipeline.process_assignments(10).await.unwrap();
    assert_eq!(report.processed, 0);
    assert_eq!(report.errors, 0);

    let item = db::items::get_item(&app.pool, item_id).await.unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Pending);
    assert_eq!(count(&app.pool, "punch_list_assignments").await, 0);
}

#[tokio::test]
async fn test_declined_item_goes_to_the_next_contractor() {
    let app = TestApp::new(TOILET).await;
    let project_id = seed_project(&app.pool, "Austin").await;
    let best = seed_contractor(&app.pool, "Flow Right Plumbing", "plumber", "Austin", PLUMBER_PHONE, 5.0).await;
    let next = seed_contractor(&app.pool, "Pipe Dreams", "plumber", "Austin", "+15550003000", 3.0).await;
    let item_id = seed_item(&app, project_id, "Replace kitchen faucet", "plumber").await;

    app.pipeline.process_assignments(10).await.unwrap();
    app.pipeline.process_sms(10).await.unwrap();

    let update = handle_reply(&app.pool, PLUMBER_PHONE, "DECLINE").await.unwrap().unwrap();
    assert_eq!(update.contractor_id, best);
    assert_eq!(update.new_status, ContractorResponse::Declined);

    let item = db::items::get_item(&app.pool, item_id).await.unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Pending);

    app.pipeline.process_assignments(10).await.unwrap();

    let assignments = db::assignments::list_for_item(&app.pool, item_id).await.unwrap();
    assert_eq!(assignments.len(), 2);
    assert_eq!(assignments[0].contractor_id, best);
    assert_eq!(assignments[0].contractor_response, ContractorResponse::Declined);
    assert_eq!(assignments[1].contractor_id, next);
    assert_eq!(assignments[1].contractor_response, ContractorResponse::Pending);

    // Nobody left once the second contractor also declines
    app.pipeline.process_sms(10).await.unwrap();
    handle_reply(&app.pool, "+15550003000", "no").await.unwrap().unwrap();
    app.pipeline.process_assignments(10).await.unwrap();
    assert_eq!(active_assignments(&app.pool, item_id).await, 0);
}

#[tokio::test]
async fn test_permanent_gateway_error_fails_delivery_once() {
    let gateway = RecordingGateway {
        reject: vec![PLUMBER_PHONE.to_string()],
        ..Default::default()
    };
    let app = TestApp::with_gateway(TOILET, gateway).await;
    let project_id = seed_project(&app.pool, "Austin").await;
    seed_contractor(&app.pool, "Flow Right Plumbing", "plumber", "Austin", PLUMBER_PHONE, 4.5).await;
    let item_id = seed_item(&app, project_id, "Replace kitchen faucet", "plumber").await;

    app.pipeline.process_assignments(10).await.unwrap();
    let report = app.pipeline.process_sms(10).await.unwrap();
    assert_eq!(report.errors, 1);

    let assignments = db::assignments::list_for_item(&app.pool, item_id).await.unwrap();
    assert_eq!(assignments[0].delivery_status, DeliveryStatus::Failed);
    assert_eq!(assignments[0].contractor_response, ContractorResponse::Undeliverable);
    assert!(assignments[0].last_error.is_some());

    // Failed deliveries are not retried
    let again = app.pipeline.process_sms(10).await.unwrap();
    assert_eq!(again.items.len(), 0);
}

#[tokio::test]
async fn test_reminder_sent_for_unanswered_assignment() {
    let app = TestApp::new(TOILET).await;
    let project_id = seed_project(&app.pool, "Austin").await;
    seed_contractor(&app.pool, "Flow Right Plumbing", "plumber", "Austin", PLUMBER_PHONE, 4.5).await;
    let item_id = seed_item(&app, project_id, "Replace kitchen faucet", "plumber").await;

    app.pipeline.process_assignments(10).await.unwrap();
    app.pipeline.process_sms(10).await.unwrap();

    // Not due yet
    let report = app.pipeline.send_reminders(10).await.unwrap();
    assert_eq!(report.processed, 0);

    sqlx::query("UPDATE punch_list_assignments SET sent_at = '2020-01-01T00:00:00.000Z'")
        .execute(&app.pool)
        .await
        .unwrap();

    let report = app.pipeline.send_reminders(10).await.unwrap();
    assert_eq!(report.processed, 1);

    let sent = app.gateway.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent[1].1.starts_with("⏰ Reminder #1"));

    let assignments = db::assignments::list_for_item(&app.pool, item_id).await.unwrap();
    assert_eq!(assignments[0].reminder_count, 1);
    assert!(assignments[0].last_reminder_at.is_some());

    // Reminder just sent, so the next pass has nothing due
    let report = app.pipeline.send_reminders(10).await.unwrap();
    assert_eq!(report.processed, 0);
}

/// `(status, attempts)` of a voice message's extraction run
async fn extraction_run(pool: &SqlitePool, voice_message_id: i64) -> (String, i64) {
    sqlx::query_as("SELECT status, attempts FROM extraction_runs WHERE voice_message_id = ?")
        .bind(voice_message_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_parked_backlog_does_not_starve_new_items() {
    let app = TestApp::new(TOILET).await;
    let project_id = seed_project(&app.pool, "Austin").await;
    seed_contractor(&app.pool, "Flow Right Plumbing", "plumber", "Austin", PLUMBER_PHONE, 4.5).await;

    let batch = StageLimits::CRON.assignments;
    for n in 0..batch {
        seed_item_with_trade(&app, project_id, &format!("Strange noise #{}", n), None).await;
    }
    app.pipeline.process_pipeline(&StageLimits::CRON).await;

    let fresh = seed_item(&app, project_id, "Replace kitchen faucet", "plumber").await;
    app.pipeline.process_pipeline(&StageLimits::CRON).await;

    let item = db::items::get_item(&app.pool, fresh).await.unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Assigned);
    assert_eq!(active_assignments(&app.pool, fresh).await, 1);
}

#[tokio::test]
async fn test_parked_items_take_turns() {
    let app = TestApp::new(TOILET).await;
    let project_id = seed_project(&app.pool, "Austin").await;
    for n in 0..3 {
        seed_item_with_trade(&app, project_id, &format!("Strange noise #{}", n), None).await;
    }

    app.pipeline.process_assignments(2).await.unwrap();
    app.pipeline.process_assignments(2).await.unwrap();

    let never_tried: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM punch_list_items WHERE last_assign_attempt_at IS NULL",
    )
    .fetch_one(&app.pool)
    .await
    .unwrap();
    assert_eq!(never_tried, 0);
}

#[tokio::test]
async fn test_rate_limited_extraction_is_retried() {
    let extractor = Arc::new(FlakyExtractor::new(1, rate_limited));
    let app = TestApp::with_extractor(TOILET, extractor.clone()).await;
    let project_id = seed_project(&app.pool, "Austin").await;
    seed_contractor(&app.pool, "Flow Right Plumbing", "plumber", "Austin", PLUMBER_PHONE, 4.5).await;
    let vm_id = seed_voice_message(&app.pool, project_id, "https://media.example/vm1.ogg").await;

    let first = app.pipeline.process_voice_message(vm_id).await.unwrap();
    assert_eq!(first.total_errors, 1);
    assert_eq!(count(&app.pool, "punch_list_items").await, 0);
    assert_eq!(extraction_run(&app.pool, vm_id).await, ("retry".to_string(), 1));

    let second = app.pipeline.process_voice_message(vm_id).await.unwrap();
    assert_eq!(second.total_errors, 0);
    assert_eq!(extractor.calls(), 2);

    let items = db::items::list_for_voice_message(&app.pool, vm_id).await.unwrap();
    assert!(!items.is_empty());
    assert_eq!(extraction_run(&app.pool, vm_id).await.0, "completed");
}

#[tokio::test]
async fn test_extraction_gives_up_after_max_attempts() {
    fn refused() -> ExtractionError {
        ExtractionError::Network("connection refused".to_string())
    }
    let extractor = Arc::new(FlakyExtractor::new(usize::MAX, refused));
    let app = TestApp::with_extractor(TOILET, extractor.clone()).await;
    let project_id = seed_project(&app.pool, "Austin").await;
    let vm_id = seed_voice_message(&app.pool, project_id, "https://media.example/vm1.ogg").await;
    app.pipeline.process_transcriptions(10).await.unwrap();

    let max = app.pipeline.settings().max_extraction_attempts;
    for _ in 0..max {
        let report = app.pipeline.process_extractions(10).await.unwrap();
        assert_eq!(report.errors, 1);
    }

    let after = app.pipeline.process_extractions(10).await.unwrap();
    assert_eq!(after.items.len(), 0);
    assert_eq!(extractor.calls(), max as usize);
    assert_eq!(extraction_run(&app.pool, vm_id).await, ("failed".to_string(), max));
}

#[tokio::test]
async fn test_unparseable_extraction_is_not_retried() {
    fn garbled() -> ExtractionError {
        ExtractionError::Parse("model reply is not a valid item list".to_string())
    }
    let extractor = Arc::new(FlakyExtractor::new(usize::MAX, garbled));
    let app = TestApp::with_extractor(TOILET, extractor.clone()).await;
    let project_id = seed_project(&app.pool, "Austin").await;
    let vm_id = seed_voice_message(&app.pool, project_id, "https://media.example/vm1.ogg").await;
    app.pipeline.process_transcriptions(10).await.unwrap();

    let report = app.pipeline.process_extractions(10).await.unwrap();
    assert_eq!(report.errors, 1);
    assert_eq!(extraction_run(&app.pool, vm_id).await.0, "failed");

    let again = app.pipeline.process_extractions(10).await.unwrap();
    assert_eq!(again.items.len(), 0);
    assert_eq!(extractor.calls(), 1);
}

#[tokio::test]
async fn test_voice_message_without_project_fails_extraction() {
    let app = TestApp::new(TOILET).await;
    let vm_id = db::voice_messages::insert_voice_message(
        &app.pool,
        &NewVoiceMessage {
            sender_phone: Some("+15550009999".to_string()),
            external_id: Some("orphan-1".to_string()),
            audio_url: "https://media.example/orphan.ogg".to_string(),
            ..Default::default()
        },
    )
    .await
    .unwrap()
    .unwrap();

    app.pipeline.process_transcriptions(10).await.unwrap();
    let report = app.pipeline.process_extractions(10).await.unwrap();
    assert_eq!(report.errors, 1);
    assert_eq!(report.items[0].detail.as_deref(), Some("voice message has no project"));
    assert_eq!(extraction_run(&app.pool, vm_id).await.0, "failed");
    assert_eq!(count(&app.pool, "punch_list_items").await, 0);

    let again = app.pipeline.process_extractions(10).await.unwrap();
    assert_eq!(again.items.len(), 0);
}

async fn undeliverable_to_best(app: &TestApp) -> (i64, i64, i64) {
    let project_id = seed_project(&app.pool, "Austin").await;
    let best = seed_contractor(&app.pool, "Flow Right Plumbing", "plumber", "Austin", PLUMBER_PHONE, 5.0).await;
    let next = seed_contractor(&app.pool, "Pipe Dreams", "plumber", "Austin", "+15550003000", 3.0).await;
    let item_id = seed_item(app, project_id, "Replace kitchen faucet", "plumber").await;

    app.pipeline.process_assignments(10).await.unwrap();
    let report = app.pipeline.process_sms(10).await.unwrap();
    assert_eq!(report.errors, 1);
    (item_id, best, next)
}

fn rejecting_plumber() -> RecordingGateway {
    RecordingGateway {
        reject: vec![PLUMBER_PHONE.to_string()],
        ..Default::default()
    }
}

#[tokio::test]
async fn test_undeliverable_assignment_goes_to_the_next_contractor() {
    let app = TestApp::with_gateway(TOILET, rejecting_plumber()).await;
    let (item_id, best, next) = undeliverable_to_best(&app).await;

    let item = db::items::get_item(&app.pool, item_id).await.unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Pending);
    assert_eq!(active_assignments(&app.pool, item_id).await, 0);

    app.pipeline.process_assignments(10).await.unwrap();
    app.pipeline.process_sms(10).await.unwrap();

    let assignments = db::assignments::list_for_item(&app.pool, item_id).await.unwrap();
    assert_eq!(assignments.len(), 2);
    assert_eq!(assignments[0].contractor_id, best);
    assert_eq!(assignments[1].contractor_id, next);
    assert_eq!(assignments[1].delivery_status, DeliveryStatus::Sent);

    let sent = app.gateway.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "+15550003000");
}

#[tokio::test]
async fn test_manual_assignment_allowed_after_failed_delivery() {
    let app = TestApp::with_gateway(TOILET, rejecting_plumber()).await;
    let (item_id, _, next) = undeliverable_to_best(&app).await;

    let outcome = assign_manually(&app.pool, item_id, next, Some("reachable by phone"))
        .await
        .unwrap();
    assert!(matches!(outcome, ManualAssignOutcome::Assigned { .. }));

    let item = db::items::get_item(&app.pool, item_id).await.unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Assigned);
}
