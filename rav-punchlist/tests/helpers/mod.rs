//! Shared fixtures for rav-punchlist integration tests
//!
//! Each test gets its own temp-dir SQLite database and in-process fakes for
//! the transcription and messaging adapters.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use rav_common::config::AppConfig;
use rav_punchlist::models::{Availability, NewContractor, NewProject, NewVoiceMessage, VoiceMessage};
use rav_punchlist::services::{
    DeliveryReceipt, ExtractedItem, ExtractionContext, ExtractionError, GatewayError, JobQueue,
    KeywordExtractor, MessageGateway, PunchListPipeline, TaskExtractor, Transcriber, Transcript,
    TranscriptionError,
};
use rav_punchlist::{build_router, db, AppState};
use serde_json::Value;
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tower::ServiceExt;

pub const ADMIN_TOKEN: &str = "test-admin-token";
pub const READONLY_TOKEN: &str = "test-viewer-token";
pub const CRON_SECRET: &str = "test-cron-secret";
pub const VERIFY_TOKEN: &str = "test-verify-token";
pub const HOMEOWNER_PHONE: &str = "+15550001000";

/// Returns a fixed transcript; audio URLs containing "fail" error out
pub struct FakeTranscriber {
    pub text: String,
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    fn service_name(&self) -> &str {
        "fake-whisper"
    }

    async fn transcribe(&self, message: &VoiceMessage) -> Result<Transcript, TranscriptionError> {
        if message.audio_url.contains("fail") {
            return Err(TranscriptionError::Network("connection reset".to_string()));
        }
        Ok(Transcript {
            text: self.text.clone(),
            confidence: Some(0.9),
            language: Some("en".to_string()),
            service_name: "fake-whisper".to_string(),
        })
    }
}

/// Records every message instead of sending it
#[derive(Default)]
pub struct RecordingGateway {
    pub sent: Mutex<Vec<(String, String)>>,
    /// Numbers that reject with a permanent error
    pub reject: Vec<String>,
}

impl RecordingGateway {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageGateway for RecordingGateway {
    async fn send(&self, to: &str, body: &str) -> Result<DeliveryReceipt, GatewayError> {
        if self.reject.iter().any(|n| n == to) {
            return Err(GatewayError::InvalidRecipient(to.to_string()));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push((to.to_string(), body.to_string()));
        Ok(DeliveryReceipt {
            message_sid: Some(format!("SM{}", sent.len())),
            status: Some("queued".to_string()),
        })
    }
}

/// Keyword extraction behind a service that fails its first `failures` calls
pub struct FlakyExtractor {
    pub failures: usize,
    pub error: fn() -> ExtractionError,
    pub calls: AtomicUsize,
}

impl FlakyExtractor {
    pub fn new(failures: usize, error: fn() -> ExtractionError) -> Self {
        Self {
            failures,
            error,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskExtractor for FlakyExtractor {
    fn service_name(&self) -> &str {
        "flaky-extractor"
    }

    async fn extract(&self, context: &ExtractionContext) -> Result<Vec<ExtractedItem>, ExtractionError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err((self.error)());
        }
        KeywordExtractor.extract(context).await
    }
}

pub fn rate_limited() -> ExtractionError {
    ExtractionError::Api(429, "rate limit exceeded".to_string())
}

pub struct TestApp {
    // Dropping the dir deletes the database
    pub _dir: TempDir,
    pub pool: SqlitePool,
    pub state: AppState,
    pub pipeline: Arc<PunchListPipeline>,
    pub gateway: Arc<RecordingGateway>,
}

pub fn test_config(dir: &TempDir) -> AppConfig {
    let mut config = AppConfig::default();
    config.database.path = dir.path().join("rav.db");
    config.auth.admin_tokens = vec![ADMIN_TOKEN.to_string()];
    config.auth.readonly_tokens = vec![READONLY_TOKEN.to_string()];
    config.auth.cron_secret = Some(CRON_SECRET.to_string());
    config.whatsapp.verify_token = Some(VERIFY_TOKEN.to_string());
    config
}

impl TestApp {
    pub async fn new(transcript: &str) -> Self {
        Self::with_gateway(transcript, RecordingGateway::default()).await
    }

    pub async fn with_gateway(transcript: &str, gateway: RecordingGateway) -> Self {
        Self::with_adapters(transcript, Arc::new(KeywordExtractor), gateway).await
    }

    pub async fn with_extractor(transcript: &str, extractor: Arc<dyn TaskExtractor>) -> Self {
        Self::with_adapters(transcript, extractor, RecordingGateway::default()).await
    }

    pub async fn with_adapters(
        transcript: &str,
        extractor: Arc<dyn TaskExtractor>,
        gateway: RecordingGateway,
    ) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let config = test_config(&dir);
        let pool = db::init_database_pool(&config.database.path)
            .await
            .expect("init database");

        let gateway = Arc::new(gateway);
        let pipeline = Arc::new(PunchListPipeline::new(
            pool.clone(),
            Arc::new(FakeTranscriber {
                text: transcript.to_string(),
            }),
            extractor,
            gateway.clone(),
            config.pipeline.clone(),
        ));
        let jobs = JobQueue::new(pool.clone(), config.pipeline.job_max_attempts);
        let state = AppState::new(pool.clone(), Arc::new(config), pipeline.clone(), jobs);

        Self {
            _dir: dir,
            pool,
            state,
            pipeline,
            gateway,
        }
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router().oneshot(request).await.expect("router response")
    }
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8_lossy(&bytes).to_string()
}

pub fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn get_request(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

pub fn assert_status(response: &Response<Body>, expected: StatusCode) {
    assert_eq!(response.status(), expected, "unexpected status");
}

pub async fn seed_project(pool: &SqlitePool, city: &str) -> i64 {
    db::projects::insert_project(
        pool,
        &NewProject {
            name: "Maple Street Remodel".to_string(),
            homeowner_id: Some("homeowner-1".to_string()),
            homeowner_phone: Some(HOMEOWNER_PHONE.to_string()),
            city: Some(city.to_string()),
            budget_range: Some("50k-100k".to_string()),
            timeline: Some("1-3 months".to_string()),
        },
    )
    .await
    .expect("insert project")
}

pub async fn seed_contractor(
    pool: &SqlitePool,
    name: &str,
    specialty: &str,
    city: &str,
    phone: &str,
    rating: f64,
) -> i64 {
    db::contractors::insert_contractor(
        pool,
        &NewContractor {
            business_name: name.to_string(),
            phone: Some(phone.to_string()),
            specialties: vec![specialty.to_string()],
            service_areas: vec![city.to_string()],
            price_range: None,
            availability_status: Availability::Available,
            rating: Some(rating),
            is_active: true,
        },
    )
    .await
    .expect("insert contractor")
}

pub async fn seed_voice_message(pool: &SqlitePool, project_id: i64, audio_url: &str) -> i64 {
    db::voice_messages::insert_voice_message(
        pool,
        &NewVoiceMessage {
            project_id: Some(project_id),
            sender_phone: Some(HOMEOWNER_PHONE.to_string()),
            external_id: Some(format!("ext-{}", audio_url)),
            audio_url: audio_url.to_string(),
            ..Default::default()
        },
    )
    .await
    .expect("insert voice message")
    .expect("not a duplicate")
}

pub async fn count(pool: &SqlitePool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(pool)
        .await
        .unwrap()
}

/// Assignments still holding an item (not declined, not undeliverable)
pub async fn active_assignments(pool: &SqlitePool, item_id: i64) -> i64 {
    sqlx::query_scalar(
        r#"SELECT COUNT(*) FROM punch_list_assignments
           WHERE punch_list_item_id = ? AND contractor_response NOT IN ('declined', 'undeliverable')"#,
    )
    .bind(item_id)
    .fetch_one(pool)
    .await
    .unwrap()
}
