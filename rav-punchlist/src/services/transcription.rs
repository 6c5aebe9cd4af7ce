//! Speech-to-text adapter
//!
//! Posts the voice message audio to an OpenAI-compatible
//! `/audio/transcriptions` endpoint. The same client serves the hosted API and
//! a self-hosted Whisper server; the feature flag in `[transcription]` picks
//! which one and what service name is recorded.

use async_trait::async_trait;
use rav_common::config::AppConfig;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::models::VoiceMessage;

pub const HOSTED_SERVICE_NAME: &str = "openai-whisper";
pub const SELF_HOSTED_SERVICE_NAME: &str = "self-hosted-whisper";

/// Scheme used for audio that lives behind the WhatsApp media API
pub const WHATSAPP_MEDIA_SCHEME: &str = "whatsapp-media://";

#[derive(Debug, Error)]
pub enum TranscriptionError {
    #[error("Transcription not configured: {0}")]
    NotConfigured(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Audio download returned no data")]
    EmptyAudio,

    #[error("Transcript is empty")]
    EmptyTranscript,
}

/// Downloaded audio ready for upload
#[derive(Debug, Clone)]
pub struct FetchedAudio {
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
}

/// Output of a successful transcription
#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    pub text: String,
    /// 0–1, derived from segment log-probabilities when the service reports them
    pub confidence: Option<f64>,
    pub language: Option<String>,
    pub service_name: String,
}

/// Retrieves the audio behind a voice message URL
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedAudio, TranscriptionError>;
}

/// Converts a stored voice message into text
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Name recorded on the transcription row
    fn service_name(&self) -> &str;

    /// False when credentials are missing; the stage then leaves messages untouched
    fn is_configured(&self) -> bool {
        true
    }

    async fn transcribe(&self, message: &VoiceMessage) -> Result<Transcript, TranscriptionError>;
}

fn network(e: reqwest::Error) -> TranscriptionError {
    TranscriptionError::Network(e.to_string())
}

async fn error_for_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, TranscriptionError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(TranscriptionError::Api(status.as_u16(), body))
}

/// Plain HTTP downloads plus the two-step WhatsApp media lookup
pub struct HttpMediaFetcher {
    http_client: reqwest::Client,
    graph_base_url: String,
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphMediaInfo {
    url: String,
    mime_type: Option<String>,
}

impl HttpMediaFetcher {
    pub fn new(
        graph_base_url: impl Into<String>,
        access_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, TranscriptionError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(network)?;
        Ok(Self {
            http_client,
            graph_base_url: graph_base_url.into(),
            access_token,
        })
    }

    async fn fetch_whatsapp_media(&self, media_id: &str) -> Result<FetchedAudio, TranscriptionError> {
        let token = self.access_token.as_deref().ok_or_else(|| {
            TranscriptionError::NotConfigured("whatsapp.access_token is not set".to_string())
        })?;

        let info_url = format!("{}/{}", self.graph_base_url.trim_end_matches('/'), media_id);
        tracing::debug!(media_id = %media_id, "Resolving WhatsApp media URL");

        let response = self
            .http_client
            .get(&info_url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(network)?;
        let info: GraphMediaInfo = error_for_status(response)
            .await?
            .json()
            .await
            .map_err(|e| TranscriptionError::Parse(e.to_string()))?;

        let response = self
            .http_client
            .get(&info.url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(network)?;
        let bytes = error_for_status(response).await?.bytes().await.map_err(network)?;

        Ok(FetchedAudio {
            bytes: bytes.to_vec(),
            mime_type: info.mime_type,
        })
    }
}

#[async_trait]
impl MediaFetcher for HttpMediaFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedAudio, TranscriptionError> {
        if let Some(media_id) = url.strip_prefix(WHATSAPP_MEDIA_SCHEME) {
            return self.fetch_whatsapp_media(media_id).await;
        }

        let response = self.http_client.get(url).send().await.map_err(network)?;
        let response = error_for_status(response).await?;
        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await.map_err(network)?;

        Ok(FetchedAudio {
            bytes: bytes.to_vec(),
            mime_type,
        })
    }
}

#[derive(Debug, Deserialize)]
struct VerboseTranscription {
    text: String,
    language: Option<String>,
    #[serde(default)]
    segments: Vec<TranscriptionSegment>,
}

#[derive(Debug, Deserialize)]
struct TranscriptionSegment {
    avg_logprob: Option<f64>,
}

/// `exp(mean(avg_logprob))` clamped to 0–1
fn confidence_from_segments(segments: &[TranscriptionSegment]) -> Option<f64> {
    let logprobs: Vec<f64> = segments
        .iter()
        .filter_map(|s| s.avg_logprob)
        .filter(|p| p.is_finite())
        .collect();
    if logprobs.is_empty() {
        return None;
    }
    let mean = logprobs.iter().sum::<f64>() / logprobs.len() as f64;
    Some(mean.exp().clamp(0.0, 1.0))
}

fn upload_file_name(mime_type: Option<&str>) -> &'static str {
    let essence = mime_type
        .and_then(|m| m.split(';').next())
        .map(str::trim)
        .unwrap_or("");
    match essence {
        "audio/mpeg" | "audio/mp3" => "voice.mp3",
        "audio/mp4" | "audio/m4a" | "audio/x-m4a" | "audio/aac" => "voice.m4a",
        "audio/wav" | "audio/x-wav" | "audio/wave" => "voice.wav",
        "audio/webm" => "voice.webm",
        _ => "voice.ogg",
    }
}

/// Whisper over an OpenAI-compatible HTTP API
pub struct WhisperTranscriber {
    http_client: reqwest::Client,
    fetcher: Arc<dyn MediaFetcher>,
    base_url: String,
    api_key: Option<String>,
    model: String,
    service_name: &'static str,
    self_hosted: bool,
}

impl WhisperTranscriber {
    pub fn from_config(
        config: &AppConfig,
        fetcher: Arc<dyn MediaFetcher>,
    ) -> Result<Self, TranscriptionError> {
        let settings = &config.transcription;
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(network)?;

        let (base_url, service_name) = if settings.use_self_hosted {
            (settings.self_hosted_url.clone(), SELF_HOSTED_SERVICE_NAME)
        } else {
            (config.openai.base_url.clone(), HOSTED_SERVICE_NAME)
        };

        Ok(Self {
            http_client,
            fetcher,
            base_url,
            api_key: config.transcription_api_key().map(str::to_string),
            model: settings.model.clone(),
            service_name,
            self_hosted: settings.use_self_hosted,
        })
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    fn service_name(&self) -> &str {
        self.service_name
    }

    fn is_configured(&self) -> bool {
        self.self_hosted || self.api_key.is_some()
    }

    async fn transcribe(&self, message: &VoiceMessage) -> Result<Transcript, TranscriptionError> {
        if !self.is_configured() {
            return Err(TranscriptionError::NotConfigured(
                "no speech-to-text API key".to_string(),
            ));
        }

        let audio = self.fetcher.fetch(&message.audio_url).await?;
        if audio.bytes.is_empty() {
            return Err(TranscriptionError::EmptyAudio);
        }

        let mime_type = audio
            .mime_type
            .clone()
            .or_else(|| message.mime_type.clone())
            .unwrap_or_else(|| "audio/ogg".to_string());
        let file_name = upload_file_name(Some(&mime_type));
        let audio_len = audio.bytes.len();

        let part = Part::bytes(audio.bytes)
            .file_name(file_name)
            .mime_str(&mime_type)
            .map_err(|e| TranscriptionError::Parse(e.to_string()))?;
        let form = Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("response_format", "verbose_json");

        let url = format!("{}/audio/transcriptions", self.base_url.trim_end_matches('/'));
        tracing::debug!(
            voice_message_id = message.id,
            bytes = audio_len,
            service = self.service_name,
            "Uploading audio for transcription"
        );

        let mut request = self.http_client.post(&url).multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await.map_err(network)?;

        let parsed: VerboseTranscription = error_for_status(response)
            .await?
            .json()
            .await
            .map_err(|e| TranscriptionError::Parse(e.to_string()))?;

        let text = parsed.text.trim().to_string();
        if text.is_empty() {
            return Err(TranscriptionError::EmptyTranscript);
        }

        Ok(Transcript {
            text,
            confidence: confidence_from_segments(&parsed.segments),
            language: parsed.language,
            service_name: self.service_name.to_string(),
        })
    }
}
