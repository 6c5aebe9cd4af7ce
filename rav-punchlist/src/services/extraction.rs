//! Task extraction from transcripts
//!
//! `OpenAiExtractor` asks a chat model for a JSON object of task items and
//! validates it against [`ExtractionPayload`] before anything reaches the
//! database. `KeywordExtractor` is a deterministic fallback used when no
//! model key is configured. Both run their output through [`normalize_item`].

use async_trait::async_trait;
use rav_common::config::OpenAiConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::models::{NewPunchListItem, Priority};
use crate::services::trades;

pub const KEYWORD_SERVICE_NAME: &str = "keyword-rules";

const SYSTEM_PROMPT: &str = r#"You turn a homeowner's voice note about their renovation into a punch list.

Return a JSON object with a single key "items", an array. Each element has:
- "description": short imperative description of one task (string, required)
- "room": the room or area it is in, lowercase (string or null)
- "trade_category": one of plumber, electrician, carpenter, painter, hvac, roofer, flooring, tile, drywall, landscaper, appliance, handyman, general_contractor (string or null)
- "priority": one of urgent, high, medium, low (default medium unless the speaker signals otherwise)
- "estimated_hours": rough labour estimate in hours (number or null)

Rules:
- One element per distinct task; split compound requests.
- Never invent tasks the speaker did not mention.
- Leaks, electrical hazards and anything unsafe are at least high priority.
- If the note contains no tasks, return {"items": []}."#;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Extraction not configured: {0}")]
    NotConfigured(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl ExtractionError {
    /// Service-side failures that may succeed on a later run; a reply that
    /// could not be parsed will not
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ExtractionError::Parse(_))
    }
}

/// What the extractor is given for one voice message
#[derive(Debug, Clone)]
pub struct ExtractionContext {
    pub transcript: String,
    pub project_name: Option<String>,
}

/// A normalised task, not yet tied to a project
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedItem {
    pub description: String,
    pub room: Option<String>,
    pub trade_category: Option<String>,
    pub priority: Priority,
    pub estimated_hours: Option<f64>,
}

impl ExtractedItem {
    pub fn into_new_item(self, project_id: i64, voice_message_id: i64) -> NewPunchListItem {
        NewPunchListItem {
            project_id,
            voice_message_id: Some(voice_message_id),
            description: self.description,
            room: self.room,
            trade_category: self.trade_category,
            priority: self.priority,
            estimated_hours: self.estimated_hours,
        }
    }
}

/// Expected shape of the model's JSON reply
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionPayload {
    pub items: Vec<RawExtractedItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawExtractedItem {
    pub description: String,
    #[serde(default)]
    pub room: Option<String>,
    #[serde(default)]
    pub trade_category: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub estimated_hours: Option<f64>,
}

/// Clean one raw item; `None` when it has no usable description
pub fn normalize_item(raw: RawExtractedItem) -> Option<ExtractedItem> {
    let description = raw.description.trim().to_string();
    if description.is_empty() {
        return None;
    }

    let trade_category = raw
        .trade_category
        .as_deref()
        .and_then(trades::normalize_trade)
        .or_else(|| trades::infer_trade(&description))
        .map(str::to_string);

    let room = raw
        .room
        .map(|r| r.trim().to_lowercase())
        .filter(|r| !r.is_empty() && r != "null" && r != "unknown");

    let priority = raw
        .priority
        .as_deref()
        .map(Priority::parse_lenient)
        .unwrap_or(Priority::Medium);

    let estimated_hours = raw.estimated_hours.filter(|h| h.is_finite() && *h >= 0.0);

    Some(ExtractedItem {
        description,
        room,
        trade_category,
        priority,
        estimated_hours,
    })
}

/// Turns transcript text into task items
#[async_trait]
pub trait TaskExtractor: Send + Sync {
    fn service_name(&self) -> &str;

    async fn extract(&self, context: &ExtractionContext) -> Result<Vec<ExtractedItem>, ExtractionError>;
}

/// Pull a JSON object out of a reply that may wrap it in prose or fences
fn json_object_in(content: &str) -> &str {
    let trimmed = content.trim();
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if end > start => &trimmed[start..=end],
        _ => trimmed,
    }
}

/// Parse and normalise a model reply
pub fn parse_model_reply(content: &str) -> Result<Vec<ExtractedItem>, ExtractionError> {
    let payload: ExtractionPayload = serde_json::from_str(json_object_in(content))
        .map_err(|e| ExtractionError::Parse(format!("model reply is not a valid item list: {}", e)))?;
    Ok(payload.items.into_iter().filter_map(normalize_item).collect())
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    response_format: ResponseFormat,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

/// Chat-completions extractor
pub struct OpenAiExtractor {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    service_name: String,
}

impl OpenAiExtractor {
    pub fn new(config: &OpenAiConfig) -> Result<Self, ExtractionError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| ExtractionError::NotConfigured("openai.api_key is not set".to_string()))?;
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ExtractionError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: config.base_url.clone(),
            api_key,
            model: config.extraction_model.clone(),
            service_name: format!("openai:{}", config.extraction_model),
        })
    }
}

#[async_trait]
impl TaskExtractor for OpenAiExtractor {
    fn service_name(&self) -> &str {
        &self.service_name
    }

    async fn extract(&self, context: &ExtractionContext) -> Result<Vec<ExtractedItem>, ExtractionError> {
        let user_prompt = match &context.project_name {
            Some(name) => format!("Project: {}\n\nVoice note transcript:\n{}", name, context.transcript),
            None => format!("Voice note transcript:\n{}", context.transcript),
        };

        let request = ChatRequest {
            model: &self.model,
            temperature: 0.1,
            response_format: ResponseFormat { kind: "json_object" },
            messages: vec![
                ChatMessage { role: "system", content: SYSTEM_PROMPT },
                ChatMessage { role: "user", content: &user_prompt },
            ],
        };

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ExtractionError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractionError::Api(status.as_u16(), body));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| ExtractionError::Parse(e.to_string()))?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ExtractionError::Parse("reply has no message content".to_string()))?;

        let items = parse_model_reply(&content)?;
        tracing::debug!(model = %self.model, items = items.len(), "Model extraction complete");
        Ok(items)
    }
}

const ROOM_KEYWORDS: &[&str] = &[
    "master bathroom",
    "laundry room",
    "living room",
    "dining room",
    "family room",
    "bathroom",
    "kitchen",
    "bedroom",
    "basement",
    "garage",
    "hallway",
    "attic",
    "office",
    "patio",
    "deck",
    "porch",
    "exterior",
];

fn detect_priority(lowered: &str) -> Option<Priority> {
    if ["urgent", "emergency", "asap", "immediately", "right away"]
        .iter()
        .any(|k| lowered.contains(k))
    {
        Some(Priority::Urgent)
    } else if lowered.contains("high priority") || lowered.contains("important") {
        Some(Priority::High)
    } else if ["low priority", "whenever", "no rush", "cosmetic"]
        .iter()
        .any(|k| lowered.contains(k))
    {
        Some(Priority::Low)
    } else if lowered.contains("medium priority") {
        Some(Priority::Medium)
    } else {
        None
    }
}

fn detect_room(lowered: &str) -> Option<String> {
    ROOM_KEYWORDS
        .iter()
        .find(|room| lowered.contains(*room))
        .map(|room| room.to_string())
}

/// Rule-based extractor: one item per sentence that names a task
///
/// Short fragments with no trade vocabulary ("High priority.", "In the
/// kitchen.") refine the previous item instead of becoming items.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordExtractor;

impl KeywordExtractor {
    pub fn extract_sync(&self, transcript: &str) -> Vec<ExtractedItem> {
        let mut items: Vec<ExtractedItem> = Vec::new();

        for sentence in transcript.split(['.', '!', '?', ';', '\n']) {
            let sentence = sentence.trim();
            if sentence.is_empty() {
                continue;
            }
            let lowered = sentence.to_lowercase();
            let trade = trades::infer_trade(sentence);
            let priority = detect_priority(&lowered);
            let room = detect_room(&lowered);
            let word_count = sentence.split_whitespace().count();

            if trade.is_none() && word_count < 4 {
                if let Some(previous) = items.last_mut() {
                    if let Some(p) = priority {
                        previous.priority = p;
                    }
                    if previous.room.is_none() {
                        previous.room = room;
                    }
                }
                continue;
            }

            let raw = RawExtractedItem {
                description: sentence.to_string(),
                room,
                trade_category: trade.map(str::to_string),
                priority: priority.map(|p| p.as_str().to_string()),
                estimated_hours: None,
            };
            if let Some(item) = normalize_item(raw) {
                items.push(item);
            }
        }

        items
    }
}

#[async_trait]
impl TaskExtractor for KeywordExtractor {
    fn service_name(&self) -> &str {
        KEYWORD_SERVICE_NAME
    }

    async fn extract(&self, context: &ExtractionContext) -> Result<Vec<ExtractedItem>, ExtractionError> {
        Ok(self.extract_sync(&context.transcript))
    }
}
