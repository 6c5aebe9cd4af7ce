//! Configuration loading and resolution
//!
//! Resolution follows a fixed priority order:
//! 1. Command-line overrides (highest priority)
//! 2. Environment variables
//! 3. TOML config file
//! 4. Compiled defaults (fallback)
//!
//! A missing TOML file is not an error: the service logs a warning and
//! starts on defaults plus environment.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::{Error, Result};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "RAV_CONFIG";

/// Complete service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub openai: OpenAiConfig,
    pub transcription: TranscriptionConfig,
    pub twilio: TwilioConfig,
    pub whatsapp: WhatsAppConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Expose internal error details in HTTP responses
    pub development: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5740,
            development: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_data_dir().join("rav.db"),
        }
    }
}

/// Bearer tokens accepted by the admin and cron endpoints
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuthConfig {
    /// Tokens allowed to run pipeline actions
    pub admin_tokens: Vec<String>,
    /// Tokens allowed to read diagnostics only
    pub readonly_tokens: Vec<String>,
    /// Shared secret for the scheduler entry point
    pub cron_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub extraction_model: String,
    pub timeout_secs: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            extraction_model: "gpt-4o-mini".to_string(),
            timeout_secs: 60,
        }
    }
}

/// Speech-to-text settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TranscriptionConfig {
    /// Key for the hosted service; falls back to `openai.api_key`
    pub api_key: Option<String>,
    pub model: String,
    /// Feature flag: route audio to the self-hosted server instead
    pub use_self_hosted: bool,
    pub self_hosted_url: String,
    pub timeout_secs: u64,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "whisper-1".to_string(),
            use_self_hosted: false,
            self_hosted_url: "http://127.0.0.1:8000/v1".to_string(),
            timeout_secs: 120,
        }
    }
}

/// Delivery channel for outbound contractor messages
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageChannel {
    #[default]
    Sms,
    Whatsapp,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TwilioConfig {
    pub account_sid: Option<String>,
    pub auth_token: Option<String>,
    pub sms_from: Option<String>,
    pub whatsapp_from: Option<String>,
    pub channel: MessageChannel,
    pub base_url: String,
}

impl Default for TwilioConfig {
    fn default() -> Self {
        Self {
            account_sid: None,
            auth_token: None,
            sms_from: None,
            whatsapp_from: None,
            channel: MessageChannel::Sms,
            base_url: "https://api.twilio.com/2010-04-01".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WhatsAppConfig {
    pub verify_token: Option<String>,
    pub access_token: Option<String>,
    pub graph_base_url: String,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            verify_token: None,
            access_token: None,
            graph_base_url: "https://graph.facebook.com/v18.0".to_string(),
        }
    }
}

/// Per-stage item limits for one batch run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StageLimits {
    pub transcriptions: u32,
    pub extractions: u32,
    pub assignments: u32,
    pub sms: u32,
    pub reminders: u32,
}

impl StageLimits {
    /// Fixed limits used by the scheduler entry point
    pub const CRON: StageLimits = StageLimits {
        transcriptions: 10,
        extractions: 10,
        assignments: 20,
        sms: 20,
        reminders: 20,
    };
}

impl Default for StageLimits {
    fn default() -> Self {
        Self {
            transcriptions: 5,
            extractions: 5,
            assignments: 10,
            sms: 10,
            reminders: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Defaults for admin-triggered runs
    pub default_limits: StageLimits,
    /// Hours a pending assignment waits before a reminder is sent
    pub reminder_after_hours: i64,
    pub max_reminders: i64,
    /// Failed sends before an assignment's delivery is marked failed
    pub max_send_attempts: i64,
    /// Extractor service failures before a transcript is given up on
    pub max_extraction_attempts: i64,
    /// Claims older than this are released back to their prior state
    pub stale_claim_minutes: i64,
    /// 0 disables the in-process scheduler
    pub scheduler_interval_secs: u64,
    pub worker_poll_secs: u64,
    pub job_max_attempts: i64,
    pub job_retry_backoff_secs: i64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_limits: StageLimits::default(),
            reminder_after_hours: 24,
            max_reminders: 2,
            max_send_attempts: 3,
            max_extraction_attempts: 3,
            stale_claim_minutes: 15,
            scheduler_interval_secs: 0,
            worker_poll_secs: 5,
            job_max_attempts: 3,
            job_retry_backoff_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Command-line overrides (highest priority tier)
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub port: Option<u16>,
    pub database_path: Option<PathBuf>,
}

impl AppConfig {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
    }

    /// Load from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Overlay environment variables using the given lookup
    ///
    /// Takes a lookup function so tests can supply a fixed environment.
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("RAV_PORT").and_then(|v| v.parse().ok()) {
            self.server.port = v;
        }
        if let Some(v) = get("RAV_DEVELOPMENT") {
            self.server.development = parse_flag(&v);
        }
        if let Some(v) = get("RAV_DATABASE_PATH") {
            self.database.path = PathBuf::from(v);
        }

        if let Some(v) = get("RAV_ADMIN_TOKENS") {
            self.auth.admin_tokens = split_list(&v);
        }
        if let Some(v) = get("RAV_READONLY_TOKENS") {
            self.auth.readonly_tokens = split_list(&v);
        }
        if let Some(v) = get("CRON_SECRET_KEY") {
            self.auth.cron_secret = Some(v);
        }

        if let Some(v) = get("OPENAI_API_KEY") {
            self.openai.api_key = Some(v);
        }
        if let Some(v) = get("RAV_STT_API_KEY") {
            self.transcription.api_key = Some(v);
        }
        if let Some(v) = get("USE_SELF_HOSTED_WHISPER") {
            self.transcription.use_self_hosted = parse_flag(&v);
        }
        if let Some(v) = get("SELF_HOSTED_WHISPER_URL") {
            self.transcription.self_hosted_url = v;
        }

        if let Some(v) = get("TWILIO_ACCOUNT_SID") {
            self.twilio.account_sid = Some(v);
        }
        if let Some(v) = get("TWILIO_AUTH_TOKEN") {
            self.twilio.auth_token = Some(v);
        }
        if let Some(v) = get("TWILIO_PHONE_NUMBER") {
            self.twilio.sms_from = Some(v);
        }
        if let Some(v) = get("TWILIO_WHATSAPP_NUMBER") {
            self.twilio.whatsapp_from = Some(v);
        }

        if let Some(v) = get("WHATSAPP_VERIFY_TOKEN") {
            self.whatsapp.verify_token = Some(v);
        }
        if let Some(v) = get("WHATSAPP_ACCESS_TOKEN") {
            self.whatsapp.access_token = Some(v);
        }
    }

    /// Overlay command-line arguments
    pub fn apply_cli(&mut self, cli: &CliOverrides) {
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        if let Some(path) = &cli.database_path {
            self.database.path = path.clone();
        }
    }

    /// Key used for speech-to-text requests
    pub fn transcription_api_key(&self) -> Option<&str> {
        self.transcription
            .api_key
            .as_deref()
            .or(self.openai.api_key.as_deref())
    }

    /// Reject configurations the service cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.max_send_attempts < 1 {
            return Err(Error::Config("pipeline.max_send_attempts must be >= 1".to_string()));
        }
        if self.pipeline.max_extraction_attempts < 1 {
            return Err(Error::Config(
                "pipeline.max_extraction_attempts must be >= 1".to_string(),
            ));
        }
        if self.pipeline.job_max_attempts < 1 {
            return Err(Error::Config("pipeline.job_max_attempts must be >= 1".to_string()));
        }
        if self.pipeline.reminder_after_hours < 0 {
            return Err(Error::Config("pipeline.reminder_after_hours must be >= 0".to_string()));
        }
        Ok(())
    }
}

/// Resolve configuration through all tiers
pub fn resolve(cli: &CliOverrides) -> Result<AppConfig> {
    let mut config = match locate_config_file(cli) {
        Some(path) if path.exists() => {
            info!("Loading configuration from {}", path.display());
            AppConfig::from_file(&path)?
        }
        Some(path) => {
            warn!("Config file not found at {}, using defaults", path.display());
            AppConfig::default()
        }
        None => {
            warn!("No config directory available, using defaults");
            AppConfig::default()
        }
    };

    config.apply_env_with(|key| std::env::var(key).ok());
    config.apply_cli(cli);
    config.validate()?;

    Ok(config)
}

/// Config file path: CLI argument, then `RAV_CONFIG`, then platform config dir
fn locate_config_file(cli: &CliOverrides) -> Option<PathBuf> {
    if let Some(path) = &cli.config_path {
        return Some(path.clone());
    }
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|d| d.join("renovation-advisor").join("rav.toml"))
}

/// OS-dependent default data folder
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("renovation-advisor"))
        .unwrap_or_else(|| PathBuf::from("./rav_data"))
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
