//! Outbound contractor messaging
//!
//! Message bodies are rendered from per-priority templates; delivery goes
//! through a [`MessageGateway`]. Every body ends with the reply instructions
//! and the assignment reference the reply parser understands.

use async_trait::async_trait;
use rav_common::config::{MessageChannel, TwilioConfig};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use crate::models::Priority;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Messaging not configured: {0}")]
    NotConfigured(String),

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl GatewayError {
    /// Errors that will fail again on every retry
    pub fn is_permanent(&self) -> bool {
        matches!(self, GatewayError::InvalidRecipient(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub message_sid: Option<String>,
    pub status: Option<String>,
}

#[async_trait]
pub trait MessageGateway: Send + Sync {
    fn is_configured(&self) -> bool {
        true
    }

    async fn send(&self, to: &str, body: &str) -> Result<DeliveryReceipt, GatewayError>;
}

/// Facts a contractor needs to decide on a job
#[derive(Debug, Clone)]
pub struct MessageContext<'a> {
    pub assignment_id: i64,
    pub contractor_name: &'a str,
    pub project_name: &'a str,
    pub city: Option<&'a str>,
    pub description: &'a str,
    pub room: Option<&'a str>,
    pub priority: Priority,
    pub estimated_hours: Option<f64>,
}

fn job_lines(ctx: &MessageContext<'_>) -> String {
    let mut lines = vec![format!("Task: {}", ctx.description)];
    let location = match (ctx.room, ctx.city) {
        (Some(room), Some(city)) => format!("{} ({}, {})", ctx.project_name, room, city),
        (Some(room), None) => format!("{} ({})", ctx.project_name, room),
        (None, Some(city)) => format!("{} ({})", ctx.project_name, city),
        (None, None) => ctx.project_name.to_string(),
    };
    lines.push(format!("Where: {}", location));
    if let Some(hours) = ctx.estimated_hours {
        lines.push(format!("Est. time: {:.1}h", hours));
    }
    lines.join("\n")
}

fn reply_footer(assignment_id: i64) -> String {
    format!(
        "Reply ACCEPT or DECLINE, then DONE once the work is finished. \
         Ref #{id} (add #{id} to your reply if you have several jobs with us)",
        id = assignment_id
    )
}

/// Body for a new assignment, worded by priority
pub fn render_assignment_message(ctx: &MessageContext<'_>) -> String {
    let header = match ctx.priority {
        Priority::Urgent => format!(
            "🚨 URGENT job for {}: needs attention today.",
            ctx.contractor_name
        ),
        Priority::High => format!(
            "⚠️ High-priority job for {}: please respond soon.",
            ctx.contractor_name
        ),
        Priority::Medium => format!("🔧 New job for {}.", ctx.contractor_name),
        Priority::Low => format!(
            "📋 Low-priority job for {} when you have an opening.",
            ctx.contractor_name
        ),
    };

    format!("{}\n{}\n{}", header, job_lines(ctx), reply_footer(ctx.assignment_id))
}

/// Body for a reminder about an unanswered assignment
pub fn render_reminder_message(ctx: &MessageContext<'_>, reminder_number: i64) -> String {
    format!(
        "⏰ Reminder #{} for {}: we're still waiting on your answer.\n{}\n{}",
        reminder_number,
        ctx.contractor_name,
        job_lines(ctx),
        reply_footer(ctx.assignment_id)
    )
}

#[derive(Debug, Deserialize)]
struct TwilioMessage {
    sid: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TwilioError {
    message: Option<String>,
    code: Option<i64>,
}

/// Twilio Messages API (SMS or WhatsApp)
pub struct TwilioGateway {
    http_client: reqwest::Client,
    base_url: String,
    account_sid: Option<String>,
    auth_token: Option<String>,
    from: Option<String>,
    channel: MessageChannel,
}

impl TwilioGateway {
    pub fn new(config: &TwilioConfig) -> Result<Self, GatewayError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        let from = match config.channel {
            MessageChannel::Sms => config.sms_from.clone(),
            MessageChannel::Whatsapp => config.whatsapp_from.clone(),
        };

        Ok(Self {
            http_client,
            base_url: config.base_url.clone(),
            account_sid: config.account_sid.clone(),
            auth_token: config.auth_token.clone(),
            from,
            channel: config.channel,
        })
    }

    fn address(&self, number: &str) -> String {
        match self.channel {
            MessageChannel::Sms => number.to_string(),
            MessageChannel::Whatsapp => format!("whatsapp:{}", number),
        }
    }
}

#[async_trait]
impl MessageGateway for TwilioGateway {
    fn is_configured(&self) -> bool {
        self.account_sid.is_some() && self.auth_token.is_some() && self.from.is_some()
    }

    async fn send(&self, to: &str, body: &str) -> Result<DeliveryReceipt, GatewayError> {
        let (Some(sid), Some(token), Some(from)) = (&self.account_sid, &self.auth_token, &self.from)
        else {
            return Err(GatewayError::NotConfigured(
                "twilio account_sid, auth_token and sender number are required".to_string(),
            ));
        };

        let to = rav_common::phone::normalize(to)
            .ok_or_else(|| GatewayError::InvalidRecipient(to.to_string()))?;
        let from = rav_common::phone::normalize(from).unwrap_or_else(|| from.clone());

        let url = format!(
            "{}/Accounts/{}/Messages.json",
            self.base_url.trim_end_matches('/'),
            sid
        );
        let form = [
            ("To", self.address(&to)),
            ("From", self.address(&from)),
            ("Body", body.to_string()),
        ];

        let response = self
            .http_client
            .post(&url)
            .basic_auth(sid, Some(token))
            .form(&form)
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<TwilioError>(&text)
                .ok()
                .and_then(|e| {
                    e.message
                        .map(|m| format!("{} (code {})", m, e.code.unwrap_or_default()))
                })
                .unwrap_or(text);
            return Err(GatewayError::Api(status.as_u16(), detail));
        }

        let message: TwilioMessage = response
            .json()
            .await
            .map_err(|e| GatewayError::Parse(e.to_string()))?;

        tracing::debug!(sid = ?message.sid, status = ?message.status, "Twilio accepted message");
        Ok(DeliveryReceipt {
            message_sid: message.sid,
            status: message.status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(priority: Priority) -> MessageContext<'static> {
        MessageContext {
            assignment_id: 42,
            contractor_name: "Acme Plumbing",
            project_name: "Maple St remodel",
            city: Some("Austin"),
            description: "Replace toilet wax ring",
            room: Some("bathroom"),
            priority,
            estimated_hours: Some(1.5),
        }
    }

    #[test]
    fn test_templates_distinct_per_priority() {
        let bodies: Vec<String> = Priority::ALL
            .iter()
            .map(|p| render_assignment_message(&context(*p)))
            .collect();

        for (i, a) in bodies.iter().enumerate() {
            for b in bodies.iter().skip(i + 1) {
                assert_ne!(a.lines().next(), b.lines().next());
            }
        }
        assert!(bodies[0].starts_with("🚨"));
        assert!(bodies[1].starts_with("⚠️"));
        assert!(bodies[2].starts_with("🔧"));
        assert!(bodies[3].starts_with("📋"));
    }

    #[test]
    fn test_body_carries_reply_instructions() {
        let body = render_assignment_message(&context(Priority::High));
        assert!(body.contains("Task: Replace toilet wax ring"));
        assert!(body.contains("Where: Maple St remodel (bathroom, Austin)"));
        assert!(body.contains("Est. time: 1.5h"));
        assert!(body.contains("Reply ACCEPT or DECLINE, then DONE once the work is finished."));
        assert!(body.ends_with("Ref #42 (add #42 to your reply if you have several jobs with us)"));
    }

    #[test]
    fn test_reminder_template() {
        let body = render_reminder_message(&context(Priority::Low), 2);
        assert!(body.starts_with("⏰ Reminder #2 for Acme Plumbing"));
        assert!(body.contains("then DONE once the work is finished"));
        assert!(body.contains("Ref #42"));
    }

    #[test]
    fn test_whatsapp_addresses() {
        let config = TwilioConfig {
            account_sid: Some("AC123".to_string()),
            auth_token: Some("secret".to_string()),
            whatsapp_from: Some("+15550009999".to_string()),
            channel: MessageChannel::Whatsapp,
            ..TwilioConfig::default()
        };
        let gateway = TwilioGateway::new(&config).unwrap();
        assert!(gateway.is_configured());
        assert_eq!(gateway.address("+15125550100"), "whatsapp:+15125550100");
    }

    #[tokio::test]
    async fn test_unconfigured_gateway_refuses() {
        let gateway = TwilioGateway::new(&TwilioConfig::default()).unwrap();
        assert!(!gateway.is_configured());
        let result = gateway.send("+15125550100", "hi").await;
        assert!(matches!(result, Err(GatewayError::NotConfigured(_))));
    }
}
