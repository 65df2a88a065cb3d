//! Shared SMS/WhatsApp/Announcement notification pipeline.
//!
//! The original system had near-identical notification services in the
//! queue and reservation modules, each reimplementing phone normalization
//! and retry. This crate consolidates both into one pipeline: callers hand
//! it a method, phone, and message; it sends (or simulates, when provider
//! credentials are absent), retries on failure up to `max_retries` with a
//! fixed delay, and never propagates a failure to the caller — the final
//! [`NotificationRecord`] always carries the outcome instead.

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY_SECS: u64 = 5;
const DEFAULT_COUNTRY_CODE: &str = "55";

/// Channel a notification is sent through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationMethod {
    /// Text message via an SMS gateway (Twilio-shaped).
    Sms,
    /// Message via the WhatsApp Business API.
    #[serde(rename = "WHATSAPP")]
    WhatsApp,
    /// Spoken/displayed in-restaurant announcement; always succeeds locally.
    Announcement,
    /// No notification is sent; always succeeds.
    None,
}

/// Lifecycle state of a single notification attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationStatus {
    /// Enqueued, not yet attempted.
    Pending,
    /// Accepted by the provider (or simulated).
    Sent,
    /// Confirmed delivered (SMS/WhatsApp providers that report this).
    Delivered,
    /// Exhausted retries without success.
    Failed,
}

/// Record of one notification's send attempt(s).
///
/// `reference_id` is whatever the caller is notifying about — a queue
/// entry id or a reservation id; this crate doesn't interpret it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    /// Unique id of this notification.
    pub id: Uuid,
    /// Id of the entity this notification concerns.
    pub reference_id: Uuid,
    /// Channel used.
    pub notification_type: NotificationMethod,
    /// Final lifecycle state.
    pub status: NotificationStatus,
    /// Message body sent.
    pub message: String,
    /// When the provider accepted the message, if it did.
    pub sent_at: Option<DateTime<Utc>>,
    /// When the provider confirmed delivery, if it did.
    pub delivered_at: Option<DateTime<Utc>>,
    /// Why the send failed, if it did.
    pub error_message: Option<String>,
    /// Number of retry attempts made beyond the first (bounded by
    /// `max_retries`).
    pub retry_count: u32,
    /// When this record was created.
    pub created_at: DateTime<Utc>,
}

/// Twilio (SMS) and WhatsApp Business API credentials, plus retry tuning.
/// Read from the environment; missing provider credentials put that
/// provider's sends in simulation mode (logged, always successful).
#[derive(Debug, Clone, Default)]
pub struct NotificationConfig {
    /// Twilio account SID.
    pub sms_account_sid: Option<String>,
    /// Twilio auth token.
    pub sms_auth_token: Option<String>,
    /// Twilio "from" number.
    pub sms_from_number: Option<String>,
    /// WhatsApp Business API base URL.
    pub whatsapp_api_url: Option<String>,
    /// WhatsApp Business API bearer token.
    pub whatsapp_token: Option<String>,
    /// Maximum retry attempts after the first send (default 3).
    pub max_retries: u32,
    /// Delay between retries (default 5s).
    pub retry_delay: std::time::Duration,
    /// Default country code prepended to phone numbers lacking one
    /// (default `"55"`, Brazil).
    pub default_country_code: String,
}

impl NotificationConfig {
    /// Load configuration from the environment.
    ///
    /// Recognized variables: `SMS_ACCOUNT_SID`, `SMS_AUTH_TOKEN`,
    /// `SMS_FROM_NUMBER`, `WHATSAPP_API_URL`, `WHATSAPP_TOKEN`,
    /// `NOTIFICATION_MAX_RETRIES`, `NOTIFICATION_RETRY_DELAY_SECS`,
    /// `NOTIFICATION_COUNTRY_CODE`.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            sms_account_sid: non_empty_env("SMS_ACCOUNT_SID"),
            sms_auth_token: non_empty_env("SMS_AUTH_TOKEN"),
            sms_from_number: non_empty_env("SMS_FROM_NUMBER"),
            whatsapp_api_url: non_empty_env("WHATSAPP_API_URL"),
            whatsapp_token: non_empty_env("WHATSAPP_TOKEN"),
            max_retries: std::env::var("NOTIFICATION_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_RETRIES),
            retry_delay: std::time::Duration::from_secs(
                std::env::var("NOTIFICATION_RETRY_DELAY_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_RETRY_DELAY_SECS),
            ),
            default_country_code: std::env::var("NOTIFICATION_COUNTRY_CODE")
                .unwrap_or_else(|_| DEFAULT_COUNTRY_CODE.to_string()),
        }
    }

    fn sms_configured(&self) -> bool {
        self.sms_account_sid.is_some() && self.sms_auth_token.is_some() && self.sms_from_number.is_some()
    }

    fn whatsapp_configured(&self) -> bool {
        self.whatsapp_api_url.is_some() && self.whatsapp_token.is_some()
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Normalize a phone number to digits-only with a leading `+` and a
/// default country prefix when none is present.
///
/// Idempotent: `format_phone(format_phone(p)) == format_phone(p)`, since
/// the digits produced by a first pass already start with the country
/// code and are left untouched by a second.
#[must_use]
pub fn format_phone(phone: &str, country_code: &str) -> String {
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
    let with_country = if digits.starts_with(country_code) {
        digits
    } else {
        format!("{country_code}{digits}")
    };
    format!("+{with_country}")
}

/// Shared SMS/WhatsApp/Announcement notification pipeline.
#[derive(Clone)]
pub struct NotificationGateway {
    config: NotificationConfig,
    client: reqwest::Client,
}

impl NotificationGateway {
    /// Build a gateway from `config`.
    #[must_use]
    pub fn new(config: NotificationConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Send `message` to `phone` via `method`, retrying on failure up to
    /// `max_retries` times with `retry_delay` between attempts. Always
    /// returns a [`NotificationRecord`]; never propagates an error.
    pub async fn send(
        &self,
        reference_id: Uuid,
        method: NotificationMethod,
        phone: &str,
        message: &str,
    ) -> NotificationRecord {
        let phone = format_phone(phone, &self.config.default_country_code);
        let mut record = NotificationRecord {
            id: Uuid::new_v4(),
            reference_id,
            notification_type: method,
            status: NotificationStatus::Pending,
            message: message.to_string(),
            sent_at: None,
            delivered_at: None,
            error_message: None,
            retry_count: 0,
            created_at: Utc::now(),
        };

        loop {
            match self.attempt_send(method, &phone, message).await {
                Ok(()) => {
                    record.status = NotificationStatus::Sent;
                    record.sent_at = Some(Utc::now());
                    record.delivered_at = Some(Utc::now());
                    record.error_message = None;
                    return record;
                }
                Err(error) => {
                    record.error_message = Some(error.clone());
                    if record.retry_count >= self.config.max_retries {
                        record.status = NotificationStatus::Failed;
                        tracing::error!(
                            %error,
                            retry_count = record.retry_count,
                            "notification failed after max retries"
                        );
                        return record;
                    }
                    tracing::warn!(
                        %error,
                        retry_count = record.retry_count,
                        "notification send failed, retrying"
                    );
                    record.retry_count += 1;
                    tokio::time::sleep(self.config.retry_delay).await;
                }
            }
        }
    }

    async fn attempt_send(
        &self,
        method: NotificationMethod,
        phone: &str,
        message: &str,
    ) -> Result<(), String> {
        match method {
            NotificationMethod::Sms => self.send_sms(phone, message).await,
            NotificationMethod::WhatsApp => self.send_whatsapp(phone, message).await,
            NotificationMethod::Announcement => {
                tracing::info!(message, "[ANNOUNCEMENT]");
                Ok(())
            }
            NotificationMethod::None => Ok(()),
        }
    }

    async fn send_sms(&self, phone: &str, message: &str) -> Result<(), String> {
        let (Some(sid), Some(token), Some(from)) = (
            &self.config.sms_account_sid,
            &self.config.sms_auth_token,
            &self.config.sms_from_number,
        ) else {
            tracing::info!(phone, message, "[SIMULATED SMS] credentials not configured");
            return Ok(());
        };

        let url = format!("https://api.twilio.com/2010-04-01/Accounts/{sid}/Messages.json");
        let response = self
            .client
            .post(&url)
            .basic_auth(sid, Some(token))
            .form(&[("From", from.as_str()), ("To", phone), ("Body", message)])
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("twilio returned {}", response.status()))
        }
    }

    async fn send_whatsapp(&self, phone: &str, message: &str) -> Result<(), String> {
        let (Some(api_url), Some(token)) =
            (&self.config.whatsapp_api_url, &self.config.whatsapp_token)
        else {
            tracing::info!(phone, message, "[SIMULATED WHATSAPP] credentials not configured");
            return Ok(());
        };

        let body = serde_json::json!({
            "messaging_product": "whatsapp",
            "to": phone,
            "type": "text",
            "text": { "body": message },
        });
        let response = self
            .client
            .post(api_url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("whatsapp api returned {}", response.status()))
        }
    }

    /// Whether SMS has real provider credentials configured (as opposed to
    /// running in simulation mode).
    #[must_use]
    pub fn sms_is_live(&self) -> bool {
        self.config.sms_configured()
    }

    /// Whether WhatsApp has real provider credentials configured.
    #[must_use]
    pub fn whatsapp_is_live(&self) -> bool {
        self.config.whatsapp_configured()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_phone_adds_country_code_and_plus() {
        assert_eq!(format_phone("11987654321", "55"), "+5511987654321");
    }

    #[test]
    fn format_phone_does_not_duplicate_an_existing_country_code() {
        assert_eq!(format_phone("5511987654321", "55"), "+5511987654321");
    }

    #[test]
    fn format_phone_strips_non_digit_characters() {
        assert_eq!(format_phone("+55 (11) 98765-4321", "55"), "+5511987654321");
    }

    #[test]
    fn format_phone_is_idempotent() {
        let once = format_phone("11987654321", "55");
        let twice = format_phone(&once, "55");
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn announcement_always_succeeds_without_network_access() {
        let gateway = NotificationGateway::new(NotificationConfig::from_env());
        let record = gateway
            .send(
                Uuid::new_v4(),
                NotificationMethod::Announcement,
                "11987654321",
                "table ready",
            )
            .await;
        assert_eq!(record.status, NotificationStatus::Sent);
        assert_eq!(record.retry_count, 0);
    }

    #[tokio::test]
    async fn sms_without_credentials_simulates_success() {
        let config = NotificationConfig {
            max_retries: 1,
            retry_delay: std::time::Duration::from_millis(1),
            default_country_code: "55".to_string(),
            ..Default::default()
        };
        let gateway = NotificationGateway::new(config);
        assert!(!gateway.sms_is_live());
        let record = gateway
            .send(Uuid::new_v4(), NotificationMethod::Sms, "11987654321", "hi")
            .await;
        assert_eq!(record.status, NotificationStatus::Sent);
    }

    #[tokio::test]
    async fn none_method_always_succeeds() {
        let config = NotificationConfig {
            max_retries: 3,
            retry_delay: std::time::Duration::from_millis(1),
            default_country_code: "55".to_string(),
            ..Default::default()
        };
        let gateway = NotificationGateway::new(config);
        let record = gateway
            .send(Uuid::new_v4(), NotificationMethod::None, "11987654321", "hi")
            .await;
        assert_eq!(record.status, NotificationStatus::Sent);
    }
}
