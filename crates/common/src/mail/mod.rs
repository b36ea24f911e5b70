//! Mail delivery abstraction
//!
//! Provides a unified interface over the configured mail provider:
//! - HTTP relay (internal mail relay service)
//! - Log-only (development / dry runs)
//!
//! A send is attempted exactly once per stale session per run. Failed
//! sends are reported to the caller and retried naturally on the next
//! scheduled run, so no retry loop lives here.

use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Trait for notification mail delivery
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Send a templated notification to a user
    async fn send(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        template: &str,
        context: &serde_json::Value,
    ) -> Result<()>;

    /// Get the provider name
    fn provider_name(&self) -> &str;
}

/// Mail client backed by an HTTP relay service
pub struct HttpMailer {
    client: reqwest::Client,
    relay_url: String,
    api_key: String,
}

#[derive(Serialize)]
struct RelayRequest<'a> {
    tenant_id: Uuid,
    user_id: Uuid,
    template: &'a str,
    context: &'a serde_json::Value,
}

impl HttpMailer {
    /// Create a new HTTP mailer
    pub fn new(relay_url: String, api_key: String, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            client,
            relay_url,
            api_key,
        })
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        template: &str,
        context: &serde_json::Value,
    ) -> Result<()> {
        let url = format!("{}/v1/messages", self.relay_url.trim_end_matches('/'));

        let request = RelayRequest {
            tenant_id,
            user_id,
            template,
            context,
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::Mail {
                message: format!("Relay request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Mail {
                message: format!("Relay error {}: {}", status, body),
            });
        }

        Ok(())
    }

    fn provider_name(&self) -> &str {
        "http-relay"
    }
}

/// Log-only mailer for development
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        template: &str,
        context: &serde_json::Value,
    ) -> Result<()> {
        tracing::info!(
            tenant_id = %tenant_id,
            user_id = %user_id,
            template = template,
            context = %context,
            "Mail send (log provider)"
        );
        Ok(())
    }

    fn provider_name(&self) -> &str {
        "log"
    }
}

/// A recorded outbound message
#[derive(Debug, Clone)]
pub struct RecordedMail {
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub template: String,
    pub context: serde_json::Value,
}

/// Recording mailer for tests; captures sends and can be scripted to fail
pub struct RecordingMailer {
    sent: std::sync::Mutex<Vec<RecordedMail>>,
    fail_for_users: std::sync::Mutex<Vec<Uuid>>,
}

impl Default for RecordingMailer {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self {
            sent: std::sync::Mutex::new(Vec::new()),
            fail_for_users: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Script delivery failures for a specific user
    pub fn fail_for(&self, user_id: Uuid) {
        self.fail_for_users
            .lock()
            .expect("mailer poisoned")
            .push(user_id);
    }

    pub fn sent(&self) -> Vec<RecordedMail> {
        self.sent.lock().expect("mailer poisoned").clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().expect("mailer poisoned").len()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        template: &str,
        context: &serde_json::Value,
    ) -> Result<()> {
        if self
            .fail_for_users
            .lock()
            .expect("mailer poisoned")
            .contains(&user_id)
        {
            return Err(AppError::Mail {
                message: format!("Scripted failure for user {}", user_id),
            });
        }

        self.sent.lock().expect("mailer poisoned").push(RecordedMail {
            tenant_id,
            user_id,
            template: template.to_string(),
            context: context.clone(),
        });
        Ok(())
    }

    fn provider_name(&self) -> &str {
        "recording"
    }
}

/// Create a mailer based on configuration
pub fn create_mailer(
    provider: &str,
    relay_url: Option<String>,
    api_key: Option<String>,
    timeout_secs: u64,
) -> Result<Arc<dyn Mailer>> {
    match provider {
        "http" => {
            let relay_url = relay_url.ok_or_else(|| AppError::Configuration {
                message: "mail.relay_url required for http provider".to_string(),
            })?;
            let api_key = api_key.ok_or_else(|| AppError::Configuration {
                message: "mail.api_key required for http provider".to_string(),
            })?;
            Ok(Arc::new(HttpMailer::new(relay_url, api_key, timeout_secs)?))
        }
        "log" => Ok(Arc::new(LogMailer)),
        _ => {
            tracing::warn!(provider = provider, "Unknown mail provider, using log");
            Ok(Arc::new(LogMailer))
        }
    }
}
