use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, info};

use shared_config::AppConfig;

/// Seam for pushing confirmation codes out to a patient contact.
///
/// Delivery is best effort by contract: the booking flow records a warning on
/// failure and never rolls back the reservation.
#[async_trait]
pub trait ContactNotifier: Send + Sync {
    async fn send_code(
        &self,
        contact: &str,
        code: &str,
        expires_at: DateTime<Utc>,
    ) -> anyhow::Result<()>;
}

/// Posts the code to an external notification webhook. With no URL configured
/// it degrades to a log-only notifier, which is what local development runs.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: Option<String>,
}

impl WebhookNotifier {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: config
                .is_notifier_configured()
                .then(|| config.notifier_url.clone()),
        }
    }
}

#[async_trait]
impl ContactNotifier for WebhookNotifier {
    async fn send_code(
        &self,
        contact: &str,
        code: &str,
        expires_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let Some(url) = &self.url else {
            debug!("No notifier configured; code for {} is {}", contact, code);
            return Ok(());
        };

        let response = self
            .client
            .post(url)
            .json(&json!({
                "contact": contact,
                "code": code,
                "expires_at": expires_at.to_rfc3339()
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("Notifier returned status {}", response.status());
        }

        info!("Dispatched confirmation code to {}", contact);
        Ok(())
    }
}
