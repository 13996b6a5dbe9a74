//! Outbound alert notification.
//!
//! Delivery is best-effort: a webhook that stays down must never block the
//! pipeline, so failures are logged and counted, not propagated.

use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use tracing::{debug, warn};
use url::Url;

use crate::models::AlertEvent;

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn notify(&self, event: &AlertEvent);
}

/// Sink used when no webhook is configured.
pub struct NullSink;

#[async_trait]
impl AlertSink for NullSink {
    async fn notify(&self, event: &AlertEvent) {
        debug!(
            alert_id = %event.alert_id,
            transition = ?event.transition,
            "alert transition (no webhook configured)"
        );
    }
}

pub struct WebhookNotifier {
    http: reqwest::Client,
    url: Url,
    max_attempts: u32,
}

impl WebhookNotifier {
    pub fn new(http: reqwest::Client, url: Url, max_attempts: u32) -> Self {
        Self {
            http,
            url,
            max_attempts: max_attempts.max(1),
        }
    }
}

#[async_trait]
impl AlertSink for WebhookNotifier {
    async fn notify(&self, event: &AlertEvent) {
        for attempt in 1..=self.max_attempts {
            let result = self.http.post(self.url.clone()).json(event).send().await;
            match result {
                Ok(response) if response.status().is_success() => {
                    counter!("fieldwatch_alert_notifications_total", "outcome" => "delivered")
                        .increment(1);
                    return;
                }
                Ok(response) => {
                    warn!(
                        alert_id = %event.alert_id,
                        status = %response.status(),
                        attempt,
                        "alert webhook rejected payload"
                    );
                }
                Err(err) => {
                    warn!(alert_id = %event.alert_id, error = %err, attempt, "alert webhook unreachable");
                }
            }
            if attempt < self.max_attempts {
                tokio::time::sleep(Duration::from_millis(200 * u64::from(attempt))).await;
            }
        }
        counter!("fieldwatch_alert_notifications_total", "outcome" => "dropped").increment(1);
    }
}
