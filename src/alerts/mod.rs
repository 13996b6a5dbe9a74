//! Stateful alert lifecycle: none -> open -> resolved.
//!
//! The engine is the single writer for alert state. All create-or-reaffirm
//! decisions happen under one async mutex over the keyed map, so concurrent
//! evaluations of the same condition can never open duplicates. Resolution
//! is terminal; a condition that re-crosses its threshold later opens a
//! fresh alert with a new id and the same dedup key.

mod notifier;

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::error::StorageError;
use crate::models::{Alert, AlertEvent, AlertKind, AlertSeverity, AlertTransition};
use crate::storage::SharedStorage;

pub use notifier::{AlertSink, NullSink, WebhookNotifier};

/// A threshold crossing reported by an evaluation cycle.
#[derive(Debug, Clone)]
pub struct AlertCondition {
    pub field_id: Uuid,
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub dedup_key: String,
    pub title: String,
}

/// How long a condition must measure clear before its alert auto-resolves.
#[derive(Debug, Clone, Copy)]
pub struct DebouncePolicy {
    /// Weather alerts clear after this many consecutive clear cycles.
    pub weather_clear_cycles: u32,
    /// Health alerts clear after this many consecutive clear cycles.
    pub health_clear_cycles: u32,
    /// Fire alerts clear once no relevant hotspot has been seen for this long.
    pub fire_clear_after: Duration,
}

impl Default for DebouncePolicy {
    fn default() -> Self {
        Self {
            weather_clear_cycles: 1,
            health_clear_cycles: 2,
            fire_clear_after: Duration::hours(24),
        }
    }
}

type AlertKey = (Uuid, AlertKind, String);

struct OpenState {
    alert: Alert,
    clear_streak: u32,
}

pub struct AlertEngine {
    storage: SharedStorage,
    sink: Box<dyn AlertSink>,
    debounce: DebouncePolicy,
    open: Mutex<HashMap<AlertKey, OpenState>>,
}

impl AlertEngine {
    pub fn new(storage: SharedStorage, sink: Box<dyn AlertSink>, debounce: DebouncePolicy) -> Self {
        Self {
            storage,
            sink,
            debounce,
            open: Mutex::new(HashMap::new()),
        }
    }

    async fn persist_and_notify(
        &self,
        alert: &Alert,
        transition: AlertTransition,
    ) -> Result<(), StorageError> {
        self.storage.upsert_alert(alert).await?;
        let event = AlertEvent::from_alert(alert, transition);
        self.sink.notify(&event).await;
        counter!(
            "fieldwatch_alert_transitions_total",
            "kind" => alert.kind.as_str(),
            "transition" => match transition {
                AlertTransition::Opened => "opened",
                AlertTransition::Reaffirmed => "reaffirmed",
                AlertTransition::Resolved => "resolved",
            }
        )
        .increment(1);
        Ok(())
    }

    /// Reports that a condition currently holds. Opens a new alert, reaffirms
    /// the open one, or (on severity escalation) resolves the open alert and
    /// opens a fresh one at the higher tier. De-escalation only reaffirms.
    pub async fn raise(&self, condition: AlertCondition) -> Result<AlertTransition, StorageError> {
        let key = (
            condition.field_id,
            condition.kind,
            condition.dedup_key.clone(),
        );
        let now = Utc::now();
        let mut open = self.open.lock().await;

        if let Some(state) = open.get_mut(&key) {
            state.clear_streak = 0;
            if condition.severity > state.alert.severity {
                let mut resolved = state.alert.clone();
                resolved.resolved_at = Some(now);
                let alert = new_alert(&condition, now);
                state.alert = alert.clone();
                // Deliveries happen outside the lock so a slow webhook never
                // stalls other fields' evaluations.
                drop(open);
                info!(
                    field_id = %condition.field_id,
                    dedup_key = %condition.dedup_key,
                    from = %resolved.severity,
                    to = %condition.severity,
                    "alert escalated, reopening at higher severity"
                );
                self.persist_and_notify(&resolved, AlertTransition::Resolved)
                    .await?;
                self.persist_and_notify(&alert, AlertTransition::Opened)
                    .await?;
                return Ok(AlertTransition::Opened);
            }
            state.alert.last_seen_at = now;
            let alert = state.alert.clone();
            drop(open);
            self.persist_and_notify(&alert, AlertTransition::Reaffirmed)
                .await?;
            return Ok(AlertTransition::Reaffirmed);
        }

        let alert = new_alert(&condition, now);
        open.insert(
            key,
            OpenState {
                alert: alert.clone(),
                clear_streak: 0,
            },
        );
        drop(open);
        info!(
            field_id = %condition.field_id,
            kind = %condition.kind,
            severity = %condition.severity,
            dedup_key = %condition.dedup_key,
            "alert opened"
        );
        self.persist_and_notify(&alert, AlertTransition::Opened)
            .await?;
        Ok(AlertTransition::Opened)
    }

    /// Reports that a condition measured clear this cycle. Resolves the open
    /// alert once the kind-specific debounce is satisfied.
    pub async fn observe_clear(
        &self,
        field_id: Uuid,
        kind: AlertKind,
        dedup_key: &str,
    ) -> Result<Option<AlertTransition>, StorageError> {
        let key = (field_id, kind, dedup_key.to_string());
        let now = Utc::now();
        let mut open = self.open.lock().await;
        let Some(state) = open.get_mut(&key) else {
            return Ok(None);
        };

        let due = match kind {
            AlertKind::Fire => now - state.alert.last_seen_at >= self.debounce.fire_clear_after,
            AlertKind::Weather => {
                state.clear_streak += 1;
                state.clear_streak >= self.debounce.weather_clear_cycles
            }
            AlertKind::CropHealth => {
                state.clear_streak += 1;
                state.clear_streak >= self.debounce.health_clear_cycles
            }
        };
        if !due {
            return Ok(None);
        }

        let Some(state) = open.remove(&key) else {
            return Ok(None);
        };
        drop(open);
        let mut resolved = state.alert;
        resolved.resolved_at = Some(now);
        info!(%field_id, kind = %kind, dedup_key, "alert resolved");
        self.persist_and_notify(&resolved, AlertTransition::Resolved)
            .await?;
        Ok(Some(AlertTransition::Resolved))
    }

    /// Explicit resolution requested from outside (operator action).
    pub async fn resolve_by_id(&self, alert_id: Uuid) -> Result<Alert, StorageError> {
        let mut open = self.open.lock().await;
        let key = open
            .iter()
            .find(|(_, state)| state.alert.id == alert_id)
            .map(|(key, _)| key.clone());
        match key {
            Some(key) => {
                let mut resolved = match open.remove(&key) {
                    Some(state) => state.alert,
                    None => return Err(StorageError::NotFound { kind: "alert", id: alert_id }),
                };
                drop(open);
                resolved.resolved_at = Some(Utc::now());
                self.persist_and_notify(&resolved, AlertTransition::Resolved)
                    .await?;
                Ok(resolved)
            }
            None => {
                drop(open);
                // Already resolved alerts are terminal and immutable.
                let existing = self.storage.alert(alert_id).await?;
                Ok(existing)
            }
        }
    }

    /// Snapshot of open alerts for one field.
    pub async fn open_alerts(&self, field_id: Uuid) -> Vec<Alert> {
        self.open
            .lock()
            .await
            .values()
            .filter(|s| s.alert.field_id == field_id)
            .map(|s| s.alert.clone())
            .collect()
    }
}

fn new_alert(condition: &AlertCondition, now: DateTime<Utc>) -> Alert {
    Alert {
        id: Uuid::new_v4(),
        field_id: condition.field_id,
        kind: condition.kind,
        severity: condition.severity,
        title: condition.title.clone(),
        dedup_key: condition.dedup_key.clone(),
        opened_at: now,
        last_seen_at: now,
        resolved_at: None,
    }
}
