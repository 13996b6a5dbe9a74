use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Indicator family an alert belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Weather,
    Fire,
    CropHealth,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Weather => "weather",
            AlertKind::Fire => "fire",
            AlertKind::CropHealth => "crop_health",
        }
    }
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered so escalation checks can compare tiers directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Low => "low",
            AlertSeverity::Medium => "medium",
            AlertSeverity::High => "high",
            AlertSeverity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stateful alert row. At most one open alert may exist per
/// (field_id, kind, dedup_key); resolution is terminal and a re-crossed
/// threshold opens a fresh row with a new id and the same dedup_key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub field_id: Uuid,
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub title: String,
    pub dedup_key: String,
    pub opened_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }
}

/// Lifecycle transition an evaluation produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertTransition {
    Opened,
    Reaffirmed,
    Resolved,
}

/// Notification emitted on every alert transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub alert_id: Uuid,
    pub field_id: Uuid,
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub dedup_key: String,
    pub transition: AlertTransition,
    pub occurred_at: DateTime<Utc>,
}

impl AlertEvent {
    pub fn from_alert(alert: &Alert, transition: AlertTransition) -> Self {
        Self {
            alert_id: alert.id,
            field_id: alert.field_id,
            kind: alert.kind,
            severity: alert.severity,
            dedup_key: alert.dedup_key.clone(),
            transition,
            occurred_at: Utc::now(),
        }
    }
}
