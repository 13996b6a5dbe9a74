//! Persistence port for the external record-keeping layer.
//!
//! The pipeline only ever reads the field roster and upserts derived
//! records by natural key. The in-memory adapter backs tests and local runs;
//! a real deployment plugs a database-backed implementation into the same
//! trait.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StorageError;
use crate::models::{Alert, FeedType, FieldRecord, FireRisk, HealthScore, Observation};

#[async_trait]
pub trait Storage: Send + Sync {
    async fn active_fields(&self) -> Result<Vec<FieldRecord>, StorageError>;

    async fn field(&self, id: Uuid) -> Result<FieldRecord, StorageError>;

    /// Upsert by natural key: (field, feed, date) for weather and vegetation,
    /// plus the hotspot location for fire detections.
    async fn upsert_observation(&self, observation: &Observation) -> Result<(), StorageError>;

    async fn observations(
        &self,
        field_id: Uuid,
        feed_type: FeedType,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Observation>, StorageError>;

    /// Upsert by (field_id, as_of_date). Earlier dates are never touched.
    async fn upsert_health_score(&self, score: &HealthScore) -> Result<(), StorageError>;

    /// Upsert by (field_id, as_of_date).
    async fn upsert_fire_risk(&self, risk: &FireRisk) -> Result<(), StorageError>;

    /// Upsert by alert id.
    async fn upsert_alert(&self, alert: &Alert) -> Result<(), StorageError>;

    async fn alert(&self, id: Uuid) -> Result<Alert, StorageError>;

    async fn alerts_for_field(&self, field_id: Uuid) -> Result<Vec<Alert>, StorageError>;
}

pub type SharedStorage = Arc<dyn Storage>;

#[derive(Default)]
struct Inner {
    fields: HashMap<Uuid, FieldRecord>,
    observations: Vec<Observation>,
    health_scores: HashMap<(Uuid, NaiveDate), HealthScore>,
    fire_risks: HashMap<(Uuid, NaiveDate), FireRisk>,
    alerts: HashMap<Uuid, Alert>,
}

#[derive(Default)]
pub struct InMemoryStorage {
    inner: RwLock<Inner>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_field(&self, field: FieldRecord) {
        self.inner.write().await.fields.insert(field.id, field);
    }

    pub async fn latest_health_score(&self, field_id: Uuid) -> Option<HealthScore> {
        let inner = self.inner.read().await;
        inner
            .health_scores
            .values()
            .filter(|s| s.field_id == field_id)
            .max_by_key(|s| s.as_of_date)
            .cloned()
    }

    pub async fn latest_fire_risk(&self, field_id: Uuid) -> Option<FireRisk> {
        let inner = self.inner.read().await;
        inner
            .fire_risks
            .values()
            .filter(|r| r.field_id == field_id)
            .max_by_key(|r| r.as_of_date)
            .cloned()
    }
}

fn same_natural_key(a: &Observation, b: &Observation) -> bool {
    if a.field_id != b.field_id
        || a.feed_type != b.feed_type
        || a.observation_date != b.observation_date
    {
        return false;
    }
    match (a.fire_hotspot(), b.fire_hotspot()) {
        // Several hotspots can share a date; the detection point tells
        // them apart.
        (Some(ha), Some(hb)) => ha.location == hb.location,
        _ => true,
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn active_fields(&self) -> Result<Vec<FieldRecord>, StorageError> {
        let inner = self.inner.read().await;
        let mut fields: Vec<FieldRecord> =
            inner.fields.values().filter(|f| f.active).cloned().collect();
        fields.sort_by_key(|f| f.id);
        Ok(fields)
    }

    async fn field(&self, id: Uuid) -> Result<FieldRecord, StorageError> {
        self.inner
            .read()
            .await
            .fields
            .get(&id)
            .cloned()
            .ok_or(StorageError::NotFound { kind: "field", id })
    }

    async fn upsert_observation(&self, observation: &Observation) -> Result<(), StorageError> {
        let mut inner = self.inner.write().await;
        if let Some(existing) = inner
            .observations
            .iter_mut()
            .find(|o| same_natural_key(o, observation))
        {
            *existing = observation.clone();
        } else {
            inner.observations.push(observation.clone());
        }
        Ok(())
    }

    async fn observations(
        &self,
        field_id: Uuid,
        feed_type: FeedType,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Observation>, StorageError> {
        let inner = self.inner.read().await;
        let mut matches: Vec<Observation> = inner
            .observations
            .iter()
            .filter(|o| {
                o.field_id == field_id
                    && o.feed_type == feed_type
                    && o.observation_date >= from
                    && o.observation_date <= to
            })
            .cloned()
            .collect();
        matches.sort_by_key(|o| o.observation_date);
        Ok(matches)
    }

    async fn upsert_health_score(&self, score: &HealthScore) -> Result<(), StorageError> {
        self.inner
            .write()
            .await
            .health_scores
            .insert((score.field_id, score.as_of_date), score.clone());
        Ok(())
    }

    async fn upsert_fire_risk(&self, risk: &FireRisk) -> Result<(), StorageError> {
        self.inner
            .write()
            .await
            .fire_risks
            .insert((risk.field_id, risk.as_of_date), risk.clone());
        Ok(())
    }

    async fn upsert_alert(&self, alert: &Alert) -> Result<(), StorageError> {
        self.inner.write().await.alerts.insert(alert.id, alert.clone());
        Ok(())
    }

    async fn alert(&self, id: Uuid) -> Result<Alert, StorageError> {
        self.inner
            .read()
            .await
            .alerts
            .get(&id)
            .cloned()
            .ok_or(StorageError::NotFound { kind: "alert", id })
    }

    async fn alerts_for_field(&self, field_id: Uuid) -> Result<Vec<Alert>, StorageError> {
        let inner = self.inner.read().await;
        let mut alerts: Vec<Alert> = inner
            .alerts
            .values()
            .filter(|a| a.field_id == field_id)
            .cloned()
            .collect();
        alerts.sort_by_key(|a| a.opened_at);
        Ok(alerts)
    }
}
