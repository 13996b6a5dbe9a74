//! Feed clients: thin request/parse adapters over the external
//! Earth-observation APIs.
//!
//! Each client normalizes upstream responses into [`Observation`]s and maps
//! failures onto the [`FetchError`] taxonomy. All HTTP specifics stay inside
//! this module; the rest of the pipeline only sees normalized records.

mod fire;
mod vegetation;
mod weather;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::error::FetchError;
use crate::geo::Polygon;
use crate::models::{FeedType, Observation};

pub use fire::FirmsFireFeed;
pub use vegetation::ModisVegetationFeed;
pub use weather::PowerWeatherFeed;

/// What a feed client needs to know about one request.
#[derive(Debug, Clone)]
pub struct FeedQuery {
    pub field_id: Uuid,
    pub geometry: Polygon,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

/// Adapter over one external feed.
#[async_trait]
pub trait FeedClient: Send + Sync {
    fn feed_type(&self) -> FeedType;

    /// Short upstream identifier recorded on every observation.
    fn source(&self) -> &str;

    /// Fetches and normalizes observations for the query window. An upstream
    /// that simply has nothing published yet yields an empty vec, not an
    /// error.
    async fn fetch(&self, query: &FeedQuery) -> Result<Vec<Observation>, FetchError>;
}

/// Maps feed types to their configured clients. Built once at startup and
/// shared; nothing here is global.
#[derive(Default, Clone)]
pub struct FeedRegistry {
    clients: HashMap<FeedType, Arc<dyn FeedClient>>,
}

impl FeedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, client: Arc<dyn FeedClient>) {
        self.clients.insert(client.feed_type(), client);
    }

    pub fn get(&self, feed_type: FeedType) -> Option<Arc<dyn FeedClient>> {
        self.clients.get(&feed_type).cloned()
    }

    pub fn feed_types(&self) -> Vec<FeedType> {
        self.clients.keys().copied().collect()
    }
}
