//! Record store contract the core runs against, plus the PocketBase client
//! that implements it.

mod pocketbase;
pub mod sse;

use async_trait::async_trait;
use reqwest::Method;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::AppResult;
use crate::models::{BoundingBox, RecordEvent};

pub use pocketbase::PocketBaseClient;

/// Who is looking at the map. Both fields are absent for anonymous browsing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Option<String>,
    pub token: Option<String>,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            token: Some(token.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListQuery {
    pub filter: String,
    pub expand: Vec<String>,
    pub per_page: usize,
    pub sort: Option<String>,
}

impl ListQuery {
    /// Candidates inside `bbox` that the server marks visible.
    pub fn within_bounding_box(bbox: &BoundingBox, per_page: usize) -> Self {
        Self {
            filter: bounding_box_filter(bbox),
            expand: Vec::new(),
            per_page,
            sort: None,
        }
    }

    pub fn expand(mut self, relation: &str) -> Self {
        self.expand.push(relation.to_string());
        self
    }

    pub fn sort(mut self, sort: &str) -> Self {
        self.sort = Some(sort.to_string());
        self
    }
}

pub fn bounding_box_filter(bbox: &BoundingBox) -> String {
    format!(
        "latitude >= {} && latitude <= {} && longitude >= {} && longitude <= {} && visible = true",
        bbox.min_lat, bbox.max_lat, bbox.min_lon, bbox.max_lon
    )
}

#[derive(Debug, Clone, PartialEq)]
pub struct MutationRequest {
    pub method: Method,
    pub path: String,
    pub auth_token: Option<String>,
    pub body: Option<serde_json::Value>,
}

impl MutationRequest {
    pub fn post(path: impl Into<String>, auth_token: Option<String>) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            auth_token,
            body: None,
        }
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn list_records(
        &self,
        collection: &str,
        query: &ListQuery,
    ) -> AppResult<Vec<serde_json::Value>>;

    async fn mutate(&self, request: MutationRequest) -> AppResult<serde_json::Value>;
}

#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    async fn subscribe(&self, collection: &str, pattern: &str) -> AppResult<Subscription>;
}

/// Live change feed. Unsubscribing consumes the handle; dropping it has the
/// same effect, so the feed is torn down exactly once.
#[derive(Debug)]
pub struct Subscription {
    topic: String,
    events: mpsc::UnboundedReceiver<AppResult<RecordEvent>>,
    cancel: CancellationToken,
}

impl Subscription {
    pub fn new(
        topic: impl Into<String>,
        events: mpsc::UnboundedReceiver<AppResult<RecordEvent>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            topic: topic.into(),
            events,
            cancel,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// `None` once the transport has shut the feed down.
    pub async fn next_event(&mut self) -> Option<AppResult<RecordEvent>> {
        self.events.recv().await
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
