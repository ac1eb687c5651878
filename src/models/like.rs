use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One accepted like toggle, alive until ack or rollback.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeMutation {
    pub post_id: String,
    pub intended_state: bool,
    pub issued_at: DateTime<Utc>,
    pub seq: u64,
}

/// Marker values captured right before an optimistic toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LikeSnapshot {
    pub liked: bool,
    pub like_count: u32,
    pub revision: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    Applied { liked: bool, like_count: u32, seq: u64 },
    Throttled,
    UnknownPost,
    Closed,
}

#[derive(Debug, Serialize)]
pub struct LikeRequest {
    pub liked: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeAck {
    #[serde(default)]
    pub liked: Option<bool>,
    #[serde(default)]
    pub like_count: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ReportRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}
