#![cfg(test)]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, AppResult};
use crate::models::{Coordinate, Post, RecordEvent};
use crate::store::{ListQuery, MutationRequest, RealtimeTransport, RecordStore, Subscription};

pub fn saigon_center() -> Coordinate {
    Coordinate {
        latitude: 10.762622,
        longitude: 106.660172,
    }
}

/// Test fixture: a visible post nobody has liked yet
pub fn post_at(id: &str, coordinate: Coordinate, like_count: u32) -> Post {
    Post {
        id: id.to_string(),
        owner_id: "owner_1".to_string(),
        owner_name: Some("Lan".to_string()),
        coordinate,
        text: format!("post {}", id),
        address: Some("Quận 10".to_string()),
        images: vec![format!("https://res.cloudinary.com/demo/{}.jpg", id)],
        like_count,
        has_liked_by_current_user: false,
        created_at: Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap(),
        visible: true,
    }
}

/// Test fixture: a PocketBase `posts` record, optionally liked by `liked_by`
pub fn post_record(id: &str, coordinate: Coordinate, like_count: i64, liked_by: &[&str]) -> serde_json::Value {
    let likes: Vec<serde_json::Value> = liked_by
        .iter()
        .enumerate()
        .map(|(i, user)| json!({"id": format!("like_{}_{}", id, i), "user": user, "post": id}))
        .collect();

    json!({
        "id": id,
        "collectionName": "posts",
        "user": "owner_1",
        "content": format!("post {}", id),
        "address": "Quận 10",
        "images": [format!("https://res.cloudinary.com/demo/{}.jpg", id)],
        "latitude": coordinate.latitude,
        "longitude": coordinate.longitude,
        "likeCount": like_count,
        "visible": true,
        "created": "2024-05-01 08:30:00.000Z",
        "expand": {
            "user": {"id": "owner_1", "name": "Lan"},
            "likes_via_post": likes
        }
    })
}

/// Evaluates the conjunctive `field op value` filters the engine emits.
fn matches_filter(record: &serde_json::Value, filter: &str) -> bool {
    filter.split("&&").all(|clause| {
        let clause = clause.trim();
        if clause.is_empty() {
            return true;
        }
        let parts: Vec<&str> = clause.split_whitespace().collect();
        let [field, op, value] = parts.as_slice() else {
            panic!("unsupported filter clause: {clause}");
        };
        let actual = &record[*field];

        if *value == "true" || *value == "false" {
            let expected = *value == "true";
            let actual = actual.as_bool().unwrap_or(true);
            return match *op {
                "=" => actual == expected,
                "!=" => actual != expected,
                _ => panic!("unsupported bool operator: {op}"),
            };
        }

        let expected: f64 = value.parse().expect("numeric filter value");
        let Some(actual) = actual.as_f64() else {
            return false;
        };
        match *op {
            ">=" => actual >= expected,
            "<=" => actual <= expected,
            ">" => actual > expected,
            "<" => actual < expected,
            "=" => actual == expected,
            _ => panic!("unsupported numeric operator: {op}"),
        }
    })
}

/// In-memory record store that honours the bounding-box filter and page size.
#[derive(Default)]
pub struct FakeRecordStore {
    records: Mutex<Vec<serde_json::Value>>,
    list_calls: Mutex<Vec<(String, ListQuery)>>,
    list_failure: Mutex<Option<String>>,
    mutations: Mutex<Vec<MutationRequest>>,
    mutation_results: Mutex<VecDeque<AppResult<serde_json::Value>>>,
    mutation_delays: Mutex<VecDeque<Duration>>,
}

impl FakeRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<serde_json::Value>) -> Self {
        let store = Self::new();
        *store.records.lock().unwrap() = records;
        store
    }

    pub fn set_records(&self, records: Vec<serde_json::Value>) {
        *self.records.lock().unwrap() = records;
    }

    pub fn fail_lists_with(&self, message: &str) {
        *self.list_failure.lock().unwrap() = Some(message.to_string());
    }

    pub fn list_calls(&self) -> Vec<(String, ListQuery)> {
        self.list_calls.lock().unwrap().clone()
    }

    pub fn mutations(&self) -> Vec<MutationRequest> {
        self.mutations.lock().unwrap().clone()
    }

    /// Queued results are consumed in call order; an empty queue acks with `null`.
    pub fn push_mutation_result(&self, result: AppResult<serde_json::Value>) {
        self.mutation_results.lock().unwrap().push_back(result);
    }

    pub fn push_mutation_delay(&self, delay: Duration) {
        self.mutation_delays.lock().unwrap().push_back(delay);
    }
}

#[async_trait]
impl RecordStore for FakeRecordStore {
    async fn list_records(
        &self,
        collection: &str,
        query: &ListQuery,
    ) -> AppResult<Vec<serde_json::Value>> {
        self.list_calls
            .lock()
            .unwrap()
            .push((collection.to_string(), query.clone()));

        if let Some(message) = self.list_failure.lock().unwrap().clone() {
            return Err(AppError::Http {
                status: 503,
                message,
            });
        }

        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|record| matches_filter(record, &query.filter))
            .take(query.per_page)
            .cloned()
            .collect())
    }

    async fn mutate(&self, request: MutationRequest) -> AppResult<serde_json::Value> {
        self.mutations.lock().unwrap().push(request.clone());
        let delay = self.mutation_delays.lock().unwrap().pop_front();
        let result = self.mutation_results.lock().unwrap().pop_front();

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if request.auth_token.is_none() {
            return Err(AppError::Authentication("missing token".to_string()));
        }
        result.unwrap_or(Ok(serde_json::Value::Null))
    }
}

/// Realtime transport driven by the test through `emit`.
#[derive(Default)]
pub struct FakeTransport {
    senders: Mutex<Vec<mpsc::UnboundedSender<AppResult<RecordEvent>>>>,
    tokens: Mutex<Vec<CancellationToken>>,
    topics: Mutex<Vec<String>>,
    refuse: Mutex<bool>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refuse_subscriptions(&self) {
        *self.refuse.lock().unwrap() = true;
    }

    pub fn emit(&self, event: RecordEvent) {
        for sender in self.senders.lock().unwrap().iter() {
            let _ = sender.send(Ok(event.clone()));
        }
    }

    pub fn fail(&self, message: &str) {
        for sender in self.senders.lock().unwrap().iter() {
            let _ = sender.send(Err(AppError::SubscriptionError(message.to_string())));
        }
    }

    pub fn topics(&self) -> Vec<String> {
        self.topics.lock().unwrap().clone()
    }

    pub fn subscription_count(&self) -> usize {
        self.tokens.lock().unwrap().len()
    }

    pub fn active_subscriptions(&self) -> usize {
        self.tokens
            .lock()
            .unwrap()
            .iter()
            .filter(|t| !t.is_cancelled())
            .count()
    }
}

#[async_trait]
impl RealtimeTransport for FakeTransport {
    async fn subscribe(&self, collection: &str, pattern: &str) -> AppResult<Subscription> {
        if *self.refuse.lock().unwrap() {
            return Err(AppError::SubscriptionError("connection refused".to_string()));
        }

        let topic = format!("{}/{}", collection, pattern);
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        self.senders.lock().unwrap().push(tx);
        self.tokens.lock().unwrap().push(cancel.clone());
        self.topics.lock().unwrap().push(topic.clone());

        Ok(Subscription::new(topic, rx, cancel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_matching() {
        let record = post_record("a", saigon_center(), 0, &[]);
        assert!(matches_filter(
            &record,
            "latitude >= 10 && latitude <= 11 && longitude >= 106 && longitude <= 107 && visible = true"
        ));
        assert!(!matches_filter(&record, "latitude >= 10.8"));
        assert!(!matches_filter(&record, "visible = false"));
    }

    #[tokio::test]
    async fn test_fake_store_respects_page_size() {
        let records = (0..5)
            .map(|i| post_record(&format!("p{}", i), saigon_center(), 0, &[]))
            .collect();
        let store = FakeRecordStore::with_records(records);
        let query = ListQuery {
            filter: "visible = true".to_string(),
            expand: vec![],
            per_page: 3,
            sort: None,
        };

        let items = store.list_records("posts", &query).await.unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(store.list_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_fake_transport_tracks_unsubscribe() {
        let transport = FakeTransport::new();
        let subscription = transport.subscribe("posts", "*").await.unwrap();
        assert_eq!(transport.active_subscriptions(), 1);

        subscription.unsubscribe();
        assert_eq!(transport.active_subscriptions(), 0);
        assert_eq!(transport.subscription_count(), 1);
    }
}
