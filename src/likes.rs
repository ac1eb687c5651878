//! Optimistic like toggling.
//!
//! A toggle flips the marker immediately, then a per-post debounce collapses
//! rapid taps into a single request carrying the final state. Each accepted
//! toggle bumps a per-post sequence number; a response that is no longer the
//! latest for its post is dropped. Failures roll back silently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::LikeConfig;
use crate::error::AppError;
use crate::markers::MarkerList;
use crate::models::{clamp_like_count, LikeAck, LikeMutation, LikeRequest, LikeSnapshot, ToggleOutcome};
use crate::store::{Identity, MutationRequest, RecordStore};

#[derive(Debug, Default)]
struct PostLikeState {
    last_accepted: Option<Instant>,
    latest_seq: u64,
    confirmed_seq: u64,
    in_flight: usize,
    burst_baseline: Option<LikeSnapshot>,
    pending: Option<LikeMutation>,
}

impl PostLikeState {
    fn is_idle(&self, now: Instant, throttle: Duration) -> bool {
        self.pending.is_none()
            && self.in_flight == 0
            && self
                .last_accepted
                .map_or(true, |last| now.duration_since(last) >= throttle)
    }
}

struct Inner {
    store: Arc<dyn RecordStore>,
    markers: MarkerList,
    auth_token: Option<String>,
    throttle: Duration,
    debounce: Duration,
    states: Mutex<HashMap<String, PostLikeState>>,
    cancel: CancellationToken,
}

impl Inner {
    fn lock_states(&self) -> MutexGuard<'_, HashMap<String, PostLikeState>> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One per screen. Dropping it cancels every pending and in-flight toggle.
pub struct LikeCoordinator {
    inner: Arc<Inner>,
}

impl LikeCoordinator {
    pub fn new(
        store: Arc<dyn RecordStore>,
        markers: MarkerList,
        identity: &Identity,
        config: &LikeConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                markers,
                auth_token: identity.token.clone(),
                throttle: config.throttle(),
                debounce: config.debounce(),
                states: Mutex::new(HashMap::new()),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Applies the toggle locally and schedules the request. Must be called
    /// from within a tokio runtime.
    pub fn toggle_like(&self, post_id: &str) -> ToggleOutcome {
        if self.inner.cancel.is_cancelled() {
            return ToggleOutcome::Closed;
        }

        let mut states = self.inner.lock_states();
        let now = Instant::now();
        let throttle = self.inner.throttle;
        states.retain(|id, state| id == post_id || !state.is_idle(now, throttle));

        if let Some(last) = states.get(post_id).and_then(|s| s.last_accepted) {
            if now.duration_since(last) < throttle {
                debug!("Like toggle on post {} throttled", post_id);
                return ToggleOutcome::Throttled;
            }
        }

        let Some(toggle) = self.inner.markers.apply_optimistic_toggle(post_id) else {
            return ToggleOutcome::UnknownPost;
        };

        let state = states.entry(post_id.to_string()).or_default();
        state.last_accepted = Some(now);
        state.latest_seq += 1;
        let seq = state.latest_seq;
        state.burst_baseline.get_or_insert(toggle.before);
        state.pending = Some(LikeMutation {
            post_id: post_id.to_string(),
            intended_state: toggle.liked,
            issued_at: Utc::now(),
            seq,
        });
        drop(states);

        tokio::spawn(flush_after_debounce(
            Arc::clone(&self.inner),
            post_id.to_string(),
            seq,
        ));

        ToggleOutcome::Applied {
            liked: toggle.liked,
            like_count: toggle.like_count,
            seq,
        }
    }

    /// The mutation waiting for its debounce or response, if any.
    pub fn pending_mutation(&self, post_id: &str) -> Option<LikeMutation> {
        self.inner
            .lock_states()
            .get(post_id)
            .and_then(|s| s.pending.clone())
    }

    #[cfg(test)]
    fn tracked_posts(&self) -> usize {
        self.inner.lock_states().len()
    }

    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }
}

impl Drop for LikeCoordinator {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

async fn flush_after_debounce(inner: Arc<Inner>, post_id: String, seq: u64) {
    tokio::select! {
        _ = inner.cancel.cancelled() => return,
        _ = tokio::time::sleep(inner.debounce) => {}
    }

    let (baseline, mutation) = {
        let mut states = inner.lock_states();
        let Some(state) = states.get_mut(&post_id) else {
            return;
        };
        // A later toggle in the same burst owns the request.
        if state.latest_seq != seq {
            return;
        }
        let (Some(baseline), Some(mutation)) = (state.burst_baseline.take(), state.pending.clone())
        else {
            return;
        };
        if mutation.intended_state == baseline.liked {
            debug!(
                "Like toggles on post {} cancelled each other out, nothing to send",
                post_id
            );
            state.pending = None;
            return;
        }
        (baseline, mutation)
    };

    let body = match serde_json::to_value(LikeRequest {
        liked: mutation.intended_state,
    }) {
        Ok(body) => body,
        Err(e) => {
            warn!("Could not encode like request for post {}: {}", post_id, e);
            return;
        }
    };
    let request = MutationRequest::post(
        format!("/api/posts/{}/like", post_id),
        inner.auth_token.clone(),
    )
    .with_body(body);

    if let Some(state) = inner.lock_states().get_mut(&post_id) {
        state.in_flight += 1;
    }
    let result = tokio::select! {
        _ = inner.cancel.cancelled() => None,
        result = inner.store.mutate(request) => Some(result),
    };

    let mut states = inner.lock_states();
    let Some(state) = states.get_mut(&post_id) else {
        return;
    };
    state.in_flight = state.in_flight.saturating_sub(1);
    let Some(result) = result else {
        debug!("Like request for post {} abandoned after shutdown", post_id);
        return;
    };

    let latest = state.latest_seq == seq;
    if latest {
        state.pending = None;
    }

    match result {
        // The server applied this request even if a newer toggle now owns the
        // display, so its state is recorded either way.
        Ok(ack) => {
            if seq < state.confirmed_seq {
                debug!(
                    "Ignoring out-of-order like ack for post {} (seq {} < {})",
                    post_id, seq, state.confirmed_seq
                );
                return;
            }
            state.confirmed_seq = seq;
            let ack: LikeAck = serde_json::from_value(ack).unwrap_or_default();
            inner.markers.confirm_like(
                &post_id,
                mutation.intended_state,
                ack.like_count.map(clamp_like_count),
            );
            debug!(
                "Like on post {} confirmed (liked = {}, latest = {})",
                post_id, mutation.intended_state, latest
            );
        }
        Err(e) if latest => {
            let err = AppError::MutationFailed(e.to_string());
            warn!("Rolling back like on post {}: {}", post_id, err);
            inner.markers.rollback(&post_id, &baseline);
        }
        Err(e) => {
            debug!(
                "Discarding stale like failure for post {} (seq {} < {}): {}",
                post_id, seq, state.latest_seq, e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RadiusQuery;
    use crate::test_utils::{post_at, saigon_center, FakeRecordStore};
    use serde_json::json;

    const TICK: Duration = Duration::from_millis(10);

    fn setup(config: LikeConfig) -> (Arc<FakeRecordStore>, MarkerList, LikeCoordinator) {
        let store = Arc::new(FakeRecordStore::new());
        let markers = MarkerList::new();
        markers.replace_all(
            RadiusQuery::new(saigon_center(), 2.0).unwrap(),
            vec![
                post_at("x", saigon_center(), 5),
                post_at("y", saigon_center(), 0),
            ],
        );
        let coordinator = LikeCoordinator::new(
            store.clone(),
            markers.clone(),
            &Identity::new("viewer_1", "token_1"),
            &config,
        );
        (store, markers, coordinator)
    }

    fn no_throttle() -> LikeConfig {
        LikeConfig {
            throttle_ms: 0,
            debounce_ms: 200,
        }
    }

    fn liked_and_count(markers: &MarkerList, id: &str) -> (bool, u32) {
        let post = markers.get(id).unwrap();
        (post.has_liked_by_current_user, post.like_count)
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_toggle_sticks() {
        let (store, markers, likes) = setup(LikeConfig::default());

        let outcome = likes.toggle_like("x");
        assert_eq!(
            outcome,
            ToggleOutcome::Applied {
                liked: true,
                like_count: 6,
                seq: 1
            }
        );
        // Visible before any network round-trip.
        assert_eq!(liked_and_count(&markers, "x"), (true, 6));
        assert!(store.mutations().is_empty());
        assert!(likes.pending_mutation("x").is_some());

        tokio::time::sleep(Duration::from_millis(250)).await;

        let calls = store.mutations();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].path, "/api/posts/x/like");
        assert_eq!(calls[0].auth_token.as_deref(), Some("token_1"));
        assert_eq!(calls[0].body, Some(json!({"liked": true})));
        assert_eq!(liked_and_count(&markers, "x"), (true, 6));
        assert!(likes.pending_mutation("x").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_toggle_rolls_back() {
        let (store, markers, likes) = setup(LikeConfig::default());
        store.push_mutation_result(Err(AppError::Http {
            status: 500,
            message: "boom".to_string(),
        }));

        likes.toggle_like("x");
        assert_eq!(liked_and_count(&markers, "x"), (true, 6));

        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(store.mutations().len(), 1);
        assert_eq!(liked_and_count(&markers, "x"), (false, 5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_failure_rolls_back() {
        let store = Arc::new(FakeRecordStore::new());
        let markers = MarkerList::new();
        markers.replace_all(
            RadiusQuery::new(saigon_center(), 2.0).unwrap(),
            vec![post_at("x", saigon_center(), 5)],
        );
        let likes = LikeCoordinator::new(
            store.clone(),
            markers.clone(),
            &Identity::anonymous(),
            &LikeConfig::default(),
        );

        likes.toggle_like("x");
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(liked_and_count(&markers, "x"), (false, 5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_toggle_within_throttle_is_noop() {
        let (store, markers, likes) = setup(LikeConfig::default());

        likes.toggle_like("x");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(likes.toggle_like("x"), ToggleOutcome::Throttled);
        assert_eq!(liked_and_count(&markers, "x"), (true, 6));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(store.mutations().len(), 1);
        assert_eq!(store.mutations()[0].body, Some(json!({"liked": true})));
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_is_per_post() {
        let (store, markers, likes) = setup(LikeConfig::default());

        assert!(matches!(likes.toggle_like("x"), ToggleOutcome::Applied { .. }));
        assert!(matches!(likes.toggle_like("y"), ToggleOutcome::Applied { .. }));
        assert_eq!(liked_and_count(&markers, "y"), (true, 1));

        tokio::time::sleep(Duration::from_millis(250)).await;
        let mut paths: Vec<String> = store.mutations().into_iter().map(|m| m.path).collect();
        paths.sort();
        assert_eq!(paths, vec!["/api/posts/x/like", "/api/posts/y/like"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_allowed_after_throttle_window() {
        let (_store, markers, likes) = setup(LikeConfig::default());

        likes.toggle_like("x");
        tokio::time::sleep(Duration::from_millis(301)).await;
        assert!(matches!(likes.toggle_like("x"), ToggleOutcome::Applied { .. }));
        assert_eq!(liked_and_count(&markers, "x"), (false, 5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_toggles_collapse_into_one_request() {
        let (store, markers, likes) = setup(no_throttle());

        for _ in 0..5 {
            assert!(matches!(likes.toggle_like("x"), ToggleOutcome::Applied { .. }));
            tokio::time::sleep(Duration::from_millis(40)).await;
        }
        assert!(store.mutations().is_empty());

        tokio::time::sleep(Duration::from_millis(300)).await;

        let calls = store.mutations();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].body, Some(json!({"liked": true})));
        assert_eq!(liked_and_count(&markers, "x"), (true, 6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_even_burst_sends_nothing() {
        let (store, markers, likes) = setup(no_throttle());

        likes.toggle_like("x");
        tokio::time::sleep(TICK).await;
        likes.toggle_like("x");

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(store.mutations().is_empty());
        assert_eq!(liked_and_count(&markers, "x"), (false, 5));
        assert!(likes.pending_mutation("x").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_burst_rolls_back_to_pre_burst_state() {
        let (store, markers, likes) = setup(no_throttle());
        store.push_mutation_result(Err(AppError::Internal("connection reset".to_string())));

        for _ in 0..3 {
            likes.toggle_like("x");
            tokio::time::sleep(TICK).await;
        }
        assert_eq!(liked_and_count(&markers, "x"), (true, 6));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(store.mutations().len(), 1);
        assert_eq!(liked_and_count(&markers, "x"), (false, 5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_failure_does_not_clobber_newer_toggle() {
        let (store, markers, likes) = setup(LikeConfig {
            throttle_ms: 0,
            debounce_ms: 50,
        });
        // First request is slow and fails; second succeeds quickly.
        store.push_mutation_delay(Duration::from_millis(500));
        store.push_mutation_result(Err(AppError::Http {
            status: 502,
            message: "bad gateway".to_string(),
        }));

        likes.toggle_like("x");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.mutations().len(), 1);

        // New burst while the first request is still in flight.
        likes.toggle_like("x");
        assert_eq!(liked_and_count(&markers, "x"), (false, 5));

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(store.mutations().len(), 2);
        assert_eq!(store.mutations()[1].body, Some(json!({"liked": false})));
        // The stale failure was discarded; the newer state stands.
        assert_eq!(liked_and_count(&markers, "x"), (false, 5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_success_still_records_server_state() {
        let (store, markers, likes) = setup(LikeConfig::default());
        // The like is slow but succeeds; the unlike after it fails fast.
        store.push_mutation_delay(Duration::from_millis(500));
        store.push_mutation_result(Ok(serde_json::Value::Null));
        store.push_mutation_result(Err(AppError::Internal("down".to_string())));

        likes.toggle_like("x");
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(store.mutations().len(), 1);
        likes.toggle_like("x");
        assert_eq!(liked_and_count(&markers, "x"), (false, 5));

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(store.mutations().len(), 2);
        assert_eq!(liked_and_count(&markers, "x"), (true, 6));

        // The server already counts the viewer's like; no phantom delta.
        markers.merge_remote(crate::models::PostPatch {
            id: "x".to_string(),
            like_count: Some(6),
            ..Default::default()
        });
        assert_eq!(liked_and_count(&markers, "x"), (true, 6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_post_state_is_pruned() {
        let (_store, _markers, likes) = setup(LikeConfig::default());

        assert_eq!(likes.toggle_like("nope"), ToggleOutcome::UnknownPost);
        assert_eq!(likes.tracked_posts(), 0);

        likes.toggle_like("x");
        assert_eq!(likes.tracked_posts(), 1);
        tokio::time::sleep(Duration::from_millis(400)).await;

        likes.toggle_like("y");
        assert_eq!(likes.tracked_posts(), 1);
        assert!(likes.pending_mutation("y").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_count_becomes_server_count() {
        let (store, markers, likes) = setup(LikeConfig::default());
        store.push_mutation_result(Ok(json!({"liked": true, "likeCount": 10})));

        likes.toggle_like("x");
        tokio::time::sleep(Duration::from_millis(250)).await;

        // Displayed value stays as-is on success.
        assert_eq!(liked_and_count(&markers, "x"), (true, 6));
        // A following unlike that fails restores the pre-toggle display.
        store.push_mutation_result(Err(AppError::Internal("down".to_string())));
        tokio::time::sleep(Duration::from_millis(100)).await;
        likes.toggle_like("x");
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(liked_and_count(&markers, "x"), (true, 6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_post() {
        let (store, _markers, likes) = setup(LikeConfig::default());
        assert_eq!(likes.toggle_like("nope"), ToggleOutcome::UnknownPost);
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(store.mutations().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_suppresses_pending_request() {
        let (store, markers, likes) = setup(LikeConfig::default());

        likes.toggle_like("x");
        likes.shutdown();
        assert!(likes.is_closed());
        assert_eq!(likes.toggle_like("y"), ToggleOutcome::Closed);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(store.mutations().is_empty());
        // Optimistic state is left for the (unmounted) screen as it was.
        assert_eq!(liked_and_count(&markers, "x"), (true, 6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_after_drop_is_ignored() {
        let (store, markers, likes) = setup(LikeConfig::default());
        store.push_mutation_delay(Duration::from_millis(500));
        store.push_mutation_result(Err(AppError::Internal("late".to_string())));

        likes.toggle_like("x");
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(store.mutations().len(), 1);

        drop(likes);
        tokio::time::sleep(Duration::from_millis(1000)).await;
        // No rollback happened after the owner went away.
        assert_eq!(liked_and_count(&markers, "x"), (true, 6));
    }
}
