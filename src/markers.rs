//! Screen-owned list of map markers.
//!
//! Three flows write here: fetch-replace, the optimistic like toggle (with its
//! ack or rollback), and realtime merges. Every write is one short critical
//! section, so callers never observe a half-applied change.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::constants::MAX_POST_IMAGES;
use crate::models::{clamp_like_count, LikeSnapshot, Post, PostPatch, RadiusQuery};
use crate::utils::geo::haversine_km;

#[derive(Debug, Clone)]
struct Marker {
    post: Post,
    server_liked: bool,
    server_like_count: u32,
    revision: u64,
}

impl Marker {
    fn new(post: Post, revision: u64) -> Self {
        Self {
            server_liked: post.has_liked_by_current_user,
            server_like_count: post.like_count,
            post,
            revision,
        }
    }

    /// Displayed count: server count plus the pending optimistic delta, if any.
    fn displayed_count(&self) -> u32 {
        match (self.post.has_liked_by_current_user, self.server_liked) {
            (true, false) => self.server_like_count.saturating_add(1),
            (false, true) => self.server_like_count.saturating_sub(1),
            _ => self.server_like_count,
        }
    }
}

#[derive(Debug, Default)]
struct MarkerState {
    query: Option<RadiusQuery>,
    markers: Vec<Marker>,
    next_revision: u64,
}

impl MarkerState {
    fn find_mut(&mut self, id: &str) -> Option<&mut Marker> {
        self.markers.iter_mut().find(|m| m.post.id == id)
    }

    fn bump_revision(&mut self) -> u64 {
        self.next_revision += 1;
        self.next_revision
    }
}

/// Result of an optimistic toggle: the values before and after.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptimisticToggle {
    pub before: LikeSnapshot,
    pub liked: bool,
    pub like_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Updated,
    Removed,
    Missing,
}

#[derive(Debug, Clone, Default)]
pub struct MarkerList {
    inner: Arc<Mutex<MarkerState>>,
}

impl MarkerList {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MarkerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn replace_all(&self, query: RadiusQuery, posts: Vec<Post>) {
        let mut state = self.lock();
        let revision = state.bump_revision();
        state.query = Some(query);
        state.markers = posts
            .into_iter()
            .map(|post| Marker::new(post, revision))
            .collect();
    }

    pub fn query(&self) -> Option<RadiusQuery> {
        self.lock().query
    }

    pub fn snapshot(&self) -> Vec<Post> {
        self.lock().markers.iter().map(|m| m.post.clone()).collect()
    }

    pub fn get(&self, id: &str) -> Option<Post> {
        self.lock()
            .markers
            .iter()
            .find(|m| m.post.id == id)
            .map(|m| m.post.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().markers.is_empty()
    }

    /// Flips the viewer's like and moves the count by one.
    pub fn apply_optimistic_toggle(&self, id: &str) -> Option<OptimisticToggle> {
        let mut state = self.lock();
        let marker = state.find_mut(id)?;

        let before = LikeSnapshot {
            liked: marker.post.has_liked_by_current_user,
            like_count: marker.post.like_count,
            revision: marker.revision,
        };

        let liked = !before.liked;
        marker.post.has_liked_by_current_user = liked;
        marker.post.like_count = if liked {
            before.like_count.saturating_add(1)
        } else {
            before.like_count.saturating_sub(1)
        };

        Some(OptimisticToggle {
            before,
            liked,
            like_count: marker.post.like_count,
        })
    }

    /// Records what the server acknowledged. Displayed values are left alone;
    /// the revision moves so a later rollback rebuilds from this server state.
    pub fn confirm_like(&self, id: &str, liked: bool, server_count: Option<u32>) {
        let mut state = self.lock();
        let revision = state.bump_revision();
        let Some(marker) = state.find_mut(id) else {
            return;
        };

        marker.server_like_count = match server_count {
            Some(count) => count,
            None => match (liked, marker.server_liked) {
                (true, false) => marker.server_like_count.saturating_add(1),
                (false, true) => marker.server_like_count.saturating_sub(1),
                _ => marker.server_like_count,
            },
        };
        marker.server_liked = liked;
        marker.revision = revision;
    }

    /// Restores the values captured before the toggle. When a realtime merge
    /// landed after the capture, the count is rebuilt from that newer server
    /// count instead of the captured one.
    pub fn rollback(&self, id: &str, snapshot: &LikeSnapshot) {
        let mut state = self.lock();
        let Some(marker) = state.find_mut(id) else {
            return;
        };

        marker.post.has_liked_by_current_user = snapshot.liked;
        marker.post.like_count = if marker.revision == snapshot.revision {
            snapshot.like_count
        } else {
            marker.displayed_count()
        };
    }

    /// Overwrites only the fields present in `patch`. The viewer's own like
    /// flag is never touched; a pending optimistic delta survives on top of
    /// the pushed count.
    pub fn merge_remote(&self, patch: PostPatch) -> MergeOutcome {
        let mut state = self.lock();

        if patch.visible == Some(false) {
            let before = state.markers.len();
            state.markers.retain(|m| m.post.id != patch.id);
            return if state.markers.len() < before {
                MergeOutcome::Removed
            } else {
                MergeOutcome::Missing
            };
        }

        let revision = state.bump_revision();
        let Some(marker) = state.find_mut(&patch.id) else {
            return MergeOutcome::Missing;
        };

        if let Some(count) = patch.like_count {
            marker.server_like_count = clamp_like_count(count);
            marker.post.like_count = marker.displayed_count();
        }
        if let Some(content) = patch.content {
            marker.post.text = content;
        }
        if let Some(address) = patch.address {
            marker.post.address = Some(address).filter(|a| !a.is_empty());
        }
        if let Some(mut images) = patch.images {
            images.retain(|url| !url.is_empty());
            images.truncate(MAX_POST_IMAGES);
            marker.post.images = images;
        }
        marker.revision = revision;

        MergeOutcome::Updated
    }

    /// Adds a post created elsewhere when it falls inside the current query.
    pub fn insert_remote(&self, post: Post) -> bool {
        let mut state = self.lock();
        let Some(query) = state.query else {
            return false;
        };
        if !post.visible
            || state.markers.iter().any(|m| m.post.id == post.id)
            || haversine_km(&query.center, &post.coordinate) > query.radius_km
        {
            return false;
        }

        let revision = state.bump_revision();
        state.markers.push(Marker::new(post, revision));
        true
    }

    pub fn remove(&self, id: &str) -> bool {
        let mut state = self.lock();
        let before = state.markers.len();
        state.markers.retain(|m| m.post.id != id);
        state.markers.len() < before
    }
}
