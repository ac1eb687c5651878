use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::error::AppResult;
use crate::geo_query::GeoQueryEngine;
use crate::likes::LikeCoordinator;
use crate::markers::MarkerList;
use crate::models::{RadiusQuery, ToggleOutcome};
use crate::realtime::RealtimeReconciler;
use crate::report::report_post;
use crate::store::{Identity, RealtimeTransport, RecordStore};

/// Everything one map screen owns: the marker list and the three flows that
/// write to it.
pub struct MapSession {
    engine: GeoQueryEngine,
    markers: MarkerList,
    likes: LikeCoordinator,
    store: Arc<dyn RecordStore>,
    transport: Arc<dyn RealtimeTransport>,
    identity: Identity,
    collection: String,
    realtime: Option<RealtimeReconciler>,
}

impl MapSession {
    pub fn new(
        store: Arc<dyn RecordStore>,
        transport: Arc<dyn RealtimeTransport>,
        identity: Identity,
        config: &Config,
    ) -> Self {
        let markers = MarkerList::new();
        let engine = GeoQueryEngine::new(Arc::clone(&store), identity.user_id.clone(), &config.backend);
        let likes = LikeCoordinator::new(Arc::clone(&store), markers.clone(), &identity, &config.likes);

        Self {
            engine,
            markers,
            likes,
            store,
            transport,
            identity,
            collection: config.backend.posts_collection.clone(),
            realtime: None,
        }
    }

    pub fn markers(&self) -> &MarkerList {
        &self.markers
    }

    /// Re-runs the radius query. On failure the current markers stay put.
    pub async fn refresh(&self, query: RadiusQuery) -> AppResult<usize> {
        let posts = self.engine.fetch(&query).await?;
        let count = posts.len();
        self.markers.replace_all(query, posts);
        Ok(count)
    }

    /// Starts realtime sync. Calling it again while the feed is live is a no-op.
    pub async fn mount(&mut self) -> AppResult<()> {
        if self.is_mounted() {
            return Ok(());
        }

        let reconciler = RealtimeReconciler::start(
            self.transport.as_ref(),
            &self.collection,
            self.markers.clone(),
            self.identity.user_id.clone(),
        )
        .await?;
        self.realtime = Some(reconciler);
        Ok(())
    }

    pub fn is_mounted(&self) -> bool {
        self.realtime.as_ref().is_some_and(RealtimeReconciler::is_running)
    }

    /// Stops realtime sync and abandons pending like requests.
    pub async fn unmount(&mut self) {
        if let Some(reconciler) = self.realtime.take() {
            reconciler.stop().await;
        }
        self.likes.shutdown();
        info!("Map session unmounted");
    }

    pub fn toggle_like(&self, post_id: &str) -> ToggleOutcome {
        self.likes.toggle_like(post_id)
    }

    pub async fn report(&self, post_id: &str, reason: Option<&str>) -> AppResult<()> {
        report_post(self.store.as_ref(), &self.identity, post_id, reason).await
    }
}
