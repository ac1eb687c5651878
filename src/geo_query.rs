use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::BackendConfig;
use crate::constants::{NEWEST_FIRST, POST_LIKES_RELATION, POST_USER_RELATION};
use crate::error::{AppError, AppResult};
use crate::models::{Coordinate, Post, PostRecord, RadiusQuery};
use crate::store::{ListQuery, RecordStore};
use crate::utils::geo::{bounding_box, haversine_km};

/// Radius search: bounding-box pre-filter on the server, exact great-circle
/// check on the client.
pub struct GeoQueryEngine {
    store: Arc<dyn RecordStore>,
    collection: String,
    viewer_id: Option<String>,
    page_size: usize,
}

impl GeoQueryEngine {
    pub fn new(store: Arc<dyn RecordStore>, viewer_id: Option<String>, config: &BackendConfig) -> Self {
        Self {
            store,
            collection: config.posts_collection.clone(),
            viewer_id,
            page_size: config.page_size.max(1),
        }
    }

    pub async fn fetch_posts_within_radius(
        &self,
        center: Coordinate,
        radius_km: f64,
    ) -> AppResult<Vec<Post>> {
        let query = RadiusQuery::new(center, radius_km)?;
        self.fetch(&query).await
    }

    /// Posts whose distance to the center is at most the radius, in the order
    /// the store returned them. Candidates beyond the page size are never seen.
    pub async fn fetch(&self, query: &RadiusQuery) -> AppResult<Vec<Post>> {
        let bbox = bounding_box(&query.center, query.radius_km);
        let list_query = ListQuery::within_bounding_box(&bbox, self.page_size)
            .expand(POST_USER_RELATION)
            .expand(POST_LIKES_RELATION)
            .sort(NEWEST_FIRST);

        let candidates = self
            .store
            .list_records(&self.collection, &list_query)
            .await
            .map_err(|e| AppError::GeoQueryFailed(e.to_string()))?;
        let candidate_count = candidates.len();

        let viewer = self.viewer_id.as_deref();
        let posts: Vec<Post> = candidates
            .into_iter()
            .filter_map(|value| {
                match serde_json::from_value::<PostRecord>(value)
                    .map_err(AppError::from)
                    .and_then(|record| record.into_post(viewer))
                {
                    Ok(post) => Some(post),
                    Err(e) => {
                        warn!("Skipping undecodable post record: {}", e);
                        None
                    }
                }
            })
            .filter(|post| haversine_km(&query.center, &post.coordinate) <= query.radius_km)
            .collect();

        debug!(
            "Radius query {:.5},{:.5} r={}km: {} candidates, {} within radius",
            query.center.latitude,
            query.center.longitude,
            query.radius_km,
            candidate_count,
            posts.len()
        );

        Ok(posts)
    }
}
