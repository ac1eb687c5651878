use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::models::ReportRequest;
use crate::store::{Identity, MutationRequest, RecordStore};

/// Flags a post for moderation. Unlike likes there is no local state to roll
/// back, so failures go straight to the caller.
pub async fn report_post(
    store: &dyn RecordStore,
    identity: &Identity,
    post_id: &str,
    reason: Option<&str>,
) -> AppResult<()> {
    let post_id = post_id.trim();
    if post_id.is_empty() {
        return Err(AppError::Validation("post id is required".to_string()));
    }

    let body = ReportRequest {
        reason: reason
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string),
    };
    let request = MutationRequest::post(format!("/api/posts/{}/report", post_id), identity.token.clone())
        .with_body(serde_json::to_value(&body)?);

    match store.mutate(request).await {
        Ok(_) => {
            info!("Reported post {}", post_id);
            Ok(())
        }
        Err(e @ AppError::Authentication(_)) => Err(e),
        Err(e) => {
            warn!("Report of post {} failed: {}", post_id, e);
            Err(AppError::MutationFailed(e.to_string()))
        }
    }
}
