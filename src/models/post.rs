use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::MAX_POST_IMAGES;
use crate::error::{AppError, AppResult};
use crate::models::Coordinate;
use crate::utils::datetime::parse_datetime;

/// A post as the map and list render it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    pub owner_id: String,
    pub owner_name: Option<String>,
    pub coordinate: Coordinate,
    pub text: String,
    pub address: Option<String>,
    pub images: Vec<String>,
    pub like_count: u32,
    pub has_liked_by_current_user: bool,
    pub created_at: DateTime<Utc>,
    pub visible: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserRecord {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LikeRecord {
    #[serde(default)]
    pub id: String,
    pub user: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PostExpand {
    #[serde(default)]
    pub user: Option<UserRecord>,
    #[serde(default)]
    pub likes_via_post: Vec<LikeRecord>,
}

/// Raw `posts` record as PocketBase returns it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRecord {
    pub id: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub like_count: i64,
    #[serde(default = "default_visible")]
    pub visible: bool,
    #[serde(default)]
    pub created: String,
    #[serde(default)]
    pub expand: PostExpand,
}

fn default_visible() -> bool {
    true
}

impl PostRecord {
    pub fn coordinate(&self) -> Coordinate {
        Coordinate {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }

    /// `viewer_id` decides `has_liked_by_current_user` from the expanded likes.
    pub fn into_post(self, viewer_id: Option<&str>) -> AppResult<Post> {
        let coordinate = Coordinate::new(self.latitude, self.longitude)?;
        let created_at = parse_datetime(&self.created).ok_or_else(|| {
            AppError::Validation(format!(
                "post {} has unreadable created timestamp '{}'",
                self.id, self.created
            ))
        })?;

        let has_liked = viewer_id
            .map(|viewer| {
                self.expand
                    .likes_via_post
                    .iter()
                    .any(|like| like.user == viewer)
            })
            .unwrap_or(false);

        let owner_name = self
            .expand
            .user
            .as_ref()
            .and_then(|u| u.name.clone().filter(|n| !n.is_empty()).or(u.username.clone()));

        let mut images = self.images;
        images.retain(|url| !url.is_empty());
        images.truncate(MAX_POST_IMAGES);

        Ok(Post {
            id: self.id,
            owner_id: self.user,
            owner_name,
            coordinate,
            text: self.content,
            address: self.address.filter(|a| !a.is_empty()),
            images,
            like_count: clamp_like_count(self.like_count),
            has_liked_by_current_user: has_liked,
            created_at,
            visible: self.visible,
        })
    }
}

pub fn clamp_like_count(count: i64) -> u32 {
    count.clamp(0, u32::MAX as i64) as u32
}

/// Fields a realtime push may carry for an existing post. Absent fields stay `None`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostPatch {
    pub id: String,
    #[serde(default)]
    pub like_count: Option<i64>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub images: Option<Vec<String>>,
    #[serde(default)]
    pub visible: Option<bool>,
}
