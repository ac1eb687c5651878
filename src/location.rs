use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::constants::{DEFAULT_RADIUS_KM, LAST_LOCATION_PATH, MAX_RADIUS_KM, MIN_RADIUS_KM};
use crate::error::{AppError, AppResult};
use crate::models::Coordinate;

/// Device position source. A refused permission is `PermissionDenied`.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn current_position(&self) -> AppResult<Coordinate>;
}

/// Last known position, persisted as a small JSON file.
#[derive(Debug, Clone)]
pub struct LastLocationCache {
    path: PathBuf,
}

impl LastLocationCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn default_path() -> Self {
        Self::new(LAST_LOCATION_PATH.as_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing or unreadable files load as `None`.
    pub fn load(&self) -> Option<Coordinate> {
        let content = fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str::<Coordinate>(&content) {
            Ok(coordinate) if coordinate.validate().is_ok() => Some(coordinate),
            Ok(_) | Err(_) => {
                warn!("Ignoring corrupt location cache at {:?}", self.path);
                None
            }
        }
    }

    pub fn save(&self, coordinate: &Coordinate) -> AppResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string(coordinate)?)?;
        Ok(())
    }
}

/// Current position, falling back to the cached one when the provider fails
/// for any reason other than a refused permission.
pub async fn locate(provider: &dyn LocationProvider, cache: &LastLocationCache) -> AppResult<Coordinate> {
    match provider.current_position().await {
        Ok(coordinate) => {
            if let Err(e) = cache.save(&coordinate) {
                warn!("Failed to cache last location: {}", e);
            }
            Ok(coordinate)
        }
        Err(e @ AppError::PermissionDenied(_)) => Err(e),
        Err(e) => match cache.load() {
            Some(cached) => {
                debug!("Location unavailable ({}), using cached position", e);
                Ok(cached)
            }
            None => Err(e),
        },
    }
}

/// Radius the map screen may query with.
pub fn clamp_radius_km(radius_km: f64) -> f64 {
    if !radius_km.is_finite() {
        return DEFAULT_RADIUS_KM;
    }
    radius_km.clamp(MIN_RADIUS_KM, MAX_RADIUS_KM)
}
