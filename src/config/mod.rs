use crate::constants::{
    DEFAULT_LIKE_DEBOUNCE_MS, DEFAULT_LIKE_THROTTLE_MS, DEFAULT_PAGE_SIZE, DEFAULT_RADIUS_KM,
    POSTS_COLLECTION,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_backend_url")]
    pub base_url: String,
    #[serde(default = "default_backend_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_posts_collection")]
    pub posts_collection: String,
}

fn default_backend_url() -> String {
    "http://127.0.0.1:8090".to_string()
}

fn default_backend_timeout_seconds() -> u64 {
    10
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_posts_collection() -> String {
    POSTS_COLLECTION.to_string()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_backend_url(),
            timeout_seconds: default_backend_timeout_seconds(),
            page_size: default_page_size(),
            posts_collection: default_posts_collection(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LikeConfig {
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

fn default_throttle_ms() -> u64 {
    DEFAULT_LIKE_THROTTLE_MS
}

fn default_debounce_ms() -> u64 {
    DEFAULT_LIKE_DEBOUNCE_MS
}

impl LikeConfig {
    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for LikeConfig {
    fn default() -> Self {
        Self {
            throttle_ms: default_throttle_ms(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapConfig {
    #[serde(default = "default_radius_km")]
    pub default_radius_km: f64,
}

fn default_radius_km() -> f64 {
    DEFAULT_RADIUS_KM
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            default_radius_km: default_radius_km(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReverseGeocodingConfig {
    #[serde(default = "default_geo_enabled")]
    pub enabled: bool,
    #[serde(default = "default_geocoding_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_geocoding_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_geo_enabled() -> bool {
    true
}

fn default_geocoding_url() -> String {
    "https://nominatim.openstreetmap.org/reverse".to_string()
}

fn default_user_agent() -> String {
    "PettyHouse/1.0".to_string()
}

fn default_geocoding_timeout_seconds() -> u64 {
    10
}

impl Default for ReverseGeocodingConfig {
    fn default() -> Self {
        Self {
            enabled: default_geo_enabled(),
            base_url: default_geocoding_url(),
            user_agent: default_user_agent(),
            timeout_seconds: default_geocoding_timeout_seconds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub likes: LikeConfig,
    #[serde(default)]
    pub map: MapConfig,
    #[serde(default)]
    pub reverse_geocoding: ReverseGeocodingConfig,
}

impl Config {
    /// Token and user id from the environment take precedence over the file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(token) = std::env::var("PETTY_HOUSE_TOKEN") {
            if !token.trim().is_empty() {
                self.auth.token = Some(token);
            }
        }
        if let Ok(user_id) = std::env::var("PETTY_HOUSE_USER_ID") {
            if !user_id.trim().is_empty() {
                self.auth.user_id = Some(user_id);
            }
        }
    }
}

pub fn load_config(config_path: &Path) -> Config {
    if !config_path.exists() {
        return Config::default();
    }

    match fs::read_to_string(config_path) {
        Ok(content) => serde_yaml::from_str(&content).unwrap_or_default(),
        Err(_) => Config::default(),
    }
}

pub fn save_default_config(config_path: &Path) -> std::io::Result<()> {
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let config = Config::default();
    let yaml = serde_yaml::to_string(&config).map_err(|e| std::io::Error::other(e.to_string()))?;
    fs::write(config_path, yaml)
}
