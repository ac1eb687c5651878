use once_cell::sync::Lazy;
use std::path::PathBuf;

pub static DATA_DIR: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("PETTY_HOUSE_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./data"))
});

pub static CONFIG_PATH: Lazy<PathBuf> = Lazy::new(|| DATA_DIR.join("config.yaml"));
pub static LAST_LOCATION_PATH: Lazy<PathBuf> =
    Lazy::new(|| DATA_DIR.join(format!("{}.json", LAST_LOCATION_KEY)));

pub const LAST_LOCATION_KEY: &str = "last_location";

pub const EARTH_RADIUS_KM: f64 = 6371.0;
pub const DEG_TO_RAD: f64 = std::f64::consts::PI / 180.0;

pub const MIN_RADIUS_KM: f64 = 1.0;
pub const MAX_RADIUS_KM: f64 = 20.0;
pub const DEFAULT_RADIUS_KM: f64 = 5.0;

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_POST_IMAGES: usize = 3;

pub const DEFAULT_LIKE_THROTTLE_MS: u64 = 300;
pub const DEFAULT_LIKE_DEBOUNCE_MS: u64 = 200;

pub const POSTS_COLLECTION: &str = "posts";
pub const POST_USER_RELATION: &str = "user";
pub const POST_LIKES_RELATION: &str = "likes_via_post";
pub const REALTIME_ALL_RECORDS: &str = "*";
pub const NEWEST_FIRST: &str = "-created";
