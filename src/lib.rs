pub mod config;
pub mod constants;
pub mod error;
pub mod geo_query;
pub mod likes;
pub mod location;
pub mod logging;
pub mod markers;
pub mod models;
pub mod realtime;
pub mod report;
pub mod session;
pub mod store;
pub mod utils;

#[cfg(test)]
mod test_utils;

pub const VERSION: &str = "0.1.0";
