pub mod datetime;
pub mod geo;
pub mod geocoding;
