mod geo;
mod like;
mod post;
mod realtime;

pub use geo::*;
pub use like::*;
pub use post::*;
pub use realtime::*;
