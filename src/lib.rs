pub mod cache;
pub mod canvas;
pub mod download;
pub mod encode;
pub mod error;
pub mod progress;
pub mod scrape;
pub mod table;
pub mod timelapse;

pub use error::{StatusOr, TimelapseError};
