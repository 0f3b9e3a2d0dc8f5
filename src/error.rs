use thiserror::Error;

#[derive(Error, Debug)]
pub enum TimelapseError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Expected exactly one row for timestamp {timestamp}, found {matches}")]
    LookupError { timestamp: i64, matches: usize },

    #[error("Failed to fetch {url}: {reason}")]
    FetchError { url: String, reason: String },

    #[error("Image error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Failed to parse frame table: {0}")]
    ParseError(String),

    #[error("Video encoding failed: {0}")]
    EncodeError(String),

    #[error("Scrape failed: {0}")]
    ScrapeError(String),

    #[error("{failed} of {total} frames failed")]
    IncompleteError { failed: usize, total: usize },

    #[error("Frame {index} failed: {source}")]
    FrameError {
        index: usize,
        #[source]
        source: Box<TimelapseError>,
    },
}

pub type StatusOr<T> = Result<T, TimelapseError>;

impl TimelapseError {
    /// Attribute an error to the frame that produced it
    pub fn in_frame(self, index: usize) -> Self {
        TimelapseError::FrameError { index, source: Box::new(self) }
    }
}
