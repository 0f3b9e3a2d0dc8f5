pub mod graphql;

use log::{debug, info};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, ORIGIN, REFERER};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::canvas::TileRecord;
use crate::error::{StatusOr, TimelapseError};
use crate::progress::progress_bar;
use crate::table::{append_row, ensure_table, TimestampTable};
use crate::timelapse::{format_timestamp, T_MAX, T_MIN};

pub const DEFAULT_ENDPOINT: &str = "https://gql-realtime-2.reddit.com/query";
const CANVAS_ORIGIN: &str = "https://garlic-bread.reddit.com";

/// Configuration for recording the frame history
#[derive(Debug, Clone)]
pub struct ScrapeConfig {
    pub endpoint: String,
    /// Bearer token sent with every request
    pub token: String,
    pub table_path: PathBuf,
    pub start: i64,
    pub end: i64,
    pub step_ms: i64,
}

impl ScrapeConfig {
    pub fn new(token: impl Into<String>, table_path: impl Into<PathBuf>) -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            token: token.into(),
            table_path: table_path.into(),
            start: T_MIN,
            end: T_MAX,
            step_ms: 1000,
        }
    }

    /// Timestamps still missing from `recorded`, in ascending order
    pub fn pending_timestamps(&self, recorded: &HashSet<i64>) -> Vec<i64> {
        if self.step_ms <= 0 || self.start > self.end {
            return Vec::new();
        }
        (self.start..=self.end)
            .step_by(self.step_ms as usize)
            .filter(|ts| !recorded.contains(ts))
            .collect()
    }
}

/// Polls the GraphQL endpoint and appends one table row per timestamp
pub struct Scraper {
    config: ScrapeConfig,
    client: Client,
}

impl Scraper {
    pub fn new(config: ScrapeConfig) -> StatusOr<Self> {
        if config.token.trim().is_empty() {
            return Err(TimelapseError::ConfigError(
                "an authorization token is required to scrape".to_string(),
            ));
        }
        if config.step_ms <= 0 {
            return Err(TimelapseError::ConfigError(format!(
                "step must be positive, got {} ms",
                config.step_ms
            )));
        }

        let header = |value: &str| {
            HeaderValue::from_str(value)
                .map_err(|e| TimelapseError::ConfigError(format!("Invalid header value: {}", e)))
        };
        let mut headers = HeaderMap::new();
        headers.insert(ORIGIN, header(CANVAS_ORIGIN)?);
        headers.insert(REFERER, header(&format!("{}/", CANVAS_ORIGIN))?);
        headers.insert(AUTHORIZATION, header(&format!("Bearer {}", config.token.trim()))?);
        headers.insert("apollographql-client-name", header("garlic-bread")?);
        headers.insert(CONTENT_TYPE, header("application/json")?);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| TimelapseError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    /// Ask the endpoint which tile snapshots were live at `timestamp`
    pub fn fetch_record(&self, timestamp: i64) -> StatusOr<TileRecord> {
        let fetch_error = |reason: String| TimelapseError::FetchError {
            url: self.config.endpoint.clone(),
            reason,
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .json(&graphql::frame_history_request(timestamp))
            .send()
            .map_err(|e| fetch_error(e.to_string()))?;

        if !response.status().is_success() {
            return Err(fetch_error(format!("HTTP {}", response.status())));
        }

        let body = response.text().map_err(|e| fetch_error(e.to_string()))?;
        graphql::parse_frame_history(&body)
    }

    /// Record every missing timestamp, returning how many rows were added
    pub fn run(&self) -> StatusOr<usize> {
        ensure_table(&self.config.table_path)?;
        let recorded = TimestampTable::load(&self.config.table_path)?.timestamps();
        let pending = self.config.pending_timestamps(&recorded);
        info!("{} timestamps recorded, {} to go", recorded.len(), pending.len());

        let progress = progress_bar(pending.len(), "timestamps");
        for &timestamp in &pending {
            let record = self.fetch_record(timestamp)?;
            debug!("{}: {} tiles", format_timestamp(timestamp), record.present().count());
            append_row(&self.config.table_path, timestamp, &record)?;
            progress.inc(1);
        }
        progress.finish();

        info!("Recorded {} timestamps into {}", pending.len(), self.config.table_path.display());
        Ok(pending.len())
    }
}
