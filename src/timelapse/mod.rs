pub mod frame;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};

use crate::canvas::{select_tiles, BoundingRect};
use crate::download::TileSource;
use crate::encode::{encode_video, ensure_ffmpeg, EncodeOptions};
use crate::error::{StatusOr, TimelapseError};
use crate::progress::progress_bar;
use crate::table::TimestampTable;

pub use frame::{fetch_frame, frame_path, render_frame, FrameTask};

/// First timestamp recorded by the scraper, in milliseconds
pub const T_MIN: i64 = 1689858232999;
/// Last timestamp recorded by the scraper, in milliseconds
pub const T_MAX: i64 = 1690320892999;

/// Bounds of the recorded history and the sampling rules derived from it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceConfig {
    pub t_min: i64,
    pub t_max: i64,
    /// Sequences start on a multiple of this many milliseconds after `t_min`
    pub align_ms: i64,
    /// Smallest accepted frameskip, in seconds
    pub min_frameskip: u32,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            t_min: T_MIN,
            t_max: T_MAX,
            align_ms: 10_000,
            min_frameskip: 2,
        }
    }
}

impl SequenceConfig {
    pub fn validate(&self) -> StatusOr<()> {
        if self.align_ms <= 0 {
            return Err(TimelapseError::ConfigError(format!(
                "alignment must be positive, got {} ms",
                self.align_ms
            )));
        }
        if self.t_min > self.t_max {
            return Err(TimelapseError::ConfigError(format!(
                "history starts at {} but ends at {}",
                self.t_min, self.t_max
            )));
        }
        Ok(())
    }

    /// Clamp a requested range to the recorded history and align its start.
    ///
    /// A non-positive `align_ms` leaves the start unaligned.
    pub fn clamp_range(&self, start: i64, end: i64) -> (i64, i64) {
        let start = start.max(self.t_min);
        let end = end.min(self.t_max);
        let start = start - (start - self.t_min).rem_euclid(self.align_ms.max(1));
        (start, end)
    }

    /// Check a frameskip against the recorded data.
    ///
    /// Parts of the history were only scraped every 2 or 5 seconds, so other
    /// intervals are rounded down to an even number of seconds.
    pub fn validate_frameskip(&self, frameskip: u32) -> StatusOr<u32> {
        if frameskip < self.min_frameskip {
            return Err(TimelapseError::ConfigError(format!(
                "frameskip must be at least {} seconds, got {}",
                self.min_frameskip, frameskip
            )));
        }
        if frameskip % 2 != 0 && frameskip % 5 != 0 {
            let rounded = frameskip - frameskip % 2;
            warn!("Frameskip {} is not a multiple of 2 or 5, using {}", frameskip, rounded);
            return Ok(rounded);
        }
        Ok(frameskip)
    }

    /// Timestamps of every frame between `start` and `end`, inclusive
    pub fn frame_timestamps(&self, start: i64, end: i64, frameskip: u32) -> Vec<i64> {
        if start > end || frameskip == 0 {
            return Vec::new();
        }
        let step = frameskip as usize * 1000;
        (start..=end).step_by(step).collect()
    }
}

/// Look up the tiles of every timestamp and keep only those `rect` needs.
///
/// A timestamp without exactly one row fails the whole plan before anything
/// is fetched.
pub fn plan_tasks(table: &TimestampTable, timestamps: &[i64], rect: &BoundingRect) -> StatusOr<Vec<FrameTask>> {
    let mask = select_tiles(rect);
    debug!("Tile mask for {:?}: {:?}", rect, mask.as_array());

    timestamps
        .iter()
        .enumerate()
        .map(|(index, &timestamp)| {
            let record = table.lookup(timestamp)?;
            Ok(FrameTask {
                index,
                timestamp,
                tiles: mask.apply(record),
            })
        })
        .collect()
}

/// Render a millisecond timestamp for logs
pub fn format_timestamp(timestamp: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(timestamp)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

/// Configuration for one timelapse run
#[derive(Debug, Clone)]
pub struct TimelapseConfig {
    pub rect: BoundingRect,
    pub start: i64,
    pub end: i64,
    /// Seconds between consecutive frames
    pub frameskip: u32,
    pub output_dir: PathBuf,
    /// Keep frames from an earlier run and only render the missing ones
    pub resume: bool,
    /// Number of frames rendered in parallel
    pub workers: usize,
    pub sequence: SequenceConfig,
    /// Encode the frames once they are all present
    pub video: Option<EncodeOptions>,
}

impl TimelapseConfig {
    pub fn new(rect: BoundingRect, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            rect,
            start: T_MIN,
            end: T_MAX,
            frameskip: 60,
            output_dir: output_dir.into(),
            resume: false,
            workers: 16,
            sequence: SequenceConfig::default(),
            video: None,
        }
    }
}

/// What happened to each frame of a run
#[derive(Debug, Default)]
pub struct FrameReport {
    pub total: usize,
    pub written: Vec<usize>,
    pub skipped: Vec<usize>,
    pub failed: Vec<TimelapseError>,
}

impl FrameReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct TimelapseBuilder {
    config: TimelapseConfig,
}

impl TimelapseBuilder {
    pub fn new(config: TimelapseConfig) -> Self {
        Self { config }
    }

    pub fn images_dir(&self) -> PathBuf {
        self.config.output_dir.join("images")
    }

    /// Create the image directory, wiping it first unless resuming
    fn prepare_images_dir(&self) -> StatusOr<PathBuf> {
        let images_dir = self.images_dir();
        if images_dir.exists() && !self.config.resume {
            info!("Removing previous frames in {}", images_dir.display());
            fs::remove_dir_all(&images_dir)?;
        }
        fs::create_dir_all(&images_dir)?;
        Ok(images_dir)
    }

    /// Timestamps sampled for this run
    pub fn timestamps(&self) -> StatusOr<Vec<i64>> {
        let sequence = &self.config.sequence;
        sequence.validate()?;
        let frameskip = sequence.validate_frameskip(self.config.frameskip)?;
        let (start, end) = sequence.clamp_range(self.config.start, self.config.end);
        Ok(sequence.frame_timestamps(start, end, frameskip))
    }

    /// Render every frame of the run and encode the result.
    ///
    /// Configuration is checked before anything is fetched or deleted. Frames
    /// that fail do not stop the others. If any failed, the frames that did
    /// succeed stay on disk for a resumed run and no video is encoded.
    pub fn build_sequence(&self, table: &TimestampTable, source: &dyn TileSource) -> StatusOr<FrameReport> {
        if self.config.workers == 0 {
            return Err(TimelapseError::ConfigError("at least one worker is required".to_string()));
        }
        if let Some(video) = &self.config.video {
            video.validate()?;
            ensure_ffmpeg()?;
        }

        let timestamps = self.timestamps()?;
        let (first, last) = match (timestamps.first(), timestamps.last()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => {
                return Err(TimelapseError::ConfigError(format!(
                    "no frames between {} and {}",
                    format_timestamp(self.config.start),
                    format_timestamp(self.config.end)
                )));
            }
        };
        info!(
            "Processing {} timestamps from {} to {}",
            timestamps.len(),
            format_timestamp(first),
            format_timestamp(last)
        );

        let tasks = plan_tasks(table, &timestamps, &self.config.rect)?;
        let images_dir = self.prepare_images_dir()?;
        let report = self.render_frames(tasks, &images_dir, source)?;

        if !report.is_complete() {
            for failure in &report.failed {
                error!("{}", failure);
            }
            return Err(TimelapseError::IncompleteError {
                failed: report.failed.len(),
                total: report.total,
            });
        }

        if let Some(video) = &self.config.video {
            encode_video(&self.config.output_dir, video)?;
        }

        Ok(report)
    }

    /// Render the tasks whose frame is not on disk yet
    fn render_frames(&self, tasks: Vec<FrameTask>, images_dir: &Path, source: &dyn TileSource) -> StatusOr<FrameReport> {
        let total = tasks.len();
        let (pending, present): (Vec<FrameTask>, Vec<FrameTask>) = tasks
            .into_iter()
            .partition(|task| !(self.config.resume && frame_path(images_dir, task.index).exists()));

        let mut report = FrameReport {
            total,
            skipped: present.iter().map(|task| task.index).collect(),
            ..Default::default()
        };
        if !report.skipped.is_empty() {
            info!("Resuming: {} of {} frames already present", report.skipped.len(), total);
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers)
            .build()
            .map_err(|e| TimelapseError::ConfigError(format!("Failed to build worker pool: {}", e)))?;

        info!("Fetching {} frames with {} workers", pending.len(), self.config.workers);
        let progress = progress_bar(pending.len(), "frames");
        let rect = self.config.rect;

        let results: Vec<(usize, StatusOr<PathBuf>)> = pool.install(|| {
            pending
                .par_iter()
                .map(|task| {
                    let result = fetch_frame(task, &rect, images_dir, source).map_err(|e| e.in_frame(task.index));
                    progress.inc(1);
                    (task.index, result)
                })
                .collect()
        });
        progress.finish();

        for (index, result) in results {
            match result {
                Ok(_) => report.written.push(index),
                Err(e) => report.failed.push(e),
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::frame::tests::{record, MemoryTileSource};
    use super::*;
    use crate::canvas::normalize;

    fn table_for(timestamps: &[i64]) -> TimestampTable {
        let mut csv = String::from("timestamp,0,1,2,3,4,5\n");
        for ts in timestamps {
            csv.push_str(&format!("{},,b.png,,,e.png,\n", ts));
        }
        TimestampTable::parse(&csv).expect("parse")
    }

    fn builder(dir: &Path, start: i64, end: i64, frameskip: u32, resume: bool) -> TimelapseBuilder {
        let mut config = TimelapseConfig::new(normalize(-10, -10, 10, 10), dir);
        config.start = start;
        config.end = end;
        config.frameskip = frameskip;
        config.resume = resume;
        config.workers = 4;
        TimelapseBuilder::new(config)
    }

    #[test]
    fn test_clamp_and_align() {
        let sequence = SequenceConfig::default();
        assert_eq!(sequence.clamp_range(0, i64::MAX), (T_MIN, T_MAX));
        assert_eq!(sequence.clamp_range(T_MIN + 12_345, T_MAX), (T_MIN + 10_000, T_MAX));
        assert_eq!(sequence.clamp_range(T_MIN + 20_000, T_MIN + 25_000), (T_MIN + 20_000, T_MIN + 25_000));
    }

    #[test]
    fn test_frame_timestamps() {
        let sequence = SequenceConfig::default();
        assert_eq!(
            sequence.frame_timestamps(T_MIN, T_MIN + 10_000, 10),
            vec![T_MIN, T_MIN + 10_000]
        );
        assert_eq!(sequence.frame_timestamps(T_MIN, T_MIN + 9_999, 10), vec![T_MIN]);
        assert_eq!(sequence.frame_timestamps(T_MIN, T_MIN + 7_000, 2).len(), 4);
        assert!(sequence.frame_timestamps(T_MIN + 1, T_MIN, 2).is_empty());
    }

    #[test]
    fn test_validate_frameskip() {
        let sequence = SequenceConfig::default();
        assert!(sequence.validate_frameskip(0).is_err());
        assert!(sequence.validate_frameskip(1).is_err());
        assert_eq!(sequence.validate_frameskip(2).expect("2"), 2);
        assert_eq!(sequence.validate_frameskip(3).expect("3"), 2);
        assert_eq!(sequence.validate_frameskip(5).expect("5"), 5);
        assert_eq!(sequence.validate_frameskip(7).expect("7"), 6);
        assert_eq!(sequence.validate_frameskip(15).expect("15"), 15);
        assert_eq!(sequence.validate_frameskip(60).expect("60"), 60);
    }

    #[test]
    fn test_plan_two_frames() {
        let table = table_for(&[T_MIN, T_MIN + 10_000]);
        let sequence = SequenceConfig::default();
        let timestamps = sequence.frame_timestamps(T_MIN, T_MIN + 10_000, 10);
        let rect = normalize(-1500, -1000, -501, -1);

        let tasks = plan_tasks(&table, &timestamps, &rect).expect("plan");

        assert_eq!(tasks.len(), 2);
        assert_eq!((tasks[0].index, tasks[0].timestamp), (0, T_MIN));
        assert_eq!((tasks[1].index, tasks[1].timestamp), (1, T_MIN + 10_000));
        // Only tile 0 is needed, and it has no snapshot here
        assert!(tasks[0].tiles.is_empty());
    }

    #[test]
    fn test_plan_masks_records() {
        let table = table_for(&[T_MIN]);
        let tasks = plan_tasks(&table, &[T_MIN], &normalize(-10, -10, 10, 10)).expect("plan");
        assert_eq!(tasks[0].tiles, record(["", "b.png", "", "", "e.png", ""]));
    }

    #[test]
    fn test_plan_missing_row_fails() {
        let table = table_for(&[T_MIN]);
        let result = plan_tasks(&table, &[T_MIN, T_MIN + 10_000], &normalize(0, 0, 1, 1));
        assert!(matches!(
            result,
            Err(TimelapseError::LookupError { matches: 0, .. })
        ));
    }

    #[test]
    fn test_build_then_resume() {
        let dir = tempfile::tempdir().expect("tempdir");
        let timestamps = [T_MIN, T_MIN + 10_000, T_MIN + 20_000];
        let table = table_for(&timestamps);

        let first = MemoryTileSource::new().with_tile(1, "b.png").with_tile(4, "e.png");
        let report = builder(dir.path(), T_MIN, T_MIN + 20_000, 10, false)
            .build_sequence(&table, &first)
            .expect("first run");
        assert_eq!(report.written.len(), 3);
        assert_eq!(first.fetch_count(), 6);

        let images = dir.path().join("images");
        let before: Vec<Vec<u8>> = (0..3)
            .map(|i| fs::read(frame_path(&images, i)).expect("frame"))
            .collect();

        let second = MemoryTileSource::new().with_tile(1, "b.png").with_tile(4, "e.png");
        let report = builder(dir.path(), T_MIN, T_MIN + 20_000, 10, true)
            .build_sequence(&table, &second)
            .expect("resumed run");

        assert_eq!(second.fetch_count(), 0);
        assert_eq!(report.skipped, vec![0, 1, 2]);
        assert!(report.written.is_empty());
        for (i, bytes) in before.iter().enumerate() {
            assert_eq!(&fs::read(frame_path(&images, i)).expect("frame"), bytes);
        }
    }

    #[test]
    fn test_resume_fills_gaps() {
        let dir = tempfile::tempdir().expect("tempdir");
        let table = table_for(&[T_MIN, T_MIN + 10_000, T_MIN + 20_000]);
        let source = MemoryTileSource::new().with_tile(1, "b.png").with_tile(4, "e.png");

        builder(dir.path(), T_MIN, T_MIN + 20_000, 10, false)
            .build_sequence(&table, &source)
            .expect("first run");
        fs::remove_file(frame_path(&dir.path().join("images"), 1)).expect("remove");

        let source = MemoryTileSource::new().with_tile(1, "b.png").with_tile(4, "e.png");
        let report = builder(dir.path(), T_MIN, T_MIN + 20_000, 10, true)
            .build_sequence(&table, &source)
            .expect("resumed run");

        assert_eq!(report.written, vec![1]);
        assert_eq!(report.skipped, vec![0, 2]);
        assert_eq!(source.fetch_count(), 2);
    }

    #[test]
    fn test_fresh_run_wipes_images() {
        let dir = tempfile::tempdir().expect("tempdir");
        let images = dir.path().join("images");
        fs::create_dir_all(&images).expect("mkdir");
        fs::write(images.join("999999.png"), b"stale").expect("write");

        let table = table_for(&[T_MIN]);
        let source = MemoryTileSource::new().with_tile(1, "b.png").with_tile(4, "e.png");
        builder(dir.path(), T_MIN, T_MIN, 10, false)
            .build_sequence(&table, &source)
            .expect("run");

        assert!(!images.join("999999.png").exists());
        assert!(frame_path(&images, 0).exists());
    }

    #[test]
    fn test_failed_frame_does_not_stop_others() {
        let dir = tempfile::tempdir().expect("tempdir");
        let csv = format!(
            "timestamp,0,1,2,3,4,5\n{},,b.png,,,e.png,\n{},,missing.png,,,e.png,\n{},,b.png,,,e.png,\n",
            T_MIN,
            T_MIN + 10_000,
            T_MIN + 20_000
        );
        let table = TimestampTable::parse(&csv).expect("parse");
        let source = MemoryTileSource::new().with_tile(1, "b.png").with_tile(4, "e.png");

        let result = builder(dir.path(), T_MIN, T_MIN + 20_000, 10, false).build_sequence(&table, &source);

        assert!(matches!(
            result,
            Err(TimelapseError::IncompleteError { failed: 1, total: 3 })
        ));
        let images = dir.path().join("images");
        assert!(frame_path(&images, 0).exists());
        assert!(!frame_path(&images, 1).exists());
        assert!(frame_path(&images, 2).exists());
    }

    #[test]
    fn test_bad_video_options_fail_before_fetching() {
        let dir = tempfile::tempdir().expect("tempdir");
        let timestamps: Vec<i64> = (0..5).map(|i| T_MIN + i * 10_000).collect();
        let table = table_for(&timestamps);
        let source = MemoryTileSource::new().with_tile(1, "b.png").with_tile(4, "e.png");

        let mut config = TimelapseConfig::new(normalize(-10, -10, 10, 10), dir.path());
        config.start = T_MIN;
        config.end = T_MIN + 40_000;
        config.frameskip = 10;
        config.video = Some(EncodeOptions { framerate: 0, scale: 1 });

        let result = TimelapseBuilder::new(config).build_sequence(&table, &source);

        assert!(matches!(result, Err(TimelapseError::ConfigError(_))));
        assert_eq!(source.fetch_count(), 0);
        assert!(!dir.path().join("images").exists());
    }

    #[test]
    fn test_empty_range_leaves_images_alone() {
        let dir = tempfile::tempdir().expect("tempdir");
        let images = dir.path().join("images");
        fs::create_dir_all(&images).expect("mkdir");
        fs::write(frame_path(&images, 0), b"earlier run").expect("write");

        let table = table_for(&[T_MIN]);
        let source = MemoryTileSource::new();
        let result = builder(dir.path(), T_MIN + 20_000, T_MIN, 10, false).build_sequence(&table, &source);

        assert!(matches!(result, Err(TimelapseError::ConfigError(_))));
        assert_eq!(fs::read(frame_path(&images, 0)).expect("frame"), b"earlier run");

        let result = builder(dir.path(), T_MAX + 20_000, i64::MAX, 10, false).build_sequence(&table, &source);
        assert!(matches!(result, Err(TimelapseError::ConfigError(_))));
        assert!(frame_path(&images, 0).exists());
    }

    #[test]
    fn test_zero_alignment_is_rejected() {
        let sequence = SequenceConfig {
            align_ms: 0,
            ..SequenceConfig::default()
        };
        assert_eq!(sequence.clamp_range(T_MIN + 1234, T_MAX), (T_MIN + 1234, T_MAX));
        assert!(sequence.validate().is_err());

        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = TimelapseConfig::new(normalize(0, 0, 1, 1), dir.path());
        config.sequence = sequence;
        let result = TimelapseBuilder::new(config).build_sequence(&table_for(&[T_MIN]), &MemoryTileSource::new());
        assert!(matches!(result, Err(TimelapseError::ConfigError(_))));
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(T_MIN), "2023-07-20 13:03:52 UTC");
    }
}
