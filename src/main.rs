use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use std::path::PathBuf;

use placelapse::cache::Cache;
use placelapse::canvas::normalize;
use placelapse::download::{HttpTileSource, DEFAULT_BASE_URL};
use placelapse::encode::EncodeOptions;
use placelapse::scrape::{ScrapeConfig, Scraper, DEFAULT_ENDPOINT};
use placelapse::table::TimestampTable;
use placelapse::timelapse::{TimelapseBuilder, TimelapseConfig, T_MAX, T_MIN};

#[derive(Parser)]
#[command(author, version, about = "Build timelapses of a region of the r/place canvas", long_about = None)]
struct Cli {
    /// Path to the CSV table of recorded frames
    #[arg(short, long, default_value = "frames.csv", global = true)]
    frames: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a region of the canvas over time and encode it as a video
    Timelapse {
        /// First corner, x coordinate
        #[arg(allow_negative_numbers = true)]
        top: i32,

        /// First corner, y coordinate
        #[arg(allow_negative_numbers = true)]
        left: i32,

        /// Second corner, x coordinate
        #[arg(allow_negative_numbers = true)]
        bottom: i32,

        /// Second corner, y coordinate
        #[arg(allow_negative_numbers = true)]
        right: i32,

        /// Timestamp of the first frame, in milliseconds
        #[arg(long, default_value_t = T_MIN)]
        start: i64,

        /// Timestamp of the last frame, in milliseconds
        #[arg(long, default_value_t = T_MAX)]
        end: i64,

        /// Framerate of the video
        #[arg(long, default_value_t = 60)]
        framerate: u32,

        /// Seconds skipped in between canvas frames
        #[arg(long, default_value_t = 60)]
        frameskip: u32,

        /// Integer scale of the video output
        #[arg(long, default_value_t = 1)]
        scale: u32,

        /// Output directory for the images and video
        #[arg(short, long, default_value = "./output")]
        out: PathBuf,

        /// Continue from where a previous run stopped
        #[arg(short, long, default_value_t = false)]
        keep: bool,

        /// Number of frames fetched in parallel
        #[arg(short, long, default_value_t = 16)]
        workers: usize,

        /// Directory caching downloaded tiles across runs
        #[arg(long)]
        tile_cache: Option<PathBuf>,

        /// Base URL of the full-frame tile images
        #[arg(long, default_value = DEFAULT_BASE_URL)]
        base_url: String,

        /// Only render the images, skip encoding
        #[arg(long, default_value_t = false)]
        no_video: bool,
    },

    /// Record the tile snapshots live at every timestamp
    Scrape {
        /// Bearer token of a logged-in session
        #[arg(long, env = "PLACE_TOKEN", hide_env_values = true)]
        token: String,

        /// First timestamp to record, in milliseconds
        #[arg(long, default_value_t = T_MIN)]
        start: i64,

        /// Last timestamp to record, in milliseconds
        #[arg(long, default_value_t = T_MAX)]
        end: i64,

        /// Milliseconds between recorded timestamps
        #[arg(long, default_value_t = 1000)]
        step_ms: i64,

        /// GraphQL endpoint to query
        #[arg(long, default_value = DEFAULT_ENDPOINT)]
        endpoint: String,
    },

    /// Clear the tile cache
    ClearCache {
        /// Directory of the tile cache
        #[arg(long)]
        tile_cache: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Timelapse {
            top,
            left,
            bottom,
            right,
            start,
            end,
            framerate,
            frameskip,
            scale,
            out,
            keep,
            workers,
            tile_cache,
            base_url,
            no_video,
        } => {
            let rect = normalize(top, left, bottom, right);
            info!(
                "Region ({}, {}) to ({}, {}), {}x{} pixels",
                rect.x1(),
                rect.y1(),
                rect.x2(),
                rect.y2(),
                rect.width(),
                rect.height()
            );

            let table = TimestampTable::load(&cli.frames)
                .with_context(|| format!("Failed to load frame table {:?}", cli.frames))?;

            let mut source = HttpTileSource::new(base_url).context("Failed to create tile source")?;
            if let Some(dir) = tile_cache {
                let cache = Cache::new(&dir).with_context(|| format!("Failed to create tile cache {:?}", dir))?;
                source = source.with_cache(cache);
            }

            let mut config = TimelapseConfig::new(rect, out);
            config.start = start;
            config.end = end;
            config.frameskip = frameskip;
            config.resume = keep;
            config.workers = workers;
            config.video = if no_video {
                None
            } else {
                Some(EncodeOptions { framerate, scale })
            };

            let builder = TimelapseBuilder::new(config);
            let report = builder
                .build_sequence(&table, &source)
                .context("Failed to build timelapse")?;

            info!(
                "Done: {} frames written, {} reused",
                report.written.len(),
                report.skipped.len()
            );
        }

        Commands::Scrape {
            token,
            start,
            end,
            step_ms,
            endpoint,
        } => {
            let mut config = ScrapeConfig::new(token, cli.frames);
            config.start = start;
            config.end = end;
            config.step_ms = step_ms;
            config.endpoint = endpoint;

            let scraper = Scraper::new(config).context("Failed to create scraper")?;
            let added = scraper.run().context("Failed to scrape frame history")?;
            info!("Recorded {} new timestamps", added);
        }

        Commands::ClearCache { tile_cache } => {
            let cache = Cache::new(&tile_cache).context("Failed to open cache")?;
            info!("Clearing cache in {}", cache.dir().display());
            cache.clear().context("Failed to clear cache")?;
            info!("Cache cleared");
        }
    }

    Ok(())
}
