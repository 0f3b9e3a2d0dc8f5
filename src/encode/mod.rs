use log::info;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::{StatusOr, TimelapseError};

pub const VIDEO_FILE: &str = "timelapse.mp4";

/// How the rendered frames are turned into a video
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeOptions {
    /// Output frames per second
    pub framerate: u32,
    /// Integer upscaling factor, nearest neighbour
    pub scale: u32,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self { framerate: 60, scale: 1 }
    }
}

impl EncodeOptions {
    pub fn validate(&self) -> StatusOr<()> {
        if self.framerate == 0 || self.scale == 0 {
            return Err(TimelapseError::ConfigError(format!(
                "framerate and scale must be positive, got {} and {}",
                self.framerate, self.scale
            )));
        }
        Ok(())
    }
}

/// Filter chain applied to the image sequence
fn filter_chain(options: &EncodeOptions) -> String {
    let mut filters = vec![format!("fps=fps={}:round=up", options.framerate)];
    if options.scale != 1 {
        filters.push(format!(
            "scale=iw*{0}:ih*{0}:flags=neighbor",
            options.scale
        ));
    }
    // yuv420p needs even dimensions
    filters.push("pad=ceil(iw/2)*2:ceil(ih/2)*2:color=white".to_string());
    filters.join(",")
}

/// Arguments for the `ffmpeg` invocation encoding `images_dir` into `output`
pub fn ffmpeg_args(images_dir: &Path, output: &Path, options: &EncodeOptions) -> Vec<String> {
    vec![
        "-loglevel".to_string(),
        "error".to_string(),
        "-i".to_string(),
        images_dir.join("%06d.png").to_string_lossy().into_owned(),
        "-vf".to_string(),
        filter_chain(options),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        output.to_string_lossy().into_owned(),
    ]
}

/// Return `true` when `ffmpeg` can be invoked from `PATH`.
pub fn is_ffmpeg_on_path() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Fail unless `ffmpeg` can be run
pub fn ensure_ffmpeg() -> StatusOr<()> {
    if !is_ffmpeg_on_path() {
        return Err(TimelapseError::EncodeError(
            "ffmpeg is required for encoding, but was not found on PATH".to_string(),
        ));
    }
    Ok(())
}

/// Encode `<output_dir>/images` into `<output_dir>/timelapse.mp4`.
///
/// An existing video at that path is deleted first.
pub fn encode_video(output_dir: &Path, options: &EncodeOptions) -> StatusOr<PathBuf> {
    options.validate()?;
    ensure_ffmpeg()?;

    let images_dir = output_dir.join("images");
    let output = output_dir.join(VIDEO_FILE);
    if output.exists() {
        fs::remove_file(&output)?;
    }

    info!("Merging video into {}", output.display());
    let result = Command::new("ffmpeg")
        .args(ffmpeg_args(&images_dir, &output, options))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| TimelapseError::EncodeError(format!("failed to spawn ffmpeg: {}", e)))?;

    if !result.status.success() {
        return Err(TimelapseError::EncodeError(format!(
            "ffmpeg exited with {}: {}",
            result.status,
            String::from_utf8_lossy(&result.stderr).trim()
        )));
    }

    info!("Video written to {}", output.display());
    Ok(output)
}
