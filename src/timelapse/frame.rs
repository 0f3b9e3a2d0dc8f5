use image::{imageops, ImageOutputFormat, Rgb, RgbImage};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::canvas::{tile_offset, BoundingRect, TileRecord, CANVAS_HEIGHT, CANVAS_WIDTH};
use crate::download::TileSource;
use crate::error::StatusOr;

/// One frame to render: its position in the sequence and the tiles it needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameTask {
    pub index: usize,
    pub timestamp: i64,
    pub tiles: TileRecord,
}

/// Path of the image written for a frame index
pub fn frame_path(images_dir: &Path, index: usize) -> PathBuf {
    images_dir.join(format!("{:06}.png", index))
}

/// Stitch the task's tiles onto a blank canvas and crop it to `rect`
pub fn render_frame(task: &FrameTask, rect: &BoundingRect, source: &dyn TileSource) -> StatusOr<RgbImage> {
    let mut canvas = RgbImage::from_pixel(CANVAS_WIDTH, CANVAS_HEIGHT, Rgb([255, 255, 255]));

    for (index, fragment) in task.tiles.present() {
        let data = source.fetch(index, fragment)?;
        let tile = image::load_from_memory(&data)?.to_rgb8();
        let (x, y) = tile_offset(index);
        imageops::replace(&mut canvas, &tile, x as i64, y as i64);
    }

    let (x, y) = rect.image_origin();
    Ok(imageops::crop_imm(&canvas, x, y, rect.width(), rect.height()).to_image())
}

/// Write a frame as PNG, replacing any previous file only once fully written
pub fn write_frame(frame: &RgbImage, path: &Path) -> StatusOr<()> {
    let mut encoded = Cursor::new(Vec::new());
    frame.write_to(&mut encoded, ImageOutputFormat::Png)?;

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(encoded.get_ref())?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Render one frame and store it under `images_dir`
pub fn fetch_frame(
    task: &FrameTask,
    rect: &BoundingRect,
    images_dir: &Path,
    source: &dyn TileSource,
) -> StatusOr<PathBuf> {
    let frame = render_frame(task, rect, source)?;
    let path = frame_path(images_dir, task.index);
    write_frame(&frame, &path)?;
    Ok(path)
}
