pub mod tiles;

pub use tiles::{select_tiles, TileMask, TileRecord};

/// Canvas width in pixels
pub const CANVAS_WIDTH: u32 = 3000;
/// Canvas height in pixels
pub const CANVAS_HEIGHT: u32 = 2000;
/// Edge length of one snapshot tile
pub const TILE_SIZE: u32 = 1000;
/// Tiles per canvas row
pub const TILE_COLUMNS: usize = 3;
/// Total number of tiles in the canvas
pub const TILE_COUNT: usize = 6;

pub const MIN_X: i32 = -1500;
pub const MAX_X: i32 = 1499;
pub const MIN_Y: i32 = -1000;
pub const MAX_Y: i32 = 999;

/// A well-ordered rectangle of canvas pixels, both corners inclusive.
///
/// Canvas coordinates have their origin at the centre of the canvas, so
/// x runs from -1500 to 1499 and y from -1000 to 999. The only way to build
/// one is [`normalize`], which guarantees `x1 <= x2`, `y1 <= y2` and that
/// every corner is a pixel of the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingRect {
    x1: i32,
    y1: i32,
    x2: i32,
    y2: i32,
}

impl BoundingRect {
    pub fn x1(&self) -> i32 {
        self.x1
    }

    pub fn y1(&self) -> i32 {
        self.y1
    }

    pub fn x2(&self) -> i32 {
        self.x2
    }

    pub fn y2(&self) -> i32 {
        self.y2
    }

    pub fn width(&self) -> u32 {
        (self.x2 - self.x1 + 1) as u32
    }

    pub fn height(&self) -> u32 {
        (self.y2 - self.y1 + 1) as u32
    }

    /// Top-left corner in image space, where (0, 0) is the canvas' top-left pixel
    pub fn image_origin(&self) -> (u32, u32) {
        ((self.x1 - MIN_X) as u32, (self.y1 - MIN_Y) as u32)
    }

    /// The four corners, in (x, y) canvas coordinates
    pub fn corners(&self) -> [(i32, i32); 4] {
        [
            (self.x1, self.y1),
            (self.x1, self.y2),
            (self.x2, self.y1),
            (self.x2, self.y2),
        ]
    }
}

/// Canonicalize two arbitrary corners into a canvas-clamped rectangle.
///
/// Corners are swapped into order first, then clamped. Nothing is ever
/// rejected: a rectangle hanging off the canvas is cut at the canvas edge and
/// one lying entirely outside collapses onto the nearest edge.
pub fn normalize(x1: i32, y1: i32, x2: i32, y2: i32) -> BoundingRect {
    let (x1, x2) = if x1 > x2 { (x2, x1) } else { (x1, x2) };
    let (y1, y2) = if y1 > y2 { (y2, y1) } else { (y1, y2) };

    BoundingRect {
        x1: x1.clamp(MIN_X, MAX_X),
        y1: y1.clamp(MIN_Y, MAX_Y),
        x2: x2.clamp(MIN_X, MAX_X),
        y2: y2.clamp(MIN_Y, MAX_Y),
    }
}

/// Index of the tile containing a canvas pixel.
///
/// Takes canvas coordinates, not image coordinates. Pixels off the canvas
/// map to the nearest edge tile.
pub(crate) fn tile_index(x: i32, y: i32) -> usize {
    let column = ((x.clamp(MIN_X, MAX_X) - MIN_X) as u32 / TILE_SIZE) as usize;
    let row = ((y.clamp(MIN_Y, MAX_Y) - MIN_Y) as u32 / TILE_SIZE) as usize;
    column + row * TILE_COLUMNS
}

/// Pixel offset of a tile's top-left corner inside the composited canvas
pub fn tile_offset(index: usize) -> (u32, u32) {
    (
        (index % TILE_COLUMNS) as u32 * TILE_SIZE,
        (index / TILE_COLUMNS) as u32 * TILE_SIZE,
    )
}
