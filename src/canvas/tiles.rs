use super::{tile_index, BoundingRect, TILE_COUNT};

/// URL fragments of the six tile snapshots recorded for one timestamp.
///
/// `None` means no snapshot was recorded for that tile; it renders blank.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TileRecord {
    fragments: [Option<String>; TILE_COUNT],
}

impl TileRecord {
    pub fn new(fragments: [Option<String>; TILE_COUNT]) -> Self {
        Self { fragments }
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.fragments.get(index).and_then(|f| f.as_deref())
    }

    /// Present fragments with their tile index, in index order
    pub fn present(&self) -> impl Iterator<Item = (usize, &str)> {
        self.fragments
            .iter()
            .enumerate()
            .filter_map(|(i, f)| f.as_deref().map(|f| (i, f)))
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.iter().all(Option::is_none)
    }
}

/// Which tiles are needed to render a rectangle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TileMask([bool; TILE_COUNT]);

impl TileMask {
    pub fn contains(&self, index: usize) -> bool {
        self.0.get(index).copied().unwrap_or(false)
    }

    pub fn as_array(&self) -> [bool; TILE_COUNT] {
        self.0
    }

    pub fn count(&self) -> usize {
        self.0.iter().filter(|&&m| m).count()
    }

    /// Drop the fragments of tiles outside the mask
    pub fn apply(&self, record: &TileRecord) -> TileRecord {
        let mut fragments: [Option<String>; TILE_COUNT] = Default::default();
        for (i, fragment) in record.present() {
            if self.0[i] {
                fragments[i] = Some(fragment.to_string());
            }
        }
        TileRecord::new(fragments)
    }
}

/// Select the tiles a rectangle overlaps.
///
/// Each corner marks its own tile. A rectangle can only span a full row of
/// three tiles without a corner in the middle one, so when both ends of a row
/// are marked the middle tile is marked too. Rows have only two tiles
/// vertically, so corners always cover every row touched.
pub fn select_tiles(rect: &BoundingRect) -> TileMask {
    let mut mask = [false; TILE_COUNT];

    for (x, y) in rect.corners() {
        mask[tile_index(x, y)] = true;
    }

    if mask[0] && mask[2] {
        mask[1] = true;
    }
    if mask[3] && mask[5] {
        mask[4] = true;
    }

    TileMask(mask)
}
