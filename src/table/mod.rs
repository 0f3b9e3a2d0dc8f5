use log::info;
use std::collections::{HashMap, HashSet};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::canvas::{TileRecord, TILE_COUNT};
use crate::error::{StatusOr, TimelapseError};

pub const HEADER: &str = "timestamp,0,1,2,3,4,5";

/// Recorded tile fragments, indexed by millisecond timestamp.
///
/// The CSV is read once; lookups afterwards hit a `HashMap`. Timestamps seen
/// more than once are remembered so that lookups on them fault instead of
/// silently picking one row.
#[derive(Debug, Default)]
pub struct TimestampTable {
    rows: HashMap<i64, TileRecord>,
    duplicates: HashMap<i64, usize>,
}

impl TimestampTable {
    /// Load a table from a CSV file
    pub fn load<P: AsRef<Path>>(path: P) -> StatusOr<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let table = Self::parse(&content)?;
        info!("Loaded {} timestamps from {}", table.len(), path.display());
        Ok(table)
    }

    /// Parse CSV content with the `timestamp,0,1,2,3,4,5` layout
    pub fn parse(content: &str) -> StatusOr<Self> {
        let mut table = Self::default();
        let mut lines = content.lines().enumerate();

        match lines.next() {
            Some((_, header)) if normalize_header(header) == HEADER => {}
            Some((_, header)) => {
                return Err(TimelapseError::ParseError(format!("Unexpected header: {}", header)));
            }
            None => return Ok(table),
        }

        for (line_no, line) in lines {
            if line.trim().is_empty() {
                continue;
            }
            let (timestamp, record) = parse_row(line)
                .map_err(|e| TimelapseError::ParseError(format!("line {}: {}", line_no + 1, e)))?;
            table.insert(timestamp, record);
        }

        Ok(table)
    }

    fn insert(&mut self, timestamp: i64, record: TileRecord) {
        if self.rows.insert(timestamp, record).is_some() {
            *self.duplicates.entry(timestamp).or_insert(1) += 1;
        }
    }

    /// Find the single row recorded for a timestamp
    pub fn lookup(&self, timestamp: i64) -> StatusOr<&TileRecord> {
        if let Some(&matches) = self.duplicates.get(&timestamp) {
            return Err(TimelapseError::LookupError { timestamp, matches });
        }
        self.rows
            .get(&timestamp)
            .ok_or(TimelapseError::LookupError { timestamp, matches: 0 })
    }

    pub fn timestamps(&self) -> HashSet<i64> {
        self.rows.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn normalize_header(header: &str) -> String {
    header
        .split(',')
        .map(unquote)
        .collect::<Vec<_>>()
        .join(",")
}

fn unquote(field: &str) -> &str {
    let field = field.trim();
    field
        .strip_prefix('"')
        .and_then(|f| f.strip_suffix('"'))
        .unwrap_or(field)
}

fn parse_row(line: &str) -> Result<(i64, TileRecord), String> {
    let fields: Vec<&str> = line.split(',').map(unquote).collect();
    if fields.len() != TILE_COUNT + 1 {
        return Err(format!("expected {} fields, found {}", TILE_COUNT + 1, fields.len()));
    }

    let timestamp = fields[0]
        .parse::<i64>()
        .map_err(|e| format!("invalid timestamp {:?}: {}", fields[0], e))?;

    let mut fragments: [Option<String>; TILE_COUNT] = Default::default();
    for (slot, field) in fragments.iter_mut().zip(&fields[1..]) {
        if !field.is_empty() {
            *slot = Some(field.to_string());
        }
    }

    Ok((timestamp, TileRecord::new(fragments)))
}

/// Create the table file with its header unless it already exists
pub fn ensure_table<P: AsRef<Path>>(path: P) -> StatusOr<()> {
    let path = path.as_ref();
    if !path.exists() {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, format!("{}\n", HEADER))?;
    }
    Ok(())
}

/// Append one row to the table file
pub fn append_row<P: AsRef<Path>>(path: P, timestamp: i64, record: &TileRecord) -> StatusOr<()> {
    let mut line = timestamp.to_string();
    for i in 0..TILE_COUNT {
        line.push(',');
        line.push_str(record.get(i).unwrap_or(""));
    }
    line.push('\n');

    let mut file = OpenOptions::new().append(true).open(path)?;
    file.write_all(line.as_bytes())?;
    file.flush()?;
    Ok(())
}
