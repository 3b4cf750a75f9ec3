use crate::utils::error::{LayoutError, Result};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

static WELL_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Z]{1,2})(\d{1,2})$").expect("well label pattern is valid"));

/// Supported microplate formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlateFormat {
    Wells96,
    Wells384,
    Wells1536,
}

impl PlateFormat {
    pub const ALL: [PlateFormat; 3] = [Self::Wells96, Self::Wells384, Self::Wells1536];

    pub fn well_count(self) -> usize {
        match self {
            Self::Wells96 => 96,
            Self::Wells384 => 384,
            Self::Wells1536 => 1536,
        }
    }

    /// (rows, columns)
    pub fn dimensions(self) -> (usize, usize) {
        match self {
            Self::Wells96 => (8, 12),
            Self::Wells384 => (16, 24),
            Self::Wells1536 => (32, 48),
        }
    }

    pub fn from_well_count(count: usize) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|format| format.well_count() == count)
            .ok_or_else(|| {
                LayoutError::validation(
                    "plate_format",
                    format!("unsupported plate format {count}; expected 96, 384 or 1536"),
                )
            })
    }
}

impl fmt::Display for PlateFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-well", self.well_count())
    }
}

impl Serialize for PlateFormat {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.well_count() as u64)
    }
}

impl<'de> Deserialize<'de> for PlateFormat {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let count = u64::deserialize(deserializer)?;
        Self::from_well_count(count as usize).map_err(serde::de::Error::custom)
    }
}

/// Zero-based well coordinates on a plate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WellPosition {
    pub row: usize,
    pub col: usize,
}

impl WellPosition {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }

    /// Canonical label, e.g. `A01`, `P24`, `AF48`.
    pub fn label(&self) -> String {
        format!("{}{:02}", row_letters(self.row), self.col + 1)
    }
}

impl fmt::Display for WellPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl FromStr for WellPosition {
    type Err = LayoutError;

    fn from_str(s: &str) -> Result<Self> {
        let caps = WELL_LABEL
            .captures(s.trim())
            .ok_or_else(|| LayoutError::validation("well", format!("'{s}' is not a well label")))?;

        let letters = caps[1].as_bytes();
        let row = letters
            .iter()
            .fold(0usize, |acc, b| acc * 26 + (b - b'A') as usize + 1)
            - 1;
        let col: usize = caps[2]
            .parse()
            .map_err(|_| LayoutError::validation("well", format!("'{s}' has no column number")))?;
        if col == 0 {
            return Err(LayoutError::validation("well", format!("'{s}': columns start at 01")));
        }

        Ok(Self { row, col: col - 1 })
    }
}

impl Serialize for WellPosition {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.label())
    }
}

impl<'de> Deserialize<'de> for WellPosition {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        label.parse().map_err(serde::de::Error::custom)
    }
}

fn row_letters(row: usize) -> String {
    // A..Z, then AA..AZ for the 32-row 1536-well plate.
    if row < 26 {
        ((b'A' + row as u8) as char).to_string()
    } else {
        let first = (b'A' + (row / 26 - 1) as u8) as char;
        let second = (b'A' + (row % 26) as u8) as char;
        format!("{first}{second}")
    }
}

/// Geometry of one plate with a fixed edge-exclusion depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlateGeometry {
    pub format: PlateFormat,
    pub rows: usize,
    pub cols: usize,
    pub edge_layers: usize,
}

impl PlateGeometry {
    pub fn new(format: PlateFormat, edge_layers: usize) -> Self {
        let (rows, cols) = format.dimensions();
        Self {
            format,
            rows,
            cols,
            edge_layers,
        }
    }

    pub fn cell_count(&self) -> usize {
        self.rows * self.cols
    }

    /// Wells left after the edge band is removed; zero when the band covers the plate.
    pub fn usable_wells(&self) -> usize {
        let inner_rows = self.rows.saturating_sub(2 * self.edge_layers);
        let inner_cols = self.cols.saturating_sub(2 * self.edge_layers);
        inner_rows * inner_cols
    }

    pub fn index(&self, position: WellPosition) -> usize {
        position.row * self.cols + position.col
    }

    pub fn position(&self, index: usize) -> WellPosition {
        WellPosition::new(index / self.cols, index % self.cols)
    }

    pub fn contains(&self, position: WellPosition) -> bool {
        position.row < self.rows && position.col < self.cols
    }

    pub fn is_edge(&self, position: WellPosition) -> bool {
        let e = self.edge_layers;
        position.row < e
            || position.col < e
            || position.row >= self.rows.saturating_sub(e)
            || position.col >= self.cols.saturating_sub(e)
    }

    /// Quadrant 0..4: top-left, top-right, bottom-left, bottom-right.
    pub fn quadrant(&self, position: WellPosition) -> usize {
        let bottom = usize::from(position.row >= self.rows / 2);
        let right = usize::from(position.col >= self.cols / 2);
        bottom * 2 + right
    }

    /// 8-connected neighbours inside the plate.
    pub fn neighbors8(&self, position: WellPosition) -> impl Iterator<Item = WellPosition> + '_ {
        const OFFSETS: [(isize, isize); 8] = [
            (-1, -1),
            (-1, 0),
            (-1, 1),
            (0, -1),
            (0, 1),
            (1, -1),
            (1, 0),
            (1, 1),
        ];
        OFFSETS
            .iter()
            .filter_map(move |&(dr, dc)| self.offset(position, dr, dc))
    }

    /// Row and column neighbours inside the plate.
    pub fn neighbors4(&self, position: WellPosition) -> impl Iterator<Item = WellPosition> + '_ {
        const OFFSETS: [(isize, isize); 4] = [(-1, 0), (0, -1), (0, 1), (1, 0)];
        OFFSETS
            .iter()
            .filter_map(move |&(dr, dc)| self.offset(position, dr, dc))
    }

    fn offset(&self, position: WellPosition, dr: isize, dc: isize) -> Option<WellPosition> {
        let row = position.row.checked_add_signed(dr)?;
        let col = position.col.checked_add_signed(dc)?;
        let moved = WellPosition::new(row, col);
        self.contains(moved).then_some(moved)
    }

    /// All positions in reading order (row-major).
    pub fn positions(&self) -> impl Iterator<Item = WellPosition> + '_ {
        (0..self.cell_count()).map(|i| self.position(i))
    }
}
