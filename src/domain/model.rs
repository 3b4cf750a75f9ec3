use crate::domain::plate::{PlateFormat, WellPosition};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const DEFAULT_REPLICATES: u32 = 6;
pub const DEFAULT_EDGE_LAYERS: usize = 1;
pub const DEFAULT_TRANSFER_VOLUME_NL: f64 = 2.5;

/// Priority of a constraint; 1 is hard, larger numbers are relaxed first.
pub type Priority = u8;

pub const HARD_PRIORITY: Priority = 1;

/// Soft tiers in the order they are given up.
pub const RELAXATION_ORDER: [Priority; 3] = [4, 3, 2];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sample {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Overrides `DesignParameters::replicates` when set.
    #[serde(default)]
    pub replicates: Option<u32>,
    #[serde(default)]
    pub transfer_volume_nl: Option<f64>,
}

impl Sample {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            replicates: None,
            transfer_volume_nl: None,
        }
    }

    pub fn with_replicates(mut self, replicates: u32) -> Self {
        self.replicates = Some(replicates);
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ControlKind {
    Positive,
    Negative,
    Blank,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Control {
    pub id: String,
    pub kind: ControlKind,
    pub count: u32,
    #[serde(default)]
    pub transfer_volume_nl: Option<f64>,
}

impl Control {
    pub fn new(id: impl Into<String>, kind: ControlKind, count: u32) -> Self {
        Self {
            id: id.into(),
            kind,
            count,
            transfer_volume_nl: None,
        }
    }
}

/// Everything to be placed for one design run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    #[serde(default)]
    pub samples: Vec<Sample>,
    #[serde(default)]
    pub controls: Vec<Control>,
}

impl Manifest {
    pub fn new(samples: Vec<Sample>, controls: Vec<Control>) -> Self {
        Self { samples, controls }
    }

    pub fn replicates_for(&self, sample: &Sample, params: &DesignParameters) -> u32 {
        sample.replicates.unwrap_or(params.replicates)
    }

    pub fn total_units(&self, params: &DesignParameters) -> usize {
        let samples: usize = self
            .samples
            .iter()
            .map(|s| self.replicates_for(s, params) as usize)
            .sum();
        let controls: usize = self.controls.iter().map(|c| c.count as usize).sum();
        samples + controls
    }

    pub fn contains(&self, id: &str) -> bool {
        self.samples.iter().any(|s| s.id == id) || self.controls.iter().any(|c| c.id == id)
    }

    /// Per-identifier transfer volume, falling back to the run default.
    pub fn transfer_volume_for(&self, id: &str, params: &DesignParameters) -> f64 {
        self.samples
            .iter()
            .find(|s| s.id == id)
            .and_then(|s| s.transfer_volume_nl)
            .or_else(|| {
                self.controls
                    .iter()
                    .find(|c| c.id == id)
                    .and_then(|c| c.transfer_volume_nl)
            })
            .unwrap_or(params.transfer_volume_nl)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DistributionMode {
    #[default]
    Uniform,
    Row,
    Column,
    Random,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConstraintToggles {
    #[serde(default = "enabled")]
    pub control_spread: bool,
    #[serde(default = "enabled")]
    pub quadrant_balance: bool,
    #[serde(default = "enabled")]
    pub no_adjacent: bool,
}

fn enabled() -> bool {
    true
}

impl Default for ConstraintToggles {
    fn default() -> Self {
        Self {
            control_spread: true,
            quadrant_balance: true,
            no_adjacent: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DesignParameters {
    #[serde(default = "default_format")]
    pub plate_format: PlateFormat,
    #[serde(default = "default_replicates")]
    pub replicates: u32,
    #[serde(default = "default_edge_layers")]
    pub edge_layers: usize,
    #[serde(default)]
    pub distribution: DistributionMode,
    #[serde(default)]
    pub constraints: ConstraintToggles,
    #[serde(default = "default_transfer_volume")]
    pub transfer_volume_nl: f64,
}

fn default_format() -> PlateFormat {
    PlateFormat::Wells96
}

fn default_replicates() -> u32 {
    DEFAULT_REPLICATES
}

fn default_edge_layers() -> usize {
    DEFAULT_EDGE_LAYERS
}

fn default_transfer_volume() -> f64 {
    DEFAULT_TRANSFER_VOLUME_NL
}

impl Default for DesignParameters {
    fn default() -> Self {
        Self {
            plate_format: default_format(),
            replicates: DEFAULT_REPLICATES,
            edge_layers: DEFAULT_EDGE_LAYERS,
            distribution: DistributionMode::default(),
            constraints: ConstraintToggles::default(),
            transfer_volume_nl: DEFAULT_TRANSFER_VOLUME_NL,
        }
    }
}

/// The fixed PLAID rule set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    Cardinality,
    NoAdjacent,
    ControlSpread,
    QuadrantBalance,
    EdgeExclusion,
}

impl ConstraintKind {
    pub const ALL: [ConstraintKind; 5] = [
        Self::Cardinality,
        Self::NoAdjacent,
        Self::ControlSpread,
        Self::QuadrantBalance,
        Self::EdgeExclusion,
    ];

    pub fn priority(self) -> Priority {
        match self {
            Self::Cardinality | Self::NoAdjacent => HARD_PRIORITY,
            Self::ControlSpread => 2,
            Self::QuadrantBalance => 3,
            Self::EdgeExclusion => 4,
        }
    }

    pub fn is_hard(self) -> bool {
        self.priority() == HARD_PRIORITY
    }

    pub fn severity(self) -> Severity {
        if self.is_hard() {
            Severity::Error
        } else {
            Severity::Warning
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Cardinality => "cardinality",
            Self::NoAdjacent => "no_adjacent",
            Self::ControlSpread => "control_spread",
            Self::QuadrantBalance => "quadrant_balance",
            Self::EdgeExclusion => "edge_exclusion",
        }
    }

    pub fn explanation(self) -> &'static str {
        match self {
            Self::Cardinality => {
                "Every sample and control appears in exactly its required number of wells."
            }
            Self::NoAdjacent => {
                "Wells holding the same control never touch, diagonals included, so one local artefact cannot hit every copy."
            }
            Self::ControlSpread => {
                "Control wells are not direct row or column neighbours, which keeps them spread over the plate."
            }
            Self::QuadrantBalance => {
                "Samples and controls are split evenly across the four plate quadrants."
            }
            Self::EdgeExclusion => {
                "The outer band of wells stays empty because evaporation and temperature effects are strongest there."
            }
        }
    }
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConstraintViolation {
    pub rule: ConstraintKind,
    pub severity: Severity,
    pub affected_wells: Vec<String>,
    pub description: String,
}

impl ConstraintViolation {
    pub fn new(rule: ConstraintKind, affected_wells: Vec<String>, description: impl Into<String>) -> Self {
        Self {
            rule,
            severity: rule.severity(),
            affected_wells,
            description: description.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Whether a well holds a sample or a control.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ContentClass {
    Sample,
    Control,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WellContent {
    #[default]
    Empty,
    Sample {
        id: String,
        replicate: u32,
    },
    Control {
        id: String,
        kind: ControlKind,
    },
}

impl WellContent {
    pub fn identifier(&self) -> Option<&str> {
        match self {
            Self::Empty => None,
            Self::Sample { id, .. } | Self::Control { id, .. } => Some(id),
        }
    }

    pub fn class(&self) -> Option<ContentClass> {
        match self {
            Self::Empty => None,
            Self::Sample { .. } => Some(ContentClass::Sample),
            Self::Control { .. } => Some(ContentClass::Control),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub fn is_control(&self) -> bool {
        matches!(self, Self::Control { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Well {
    pub position: WellPosition,
    pub row: usize,
    pub col: usize,
    pub content: WellContent,
    pub quadrant: usize,
    pub in_edge: bool,
}

impl Well {
    pub fn label(&self) -> String {
        self.position.label()
    }
}

/// One solved or edited plate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Layout {
    pub plate_index: usize,
    pub plate_barcode: String,
    pub format: PlateFormat,
    pub edge_layers: usize,
    /// Row-major, one entry per plate position.
    pub wells: Vec<Well>,
    pub violations: Vec<ConstraintViolation>,
    pub score: f64,
}

impl Layout {
    pub fn barcode_for(plate_index: usize) -> String {
        format!("plate_{}", plate_index + 1)
    }

    pub fn well(&self, label: &str) -> Option<&Well> {
        let position: WellPosition = label.parse().ok()?;
        self.wells.iter().find(|w| w.position == position)
    }

    pub fn wells_for<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Well> + 'a {
        self.wells
            .iter()
            .filter(move |w| w.content.identifier() == Some(id))
    }

    pub fn occupied_count(&self) -> usize {
        self.wells.iter().filter(|w| !w.content.is_empty()).count()
    }

    /// Identifier per position for renderers, `None` for empty wells.
    pub fn content_matrix(&self) -> Vec<Vec<Option<String>>> {
        let (rows, cols) = self.format.dimensions();
        let mut matrix = vec![vec![None; cols]; rows];
        for well in &self.wells {
            matrix[well.row][well.col] = well.content.identifier().map(str::to_string);
        }
        matrix
    }

    pub fn has_errors(&self) -> bool {
        self.violations.iter().any(ConstraintViolation::is_error)
    }

    /// 100 minus 20 per error and 5 per warning, floored at zero.
    pub fn score_for(violations: &[ConstraintViolation]) -> f64 {
        let penalty: f64 = violations
            .iter()
            .map(|v| match v.severity {
                Severity::Error => 20.0,
                Severity::Warning => 5.0,
            })
            .sum();
        (100.0 - penalty).max(0.0)
    }
}

/// Controller state for one plate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RelaxationState {
    Full,
    /// Every constraint with priority >= the floor is disabled.
    Relaxed(Priority),
    Succeeded,
    Failed,
}

impl fmt::Display for RelaxationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => f.write_str("FULL"),
            Self::Relaxed(p) => write!(f, "RELAXED({p})"),
            Self::Succeeded => f.write_str("SUCCEEDED"),
            Self::Failed => f.write_str("FAILED"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SolveStatus {
    Success,
    Partial,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlateReport {
    pub plate_index: usize,
    /// Stage whose attempt produced the layout.
    pub solved_at: RelaxationState,
    pub relaxed_constraints: Vec<ConstraintKind>,
    /// Blocking rule reported by each stage that failed before `solved_at`.
    #[serde(default)]
    pub relaxation_reasons: Vec<ConstraintViolation>,
    pub attempts: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SolveResult {
    pub status: SolveStatus,
    pub layouts: Vec<Layout>,
    pub violations: Vec<ConstraintViolation>,
    pub relaxed_constraints: Vec<ConstraintKind>,
    pub plates: Vec<PlateReport>,
    pub elapsed_ms: u64,
    pub generated_at: DateTime<Utc>,
    pub message: Option<String>,
}

impl SolveResult {
    /// Reports a failed run as data, carrying the last diagnostics.
    pub fn failed(message: impl Into<String>, violations: Vec<ConstraintViolation>, elapsed_ms: u64) -> Self {
        Self {
            status: SolveStatus::Failed,
            layouts: Vec::new(),
            violations,
            relaxed_constraints: Vec::new(),
            plates: Vec::new(),
            elapsed_ms,
            generated_at: Utc::now(),
            message: Some(message.into()),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.status == SolveStatus::Partial
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceWell {
    pub plate: String,
    pub well: WellPosition,
    pub volume_nl: f64,
}

/// Source plate wells per identifier. Read-only to the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SourceInventory {
    wells: BTreeMap<String, Vec<SourceWell>>,
}

impl SourceInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, id: impl Into<String>, well: SourceWell) {
        self.wells.entry(id.into()).or_default().push(well);
    }

    pub fn sources(&self, id: &str) -> &[SourceWell] {
        self.wells.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, id: &str) -> bool {
        !self.sources(id).is_empty()
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.wells.keys().map(String::as_str)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PicklistEntry {
    #[serde(rename = "Source Plate Barcode")]
    pub source_plate: String,
    #[serde(rename = "Source Well")]
    pub source_well: String,
    #[serde(rename = "Destination Plate Barcode")]
    pub destination_plate: String,
    #[serde(rename = "Destination Well")]
    pub destination_well: String,
    #[serde(rename = "Transfer Volume")]
    pub transfer_volume_nl: f64,
    #[serde(rename = "Identifier")]
    pub identifier: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Picklist {
    pub entries: Vec<PicklistEntry>,
}

impl Picklist {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_volume_nl(&self) -> f64 {
        self.entries.iter().map(|e| e.transfer_volume_nl).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_table() {
        assert!(ConstraintKind::Cardinality.is_hard());
        assert!(ConstraintKind::NoAdjacent.is_hard());
        assert_eq!(ConstraintKind::ControlSpread.priority(), 2);
        assert_eq!(ConstraintKind::QuadrantBalance.priority(), 3);
        assert_eq!(ConstraintKind::EdgeExclusion.priority(), 4);
        assert_eq!(ConstraintKind::EdgeExclusion.severity(), Severity::Warning);
    }

    #[test]
    fn test_total_units_uses_per_sample_overrides() {
        let params = DesignParameters::default();
        let manifest = Manifest::new(
            vec![Sample::new("TP53"), Sample::new("EGFR").with_replicates(2)],
            vec![Control::new("POS", ControlKind::Positive, 4)],
        );
        assert_eq!(manifest.total_units(&params), 6 + 2 + 4);
    }

    #[test]
    fn test_transfer_volume_fallback() {
        let params = DesignParameters::default();
        let mut sample = Sample::new("TP53");
        sample.transfer_volume_nl = Some(5.0);
        let manifest = Manifest::new(vec![sample], vec![Control::new("NEG", ControlKind::Negative, 2)]);

        assert_eq!(manifest.transfer_volume_for("TP53", &params), 5.0);
        assert_eq!(manifest.transfer_volume_for("NEG", &params), DEFAULT_TRANSFER_VOLUME_NL);
    }

    #[test]
    fn test_score_penalties() {
        let error = ConstraintViolation::new(ConstraintKind::NoAdjacent, vec![], "x");
        let warning = ConstraintViolation::new(ConstraintKind::EdgeExclusion, vec![], "y");
        assert_eq!(Layout::score_for(&[]), 100.0);
        assert_eq!(Layout::score_for(&[error.clone(), warning]), 75.0);
        assert_eq!(Layout::score_for(&vec![error; 6]), 0.0);
    }

    #[test]
    fn test_well_content_serializes_with_type_tag() {
        let content = WellContent::Sample {
            id: "TP53".to_string(),
            replicate: 2,
        };
        let json = serde_json::to_value(&content).unwrap();
        assert_eq!(json["type"], "sample");
        assert_eq!(json["replicate"], 2);
    }

    #[test]
    fn test_relaxation_state_display() {
        assert_eq!(RelaxationState::Full.to_string(), "FULL");
        assert_eq!(RelaxationState::Relaxed(2).to_string(), "RELAXED(2)");
    }
}
