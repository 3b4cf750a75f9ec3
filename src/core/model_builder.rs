use crate::core::capacity::PlateAllocation;
use crate::domain::model::{
    ConstraintKind, ContentClass, DesignParameters, DistributionMode, Priority,
};
use crate::domain::plate::{PlateGeometry, WellPosition};
use crate::utils::error::{LayoutError, Result};
use serde::Serialize;

/// One distinct identifier the engine has to place.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelContent {
    pub id: String,
    pub class: ContentClass,
    pub required: usize,
}

impl ModelContent {
    pub fn is_control(&self) -> bool {
        self.class == ContentClass::Control
    }
}

/// An entry of the priority-tagged constraint manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConstraintEntry {
    pub kind: ConstraintKind,
    pub priority: Priority,
    pub hard: bool,
    pub enabled: bool,
}

impl ConstraintEntry {
    fn new(kind: ConstraintKind) -> Self {
        Self {
            kind,
            priority: kind.priority(),
            hard: kind.is_hard(),
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Cell {
    pub position: WellPosition,
    pub quadrant: usize,
    pub in_edge: bool,
}

/// Decision space and constraint set for one plate.
///
/// Every cell is a variable whose domain is "empty" plus one value per
/// [`ModelContent`]. Rules are declared through the constraint manifest; the
/// engine reads which ones are active.
#[derive(Debug, Clone, Serialize)]
pub struct ConstraintModel {
    pub plate_index: usize,
    #[serde(skip)]
    pub geometry: PlateGeometry,
    pub distribution: DistributionMode,
    pub contents: Vec<ModelContent>,
    pub cells: Vec<Cell>,
    constraints: Vec<ConstraintEntry>,
}

impl ConstraintModel {
    pub fn constraints(&self) -> &[ConstraintEntry] {
        &self.constraints
    }

    pub fn is_active(&self, kind: ConstraintKind) -> bool {
        self.constraints
            .iter()
            .any(|c| c.kind == kind && c.enabled)
    }

    /// Disables every soft constraint whose priority is at or above `floor`.
    /// Returns the constraints switched off by this call; hard ones are never touched.
    pub fn disable_priority(&mut self, floor: Priority) -> Vec<ConstraintKind> {
        let mut disabled = Vec::new();
        for entry in self.constraints.iter_mut() {
            if entry.hard || !entry.enabled || entry.priority < floor {
                continue;
            }
            entry.enabled = false;
            disabled.push(entry.kind);
        }
        disabled
    }

    /// Constraints that were declared but are currently switched off.
    pub fn relaxed(&self) -> Vec<ConstraintKind> {
        let mut relaxed: Vec<ConstraintKind> = self
            .constraints
            .iter()
            .filter(|c| !c.enabled)
            .map(|c| c.kind)
            .collect();
        relaxed.sort_by_key(|k| std::cmp::Reverse(k.priority()));
        relaxed
    }

    /// Whether a cell may hold content under the active rules.
    pub fn is_open(&self, cell: usize) -> bool {
        !(self.cells[cell].in_edge && self.is_active(ConstraintKind::EdgeExclusion))
    }

    pub fn open_cells(&self) -> Vec<usize> {
        (0..self.cells.len()).filter(|&i| self.is_open(i)).collect()
    }

    pub fn unit_count(&self) -> usize {
        self.contents.iter().map(|c| c.required).sum()
    }

    pub fn class_total(&self, class: ContentClass) -> usize {
        self.contents
            .iter()
            .filter(|c| c.class == class)
            .map(|c| c.required)
            .sum()
    }

    /// Allowed per-quadrant count range for a class: `(floor, ceil)` of total / 4.
    pub fn quadrant_bounds(&self, class: ContentClass) -> (usize, usize) {
        let total = self.class_total(class);
        (total / 4, total.div_ceil(4))
    }

    pub fn variable_count(&self) -> usize {
        self.cells.len() * (self.contents.len() + 1)
    }

    /// Order in which the engine should branch over open cells.
    pub fn branching_order(&self) -> Vec<usize> {
        let open = self.open_cells();
        match self.distribution {
            DistributionMode::Row | DistributionMode::Random => open,
            DistributionMode::Column => {
                let mut cells = open;
                cells.sort_by_key(|&i| (self.cells[i].position.col, self.cells[i].position.row));
                cells
            }
            DistributionMode::Uniform => self.interleave_by_quadrant(open),
        }
    }

    /// Takes one cell from each quadrant in turn so neighbouring picks land far apart.
    fn interleave_by_quadrant(&self, open: Vec<usize>) -> Vec<usize> {
        let mut buckets: [Vec<usize>; 4] = Default::default();
        for i in open {
            buckets[self.cells[i].quadrant].push(i);
        }
        let longest = buckets.iter().map(Vec::len).max().unwrap_or(0);
        let mut order = Vec::with_capacity(buckets.iter().map(Vec::len).sum());
        for k in 0..longest {
            for bucket in &buckets {
                if let Some(&cell) = bucket.get(k) {
                    order.push(cell);
                }
            }
        }
        order
    }
}

/// Builds one [`ConstraintModel`] per plate allocation.
#[derive(Debug, Clone)]
pub struct ConstraintModelBuilder {
    geometry: PlateGeometry,
    params: DesignParameters,
}

impl ConstraintModelBuilder {
    pub fn new(params: &DesignParameters) -> Self {
        Self {
            geometry: PlateGeometry::new(params.plate_format, params.edge_layers),
            params: params.clone(),
        }
    }

    pub fn build(&self, allocation: &PlateAllocation) -> Result<ConstraintModel> {
        let contents: Vec<ModelContent> = allocation
            .required_counts()
            .into_iter()
            .map(|(id, class, required)| ModelContent { id, class, required })
            .collect();

        let units: usize = contents.iter().map(|c| c.required).sum();
        if units > self.geometry.usable_wells() {
            return Err(LayoutError::capacity(format!(
                "plate {} was allocated {} units but has {} usable wells",
                allocation.plate_index + 1,
                units,
                self.geometry.usable_wells()
            )));
        }

        let cells = self
            .geometry
            .positions()
            .map(|position| Cell {
                position,
                quadrant: self.geometry.quadrant(position),
                in_edge: self.geometry.is_edge(position),
            })
            .collect();

        let model = ConstraintModel {
            plate_index: allocation.plate_index,
            geometry: self.geometry,
            distribution: self.params.distribution,
            contents,
            cells,
            constraints: self.constraint_manifest(),
        };

        tracing::debug!(
            "Plate {}: {} identifiers, {} units, {} variables, constraints {:?}",
            model.plate_index + 1,
            model.contents.len(),
            units,
            model.variable_count(),
            model.constraints.iter().map(|c| c.kind.name()).collect::<Vec<_>>()
        );

        Ok(model)
    }

    fn constraint_manifest(&self) -> Vec<ConstraintEntry> {
        let toggles = self.params.constraints;
        let mut entries = vec![ConstraintEntry::new(ConstraintKind::Cardinality)];
        if toggles.no_adjacent {
            entries.push(ConstraintEntry::new(ConstraintKind::NoAdjacent));
        }
        if toggles.control_spread {
            entries.push(ConstraintEntry::new(ConstraintKind::ControlSpread));
        }
        if toggles.quadrant_balance {
            entries.push(ConstraintEntry::new(ConstraintKind::QuadrantBalance));
        }
        if self.params.edge_layers > 0 {
            entries.push(ConstraintEntry::new(ConstraintKind::EdgeExclusion));
        }
        entries
    }
}
