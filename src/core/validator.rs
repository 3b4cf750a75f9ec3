use crate::core::capacity::PlateAllocation;
use crate::domain::model::{
    ConstraintKind, ConstraintToggles, ConstraintViolation, ContentClass, DesignParameters,
    Layout, Well,
};
use crate::domain::plate::{PlateGeometry, WellPosition};
use std::collections::BTreeMap;

/// Checks a finished layout against the PLAID rules without any solver state.
///
/// Rule violations are reported, never raised: `validate` always returns a list.
/// Rules switched off in the design parameters are not checked; rules the
/// relaxation controller gave up on are, and show up as warnings.
#[derive(Debug, Clone)]
pub struct ConstraintValidator {
    toggles: ConstraintToggles,
    expected: BTreeMap<String, usize>,
}

impl ConstraintValidator {
    pub fn new(params: &DesignParameters, expected: BTreeMap<String, usize>) -> Self {
        Self {
            toggles: params.constraints,
            expected,
        }
    }

    /// Validator expecting exactly the units allocated to one plate.
    pub fn for_allocation(params: &DesignParameters, allocation: &PlateAllocation) -> Self {
        let expected = allocation
            .required_counts()
            .into_iter()
            .map(|(id, _, count)| (id, count))
            .collect();
        Self::new(params, expected)
    }

    pub fn validate(&self, layout: &Layout) -> Vec<ConstraintViolation> {
        let plate = PlateView::new(layout);
        let mut violations = self.check_cardinality(layout);
        violations.extend(plate.check_stray_wells());
        if self.toggles.no_adjacent {
            violations.extend(plate.check_no_adjacent());
        }
        if self.toggles.control_spread {
            violations.extend(plate.check_control_spread());
        }
        if self.toggles.quadrant_balance {
            violations.extend(plate.check_quadrant_balance());
        }
        if layout.edge_layers > 0 {
            violations.extend(plate.check_edge_exclusion());
        }
        violations
    }

    /// Replaces the layout's violations and score with a fresh check.
    pub fn revalidate(&self, layout: &mut Layout) {
        layout.violations = self.validate(layout);
        layout.score = Layout::score_for(&layout.violations);
    }

    fn check_cardinality(&self, layout: &Layout) -> Vec<ConstraintViolation> {
        let mut placed: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for well in &layout.wells {
            if let Some(id) = well.content.identifier() {
                placed.entry(id).or_default().push(well.label());
            }
        }

        let mut violations = Vec::new();
        for (id, &required) in &self.expected {
            let wells = placed.remove(id.as_str()).unwrap_or_default();
            if wells.len() != required {
                violations.push(ConstraintViolation::new(
                    ConstraintKind::Cardinality,
                    wells.clone(),
                    format!("{id} occupies {} well(s), expected {required}", wells.len()),
                ));
            }
        }
        for (id, wells) in placed {
            violations.push(ConstraintViolation::new(
                ConstraintKind::Cardinality,
                wells,
                format!("{id} is not part of this plate's allocation"),
            ));
        }
        violations
    }
}

/// Forward half of the 8-neighbourhood, so each pair is visited once.
const FORWARD8: [(isize, isize); 4] = [(0, 1), (1, -1), (1, 0), (1, 1)];
const FORWARD4: [(isize, isize); 2] = [(0, 1), (1, 0)];

/// Occupied wells indexed by position on the plate's own geometry.
///
/// Quadrant and edge membership come from the geometry, not from the stored
/// `Well` fields, so reordered or hand-edited layouts are checked the same way.
struct PlateView<'a> {
    geometry: PlateGeometry,
    cells: Vec<Option<&'a Well>>,
    stray: Vec<&'a Well>,
}

impl<'a> PlateView<'a> {
    fn new(layout: &'a Layout) -> Self {
        let geometry = PlateGeometry::new(layout.format, layout.edge_layers);
        let mut cells = vec![None; geometry.cell_count()];
        let mut stray = Vec::new();
        for well in layout.wells.iter().filter(|w| !w.content.is_empty()) {
            if geometry.contains(well.position) {
                cells[geometry.index(well.position)] = Some(well);
            } else {
                stray.push(well);
            }
        }
        Self {
            geometry,
            cells,
            stray,
        }
    }

    fn occupied(&self) -> impl Iterator<Item = &'a Well> + '_ {
        self.cells.iter().flatten().copied()
    }

    fn neighbour(&self, position: WellPosition, offset: (isize, isize)) -> Option<&'a Well> {
        let row = position.row.checked_add_signed(offset.0)?;
        let col = position.col.checked_add_signed(offset.1)?;
        let moved = WellPosition::new(row, col);
        if !self.geometry.contains(moved) {
            return None;
        }
        self.cells[self.geometry.index(moved)]
    }

    fn check_stray_wells(&self) -> Vec<ConstraintViolation> {
        if self.stray.is_empty() {
            return Vec::new();
        }
        let wells: Vec<String> = self.stray.iter().map(|w| w.label()).collect();
        vec![ConstraintViolation::new(
            ConstraintKind::Cardinality,
            wells.clone(),
            format!("{} lie outside a {} plate", wells.join(", "), self.geometry.format),
        )]
    }

    fn check_no_adjacent(&self) -> Vec<ConstraintViolation> {
        let mut violations = Vec::new();
        for well in self.occupied().filter(|w| w.content.is_control()) {
            for offset in FORWARD8 {
                let Some(other) = self.neighbour(well.position, offset) else {
                    continue;
                };
                if other.content.is_control() && other.content.identifier() == well.content.identifier() {
                    violations.push(ConstraintViolation::new(
                        ConstraintKind::NoAdjacent,
                        vec![well.label(), other.label()],
                        format!(
                            "{} wells {} and {} are adjacent",
                            well.content.identifier().unwrap_or_default(),
                            well.label(),
                            other.label()
                        ),
                    ));
                }
            }
        }
        violations
    }

    fn check_control_spread(&self) -> Vec<ConstraintViolation> {
        let mut violations = Vec::new();
        for well in self.occupied().filter(|w| w.content.is_control()) {
            for offset in FORWARD4 {
                let Some(other) = self.neighbour(well.position, offset) else {
                    continue;
                };
                if other.content.is_control() {
                    violations.push(ConstraintViolation::new(
                        ConstraintKind::ControlSpread,
                        vec![well.label(), other.label()],
                        format!("control wells {} and {} share an edge", well.label(), other.label()),
                    ));
                }
            }
        }
        violations
    }

    fn check_quadrant_balance(&self) -> Vec<ConstraintViolation> {
        let mut violations = Vec::new();
        for class in [ContentClass::Sample, ContentClass::Control] {
            let mut counts = [0usize; 4];
            for well in self.occupied().filter(|w| w.content.class() == Some(class)) {
                counts[self.geometry.quadrant(well.position)] += 1;
            }
            let max = counts.iter().max().copied().unwrap_or(0);
            let min = counts.iter().min().copied().unwrap_or(0);
            if max - min > 1 {
                let label = match class {
                    ContentClass::Sample => "sample",
                    ContentClass::Control => "control",
                };
                violations.push(ConstraintViolation::new(
                    ConstraintKind::QuadrantBalance,
                    Vec::new(),
                    format!("{label} wells per quadrant are {counts:?}, spread {} exceeds 1", max - min),
                ));
            }
        }
        violations
    }

    fn check_edge_exclusion(&self) -> Vec<ConstraintViolation> {
        let wells: Vec<String> = self
            .occupied()
            .filter(|w| self.geometry.is_edge(w.position))
            .map(Well::label)
            .collect();
        if wells.is_empty() {
            return Vec::new();
        }
        vec![ConstraintViolation::new(
            ConstraintKind::EdgeExclusion,
            wells.clone(),
            format!(
                "{} well(s) inside the {}-well edge band are occupied",
                wells.len(),
                self.geometry.edge_layers
            ),
        )]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{ControlKind, WellContent};
    use crate::domain::plate::PlateFormat;

    fn empty_layout(edge_layers: usize) -> Layout {
        let geometry = PlateGeometry::new(PlateFormat::Wells96, edge_layers);
        Layout {
            plate_index: 0,
            plate_barcode: Layout::barcode_for(0),
            format: PlateFormat::Wells96,
            edge_layers,
            wells: geometry
                .positions()
                .map(|position| Well {
                    position,
                    row: position.row,
                    col: position.col,
                    content: WellContent::Empty,
                    quadrant: geometry.quadrant(position),
                    in_edge: geometry.is_edge(position),
                })
                .collect(),
            violations: Vec::new(),
            score: 100.0,
        }
    }

    fn put(layout: &mut Layout, label: &str, content: WellContent) {
        let position: WellPosition = label.parse().unwrap();
        let well = layout.wells.iter_mut().find(|w| w.position == position).unwrap();
        well.content = content;
    }

    fn pos() -> WellContent {
        WellContent::Control {
            id: "POS".to_string(),
            kind: ControlKind::Positive,
        }
    }

    fn neg() -> WellContent {
        WellContent::Control {
            id: "NEG".to_string(),
            kind: ControlKind::Negative,
        }
    }

    fn validator(expected: &[(&str, usize)]) -> ConstraintValidator {
        ConstraintValidator::new(
            &DesignParameters::default(),
            expected.iter().map(|(id, n)| (id.to_string(), *n)).collect(),
        )
    }

    fn rules(violations: &[ConstraintViolation]) -> Vec<ConstraintKind> {
        violations.iter().map(|v| v.rule).collect()
    }

    #[test]
    fn test_clean_layout_has_no_violations() {
        let mut layout = empty_layout(1);
        put(&mut layout, "B02", pos());
        put(&mut layout, "B08", pos());
        put(&mut layout, "F02", pos());
        put(&mut layout, "F08", pos());

        let validator = validator(&[("POS", 4)]);
        assert!(validator.validate(&layout).is_empty());
    }

    #[test]
    fn test_diagonal_same_control_is_an_error() {
        let mut layout = empty_layout(1);
        put(&mut layout, "B02", pos());
        put(&mut layout, "C03", pos());

        let violations = validator(&[("POS", 2)]).validate(&layout);
        assert!(rules(&violations).contains(&ConstraintKind::NoAdjacent));
        let no_adjacent = violations
            .iter()
            .find(|v| v.rule == ConstraintKind::NoAdjacent)
            .unwrap();
        assert!(no_adjacent.is_error());
        assert_eq!(no_adjacent.affected_wells, vec!["B02", "C03"]);
        // Diagonal neighbours do not break the spread rule.
        assert!(!rules(&violations).contains(&ConstraintKind::ControlSpread));
    }

    #[test]
    fn test_different_controls_side_by_side_only_break_spread() {
        let mut layout = empty_layout(1);
        put(&mut layout, "C06", pos());
        put(&mut layout, "C07", neg());

        let violations = validator(&[("POS", 1), ("NEG", 1)]).validate(&layout);
        assert_eq!(rules(&violations), vec![ConstraintKind::ControlSpread]);
        assert!(!violations[0].is_error());
    }

    #[test]
    fn test_cardinality_mismatch_and_unexpected_identifier() {
        let mut layout = empty_layout(1);
        put(&mut layout, "B02", pos());
        put(
            &mut layout,
            "B05",
            WellContent::Sample {
                id: "KRAS".to_string(),
                replicate: 0,
            },
        );

        let violations = validator(&[("POS", 2)]).validate(&layout);
        let cardinality: Vec<&ConstraintViolation> = violations
            .iter()
            .filter(|v| v.rule == ConstraintKind::Cardinality)
            .collect();
        assert_eq!(cardinality.len(), 2);
        assert!(cardinality.iter().all(|v| v.is_error()));
    }

    #[test]
    fn test_edge_wells_are_reported_once() {
        let mut layout = empty_layout(1);
        put(&mut layout, "A01", pos());
        put(&mut layout, "H12", neg());

        let violations = validator(&[("POS", 1), ("NEG", 1)]).validate(&layout);
        let edge: Vec<&ConstraintViolation> = violations
            .iter()
            .filter(|v| v.rule == ConstraintKind::EdgeExclusion)
            .collect();
        assert_eq!(edge.len(), 1);
        assert_eq!(edge[0].affected_wells, vec!["A01", "H12"]);
    }

    #[test]
    fn test_quadrant_imbalance() {
        let mut layout = empty_layout(0);
        for label in ["A01", "A03", "C01"] {
            put(
                &mut layout,
                label,
                WellContent::Sample {
                    id: "TP53".to_string(),
                    replicate: 0,
                },
            );
        }

        let violations = validator(&[("TP53", 3)]).validate(&layout);
        assert_eq!(rules(&violations), vec![ConstraintKind::QuadrantBalance]);
    }

    #[test]
    fn test_disabled_rules_are_not_checked() {
        let mut layout = empty_layout(0);
        put(&mut layout, "C03", pos());
        put(&mut layout, "C04", pos());
        let mut params = DesignParameters::default();
        params.constraints.no_adjacent = false;
        params.constraints.control_spread = false;
        params.constraints.quadrant_balance = false;

        let validator = ConstraintValidator::new(&params, [("POS".to_string(), 2)].into());
        assert!(validator.validate(&layout).is_empty());
    }

    #[test]
    fn test_revalidate_updates_score() {
        let mut layout = empty_layout(1);
        put(&mut layout, "A01", pos());
        let validator = validator(&[("POS", 1)]);

        validator.revalidate(&mut layout);
        assert_eq!(layout.violations.len(), 1);
        assert_eq!(layout.score, 95.0);
    }

    #[test]
    fn test_stored_quadrant_and_order_are_not_trusted() {
        let mut layout = empty_layout(1);
        put(&mut layout, "B02", pos());
        put(&mut layout, "C03", pos());
        put(&mut layout, "A05", neg());
        for well in &mut layout.wells {
            well.quadrant = 9;
            well.in_edge = false;
        }
        layout.wells.reverse();

        let violations = validator(&[("POS", 2), ("NEG", 1)]).validate(&layout);
        let no_adjacent = violations
            .iter()
            .find(|v| v.rule == ConstraintKind::NoAdjacent)
            .unwrap();
        assert_eq!(no_adjacent.affected_wells, vec!["B02", "C03"]);
        let edge = violations
            .iter()
            .find(|v| v.rule == ConstraintKind::EdgeExclusion)
            .unwrap();
        assert_eq!(edge.affected_wells, vec!["A05"]);
    }

    #[test]
    fn test_well_outside_the_plate_is_reported() {
        let mut layout = empty_layout(0);
        layout.wells.push(Well {
            position: WellPosition::new(8, 0),
            row: 8,
            col: 0,
            content: pos(),
            quadrant: 2,
            in_edge: false,
        });

        let violations = validator(&[("POS", 1)]).validate(&layout);
        assert_eq!(rules(&violations), vec![ConstraintKind::Cardinality]);
        assert_eq!(violations[0].affected_wells, vec!["I01"]);
    }
}
