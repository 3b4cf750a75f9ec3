//! Depth-first search over plate cells with count-based domains.
//!
//! Cells are visited in the model's branching order and each one receives
//! either an identifier with copies left to place or "empty". Replicates of
//! one identifier are interchangeable, so the search never branches over
//! their permutations. After every placement a set of cheap upper bounds is
//! checked so hopeless branches are cut early:
//!
//! * no-adjacent: a 2x2 block of wells holds at most one copy of a control;
//! * control spread: a run of `k` free wells in a row holds at most `ceil(k/2)` controls;
//! * quadrant balance: each quadrant keeps enough free wells to reach its floor.

use crate::core::model_builder::ConstraintModel;
use crate::domain::model::{ConstraintKind, ContentClass, DistributionMode};
use crate::domain::plate::{PlateGeometry, WellPosition};
use crate::domain::ports::{Assignment, Conflict, EngineOutcome, SolveLimits, SolverEngine};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;

const DEADLINE_CHECK_INTERVAL: u64 = 64;
const RANDOM_JITTER: f64 = 0.75;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Free,
    Empty,
    Filled(usize),
}

struct Interrupted;

#[derive(Debug, Clone, Copy, Default)]
pub struct BacktrackingEngine;

impl BacktrackingEngine {
    pub fn new() -> Self {
        Self
    }
}

impl SolverEngine for BacktrackingEngine {
    fn name(&self) -> &str {
        "backtracking"
    }

    fn solve(&self, model: &ConstraintModel, limits: &SolveLimits) -> EngineOutcome {
        if limits.expired() {
            return EngineOutcome::TimedOut(None);
        }

        let mut search = Search::new(model, limits);
        if let Some(conflict) = search.root_conflict() {
            tracing::debug!("Plate {} rejected before search: {}", model.plate_index + 1, conflict.detail);
            return EngineOutcome::Infeasible(Some(conflict));
        }
        search.run()
    }
}

fn class_index(class: ContentClass) -> usize {
    match class {
        ContentClass::Sample => 0,
        ContentClass::Control => 1,
    }
}

struct Search<'m> {
    model: &'m ConstraintModel,
    limits: &'m SolveLimits,
    geometry: PlateGeometry,
    grid: Vec<Slot>,
    order: Vec<usize>,
    total: Vec<usize>,
    placed: Vec<usize>,
    total_empty: usize,
    placed_empty: usize,
    control: Vec<bool>,
    class_of: Vec<usize>,
    quad_count: [[usize; 4]; 2],
    quad_free: [usize; 4],
    quad_bounds: [(usize, usize); 2],
    no_adjacent: bool,
    spread: bool,
    balance: bool,
    nodes: u64,
    rng: Option<StdRng>,
    dead_ends: BTreeMap<ConstraintKind, u64>,
}

impl<'m> Search<'m> {
    fn new(model: &'m ConstraintModel, limits: &'m SolveLimits) -> Self {
        let order = model.branching_order();
        let mut grid = vec![Slot::Empty; model.cells.len()];
        let mut quad_free = [0; 4];
        for &cell in &order {
            grid[cell] = Slot::Free;
            quad_free[model.cells[cell].quadrant] += 1;
        }

        let total: Vec<usize> = model.contents.iter().map(|c| c.required).collect();
        let units: usize = total.iter().sum();

        Self {
            model,
            limits,
            geometry: model.geometry,
            grid,
            total_empty: order.len().saturating_sub(units),
            order,
            placed: vec![0; total.len()],
            total,
            placed_empty: 0,
            control: model.contents.iter().map(|c| c.is_control()).collect(),
            class_of: model.contents.iter().map(|c| class_index(c.class)).collect(),
            quad_count: [[0; 4]; 2],
            quad_free,
            quad_bounds: [
                model.quadrant_bounds(ContentClass::Sample),
                model.quadrant_bounds(ContentClass::Control),
            ],
            no_adjacent: model.is_active(ConstraintKind::NoAdjacent),
            spread: model.is_active(ConstraintKind::ControlSpread),
            balance: model.is_active(ConstraintKind::QuadrantBalance),
            nodes: 0,
            rng: (model.distribution == DistributionMode::Random)
                .then(|| StdRng::seed_from_u64(limits.seed)),
            dead_ends: BTreeMap::new(),
        }
    }

    /// Bounds that already fail on the empty plate.
    fn root_conflict(&self) -> Option<Conflict> {
        let units: usize = self.total.iter().sum();
        let open = self.order.len();
        if units > open {
            return Some(Conflict {
                rule: ConstraintKind::Cardinality,
                detail: format!("{units} units but only {open} open wells"),
            });
        }

        if self.no_adjacent {
            for (i, content) in self.model.contents.iter().enumerate() {
                if !self.control[i] {
                    continue;
                }
                let bound = self.adjacency_bound(i);
                if bound < self.total[i] {
                    return Some(Conflict {
                        rule: ConstraintKind::NoAdjacent,
                        detail: format!(
                            "control '{}' needs {} wells but at most {} fit without touching",
                            content.id, self.total[i], bound
                        ),
                    });
                }
            }
        }

        if self.spread {
            let controls = self.remaining_controls();
            let bound = self.spread_bound();
            if controls > bound {
                return Some(Conflict {
                    rule: ConstraintKind::ControlSpread,
                    detail: format!(
                        "{controls} control wells but at most {bound} fit without row neighbours"
                    ),
                });
            }
        }

        if self.balance {
            for q in 0..4 {
                let need = self.quadrant_need(q);
                if need > self.quad_free[q] {
                    return Some(Conflict {
                        rule: ConstraintKind::QuadrantBalance,
                        detail: format!(
                            "quadrant {} needs {} wells but has {}",
                            q + 1,
                            need,
                            self.quad_free[q]
                        ),
                    });
                }
            }
        }

        None
    }

    fn run(&mut self) -> EngineOutcome {
        let outcome = match self.descend(0) {
            Ok(true) => EngineOutcome::Feasible(self.assignment()),
            Ok(false) => EngineOutcome::Infeasible(self.dominant_conflict()),
            Err(Interrupted) => EngineOutcome::TimedOut(self.dominant_conflict()),
        };
        tracing::debug!(
            "Plate {}: search visited {} nodes",
            self.model.plate_index + 1,
            self.nodes
        );
        outcome
    }

    fn descend(&mut self, depth: usize) -> Result<bool, Interrupted> {
        self.nodes += 1;
        if self.nodes % DEADLINE_CHECK_INTERVAL == 0 && self.limits.expired() {
            return Err(Interrupted);
        }

        let Some(&cell) = self.order.get(depth) else {
            return Ok(true);
        };

        for value in self.candidates(depth) {
            if !self.allows(cell, value) {
                continue;
            }
            self.place(cell, value);
            if self.consistent() && self.descend(depth + 1)? {
                return Ok(true);
            }
            self.unplace(cell, value);
        }
        Ok(false)
    }

    /// Values ordered by how far each lags behind an even spread over the visit order.
    fn candidates(&mut self, depth: usize) -> Vec<Option<usize>> {
        let progress = (depth + 1) as f64 / self.order.len() as f64;
        let mut scored: Vec<(f64, usize, Option<usize>)> = Vec::with_capacity(self.total.len() + 1);
        for (i, (&total, &placed)) in self.total.iter().zip(&self.placed).enumerate() {
            if placed < total {
                scored.push((total as f64 * progress - placed as f64, i, Some(i)));
            }
        }
        if self.placed_empty < self.total_empty {
            let lag = self.total_empty as f64 * progress - self.placed_empty as f64;
            scored.push((lag, usize::MAX, None));
        }
        if let Some(rng) = self.rng.as_mut() {
            for entry in &mut scored {
                entry.0 += rng.gen::<f64>() * RANDOM_JITTER;
            }
        }
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
        scored.into_iter().map(|(_, _, value)| value).collect()
    }

    fn allows(&mut self, cell: usize, value: Option<usize>) -> bool {
        let Some(i) = value else {
            return true;
        };
        let position = self.model.cells[cell].position;

        if self.control[i] {
            if self.no_adjacent && self.touches(position, i) {
                self.dead_end(ConstraintKind::NoAdjacent);
                return false;
            }
            if self.spread && self.next_to_control(position) {
                self.dead_end(ConstraintKind::ControlSpread);
                return false;
            }
        }

        if self.balance {
            let q = self.model.cells[cell].quadrant;
            let class = self.class_of[i];
            if self.quad_count[class][q] >= self.quad_bounds[class].1 {
                self.dead_end(ConstraintKind::QuadrantBalance);
                return false;
            }
        }
        true
    }

    fn place(&mut self, cell: usize, value: Option<usize>) {
        let q = self.model.cells[cell].quadrant;
        self.quad_free[q] -= 1;
        match value {
            Some(i) => {
                self.grid[cell] = Slot::Filled(i);
                self.placed[i] += 1;
                self.quad_count[self.class_of[i]][q] += 1;
            }
            None => {
                self.grid[cell] = Slot::Empty;
                self.placed_empty += 1;
            }
        }
    }

    fn unplace(&mut self, cell: usize, value: Option<usize>) {
        let q = self.model.cells[cell].quadrant;
        self.quad_free[q] += 1;
        self.grid[cell] = Slot::Free;
        match value {
            Some(i) => {
                self.placed[i] -= 1;
                self.quad_count[self.class_of[i]][q] -= 1;
            }
            None => self.placed_empty -= 1,
        }
    }

    fn consistent(&mut self) -> bool {
        if self.balance && (0..4).any(|q| self.quadrant_need(q) > self.quad_free[q]) {
            self.dead_end(ConstraintKind::QuadrantBalance);
            return false;
        }

        if self.no_adjacent {
            for i in 0..self.total.len() {
                let remaining = self.total[i] - self.placed[i];
                if self.control[i] && remaining > 0 && self.adjacency_bound(i) < remaining {
                    self.dead_end(ConstraintKind::NoAdjacent);
                    return false;
                }
            }
        }

        if self.spread {
            let remaining = self.remaining_controls();
            if remaining > 0 && self.spread_bound() < remaining {
                self.dead_end(ConstraintKind::ControlSpread);
                return false;
            }
        }
        true
    }

    fn touches(&self, position: WellPosition, content: usize) -> bool {
        self.geometry
            .neighbors8(position)
            .any(|n| self.grid[self.geometry.index(n)] == Slot::Filled(content))
    }

    fn next_to_control(&self, position: WellPosition) -> bool {
        self.geometry
            .neighbors4(position)
            .any(|n| self.holds_control(self.geometry.index(n)))
    }

    fn holds_control(&self, cell: usize) -> bool {
        matches!(self.grid[cell], Slot::Filled(j) if self.control[j])
    }

    fn remaining_controls(&self) -> usize {
        (0..self.total.len())
            .filter(|&i| self.control[i])
            .map(|i| self.total[i] - self.placed[i])
            .sum()
    }

    fn quadrant_need(&self, q: usize) -> usize {
        (0..2)
            .map(|class| self.quad_bounds[class].0.saturating_sub(self.quad_count[class][q]))
            .sum()
    }

    /// Aligned 2x2 blocks that can still take a copy of `content`.
    fn adjacency_bound(&self, content: usize) -> usize {
        let (rows, cols) = (self.geometry.rows, self.geometry.cols);
        let mut bound = 0;
        for br in (0..rows).step_by(2) {
            for bc in (0..cols).step_by(2) {
                let block: Vec<WellPosition> = [(br, bc), (br, bc + 1), (br + 1, bc), (br + 1, bc + 1)]
                    .into_iter()
                    .map(|(r, c)| WellPosition::new(r, c))
                    .filter(|p| self.geometry.contains(*p))
                    .collect();
                if block
                    .iter()
                    .any(|p| self.grid[self.geometry.index(*p)] == Slot::Filled(content))
                {
                    continue;
                }
                let usable = block.iter().any(|p| {
                    self.grid[self.geometry.index(*p)] == Slot::Free && !self.touches(*p, content)
                });
                if usable {
                    bound += 1;
                }
            }
        }
        bound
    }

    /// Controls that still fit if only row neighbours were forbidden.
    fn spread_bound(&self) -> usize {
        let mut bound = 0;
        for row in 0..self.geometry.rows {
            let mut run = 0usize;
            for col in 0..self.geometry.cols {
                let position = WellPosition::new(row, col);
                let cell = self.geometry.index(position);
                if self.grid[cell] == Slot::Free && !self.next_to_control(position) {
                    run += 1;
                } else {
                    bound += run.div_ceil(2);
                    run = 0;
                }
            }
            bound += run.div_ceil(2);
        }
        bound
    }

    fn dead_end(&mut self, rule: ConstraintKind) {
        *self.dead_ends.entry(rule).or_default() += 1;
    }

    fn dominant_conflict(&self) -> Option<Conflict> {
        self.dead_ends
            .iter()
            .max_by_key(|(_, count)| **count)
            .map(|(rule, count)| Conflict {
                rule: *rule,
                detail: format!("{count} dead ends on {rule} after {} nodes", self.nodes),
            })
    }

    fn assignment(&self) -> Assignment {
        Assignment {
            cells: self
                .grid
                .iter()
                .map(|slot| match slot {
                    Slot::Filled(i) => Some(*i),
                    Slot::Free | Slot::Empty => None,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::capacity::{CapacityPlanner, DEFAULT_MAX_PLATES};
    use crate::core::model_builder::ConstraintModelBuilder;
    use crate::domain::model::{Control, ControlKind, DesignParameters, Manifest, Sample};
    use crate::domain::plate::PlateFormat;
    use std::time::{Duration, Instant};

    fn model_for(manifest: &Manifest, params: &DesignParameters) -> ConstraintModel {
        let plan = CapacityPlanner::new(params, DEFAULT_MAX_PLATES)
            .plan(manifest)
            .unwrap();
        ConstraintModelBuilder::new(params).build(&plan.plates[0]).unwrap()
    }

    fn limits(seconds: u64) -> SolveLimits {
        SolveLimits::new(Instant::now() + Duration::from_secs(seconds), 7)
    }

    fn small_manifest() -> Manifest {
        Manifest::new(
            (0..5)
                .map(|i| Sample::new(format!("GENE{i}")).with_replicates(4))
                .collect(),
            vec![
                Control::new("POS", ControlKind::Positive, 4),
                Control::new("NEG", ControlKind::Negative, 4),
            ],
        )
    }

    fn counts(model: &ConstraintModel, assignment: &Assignment) -> Vec<usize> {
        (0..model.contents.len())
            .map(|i| assignment.cells.iter().filter(|c| **c == Some(i)).count())
            .collect()
    }

    #[test]
    fn test_feasible_assignment_meets_counts_and_edge() {
        let params = DesignParameters::default();
        let model = model_for(&small_manifest(), &params);

        let EngineOutcome::Feasible(assignment) = BacktrackingEngine.solve(&model, &limits(10)) else {
            panic!("expected a feasible assignment");
        };

        let required: Vec<usize> = model.contents.iter().map(|c| c.required).collect();
        assert_eq!(counts(&model, &assignment), required);
        for (cell, value) in assignment.cells.iter().enumerate() {
            if model.cells[cell].in_edge {
                assert!(value.is_none(), "edge well {} filled", model.cells[cell].position);
            }
        }
    }

    #[test]
    fn test_same_control_never_touches() {
        let params = DesignParameters::default();
        let model = model_for(&small_manifest(), &params);
        let EngineOutcome::Feasible(assignment) = BacktrackingEngine.solve(&model, &limits(10)) else {
            panic!("expected a feasible assignment");
        };

        let geometry = model.geometry;
        for (cell, value) in assignment.cells.iter().enumerate() {
            let Some(i) = value else { continue };
            if !model.contents[*i].is_control() {
                continue;
            }
            for neighbor in geometry.neighbors8(geometry.position(cell)) {
                assert_ne!(assignment.cells[geometry.index(neighbor)], Some(*i));
            }
        }
    }

    #[test]
    fn test_too_many_controls_rejected_by_adjacency_bound() {
        let params = DesignParameters::default();
        let manifest = Manifest::new(vec![], vec![Control::new("POS", ControlKind::Positive, 50)]);
        let model = model_for(&manifest, &params);

        match BacktrackingEngine.solve(&model, &limits(10)) {
            EngineOutcome::Infeasible(Some(conflict)) => {
                assert_eq!(conflict.rule, ConstraintKind::NoAdjacent)
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_expired_deadline_times_out() {
        let params = DesignParameters::default();
        let model = model_for(&small_manifest(), &params);
        let expired = SolveLimits::new(Instant::now() - Duration::from_millis(1), 0);
        assert_eq!(BacktrackingEngine.solve(&model, &expired), EngineOutcome::TimedOut(None));
    }

    #[test]
    fn test_random_mode_is_reproducible_with_seed() {
        let params = DesignParameters {
            distribution: DistributionMode::Random,
            ..DesignParameters::default()
        };
        let model = model_for(&small_manifest(), &params);
        let first = BacktrackingEngine.solve(&model, &limits(10));
        let second = BacktrackingEngine.solve(&model, &limits(10));
        assert!(matches!(first, EngineOutcome::Feasible(_)));
        assert_eq!(first, second);
    }

    fn dense_384() -> ConstraintModel {
        let params = DesignParameters {
            plate_format: PlateFormat::Wells384,
            ..DesignParameters::default()
        };
        let manifest = Manifest::new(
            (0..40)
                .map(|i| Sample::new(format!("GENE{i}")).with_replicates(4))
                .collect(),
            vec![
                Control::new("POS", ControlKind::Positive, 24),
                Control::new("NEG", ControlKind::Negative, 24),
            ],
        );
        model_for(&manifest, &params)
    }

    #[test]
    fn test_deadline_passing_mid_search_times_out() {
        let model = dense_384();
        let limits = SolveLimits::new(Instant::now() + Duration::from_millis(20), 0);
        let mut search = Search::new(&model, &limits);
        assert!(search.root_conflict().is_none());
        std::thread::sleep(Duration::from_millis(30));

        assert!(matches!(search.run(), EngineOutcome::TimedOut(_)));
        assert_eq!(search.nodes, DEADLINE_CHECK_INTERVAL);
    }

    #[test]
    fn test_cancel_stops_search_at_next_check() {
        let model = dense_384();
        let limits = SolveLimits::new(Instant::now() + Duration::from_secs(30), 0);
        let mut search = Search::new(&model, &limits);
        limits.cancel.cancel();

        assert!(matches!(search.run(), EngineOutcome::TimedOut(_)));
        assert_eq!(search.nodes, DEADLINE_CHECK_INTERVAL);
        assert!(search.assignment().cells.iter().filter(|c| c.is_some()).count() > 0);
    }

    #[test]
    fn test_cancelled_limits_stop_before_search() {
        let model = model_for(&small_manifest(), &DesignParameters::default());
        let limits = limits(10);
        limits.cancel.clone().cancel();
        assert_eq!(BacktrackingEngine.solve(&model, &limits), EngineOutcome::TimedOut(None));
    }
}
