use crate::core::capacity::PlateAllocation;
use crate::core::model_builder::ConstraintModel;
use crate::domain::model::{Layout, Well, WellContent};
use crate::domain::ports::Assignment;
use std::collections::{HashMap, VecDeque};

/// Turns an engine assignment back into wells.
///
/// The engine only knows identifier indices, so replicate numbers and control
/// kinds are taken from the plate allocation: the k-th cell (row-major) holding
/// an identifier receives that identifier's k-th unit.
pub struct LayoutExtractor;

impl LayoutExtractor {
    pub fn extract(
        model: &ConstraintModel,
        allocation: &PlateAllocation,
        assignment: &Assignment,
    ) -> Layout {
        let mut queues: HashMap<&str, VecDeque<&WellContent>> = HashMap::new();
        for unit in &allocation.units {
            if let Some(id) = unit.identifier() {
                queues.entry(id).or_default().push_back(unit);
            }
        }

        let wells = model
            .cells
            .iter()
            .zip(&assignment.cells)
            .map(|(cell, value)| {
                let content = value
                    .and_then(|i| model.contents.get(i))
                    .and_then(|c| queues.get_mut(c.id.as_str()))
                    .and_then(VecDeque::pop_front)
                    .cloned()
                    .unwrap_or_default();
                Well {
                    position: cell.position,
                    row: cell.position.row,
                    col: cell.position.col,
                    content,
                    quadrant: cell.quadrant,
                    in_edge: cell.in_edge,
                }
            })
            .collect();

        Layout {
            plate_index: model.plate_index,
            plate_barcode: Layout::barcode_for(model.plate_index),
            format: model.geometry.format,
            edge_layers: model.geometry.edge_layers,
            wells,
            violations: Vec::new(),
            score: 100.0,
        }
    }
}
