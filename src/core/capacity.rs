use crate::domain::model::{ContentClass, DesignParameters, Manifest, WellContent};
use crate::domain::plate::PlateGeometry;
use crate::utils::error::{LayoutError, Result};
use serde::Serialize;

pub const DEFAULT_MAX_PLATES: usize = 10;

/// What one plate must carry: every unit is a sample replicate or a control instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlateAllocation {
    pub plate_index: usize,
    pub units: Vec<WellContent>,
}

impl PlateAllocation {
    /// Required well count per identifier, in first-appearance order.
    pub fn required_counts(&self) -> Vec<(String, ContentClass, usize)> {
        let mut counts: Vec<(String, ContentClass, usize)> = Vec::new();
        for unit in &self.units {
            let (Some(id), Some(class)) = (unit.identifier(), unit.class()) else {
                continue;
            };
            match counts.iter_mut().find(|(existing, _, _)| existing == id) {
                Some((_, _, n)) => *n += 1,
                None => counts.push((id.to_string(), class, 1)),
            }
        }
        counts
    }

    pub fn class_count(&self, class: ContentClass) -> usize {
        self.units.iter().filter(|u| u.class() == Some(class)).count()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapacityPlan {
    #[serde(skip)]
    pub geometry: PlateGeometry,
    pub usable_wells: usize,
    pub total_units: usize,
    pub num_plates: usize,
    pub plates: Vec<PlateAllocation>,
}

pub struct CapacityPlanner<'a> {
    params: &'a DesignParameters,
    max_plates: usize,
}

impl<'a> CapacityPlanner<'a> {
    pub fn new(params: &'a DesignParameters, max_plates: usize) -> Self {
        Self { params, max_plates }
    }

    pub fn plan(&self, manifest: &Manifest) -> Result<CapacityPlan> {
        let geometry = PlateGeometry::new(self.params.plate_format, self.params.edge_layers);
        let usable_wells = geometry.usable_wells();
        if usable_wells == 0 {
            return Err(LayoutError::capacity(format!(
                "{} edge layer(s) leave no usable wells on a {} plate",
                self.params.edge_layers, self.params.plate_format
            )));
        }

        let units = self.flatten(manifest);
        let total_units = units.len();
        if total_units == 0 {
            return Err(LayoutError::validation("manifest", "nothing to place"));
        }

        let num_plates = total_units.div_ceil(usable_wells);
        if num_plates > self.max_plates {
            return Err(LayoutError::capacity(format!(
                "{total_units} units need {num_plates} plates of {usable_wells} usable wells, more than the maximum of {}",
                self.max_plates
            )));
        }

        let mut plates: Vec<PlateAllocation> = (0..num_plates)
            .map(|plate_index| PlateAllocation {
                plate_index,
                units: Vec::new(),
            })
            .collect();
        for (i, unit) in units.into_iter().enumerate() {
            plates[i % num_plates].units.push(unit);
        }

        tracing::info!(
            "Capacity plan: {} units over {} plate(s), {} usable wells per plate",
            total_units,
            num_plates,
            usable_wells
        );

        Ok(CapacityPlan {
            geometry,
            usable_wells,
            total_units,
            num_plates,
            plates,
        })
    }

    /// Samples in manifest order with ascending replicate index, then controls.
    fn flatten(&self, manifest: &Manifest) -> Vec<WellContent> {
        let samples = manifest.samples.iter().flat_map(|sample| {
            (0..manifest.replicates_for(sample, self.params)).map(|replicate| WellContent::Sample {
                id: sample.id.clone(),
                replicate,
            })
        });
        let controls = manifest.controls.iter().flat_map(|control| {
            (0..control.count).map(|_| WellContent::Control {
                id: control.id.clone(),
                kind: control.kind,
            })
        });
        samples.chain(controls).collect()
    }
}
