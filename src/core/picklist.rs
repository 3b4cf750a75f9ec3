use crate::domain::model::{
    DesignParameters, Layout, Manifest, Picklist, PicklistEntry, SourceInventory,
};
use crate::utils::error::{LayoutError, Result};
use std::collections::HashMap;

const VOLUME_EPSILON_NL: f64 = 1e-9;

/// Maps validated layouts onto source wells.
pub struct PicklistGenerator<'a> {
    manifest: &'a Manifest,
    params: &'a DesignParameters,
}

impl<'a> PicklistGenerator<'a> {
    pub fn new(manifest: &'a Manifest, params: &'a DesignParameters) -> Self {
        Self { manifest, params }
    }

    /// One transfer per occupied destination well, plate by plate in
    /// row-major order. Source volume is drawn from a working copy of the
    /// inventory, first source well first. Any failure yields no picklist.
    pub fn generate(&self, layouts: &[Layout], inventory: &SourceInventory) -> Result<Picklist> {
        if let Some(blocked) = layouts.iter().find(|l| l.has_errors()) {
            return Err(LayoutError::validation(
                "layout",
                format!(
                    "{} has hard-rule violations; fix them before exporting a picklist",
                    blocked.plate_barcode
                ),
            ));
        }

        let mut remaining: HashMap<&str, Vec<f64>> = HashMap::new();
        let mut entries = Vec::new();

        for layout in layouts {
            for well in &layout.wells {
                let Some(id) = well.content.identifier() else {
                    continue;
                };
                let destination = format!("{}:{}", layout.plate_barcode, well.label());
                let sources = inventory.sources(id);
                if sources.is_empty() {
                    return Err(LayoutError::MissingSourceError {
                        identifier: id.to_string(),
                        destination,
                        reason: "identifier is not in the source inventory".to_string(),
                    });
                }

                let volume = self.manifest.transfer_volume_for(id, self.params);
                let left = remaining
                    .entry(id)
                    .or_insert_with(|| sources.iter().map(|s| s.volume_nl).collect());
                let Some(slot) = left.iter().position(|&v| v + VOLUME_EPSILON_NL >= volume) else {
                    let available: f64 = left.iter().sum();
                    return Err(LayoutError::MissingSourceError {
                        identifier: id.to_string(),
                        destination,
                        reason: format!(
                            "no source well holds {volume} nL ({available:.1} nL left across {} well(s))",
                            sources.len()
                        ),
                    });
                };
                left[slot] -= volume;

                let source = &sources[slot];
                entries.push(PicklistEntry {
                    source_plate: source.plate.clone(),
                    source_well: source.well.label(),
                    destination_plate: layout.plate_barcode.clone(),
                    destination_well: well.label(),
                    transfer_volume_nl: volume,
                    identifier: id.to_string(),
                });
            }
        }

        tracing::info!(
            "Picklist: {} transfers over {} plate(s)",
            entries.len(),
            layouts.len()
        );
        Ok(Picklist { entries })
    }
}

impl Picklist {
    pub fn to_csv(&self) -> Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        for entry in &self.entries {
            writer.serialize(entry)?;
        }
        if self.entries.is_empty() {
            writer.write_record([
                "Source Plate Barcode",
                "Source Well",
                "Destination Plate Barcode",
                "Destination Well",
                "Transfer Volume",
                "Identifier",
            ])?;
        }
        let bytes = writer.into_inner().map_err(|e| e.into_error())?;
        String::from_utf8(bytes).map_err(|e| LayoutError::validation("picklist", e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{
        Control, ControlKind, Sample, SourceWell, Well, WellContent,
    };
    use crate::domain::plate::{PlateFormat, PlateGeometry};

    fn layout(contents: &[(&str, WellContent)]) -> Layout {
        let geometry = PlateGeometry::new(PlateFormat::Wells96, 1);
        let mut wells: Vec<Well> = geometry
            .positions()
            .map(|position| Well {
                position,
                row: position.row,
                col: position.col,
                content: WellContent::Empty,
                quadrant: geometry.quadrant(position),
                in_edge: geometry.is_edge(position),
            })
            .collect();
        for (label, content) in contents {
            let position = label.parse().unwrap();
            wells[geometry.index(position)].content = content.clone();
        }
        Layout {
            plate_index: 0,
            plate_barcode: Layout::barcode_for(0),
            format: PlateFormat::Wells96,
            edge_layers: 1,
            wells,
            violations: Vec::new(),
            score: 100.0,
        }
    }

    fn sample(id: &str, replicate: u32) -> WellContent {
        WellContent::Sample {
            id: id.to_string(),
            replicate,
        }
    }

    fn source(plate: &str, well: &str, volume_nl: f64) -> SourceWell {
        SourceWell {
            plate: plate.to_string(),
            well: well.parse().unwrap(),
            volume_nl,
        }
    }

    fn manifest() -> Manifest {
        let mut tp53 = Sample::new("TP53");
        tp53.transfer_volume_nl = Some(5.0);
        Manifest::new(
            vec![tp53, Sample::new("EGFR")],
            vec![Control::new("POS", ControlKind::Positive, 1)],
        )
    }

    #[test]
    fn test_entries_follow_row_major_destination_order() {
        let layout = layout(&[
            ("C05", sample("EGFR", 0)),
            ("B07", sample("TP53", 0)),
            (
                "B03",
                WellContent::Control {
                    id: "POS".to_string(),
                    kind: ControlKind::Positive,
                },
            ),
        ]);
        let mut inventory = SourceInventory::new();
        inventory.add("TP53", source("src_1", "A01", 100.0));
        inventory.add("EGFR", source("src_1", "A02", 100.0));
        inventory.add("POS", source("src_1", "P24", 100.0));

        let params = DesignParameters::default();
        let manifest = manifest();
        let picklist = PicklistGenerator::new(&manifest, &params)
            .generate(&[layout], &inventory)
            .unwrap();

        let destinations: Vec<&str> = picklist
            .entries
            .iter()
            .map(|e| e.destination_well.as_str())
            .collect();
        assert_eq!(destinations, vec!["B03", "B07", "C05"]);
        assert_eq!(picklist.entries[1].transfer_volume_nl, 5.0);
        assert_eq!(picklist.entries[2].transfer_volume_nl, 2.5);
        assert_eq!(picklist.entries[0].source_well, "P24");
        assert_eq!(picklist.total_volume_nl(), 10.0);
    }

    #[test]
    fn test_unknown_identifier_fails_without_output() {
        let layout = layout(&[("B02", sample("TP53", 0)), ("B04", sample("EGFR", 0))]);
        let mut inventory = SourceInventory::new();
        inventory.add("TP53", source("src_1", "A01", 100.0));

        let params = DesignParameters::default();
        let manifest = manifest();
        let err = PicklistGenerator::new(&manifest, &params)
            .generate(&[layout], &inventory)
            .unwrap_err();
        match err {
            LayoutError::MissingSourceError {
                identifier,
                destination,
                ..
            } => {
                assert_eq!(identifier, "EGFR");
                assert_eq!(destination, "plate_1:B04");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_volume_is_drawn_across_source_wells() {
        let layout = layout(&[
            ("B02", sample("TP53", 0)),
            ("B04", sample("TP53", 1)),
            ("B06", sample("TP53", 2)),
        ]);
        let mut inventory = SourceInventory::new();
        inventory.add("TP53", source("src_1", "A01", 10.0));
        inventory.add("TP53", source("src_1", "A02", 5.0));

        let params = DesignParameters::default();
        let manifest = manifest();
        let picklist = PicklistGenerator::new(&manifest, &params)
            .generate(&[layout.clone()], &inventory)
            .unwrap();
        let sources: Vec<&str> = picklist.entries.iter().map(|e| e.source_well.as_str()).collect();
        assert_eq!(sources, vec!["A01", "A01", "A02"]);
        // The inventory itself is untouched.
        assert_eq!(inventory.sources("TP53")[0].volume_nl, 10.0);

        let mut short = SourceInventory::new();
        short.add("TP53", source("src_1", "A01", 12.0));
        let err = PicklistGenerator::new(&manifest, &params)
            .generate(&[layout], &short)
            .unwrap_err();
        assert!(matches!(err, LayoutError::MissingSourceError { .. }));
    }

    #[test]
    fn test_hard_violations_block_export() {
        let mut layout = layout(&[("B02", sample("TP53", 0))]);
        layout.violations.push(crate::domain::model::ConstraintViolation::new(
            crate::domain::model::ConstraintKind::NoAdjacent,
            vec!["B02".to_string()],
            "adjacent",
        ));
        let params = DesignParameters::default();
        let manifest = manifest();
        let err = PicklistGenerator::new(&manifest, &params)
            .generate(&[layout], &SourceInventory::new())
            .unwrap_err();
        assert!(matches!(err, LayoutError::ValidationError { .. }));
    }

    #[test]
    fn test_csv_header() {
        let picklist = Picklist {
            entries: vec![PicklistEntry {
                source_plate: "src_1".to_string(),
                source_well: "A01".to_string(),
                destination_plate: "plate_1".to_string(),
                destination_well: "B02".to_string(),
                transfer_volume_nl: 2.5,
                identifier: "TP53".to_string(),
            }],
        };
        let csv = picklist.to_csv().unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next(),
            Some("Source Plate Barcode,Source Well,Destination Plate Barcode,Destination Well,Transfer Volume,Identifier")
        );
        assert_eq!(lines.next(), Some("src_1,A01,plate_1,B02,2.5,TP53"));

        let empty = Picklist::default().to_csv().unwrap();
        assert!(empty.starts_with("Source Plate Barcode,"));
    }
}
