use plaid_layout::domain::model::{
    Control, ControlKind, DesignParameters, Manifest, Sample, SourceInventory, SourceWell,
};
use plaid_layout::domain::plate::WellPosition;
use plaid_layout::{GenerationRequest, LayoutEngine, LayoutError, PicklistGenerator};

fn manifest() -> Manifest {
    let mut slow = Sample::new("CMPD-002").with_replicates(3);
    slow.transfer_volume_nl = Some(10.0);
    Manifest::new(
        vec![Sample::new("CMPD-001").with_replicates(3), slow],
        vec![Control::new("DMSO", ControlKind::Negative, 4)],
    )
}

fn inventory(ids: &[&str]) -> SourceInventory {
    let mut inventory = SourceInventory::new();
    for (col, id) in ids.iter().enumerate() {
        inventory.add(
            *id,
            SourceWell {
                plate: "source_384".to_string(),
                well: WellPosition::new(0, col),
                volume_nl: 1_000.0,
            },
        );
    }
    inventory
}

#[tokio::test]
async fn test_picklist_covers_every_occupied_well_in_reading_order() {
    let params = DesignParameters::default();
    let manifest = manifest();
    let result = LayoutEngine::default()
        .generate(&GenerationRequest::new(manifest.clone(), params.clone()))
        .await
        .unwrap();

    let picklist = PicklistGenerator::new(&manifest, &params)
        .generate(&result.layouts, &inventory(&["CMPD-001", "CMPD-002", "DMSO"]))
        .unwrap();

    assert_eq!(picklist.len(), 10);
    assert_eq!(picklist.total_volume_nl(), 3.0 * 2.5 + 3.0 * 10.0 + 4.0 * 2.5);

    let positions: Vec<WellPosition> = picklist
        .entries
        .iter()
        .map(|e| e.destination_well.parse().unwrap())
        .collect();
    let mut sorted = positions.clone();
    sorted.sort();
    assert_eq!(positions, sorted);

    for entry in &picklist.entries {
        assert_eq!(entry.destination_plate, "plate_1");
        assert_eq!(entry.source_plate, "source_384");
        let well = result.layouts[0].well(&entry.destination_well).unwrap();
        assert_eq!(well.content.identifier(), Some(entry.identifier.as_str()));
    }

    let csv = picklist.to_csv().unwrap();
    assert!(csv.starts_with(
        "Source Plate Barcode,Source Well,Destination Plate Barcode,Destination Well,Transfer Volume,Identifier\n"
    ));
    assert_eq!(csv.lines().count(), 11);
}

#[tokio::test]
async fn test_missing_identifier_yields_no_picklist() {
    let params = DesignParameters::default();
    let manifest = manifest();
    let result = LayoutEngine::default()
        .generate(&GenerationRequest::new(manifest.clone(), params.clone()))
        .await
        .unwrap();

    let err = PicklistGenerator::new(&manifest, &params)
        .generate(&result.layouts, &inventory(&["CMPD-001", "DMSO"]))
        .unwrap_err();

    match &err {
        LayoutError::MissingSourceError {
            identifier,
            destination,
            ..
        } => {
            assert_eq!(identifier, "CMPD-002");
            assert!(destination.starts_with("plate_1:"));
        }
        other => panic!("expected MissingSourceError, got {other:?}"),
    }
    assert!(err.user_friendly_message().contains("CMPD-002"));
}

#[tokio::test]
async fn test_multi_plate_picklist_is_ordered_by_plate() {
    let params = DesignParameters::default();
    let manifest = Manifest::new(
        (1..=10).map(|i| Sample::new(format!("CMPD-{i:03}"))).collect(),
        vec![Control::new("DMSO", ControlKind::Negative, 12)],
    );
    let result = LayoutEngine::default()
        .generate(&GenerationRequest::new(manifest.clone(), params.clone()))
        .await
        .unwrap();
    assert_eq!(result.layouts.len(), 2);

    let ids: Vec<String> = (1..=10)
        .map(|i| format!("CMPD-{i:03}"))
        .chain(["DMSO".to_string()])
        .collect();
    let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
    let picklist = PicklistGenerator::new(&manifest, &params)
        .generate(&result.layouts, &inventory(&ids))
        .unwrap();

    assert_eq!(picklist.len(), 72);
    let first_second = picklist
        .entries
        .iter()
        .position(|e| e.destination_plate == "plate_2")
        .unwrap();
    assert_eq!(first_second, 36);
    assert!(picklist.entries[first_second..]
        .iter()
        .all(|e| e.destination_plate == "plate_2"));
}
