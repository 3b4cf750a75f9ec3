use crate::core::validator::ConstraintValidator;
use crate::domain::model::Layout;
use crate::domain::plate::{PlateGeometry, WellPosition};
use crate::utils::error::{LayoutError, Result};

/// Exchanges the contents of two wells and re-validates the layout.
pub fn swap_wells(
    layout: &mut Layout,
    from: &str,
    to: &str,
    validator: &ConstraintValidator,
) -> Result<()> {
    let geometry = PlateGeometry::new(layout.format, layout.edge_layers);
    let a = resolve(layout, &geometry, from)?;
    let b = resolve(layout, &geometry, to)?;

    if a != b {
        let (i, j) = (a.min(b), a.max(b));
        let (head, tail) = layout.wells.split_at_mut(j);
        std::mem::swap(&mut head[i].content, &mut tail[0].content);
    }
    validator.revalidate(layout);

    tracing::debug!(
        "{}: swapped {} and {}, {} violation(s), score {}",
        layout.plate_barcode,
        from,
        to,
        layout.violations.len(),
        layout.score
    );
    Ok(())
}

fn resolve(layout: &Layout, geometry: &PlateGeometry, label: &str) -> Result<usize> {
    let position: WellPosition = label.parse()?;
    if !geometry.contains(position) {
        return Err(LayoutError::validation(
            "well",
            format!("{label} is outside a {} plate", geometry.format),
        ));
    }
    layout
        .wells
        .iter()
        .position(|w| w.position == position)
        .ok_or_else(|| {
            LayoutError::validation("well", format!("{label} is missing from {}", layout.plate_barcode))
        })
}
