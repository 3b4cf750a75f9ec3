use crate::domain::model::{DesignParameters, Manifest};
use crate::utils::error::{LayoutError, Result};
use std::collections::HashSet;

pub trait Validate {
    fn validate(&self) -> Result<()>;
}

pub fn validate_path(field_name: &str, path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(LayoutError::validation(field_name, "path cannot be empty"));
    }

    if path.contains('\0') {
        return Err(LayoutError::validation(field_name, "path contains null bytes"));
    }

    Ok(())
}

pub fn validate_positive_number(field_name: &str, value: usize, min_value: usize) -> Result<()> {
    if value < min_value {
        return Err(LayoutError::validation(
            field_name,
            format!("{value} is below the minimum of {min_value}"),
        ));
    }
    Ok(())
}

pub fn validate_volume(field_name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(LayoutError::validation(
            field_name,
            format!("{value} nL is not a positive volume"),
        ));
    }
    Ok(())
}

pub fn validate_non_empty_string(field_name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(LayoutError::validation(
            field_name,
            "value cannot be empty or whitespace-only",
        ));
    }
    Ok(())
}

pub fn validate_range<T: PartialOrd + std::fmt::Display + Copy>(
    field_name: &str,
    value: T,
    min: T,
    max: T,
) -> Result<()> {
    if value < min || value > max {
        return Err(LayoutError::validation(
            field_name,
            format!("{value} must be between {min} and {max}"),
        ));
    }
    Ok(())
}

impl Validate for DesignParameters {
    fn validate(&self) -> Result<()> {
        validate_positive_number("replicates", self.replicates as usize, 1)?;
        let (rows, _) = self.plate_format.dimensions();
        validate_range("edge_layers", self.edge_layers, 0, rows / 2)?;
        validate_volume("transfer_volume_nl", self.transfer_volume_nl)
    }
}

impl Validate for Manifest {
    fn validate(&self) -> Result<()> {
        if self.samples.is_empty() && self.controls.is_empty() {
            return Err(LayoutError::validation("manifest", "no samples or controls given"));
        }

        let mut seen = HashSet::new();
        let ids = self
            .samples
            .iter()
            .map(|s| &s.id)
            .chain(self.controls.iter().map(|c| &c.id));
        for id in ids {
            validate_non_empty_string("manifest.id", id)?;
            if !seen.insert(id.as_str()) {
                return Err(LayoutError::validation(
                    "manifest.id",
                    format!("identifier '{id}' appears more than once"),
                ));
            }
        }

        for sample in &self.samples {
            if let Some(replicates) = sample.replicates {
                validate_positive_number(&format!("samples.{}.replicates", sample.id), replicates as usize, 1)?;
            }
            if let Some(volume) = sample.transfer_volume_nl {
                validate_volume(&format!("samples.{}.transfer_volume_nl", sample.id), volume)?;
            }
        }
        for control in &self.controls {
            validate_positive_number(&format!("controls.{}.count", control.id), control.count as usize, 1)?;
            if let Some(volume) = control.transfer_volume_nl {
                validate_volume(&format!("controls.{}.transfer_volume_nl", control.id), volume)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{Control, ControlKind, Sample};

    #[test]
    fn test_validate_positive_number() {
        assert!(validate_positive_number("replicates", 5, 1).is_ok());
        assert!(validate_positive_number("replicates", 0, 1).is_err());
    }

    #[test]
    fn test_validate_range_and_volume() {
        assert!(validate_range("edge_layers", 2, 0, 4).is_ok());
        assert!(validate_range("edge_layers", 5, 0, 4).is_err());
        assert!(validate_volume("volume", 2.5).is_ok());
        assert!(validate_volume("volume", 0.0).is_err());
        assert!(validate_volume("volume", f64::NAN).is_err());
    }

    #[test]
    fn test_default_parameters_are_valid() {
        assert!(DesignParameters::default().validate().is_ok());
        let params = DesignParameters {
            replicates: 0,
            ..DesignParameters::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_manifest_rejects_duplicate_ids() {
        let manifest = Manifest::new(
            vec![Sample::new("TP53")],
            vec![Control::new("TP53", ControlKind::Positive, 2)],
        );
        let err = manifest.validate().unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_manifest_rejects_blank_ids_and_zero_counts() {
        assert!(Manifest::new(vec![Sample::new("  ")], vec![]).validate().is_err());
        assert!(Manifest::new(vec![], vec![Control::new("NEG", ControlKind::Negative, 0)])
            .validate()
            .is_err());
        assert!(Manifest::default().validate().is_err());
    }
}
