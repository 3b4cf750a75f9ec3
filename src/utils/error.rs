use crate::domain::model::{ConstraintViolation, RelaxationState};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LayoutError {
    #[error("Validation error in {field}: {message}")]
    ValidationError { field: String, message: String },

    #[error("Capacity error: {message}")]
    CapacityError { message: String },

    #[error("No layout satisfies the hard constraints for plate {plate_index} (last stage: {stage})")]
    NoSolutionError {
        plate_index: usize,
        stage: RelaxationState,
        diagnostics: Vec<ConstraintViolation>,
    },

    #[error("Solver deadline exhausted for plate {plate_index} after {elapsed:?} (last stage: {stage})")]
    SolverTimeout {
        plate_index: usize,
        stage: RelaxationState,
        elapsed: Duration,
        diagnostics: Vec<ConstraintViolation>,
    },

    #[error("No source well for '{identifier}' (destination {destination}): {reason}")]
    MissingSourceError {
        identifier: String,
        destination: String,
        reason: String,
    },

    #[error("Plate {plate_index} was cancelled after another plate failed")]
    Cancelled { plate_index: usize },

    #[error("Configuration error in {field}: {message}")]
    ConfigError { field: String, message: String },

    #[error("Background solve task failed: {message}")]
    TaskError { message: String },

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Input,
    Capacity,
    Solver,
    Inventory,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Medium,
    High,
    Critical,
}

impl LayoutError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn capacity(message: impl Into<String>) -> Self {
        Self::CapacityError {
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ValidationError { .. } | Self::ConfigError { .. } => ErrorCategory::Input,
            Self::CapacityError { .. } => ErrorCategory::Capacity,
            Self::NoSolutionError { .. } | Self::SolverTimeout { .. } | Self::Cancelled { .. } => {
                ErrorCategory::Solver
            }
            Self::MissingSourceError { .. } => ErrorCategory::Inventory,
            Self::TaskError { .. }
            | Self::CsvError(_)
            | Self::IoError(_)
            | Self::SerializationError(_) => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            // More time might have helped.
            Self::SolverTimeout { .. } | Self::Cancelled { .. } => ErrorSeverity::Medium,
            Self::ValidationError { .. }
            | Self::ConfigError { .. }
            | Self::CapacityError { .. }
            | Self::NoSolutionError { .. }
            | Self::MissingSourceError { .. } => ErrorSeverity::High,
            Self::TaskError { .. }
            | Self::CsvError(_)
            | Self::IoError(_)
            | Self::SerializationError(_) => ErrorSeverity::Critical,
        }
    }

    /// Diagnostics collected by the last relaxation stage, if any.
    pub fn diagnostics(&self) -> &[ConstraintViolation] {
        match self {
            Self::NoSolutionError { diagnostics, .. } | Self::SolverTimeout { diagnostics, .. } => {
                diagnostics
            }
            _ => &[],
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            Self::ValidationError { field, message } => {
                format!("The design input is invalid ({field}): {message}")
            }
            Self::CapacityError { message } => format!("The samples do not fit: {message}"),
            Self::NoSolutionError {
                plate_index,
                diagnostics,
                ..
            } => {
                let rules: Vec<&str> = diagnostics.iter().map(|d| d.rule.name()).collect();
                if rules.is_empty() {
                    format!("Plate {} cannot be laid out under the hard rules", plate_index + 1)
                } else {
                    format!(
                        "Plate {} cannot be laid out; blocking rules: {}",
                        plate_index + 1,
                        rules.join(", ")
                    )
                }
            }
            Self::SolverTimeout { plate_index, .. } => {
                format!("Plate {} ran out of solver time", plate_index + 1)
            }
            Self::MissingSourceError {
                identifier,
                destination,
                ..
            } => format!("'{identifier}' has no usable source well for destination {destination}"),
            Self::ConfigError { field, message } => {
                format!("The configuration is invalid ({field}): {message}")
            }
            other => other.to_string(),
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            Self::ValidationError { .. } => "Check identifiers, replicate counts and parameter ranges",
            Self::CapacityError { .. } => {
                "Reduce the edge-exclusion depth, use a larger plate format or split the manifest"
            }
            Self::NoSolutionError { .. } => {
                "Reduce same-type control counts or use a larger plate format"
            }
            Self::SolverTimeout { .. } => "Increase the solver timeout or retry with another seed",
            Self::MissingSourceError { .. } => {
                "Add the identifier to the source inventory or top up its source volume"
            }
            Self::ConfigError { .. } => "Fix the design file and run again",
            Self::Cancelled { .. } => "Fix the failure reported for the other plate",
            Self::TaskError { .. } => "Retry the request",
            Self::CsvError(_) | Self::IoError(_) | Self::SerializationError(_) => {
                "Check the output path and its permissions"
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, LayoutError>;
