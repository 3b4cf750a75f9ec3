use crate::core::capacity::DEFAULT_MAX_PLATES;
use crate::core::engine::{DesignRequest, GenerationRequest, SolveOptions, DEFAULT_TIMEOUT};
use crate::domain::model::{
    Control, DesignParameters, Manifest, Sample, SourceInventory, SourceWell,
};
use crate::domain::plate::WellPosition;
use crate::utils::error::{LayoutError, Result};
use crate::utils::validation::{
    validate_non_empty_string, validate_path, validate_positive_number, validate_range,
    validate_volume, Validate,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

static ENV_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("env var pattern is valid"));

const MAX_TIMEOUT_SECONDS: u64 = 3600;

/// A design file: parameters, manifest, source inventory and output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesignConfig {
    #[serde(default)]
    pub design: DesignParameters,
    #[serde(default)]
    pub solver: SolverConfig,
    #[serde(default)]
    pub samples: Vec<Sample>,
    #[serde(default)]
    pub controls: Vec<Control>,
    #[serde(default)]
    pub inventory: Vec<InventoryEntry>,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverConfig {
    pub timeout_seconds: Option<u64>,
    pub max_plates: Option<usize>,
    pub seed: Option<u64>,
    pub concurrent_plates: Option<bool>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: Some(DEFAULT_TIMEOUT.as_secs()),
            max_plates: Some(DEFAULT_MAX_PLATES),
            seed: Some(0),
            concurrent_plates: Some(true),
        }
    }
}

/// One source well holding an identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryEntry {
    pub id: String,
    pub plate: String,
    pub well: WellPosition,
    pub volume_nl: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_path")]
    pub path: String,
    #[serde(default = "default_layout_file")]
    pub layout_file: String,
    #[serde(default = "default_picklist_file")]
    pub picklist_file: String,
}

fn default_output_path() -> String {
    "./output".to_string()
}

fn default_layout_file() -> String {
    "layouts.json".to_string()
}

fn default_picklist_file() -> String {
    "picklist.csv".to_string()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: default_output_path(),
            layout_file: default_layout_file(),
            picklist_file: default_picklist_file(),
        }
    }
}

impl DesignConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(LayoutError::IoError)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content);

        toml::from_str(&processed_content).map_err(|e| LayoutError::ConfigError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// Replaces `${VAR}` with the environment value; unknown variables stay as written.
    fn substitute_env_vars(content: &str) -> String {
        ENV_VAR
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
            })
            .into_owned()
    }

    pub fn manifest(&self) -> Manifest {
        Manifest::new(self.samples.clone(), self.controls.clone())
    }

    pub fn solve_options(&self) -> SolveOptions {
        let defaults = SolveOptions::default();
        SolveOptions {
            timeout: self
                .solver
                .timeout_seconds
                .map_or(defaults.timeout, Duration::from_secs),
            deadline: None,
            seed: self.solver.seed.unwrap_or(defaults.seed),
            max_plates: self.solver.max_plates.unwrap_or(defaults.max_plates),
            concurrent_plates: self
                .solver
                .concurrent_plates
                .unwrap_or(defaults.concurrent_plates),
        }
    }

    pub fn inventory(&self) -> SourceInventory {
        let mut inventory = SourceInventory::new();
        for entry in &self.inventory {
            inventory.add(
                entry.id.clone(),
                SourceWell {
                    plate: entry.plate.clone(),
                    well: entry.well,
                    volume_nl: entry.volume_nl,
                },
            );
        }
        inventory
    }

    pub fn to_request(&self) -> DesignRequest {
        DesignRequest {
            generation: GenerationRequest::new(self.manifest(), self.design.clone())
                .with_options(self.solve_options()),
            inventory: self.inventory(),
        }
    }

    pub fn validate_config(&self) -> Result<()> {
        self.design.validate()?;
        self.manifest().validate()?;

        if let Some(timeout) = self.solver.timeout_seconds {
            validate_range("solver.timeout_seconds", timeout, 1, MAX_TIMEOUT_SECONDS)?;
        }
        if let Some(max_plates) = self.solver.max_plates {
            validate_positive_number("solver.max_plates", max_plates, 1)?;
        }

        let manifest = self.manifest();
        for entry in &self.inventory {
            validate_non_empty_string("inventory.id", &entry.id)?;
            validate_non_empty_string("inventory.plate", &entry.plate)?;
            validate_volume(&format!("inventory.{}.volume_nl", entry.id), entry.volume_nl)?;
            if !manifest.contains(&entry.id) {
                tracing::warn!("Inventory entry '{}' is not in the manifest", entry.id);
            }
        }

        validate_path("output.path", &self.output.path)?;
        validate_non_empty_string("output.layout_file", &self.output.layout_file)?;
        validate_non_empty_string("output.picklist_file", &self.output.picklist_file)?;

        Ok(())
    }
}

impl Validate for DesignConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}
