use crate::config::toml_config::DesignConfig;
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[command(name = "plaid-layout")]
#[command(about = "Generates constraint-aware microplate layouts and transfer picklists")]
pub struct CliConfig {
    #[arg(long, help = "TOML design file with parameters, manifest and inventory")]
    pub design: PathBuf,

    #[arg(long, help = "Overrides [output].path from the design file")]
    pub output_path: Option<String>,

    #[arg(long, help = "Overrides [solver].timeout_seconds")]
    pub timeout_seconds: Option<u64>,

    #[arg(long, help = "Overrides [solver].seed")]
    pub seed: Option<u64>,

    #[arg(long, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, value_enum, default_value_t = LogFormat::Compact)]
    pub log_format: LogFormat,
}

impl CliConfig {
    /// Flags given on the command line win over the design file.
    pub fn apply_to(&self, config: &mut DesignConfig) {
        if let Some(path) = &self.output_path {
            config.output.path = path.clone();
        }
        if let Some(timeout) = self.timeout_seconds {
            config.solver.timeout_seconds = Some(timeout);
        }
        if let Some(seed) = self.seed {
            config.solver.seed = Some(seed);
        }
    }
}
