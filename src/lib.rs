pub mod adapters;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use crate::config::{CliConfig, LogFormat};

pub use crate::adapters::{backtracking::BacktrackingEngine, storage::LocalStorage};
pub use crate::app::pipelines::FileDesignPipeline;
pub use crate::config::DesignConfig;
pub use crate::core::{
    editor::swap_wells,
    engine::{DesignRequest, GenerationRequest, LayoutEngine, SolveOptions},
    picklist::PicklistGenerator,
    runner::DesignRunner,
    validator::ConstraintValidator,
};
pub use crate::utils::error::{LayoutError, Result};
