pub mod capacity;
pub mod editor;
pub mod engine;
pub mod extractor;
pub mod model_builder;
pub mod picklist;
pub mod relaxation;
pub mod runner;
pub mod validator;

pub use crate::domain::model::{Layout, SolveResult};
pub use crate::domain::ports::{DesignPipeline, SolverEngine, Storage};
pub use crate::utils::error::Result;
