use crate::adapters::backtracking::BacktrackingEngine;
use crate::config::toml_config::DesignConfig;
use crate::core::engine::{DesignRequest, LayoutEngine};
use crate::core::picklist::PicklistGenerator;
use crate::domain::model::SolveResult;
use crate::domain::ports::{DesignPipeline, Storage};
use crate::utils::error::{ErrorCategory, Result};
use crate::utils::validation::Validate;
use std::time::Instant;

/// Reads a design file and writes the layouts as JSON and the picklist as CSV.
pub struct FileDesignPipeline<S: Storage> {
    pub(crate) storage: S,
    pub(crate) config: DesignConfig,
    pub(crate) engine: LayoutEngine<BacktrackingEngine>,
}

impl<S: Storage> FileDesignPipeline<S> {
    pub fn new(storage: S, config: DesignConfig) -> Self {
        Self {
            storage,
            config,
            engine: LayoutEngine::default(),
        }
    }

    async fn write_result(&self, result: &SolveResult) -> Result<()> {
        let json = serde_json::to_string_pretty(result)?;
        self.storage
            .write_file(&self.config.output.layout_file, json.as_bytes())
            .await
    }
}

#[async_trait::async_trait]
impl<S: Storage> DesignPipeline for FileDesignPipeline<S> {
    async fn load(&self) -> Result<DesignRequest> {
        self.config.validate()?;
        Ok(self.config.to_request())
    }

    async fn generate(&self, request: &DesignRequest) -> Result<SolveResult> {
        let started = Instant::now();
        match self.engine.generate(&request.generation).await {
            Ok(result) => Ok(result),
            Err(e) if e.category() == ErrorCategory::Solver => {
                // Leave the diagnostics on disk before reporting the failure.
                let failed = SolveResult::failed(
                    e.user_friendly_message(),
                    e.diagnostics().to_vec(),
                    started.elapsed().as_millis() as u64,
                );
                self.write_result(&failed).await?;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn export(&self, request: &DesignRequest, result: &SolveResult) -> Result<String> {
        self.write_result(result).await?;
        tracing::debug!(
            "Wrote {} layout(s) to {}",
            result.layouts.len(),
            self.config.output.layout_file
        );

        if request.inventory.identifiers().next().is_none() {
            tracing::warn!("No source inventory given, skipping picklist");
        } else {
            let generation = &request.generation;
            let picklist = PicklistGenerator::new(&generation.manifest, &generation.params)
                .generate(&result.layouts, &request.inventory)?;
            self.storage
                .write_file(&self.config.output.picklist_file, picklist.to_csv()?.as_bytes())
                .await?;
            tracing::debug!(
                "Wrote {} transfers ({} nL) to {}",
                picklist.len(),
                picklist.total_volume_nl(),
                self.config.output.picklist_file
            );
        }

        Ok(self.config.output.path.clone())
    }
}
