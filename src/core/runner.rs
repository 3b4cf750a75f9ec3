use crate::domain::ports::DesignPipeline;
use crate::utils::error::Result;

/// Drives a [`DesignPipeline`] through load, generate and export.
pub struct DesignRunner<P: DesignPipeline> {
    pipeline: P,
}

impl<P: DesignPipeline> DesignRunner<P> {
    pub fn new(pipeline: P) -> Self {
        Self { pipeline }
    }

    pub async fn run(&self) -> Result<String> {
        tracing::info!("Starting layout design run");

        let request = self.pipeline.load().await?;
        tracing::info!(
            "Loaded {} sample(s), {} control(s), {} inventory identifier(s)",
            request.generation.manifest.samples.len(),
            request.generation.manifest.controls.len(),
            request.inventory.identifiers().count()
        );

        let result = self.pipeline.generate(&request).await?;
        tracing::info!(
            "Generated {} plate(s), status {:?}",
            result.layouts.len(),
            result.status
        );

        let output_path = self.pipeline.export(&request, &result).await?;
        tracing::info!("Output saved to: {}", output_path);

        Ok(output_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::engine::{DesignRequest, GenerationRequest, LayoutEngine};
    use crate::domain::model::{DesignParameters, Manifest, Sample, SolveResult, SourceInventory};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct RecordingPipeline {
        steps: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl DesignPipeline for RecordingPipeline {
        async fn load(&self) -> Result<DesignRequest> {
            self.steps.lock().unwrap().push("load");
            Ok(DesignRequest {
                generation: GenerationRequest::new(
                    Manifest::new(vec![Sample::new("TP53").with_replicates(4)], vec![]),
                    DesignParameters::default(),
                ),
                inventory: SourceInventory::new(),
            })
        }

        async fn generate(&self, request: &DesignRequest) -> Result<SolveResult> {
            self.steps.lock().unwrap().push("generate");
            LayoutEngine::default().generate(&request.generation).await
        }

        async fn export(&self, _request: &DesignRequest, result: &SolveResult) -> Result<String> {
            self.steps.lock().unwrap().push("export");
            Ok(format!("{} layout(s)", result.layouts.len()))
        }
    }

    #[tokio::test]
    async fn test_runner_calls_every_stage_in_order() {
        let runner = DesignRunner::new(RecordingPipeline {
            steps: Mutex::new(Vec::new()),
        });
        let output = runner.run().await.unwrap();

        assert_eq!(output, "1 layout(s)");
        assert_eq!(
            *runner.pipeline.steps.lock().unwrap(),
            vec!["load", "generate", "export"]
        );
    }
}
