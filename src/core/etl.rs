use crate::core::{Pipeline, RunSummary};
use crate::utils::error::Result;
use crate::utils::monitor::RunMonitor;

pub struct EtlEngine<P: Pipeline> {
    pipeline: P,
    monitor_enabled: bool,
}

impl<P: Pipeline> EtlEngine<P> {
    pub fn new(pipeline: P) -> Self {
        Self {
            pipeline,
            monitor_enabled: false,
        }
    }

    pub fn new_with_monitoring(pipeline: P, monitor_enabled: bool) -> Self {
        Self {
            pipeline,
            monitor_enabled,
        }
    }

    pub async fn run(&self) -> Result<RunSummary> {
        let name = self.pipeline.name().to_string();
        let mut monitor = RunMonitor::new(self.monitor_enabled);
        tracing::info!("{}", "=".repeat(60));
        tracing::info!("Starting {}", name);
        tracing::info!("{}", "=".repeat(60));

        let extracted = self.pipeline.extract().await?;
        monitor.finish_phase("extract");

        let transformed = self.pipeline.transform(extracted).await?;
        monitor.finish_phase("transform");

        let summary = self.pipeline.load(transformed).await?;
        monitor.finish_phase("load");

        monitor.log_final_stats();
        if summary.failed > 0 {
            tracing::warn!(
                "{} completed with {} failed item(s) out of {}",
                name,
                summary.failed,
                summary.processed
            );
        } else {
            tracing::info!("{} completed successfully", name);
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::error::EtlError;

    struct CountingPipeline {
        fail_extract: bool,
    }

    #[async_trait::async_trait]
    impl Pipeline for CountingPipeline {
        type Extracted = Vec<u32>;
        type Transformed = Vec<u32>;

        fn name(&self) -> &str {
            "counting"
        }

        async fn extract(&self) -> Result<Vec<u32>> {
            if self.fail_extract {
                return Err(EtlError::AuthError {
                    message: "denied".to_string(),
                });
            }
            Ok(vec![1, 2, 3])
        }

        async fn transform(&self, data: Vec<u32>) -> Result<Vec<u32>> {
            Ok(data.into_iter().filter(|n| n % 2 == 1).collect())
        }

        async fn load(&self, data: Vec<u32>) -> Result<RunSummary> {
            let mut summary = RunSummary::new("counting");
            for n in data {
                summary.record_success(n.to_string());
            }
            Ok(summary)
        }
    }

    #[tokio::test]
    async fn test_engine_runs_all_phases() {
        let engine = EtlEngine::new(CountingPipeline { fail_extract: false });
        let summary = engine.run().await.unwrap();
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.outputs, vec!["1", "3"]);
    }

    #[tokio::test]
    async fn test_setup_failure_aborts() {
        let engine = EtlEngine::new_with_monitoring(CountingPipeline { fail_extract: true }, false);
        assert!(matches!(engine.run().await, Err(EtlError::AuthError { .. })));
    }
}
