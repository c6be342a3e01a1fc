use crate::domain::model::{QueryResult, RunSummary};
use crate::utils::error::Result;
use async_trait::async_trait;

/// Object store addressed by slash-separated keys.
pub trait Storage: Send + Sync {
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Human-readable location prefix for log lines, e.g. `s3://bucket/`.
    fn location(&self) -> String;
}

/// A SQL endpoint: one call covers connect, execute and fetch.
#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<QueryResult>;
}

/// Three-phase flow driven by `EtlEngine`.
#[async_trait]
pub trait Pipeline: Send + Sync {
    type Extracted: Send;
    type Transformed: Send;

    fn name(&self) -> &str;
    async fn extract(&self) -> Result<Self::Extracted>;
    async fn transform(&self, data: Self::Extracted) -> Result<Self::Transformed>;
    async fn load(&self, data: Self::Transformed) -> Result<RunSummary>;
}
