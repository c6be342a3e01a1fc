//! One async function per flow. Each builds its clients from `AppConfig`,
//! runs the pipeline through `EtlEngine` and returns the run summary.

use crate::adapters::{LocalStorage, S3Storage};
use crate::config::settings::AppConfig;
use crate::core::bcda::{BcdaClient, BcdaExportPipeline};
use crate::core::bcda_load::BcdaLoadPipeline;
use crate::core::etl::EtlEngine;
use crate::core::http::{HttpClient, RetryPolicy};
use crate::core::loader::{CsvLoadPipeline, TemplateLoadPipeline};
use crate::core::postgrest::{PostgrestClient, PostgrestExportPipeline};
use crate::core::views::ViewExportPipeline;
use crate::core::warehouse::{SnowflakeClient, SqlRunner};
use crate::core::RunSummary;
use crate::utils::error::Result;
use std::path::PathBuf;

fn http_client(config: &AppConfig) -> Result<HttpClient> {
    HttpClient::new(RetryPolicy::from(&config.retry))
}

pub fn snowflake(config: &AppConfig) -> Result<SnowflakeClient> {
    SnowflakeClient::new(http_client(config)?, config.warehouse.clone())
}

pub async fn bcda_export(config: &AppConfig, monitor: bool) -> Result<RunSummary> {
    config.bcda.credentials()?;
    let storage = S3Storage::from_config(&config.storage).await?;
    let client = BcdaClient::new(http_client(config)?, config.bcda.clone());
    EtlEngine::new_with_monitoring(BcdaExportPipeline::new(client, storage), monitor)
        .run()
        .await
}

pub async fn supabase_export(config: &AppConfig, monitor: bool) -> Result<RunSummary> {
    config.postgrest.endpoint()?;
    let storage = S3Storage::from_config(&config.storage).await?;
    let client = PostgrestClient::new(http_client(config)?, config.postgrest.clone());
    EtlEngine::new_with_monitoring(PostgrestExportPipeline::new(client, storage), monitor)
        .run()
        .await
}

pub async fn load_csv(config: &AppConfig, monitor: bool) -> Result<RunSummary> {
    let warehouse = snowflake(config)?;
    let storage = if config.loader.upload_files {
        Some(S3Storage::from_config(&config.storage).await?)
    } else {
        None
    };
    let pipeline = CsvLoadPipeline::new(
        warehouse,
        storage,
        config.loader.clone(),
        config.warehouse.clone(),
        config.storage.bucket.clone(),
    );
    EtlEngine::new_with_monitoring(pipeline, monitor).run().await
}

pub async fn load_templates(config: &AppConfig, monitor: bool) -> Result<RunSummary> {
    let pipeline = TemplateLoadPipeline::new(
        snowflake(config)?,
        config.loader.clone(),
        config.warehouse.clone(),
        config.storage.bucket.clone(),
    );
    EtlEngine::new_with_monitoring(pipeline, monitor).run().await
}

pub async fn load_bcda(config: &AppConfig, monitor: bool) -> Result<RunSummary> {
    let pipeline = BcdaLoadPipeline::new(
        snowflake(config)?,
        config.bcda.clone(),
        config.bcda_load.clone(),
        config.warehouse.clone(),
        config.storage.bucket.clone(),
    );
    EtlEngine::new_with_monitoring(pipeline, monitor).run().await
}

/// Runs each file's statements in order. An unreadable file counts as one
/// failure and the remaining files still run.
pub async fn run_sql(config: &AppConfig, files: &[PathBuf]) -> Result<RunSummary> {
    let warehouse = snowflake(config)?;
    let runner = SqlRunner::new(&warehouse);
    let mut summary = RunSummary::new("SQL");

    for file in files {
        tracing::info!("Running {}", file.display());
        let script = match tokio::fs::read_to_string(file).await {
            Ok(script) => script,
            Err(e) => {
                tracing::error!("Cannot read {}: {}", file.display(), e);
                summary.record_failure();
                continue;
            }
        };
        let result = runner.run_script(&script).await;
        for _ in 0..result.executed {
            summary.record_success(file.display().to_string());
        }
        for _ in 0..result.failed {
            summary.record_failure();
        }
    }
    summary.outputs.dedup();
    summary.log(&format!("{}.{}", config.warehouse.database, config.warehouse.schema));
    Ok(summary)
}

pub async fn export_views(config: &AppConfig, monitor: bool) -> Result<RunSummary> {
    let storage = LocalStorage::new(&config.views.output_dir);
    let pipeline = ViewExportPipeline::new(snowflake(config)?, storage, config.views.clone());
    EtlEngine::new_with_monitoring(pipeline, monitor).run().await
}
