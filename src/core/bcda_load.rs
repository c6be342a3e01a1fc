//! Loads staged BCDA NDJSON into one raw VARIANT table per resource type.

use crate::config::settings::{BcdaConfig, BcdaLoadConfig, WarehouseConfig};
use crate::core::loader::{create_stage_sql, ndjson_file_format_sql};
use crate::core::schema::sanitize_identifier;
use crate::core::{Pipeline, RunSummary, Warehouse};
use crate::utils::error::{EtlError, Result};

/// One resource type's raw table and where its files sit under the stage.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTarget {
    pub resource_type: String,
    pub table: String,
    pub stage_path: String,
}

/// Stage path is the object-key prefix relative to the stage root, e.g.
/// `bcda/patients` under stage prefix `bcda` becomes `patients`.
pub fn raw_targets(bcda: &BcdaConfig, load: &BcdaLoadConfig) -> Vec<RawTarget> {
    let root = format!("{}/", load.stage_prefix.trim_matches('/'));
    bcda.resource_types
        .iter()
        .map(|resource_type| {
            let prefix = bcda.key_prefix(resource_type);
            let stage_path = prefix
                .strip_prefix(&root)
                .unwrap_or(&prefix)
                .trim_matches('/')
                .to_string();
            RawTarget {
                resource_type: resource_type.clone(),
                table: sanitize_identifier(&format!("{}_{}", load.table_prefix, resource_type)),
                stage_path,
            }
        })
        .collect()
}

pub fn create_raw_table_sql(qualified_table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    ID VARCHAR,\n    RESOURCETYPE VARCHAR,\n    \
         RAW VARIANT,\n    LOADED_AT TIMESTAMP_NTZ DEFAULT CURRENT_TIMESTAMP()\n)",
        qualified_table
    )
}

pub fn copy_raw_sql(qualified_table: &str, stage: &str, stage_path: &str, format: &str) -> String {
    format!(
        "COPY INTO {} (ID, RESOURCETYPE, RAW)\nFROM (\n    SELECT $1:id::VARCHAR, $1:resourceType::VARCHAR, $1\n    \
         FROM @{}/{}/\n)\nFILE_FORMAT = (FORMAT_NAME = '{}')\nON_ERROR = CONTINUE",
        qualified_table, stage, stage_path, format
    )
}

pub struct BcdaLoadPipeline<W: Warehouse> {
    warehouse: W,
    bcda: BcdaConfig,
    load: BcdaLoadConfig,
    target: WarehouseConfig,
    bucket: Option<String>,
}

impl<W: Warehouse> BcdaLoadPipeline<W> {
    pub fn new(
        warehouse: W,
        bcda: BcdaConfig,
        load: BcdaLoadConfig,
        target: WarehouseConfig,
        bucket: Option<String>,
    ) -> Self {
        Self {
            warehouse,
            bcda,
            load,
            target,
            bucket,
        }
    }

    async fn load_one(&self, raw: &RawTarget) -> Result<u64> {
        let table = self.target.qualify(&raw.table);
        self.warehouse.execute(&create_raw_table_sql(&table)).await?;
        let result = self
            .warehouse
            .execute(&copy_raw_sql(
                &table,
                &self.target.qualify(&self.load.stage),
                &raw.stage_path,
                &self.target.qualify(&self.load.json_format),
            ))
            .await?;
        Ok(result.sum_column("rows_loaded"))
    }
}

#[async_trait::async_trait]
impl<W: Warehouse> Pipeline for BcdaLoadPipeline<W> {
    type Extracted = Vec<RawTarget>;
    type Transformed = Vec<RawTarget>;

    fn name(&self) -> &str {
        "BCDA load"
    }

    async fn extract(&self) -> Result<Vec<RawTarget>> {
        let stage = self.target.qualify(&self.load.stage);
        if self.load.create_stage {
            let bucket = self.bucket.as_deref().ok_or_else(|| EtlError::MissingConfigError {
                field: "storage.bucket".to_string(),
            })?;
            tracing::info!("Creating stage {} -> s3://{}/{}/", stage, bucket, self.load.stage_prefix);
            self.warehouse
                .execute(&create_stage_sql(
                    &stage,
                    bucket,
                    &self.load.stage_prefix,
                    self.load.storage_integration.as_deref(),
                ))
                .await?;
        }
        self.warehouse
            .execute(&ndjson_file_format_sql(&self.target.qualify(&self.load.json_format)))
            .await?;
        Ok(raw_targets(&self.bcda, &self.load))
    }

    async fn transform(&self, targets: Vec<RawTarget>) -> Result<Vec<RawTarget>> {
        Ok(targets)
    }

    async fn load(&self, targets: Vec<RawTarget>) -> Result<RunSummary> {
        let mut summary = RunSummary::new("BCDA load");
        for raw in &targets {
            tracing::info!("Loading {} from {}", raw.table, raw.stage_path);
            match self.load_one(raw).await {
                Ok(rows) => {
                    // Types absent from the last export legitimately load nothing.
                    if rows == 0 {
                        tracing::warn!("No new {} rows", raw.resource_type);
                    }
                    summary.rows += rows;
                    summary.record_success(raw.table.clone());
                }
                Err(e) => {
                    tracing::error!("✗ {}: {}", raw.table, e);
                    summary.record_failure();
                }
            }
        }
        summary.log(&self.load.stage);
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_targets_strip_stage_root() {
        let targets = raw_targets(&BcdaConfig::default(), &BcdaLoadConfig::default());
        assert_eq!(
            targets[0],
            RawTarget {
                resource_type: "Patient".to_string(),
                table: "RAW_BCDA_PATIENT".to_string(),
                stage_path: "patients".to_string(),
            }
        );
        assert_eq!(targets[1].table, "RAW_BCDA_EXPLANATIONOFBENEFIT");
        assert_eq!(targets[1].stage_path, "eob");
    }

    #[test]
    fn test_copy_raw_sql() {
        let sql = copy_raw_sql("DB.RAW.RAW_BCDA_PATIENT", "DB.RAW.S3_BCDA_STAGE", "patients", "DB.RAW.NDJSON_FORMAT");
        assert!(sql.contains("FROM @DB.RAW.S3_BCDA_STAGE/patients/"));
        assert!(sql.contains("$1:resourceType::VARCHAR"));
    }
}
