//! Loads local CSV extracts into warehouse tables through an external stage.
//!
//! Two flavours: [`CsvLoadPipeline`] builds each table's DDL from the file
//! header, [`TemplateLoadPipeline`] lets the warehouse infer it from staged
//! files.

use crate::config::settings::{LoaderConfig, TemplateTable, WarehouseConfig};
use crate::core::schema::{build_schema, table_name_for, TableSchema, TypePolicy};
use crate::core::{Pipeline, RunSummary, Storage, Warehouse};
use crate::utils::error::{EtlError, Result};
use std::path::{Path, PathBuf};

/// `CREATE OR REPLACE STAGE` pointing at `s3://<bucket>/<prefix>/`.
pub fn create_stage_sql(
    stage: &str,
    bucket: &str,
    prefix: &str,
    storage_integration: Option<&str>,
) -> String {
    let mut sql = format!(
        "CREATE OR REPLACE STAGE {}\n    URL = 's3://{}/{}/'",
        stage,
        bucket,
        prefix.trim_matches('/')
    );
    if let Some(integration) = storage_integration {
        sql.push_str(&format!("\n    STORAGE_INTEGRATION = {}", integration));
    }
    sql
}

pub fn csv_file_format_sql(name: &str) -> String {
    format!(
        "CREATE OR REPLACE FILE FORMAT {}\n    TYPE = 'CSV'\n    SKIP_HEADER = 1\n    \
         FIELD_OPTIONALLY_ENCLOSED_BY = '\"'\n    NULL_IF = ('NULL', 'null', '')\n    \
         EMPTY_FIELD_AS_NULL = TRUE\n    ERROR_ON_COLUMN_COUNT_MISMATCH = FALSE",
        name
    )
}

/// Header-parsing CSV format used by `INFER_SCHEMA`.
pub fn csv_parse_header_format_sql(name: &str) -> String {
    format!(
        "CREATE OR REPLACE FILE FORMAT {}\n    TYPE = 'CSV'\n    PARSE_HEADER = TRUE\n    \
         FIELD_OPTIONALLY_ENCLOSED_BY = '\"'\n    NULL_IF = ('NULL', 'null', '')\n    \
         ERROR_ON_COLUMN_COUNT_MISMATCH = FALSE",
        name
    )
}

pub fn ndjson_file_format_sql(name: &str) -> String {
    format!(
        "CREATE OR REPLACE FILE FORMAT {}\n    TYPE = 'JSON'\n    STRIP_OUTER_ARRAY = FALSE",
        name
    )
}

pub fn copy_into_sql(table: &TableSchema, qualified_table: &str, stage_path: &str, format: &str) -> String {
    format!(
        "COPY INTO {} ({})\nFROM @{}\nFILE_FORMAT = (FORMAT_NAME = '{}')\nON_ERROR = CONTINUE",
        qualified_table,
        table.column_list(),
        stage_path,
        format
    )
}

/// Creates the stage and file format a flow depends on. Any failure here
/// aborts the flow.
async fn prepare_stage<W: Warehouse + ?Sized>(
    warehouse: &W,
    stage: &str,
    bucket: Option<&str>,
    prefix: &str,
    storage_integration: Option<&str>,
    format_sql: &str,
) -> Result<()> {
    if let Some(bucket) = bucket {
        tracing::info!("Creating stage {} -> s3://{}/{}/", stage, bucket, prefix);
        warehouse
            .execute(&create_stage_sql(stage, bucket, prefix, storage_integration))
            .await?;
    } else {
        tracing::info!("Using existing stage {}", stage);
    }
    warehouse.execute(format_sql).await?;
    Ok(())
}

/// A CSV file found under `<data_dir>/<category>/`.
#[derive(Debug, Clone, PartialEq)]
pub struct CsvSource {
    pub path: PathBuf,
    pub category: String,
    pub file_name: String,
}

impl CsvSource {
    pub fn stage_key(&self, stage_prefix: &str) -> String {
        format!(
            "{}/{}/{}",
            stage_prefix.trim_matches('/'),
            self.category,
            self.file_name
        )
    }
}

/// Lists `*.csv` files one directory below `data_dir`, sorted by path.
pub fn discover_csv_files(data_dir: &Path) -> Result<Vec<CsvSource>> {
    if !data_dir.is_dir() {
        return Err(EtlError::InvalidConfigValueError {
            field: "loader.data_dir".to_string(),
            value: data_dir.display().to_string(),
            reason: "directory does not exist".to_string(),
        });
    }

    let mut found = Vec::new();
    for category in std::fs::read_dir(data_dir)? {
        let category = category?.path();
        if !category.is_dir() {
            continue;
        }
        let category_name = category
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();

        for entry in std::fs::read_dir(&category)? {
            let path = entry?.path();
            let is_csv = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
            if !path.is_file() || !is_csv {
                continue;
            }
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();
            found.push(CsvSource {
                path,
                category: category_name.clone(),
                file_name,
            });
        }
    }
    found.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(found)
}

/// Header row plus up to `sample_rows` records. Bytes that are not valid
/// UTF-8 (Windows-1252 extracts) are replaced rather than failing the file.
pub fn read_header_and_sample(path: &Path, sample_rows: usize) -> Result<(Vec<String>, Vec<Vec<String>>)> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)?;
    let headers = lossy_fields(reader.byte_headers()?);
    if headers.is_empty() || headers.iter().all(|h| h.trim().is_empty()) {
        return Err(EtlError::ValidationError {
            message: format!("{} has no header row", path.display()),
        });
    }

    let mut sample = Vec::new();
    for record in reader.byte_records().take(sample_rows) {
        sample.push(lossy_fields(&record?));
    }
    Ok((headers, sample))
}

fn lossy_fields(record: &csv::ByteRecord) -> Vec<String> {
    record
        .iter()
        .map(|field| String::from_utf8_lossy(field).into_owned())
        .collect()
}

pub struct PreparedTable {
    pub source: CsvSource,
    pub schema: Result<TableSchema>,
}

pub struct CsvLoadPipeline<W: Warehouse, S: Storage> {
    warehouse: W,
    storage: Option<S>,
    loader: LoaderConfig,
    target: WarehouseConfig,
    bucket: Option<String>,
}

impl<W: Warehouse, S: Storage> CsvLoadPipeline<W, S> {
    /// `storage` is only used when `upload_files` is set; `bucket` only
    /// when the stage is (re)created.
    pub fn new(
        warehouse: W,
        storage: Option<S>,
        loader: LoaderConfig,
        target: WarehouseConfig,
        bucket: Option<String>,
    ) -> Self {
        Self {
            warehouse,
            storage,
            loader,
            target,
            bucket,
        }
    }

    fn stage_bucket(&self) -> Result<Option<&str>> {
        if !self.loader.create_stage {
            return Ok(None);
        }
        self.bucket
            .as_deref()
            .map(Some)
            .ok_or_else(|| EtlError::MissingConfigError {
                field: "storage.bucket".to_string(),
            })
    }

    async fn load_one(&self, source: &CsvSource, schema: &TableSchema) -> Result<u64> {
        let key = source.stage_key(&self.loader.stage_prefix);

        if self.loader.upload_files {
            let storage = self
                .storage
                .as_ref()
                .ok_or_else(|| EtlError::config("upload_files is set but no storage is configured"))?;
            let content = tokio::fs::read(&source.path).await?;
            tracing::info!("Uploading {} to {}{}", source.path.display(), storage.location(), key);
            storage.write_file(&key, &content).await?;
        }

        let qualified = self.target.qualify(&schema.name);
        tracing::info!("Creating table {} ({} columns)", qualified, schema.columns.len());
        self.warehouse
            .execute(&schema.create_or_replace_sql(&qualified))
            .await?;

        let stage_path = format!(
            "{}/{}/{}",
            self.target.qualify(&self.loader.stage),
            source.category,
            source.file_name
        );
        let copy = copy_into_sql(
            schema,
            &qualified,
            &stage_path,
            &self.target.qualify(&self.loader.csv_format),
        );
        let result = self.warehouse.execute(&copy).await?;
        Ok(result.sum_column("rows_loaded"))
    }
}

#[async_trait::async_trait]
impl<W: Warehouse, S: Storage> Pipeline for CsvLoadPipeline<W, S> {
    type Extracted = Vec<CsvSource>;
    type Transformed = Vec<PreparedTable>;

    fn name(&self) -> &str {
        "CSV load"
    }

    async fn extract(&self) -> Result<Vec<CsvSource>> {
        let files = discover_csv_files(Path::new(&self.loader.data_dir))?;
        tracing::info!("Found {} CSV files under {}", files.len(), self.loader.data_dir);

        prepare_stage(
            &self.warehouse,
            &self.target.qualify(&self.loader.stage),
            self.stage_bucket()?,
            &self.loader.stage_prefix,
            self.loader.storage_integration.as_deref(),
            &csv_file_format_sql(&self.target.qualify(&self.loader.csv_format)),
        )
        .await?;
        Ok(files)
    }

    async fn transform(&self, files: Vec<CsvSource>) -> Result<Vec<PreparedTable>> {
        tracing::info!("Column type policy: {:?}", self.loader.type_policy);
        Ok(files
            .into_iter()
            .map(|source| {
                let sample_rows = match self.loader.type_policy {
                    TypePolicy::AllText => 0,
                    TypePolicy::Sampled => self.loader.sample_rows,
                };
                let schema = read_header_and_sample(&source.path, sample_rows).map(
                    |(headers, sample)| {
                        let table = table_name_for(&self.loader.table_prefix, &source.path);
                        build_schema(table, &headers, self.loader.type_policy, &sample)
                    },
                );
                PreparedTable { source, schema }
            })
            .collect())
    }

    async fn load(&self, tables: Vec<PreparedTable>) -> Result<RunSummary> {
        let mut summary = RunSummary::new("CSV load");
        let total = tables.len();

        for (idx, prepared) in tables.into_iter().enumerate() {
            let source = &prepared.source;
            tracing::info!("[{}/{}] {}/{}", idx + 1, total, source.category, source.file_name);

            let schema = match prepared.schema {
                Ok(schema) => schema,
                Err(e) => {
                    tracing::error!("Cannot read {}: {}", source.path.display(), e);
                    summary.record_failure();
                    continue;
                }
            };

            match self.load_one(source, &schema).await {
                Ok(0) => {
                    tracing::warn!("No rows loaded into {}", schema.name);
                    summary.record_failure();
                }
                Ok(rows) => {
                    tracing::info!("✓ Loaded {} rows into {}", rows, schema.name);
                    summary.rows += rows;
                    summary.record_success(schema.name);
                }
                Err(e) => {
                    tracing::error!("✗ Failed to load {}: {}", source.file_name, e);
                    summary.record_failure();
                }
            }
        }

        summary.log(&self.loader.stage);
        Ok(summary)
    }
}

/// `CREATE OR REPLACE TABLE ... USING TEMPLATE` over `INFER_SCHEMA`.
pub fn create_from_template_sql(qualified_table: &str, stage_location: &str, format: &str) -> String {
    format!(
        "CREATE OR REPLACE TABLE {}\nUSING TEMPLATE (\n    SELECT ARRAY_AGG(OBJECT_CONSTRUCT(*))\n    \
         FROM TABLE(INFER_SCHEMA(LOCATION => '@{}', FILE_FORMAT => '{}'))\n)",
        qualified_table, stage_location, format
    )
}

pub fn copy_by_header_sql(qualified_table: &str, stage_location: &str) -> String {
    format!(
        "COPY INTO {}\nFROM @{}\nFILE_FORMAT = (TYPE = 'CSV' PARSE_HEADER = TRUE \
         FIELD_OPTIONALLY_ENCLOSED_BY = '\"' REPLACE_INVALID_CHARACTERS = TRUE \
         ERROR_ON_COLUMN_COUNT_MISMATCH = FALSE)\nMATCH_BY_COLUMN_NAME = CASE_INSENSITIVE\n\
         FORCE = TRUE\nON_ERROR = CONTINUE",
        qualified_table, stage_location
    )
}

pub struct TemplateLoadPipeline<W: Warehouse> {
    warehouse: W,
    loader: LoaderConfig,
    target: WarehouseConfig,
    bucket: Option<String>,
}

impl<W: Warehouse> TemplateLoadPipeline<W> {
    pub fn new(warehouse: W, loader: LoaderConfig, target: WarehouseConfig, bucket: Option<String>) -> Self {
        Self {
            warehouse,
            loader,
            target,
            bucket,
        }
    }

    async fn load_one(&self, template: &TemplateTable) -> Result<u64> {
        let table = self.target.qualify(&template.table);
        let stage = self.target.qualify(&self.loader.stage);
        let data_location = format!("{}/{}", stage, template.stage_path.trim_matches('/'));
        let template_location = format!(
            "{}/{}",
            stage,
            template.template_path
                .as_deref()
                .unwrap_or(&template.stage_path)
                .trim_matches('/')
        );

        tracing::info!("Creating {} from template {}", table, template_location);
        self.warehouse
            .execute(&create_from_template_sql(
                &table,
                &template_location,
                &self.target.qualify(&self.loader.template_format),
            ))
            .await?;

        self.warehouse
            .execute(&copy_by_header_sql(&table, &data_location))
            .await?;

        let count = self
            .warehouse
            .execute(&format!("SELECT COUNT(*) FROM {}", table))
            .await?;
        Ok(count
            .first_value()
            .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
            .unwrap_or(0))
    }
}

#[async_trait::async_trait]
impl<W: Warehouse> Pipeline for TemplateLoadPipeline<W> {
    type Extracted = Vec<TemplateTable>;
    type Transformed = Vec<TemplateTable>;

    fn name(&self) -> &str {
        "template load"
    }

    async fn extract(&self) -> Result<Vec<TemplateTable>> {
        let bucket = if self.loader.create_stage {
            Some(self.bucket.as_deref().ok_or_else(|| EtlError::MissingConfigError {
                field: "storage.bucket".to_string(),
            })?)
        } else {
            None
        };
        prepare_stage(
            &self.warehouse,
            &self.target.qualify(&self.loader.stage),
            bucket,
            &self.loader.stage_prefix,
            self.loader.storage_integration.as_deref(),
            &csv_parse_header_format_sql(&self.target.qualify(&self.loader.template_format)),
        )
        .await?;
        Ok(self.loader.template_tables.clone())
    }

    async fn transform(&self, tables: Vec<TemplateTable>) -> Result<Vec<TemplateTable>> {
        if tables.is_empty() {
            tracing::warn!("No template tables configured");
        }
        Ok(tables)
    }

    async fn load(&self, tables: Vec<TemplateTable>) -> Result<RunSummary> {
        let mut summary = RunSummary::new("template load");
        for template in &tables {
            match self.load_one(template).await {
                Ok(0) => {
                    tracing::warn!("{} is empty after load", template.table);
                    summary.record_failure();
                }
                Ok(rows) => {
                    tracing::info!("✓ {}: {} rows", template.table, rows);
                    summary.rows += rows;
                    summary.record_success(template.table.clone());
                }
                Err(e) => {
                    tracing::error!("✗ {}: {}", template.table, e);
                    summary.record_failure();
                }
            }
        }
        summary.log(&self.loader.stage);
        Ok(summary)
    }
}
