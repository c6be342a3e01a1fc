use crate::core::schema::TypePolicy;
use crate::utils::error::{EtlError, Result};
use crate::utils::validation::{self, Validate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Settings for every flow, built once at startup and passed down explicitly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub bcda: BcdaConfig,
    pub storage: StorageConfig,
    pub retry: RetryConfig,
    pub warehouse: WarehouseConfig,
    pub postgrest: PostgrestConfig,
    pub loader: LoaderConfig,
    pub bcda_load: BcdaLoadConfig,
    pub views: ViewsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BcdaConfig {
    pub base_url: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub scope: String,
    pub export_path: String,
    pub resource_types: Vec<String>,
    /// FHIR `_since` filter, passed through verbatim.
    pub since: Option<String>,
    pub poll_interval_secs: u64,
    pub max_wait_secs: u64,
    pub request_timeout_secs: u64,
    pub download_timeout_secs: u64,
    /// Extra or overriding resource type → key prefix entries.
    pub key_prefixes: HashMap<String, String>,
}

impl Default for BcdaConfig {
    fn default() -> Self {
        Self {
            base_url: "https://sandbox.bcda.cms.gov".to_string(),
            client_id: None,
            client_secret: None,
            scope: "system/*.*".to_string(),
            export_path: "/api/v2/Patient/$export".to_string(),
            resource_types: vec![
                "Patient".to_string(),
                "ExplanationOfBenefit".to_string(),
                "Coverage".to_string(),
            ],
            since: None,
            poll_interval_secs: 10,
            max_wait_secs: 600,
            request_timeout_secs: 30,
            download_timeout_secs: 300,
            key_prefixes: HashMap::new(),
        }
    }
}

impl BcdaConfig {
    pub fn credentials(&self) -> Result<(&str, &str)> {
        let id = validation::validate_required_field("bcda.client_id", &self.client_id)?;
        let secret = validation::validate_required_field("bcda.client_secret", &self.client_secret)?;
        Ok((id.as_str(), secret.as_str()))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }

    /// Storage prefix for a resource type, e.g. `Patient` → `bcda/patients`.
    pub fn key_prefix(&self, resource_type: &str) -> String {
        if let Some(prefix) = self.key_prefixes.get(resource_type) {
            return prefix.trim_end_matches('/').to_string();
        }
        match resource_type {
            "Patient" => "bcda/patients".to_string(),
            "ExplanationOfBenefit" => "bcda/eob".to_string(),
            "Coverage" => "bcda/coverage".to_string(),
            other => format!("bcda/{}", other.to_lowercase()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub bucket: Option<String>,
    pub region: Option<String>,
    /// Custom endpoint, e.g. LocalStack.
    pub endpoint: Option<String>,
}

impl StorageConfig {
    pub fn bucket(&self) -> Result<&str> {
        validation::validate_required_field("storage.bucket", &self.bucket).map(String::as_str)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub backoff_factor_secs: f64,
    pub max_backoff_secs: u64,
    pub status_forcelist: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_factor_secs: 2.0,
            max_backoff_secs: 120,
            status_forcelist: vec![429, 500, 502, 503, 504],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    pub account: Option<String>,
    /// Overrides the URL derived from `account`.
    pub url: Option<String>,
    pub token: Option<String>,
    pub token_type: String,
    pub database: String,
    pub schema: String,
    pub warehouse: String,
    pub role: Option<String>,
    pub statement_timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            account: None,
            url: None,
            token: None,
            token_type: "PROGRAMMATIC_ACCESS_TOKEN".to_string(),
            database: "DEV_DB".to_string(),
            schema: "RAW".to_string(),
            warehouse: "DEV_WH".to_string(),
            role: None,
            statement_timeout_secs: 600,
            poll_interval_ms: 1000,
        }
    }
}

impl WarehouseConfig {
    pub fn base_url(&self) -> Result<String> {
        if let Some(url) = &self.url {
            return Ok(url.trim_end_matches('/').to_string());
        }
        let account = validation::validate_required_field("warehouse.account", &self.account)?;
        Ok(format!(
            "https://{}.snowflakecomputing.com",
            account.to_lowercase()
        ))
    }

    pub fn token(&self) -> Result<&str> {
        validation::validate_required_field("warehouse.token", &self.token).map(String::as_str)
    }

    /// Qualifies a bare object name with the configured database and schema.
    pub fn qualify(&self, name: &str) -> String {
        if name.contains('.') {
            name.to_string()
        } else {
            format!("{}.{}.{}", self.database, self.schema, name)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostgrestConfig {
    pub url: Option<String>,
    pub service_key: Option<String>,
    pub schema: String,
    pub tables: Vec<String>,
    pub prefix: String,
    pub page_size: usize,
}

impl Default for PostgrestConfig {
    fn default() -> Self {
        Self {
            url: None,
            service_key: None,
            schema: "public".to_string(),
            tables: vec!["ma_enrollment".to_string(), "mssp_aco_puf".to_string()],
            prefix: "supabase-exports".to_string(),
            page_size: 1000,
        }
    }
}

impl PostgrestConfig {
    pub fn endpoint(&self) -> Result<(&str, &str)> {
        let url = validation::validate_required_field("postgrest.url", &self.url)?;
        let key = validation::validate_required_field("postgrest.service_key", &self.service_key)?;
        Ok((url.as_str(), key.as_str()))
    }
}

/// A staged dataset whose table is created by the warehouse's own schema inference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TemplateTable {
    pub table: String,
    pub stage_path: String,
    /// Subpath used for schema inference when the full path mixes file layouts.
    #[serde(default)]
    pub template_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub data_dir: String,
    pub table_prefix: String,
    pub stage: String,
    pub stage_prefix: String,
    pub storage_integration: Option<String>,
    pub create_stage: bool,
    pub csv_format: String,
    pub type_policy: TypePolicy,
    pub sample_rows: usize,
    pub upload_files: bool,
    pub template_format: String,
    pub template_tables: Vec<TemplateTable>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data/cms".to_string(),
            table_prefix: "CMS".to_string(),
            stage: "S3_CMS_STAGE".to_string(),
            stage_prefix: "cms-data".to_string(),
            storage_integration: Some("EXTERNAL_STAGE".to_string()),
            create_stage: true,
            csv_format: "CSV_FORMAT".to_string(),
            type_policy: TypePolicy::AllText,
            sample_rows: 1000,
            upload_files: false,
            template_format: "CSV_PARSE_HEADER".to_string(),
            template_tables: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BcdaLoadConfig {
    pub stage: String,
    pub stage_prefix: String,
    pub storage_integration: Option<String>,
    pub create_stage: bool,
    pub json_format: String,
    pub table_prefix: String,
}

impl Default for BcdaLoadConfig {
    fn default() -> Self {
        Self {
            stage: "S3_BCDA_STAGE".to_string(),
            stage_prefix: "bcda".to_string(),
            storage_integration: Some("EXTERNAL_STAGE".to_string()),
            create_stage: true,
            json_format: "NDJSON_FORMAT".to_string(),
            table_prefix: "RAW_BCDA".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ViewExport {
    pub file: String,
    pub view: String,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub order_by: Option<String>,
    /// Count key in `metadata.json`; defaults to `<file stem>_records`.
    #[serde(default)]
    pub metadata_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewsConfig {
    pub output_dir: String,
    pub exports: Vec<ViewExport>,
    pub years_column: Option<String>,
    pub archive: bool,
    pub archive_name: String,
}

impl Default for ViewsConfig {
    fn default() -> Self {
        let export = |file: &str, view: &str, order_by: &str, metadata_key: Option<&str>| ViewExport {
            file: file.to_string(),
            view: view.to_string(),
            columns: Vec::new(),
            order_by: Some(order_by.to_string()),
            metadata_key: metadata_key.map(str::to_string),
        };
        Self {
            output_dir: "./data/aip".to_string(),
            exports: vec![
                export(
                    "category_summary.json",
                    "MARTS.V_AIP_CATEGORY_SUMMARY",
                    "PERFORMANCE_YEAR DESC, TOTAL_ACTUAL_SPENDING DESC",
                    Some("category_records"),
                ),
                export(
                    "subcategory_detail.json",
                    "MARTS.V_AIP_SUBCATEGORY_DETAIL",
                    "PERFORMANCE_YEAR DESC, TOTAL_ACTUAL_SPENDING DESC",
                    Some("subcategory_records"),
                ),
                export(
                    "aco_spending.json",
                    "MARTS.V_AIP_ACO_SPENDING_PCT",
                    "PERFORMANCE_YEAR DESC, ACO_ID, TOTAL_ACTUAL_SPENDING DESC",
                    None,
                ),
            ],
            years_column: Some("PERFORMANCE_YEAR".to_string()),
            archive: false,
            archive_name: "views.zip".to_string(),
        }
    }
}

impl AppConfig {
    /// Loads the optional credential file and TOML file, then applies
    /// environment overrides.
    pub fn load(config_path: Option<&Path>, env_file: Option<&Path>) -> Result<Self> {
        if let Some(env_file) = env_file {
            dotenvy::from_path(env_file).map_err(|e| {
                EtlError::config(format!("Failed to read env file {}: {}", env_file.display(), e))
            })?;
            tracing::debug!("Loaded credentials from {}", env_file.display());
        }

        let mut config = match config_path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_with(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed = substitute_env_vars(content, |key| std::env::var(key).ok());
        toml::from_str(&processed).map_err(|e| EtlError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// Environment variables win over file values.
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let set = |target: &mut Option<String>, key: &str| {
            if let Some(value) = lookup(key).filter(|v| !v.is_empty()) {
                *target = Some(value);
            }
        };
        let set_plain = |target: &mut String, key: &str| {
            if let Some(value) = lookup(key).filter(|v| !v.is_empty()) {
                *target = value;
            }
        };

        set_plain(&mut self.bcda.base_url, "BCDA_BASE_URL");
        set(&mut self.bcda.client_id, "BCDA_CLIENT_ID");
        set(&mut self.bcda.client_secret, "BCDA_CLIENT_SECRET");
        set(&mut self.bcda.since, "BCDA_SINCE");

        set(&mut self.storage.bucket, "AWS_S3_BUCKET");
        set(&mut self.storage.region, "AWS_REGION");
        set(&mut self.storage.endpoint, "S3_ENDPOINT_URL");

        set(&mut self.warehouse.account, "SNOWFLAKE_ACCOUNT");
        set(&mut self.warehouse.url, "SNOWFLAKE_URL");
        set(&mut self.warehouse.token, "SNOWFLAKE_TOKEN");
        set_plain(&mut self.warehouse.token_type, "SNOWFLAKE_TOKEN_TYPE");
        set_plain(&mut self.warehouse.warehouse, "SNOWFLAKE_WAREHOUSE");
        set_plain(&mut self.warehouse.database, "SNOWFLAKE_DATABASE");
        set_plain(&mut self.warehouse.schema, "SNOWFLAKE_SCHEMA");
        set(&mut self.warehouse.role, "SNOWFLAKE_ROLE");

        set(&mut self.postgrest.url, "SUPABASE_URL");
        set(&mut self.postgrest.service_key, "SUPABASE_SERVICE_KEY");
    }
}

/// Replaces `${VAR}` with the variable's value; unknown variables are left as-is.
pub fn substitute_env_vars<F>(content: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static regex");
    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        lookup(var_name).unwrap_or_else(|| format!("${{{}}}", var_name))
    })
    .into_owned()
}

impl Validate for AppConfig {
    fn validate(&self) -> Result<()> {
        validation::validate_url("bcda.base_url", &self.bcda.base_url)?;
        validation::validate_non_empty_string("bcda.export_path", &self.bcda.export_path)?;
        if self.bcda.resource_types.is_empty() {
            return Err(EtlError::ConfigValidationError {
                field: "bcda.resource_types".to_string(),
                message: "At least one resource type is required".to_string(),
            });
        }
        validation::validate_positive_number("bcda.poll_interval_secs", self.bcda.poll_interval_secs, 1)?;
        validation::validate_positive_number("bcda.max_wait_secs", self.bcda.max_wait_secs, 1)?;

        validation::validate_range("retry.max_retries", self.retry.max_retries, 0, 20)?;
        if !(self.retry.backoff_factor_secs >= 0.0) {
            return Err(EtlError::InvalidConfigValueError {
                field: "retry.backoff_factor_secs".to_string(),
                value: self.retry.backoff_factor_secs.to_string(),
                reason: "Backoff factor must be a non-negative number".to_string(),
            });
        }

        if let Some(bucket) = &self.storage.bucket {
            validation::validate_s3_bucket_name("storage.bucket", bucket)?;
        }
        if let Some(endpoint) = &self.storage.endpoint {
            validation::validate_url("storage.endpoint", endpoint)?;
        }

        if let Some(url) = &self.warehouse.url {
            validation::validate_url("warehouse.url", url)?;
        }
        validation::validate_sql_identifier("warehouse.database", &self.warehouse.database)?;
        validation::validate_sql_identifier("warehouse.schema", &self.warehouse.schema)?;
        validation::validate_sql_identifier("warehouse.warehouse", &self.warehouse.warehouse)?;

        if let Some(url) = &self.postgrest.url {
            validation::validate_url("postgrest.url", url)?;
        }
        validation::validate_positive_number("postgrest.page_size", self.postgrest.page_size as u64, 1)?;

        validation::validate_path("loader.data_dir", &self.loader.data_dir)?;
        validation::validate_sql_identifier("loader.stage", &self.loader.stage)?;
        validation::validate_sql_identifier("loader.csv_format", &self.loader.csv_format)?;
        validation::validate_sql_identifier("loader.table_prefix", &self.loader.table_prefix)?;
        validation::validate_positive_number("loader.sample_rows", self.loader.sample_rows as u64, 1)?;
        for template in &self.loader.template_tables {
            validation::validate_sql_identifier("loader.template_tables.table", &template.table)?;
        }

        validation::validate_sql_identifier("bcda_load.stage", &self.bcda_load.stage)?;
        validation::validate_sql_identifier("bcda_load.json_format", &self.bcda_load.json_format)?;

        validation::validate_path("views.output_dir", &self.views.output_dir)?;
        for export in &self.views.exports {
            validation::validate_non_empty_string("views.exports.file", &export.file)?;
            validation::validate_sql_identifier("views.exports.view", &export.view)?;
        }

        tracing::debug!("✅ Configuration validation passed");
        Ok(())
    }
}
