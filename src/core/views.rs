//! Exports aggregate warehouse views to static JSON files for the web app.

use crate::config::settings::{ViewExport, ViewsConfig};
use crate::core::{Pipeline, RunSummary, Storage, Warehouse};
use crate::utils::error::Result;
use serde_json::{json, Map, Value};
use std::io::Write;
use zip::write::{FileOptions, ZipWriter};

pub const METADATA_FILE: &str = "metadata.json";

pub fn view_query(export: &ViewExport) -> String {
    let projection = if export.columns.is_empty() {
        "*".to_string()
    } else {
        export.columns.join(",\n    ")
    };
    let mut sql = format!("SELECT\n    {}\nFROM {}", projection, export.view);
    if let Some(order_by) = &export.order_by {
        sql.push_str(&format!("\nORDER BY {}", order_by));
    }
    sql
}

/// The export's `metadata_key`, else `category_summary.json` -> `category_summary_records`.
pub fn records_key(export: &ViewExport) -> String {
    if let Some(key) = &export.metadata_key {
        return key.clone();
    }
    let file = export.file.as_str();
    let stem = file.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(file);
    format!("{}_records", stem)
}

/// Distinct non-null values of `column`, newest first.
pub fn distinct_years(records: &[Map<String, Value>], column: &str) -> Vec<Value> {
    let mut years: Vec<Value> = Vec::new();
    for record in records {
        let Some(value) = record
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(column))
            .map(|(_, v)| v)
        else {
            continue;
        };
        if !value.is_null() && !years.contains(value) {
            years.push(value.clone());
        }
    }
    years.sort_by(|a, b| match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        _ => b.to_string().cmp(&a.to_string()),
    });
    years
}

fn has_column(records: &[Map<String, Value>], column: &str) -> bool {
    records
        .first()
        .is_some_and(|record| record.keys().any(|k| k.eq_ignore_ascii_case(column)))
}

pub struct ViewData {
    pub export: ViewExport,
    pub records: Result<Vec<Map<String, Value>>>,
}

pub struct ViewExportPipeline<W: Warehouse, S: Storage> {
    warehouse: W,
    storage: S,
    config: ViewsConfig,
}

impl<W: Warehouse, S: Storage> ViewExportPipeline<W, S> {
    pub fn new(warehouse: W, storage: S, config: ViewsConfig) -> Self {
        Self {
            warehouse,
            storage,
            config,
        }
    }

    async fn generated_at(&self) -> String {
        let fallback = || chrono::Utc::now().to_rfc3339();
        match self.warehouse.execute("SELECT CURRENT_TIMESTAMP()").await {
            Ok(result) => match result.first_value() {
                Some(Value::String(ts)) => ts.clone(),
                _ => fallback(),
            },
            Err(e) => {
                tracing::warn!("Could not read warehouse clock ({}); using local time", e);
                fallback()
            }
        }
    }

    fn archive(&self, files: &[(String, Vec<u8>)]) -> Result<Vec<u8>> {
        let mut zip = ZipWriter::new(std::io::Cursor::new(Vec::new()));
        for (name, body) in files {
            zip.start_file::<_, ()>(name.as_str(), FileOptions::default())?;
            zip.write_all(body)?;
        }
        Ok(zip.finish()?.into_inner())
    }
}

#[async_trait::async_trait]
impl<W: Warehouse, S: Storage> Pipeline for ViewExportPipeline<W, S> {
    type Extracted = Vec<ViewData>;
    type Transformed = Vec<ViewData>;

    fn name(&self) -> &str {
        "view export"
    }

    async fn extract(&self) -> Result<Vec<ViewData>> {
        let mut views = Vec::with_capacity(self.config.exports.len());
        for (idx, export) in self.config.exports.iter().enumerate() {
            tracing::info!(
                "{}. Exporting {} -> {}",
                idx + 1,
                export.view,
                export.file
            );
            let records = self
                .warehouse
                .execute(&view_query(export))
                .await
                .map(|result| result.to_records());
            views.push(ViewData {
                export: export.clone(),
                records,
            });
        }
        Ok(views)
    }

    async fn transform(&self, views: Vec<ViewData>) -> Result<Vec<ViewData>> {
        Ok(views)
    }

    async fn load(&self, views: Vec<ViewData>) -> Result<RunSummary> {
        let mut summary = RunSummary::new("view export");
        let mut metadata = Map::new();
        metadata.insert("generated_at".to_string(), json!(self.generated_at().await));
        let mut years: Option<Vec<Value>> = None;
        let mut written: Vec<(String, Vec<u8>)> = Vec::new();

        for view in views {
            let file = view.export.file.clone();
            let outcome = match view.records {
                Ok(records) => match serde_json::to_vec_pretty(&records) {
                    Ok(body) => self
                        .storage
                        .write_file(&file, &body)
                        .await
                        .map(|_| (records, body)),
                    Err(e) => Err(e.into()),
                },
                Err(e) => Err(e),
            };

            match outcome {
                Ok((records, body)) => {
                    tracing::info!("   ✓ Exported {} records to {}", records.len(), file);
                    metadata.insert(records_key(&view.export), json!(records.len()));
                    if let Some(column) = self.config.years_column.as_deref() {
                        if years.is_none() && has_column(&records, column) {
                            years = Some(distinct_years(&records, column));
                        }
                    }
                    summary.rows += records.len() as u64;
                    summary.record_success(file.clone());
                    written.push((file, body));
                }
                Err(e) => {
                    tracing::error!("   ✗ {} ({}) failed: {}", file, view.export.view, e);
                    summary.record_failure();
                }
            }
        }

        if let Some(years) = years {
            metadata.insert("years".to_string(), Value::Array(years));
        }
        let body = serde_json::to_vec_pretty(&Value::Object(metadata))?;
        self.storage.write_file(METADATA_FILE, &body).await?;
        written.push((METADATA_FILE.to_string(), body));

        if self.config.archive {
            let bundle = self.archive(&written)?;
            tracing::debug!("Writing archive ({} bytes)", bundle.len());
            self.storage.write_file(&self.config.archive_name, &bundle).await?;
            summary.outputs.push(self.config.archive_name.clone());
        }

        summary.log(&self.storage.location());
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_query() {
        let export = ViewExport {
            file: "x.json".to_string(),
            view: "MARTS.V".to_string(),
            columns: vec!["A".to_string(), "B".to_string()],
            order_by: Some("A DESC".to_string()),
            metadata_key: None,
        };
        assert_eq!(view_query(&export), "SELECT\n    A,\n    B\nFROM MARTS.V\nORDER BY A DESC");

        let bare = ViewExport {
            columns: Vec::new(),
            order_by: None,
            ..export
        };
        assert_eq!(view_query(&bare), "SELECT\n    *\nFROM MARTS.V");
    }

    #[test]
    fn test_records_key() {
        let export = |file: &str, metadata_key: Option<&str>| ViewExport {
            file: file.to_string(),
            view: "V".to_string(),
            columns: Vec::new(),
            order_by: None,
            metadata_key: metadata_key.map(str::to_string),
        };
        assert_eq!(records_key(&export("category_summary.json", None)), "category_summary_records");
        assert_eq!(records_key(&export("plain", None)), "plain_records");
        assert_eq!(
            records_key(&export("category_summary.json", Some("category_records"))),
            "category_records"
        );
    }

    #[test]
    fn test_distinct_years_descending() {
        let records: Vec<Map<String, Value>> = [2022, 2024, 2023, 2024]
            .iter()
            .map(|y| {
                let mut m = Map::new();
                m.insert("PERFORMANCE_YEAR".to_string(), json!(y));
                m
            })
            .collect();
        assert_eq!(
            distinct_years(&records, "performance_year"),
            vec![json!(2024), json!(2023), json!(2022)]
        );
    }
}
