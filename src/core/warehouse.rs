//! Snowflake access over the SQL REST API, plus a runner for statement batches.

use crate::config::settings::WarehouseConfig;
use crate::core::http::HttpClient;
use crate::core::{ColumnMeta, QueryResult, Warehouse};
use crate::utils::error::{EtlError, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use reqwest::header::ACCEPT;
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::{Duration, Instant};

const STATEMENTS_PATH: &str = "/api/v2/statements";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatementResponse {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    sql_state: Option<String>,
    #[serde(default)]
    statement_handle: Option<String>,
    #[serde(default)]
    statement_status_url: Option<String>,
    #[serde(default)]
    result_set_meta_data: Option<ResultSetMetaData>,
    #[serde(default)]
    data: Vec<Vec<Option<String>>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultSetMetaData {
    #[serde(default)]
    row_type: Vec<RowType>,
    #[serde(default)]
    partition_info: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RowType {
    name: String,
    #[serde(rename = "type")]
    data_type: String,
    #[serde(default)]
    scale: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct PartitionResponse {
    #[serde(default)]
    data: Vec<Vec<Option<String>>>,
}

pub struct SnowflakeClient {
    http: HttpClient,
    config: WarehouseConfig,
    base_url: String,
    token: String,
}

impl SnowflakeClient {
    pub fn new(http: HttpClient, config: WarehouseConfig) -> Result<Self> {
        let base_url = config.base_url()?;
        let token = config.token()?.to_string();
        Ok(Self {
            http,
            config,
            base_url,
            token,
        })
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .bearer_auth(&self.token)
            .header("X-Snowflake-Authorization-Token-Type", &self.config.token_type)
            .header(ACCEPT, "application/json")
    }

    fn absolute(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    async fn submit(&self, sql: &str) -> Result<Response> {
        let mut body = json!({
            "statement": sql,
            "timeout": self.config.statement_timeout_secs,
            "database": self.config.database,
            "schema": self.config.schema,
            "warehouse": self.config.warehouse,
        });
        if let Some(role) = &self.config.role {
            body["role"] = json!(role);
        }

        let request = self
            .authorized(self.http.client().post(self.absolute(STATEMENTS_PATH)))
            .query(&[("requestId", uuid::Uuid::new_v4().to_string())])
            .json(&body);
        self.http.send(request).await
    }

    /// Follows a 202 until the statement finishes or the statement timeout passes.
    async fn wait_for(&self, mut response: Response) -> Result<StatementResponse> {
        let started = Instant::now();
        let max_wait = Duration::from_secs(self.config.statement_timeout_secs);
        let interval = Duration::from_millis(self.config.poll_interval_ms);

        loop {
            let status = response.status();
            match status {
                StatusCode::OK => return Ok(response.json().await?),
                StatusCode::ACCEPTED => {
                    let pending: StatementResponse = response.json().await?;
                    let status_url = pending
                        .statement_status_url
                        .or_else(|| {
                            pending
                                .statement_handle
                                .map(|h| format!("{}/{}", STATEMENTS_PATH, h))
                        })
                        .ok_or_else(|| EtlError::sql("202 response without a statement handle"))?;

                    if started.elapsed() >= max_wait {
                        return Err(EtlError::TimeoutError {
                            operation: "Warehouse statement".to_string(),
                            waited: started.elapsed(),
                        });
                    }
                    tracing::debug!("Statement still running; polling {}", status_url);
                    tokio::time::sleep(interval).await;
                    let request = self.authorized(self.http.client().get(self.absolute(&status_url)));
                    response = self.http.send(request).await?;
                }
                _ => {
                    let text = response.text().await.unwrap_or_default();
                    let failure: Option<StatementResponse> = serde_json::from_str(&text).ok();
                    let (message, sql_state) = match failure {
                        Some(f) => (
                            format!(
                                "HTTP {} ({}): {}",
                                status.as_u16(),
                                f.code.unwrap_or_default(),
                                f.message.unwrap_or_default()
                            ),
                            f.sql_state,
                        ),
                        None => (format!("HTTP {}: {}", status.as_u16(), text.trim()), None),
                    };
                    return Err(EtlError::SqlError { message, sql_state });
                }
            }
        }
    }

    async fn fetch_partition(&self, handle: &str, partition: usize) -> Result<Vec<Vec<Option<String>>>> {
        let request = self
            .authorized(
                self.http
                    .client()
                    .get(self.absolute(&format!("{}/{}", STATEMENTS_PATH, handle))),
            )
            .query(&[("partition", partition.to_string())]);
        let response = self.http.send(request).await?.error_for_status()?;
        let body: PartitionResponse = response.json().await?;
        Ok(body.data)
    }
}

#[async_trait]
impl Warehouse for SnowflakeClient {
    async fn execute(&self, sql: &str) -> Result<QueryResult> {
        tracing::debug!("Executing: {}", preview(sql, 200));
        let response = self.submit(sql).await?;
        let result = self.wait_for(response).await?;

        let meta = result.result_set_meta_data.unwrap_or(ResultSetMetaData {
            row_type: Vec::new(),
            partition_info: Vec::new(),
        });
        let columns: Vec<ColumnMeta> = meta
            .row_type
            .into_iter()
            .map(|r| ColumnMeta {
                name: r.name,
                data_type: r.data_type.to_lowercase(),
                scale: r.scale,
            })
            .collect();

        let mut raw_rows = result.data;
        if meta.partition_info.len() > 1 {
            let handle = result
                .statement_handle
                .ok_or_else(|| EtlError::sql("Partitioned result without a statement handle"))?;
            for partition in 1..meta.partition_info.len() {
                raw_rows.extend(self.fetch_partition(&handle, partition).await?);
            }
        }

        let rows = raw_rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .zip(columns.iter())
                    .map(|(cell, column)| convert_cell(cell.as_deref(), column))
                    .collect()
            })
            .collect();
        Ok(QueryResult { columns, rows })
    }
}

/// Converts the SQL API's string cells into typed JSON values.
pub fn convert_cell(cell: Option<&str>, column: &ColumnMeta) -> Value {
    let Some(raw) = cell else {
        return Value::Null;
    };
    match column.data_type.as_str() {
        "fixed" if column.scale.unwrap_or(0) == 0 => raw
            .parse::<i64>()
            .map(Value::from)
            .or_else(|_| raw.parse::<f64>().map(Value::from))
            .unwrap_or_else(|_| Value::String(raw.to_string())),
        "fixed" | "real" => raw
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(raw.to_string())),
        "boolean" => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" => Value::Bool(true),
            "false" | "0" => Value::Bool(false),
            _ => Value::String(raw.to_string()),
        },
        "date" => raw
            .parse::<i64>()
            .ok()
            .and_then(|days| NaiveDate::from_ymd_opt(1970, 1, 1)?.checked_add_signed(chrono::Duration::days(days)))
            .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
            .unwrap_or_else(|| Value::String(raw.to_string())),
        t if t.starts_with("timestamp") => epoch_to_rfc3339(raw)
            .map(Value::String)
            .unwrap_or_else(|| Value::String(raw.to_string())),
        _ => Value::String(raw.to_string()),
    }
}

/// `"1700000000.123456789"` or `"1700000000.000000000 1440"` (tz suffix) → RFC 3339.
fn epoch_to_rfc3339(raw: &str) -> Option<String> {
    let epoch = raw.split_whitespace().next()?;
    let (secs, frac) = epoch.split_once('.').unwrap_or((epoch, "0"));
    let mut secs: i64 = secs.parse().ok()?;
    let mut nanos: u32 = format!("{:0<9}", &frac[..frac.len().min(9)]).parse().ok()?;
    // The fraction carries the sign of the whole value: -1.5 is -2 s + 0.5 s.
    if epoch.starts_with('-') && nanos > 0 {
        secs = secs.checked_sub(1)?;
        nanos = 1_000_000_000 - nanos;
    }
    DateTime::from_timestamp(secs, nanos).map(|dt| dt.to_rfc3339())
}

fn preview(sql: &str, limit: usize) -> String {
    let flat = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > limit {
        format!("{}...", flat.chars().take(limit).collect::<String>())
    } else {
        flat
    }
}

/// Splits a SQL script into statements on `;`, ignoring semicolons inside
/// quoted strings, quoted identifiers and comments.
pub fn split_statements(script: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut chars = script.chars().peekable();
    let mut in_single = false;
    let mut in_double = false;

    while let Some(c) = chars.next() {
        match c {
            '\'' if !in_double => {
                in_single = !in_single;
                current.push(c);
            }
            '"' if !in_single => {
                in_double = !in_double;
                current.push(c);
            }
            '-' if !in_single && !in_double && chars.peek() == Some(&'-') => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        current.push('\n');
                        break;
                    }
                }
            }
            '/' if !in_single && !in_double && chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for skipped in chars.by_ref() {
                    if prev == '*' && skipped == '/' {
                        break;
                    }
                    prev = skipped;
                }
                current.push(' ');
            }
            ';' if !in_single && !in_double => {
                let statement = current.trim();
                if !statement.is_empty() {
                    statements.push(statement.to_string());
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }

    let statement = current.trim();
    if !statement.is_empty() {
        statements.push(statement.to_string());
    }
    statements
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlRunSummary {
    pub executed: usize,
    pub failed: usize,
    pub results: Vec<QueryResult>,
}

/// Executes statements in order. A failing statement is logged and skipped.
pub struct SqlRunner<'a> {
    warehouse: &'a dyn Warehouse,
}

impl<'a> SqlRunner<'a> {
    pub fn new(warehouse: &'a dyn Warehouse) -> Self {
        Self { warehouse }
    }

    pub async fn run(&self, statements: &[String]) -> SqlRunSummary {
        let mut summary = SqlRunSummary::default();
        let total = statements.len();

        for (i, statement) in statements.iter().enumerate() {
            tracing::info!("Executing statement {}/{}: {}", i + 1, total, preview(statement, 200));
            match self.warehouse.execute(statement).await {
                Ok(result) => {
                    if is_query(statement) {
                        for record in result.to_records() {
                            let line = Value::Object(record).to_string();
                            tracing::info!("  {}", line);
                        }
                    } else {
                        tracing::info!("✓ Rows affected: {}", affected_rows(&result));
                    }
                    summary.executed += 1;
                    summary.results.push(result);
                }
                Err(e) => {
                    tracing::error!("✗ Statement {} failed: {}", i + 1, e);
                    summary.failed += 1;
                }
            }
        }
        summary
    }

    pub async fn run_script(&self, script: &str) -> SqlRunSummary {
        self.run(&split_statements(script)).await
    }
}

fn is_query(statement: &str) -> bool {
    let head = statement.trim_start().to_ascii_uppercase();
    ["SELECT", "WITH", "SHOW", "LIST", "DESCRIBE", "DESC "]
        .iter()
        .any(|kw| head.starts_with(kw))
}

fn affected_rows(result: &QueryResult) -> u64 {
    match result.first_value() {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        _ => 0,
    }
}
