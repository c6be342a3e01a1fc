use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Lifecycle of one bulk export job; lives only for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportJobState {
    Submitted,
    InProgress,
    Complete,
    Failed,
    TimedOut,
}

/// One entry of a completed job's `output` or `error` list. Both fields are
/// optional so a malformed entry can be skipped instead of failing the parse.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OutputFile {
    #[serde(rename = "type", default)]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
}

/// Body of the HTTP 200 returned by the status endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExportManifest {
    #[serde(default)]
    pub transaction_time: Option<String>,
    #[serde(default)]
    pub request: Option<String>,
    #[serde(default = "default_requires_token")]
    pub requires_access_token: bool,
    #[serde(default)]
    pub output: Vec<OutputFile>,
    #[serde(default)]
    pub error: Vec<OutputFile>,
}

fn default_requires_token() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// Column of a warehouse result set.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMeta {
    pub name: String,
    pub data_type: String,
    pub scale: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Rows as objects keyed by column name, in projection order.
    pub fn to_records(&self) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .zip(row.iter())
                    .map(|(col, value)| (col.name.clone(), value.clone()))
                    .collect()
            })
            .collect()
    }

    pub fn first_value(&self) -> Option<&Value> {
        self.rows.first().and_then(|row| row.first())
    }

    /// Sum of an integer column; used for `rows_loaded` in COPY results.
    pub fn sum_column(&self, name: &str) -> u64 {
        let Some(idx) = self.column_index(name) else {
            return 0;
        };
        self.rows
            .iter()
            .filter_map(|row| row.get(idx))
            .filter_map(|v| match v {
                Value::Number(n) => n.as_u64(),
                Value::String(s) => s.parse().ok(),
                _ => None,
            })
            .sum()
    }
}

/// Outcome of one flow, logged at the end of every run.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct RunSummary {
    pub flow: String,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub outputs: Vec<String>,
    pub rows: u64,
}

impl RunSummary {
    pub fn new(flow: impl Into<String>) -> Self {
        Self {
            flow: flow.into(),
            ..Default::default()
        }
    }

    pub fn record_success(&mut self, output: impl Into<String>) {
        self.processed += 1;
        self.succeeded += 1;
        self.outputs.push(output.into());
    }

    pub fn record_failure(&mut self) {
        self.processed += 1;
        self.failed += 1;
    }

    pub fn record_skip(&mut self) {
        self.processed += 1;
        self.skipped += 1;
    }

    pub fn log(&self, location: &str) {
        tracing::info!("{}", "=".repeat(60));
        tracing::info!("{} summary", self.flow);
        tracing::info!("{}", "=".repeat(60));
        tracing::info!(
            "Processed: {} | Succeeded: {} | Failed: {} | Skipped: {}",
            self.processed,
            self.succeeded,
            self.failed,
            self.skipped
        );
        if self.rows > 0 {
            tracing::info!("Rows: {}", self.rows);
        }
        for output in &self.outputs {
            tracing::info!("  - {}{}", location, output);
        }
        tracing::info!("{}", "=".repeat(60));
    }
}
