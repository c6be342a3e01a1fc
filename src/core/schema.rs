//! Column naming and type inference for tables created from tabular files.

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

pub const MAX_IDENTIFIER_LEN: usize = 255;

/// How column types are chosen when a table is created from a file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypePolicy {
    /// Every column is wide text; the warehouse casts later.
    #[default]
    AllText,
    /// Types sniffed from a sample of rows.
    Sampled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Float,
    Boolean,
    Timestamp,
    Text,
}

impl ColumnType {
    pub fn sql(&self) -> &'static str {
        match self {
            ColumnType::Integer => "NUMBER(38,0)",
            ColumnType::Float => "FLOAT",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Timestamp => "TIMESTAMP_NTZ",
            ColumnType::Text => "VARCHAR(16777216)",
        }
    }

    /// Narrowest type that holds both.
    fn widen(self, other: ColumnType) -> ColumnType {
        use ColumnType::*;
        match (self, other) {
            (a, b) if a == b => a,
            (Integer, Float) | (Float, Integer) => Float,
            _ => Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub source_name: String,
    pub column_type: ColumnType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    pub fn create_or_replace_sql(&self, qualified_name: &str) -> String {
        let cols = self
            .columns
            .iter()
            .map(|c| format!("    {} {}", c.name, c.column_type.sql()))
            .collect::<Vec<_>>()
            .join(",\n");
        format!("CREATE OR REPLACE TABLE {} (\n{}\n)", qualified_name, cols)
    }

    pub fn column_list(&self) -> String {
        self.columns
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn underscore_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"_{2,}").expect("static regex"))
}

/// Maps an arbitrary header to an uppercase `[A-Z0-9_]` identifier that
/// starts with a letter. Applying it twice gives the same result.
pub fn sanitize_identifier(raw: &str) -> String {
    let trimmed = raw.trim().trim_start_matches('\u{feff}').trim();

    let mut mapped = String::with_capacity(trimmed.len());
    for c in trimmed.chars() {
        match c {
            '%' => mapped.push_str("_PCT_"),
            '#' => mapped.push_str("_NUM_"),
            '&' => mapped.push_str("_AND_"),
            '+' => mapped.push_str("_PLUS_"),
            '*' => mapped.push_str("_STAR_"),
            '=' => mapped.push_str("_EQ_"),
            c if c.is_ascii_alphanumeric() || c == '_' => mapped.push(c),
            _ => mapped.push('_'),
        }
    }

    let collapsed = underscore_runs().replace_all(&mapped, "_");
    let mut name = collapsed.trim_matches('_').to_ascii_uppercase();

    if name.is_empty() {
        return "COL".to_string();
    }
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        name = format!("COL_{}", name);
    }
    if name.len() > MAX_IDENTIFIER_LEN {
        name.truncate(MAX_IDENTIFIER_LEN);
        name = name.trim_end_matches('_').to_string();
    }
    name
}

/// Sanitizes a header row. Names that collide after sanitization get a
/// numeric suffix and a warning, so no two source columns share a target.
pub fn sanitize_columns(headers: &[String]) -> Vec<String> {
    let mut origin: HashMap<String, &str> = HashMap::new();
    let mut result = Vec::with_capacity(headers.len());

    for header in headers {
        let base = sanitize_identifier(header);
        let mut candidate = base.clone();
        let mut n = 1;
        while origin.contains_key(&candidate) {
            n += 1;
            candidate = format!("{}_{}", base, n);
        }

        if candidate != base {
            tracing::warn!(
                "Column '{}' collides with '{}' after sanitization; renamed to {}",
                header,
                origin.get(&base).copied().unwrap_or_default(),
                candidate
            );
        }
        origin.insert(candidate.clone(), header.as_str());
        result.push(candidate);
    }
    result
}

/// `<PREFIX>_<CATEGORY>_<STEM>` where the category is the parent directory.
pub fn table_name_for(prefix: &str, path: &Path) -> String {
    let category = path
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .unwrap_or("other");
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();

    let raw = if prefix.is_empty() {
        format!("{}_{}", category, stem)
    } else {
        format!("{}_{}_{}", prefix, category, stem)
    };
    sanitize_identifier(&raw)
}

fn classify_value(value: &str) -> ColumnType {
    let v = value.trim();
    if v.parse::<i64>().is_ok() {
        return ColumnType::Integer;
    }
    if v.parse::<f64>().map(|f| f.is_finite()).unwrap_or(false) {
        return ColumnType::Float;
    }
    if matches!(v.to_ascii_lowercase().as_str(), "true" | "false") {
        return ColumnType::Boolean;
    }
    if is_timestamp(v) {
        return ColumnType::Timestamp;
    }
    ColumnType::Text
}

fn is_timestamp(v: &str) -> bool {
    const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"];
    chrono::DateTime::parse_from_rfc3339(v).is_ok()
        || NaiveDate::parse_from_str(v, "%Y-%m-%d").is_ok()
        || DATETIME_FORMATS
            .iter()
            .any(|f| NaiveDateTime::parse_from_str(v, f).is_ok())
}

/// Chooses a type per column from sampled rows. Empty cells carry no
/// signal; a column with no non-empty sample stays text.
pub fn infer_column_types(policy: TypePolicy, column_count: usize, sample: &[Vec<String>]) -> Vec<ColumnType> {
    if policy == TypePolicy::AllText {
        return vec![ColumnType::Text; column_count];
    }

    let mut inferred: Vec<Option<ColumnType>> = vec![None; column_count];
    for row in sample {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            if cell.trim().is_empty() {
                continue;
            }
            let observed = classify_value(cell);
            inferred[idx] = Some(match inferred[idx] {
                Some(current) => current.widen(observed),
                None => observed,
            });
        }
    }
    inferred
        .into_iter()
        .map(|t| t.unwrap_or(ColumnType::Text))
        .collect()
}

pub fn build_schema(
    table: String,
    headers: &[String],
    policy: TypePolicy,
    sample: &[Vec<String>],
) -> TableSchema {
    let names = sanitize_columns(headers);
    let types = infer_column_types(policy, headers.len(), sample);
    TableSchema {
        name: table,
        columns: names
            .into_iter()
            .zip(headers.iter())
            .zip(types)
            .map(|((name, source), column_type)| ColumnDef {
                name,
                source_name: source.clone(),
                column_type,
            })
            .collect(),
    }
}
