#![allow(dead_code)]

use async_trait::async_trait;
use claims_etl::core::{ColumnMeta, QueryResult, Warehouse};
use claims_etl::utils::error::{EtlError, Result};
use serde_json::Value;
use std::sync::{Arc, Mutex};

pub type Responder = fn(&str) -> Result<QueryResult>;

/// Records every statement and answers with `respond`.
#[derive(Clone)]
pub struct RecordingWarehouse {
    statements: Arc<Mutex<Vec<String>>>,
    respond: Responder,
}

impl RecordingWarehouse {
    pub fn new(respond: Responder) -> Self {
        Self {
            statements: Arc::new(Mutex::new(Vec::new())),
            respond,
        }
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }

    pub fn executed_matching(&self, needle: &str) -> Vec<String> {
        self.statements()
            .into_iter()
            .filter(|s| s.contains(needle))
            .collect()
    }
}

#[async_trait]
impl Warehouse for RecordingWarehouse {
    async fn execute(&self, sql: &str) -> Result<QueryResult> {
        self.statements.lock().unwrap().push(sql.to_string());
        (self.respond)(sql)
    }
}

pub fn column(name: &str, data_type: &str) -> ColumnMeta {
    ColumnMeta {
        name: name.to_string(),
        data_type: data_type.to_string(),
        scale: Some(0),
    }
}

pub fn single_value(name: &str, value: Value) -> QueryResult {
    QueryResult {
        columns: vec![column(name, "fixed")],
        rows: vec![vec![value]],
    }
}

pub fn rows_loaded(n: u64) -> QueryResult {
    single_value("rows_loaded", Value::from(n))
}

pub fn sql_failure(message: &str) -> EtlError {
    EtlError::SqlError {
        message: message.to_string(),
        sql_state: Some("42S02".to_string()),
    }
}
