mod common;

use claims_etl::config::settings::WarehouseConfig;
use claims_etl::core::http::{HttpClient, RetryPolicy};
use claims_etl::core::warehouse::{SnowflakeClient, SqlRunner};
use claims_etl::core::QueryResult;
use claims_etl::{EtlError, Warehouse};
use common::{single_value, sql_failure, RecordingWarehouse};
use httpmock::prelude::*;
use serde_json::json;

fn snowflake(server: &MockServer) -> SnowflakeClient {
    let config = WarehouseConfig {
        url: Some(server.base_url()),
        token: Some("pat-secret".to_string()),
        role: Some("LOADER".to_string()),
        poll_interval_ms: 10,
        ..WarehouseConfig::default()
    };
    SnowflakeClient::new(HttpClient::new(RetryPolicy::none()).unwrap(), config).unwrap()
}

#[tokio::test]
async fn test_statement_result_is_typed() {
    let server = MockServer::start_async().await;
    let statements = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/v2/statements")
                .query_param_exists("requestId")
                .header("authorization", "Bearer pat-secret")
                .header("x-snowflake-authorization-token-type", "PROGRAMMATIC_ACCESS_TOKEN")
                .json_body_partial(r#"{"database": "DEV_DB", "schema": "RAW", "warehouse": "DEV_WH", "role": "LOADER"}"#);
            then.status(200).json_body(json!({
                "statementHandle": "h-1",
                "resultSetMetaData": {
                    "numRows": 2,
                    "rowType": [
                        {"name": "PERFORMANCE_YEAR", "type": "fixed", "scale": 0},
                        {"name": "TOTAL_ACTUAL_SPENDING", "type": "fixed", "scale": 2},
                        {"name": "FINANCIAL_OUTCOME", "type": "text"}
                    ],
                    "partitionInfo": [{"rowCount": 2}]
                },
                "data": [
                    ["2024", "1050.25", "Earned"],
                    ["2023", null, null]
                ]
            }));
        })
        .await;

    let result = snowflake(&server)
        .execute("SELECT * FROM MARTS.V_AIP_CATEGORY_SUMMARY")
        .await
        .unwrap();

    statements.assert_hits_async(1).await;
    let records = result.to_records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["PERFORMANCE_YEAR"], json!(2024));
    assert_eq!(records[0]["TOTAL_ACTUAL_SPENDING"], json!(1050.25));
    assert_eq!(records[0]["FINANCIAL_OUTCOME"], json!("Earned"));
    assert_eq!(records[1]["TOTAL_ACTUAL_SPENDING"], json!(null));
}

#[tokio::test]
async fn test_async_statement_is_polled_to_completion() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/v2/statements");
            then.status(202).json_body(json!({
                "code": "333334",
                "message": "Asynchronous execution in progress.",
                "statementHandle": "h-2",
                "statementStatusUrl": "/api/v2/statements/h-2"
            }));
        })
        .await;
    let status = server
        .mock_async(|when, then| {
            when.method(GET).path("/api/v2/statements/h-2");
            then.status(200).json_body(json!({
                "statementHandle": "h-2",
                "resultSetMetaData": {"rowType": [{"name": "rows_loaded", "type": "fixed", "scale": 0}]},
                "data": [["120"], ["30"]]
            }));
        })
        .await;

    let result = snowflake(&server).execute("COPY INTO T FROM @S").await.unwrap();
    status.assert_hits_async(1).await;
    assert_eq!(result.sum_column("rows_loaded"), 150);
}

#[tokio::test]
async fn test_extra_partitions_are_fetched() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/v2/statements");
            then.status(200).json_body(json!({
                "statementHandle": "h-3",
                "resultSetMetaData": {
                    "rowType": [{"name": "ID", "type": "text"}],
                    "partitionInfo": [{"rowCount": 1}, {"rowCount": 1}]
                },
                "data": [["a"]]
            }));
        })
        .await;
    let partition = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/v2/statements/h-3")
                .query_param("partition", "1");
            then.status(200).json_body(json!({"data": [["b"]]}));
        })
        .await;

    let result = snowflake(&server).execute("SELECT ID FROM T").await.unwrap();
    partition.assert_hits_async(1).await;
    assert_eq!(result.rows, vec![vec![json!("a")], vec![json!("b")]]);
}

#[tokio::test]
async fn test_compilation_error_maps_to_sql_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/v2/statements");
            then.status(422).json_body(json!({
                "code": "002003",
                "sqlState": "42S02",
                "message": "Object 'NOPE' does not exist or not authorized."
            }));
        })
        .await;

    let err = snowflake(&server).execute("SELECT * FROM NOPE").await.unwrap_err();
    match err {
        EtlError::SqlError { message, sql_state } => {
            assert!(message.contains("does not exist"));
            assert_eq!(sql_state.as_deref(), Some("42S02"));
        }
        other => panic!("expected SqlError, got {:?}", other),
    }
}

#[test]
fn test_client_requires_account_or_url() {
    let http = HttpClient::new(RetryPolicy::none()).unwrap();
    let config = WarehouseConfig {
        token: Some("t".to_string()),
        ..WarehouseConfig::default()
    };
    assert!(SnowflakeClient::new(http, config).is_err());
}

fn runner_responses(sql: &str) -> claims_etl::Result<QueryResult> {
    if sql.contains("MISSING") {
        Err(sql_failure("Object 'MISSING' does not exist"))
    } else {
        Ok(single_value("number of rows inserted", json!(3)))
    }
}

#[tokio::test]
async fn test_runner_skips_failed_statements() {
    let warehouse = RecordingWarehouse::new(runner_responses);
    let runner = SqlRunner::new(&warehouse);

    let summary = runner
        .run_script("INSERT INTO A SELECT 1;\nINSERT INTO MISSING SELECT 1;\nSELECT COUNT(*) FROM A;")
        .await;

    assert_eq!(summary.executed, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(warehouse.statements().len(), 3);
    assert_eq!(warehouse.statements()[2], "SELECT COUNT(*) FROM A");
}
