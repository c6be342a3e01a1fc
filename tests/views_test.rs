mod common;

use claims_etl::config::settings::{ViewExport, ViewsConfig};
use claims_etl::core::views::ViewExportPipeline;
use claims_etl::core::{ColumnMeta, QueryResult};
use claims_etl::{EtlEngine, LocalStorage, Result};
use common::{column, sql_failure, RecordingWarehouse};
use serde_json::{json, Value};
use std::io::Read;
use tempfile::TempDir;

fn view_responses(sql: &str) -> Result<QueryResult> {
    if sql.contains("CURRENT_TIMESTAMP") {
        return Ok(QueryResult {
            columns: vec![ColumnMeta {
                name: "CURRENT_TIMESTAMP()".to_string(),
                data_type: "timestamp_ltz".to_string(),
                scale: Some(9),
            }],
            rows: vec![vec![json!("2024-05-01T12:00:00+00:00")]],
        });
    }
    if sql.contains("V_AIP_CATEGORY_SUMMARY") {
        return Ok(QueryResult {
            columns: vec![column("PERFORMANCE_YEAR", "fixed"), column("SPENDING_CATEGORY", "text")],
            rows: vec![
                vec![json!(2023), json!("Care Coordination")],
                vec![json!(2024), json!("Staffing")],
                vec![json!(2024), json!("Health IT")],
            ],
        });
    }
    if sql.contains("V_ACO_DIRECTORY") {
        return Ok(QueryResult {
            columns: vec![column("ACO_ID", "text"), column("ACO_NAME", "text")],
            rows: vec![vec![json!("A1001"), json!("Valley Health ACO")]],
        });
    }
    Err(sql_failure("view does not exist"))
}

fn config(output_dir: &std::path::Path, archive: bool) -> ViewsConfig {
    ViewsConfig {
        output_dir: output_dir.display().to_string(),
        exports: vec![
            ViewExport {
                file: "category_summary.json".to_string(),
                view: "MARTS.V_AIP_CATEGORY_SUMMARY".to_string(),
                columns: vec!["PERFORMANCE_YEAR".to_string(), "SPENDING_CATEGORY".to_string()],
                order_by: Some("PERFORMANCE_YEAR DESC".to_string()),
                metadata_key: Some("category_records".to_string()),
            },
            ViewExport {
                file: "aco_spending.json".to_string(),
                view: "MARTS.V_AIP_ACO_SPENDING_PCT".to_string(),
                columns: Vec::new(),
                order_by: None,
                metadata_key: None,
            },
        ],
        archive,
        ..ViewsConfig::default()
    }
}

fn read_json(path: std::path::PathBuf) -> Value {
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}

#[tokio::test]
async fn test_views_written_with_metadata() {
    let dir = TempDir::new().unwrap();
    let warehouse = RecordingWarehouse::new(view_responses);
    let pipeline = ViewExportPipeline::new(warehouse.clone(), LocalStorage::new(dir.path()), config(dir.path(), false));
    let summary = EtlEngine::new(pipeline).run().await.unwrap();

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);

    let categories = read_json(dir.path().join("category_summary.json"));
    assert_eq!(categories.as_array().unwrap().len(), 3);
    assert_eq!(categories[0], json!({"PERFORMANCE_YEAR": 2023, "SPENDING_CATEGORY": "Care Coordination"}));
    assert!(!dir.path().join("aco_spending.json").exists());

    let metadata = read_json(dir.path().join("metadata.json"));
    assert_eq!(metadata["generated_at"], json!("2024-05-01T12:00:00+00:00"));
    assert_eq!(metadata["category_records"], json!(3));
    assert!(metadata.get("category_summary_records").is_none());
    assert!(metadata.get("aco_spending_records").is_none());
    assert_eq!(metadata["years"], json!([2024, 2023]));

    let query = &warehouse.executed_matching("V_AIP_CATEGORY_SUMMARY")[0];
    assert!(query.ends_with("ORDER BY PERFORMANCE_YEAR DESC"));
}

#[tokio::test]
async fn test_archive_bundles_written_files() {
    let dir = TempDir::new().unwrap();
    let pipeline = ViewExportPipeline::new(
        RecordingWarehouse::new(view_responses),
        LocalStorage::new(dir.path()),
        config(dir.path(), true),
    );
    let summary = EtlEngine::new(pipeline).run().await.unwrap();
    assert!(summary.outputs.contains(&"views.zip".to_string()));

    let file = std::fs::File::open(dir.path().join("views.zip")).unwrap();
    let mut archive = zip::ZipArchive::new(file).unwrap();
    let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
    names.sort();
    assert_eq!(names, vec!["category_summary.json", "metadata.json"]);

    let mut body = String::new();
    archive.by_name("metadata.json").unwrap().read_to_string(&mut body).unwrap();
    assert!(body.contains("category_records"));
}

#[tokio::test]
async fn test_years_taken_from_first_view_with_year_column() {
    let dir = TempDir::new().unwrap();
    let mut views = config(dir.path(), false);
    views.exports.insert(
        0,
        ViewExport {
            file: "aco_directory.json".to_string(),
            view: "MARTS.V_ACO_DIRECTORY".to_string(),
            columns: Vec::new(),
            order_by: None,
            metadata_key: None,
        },
    );

    let pipeline =
        ViewExportPipeline::new(RecordingWarehouse::new(view_responses), LocalStorage::new(dir.path()), views);
    let summary = EtlEngine::new(pipeline).run().await.unwrap();
    assert_eq!(summary.succeeded, 2);

    let metadata = read_json(dir.path().join("metadata.json"));
    assert_eq!(metadata["aco_directory_records"], json!(1));
    assert_eq!(metadata["years"], json!([2024, 2023]));
}
