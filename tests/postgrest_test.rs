use claims_etl::config::settings::PostgrestConfig;
use claims_etl::core::http::{HttpClient, RetryPolicy};
use claims_etl::core::postgrest::{PostgrestClient, PostgrestExportPipeline};
use claims_etl::{EtlEngine, LocalStorage, Storage};
use httpmock::prelude::*;
use serde_json::json;
use tempfile::TempDir;

fn client(server: &MockServer, tables: &[&str]) -> PostgrestClient {
    let config = PostgrestConfig {
        url: Some(server.base_url()),
        service_key: Some("service-key".to_string()),
        schema: "cms".to_string(),
        tables: tables.iter().map(|t| t.to_string()).collect(),
        page_size: 2,
        ..PostgrestConfig::default()
    };
    PostgrestClient::new(HttpClient::new(RetryPolicy::none()).unwrap(), config)
}

#[tokio::test]
async fn test_fetch_table_pages_until_short_page() {
    let server = MockServer::start_async().await;
    let first = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/rest/v1/ma_enrollment")
                .query_param("select", "*")
                .query_param("offset", "0")
                .query_param("limit", "2")
                .header("apikey", "service-key")
                .header("authorization", "Bearer service-key")
                .header("accept-profile", "cms");
            then.status(200)
                .json_body(json!([{"plan_id": "H1", "enrolled": 10}, {"plan_id": "H2", "enrolled": 20}]));
        })
        .await;
    let second = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/rest/v1/ma_enrollment")
                .query_param("offset", "2");
            then.status(200).json_body(json!([{"plan_id": "H3", "enrolled": null}]));
        })
        .await;

    let rows = client(&server, &["ma_enrollment"])
        .fetch_table("ma_enrollment")
        .await
        .unwrap();

    first.assert_hits_async(1).await;
    second.assert_hits_async(1).await;
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[2]["plan_id"], json!("H3"));
}

#[tokio::test]
async fn test_export_writes_csv_and_skips_failed_tables() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/rest/v1/mssp_aco_puf");
            then.status(200)
                .json_body(json!([{"aco_id": "A1", "tracks": ["BASIC", "E"]}]));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/rest/v1/broken");
            then.status(500);
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/rest/v1/empty");
            then.status(200).json_body(json!([]));
        })
        .await;

    let dir = TempDir::new().unwrap();
    let storage = LocalStorage::new(dir.path());
    let pipeline = PostgrestExportPipeline::new(
        client(&server, &["mssp_aco_puf", "broken", "empty"]),
        storage.clone(),
    );
    let summary = EtlEngine::new(pipeline).run().await.unwrap();

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.skipped, 1);

    let key = &summary.outputs[0];
    let layout = regex::Regex::new(r"^supabase-exports/mssp_aco_puf_\d{8}_\d{6}\.csv$").unwrap();
    assert!(layout.is_match(key), "unexpected key {}", key);

    let csv = String::from_utf8(storage.read_file(key).await.unwrap()).unwrap();
    assert_eq!(csv, "aco_id,tracks\nA1,\"[\"\"BASIC\"\",\"\"E\"\"]\"\n");
}
