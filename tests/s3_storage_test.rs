use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use claims_etl::{EtlError, S3Storage, Storage};
use httpmock::prelude::*;

fn storage(server: &MockServer) -> S3Storage {
    let config = aws_sdk_s3::config::Builder::new()
        .behavior_version(BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .credentials_provider(Credentials::new("test", "test", None, None, "static"))
        .endpoint_url(server.base_url())
        .force_path_style(true)
        .build();
    S3Storage::new(aws_sdk_s3::Client::from_conf(config), "claims-bucket".to_string())
}

#[tokio::test]
async fn test_put_uses_path_style_key_and_content_type() {
    let server = MockServer::start_async().await;
    let put = server
        .mock_async(|when, then| {
            when.method(PUT)
                .path("/claims-bucket/bcda/patients/patient_20240101_000000_0.ndjson")
                .header("content-type", "application/fhir+ndjson");
            then.status(200);
        })
        .await;

    let storage = storage(&server);
    assert_eq!(storage.location(), "s3://claims-bucket/");
    storage
        .write_file("bcda/patients/patient_20240101_000000_0.ndjson", b"{}\n")
        .await
        .unwrap();
    put.assert_hits_async(1).await;
}

#[tokio::test]
async fn test_denied_put_is_storage_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(PUT).path("/claims-bucket/exports/t.csv");
            then.status(403)
                .header("content-type", "application/xml")
                .body("<?xml version=\"1.0\" encoding=\"UTF-8\"?><Error><Code>AccessDenied</Code><Message>Access Denied</Message></Error>");
        })
        .await;

    let err = storage(&server).write_file("exports/t.csv", b"a\n").await.unwrap_err();
    match err {
        EtlError::StorageError { key, message } => {
            assert_eq!(key, "exports/t.csv");
            assert!(message.contains("AccessDenied"));
        }
        other => panic!("expected StorageError, got {:?}", other),
    }
}
