use claims_etl::config::settings::{substitute_env_vars, AppConfig};
use claims_etl::core::schema::TypePolicy;
use claims_etl::utils::validation::Validate;
use claims_etl::EtlError;
use std::path::Path;
use tempfile::TempDir;

#[test]
fn test_example_config_parses_and_validates() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("claims-etl.example.toml");
    let content = std::fs::read_to_string(path).unwrap();
    let processed = substitute_env_vars(&content, |key| match key {
        "AWS_S3_BUCKET" => Some("claims-bucket".to_string()),
        "SUPABASE_URL" => Some("https://project.supabase.co".to_string()),
        _ => Some(format!("{}-value", key.to_lowercase())),
    });
    let config: AppConfig = toml::from_str(&processed).unwrap();

    assert!(config.validate().is_ok());
    assert_eq!(config.views.exports.len(), 3);
    assert_eq!(config.views.exports[2].columns.len(), 17);
    assert_eq!(config.views.exports[0].metadata_key.as_deref(), Some("category_records"));
    assert_eq!(config.views.exports[2].metadata_key, None);
    assert_eq!(config.loader.type_policy, TypePolicy::AllText);
    assert_eq!(config.loader.template_tables[0].table, "HOSPITAL_COST_REPORT");
    assert_eq!(config.retry.status_forcelist, vec![429, 500, 502, 503, 504]);
    assert_eq!(config.bcda.key_prefix("ExplanationOfBenefit"), "bcda/eob");
    assert_eq!(config.bcda.client_id.as_deref(), Some("bcda_client_id-value"));
}

#[test]
fn test_env_file_credentials_feed_config() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let env_file = dir.path().join(".env");
    std::fs::write(
        &env_file,
        "BCDA_CLIENT_ID=from-dotenv\nBCDA_CLIENT_SECRET=\"s3cr3t\"\nSNOWFLAKE_ROLE=LOADER\n",
    )?;
    let toml = dir.path().join("etl.toml");
    std::fs::write(&toml, "[bcda]\nmax_wait_secs = 42\n")?;

    let config = AppConfig::load(Some(toml.as_path()), Some(env_file.as_path()))?;
    assert_eq!(config.bcda.credentials()?, ("from-dotenv", "s3cr3t"));
    assert_eq!(config.bcda.max_wait_secs, 42);
    assert_eq!(config.warehouse.role.as_deref(), Some("LOADER"));
    Ok(())
}

#[test]
fn test_missing_env_file_is_config_error() {
    let err = AppConfig::load(None, Some(Path::new("/no/such/.env"))).unwrap_err();
    assert!(matches!(err, EtlError::ConfigError { .. }));
}

#[test]
fn test_invalid_values_are_rejected() {
    let mut config = AppConfig::default();
    config.storage.bucket = Some("Not_A_Bucket".to_string());
    assert!(matches!(config.validate(), Err(EtlError::InvalidConfigValueError { .. })));

    let mut config = AppConfig::default();
    config.bcda.resource_types.clear();
    assert!(matches!(config.validate(), Err(EtlError::ConfigValidationError { .. })));
}
