use crate::config::settings::AppConfig;
use crate::utils::error::{EtlError, Result};
use crate::utils::validation::{validate_positive_number, validate_s3_bucket_name, Validate};
use std::env;

/// Lambda runs only the BCDA export; everything comes from the function's
/// environment.
#[derive(Debug, Clone)]
pub struct LambdaConfig {
    pub app: AppConfig,
}

impl LambdaConfig {
    pub fn from_env() -> Result<Self> {
        let mut app = AppConfig::default();
        app.apply_env_with(|key| env::var(key).ok());

        if app.storage.bucket.is_none() {
            return Err(EtlError::config("AWS_S3_BUCKET environment variable is required"));
        }
        if let Ok(wait) = env::var("BCDA_MAX_WAIT_SECS") {
            app.bcda.max_wait_secs = wait.parse().map_err(|_| EtlError::InvalidConfigValueError {
                field: "BCDA_MAX_WAIT_SECS".to_string(),
                value: wait.clone(),
                reason: "must be a whole number of seconds".to_string(),
            })?;
        }
        Ok(Self { app })
    }
}

impl Validate for LambdaConfig {
    fn validate(&self) -> Result<()> {
        validate_s3_bucket_name("AWS_S3_BUCKET", self.app.storage.bucket()?)?;
        validate_positive_number("BCDA_MAX_WAIT_SECS", self.app.bcda.max_wait_secs, 1)?;
        self.app.bcda.credentials()?;
        tracing::info!("✅ Lambda configuration validation passed");
        Ok(())
    }
}
