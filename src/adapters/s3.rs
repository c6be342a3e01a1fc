use crate::adapters::content_type_for;
use crate::config::settings::StorageConfig;
use crate::core::Storage;
use crate::utils::error::{EtlError, Result};
use aws_sdk_s3::config::{BehaviorVersion, Region};
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::Client as S3Client;

#[derive(Debug, Clone)]
pub struct S3Storage {
    client: S3Client,
    bucket: String,
}

impl S3Storage {
    pub fn new(client: S3Client, bucket: String) -> Self {
        Self { client, bucket }
    }

    /// Builds a client from the default credential chain. A custom endpoint
    /// (LocalStack, MinIO) switches to path-style addressing.
    pub async fn from_config(config: &StorageConfig) -> Result<Self> {
        let bucket = config.bucket()?.to_string();

        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &config.endpoint {
            tracing::info!("Using S3 endpoint {}", endpoint);
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        Ok(Self::new(S3Client::from_conf(builder.build()), bucket))
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

fn describe<E: ProvideErrorMetadata + std::fmt::Display>(err: &E) -> String {
    match (err.code(), err.message()) {
        (Some(code), Some(message)) => format!("{}: {}", code, message),
        (Some(code), None) => code.to_string(),
        _ => err.to_string(),
    }
}

impl Storage for S3Storage {
    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| EtlError::storage(path, describe(&e.into_service_error())))?;

        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| EtlError::storage(path, format!("Failed to read object body: {}", e)))?;
        Ok(data.into_bytes().to_vec())
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(path)
            .content_type(content_type_for(path))
            .body(data.to_vec().into())
            .send()
            .await
            .map_err(|e| EtlError::storage(path, describe(&e.into_service_error())))?;
        Ok(())
    }

    fn location(&self) -> String {
        format!("s3://{}/", self.bucket)
    }
}
