//! BCDA bulk-data export: authenticate, kick off, poll, then relay every
//! output file into object storage.

use crate::config::settings::BcdaConfig;
use crate::core::http::HttpClient;
use crate::core::{ExportJobState, ExportManifest, Pipeline, RunSummary, Storage, TokenResponse};
use crate::utils::error::{EtlError, Result};
use reqwest::header::{ACCEPT, CONTENT_LOCATION};
use reqwest::StatusCode;
use std::sync::RwLock;
use std::time::{Duration, Instant};

const FHIR_JSON: &str = "application/fhir+json";
const FHIR_NDJSON: &str = "application/fhir+ndjson";

pub struct BcdaClient {
    http: HttpClient,
    config: BcdaConfig,
    access_token: RwLock<Option<String>>,
}

impl BcdaClient {
    pub fn new(http: HttpClient, config: BcdaConfig) -> Self {
        Self {
            http,
            config,
            access_token: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &BcdaConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn token(&self) -> Result<String> {
        self.access_token
            .read()
            .ok()
            .and_then(|guard| guard.clone())
            .ok_or_else(|| EtlError::AuthError {
                message: "Not authenticated; call authenticate() first".to_string(),
            })
    }

    /// OAuth2 client-credentials grant against `/auth/token`.
    pub async fn authenticate(&self) -> Result<()> {
        tracing::info!("Authenticating with BCDA API");
        let (client_id, client_secret) = self.config.credentials()?;

        let request = self
            .http
            .client()
            .post(self.url("/auth/token"))
            .basic_auth(client_id, Some(client_secret))
            .header(ACCEPT, "application/json")
            .form(&[
                ("grant_type", "client_credentials"),
                ("scope", self.config.scope.as_str()),
            ])
            .timeout(Duration::from_secs(self.config.request_timeout_secs));

        let response = self.http.send(request).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!("Authentication failed: HTTP {}", status);
            return Err(EtlError::AuthError {
                message: format!("HTTP {}: {}", status.as_u16(), body.trim()),
            });
        }

        let token: TokenResponse = response.json().await.map_err(|e| EtlError::AuthError {
            message: format!("Unreadable token response: {}", e),
        })?;
        let access_token = token.access_token.ok_or_else(|| EtlError::AuthError {
            message: "Token response has no access_token".to_string(),
        })?;

        if let Some(expires_in) = token.expires_in {
            tracing::debug!("Token expires in {}s", expires_in);
        }
        if let Ok(mut guard) = self.access_token.write() {
            *guard = Some(access_token);
        }
        tracing::info!("Successfully authenticated with BCDA");
        Ok(())
    }

    /// Kicks off an async export and returns the job's status URL.
    pub async fn start_export(&self, resource_types: &[String]) -> Result<String> {
        tracing::info!(
            "Starting export for resource types: {}",
            resource_types.join(", ")
        );
        let token = self.token()?;

        let mut params = vec![("_type", resource_types.join(","))];
        if let Some(since) = &self.config.since {
            params.push(("_since", since.clone()));
        }

        let request = self
            .http
            .client()
            .get(self.url(&self.config.export_path))
            .bearer_auth(&token)
            .header(ACCEPT, FHIR_JSON)
            .header("Prefer", "respond-async")
            .query(&params)
            .timeout(Duration::from_secs(self.config.request_timeout_secs));

        let response = self.http.send(request).await?;
        let status = response.status();
        if status != StatusCode::ACCEPTED {
            let body = response.text().await.unwrap_or_default();
            tracing::error!("Failed to start export: HTTP {}", status);
            return Err(EtlError::ExportStartError {
                status: status.as_u16(),
                message: body.trim().to_string(),
            });
        }

        let status_url = response
            .headers()
            .get(CONTENT_LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| EtlError::ExportStartError {
                status: status.as_u16(),
                message: "202 response without Content-Location header".to_string(),
            })?;

        tracing::info!("Export job started. Status URL: {}", status_url);
        Ok(status_url)
    }

    /// Polls at the configured interval until the job completes. Gives up
    /// once `max_wait` has elapsed, but never before
    /// `max_wait / poll_interval` attempts have been made.
    pub async fn poll_export_status(
        &self,
        status_url: &str,
        max_wait: Duration,
    ) -> Result<ExportManifest> {
        tracing::info!("Polling export job status");
        let token = self.token()?;
        let interval = self.config.poll_interval();
        let min_attempts = if interval.is_zero() {
            1
        } else {
            (max_wait.as_nanos() / interval.as_nanos()).max(1)
        };

        let started = Instant::now();
        let mut state = ExportJobState::Submitted;
        let mut attempts: u128 = 0;

        loop {
            attempts += 1;
            let request = self
                .http
                .client()
                .get(status_url)
                .bearer_auth(&token)
                .header(ACCEPT, FHIR_JSON)
                .timeout(Duration::from_secs(self.config.request_timeout_secs));
            let response = self.http.send(request).await?;

            match response.status() {
                StatusCode::ACCEPTED => {
                    transition(&mut state, ExportJobState::InProgress);
                    let progress = response
                        .headers()
                        .get("X-Progress")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("in progress")
                        .to_string();
                    tracing::info!("Export still in progress ({}, attempt {})", progress, attempts);

                    if attempts >= min_attempts && started.elapsed() >= max_wait {
                        transition(&mut state, ExportJobState::TimedOut);
                        return Err(EtlError::TimeoutError {
                            operation: "BCDA export job".to_string(),
                            waited: started.elapsed(),
                        });
                    }
                    tokio::time::sleep(interval).await;
                }
                StatusCode::OK => {
                    let manifest: ExportManifest = response.json().await?;
                    transition(&mut state, ExportJobState::Complete);
                    tracing::info!(
                        "Export job completed successfully ({} output files)",
                        manifest.output.len()
                    );
                    return Ok(manifest);
                }
                status => {
                    transition(&mut state, ExportJobState::Failed);
                    tracing::error!("Error polling status: HTTP {}", status);
                    return Err(EtlError::UnexpectedStatus {
                        status: status.as_u16(),
                        context: format!("export status {}", status_url),
                    });
                }
            }
        }
    }

    pub async fn download_file(&self, url: &str) -> Result<Vec<u8>> {
        tracing::info!("Downloading file from {}", url);
        let mut request = self
            .http
            .client()
            .get(url)
            .header(ACCEPT, FHIR_NDJSON)
            .timeout(Duration::from_secs(self.config.download_timeout_secs));
        if let Ok(token) = self.token() {
            request = request.bearer_auth(token);
        }

        let response = self.http.send(request).await?.error_for_status()?;
        let bytes = response.bytes().await?.to_vec();
        tracing::info!("Downloaded {} bytes", bytes.len());
        Ok(bytes)
    }
}

fn transition(state: &mut ExportJobState, next: ExportJobState) {
    if *state != next {
        tracing::debug!("Export job {:?} -> {:?}", state, next);
        *state = next;
    }
}

/// `<prefix>/<type>_<stamp>_<index>.ndjson`
pub fn staged_object_key(config: &BcdaConfig, resource_type: &str, stamp: &str, index: usize) -> String {
    format!(
        "{}/{}_{}_{}.ndjson",
        config.key_prefix(resource_type),
        resource_type.to_lowercase(),
        stamp,
        index
    )
}

pub fn timestamp_now() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}

pub struct BcdaExportPipeline<S: Storage> {
    client: BcdaClient,
    storage: S,
}

impl<S: Storage> BcdaExportPipeline<S> {
    pub fn new(client: BcdaClient, storage: S) -> Self {
        Self { client, storage }
    }

    pub fn client(&self) -> &BcdaClient {
        &self.client
    }

    pub async fn upload_to_s3(&self, content: &[u8], key: &str) -> Result<()> {
        tracing::info!("Uploading to {}{}", self.storage.location(), key);
        self.storage.write_file(key, content).await?;
        tracing::info!("Successfully uploaded {} bytes", content.len());
        Ok(())
    }

    /// Relays each output file to storage. A bad entry or a failed transfer
    /// is logged and skipped; the rest still run.
    pub async fn process_export_results(&self, manifest: &ExportManifest) -> RunSummary {
        let mut summary = RunSummary::new("BCDA export");
        let total = manifest.output.len();
        let stamp = timestamp_now();
        tracing::info!("Found {} files to process", total);

        for (idx, file) in manifest.output.iter().enumerate() {
            let (Some(resource_type), Some(url)) = (file.resource_type.as_deref(), file.url.as_deref()) else {
                tracing::warn!("Skipping file with missing type or URL: {:?}", file);
                summary.record_skip();
                continue;
            };

            tracing::info!("Processing {} file ({}/{})", resource_type, idx + 1, total);
            let key = staged_object_key(self.client.config(), resource_type, &stamp, idx);

            let outcome = match self.client.download_file(url).await {
                Ok(content) => self.upload_to_s3(&content, &key).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(()) => summary.record_success(key),
                Err(e) => {
                    tracing::error!("Error processing file {}: {}", idx + 1, e);
                    summary.record_failure();
                }
            }
        }
        summary
    }
}

#[async_trait::async_trait]
impl<S: Storage> Pipeline for BcdaExportPipeline<S> {
    type Extracted = ExportManifest;
    type Transformed = ExportManifest;

    fn name(&self) -> &str {
        "BCDA export"
    }

    async fn extract(&self) -> Result<ExportManifest> {
        self.client.authenticate().await?;
        let config = self.client.config();
        let status_url = self.client.start_export(&config.resource_types).await?;
        self.client
            .poll_export_status(&status_url, config.max_wait())
            .await
    }

    async fn transform(&self, manifest: ExportManifest) -> Result<ExportManifest> {
        if !manifest.error.is_empty() {
            tracing::warn!(
                "Export reported {} OperationOutcome error file(s); they are not staged",
                manifest.error.len()
            );
        }
        if let Some(time) = &manifest.transaction_time {
            tracing::info!("Export transaction time: {}", time);
        }
        Ok(manifest)
    }

    async fn load(&self, manifest: ExportManifest) -> Result<RunSummary> {
        let summary = self.process_export_results(&manifest).await;
        summary.log(&self.storage.location());
        Ok(summary)
    }
}
