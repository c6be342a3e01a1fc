use claims_etl::app::flows;
use claims_etl::config::lambda::LambdaConfig;
use claims_etl::utils::{logger, validation::Validate};
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use serde::{Deserialize, Serialize};

/// Optional per-invocation overrides; everything else comes from the environment.
#[derive(Debug, Default, Deserialize)]
pub struct Request {
    pub resource_types: Option<Vec<String>>,
    pub since: Option<String>,
}

#[derive(Serialize)]
pub struct Response {
    pub message: String,
    pub files_uploaded: usize,
    pub files_failed: usize,
    pub keys: Vec<String>,
}

async fn function_handler(event: LambdaEvent<Request>) -> Result<Response, Error> {
    tracing::info!("Starting BCDA export Lambda");

    let mut config = LambdaConfig::from_env()?;
    if let Some(types) = event.payload.resource_types.filter(|t| !t.is_empty()) {
        config.app.bcda.resource_types = types;
    }
    if let Some(since) = event.payload.since {
        config.app.bcda.since = Some(since);
    }
    config.validate()?;

    let summary = flows::bcda_export(&config.app, false).await?;
    tracing::info!("BCDA export Lambda completed");
    Ok(Response {
        message: format!("{} completed", summary.flow),
        files_uploaded: summary.succeeded,
        files_failed: summary.failed,
        keys: summary.outputs,
    })
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    logger::init_lambda_logger();
    run(service_fn(function_handler)).await
}
