use clap::Parser;
use claims_etl::app::flows;
use claims_etl::utils::error::ErrorSeverity;
use claims_etl::utils::{logger, validation::Validate};
use claims_etl::{AppConfig, CliConfig, Command, EtlError, Result, RunSummary};

fn report(e: &EtlError) -> i32 {
    tracing::error!(
        "❌ Run failed: {} (Category: {:?}, Severity: {:?})",
        e,
        e.category(),
        e.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());
    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 Suggestion: {}", e.recovery_suggestion());

    match e.severity() {
        ErrorSeverity::Low => 0,
        ErrorSeverity::Medium => 2,
        ErrorSeverity::High => 1,
        ErrorSeverity::Critical => 3,
    }
}

fn load_config(cli: &CliConfig) -> Result<AppConfig> {
    let mut config = AppConfig::load(cli.config.as_deref(), cli.env_file.as_deref())?;

    match &cli.command {
        Command::BcdaExport { types, since } => {
            if !types.is_empty() {
                config.bcda.resource_types = types.clone();
            }
            if since.is_some() {
                config.bcda.since = since.clone();
            }
        }
        Command::SupabaseExport { tables } if !tables.is_empty() => {
            config.postgrest.tables = tables.clone();
        }
        Command::LoadCsv { data_dir, upload } => {
            if let Some(dir) = data_dir {
                config.loader.data_dir = dir.clone();
            }
            config.loader.upload_files |= *upload;
        }
        Command::ExportViews { output_dir, archive } => {
            if let Some(dir) = output_dir {
                config.views.output_dir = dir.clone();
            }
            config.views.archive |= *archive;
        }
        _ => {}
    }

    config.validate()?;
    Ok(config)
}

async fn dispatch(cli: &CliConfig, config: &AppConfig) -> Result<RunSummary> {
    let monitor = cli.monitor;
    match &cli.command {
        Command::BcdaExport { .. } => flows::bcda_export(config, monitor).await,
        Command::SupabaseExport { .. } => flows::supabase_export(config, monitor).await,
        Command::LoadCsv { .. } => flows::load_csv(config, monitor).await,
        Command::LoadTemplates => flows::load_templates(config, monitor).await,
        Command::LoadBcda => flows::load_bcda(config, monitor).await,
        Command::RunSql { files } => flows::run_sql(config, files).await,
        Command::ExportViews { .. } => flows::export_views(config, monitor).await,
    }
}

#[tokio::main]
async fn main() {
    let cli = CliConfig::parse();
    logger::init_cli_logger(cli.verbose);

    tracing::info!("Starting claims-etl {:?}", cli.command);
    if cli.monitor {
        tracing::info!("🔍 System monitoring enabled");
    }

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("❌ Configuration validation failed: {}", e);
            std::process::exit(report(&e).max(1));
        }
    };

    match dispatch(&cli, &config).await {
        Ok(summary) => {
            println!(
                "✅ {} finished: {} succeeded, {} failed, {} skipped",
                summary.flow, summary.succeeded, summary.failed, summary.skipped
            );
        }
        Err(e) => {
            let code = report(&e);
            if code > 0 {
                std::process::exit(code);
            }
        }
    }
}
