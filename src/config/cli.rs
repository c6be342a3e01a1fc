use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "claims-etl")]
#[command(about = "Claims and cost-data ETL: BCDA bulk export, warehouse loads and static exports")]
#[command(version)]
pub struct CliConfig {
    /// TOML configuration file; `${VAR}` references are expanded
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// dotenv-style credential file loaded before the configuration
    #[arg(long, global = true)]
    pub env_file: Option<PathBuf>,

    #[arg(long, short = 'v', global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Log phase timings and process CPU/memory")]
    pub monitor: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Export FHIR resources from BCDA and stage them in S3
    BcdaExport {
        /// Comma-separated resource types (defaults to the configured list)
        #[arg(long, value_delimiter = ',')]
        types: Vec<String>,

        /// Only resources updated since this FHIR instant
        #[arg(long)]
        since: Option<String>,
    },

    /// Export PostgREST tables to CSV in S3
    SupabaseExport {
        #[arg(long, value_delimiter = ',')]
        tables: Vec<String>,
    },

    /// Create tables from local CSV headers and COPY the staged files
    LoadCsv {
        #[arg(long)]
        data_dir: Option<String>,

        /// Upload each local file to the stage before loading
        #[arg(long)]
        upload: bool,
    },

    /// Create tables with warehouse schema inference over staged files
    LoadTemplates,

    /// COPY staged BCDA NDJSON into raw VARIANT tables
    LoadBcda,

    /// Execute SQL files statement by statement
    RunSql {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Export warehouse views to static JSON files
    ExportViews {
        #[arg(long)]
        output_dir: Option<String>,

        /// Also bundle the JSON files into a zip archive
        #[arg(long)]
        archive: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = CliConfig::parse_from([
            "claims-etl",
            "bcda-export",
            "--types",
            "Patient,Coverage",
            "--verbose",
            "--config",
            "etl.toml",
        ]);
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("etl.toml")));
        match cli.command {
            Command::BcdaExport { types, since } => {
                assert_eq!(types, vec!["Patient", "Coverage"]);
                assert!(since.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_run_sql_requires_files() {
        assert!(CliConfig::try_parse_from(["claims-etl", "run-sql"]).is_err());
    }
}
