pub mod adapters;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

pub use adapters::{LocalStorage, S3Storage};
pub use config::AppConfig;
#[cfg(feature = "cli")]
pub use config::{CliConfig, Command};

pub use core::etl::EtlEngine;
pub use core::{Pipeline, RunSummary, Storage, Warehouse};
pub use utils::error::{EtlError, Result};
