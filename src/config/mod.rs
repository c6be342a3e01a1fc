pub mod settings;

#[cfg(feature = "cli")]
pub mod cli;

#[cfg(feature = "lambda")]
pub mod lambda;

pub use settings::AppConfig;

#[cfg(feature = "cli")]
pub use cli::{CliConfig, Command};
