pub mod bcda;
pub mod bcda_load;
pub mod etl;
pub mod http;
pub mod loader;
pub mod postgrest;
pub mod schema;
pub mod views;
pub mod warehouse;

pub use crate::domain::model::{
    ColumnMeta, ExportJobState, ExportManifest, OutputFile, QueryResult, RunSummary, TokenResponse,
};
pub use crate::domain::ports::{Pipeline, Storage, Warehouse};
pub use crate::utils::error::Result;
