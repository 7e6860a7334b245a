pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;

pub use adapters::http::ReqwestExecutor;
pub use adapters::page::{CsvPageFactory, FormatPageFactory, JsonPageFactory};
pub use adapters::sink::{CollectingEmitter, JsonLinesEmitter};
pub use config::toml_config::TransformSettings;
pub use crate::core::{
    error_handling::{ErrorClassifier, ErrorStrategy},
    etl::{RunSummary, TransformEngine},
    retry::RetryPolicy,
    transform::{DynamicHttpTransform, TransformConfig},
};
pub use utils::error::{EtlError, Result};
