pub mod error_handling;
pub mod etl;
pub mod merger;
pub mod rate_limit;
pub mod retry;
pub mod transform;
pub mod url_builder;

pub use crate::domain::model::{InvalidEntry, PageEntry, Record, StructuredRecord};
pub use crate::domain::ports::{Emitter, HttpExecutor, HttpResponse, PageFactory};
pub use crate::utils::error::Result;
