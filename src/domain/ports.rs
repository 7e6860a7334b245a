use crate::domain::model::{InvalidEntry, PageEntry, StructuredRecord};
use crate::utils::error::Result;
use async_trait::async_trait;
use std::borrow::Cow;
use std::sync::Arc;

/// Status code plus raw body of a completed HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// The request never produced a response (connect failure, timeout, reset).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no response received from '{url}': {message}")]
pub struct NoResponse {
    pub url: String,
    pub message: String,
}

impl NoResponse {
    pub fn new(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait HttpExecutor: Send + Sync {
    async fn execute(&self, url: &str) -> std::result::Result<HttpResponse, NoResponse>;
}

#[async_trait]
impl<T: HttpExecutor + ?Sized> HttpExecutor for Arc<T> {
    async fn execute(&self, url: &str) -> std::result::Result<HttpResponse, NoResponse> {
        (**self).execute(url).await
    }
}

/// Lazy, finite, single-pass sequence of entries. An `Err` item ends pagination
/// for the current record.
pub type Page = Box<dyn Iterator<Item = Result<PageEntry>> + Send>;

pub trait PageFactory: Send + Sync {
    /// `errored` marks a response whose entries describe an error condition.
    fn create_page(&self, response: HttpResponse, errored: bool) -> Result<Page>;
}

impl<T: PageFactory + ?Sized> PageFactory for Arc<T> {
    fn create_page(&self, response: HttpResponse, errored: bool) -> Result<Page> {
        (**self).create_page(response, errored)
    }
}

/// 輸出端：正常記錄與錯誤記錄分開送出
pub trait Emitter: Send {
    fn emit(&mut self, record: StructuredRecord) -> Result<()>;
    fn emit_error(&mut self, error: InvalidEntry) -> Result<()>;
}
