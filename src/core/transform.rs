use crate::core::error_handling::{AfterRetry, ErrorClassifier, ErrorPolicy, ResponseStatus};
use crate::core::merger::{RecordMerger, ReusedFields};
use crate::core::rate_limit::RateLimiter;
use crate::core::retry::{RetryOutcome, RetryPolicy, RetryScheduler};
use crate::core::url_builder::UrlBuilder;
use crate::domain::model::{InvalidEntry, PageEntry, Record, Schema};
use crate::domain::ports::{Emitter, HttpExecutor, HttpResponse, PageFactory};
use crate::utils::error::{EtlError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

/// Error code used for errors produced by the transform itself.
pub const TRANSFORM_ERROR_CODE: i32 = -1;

/// Immutable settings shared by every record one transform instance processes.
#[derive(Debug, Clone)]
pub struct TransformConfig {
    pub name: String,
    pub url_template: String,
    /// placeholder name → input field name
    pub url_variables: Vec<(String, String)>,
    pub query_parameters: Vec<(String, String)>,
    pub retry_policy: RetryPolicy,
    pub max_retry_duration: Duration,
    pub wait_time_between_pages: Option<Duration>,
    pub max_calls_per_second: Option<f64>,
    pub error_handling: ErrorClassifier,
    pub reused_fields: ReusedFields,
    pub output_schema: Arc<Schema>,
}

/// Per-call state of one record: built URL plus the last observed outcome.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub url: String,
    pub status: ResponseStatus,
    pub response: Option<HttpResponse>,
}

/// 針對每筆輸入記錄呼叫動態 URL、重試、分類結果、分頁並合併輸出
pub struct DynamicHttpTransform<E: HttpExecutor, P: PageFactory> {
    name: String,
    url_builder: UrlBuilder,
    scheduler: RetryScheduler,
    classifier: ErrorClassifier,
    merger: RecordMerger,
    rate_limiter: Option<Arc<RateLimiter>>,
    wait_time_between_pages: Option<Duration>,
    executor: E,
    page_factory: P,
    // whether the previous fetch got a response; only then is the next record paced
    responded_before: AtomicBool,
}

impl<E: HttpExecutor, P: PageFactory> DynamicHttpTransform<E, P> {
    pub fn new(config: TransformConfig, executor: E, page_factory: P) -> Result<Self> {
        let rate_limiter = config
            .max_calls_per_second
            .map(RateLimiter::per_second)
            .transpose()?
            .map(Arc::new);

        Ok(Self {
            url_builder: UrlBuilder::new(
                config.url_template,
                config.url_variables,
                &config.query_parameters,
            ),
            scheduler: RetryScheduler::new(config.retry_policy, config.max_retry_duration),
            classifier: config.error_handling,
            merger: RecordMerger::new(config.output_schema, config.reused_fields),
            rate_limiter,
            wait_time_between_pages: config.wait_time_between_pages,
            name: config.name,
            executor,
            page_factory,
            responded_before: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Arc<Schema> {
        self.merger.schema()
    }

    /// URL the record would be fetched from, without any network call.
    pub fn resolve_url(&self, input: &Record) -> Result<String> {
        self.url_builder
            .build(input)
            .map_err(|e| EtlError::ProcessingError {
                message: e.to_string(),
            })
    }

    /// Processes one input record. Only the STOP disposition (and sink
    /// failures) return `Err`; every other failure goes to `emitter.emit_error`.
    pub async fn transform(&self, input: &Record, emitter: &mut dyn Emitter) -> Result<()> {
        let span = tracing::info_span!("transform", name = %self.name);
        self.process(input, emitter).instrument(span).await
    }

    async fn process(&self, input: &Record, emitter: &mut dyn Emitter) -> Result<()> {
        let url = match self.url_builder.build(input) {
            Ok(url) => url,
            Err(e) => {
                tracing::debug!("⚠️ {}", e);
                return emitter.emit_error(InvalidEntry::new(
                    TRANSFORM_ERROR_CODE,
                    e.to_string(),
                    input.clone(),
                ));
            }
        };

        if let Some(limiter) = &self.rate_limiter {
            limiter.acquire().await;
        }

        let (context, policy) = self.fetch(url).await;

        match policy.after_retry {
            AfterRetry::Stop => {
                let body = context
                    .response
                    .as_ref()
                    .map(|r| r.text().into_owned())
                    .unwrap_or_default();
                tracing::error!(
                    "❌ {}: '{}' returned {}, aborting job",
                    self.name,
                    context.url,
                    context.status
                );
                Err(EtlError::JobAborted {
                    url: context.url,
                    status: context.status.to_string(),
                    body,
                })
            }
            AfterRetry::Skip => {
                tracing::debug!("⏭️ {}: skipping '{}' ({})", self.name, context.url, context.status);
                Ok(())
            }
            AfterRetry::Success | AfterRetry::RouteToError => {
                let errored = policy.after_retry != AfterRetry::Success;
                match context.response {
                    Some(response) => self.paginate(input, response, errored, emitter),
                    None => emitter.emit_error(InvalidEntry::new(
                        TRANSFORM_ERROR_CODE,
                        format!("No HTTP response received from '{}'", context.url),
                        input.clone(),
                    )),
                }
            }
        }
    }

    async fn fetch(&self, url: String) -> (RequestContext, ErrorPolicy) {
        let delay = if self.responded_before.load(Ordering::SeqCst) {
            self.wait_time_between_pages.unwrap_or(Duration::ZERO)
        } else {
            Duration::ZERO
        };

        let RetryOutcome {
            state,
            status,
            response,
            policy,
            attempts,
        } = self
            .scheduler
            .run(delay, &self.classifier, || self.executor.execute(&url))
            .await;
        self.responded_before
            .store(response.is_some(), Ordering::SeqCst);

        tracing::debug!(
            "📡 {}: '{}' finished {:?} after {} attempt(s) with {}",
            self.name,
            url,
            state,
            attempts,
            status
        );

        (
            RequestContext {
                url,
                status,
                response,
            },
            policy,
        )
    }

    fn paginate(
        &self,
        input: &Record,
        response: HttpResponse,
        errored: bool,
        emitter: &mut dyn Emitter,
    ) -> Result<()> {
        let page = match self.page_factory.create_page(response, errored) {
            Ok(page) => page,
            Err(e) => return emitter.emit_error(parse_failure(input, &e)),
        };

        for entry in page {
            match entry {
                Ok(PageEntry::Data(retrieved)) => {
                    emitter.emit(self.merger.merge(input, &retrieved))?
                }
                Ok(PageEntry::Error(error)) => emitter.emit_error(error)?,
                Err(e) => {
                    emitter.emit_error(parse_failure(input, &e))?;
                    break;
                }
            }
        }
        Ok(())
    }
}

fn parse_failure(input: &Record, error: &EtlError) -> InvalidEntry {
    tracing::warn!("⚠️ Exception parsing HTTP Response : {}", error);
    InvalidEntry::new(
        TRANSFORM_ERROR_CODE,
        format!("Exception parsing HTTP Response : {}", error),
        input.clone(),
    )
}
