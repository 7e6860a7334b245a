use crate::core::transform::DynamicHttpTransform;
use crate::domain::model::{InvalidEntry, Record, StructuredRecord};
use crate::domain::ports::{Emitter, HttpExecutor, PageFactory};
use crate::utils::error::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub input_records: usize,
    pub emitted_records: usize,
    pub emitted_errors: usize,
}

/// Counts what passes through to the real sink.
struct CountingEmitter<'a> {
    inner: &'a mut dyn Emitter,
    summary: RunSummary,
}

impl Emitter for CountingEmitter<'_> {
    fn emit(&mut self, record: StructuredRecord) -> Result<()> {
        self.summary.emitted_records += 1;
        self.inner.emit(record)
    }

    fn emit_error(&mut self, error: InvalidEntry) -> Result<()> {
        self.summary.emitted_errors += 1;
        self.inner.emit_error(error)
    }
}

/// 依序將每筆輸入記錄送進 transform；遇到 job 層級錯誤即停止
pub struct TransformEngine<E: HttpExecutor, P: PageFactory> {
    transform: DynamicHttpTransform<E, P>,
}

impl<E: HttpExecutor, P: PageFactory> TransformEngine<E, P> {
    pub fn new(transform: DynamicHttpTransform<E, P>) -> Self {
        Self { transform }
    }

    pub fn transform(&self) -> &DynamicHttpTransform<E, P> {
        &self.transform
    }

    pub async fn run<I>(&self, records: I, emitter: &mut dyn Emitter) -> Result<RunSummary>
    where
        I: IntoIterator<Item = Result<Record>>,
    {
        tracing::info!("🚀 Starting transform '{}'", self.transform.name());

        let mut counting = CountingEmitter {
            inner: emitter,
            summary: RunSummary::default(),
        };

        for record in records {
            let record = record?;
            counting.summary.input_records += 1;

            if let Err(e) = self.transform.transform(&record, &mut counting).await {
                tracing::error!(
                    "❌ Transform '{}' stopped after {} input records ({} emitted, {} errors): {}",
                    self.transform.name(),
                    counting.summary.input_records,
                    counting.summary.emitted_records,
                    counting.summary.emitted_errors,
                    e
                );
                return Err(e);
            }
        }

        let summary = counting.summary;
        tracing::info!(
            "✅ Transform '{}' processed {} input records: {} emitted, {} errors",
            self.transform.name(),
            summary.input_records,
            summary.emitted_records,
            summary.emitted_errors
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::page::JsonPageFactory;
    use crate::adapters::sink::CollectingEmitter;
    use crate::core::error_handling::{ErrorClassifier, ErrorStrategy};
    use crate::core::merger::ReusedFields;
    use crate::core::retry::RetryPolicy;
    use crate::core::transform::TransformConfig;
    use crate::domain::model::{Field, FieldType, Schema};
    use crate::domain::ports::{HttpResponse, NoResponse};
    use crate::utils::error::EtlError;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    /// `/ok/{id}` answers with one user, `/gone/{id}` with 410.
    struct PathExecutor;

    #[async_trait]
    impl HttpExecutor for PathExecutor {
        async fn execute(&self, url: &str) -> std::result::Result<HttpResponse, NoResponse> {
            if url.contains("/gone/") {
                return Ok(HttpResponse::new(410, "gone"));
            }
            Ok(HttpResponse::new(200, r#"[{"name": "user"}]"#))
        }
    }

    fn engine() -> TransformEngine<PathExecutor, JsonPageFactory> {
        let config = TransformConfig {
            name: "engine-test".to_string(),
            url_template: "http://host/{kind}/{id}".to_string(),
            url_variables: vec![
                ("kind".to_string(), "kind".to_string()),
                ("id".to_string(), "id".to_string()),
            ],
            query_parameters: vec![],
            retry_policy: RetryPolicy::default(),
            max_retry_duration: Duration::from_secs(1),
            wait_time_between_pages: None,
            max_calls_per_second: None,
            error_handling: ErrorClassifier::from_patterns([("410", ErrorStrategy::Fail)]).unwrap(),
            reused_fields: ReusedFields::new(vec!["id".to_string()], vec![]),
            output_schema: Arc::new(Schema::new(vec![
                Field::new("id", FieldType::String),
                Field::new("name", FieldType::String),
            ])),
        };
        let transform =
            DynamicHttpTransform::new(config, PathExecutor, JsonPageFactory::default()).unwrap();
        TransformEngine::new(transform)
    }

    fn input(kind: &str, id: &str) -> Result<Record> {
        Ok(Record::new().with("kind", kind).with("id", id))
    }

    #[tokio::test(start_paused = true)]
    async fn counts_records_and_errors() {
        let mut sink = CollectingEmitter::default();
        let records = vec![
            input("ok", "1"),
            Ok(Record::new().with("id", "2")),
            input("ok", "3"),
        ];

        let summary = engine().run(records, &mut sink).await.unwrap();

        assert_eq!(
            summary,
            RunSummary {
                input_records: 3,
                emitted_records: 2,
                emitted_errors: 1,
            }
        );
        assert_eq!(sink.records.len(), 2);
        assert_eq!(sink.errors[0].message, "Cannot find required field kind");
    }

    #[tokio::test(start_paused = true)]
    async fn stops_at_first_job_abort() {
        let mut sink = CollectingEmitter::default();
        let records = vec![input("ok", "1"), input("gone", "2"), input("ok", "3")];

        let err = engine().run(records, &mut sink).await.unwrap_err();

        assert!(matches!(err, EtlError::JobAborted { ref status, .. } if status == "410"));
        assert_eq!(sink.records.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn input_errors_end_the_run() {
        let mut sink = CollectingEmitter::default();
        let records = vec![input("ok", "1"), Err(EtlError::page("bad input line"))];

        assert!(engine().run(records, &mut sink).await.is_err());
        assert_eq!(sink.records.len(), 1);
    }
}
