use crate::adapters::http::ReqwestExecutor;
use crate::adapters::page::{CsvPageFactory, FormatPageFactory, JsonPageFactory};
use crate::core::error_handling::{ErrorClassifier, ErrorStrategy, StatusMatcher};
use crate::core::merger::ReusedFields;
use crate::core::retry::RetryPolicy;
use crate::core::transform::TransformConfig;
use crate::core::url_builder::placeholder_pattern;
use crate::domain::model::{Field, Schema};
use crate::utils::error::{EtlError, Result};
use crate::utils::validation::{
    validate_non_empty_string, validate_path, validate_positive_number, validate_range,
    validate_unique_values, validate_url, Validate,
};
use regex::Regex;
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformSettings {
    pub transform: TransformSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub error_handling: Vec<ErrorHandlingEntry>,
    #[serde(default)]
    pub reused_inputs: ReusedInputsSection,
    pub output_schema: Vec<Field>,
    #[serde(default)]
    pub format: FormatSection,
    #[serde(default)]
    pub http: HttpSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformSection {
    pub name: String,
    pub url: String,
    /// placeholder → input field
    #[serde(default)]
    pub url_variables: OrderedMap,
    #[serde(default)]
    pub query_parameters: OrderedMap,
    pub wait_time_between_pages_ms: Option<u64>,
    pub max_calls_per_second: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryPolicyKind {
    Linear,
    #[default]
    Exponential,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySection {
    #[serde(default)]
    pub policy: RetryPolicyKind,
    #[serde(default = "default_linear_interval_seconds")]
    pub linear_interval_seconds: u64,
    #[serde(default = "default_exponential_base_ms")]
    pub exponential_base_ms: u64,
    #[serde(default = "default_max_duration_seconds")]
    pub max_duration_seconds: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            policy: RetryPolicyKind::default(),
            linear_interval_seconds: default_linear_interval_seconds(),
            exponential_base_ms: default_exponential_base_ms(),
            max_duration_seconds: default_max_duration_seconds(),
        }
    }
}

fn default_linear_interval_seconds() -> u64 {
    30
}

fn default_exponential_base_ms() -> u64 {
    100
}

fn default_max_duration_seconds() -> u64 {
    600
}

/// `code = 404`, `code = "5.."` or `code = "no_response"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatusCodePattern {
    Code(u16),
    Pattern(String),
}

impl StatusCodePattern {
    pub fn as_pattern(&self) -> String {
        match self {
            Self::Code(code) => code.to_string(),
            Self::Pattern(pattern) => pattern.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorHandlingEntry {
    pub code: StatusCodePattern,
    pub strategy: ErrorStrategy,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReusedInputsSection {
    #[serde(default)]
    pub fields: Vec<String>,
    /// input field → output field
    #[serde(default)]
    pub rename: OrderedMap,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatKind {
    #[default]
    Json,
    Csv,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatSection {
    #[serde(rename = "type", default)]
    pub kind: FormatKind,
    pub results_path: Option<String>,
    #[serde(default = "default_true")]
    pub csv_has_header: bool,
    #[serde(default = "default_csv_delimiter")]
    pub csv_delimiter: char,
}

impl Default for FormatSection {
    fn default() -> Self {
        Self {
            kind: FormatKind::default(),
            results_path: None,
            csv_has_header: true,
            csv_delimiter: default_csv_delimiter(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_csv_delimiter() -> char {
    ','
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpSection {
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub headers: OrderedMap,
    pub user_agent: Option<String>,
}

/// TOML table read as key/value pairs in document order. Scalar values
/// (`limit = 10`, `pretty = true`) are kept as their text form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderedMap(pub Vec<(String, String)>);

impl OrderedMap {
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(_, v)| v.as_str())
    }
}

impl<'de> Deserialize<'de> for OrderedMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct OrderedMapVisitor;

        impl<'de> Visitor<'de> for OrderedMapVisitor {
            type Value = OrderedMap;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a table of scalar values")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<OrderedMap, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((key, value)) = access.next_entry::<String, serde_json::Value>()? {
                    let text = match value {
                        serde_json::Value::String(s) => s,
                        serde_json::Value::Number(n) => n.to_string(),
                        serde_json::Value::Bool(b) => b.to_string(),
                        other => {
                            return Err(de::Error::custom(format!(
                                "value of '{}' must be a string, number or boolean, got {}",
                                key, other
                            )))
                        }
                    };
                    entries.push((key, text));
                }
                Ok(OrderedMap(entries))
            }
        }

        deserializer.deserialize_map(OrderedMapVisitor)
    }
}

impl Serialize for OrderedMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl TransformSettings {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(EtlError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        // 處理環境變數替換
        let processed_content = Self::substitute_env_vars(content);

        toml::from_str(&processed_content).map_err(|e| EtlError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${API_KEY})；未設定的變數保持原樣
    fn substitute_env_vars(content: &str) -> String {
        static ENV_VAR: OnceLock<Regex> = OnceLock::new();
        let re = ENV_VAR
            .get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("env var pattern is valid"));

        re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        })
        .into_owned()
    }

    pub fn schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(self.output_schema.clone()))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        match self.retry.policy {
            RetryPolicyKind::Linear => RetryPolicy::Linear {
                interval: Duration::from_secs(self.retry.linear_interval_seconds),
            },
            RetryPolicyKind::Exponential => RetryPolicy::Exponential {
                base: Duration::from_millis(self.retry.exponential_base_ms),
            },
        }
    }

    fn classifier(&self) -> Result<ErrorClassifier> {
        let patterns: Vec<(String, ErrorStrategy)> = self
            .error_handling
            .iter()
            .map(|entry| (entry.code.as_pattern(), entry.strategy))
            .collect();

        ErrorClassifier::from_patterns(patterns.iter().map(|(p, s)| (p.as_str(), *s))).map_err(
            |e| EtlError::InvalidConfigValueError {
                field: "error_handling.code".to_string(),
                value: e.0.clone(),
                reason: e.to_string(),
            },
        )
    }

    /// Output fields copied from the input record.
    fn reused_output_fields(&self) -> Vec<&str> {
        let renamed: HashSet<&str> = self.reused_inputs.rename.keys().collect();
        self.reused_inputs
            .fields
            .iter()
            .map(String::as_str)
            .filter(|field| !renamed.contains(field))
            .chain(self.reused_inputs.rename.values())
            .collect()
    }

    /// 驗證後組出 transform 使用的不可變設定
    pub fn build(&self) -> Result<TransformConfig> {
        self.validate()?;

        Ok(TransformConfig {
            name: self.transform.name.clone(),
            url_template: self.transform.url.clone(),
            url_variables: self.transform.url_variables.0.clone(),
            query_parameters: self.transform.query_parameters.0.clone(),
            retry_policy: self.retry_policy(),
            max_retry_duration: Duration::from_secs(self.retry.max_duration_seconds),
            wait_time_between_pages: self
                .transform
                .wait_time_between_pages_ms
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis),
            max_calls_per_second: self.transform.max_calls_per_second,
            error_handling: self.classifier()?,
            reused_fields: ReusedFields::new(
                self.reused_inputs.fields.clone(),
                self.reused_inputs.rename.0.clone(),
            ),
            output_schema: self.schema(),
        })
    }

    pub fn page_factory(&self) -> FormatPageFactory {
        match self.format.kind {
            FormatKind::Json => {
                FormatPageFactory::Json(JsonPageFactory::new(self.format.results_path.clone()))
            }
            FormatKind::Csv => FormatPageFactory::Csv(CsvPageFactory::new(
                self.schema(),
                self.format.csv_has_header,
                // validated to be ASCII
                self.format.csv_delimiter as u8,
            )),
        }
    }

    pub fn executor(&self) -> Result<ReqwestExecutor> {
        ReqwestExecutor::new(
            self.http.user_agent.as_deref(),
            self.http.headers.0.clone(),
            self.http.timeout_seconds.map(Duration::from_secs),
        )
    }
}

impl Validate for TransformSettings {
    fn validate(&self) -> Result<()> {
        validate_non_empty_string("transform.name", &self.transform.name)?;

        // 佔位符可能出現在 host 中，先替換再檢查 URL 格式
        let url = &self.transform.url;
        let concrete = placeholder_pattern().replace_all(url, "x");
        validate_url("transform.url", &concrete).map_err(|_| {
            EtlError::InvalidConfigValueError {
                field: "transform.url".to_string(),
                value: url.clone(),
                reason: "URL must be an absolute http or https URL".to_string(),
            }
        })?;

        for placeholder in self.transform.url_variables.keys() {
            if !url.contains(&format!("{{{}}}", placeholder)) {
                tracing::warn!(
                    "⚠️ Placeholder '{{{}}}' from transform.url_variables is not used in {}",
                    placeholder,
                    url
                );
            }
        }

        if let Some(rate) = self.transform.max_calls_per_second {
            if !rate.is_finite() {
                return Err(EtlError::InvalidConfigValueError {
                    field: "transform.max_calls_per_second".to_string(),
                    value: rate.to_string(),
                    reason: "Value must be a finite number".to_string(),
                });
            }
            validate_range("transform.max_calls_per_second", rate, 0.001, 1_000_000.0)?;
        }

        if self.retry.policy == RetryPolicyKind::Linear {
            validate_positive_number(
                "retry.linear_interval_seconds",
                self.retry.linear_interval_seconds,
                1,
            )?;
        } else {
            validate_positive_number("retry.exponential_base_ms", self.retry.exponential_base_ms, 1)?;
        }

        self.classifier()?;

        if self.output_schema.is_empty() {
            return Err(EtlError::MissingConfigError {
                field: "output_schema".to_string(),
            });
        }
        validate_unique_values(
            "output_schema.name",
            self.output_schema.iter().map(|f| f.name.as_str()),
        )?;

        validate_unique_values("reused_inputs.rename", self.reused_inputs.rename.values())?;
        for field in self.reused_output_fields() {
            if !self.output_schema.iter().any(|f| f.name == field) {
                return Err(EtlError::InvalidConfigValueError {
                    field: "reused_inputs".to_string(),
                    value: field.to_string(),
                    reason: "Reused field is not part of output_schema".to_string(),
                });
            }
        }

        if let Some(path) = &self.format.results_path {
            validate_path("format.results_path", path)?;
            if !path.starts_with('/') {
                return Err(EtlError::InvalidConfigValueError {
                    field: "format.results_path".to_string(),
                    value: path.clone(),
                    reason: "Expected a JSON pointer such as /data/items".to_string(),
                });
            }
        }
        if !self.format.csv_delimiter.is_ascii() {
            return Err(EtlError::InvalidConfigValueError {
                field: "format.csv_delimiter".to_string(),
                value: self.format.csv_delimiter.to_string(),
                reason: "Delimiter must be a single ASCII character".to_string(),
            });
        }

        if let Some(timeout) = self.http.timeout_seconds {
            validate_positive_number("http.timeout_seconds", timeout, 1)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error_handling::{AfterRetry, ResponseStatus};
    use crate::core::url_builder::UrlBuilder;
    use crate::domain::model::{FieldType, Record};
    use std::io::Write;
    use tempfile::NamedTempFile;

    const FULL: &str = r#"
[transform]
name = "customers"
url = "https://api.example.com/{region}/customers/{customer}"
wait_time_between_pages_ms = 250
max_calls_per_second = 5.0

[transform.url_variables]
region = "region_code"
customer = "id"

[transform.query_parameters]
format = "json"
limit = 10

[retry]
policy = "linear"
linear_interval_seconds = 2
max_duration_seconds = 10

[[error_handling]]
code = 404
strategy = "send_to_error"

[[error_handling]]
code = "5.."
strategy = "retry_and_fail"

[[error_handling]]
code = "no_response"
strategy = "retry_and_skip"

[reused_inputs]
fields = ["id", "name"]

[reused_inputs.rename]
name = "customer_name"

[[output_schema]]
name = "id"
type = "string"

[[output_schema]]
name = "customer_name"
type = "string"
nullable = true

[[output_schema]]
name = "balance"
type = "double"

[http]
timeout_seconds = 15
user_agent = "customers-sync/1.0"

[http.headers]
Accept = "application/json"
"#;

    fn minimal(extra: &str) -> String {
        format!(
            r#"
[transform]
name = "minimal"
url = "https://api.example.com/items/{{id}}"

[transform.url_variables]
id = "id"

[[output_schema]]
name = "id"
type = "string"
{extra}
"#
        )
    }

    #[test]
    fn test_parse_full_config() {
        let settings = TransformSettings::from_toml_str(FULL).unwrap();

        assert_eq!(settings.transform.name, "customers");
        assert_eq!(
            settings.transform.url_variables.0,
            vec![
                ("region".to_string(), "region_code".to_string()),
                ("customer".to_string(), "id".to_string()),
            ]
        );
        assert_eq!(
            settings.transform.query_parameters.0,
            vec![
                ("format".to_string(), "json".to_string()),
                ("limit".to_string(), "10".to_string()),
            ]
        );
        assert_eq!(settings.error_handling[0].code, StatusCodePattern::Code(404));
        assert_eq!(
            settings.error_handling[1].code,
            StatusCodePattern::Pattern("5..".to_string())
        );
        assert_eq!(settings.output_schema[2].field_type, FieldType::Double);
        assert_eq!(settings.format.kind, FormatKind::Json);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_build_transform_config() {
        let settings = TransformSettings::from_toml_str(FULL).unwrap();
        let config = settings.build().unwrap();

        assert_eq!(
            config.retry_policy,
            RetryPolicy::Linear {
                interval: Duration::from_secs(2)
            }
        );
        assert_eq!(config.max_retry_duration, Duration::from_secs(10));
        assert_eq!(config.wait_time_between_pages, Some(Duration::from_millis(250)));
        assert_eq!(config.max_calls_per_second, Some(5.0));

        let classify = |status| config.error_handling.classify(status).after_retry;
        assert_eq!(classify(ResponseStatus::Code(404)), AfterRetry::RouteToError);
        assert_eq!(classify(ResponseStatus::Code(503)), AfterRetry::Stop);
        assert_eq!(classify(ResponseStatus::NoResponse), AfterRetry::Skip);
        assert_eq!(classify(ResponseStatus::Code(200)), AfterRetry::Success);

        assert!(config.reused_fields.is_reused("id"));
        assert!(config.reused_fields.is_reused("customer_name"));
        assert!(!config.reused_fields.is_reused("name"));
        assert_eq!(config.reused_fields.input_field_for("customer_name"), "name");

        let builder = UrlBuilder::new(
            config.url_template.clone(),
            config.url_variables.clone(),
            &config.query_parameters,
        );
        let url = builder
            .build(&Record::new().with("region_code", "eu").with("id", 42))
            .unwrap();
        assert_eq!(
            url,
            "https://api.example.com/eu/customers/42?format=json&limit=10&"
        );
    }

    #[test]
    fn test_defaults() {
        let settings = TransformSettings::from_toml_str(&minimal("")).unwrap();
        let config = settings.build().unwrap();

        assert_eq!(
            config.retry_policy,
            RetryPolicy::Exponential {
                base: Duration::from_millis(100)
            }
        );
        assert_eq!(config.max_retry_duration, Duration::from_secs(600));
        assert_eq!(config.wait_time_between_pages, None);
        assert_eq!(config.max_calls_per_second, None);
        assert!(settings.format.csv_has_header);
        assert!(matches!(settings.page_factory(), FormatPageFactory::Json(_)));
    }

    #[test]
    fn test_csv_format_selects_csv_pages() {
        let settings = TransformSettings::from_toml_str(&minimal(
            "\n[format]\ntype = \"csv\"\ncsv_has_header = false\ncsv_delimiter = \";\"\n",
        ))
        .unwrap();

        assert!(settings.validate().is_ok());
        assert!(matches!(settings.page_factory(), FormatPageFactory::Csv(_)));
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("DHT_TEST_API_HOST", "api.internal.test");

        let toml_content = minimal("").replace("api.example.com", "${DHT_TEST_API_HOST}");
        let settings = TransformSettings::from_toml_str(&toml_content).unwrap();
        assert_eq!(
            settings.transform.url,
            "https://api.internal.test/items/{id}"
        );

        std::env::remove_var("DHT_TEST_API_HOST");
    }

    #[test]
    fn test_unset_env_var_is_left_as_is() {
        let toml_content = minimal("").replace("minimal", "${DHT_TEST_SURELY_UNSET_VAR}");
        let settings = TransformSettings::from_toml_str(&toml_content).unwrap();
        assert_eq!(settings.transform.name, "${DHT_TEST_SURELY_UNSET_VAR}");
    }

    #[test]
    fn test_placeholder_in_host_is_accepted() {
        let toml_content = minimal("").replace("api.example.com", "{tenant}.example.com");
        let settings = TransformSettings::from_toml_str(&toml_content).unwrap();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_invalid_url_is_rejected() {
        let toml_content = minimal("").replace("https://api.example.com", "ftp://files");
        let settings = TransformSettings::from_toml_str(&toml_content).unwrap();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_linear_policy_requires_positive_interval() {
        let settings = TransformSettings::from_toml_str(&minimal(
            "\n[retry]\npolicy = \"linear\"\nlinear_interval_seconds = 0\n",
        ))
        .unwrap();
        assert!(matches!(
            settings.build(),
            Err(EtlError::InvalidConfigValueError { field, .. }) if field == "retry.linear_interval_seconds"
        ));
    }

    #[test]
    fn test_bad_error_handling_code_is_rejected() {
        let settings = TransformSettings::from_toml_str(&minimal(
            "\n[[error_handling]]\ncode = \"5xx\"\nstrategy = \"fail\"\n",
        ))
        .unwrap();
        assert!(matches!(
            settings.validate(),
            Err(EtlError::InvalidConfigValueError { field, .. }) if field == "error_handling.code"
        ));
    }

    #[test]
    fn test_unknown_strategy_fails_parsing() {
        let result = TransformSettings::from_toml_str(&minimal(
            "\n[[error_handling]]\ncode = 500\nstrategy = \"explode\"\n",
        ));
        assert!(matches!(
            result,
            Err(EtlError::ConfigValidationError { field, .. }) if field == "toml_parsing"
        ));
    }

    #[test]
    fn test_rename_targets_must_be_unique() {
        let settings = TransformSettings::from_toml_str(&minimal(
            "\n[reused_inputs.rename]\na = \"id\"\nb = \"id\"\n",
        ))
        .unwrap();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_reused_field_must_be_in_schema() {
        let settings = TransformSettings::from_toml_str(&minimal(
            "\n[reused_inputs]\nfields = [\"missing\"]\n",
        ))
        .unwrap();
        assert!(matches!(
            settings.validate(),
            Err(EtlError::InvalidConfigValueError { value, .. }) if value == "missing"
        ));
    }

    #[test]
    fn test_duplicate_schema_fields_are_rejected() {
        let settings = TransformSettings::from_toml_str(&minimal(
            "\n[[output_schema]]\nname = \"id\"\ntype = \"int\"\n",
        ))
        .unwrap();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_zero_rate_is_rejected() {
        let toml_content = minimal("").replace(
            "[transform.url_variables]",
            "max_calls_per_second = 0.0\n\n[transform.url_variables]",
        );
        let settings = TransformSettings::from_toml_str(&toml_content).unwrap();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(FULL.as_bytes()).unwrap();

        let settings = TransformSettings::from_file(temp_file.path()).unwrap();
        assert_eq!(settings.transform.name, "customers");
        assert!(settings.executor().is_ok());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = TransformSettings::from_file("/definitely/not/here.toml");
        assert!(matches!(result, Err(EtlError::IoError(_))));
    }
}
