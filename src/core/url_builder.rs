use crate::domain::model::Record;
use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Cannot find required field {field}")]
pub struct MissingInputField {
    pub placeholder: String,
    pub field: String,
}

/// 以輸入記錄的欄位值替換 URL 模板中的 `{name}`，再接上預先組好的查詢字串
#[derive(Debug, Clone)]
pub struct UrlBuilder {
    template: String,
    variables: Vec<(String, String)>,
    query: String,
}

impl UrlBuilder {
    /// `variables` maps placeholder name to input field name, in substitution order.
    pub fn new(
        template: impl Into<String>,
        variables: Vec<(String, String)>,
        query_parameters: &[(String, String)],
    ) -> Self {
        Self {
            template: template.into(),
            variables,
            query: prebuild_query(query_parameters),
        }
    }

    pub fn build(&self, input: &Record) -> Result<String, MissingInputField> {
        let mut url = self.template.clone();

        for (name, field) in &self.variables {
            let Some(value) = input.get_string(field) else {
                return Err(MissingInputField {
                    placeholder: name.clone(),
                    field: field.clone(),
                });
            };

            let placeholder = format!("{{{}}}", name);
            if !url.contains(&placeholder) {
                tracing::warn!("Placeholder {} not found in url {}", placeholder, url);
                continue;
            }
            url = url.replace(&placeholder, &value);
        }

        let leftovers: Vec<&str> = placeholder_pattern()
            .find_iter(&url)
            .map(|m| m.as_str())
            .collect();
        if !leftovers.is_empty() {
            tracing::warn!("Unresolved placeholders {:?} left in url {}", leftovers, url);
        }

        url.push_str(&self.query);
        Ok(url)
    }
}

/// `?k=v&k2=v2&`; the trailing separator is kept.
pub fn prebuild_query(parameters: &[(String, String)]) -> String {
    if parameters.is_empty() {
        return String::new();
    }

    let mut query = String::from("?");
    for (key, value) in parameters {
        query.push_str(key);
        query.push('=');
        query.push_str(value);
        query.push('&');
    }
    query
}

pub(crate) fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{[A-Za-z0-9_.\-]+\}").expect("placeholder pattern is valid"))
}
