//! Status code → retry / after-retry policy.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of one attempt, as seen by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    Code(u16),
    /// Connection failure: no response was received at all.
    NoResponse,
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(f, "{}", code),
            Self::NoResponse => f.write_str("no response"),
        }
    }
}

/// What happens once retrying stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterRetry {
    Success,
    /// Abort the whole job.
    Stop,
    /// Drop the record without emitting anything.
    Skip,
    /// Paginate the response but flag its entries as errors.
    RouteToError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorPolicy {
    pub should_retry: bool,
    pub after_retry: AfterRetry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStrategy {
    Success,
    Fail,
    Skip,
    SendToError,
    RetryAndSuccess,
    RetryAndFail,
    RetryAndSkip,
    RetryAndSendToError,
}

impl ErrorStrategy {
    pub fn policy(self) -> ErrorPolicy {
        let (should_retry, after_retry) = match self {
            Self::Success => (false, AfterRetry::Success),
            Self::Fail => (false, AfterRetry::Stop),
            Self::Skip => (false, AfterRetry::Skip),
            Self::SendToError => (false, AfterRetry::RouteToError),
            Self::RetryAndSuccess => (true, AfterRetry::Success),
            Self::RetryAndFail => (true, AfterRetry::Stop),
            Self::RetryAndSkip => (true, AfterRetry::Skip),
            Self::RetryAndSendToError => (true, AfterRetry::RouteToError),
        };
        ErrorPolicy {
            should_retry,
            after_retry,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid status code pattern '{0}': expected digits and '.' wildcards, or 'no_response'")]
pub struct InvalidStatusPattern(pub String);

/// Matches a status code exactly (`404`), by digit wildcard (`5..`), or the no-response outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusMatcher {
    Pattern(String),
    NoResponse,
}

impl StatusMatcher {
    pub const NO_RESPONSE: &'static str = "no_response";

    pub fn parse(pattern: &str) -> Result<Self, InvalidStatusPattern> {
        let pattern = pattern.trim();
        if pattern.eq_ignore_ascii_case(Self::NO_RESPONSE) {
            return Ok(Self::NoResponse);
        }
        let well_formed = !pattern.is_empty()
            && pattern.len() <= 3
            && pattern.chars().all(|c| c.is_ascii_digit() || c == '.');
        if !well_formed {
            return Err(InvalidStatusPattern(pattern.to_string()));
        }
        Ok(Self::Pattern(pattern.to_string()))
    }

    pub fn matches(&self, status: ResponseStatus) -> bool {
        match (self, status) {
            (Self::NoResponse, ResponseStatus::NoResponse) => true,
            (Self::Pattern(pattern), ResponseStatus::Code(code)) => {
                let code = code.to_string();
                code.len() == pattern.len()
                    && pattern
                        .chars()
                        .zip(code.chars())
                        .all(|(p, c)| p == '.' || p == c)
            }
            _ => false,
        }
    }
}

/// Ordered table; the first matching entry wins.
#[derive(Debug, Clone, Default)]
pub struct ErrorClassifier {
    entries: Vec<(StatusMatcher, ErrorStrategy)>,
}

impl ErrorClassifier {
    pub fn new(entries: Vec<(StatusMatcher, ErrorStrategy)>) -> Self {
        Self { entries }
    }

    pub fn from_patterns<'a, I>(rules: I) -> Result<Self, InvalidStatusPattern>
    where
        I: IntoIterator<Item = (&'a str, ErrorStrategy)>,
    {
        let entries = rules
            .into_iter()
            .map(|(pattern, strategy)| Ok((StatusMatcher::parse(pattern)?, strategy)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { entries })
    }

    pub fn strategy(&self, status: ResponseStatus) -> ErrorStrategy {
        if let Some((_, strategy)) = self.entries.iter().find(|(m, _)| m.matches(status)) {
            return *strategy;
        }

        match status {
            ResponseStatus::Code(code) if (200..300).contains(&code) => ErrorStrategy::Success,
            ResponseStatus::NoResponse => {
                tracing::warn!(
                    "No error handling strategy defined for '{}'. Retrying, then failing. Please correct [[error_handling]].",
                    StatusMatcher::NO_RESPONSE
                );
                ErrorStrategy::RetryAndFail
            }
            ResponseStatus::Code(code) => {
                tracing::warn!(
                    "No error handling strategy defined for HTTP status code '{}'. Please correct [[error_handling]].",
                    code
                );
                ErrorStrategy::Fail
            }
        }
    }

    pub fn classify(&self, status: ResponseStatus) -> ErrorPolicy {
        self.strategy(status).policy()
    }
}
