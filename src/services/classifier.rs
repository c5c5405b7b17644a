//! Maps raw failure text onto a stable, retry-aware error taxonomy.
//!
//! Matching is a case-insensitive substring search evaluated in a fixed
//! order; the first rule that matches wins. The function is pure so workers
//! can depend on it without any setup.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Longest message carried on a classified error.
pub const MAX_MESSAGE_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Timeout,
    RateLimit,
    ProviderDown,
    Network,
    BadInput,
    Unknown,
}

impl ErrorCode {
    /// Malformed input will not succeed on retry; everything else might.
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorCode::BadInput)
    }

    fn fixed_message(self) -> Option<&'static str> {
        match self {
            ErrorCode::Timeout => Some("The analysis provider timed out"),
            ErrorCode::RateLimit => Some("The analysis provider rate limit was reached"),
            ErrorCode::ProviderDown => Some("The analysis provider is unavailable"),
            ErrorCode::Network => Some("A network error occurred while processing the photo"),
            ErrorCode::BadInput => Some("The photo or request was rejected as invalid"),
            ErrorCode::Unknown => None,
        }
    }
}

/// Ordered matching rules; first hit wins.
const RULES: &[(ErrorCode, &[&str])] = &[
    (ErrorCode::Timeout, &["timeout", "timed out"]),
    (ErrorCode::RateLimit, &["rate limit", "429", "too many requests"]),
    (
        ErrorCode::ProviderDown,
        &["500", "502", "503", "service unavailable", "provider error"],
    ),
    (
        ErrorCode::Network,
        &["network", "econnrefused", "enotfound", "fetch failed"],
    ),
    (ErrorCode::BadInput, &["invalid", "bad request", "400", "validation"]),
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClassifiedError {
    pub code: ErrorCode,
    pub message: String,
    pub retryable: bool,
}

impl ClassifiedError {
    /// Retryable UNKNOWN carrying `err`'s text, without pattern matching.
    ///
    /// For internal failures such as storage errors, whose messages embed ids
    /// that can contain status-like digits.
    pub fn unclassified<E>(err: &E) -> Self
    where
        E: std::fmt::Display + ?Sized,
    {
        Self {
            code: ErrorCode::Unknown,
            message: truncate(&err.to_string(), MAX_MESSAGE_CHARS),
            retryable: true,
        }
    }
}

/// Classify a raw failure message.
pub fn classify(raw: &str) -> ClassifiedError {
    let haystack = raw.to_lowercase();
    let code = RULES
        .iter()
        .find(|(_, needles)| needles.iter().any(|needle| haystack.contains(needle)))
        .map(|(code, _)| *code)
        .unwrap_or(ErrorCode::Unknown);

    let message = match code.fixed_message() {
        Some(fixed) => fixed.to_string(),
        None => truncate(raw, MAX_MESSAGE_CHARS),
    };

    ClassifiedError {
        code,
        message,
        retryable: code.is_retryable(),
    }
}

/// Classify any error by its display text.
pub fn classify_error<E>(err: &E) -> ClassifiedError
where
    E: std::fmt::Display + ?Sized,
{
    classify(&err.to_string())
}

fn truncate(raw: &str, max_chars: usize) -> String {
    match raw.char_indices().nth(max_chars) {
        Some((idx, _)) => raw[..idx].to_string(),
        None => raw.to_string(),
    }
}
