use reqwest::StatusCode;
use serde_json::Value;

use crate::logging::redact::redact_secrets;
use crate::relay::RelayError;

/// Failure of one Bot API call.
#[derive(Debug, Clone)]
pub struct TelegramApiError {
    pub status: Option<StatusCode>,
    pub error_code: Option<i64>,
    pub retry_after_secs: Option<u64>,
    pub body: String,
}

impl TelegramApiError {
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        let body = if err.is_timeout() {
            format!("timed out: {}", err.without_url())
        } else {
            err.without_url().to_string()
        };
        Self {
            status: None,
            error_code: None,
            retry_after_secs: None,
            body: redact_secrets(&body),
        }
    }

    pub(crate) fn local(body: impl Into<String>) -> Self {
        Self {
            status: None,
            error_code: None,
            retry_after_secs: None,
            body: body.into(),
        }
    }

    /// Build from a non-success HTTP status or an `ok: false` envelope.
    pub(crate) fn from_response(status: StatusCode, data: Option<&Value>, raw: &str) -> Self {
        Self {
            status: Some(status),
            error_code: data.and_then(telegram_api_error_code),
            retry_after_secs: data.and_then(telegram_api_error_retry_after_secs),
            body: redact_secrets(
                data.map(|d| telegram_api_error_description(d, raw))
                    .unwrap_or(raw),
            ),
        }
    }

    fn effective_code(&self) -> Option<i64> {
        self.error_code
            .or_else(|| self.status.map(|s| i64::from(s.as_u16())))
    }

    /// The API understood the request and refused it (bad file, too big,
    /// wrong type). Throttling and timeouts are not rejections.
    pub fn is_rejection(&self) -> bool {
        matches!(self.effective_code(), Some(code) if (400..500).contains(&code) && code != 408 && code != 429)
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self.effective_code(), Some(401) | Some(403))
    }

    pub fn is_rate_limited(&self) -> bool {
        self.effective_code() == Some(429)
    }

    /// `editMessage*` with identical content.
    pub fn is_not_modified(&self) -> bool {
        self.body.contains("message is not modified")
    }
}

impl std::fmt::Display for TelegramApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.status, self.error_code) {
            (Some(status), Some(code)) => {
                write!(f, "status={status}, error_code={code}, body={}", self.body)
            }
            (Some(status), None) => write!(f, "status={status}, body={}", self.body),
            (None, Some(code)) => write!(f, "error_code={code}, body={}", self.body),
            (None, None) => write!(f, "{}", self.body),
        }
    }
}

impl std::error::Error for TelegramApiError {}

impl From<TelegramApiError> for RelayError {
    fn from(err: TelegramApiError) -> Self {
        if err.is_rejection() {
            RelayError::Rejected(err.body)
        } else {
            RelayError::Transport(err.to_string())
        }
    }
}

pub(crate) fn telegram_api_error_retry_after_secs(data: &Value) -> Option<u64> {
    data.get("parameters")
        .and_then(|v| v.get("retry_after"))
        .and_then(Value::as_u64)
}

pub(crate) fn telegram_api_error_code(data: &Value) -> Option<i64> {
    data.get("error_code").and_then(Value::as_i64)
}

pub(crate) fn telegram_api_error_description<'a>(data: &'a Value, fallback: &'a str) -> &'a str {
    data.get("description")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(fallback)
}
