use std::error::Error as StdError;
use std::fmt;

/// Normalized failure categories surfaced by every provider adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Connect, transport, or body read failure.
    NetworkFailure,
    /// The vendor answered with an error status or an error envelope.
    VendorRejected,
    /// The vendor declined to generate (content filter, safety block, refusal).
    SafetyBlocked,
    /// A streamed chunk or response body could not be decoded.
    DecodeFailure,
    /// The user stopped the generation.
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NetworkFailure => "network failure",
            ErrorKind::VendorRejected => "vendor rejected",
            ErrorKind::SafetyBlocked => "safety blocked",
            ErrorKind::DecodeFailure => "decode failure",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatError {
    kind: ErrorKind,
    message: String,
    status: Option<u16>,
}

impl ChatError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NetworkFailure, message)
    }

    /// Vendor error with an HTTP status and raw body; the body is formatted
    /// for display.
    pub fn vendor_rejected(status: Option<u16>, body: &str) -> Self {
        let formatted = format_api_error(body);
        let message = match status {
            Some(code) => format!("HTTP {code}\n{formatted}"),
            None => formatted,
        };
        Self {
            kind: ErrorKind::VendorRejected,
            message,
            status,
        }
    }

    pub fn safety_blocked(reason: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::SafetyBlocked,
            format!("Generation was blocked by the provider: {}", reason.into()),
        )
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DecodeFailure, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl StdError for ChatError {}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ChatError::decode(err.to_string())
        } else if let Some(status) = err.status() {
            ChatError::vendor_rejected(Some(status.as_u16()), &err.to_string())
        } else {
            ChatError::network(err.to_string())
        }
    }
}

fn extract_error_summary(value: &serde_json::Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| {
            value.get("error").and_then(|v| match v {
                serde_json::Value::String(s) => Some(s.to_string()),
                serde_json::Value::Object(map) => map
                    .get("message")
                    .and_then(|message| message.as_str().map(str::to_owned)),
                _ => None,
            })
        })
        .or_else(|| {
            value
                .get("message")
                .and_then(|v| v.as_str().map(str::to_owned))
        })
        // Google wraps stream errors in a single-element array.
        .or_else(|| {
            value
                .as_array()
                .and_then(|items| items.first())
                .and_then(extract_error_summary)
        });

    summary.map(|text| {
        let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
        collapsed.trim().to_string()
    })
}

pub fn format_api_error(error_text: &str) -> String {
    let trimmed = error_text.trim();

    if trimmed.is_empty() {
        return "API Error:\n```\n<empty>\n```".to_string();
    }

    if let Ok(json_value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Ok(pretty_json) = serde_json::to_string_pretty(&json_value) {
            if let Some(summary) = extract_error_summary(&json_value) {
                if !summary.is_empty() {
                    return format!("API Error: {}\n```json\n{}\n```", summary, pretty_json);
                }
            }
            return format!("API Error:\n```json\n{}\n```", pretty_json);
        }
    }

    if trimmed.starts_with('<') && trimmed.ends_with('>') {
        format!("API Error:\n```xml\n{}\n```", trimmed)
    } else {
        format!("API Error:\n```\n{}\n```", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_api_error_prettifies_json_with_summary() {
        let raw = r#"{"error":{"message":"model overloaded","type":"invalid_request_error"}}"#;
        let formatted = format_api_error(raw);

        let expected = r#"API Error: model overloaded
```json
{
  "error": {
    "message": "model overloaded",
    "type": "invalid_request_error"
  }
}
```"#;
        assert_eq!(formatted, expected);
    }

    #[test]
    fn format_api_error_handles_json_without_summary() {
        let raw = r#"{"status":"failed"}"#;
        let formatted = format_api_error(raw);

        let expected = r#"API Error:
```json
{
  "status": "failed"
}
```"#;
        assert_eq!(formatted, expected);
    }

    #[test]
    fn format_api_error_reads_google_error_arrays() {
        let raw = r#"[{"error":{"code":400,"message":"API key not valid"}}]"#;
        let formatted = format_api_error(raw);
        assert!(formatted.starts_with("API Error: API key not valid\n```json"));
    }

    #[test]
    fn format_api_error_handles_xml_and_plaintext() {
        assert_eq!(
            format_api_error("<error>bad</error>"),
            "API Error:\n```xml\n<error>bad</error>\n```"
        );
        assert_eq!(
            format_api_error("api failure"),
            "API Error:\n```\napi failure\n```"
        );
        assert_eq!(format_api_error("   "), "API Error:\n```\n<empty>\n```");
    }

    #[test]
    fn vendor_rejected_keeps_status_and_kind() {
        let err = ChatError::vendor_rejected(Some(429), r#"{"error":{"message":"slow down"}}"#);
        assert_eq!(err.kind(), ErrorKind::VendorRejected);
        assert_eq!(err.status(), Some(429));
        assert!(err.message().starts_with("HTTP 429\nAPI Error: slow down"));
    }
}
