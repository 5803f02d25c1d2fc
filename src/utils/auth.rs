//! Provider-specific authentication headers.

use crate::core::generation::{ProviderConfig, ProviderKind};

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Adds the auth headers each protocol family expects:
/// - OpenAI-compatible: `Authorization: Bearer`
/// - Anthropic: `x-api-key` plus `anthropic-version`
/// - Google: `x-goog-api-key`
pub fn add_auth_headers(
    request: reqwest::RequestBuilder,
    provider: &ProviderConfig,
) -> reqwest::RequestBuilder {
    let api_key = provider.api_key.as_str();
    match provider.kind {
        ProviderKind::Anthropic => request
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION),
        ProviderKind::Google => request.header("x-goog-api-key", api_key),
        ProviderKind::OpenAi => request.header("Authorization", format!("Bearer {api_key}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_utils::test_provider;

    fn built_headers(kind: ProviderKind) -> reqwest::header::HeaderMap {
        let client = reqwest::Client::new();
        let request = client.get("https://example.com");
        add_auth_headers(request, &test_provider(kind))
            .build()
            .expect("request builds")
            .headers()
            .clone()
    }

    #[test]
    fn openai_uses_bearer_tokens() {
        let headers = built_headers(ProviderKind::OpenAi);
        assert_eq!(headers["authorization"], "Bearer test-key");
        assert!(headers.get("x-api-key").is_none());
    }

    #[test]
    fn anthropic_uses_api_key_and_version() {
        let headers = built_headers(ProviderKind::Anthropic);
        assert_eq!(headers["x-api-key"], "test-key");
        assert_eq!(headers["anthropic-version"], ANTHROPIC_VERSION);
        assert!(headers.get("authorization").is_none());
    }

    #[test]
    fn google_uses_goog_api_key() {
        let headers = built_headers(ProviderKind::Google);
        assert_eq!(headers["x-goog-api-key"], "test-key");
    }
}
