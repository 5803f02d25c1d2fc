use serde::Deserialize;
use tracing::warn;

use crate::core::error::ChatError;
use crate::core::generation::{ModelInfo, ProviderConfig, ProviderKind};
use crate::utils::auth::add_auth_headers;
use crate::utils::url::construct_api_url;

#[derive(Deserialize)]
struct ListedModel {
    id: String,
    created: Option<i64>,
    created_at: Option<String>,
    display_name: Option<String>,
}

#[derive(Deserialize)]
struct ModelsResponse {
    data: Vec<ListedModel>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleModel {
    name: String,
    display_name: Option<String>,
    #[serde(default)]
    supported_generation_methods: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleModelsResponse {
    #[serde(default)]
    models: Vec<GoogleModel>,
    next_page_token: Option<String>,
}

/// Largest page the Gemini model listing accepts.
const GOOGLE_PAGE_SIZE: &str = "1000";
const MAX_PAGES: usize = 50;

/// One page of a model listing and the token for the next one, if any.
pub struct ModelPage {
    pub models: Vec<ModelInfo>,
    pub next_page_token: Option<String>,
}

/// Lists every model the provider offers, following Gemini page tokens.
pub async fn fetch_models(
    client: &reqwest::Client,
    provider: &ProviderConfig,
) -> Result<Vec<ModelInfo>, ChatError> {
    let url = construct_api_url(&provider.base_url, "models");
    let mut models = Vec::new();
    let mut page_token: Option<String> = None;

    for _ in 0..MAX_PAGES {
        let mut request = client
            .get(&url)
            .header("Content-Type", "application/json");
        if provider.kind == ProviderKind::Google {
            request = request.query(&[("pageSize", GOOGLE_PAGE_SIZE)]);
            if let Some(token) = page_token.as_deref() {
                request = request.query(&[("pageToken", token)]);
            }
        }
        let response = add_auth_headers(request, provider).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ChatError::vendor_rejected(Some(status), &error_text));
        }

        let body = response.text().await?;
        let page = parse_model_page(provider.kind, &body)?;
        models.extend(page.models);
        match page.next_page_token {
            Some(token) if page_token.as_deref() != Some(token.as_str()) => {
                page_token = Some(token);
            }
            _ => {
                sort_models(&mut models);
                return Ok(models);
            }
        }
    }

    warn!(provider = %provider.id, pages = MAX_PAGES, "model listing truncated");
    sort_models(&mut models);
    Ok(models)
}

pub fn parse_models(kind: ProviderKind, body: &str) -> Result<Vec<ModelInfo>, ChatError> {
    parse_model_page(kind, body).map(|page| page.models)
}

/// Parses one listing response. Only Gemini listings are paged; blank
/// tokens count as the last page.
pub fn parse_model_page(kind: ProviderKind, body: &str) -> Result<ModelPage, ChatError> {
    let decode_error = |err: serde_json::Error| ChatError::decode(format!("model list: {err}"));
    match kind {
        ProviderKind::Google => {
            let listed: GoogleModelsResponse = serde_json::from_str(body).map_err(decode_error)?;
            let next_page_token = listed
                .next_page_token
                .filter(|token| !token.is_empty());
            let models = listed
                .models
                .into_iter()
                .filter(|model| {
                    model.supported_generation_methods.is_empty()
                        || model
                            .supported_generation_methods
                            .iter()
                            .any(|method| method == "generateContent")
                })
                .map(|model| {
                    let code = model.name.trim_start_matches("models/").to_string();
                    ModelInfo {
                        display_name: model.display_name.unwrap_or_else(|| code.clone()),
                        code,
                        created: None,
                    }
                })
                .collect();
            Ok(ModelPage {
                models,
                next_page_token,
            })
        }
        ProviderKind::OpenAi | ProviderKind::Anthropic => {
            let listed: ModelsResponse = serde_json::from_str(body).map_err(decode_error)?;
            let models = listed
                .data
                .into_iter()
                .map(|model| {
                    let created = model.created.or_else(|| {
                        model
                            .created_at
                            .as_deref()
                            .and_then(|raw| chrono::DateTime::parse_from_rfc3339(raw).ok())
                            .map(|stamp| stamp.timestamp())
                    });
                    ModelInfo {
                        display_name: model.display_name.unwrap_or_else(|| model.id.clone()),
                        code: model.id,
                        created,
                    }
                })
                .collect();
            Ok(ModelPage {
                models,
                next_page_token: None,
            })
        }
    }
}

/// Newest first; models without a creation date sort after dated ones, by
/// code.
pub fn sort_models(models: &mut [ModelInfo]) {
    models.sort_by(|a, b| match (a.created, b.created) {
        (Some(a_created), Some(b_created)) => b_created.cmp(&a_created),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.code.cmp(&b.code),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_utils::test_provider;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answers one connection per body, in order, and returns the request
    /// lines it saw.
    async fn serve_pages(bodies: Vec<&'static str>) -> (String, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let mut request_lines = Vec::new();
            for body in bodies {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|window| window == b"\r\n\r\n") {
                    let read = socket.read(&mut chunk).await.unwrap();
                    if read == 0 {
                        break;
                    }
                    buf.extend_from_slice(&chunk[..read]);
                }
                let head = String::from_utf8_lossy(&buf);
                request_lines.push(head.lines().next().unwrap_or_default().to_string());
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
            }
            request_lines
        });
        (format!("http://{addr}/v1beta"), handle)
    }

    #[tokio::test]
    async fn google_listing_follows_page_tokens() {
        let (base_url, server) = serve_pages(vec![
            r#"{"models":[{"name":"models/gemini-a"}],"nextPageToken":"tok-2"}"#,
            r#"{"models":[{"name":"models/gemini-b"}]}"#,
        ])
        .await;
        let mut provider = test_provider(ProviderKind::Google);
        provider.base_url = base_url;

        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        let models = fetch_models(&client, &provider).await.unwrap();
        let codes: Vec<&str> = models.iter().map(|m| m.code.as_str()).collect();
        assert_eq!(codes, vec!["gemini-a", "gemini-b"]);

        let requests = server.await.unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].starts_with("GET /v1beta/models?pageSize=1000 "));
        assert!(requests[1].contains("pageToken=tok-2"));
    }

    #[test]
    fn openai_models_sort_newest_first() {
        let body = r#"{"data":[
            {"id":"old","created":100},
            {"id":"undated"},
            {"id":"new","created":200}
        ]}"#;
        let mut models = parse_models(ProviderKind::OpenAi, body).unwrap();
        sort_models(&mut models);
        let codes: Vec<&str> = models.iter().map(|m| m.code.as_str()).collect();
        assert_eq!(codes, vec!["new", "old", "undated"]);
    }

    #[test]
    fn anthropic_created_at_is_parsed() {
        let body = r#"{"data":[
            {"id":"claude-a","created_at":"2024-01-01T00:00:00Z","display_name":"Claude A"},
            {"id":"claude-b","created_at":"2025-01-01T00:00:00Z"}
        ]}"#;
        let mut models = parse_models(ProviderKind::Anthropic, body).unwrap();
        sort_models(&mut models);
        assert_eq!(models[0].code, "claude-b");
        assert_eq!(models[1].display_name, "Claude A");
    }

    #[test]
    fn google_models_drop_prefix_and_non_generative_entries() {
        let body = r#"{"models":[
            {"name":"models/gemini-2.0-flash","displayName":"Gemini 2.0 Flash","supportedGenerationMethods":["generateContent","countTokens"]},
            {"name":"models/embedding-001","supportedGenerationMethods":["embedContent"]}
        ]}"#;
        let models = parse_models(ProviderKind::Google, body).unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].code, "gemini-2.0-flash");
        assert_eq!(models[0].display_name, "Gemini 2.0 Flash");
    }

    #[test]
    fn google_pages_carry_the_next_token() {
        let first = r#"{"models":[{"name":"models/gemini-a"}],"nextPageToken":"tok-2"}"#;
        let page = parse_model_page(ProviderKind::Google, first).unwrap();
        assert_eq!(page.models[0].code, "gemini-a");
        assert_eq!(page.next_page_token.as_deref(), Some("tok-2"));

        let last = r#"{"models":[{"name":"models/gemini-b"}],"nextPageToken":""}"#;
        assert!(parse_model_page(ProviderKind::Google, last)
            .unwrap()
            .next_page_token
            .is_none());

        let openai = parse_model_page(ProviderKind::OpenAi, r#"{"data":[]}"#).unwrap();
        assert!(openai.next_page_token.is_none());
    }

    #[test]
    fn malformed_lists_are_decode_failures() {
        let err = parse_models(ProviderKind::OpenAi, "not json").unwrap_err();
        assert_eq!(err.kind(), crate::core::error::ErrorKind::DecodeFailure);
    }
}
