//! Vendor adapters translating the normalized conversation into provider
//! requests and provider output back into [`StreamEvent`]s.
//!
//! [`ProviderAdapter`] is a closed set: one variant per wire protocol family.
//! Every variant exposes the same three operations (streaming generation,
//! one-shot generation, connectivity check) and shares the SSE reader in
//! [`sse`].

pub mod anthropic;
pub mod google;
pub mod openai;
pub mod sse;

use std::collections::BTreeMap;

use futures_util::stream::BoxStream;
use tracing::debug;

use crate::core::error::ChatError;
use crate::core::generation::{GenerationConfig, ProviderConfig, ProviderKind};
use crate::core::ids::random_token;
use crate::core::message::{Message, ToolCall};
use crate::utils::auth::add_auth_headers;

/// Fixed prompt used by the connectivity check.
pub const TEST_PROMPT: &str = "Respond with just the word Test";

/// Lazy, finite sequence of normalized output events. Fails at most once, as
/// its final item.
pub type DeltaStream = BoxStream<'static, Result<StreamEvent, ChatError>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Text(String),
    ToolCall(ToolCallDelta),
}

impl StreamEvent {
    pub fn is_empty_text(&self) -> bool {
        matches!(self, StreamEvent::Text(text) if text.is_empty())
    }
}

/// Fragment of a tool call. Fragments sharing an `index` belong to the same
/// call and are merged in arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ToolCallDelta {
    pub index: usize,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

#[derive(Debug, Clone, Default)]
pub struct ToolCallAccumulator {
    calls: BTreeMap<usize, PartialToolCall>,
}

impl ToolCallAccumulator {
    pub fn apply(&mut self, delta: ToolCallDelta) {
        let entry = self.calls.entry(delta.index).or_default();
        if let Some(id) = delta.id.filter(|id| !id.is_empty()) {
            entry.id = id;
        }
        if let Some(name) = delta.name.filter(|name| !name.is_empty()) {
            entry.name = name;
        }
        if let Some(arguments) = delta.arguments {
            entry.arguments.push_str(&arguments);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Completed calls in index order. Calls that never received a name are
    /// dropped; missing ids are generated.
    pub fn finish(self) -> Vec<ToolCall> {
        self.calls
            .into_values()
            .filter(|call| !call.name.is_empty())
            .map(|call| ToolCall {
                id: if call.id.is_empty() {
                    format!("call_{}", random_token())
                } else {
                    call.id
                },
                name: call.name,
                arguments: if call.arguments.trim().is_empty() {
                    "{}".to_string()
                } else {
                    call.arguments
                },
            })
            .collect()
    }
}

/// Result of a non-streaming generation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Completion {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

impl Completion {
    pub fn from_events(events: impl IntoIterator<Item = StreamEvent>) -> Self {
        let mut text = String::new();
        let mut tools = ToolCallAccumulator::default();
        for event in events {
            match event {
                StreamEvent::Text(delta) => text.push_str(&delta),
                StreamEvent::ToolCall(delta) => tools.apply(delta),
            }
        }
        Self {
            text,
            tool_calls: tools.finish(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.tool_calls.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderAdapter {
    OpenAi,
    Anthropic,
    Google,
}

impl ProviderAdapter {
    pub fn for_kind(kind: ProviderKind) -> Self {
        match kind {
            ProviderKind::OpenAi => ProviderAdapter::OpenAi,
            ProviderKind::Anthropic => ProviderAdapter::Anthropic,
            ProviderKind::Google => ProviderAdapter::Google,
        }
    }

    pub fn kind(self) -> ProviderKind {
        match self {
            ProviderAdapter::OpenAi => ProviderKind::OpenAi,
            ProviderAdapter::Anthropic => ProviderKind::Anthropic,
            ProviderAdapter::Google => ProviderKind::Google,
        }
    }

    /// Opens a streaming generation. Connection and status failures are
    /// returned here; failures after the first byte arrive through the
    /// stream.
    pub async fn stream_response(
        self,
        client: &reqwest::Client,
        provider: &ProviderConfig,
        history: &[Message],
        config: &GenerationConfig,
    ) -> Result<DeltaStream, ChatError> {
        let response = self
            .http_request(client, provider, history, config, true)
            .send()
            .await?;
        let response = ensure_success(response).await?;
        let bytes = Box::pin(response.bytes_stream());

        Ok(match self {
            ProviderAdapter::OpenAi => {
                sse::event_stream(bytes, openai::OpenAiStreamDecoder::default())
            }
            ProviderAdapter::Anthropic => {
                sse::event_stream(bytes, anthropic::AnthropicStreamDecoder::default())
            }
            ProviderAdapter::Google => {
                sse::event_stream(bytes, google::GoogleStreamDecoder::default())
            }
        })
    }

    pub async fn non_streaming_response(
        self,
        client: &reqwest::Client,
        provider: &ProviderConfig,
        history: &[Message],
        config: &GenerationConfig,
    ) -> Result<Completion, ChatError> {
        let response = self
            .http_request(client, provider, history, config, false)
            .send()
            .await?;
        let response = ensure_success(response).await?;
        let body = response.text().await?;
        self.parse_completion(&body)
    }

    /// Connectivity check: `true` only when the model produced a non-empty
    /// answer to [`TEST_PROMPT`]. Every failure maps to `false`.
    pub async fn test_model(
        self,
        client: &reqwest::Client,
        provider: &ProviderConfig,
        model: &str,
    ) -> bool {
        let mut config = GenerationConfig::new(provider.id.clone(), model);
        config.stream = false;
        config.auto_title = false;
        let history = [Message::user(TEST_PROMPT)];

        match self
            .non_streaming_response(client, provider, &history, &config)
            .await
        {
            Ok(completion) => !completion.is_empty(),
            Err(err) => {
                debug!(provider = %provider.id, model, kind = %err.kind(), "model check failed");
                false
            }
        }
    }

    pub fn parse_completion(self, body: &str) -> Result<Completion, ChatError> {
        match self {
            ProviderAdapter::OpenAi => openai::parse_completion(body),
            ProviderAdapter::Anthropic => anthropic::parse_completion(body),
            ProviderAdapter::Google => google::parse_completion(body),
        }
    }

    /// Runs a complete recorded SSE body through this adapter's decoder.
    pub fn decode_transcript(self, body: &[u8]) -> Vec<Result<StreamEvent, ChatError>> {
        match self {
            ProviderAdapter::OpenAi => {
                sse::decode_all(body, openai::OpenAiStreamDecoder::default())
            }
            ProviderAdapter::Anthropic => {
                sse::decode_all(body, anthropic::AnthropicStreamDecoder::default())
            }
            ProviderAdapter::Google => {
                sse::decode_all(body, google::GoogleStreamDecoder::default())
            }
        }
    }

    pub fn endpoint(self, provider: &ProviderConfig, model: &str, stream: bool) -> String {
        match self {
            ProviderAdapter::OpenAi => openai::endpoint(&provider.base_url),
            ProviderAdapter::Anthropic => anthropic::endpoint(&provider.base_url),
            ProviderAdapter::Google => google::endpoint(&provider.base_url, model, stream),
        }
    }

    fn http_request(
        self,
        client: &reqwest::Client,
        provider: &ProviderConfig,
        history: &[Message],
        config: &GenerationConfig,
        stream: bool,
    ) -> reqwest::RequestBuilder {
        let url = self.endpoint(provider, &config.model, stream);
        let request = client
            .post(url)
            .header("Content-Type", "application/json");
        let request = add_auth_headers(request, provider);

        match self {
            ProviderAdapter::OpenAi => {
                request.json(&openai::build_request(history, config, stream))
            }
            ProviderAdapter::Anthropic => {
                request.json(&anthropic::build_request(history, config, stream))
            }
            ProviderAdapter::Google => request.json(&google::build_request(history, config)),
        }
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ChatError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "<no body>".to_string());
    Err(ChatError::vendor_rejected(Some(status), &error_text))
}

/// Parses a tool call's raw argument text into a JSON object, falling back to
/// an empty object for malformed model output.
pub(crate) fn arguments_value(arguments: &str) -> serde_json::Value {
    serde_json::from_str(arguments)
        .ok()
        .filter(serde_json::Value::is_object)
        .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use crate::utils::test_utils::test_provider;

    #[test]
    fn accumulator_merges_fragments_by_index() {
        let mut tools = ToolCallAccumulator::default();
        tools.apply(ToolCallDelta {
            index: 1,
            id: Some("call-b".into()),
            name: Some("second".into()),
            arguments: Some("{}".into()),
        });
        tools.apply(ToolCallDelta {
            index: 0,
            id: Some("call-a".into()),
            name: Some("lookup".into()),
            arguments: Some("{\"q\":".into()),
        });
        tools.apply(ToolCallDelta {
            index: 0,
            arguments: Some("\"rust\"}".into()),
            ..ToolCallDelta::default()
        });

        let calls = tools.finish();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "call-a");
        assert_eq!(calls[0].arguments, "{\"q\":\"rust\"}");
        assert_eq!(calls[1].name, "second");
    }

    #[test]
    fn accumulator_drops_nameless_calls_and_fills_ids() {
        let mut tools = ToolCallAccumulator::default();
        tools.apply(ToolCallDelta {
            index: 0,
            arguments: Some("{}".into()),
            ..ToolCallDelta::default()
        });
        tools.apply(ToolCallDelta {
            index: 1,
            name: Some("now".into()),
            ..ToolCallDelta::default()
        });

        let calls = tools.finish();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].id.starts_with("call_"));
        assert_eq!(calls[0].arguments, "{}");
    }

    #[test]
    fn completion_concatenates_text_in_order() {
        let completion = Completion::from_events(vec![
            StreamEvent::Text("Hi".into()),
            StreamEvent::Text(" there".into()),
        ]);
        assert_eq!(completion.text, "Hi there");
        assert!(!completion.is_empty());
        assert!(Completion::default().is_empty());
    }

    #[test]
    fn adapters_map_one_to_one_onto_provider_kinds() {
        for kind in [ProviderKind::OpenAi, ProviderKind::Anthropic, ProviderKind::Google] {
            assert_eq!(ProviderAdapter::for_kind(kind).kind(), kind);
        }
    }

    #[test]
    fn endpoints_follow_each_vendor_layout() {
        let openai = test_provider(ProviderKind::OpenAi);
        assert_eq!(
            ProviderAdapter::OpenAi.endpoint(&openai, "gpt-4o", true),
            "https://api.test.com/v1/chat/completions"
        );
        let anthropic = test_provider(ProviderKind::Anthropic);
        assert_eq!(
            ProviderAdapter::Anthropic.endpoint(&anthropic, "claude", true),
            "https://api.test.com/v1/messages"
        );
        let google = test_provider(ProviderKind::Google);
        assert_eq!(
            ProviderAdapter::Google.endpoint(&google, "gemini-2.0-flash", true),
            "https://api.test.com/v1/models/gemini-2.0-flash:streamGenerateContent?alt=sse"
        );
        assert_eq!(
            ProviderAdapter::Google.endpoint(&google, "gemini-2.0-flash", false),
            "https://api.test.com/v1/models/gemini-2.0-flash:generateContent"
        );
    }

    #[test]
    fn malformed_arguments_become_empty_objects() {
        assert_eq!(arguments_value("{\"a\":1}")["a"], 1);
        assert!(arguments_value("not json").as_object().unwrap().is_empty());
        assert!(arguments_value("[1,2]").as_object().unwrap().is_empty());
    }

    #[tokio::test]
    async fn model_check_swallows_connection_failures() {
        let mut provider = test_provider(ProviderKind::OpenAi);
        provider.base_url = "http://127.0.0.1:9/v1".into();
        let client = reqwest::Client::new();
        assert!(!ProviderAdapter::OpenAi.test_model(&client, &provider, "gpt-4o").await);
    }

    #[test]
    fn transcripts_surface_vendor_errors_after_partial_output() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Partial \"}}]}\n\n",
            "data: {\"error\":{\"message\":\"overloaded\"}}\n\n",
        );
        let events = ProviderAdapter::OpenAi.decode_transcript(body.as_bytes());
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0].as_ref().unwrap(),
            &StreamEvent::Text("Partial ".into())
        );
        assert_eq!(
            events[1].as_ref().unwrap_err().kind(),
            ErrorKind::VendorRejected
        );
    }
}
