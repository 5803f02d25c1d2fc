use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::{stream, StreamExt};

use crate::core::adapters::{Completion, DeltaStream, StreamEvent, ToolCallDelta};
use crate::core::chat_stream::{ChatStreamService, StreamReceiver};
use crate::core::error::ChatError;
use crate::core::generation::{GenerationConfig, ProviderConfig, ProviderKind};
use crate::core::message::Message;
use crate::core::service::ChatBackend;
use crate::core::session::Session;

pub fn test_provider(kind: ProviderKind) -> ProviderConfig {
    ProviderConfig {
        id: "test".to_string(),
        display_name: "Test".to_string(),
        kind,
        base_url: "https://api.test.com/v1".to_string(),
        api_key: "test-key".to_string(),
        title_model: None,
    }
}

pub fn test_config() -> GenerationConfig {
    GenerationConfig::new("test", "test-model")
}

pub fn create_test_session() -> Session {
    Session::new(test_provider(ProviderKind::OpenAi), test_config())
}

/// Session with auto titles off, so tests only see generation traffic.
pub fn create_quiet_session() -> Session {
    let mut config = test_config();
    config.auto_title = false;
    Session::new(test_provider(ProviderKind::OpenAi), config)
}

pub fn create_test_service(
    backend: Arc<ScriptedBackend>,
) -> (ChatStreamService, StreamReceiver) {
    ChatStreamService::new(backend)
}

pub enum ScriptEnd {
    Finish,
    Fail(ChatError),
    /// Never finishes; only cancellation stops it.
    Hang,
}

/// One scripted streaming reply.
pub struct Script {
    pub events: Vec<StreamEvent>,
    pub end: ScriptEnd,
}

impl Script {
    pub fn text(chunks: &[&str]) -> Self {
        Self {
            events: chunks
                .iter()
                .map(|chunk| StreamEvent::Text(chunk.to_string()))
                .collect(),
            end: ScriptEnd::Finish,
        }
    }

    pub fn failing(chunks: &[&str], err: ChatError) -> Self {
        Self {
            end: ScriptEnd::Fail(err),
            ..Self::text(chunks)
        }
    }

    pub fn hanging(chunks: &[&str]) -> Self {
        Self {
            end: ScriptEnd::Hang,
            ..Self::text(chunks)
        }
    }

    /// Rejected before any output, as an HTTP error status would be.
    pub fn refused(err: ChatError) -> Self {
        Self::failing(&[], err)
    }

    pub fn with_tool_call(mut self, id: &str, name: &str, arguments: &[&str]) -> Self {
        let index = self
            .events
            .iter()
            .filter(|event| matches!(event, StreamEvent::ToolCall(delta) if delta.id.is_some()))
            .count();
        self.events.push(StreamEvent::ToolCall(ToolCallDelta {
            index,
            id: Some(id.to_string()),
            name: Some(name.to_string()),
            arguments: None,
        }));
        for fragment in arguments {
            self.events.push(StreamEvent::ToolCall(ToolCallDelta {
                index,
                arguments: Some(fragment.to_string()),
                ..ToolCallDelta::default()
            }));
        }
        self
    }
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub history: Vec<Message>,
    pub config: GenerationConfig,
    pub streaming: bool,
}

/// Backend that replays queued scripts and records every request.
/// Streaming calls with an empty queue finish with no output; non-streaming
/// calls with an empty queue answer "Scripted title".
#[derive(Default)]
pub struct ScriptedBackend {
    scripts: Mutex<VecDeque<Script>>,
    completions: Mutex<VecDeque<Result<Completion, ChatError>>>,
    requests: Mutex<Vec<RecordedRequest>>,
    check_result: bool,
}

impl ScriptedBackend {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            ..Self::default()
        }
    }

    pub fn with_check_result(mut self, result: bool) -> Self {
        self.check_result = result;
        self
    }

    pub fn push_script(&self, script: Script) {
        self.scripts.lock().unwrap().push_back(script);
    }

    pub fn push_completion(&self, completion: Result<Completion, ChatError>) {
        self.completions.lock().unwrap().push_back(completion);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn streaming_histories(&self) -> Vec<Vec<Message>> {
        self.requests()
            .into_iter()
            .filter(|request| request.streaming)
            .map(|request| request.history)
            .collect()
    }

    pub fn non_streaming_calls(&self) -> usize {
        self.requests()
            .iter()
            .filter(|request| !request.streaming)
            .count()
    }

    fn record(&self, history: &[Message], config: &GenerationConfig, streaming: bool) {
        self.requests.lock().unwrap().push(RecordedRequest {
            history: history.to_vec(),
            config: config.clone(),
            streaming,
        });
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn stream_response(
        &self,
        _provider: &ProviderConfig,
        history: &[Message],
        config: &GenerationConfig,
    ) -> Result<DeltaStream, ChatError> {
        self.record(history, config, true);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Script::text(&[]));

        if script.events.is_empty() {
            if let ScriptEnd::Fail(err) = script.end {
                return Err(err);
            }
            if let ScriptEnd::Finish = script.end {
                return Ok(stream::empty().boxed());
            }
            return Ok(stream::pending().boxed());
        }

        let events = stream::iter(script.events.into_iter().map(Ok));
        Ok(match script.end {
            ScriptEnd::Finish => events.boxed(),
            ScriptEnd::Fail(err) => events.chain(stream::once(async move { Err(err) })).boxed(),
            ScriptEnd::Hang => events.chain(stream::pending()).boxed(),
        })
    }

    async fn non_streaming_response(
        &self,
        _provider: &ProviderConfig,
        history: &[Message],
        config: &GenerationConfig,
    ) -> Result<Completion, ChatError> {
        self.record(history, config, false);
        self.completions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Ok(Completion {
                    text: "Scripted title".to_string(),
                    tool_calls: Vec::new(),
                })
            })
    }

    async fn test_model(&self, _provider: &ProviderConfig, _model: &str) -> bool {
        self.check_result
    }
}
