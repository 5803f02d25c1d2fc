//! OpenAI-compatible chat completions (also used by OpenRouter, Groq, Mistral
//! and most self-hosted gateways).

use tracing::debug;

use super::sse::{undecodable_payload, DecodeStep, StreamDecoder};
use super::{Completion, StreamEvent, ToolCallDelta};
use crate::api::openai::{
    ChatCompletion, ChatContent, ChatMessage, ChatRequest, ChatResponse, ChatToolCall,
    ChatToolCallFunction, ChatToolDefinition, ChatToolFunction, ContentPart, ImageUrl, InputAudio,
};
use crate::core::error::ChatError;
use crate::core::generation::GenerationConfig;
use crate::core::message::{Attachment, AttachmentKind, Message, Role};
use crate::utils::url::construct_api_url;

const CONTENT_FILTER: &str = "content_filter";

pub fn endpoint(base_url: &str) -> String {
    construct_api_url(base_url, "chat/completions")
}

pub fn build_request(history: &[Message], config: &GenerationConfig, stream: bool) -> ChatRequest {
    let mut messages = Vec::with_capacity(history.len() + 1);
    if let Some(system) = config.effective_system_prompt() {
        messages.push(ChatMessage {
            role: "system".to_string(),
            content: Some(ChatContent::Text(system.to_string())),
            tool_call_id: None,
            tool_calls: None,
        });
    }
    messages.extend(history.iter().map(to_chat_message));

    let tools = (!config.tools.is_empty()).then(|| {
        config
            .tools
            .iter()
            .map(|tool| ChatToolDefinition {
                kind: "function".to_string(),
                function: ChatToolFunction {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: tool.parameters.clone(),
                },
            })
            .collect()
    });

    ChatRequest {
        model: config.model.clone(),
        messages,
        stream,
        temperature: config.temperature,
        top_p: config.top_p,
        frequency_penalty: config.frequency_penalty,
        presence_penalty: config.presence_penalty,
        max_tokens: config.max_tokens,
        tools,
    }
}

fn to_chat_message(message: &Message) -> ChatMessage {
    match message.role {
        Role::User => ChatMessage {
            role: "user".to_string(),
            content: Some(user_content(message)),
            tool_call_id: None,
            tool_calls: None,
        },
        Role::Assistant => ChatMessage {
            role: "assistant".to_string(),
            content: (!message.content.is_empty())
                .then(|| ChatContent::Text(message.content.clone())),
            tool_call_id: None,
            tool_calls: (!message.tool_calls.is_empty()).then(|| {
                message
                    .tool_calls
                    .iter()
                    .map(|call| ChatToolCall {
                        id: call.id.clone(),
                        kind: "function".to_string(),
                        function: ChatToolCallFunction {
                            name: call.name.clone(),
                            arguments: call.arguments.clone(),
                        },
                    })
                    .collect()
            }),
        },
        Role::Tool => ChatMessage {
            role: "tool".to_string(),
            content: Some(ChatContent::Text(message.content.clone())),
            tool_call_id: message
                .tool_response
                .as_ref()
                .map(|response| response.call_id.clone()),
            tool_calls: None,
        },
    }
}

fn user_content(message: &Message) -> ChatContent {
    if message.attachments.is_empty() {
        return ChatContent::Text(message.content.clone());
    }

    let mut parts = Vec::with_capacity(message.attachments.len() + 1);
    if !message.content.is_empty() {
        parts.push(ContentPart::Text {
            text: message.content.clone(),
        });
    }
    parts.extend(message.attachments.iter().map(attachment_part));
    ChatContent::Parts(parts)
}

fn attachment_part(attachment: &Attachment) -> ContentPart {
    match attachment.kind {
        AttachmentKind::Image => ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: attachment.data_url(),
            },
        },
        AttachmentKind::Audio => ContentPart::InputAudio {
            input_audio: InputAudio {
                data: attachment.base64_data(),
                format: audio_format(&attachment.mime_type),
            },
        },
        AttachmentKind::File => match attachment.as_inline_text() {
            Some(text) => ContentPart::Text { text },
            None => {
                debug!(mime = %attachment.mime_type, "binary file attachment unsupported by chat completions");
                ContentPart::Text {
                    text: attachment.placeholder_text(),
                }
            }
        },
    }
}

fn audio_format(mime_type: &str) -> String {
    match mime_type.rsplit('/').next().unwrap_or("wav") {
        "mpeg" | "mp3" => "mp3".to_string(),
        "x-wav" | "wave" => "wav".to_string(),
        other => other.to_string(),
    }
}

#[derive(Debug, Default)]
pub struct OpenAiStreamDecoder;

impl StreamDecoder for OpenAiStreamDecoder {
    fn decode_payload(&mut self, payload: &str) -> Result<DecodeStep, ChatError> {
        if payload == "[DONE]" {
            return Ok(DecodeStep::done());
        }

        let response: ChatResponse =
            serde_json::from_str(payload).map_err(|err| undecodable_payload(payload, err))?;
        if response.error.is_some() {
            return Err(ChatError::vendor_rejected(None, payload));
        }

        let mut events = Vec::new();
        let Some(choice) = response.choices.into_iter().next() else {
            return Ok(DecodeStep::events(events));
        };

        if let Some(delta) = choice.delta {
            if let Some(content) = delta.content {
                events.push(StreamEvent::Text(content));
            }
            for call in delta.tool_calls.unwrap_or_default() {
                let (name, arguments) = match call.function {
                    Some(function) => (function.name, function.arguments),
                    None => (None, None),
                };
                events.push(StreamEvent::ToolCall(ToolCallDelta {
                    index: call.index.unwrap_or(0) as usize,
                    id: call.id,
                    name,
                    arguments,
                }));
            }
        }

        if choice.finish_reason.as_deref() == Some(CONTENT_FILTER) {
            return Ok(DecodeStep::failed(
                events,
                ChatError::safety_blocked(CONTENT_FILTER),
            ));
        }
        Ok(DecodeStep::events(events))
    }
}

pub fn parse_completion(body: &str) -> Result<Completion, ChatError> {
    let completion: ChatCompletion =
        serde_json::from_str(body).map_err(|err| undecodable_payload(body, err))?;
    if completion.error.is_some() {
        return Err(ChatError::vendor_rejected(None, body));
    }

    let Some(choice) = completion.choices.into_iter().next() else {
        return Ok(Completion::default());
    };
    let result = Completion {
        text: choice.message.content.unwrap_or_default(),
        tool_calls: choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| crate::core::message::ToolCall {
                id: call.id,
                name: call.function.name,
                arguments: call.function.arguments,
            })
            .collect(),
    };

    if result.is_empty() && choice.finish_reason.as_deref() == Some(CONTENT_FILTER) {
        return Err(ChatError::safety_blocked(CONTENT_FILTER));
    }
    Ok(result)
}
