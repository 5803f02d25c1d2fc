//! Anthropic Messages API.

use std::collections::HashMap;

use tracing::debug;

use super::sse::{undecodable_payload, DecodeStep, StreamDecoder};
use super::{arguments_value, Completion, StreamEvent, ToolCallDelta};
use crate::api::anthropic::{
    AnthropicMessage, AnthropicTool, BlobSource, ContentBlock, MessagesRequest,
    MessagesResponse, StreamEventPayload, DEFAULT_MAX_TOKENS,
};
use crate::core::error::ChatError;
use crate::core::generation::GenerationConfig;
use crate::core::message::{Attachment, AttachmentKind, Message, Role, ToolCall};
use crate::utils::url::construct_api_url;

const REFUSAL: &str = "refusal";
const MAX_TEMPERATURE: f32 = 1.0;

pub fn endpoint(base_url: &str) -> String {
    construct_api_url(base_url, "messages")
}

/// Frequency and presence penalties have no Anthropic counterpart and are
/// not sent.
pub fn build_request(
    history: &[Message],
    config: &GenerationConfig,
    stream: bool,
) -> MessagesRequest {
    let mut messages: Vec<AnthropicMessage> = Vec::with_capacity(history.len());
    for message in history {
        let (role, content) = to_blocks(message);
        if content.is_empty() {
            continue;
        }
        match messages.last_mut() {
            Some(previous) if previous.role == role => previous.content.extend(content),
            _ => messages.push(AnthropicMessage {
                role: role.to_string(),
                content,
            }),
        }
    }

    let tools = (!config.tools.is_empty()).then(|| {
        config
            .tools
            .iter()
            .map(|tool| AnthropicTool {
                name: tool.name.clone(),
                description: tool.description.clone(),
                input_schema: tool.parameters.clone(),
            })
            .collect()
    });

    MessagesRequest {
        model: config.model.clone(),
        max_tokens: config.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        system: config.effective_system_prompt().map(str::to_string),
        messages,
        temperature: config
            .temperature
            .map(|value| value.clamp(0.0, MAX_TEMPERATURE)),
        top_p: config.top_p,
        stream,
        tools,
    }
}

fn to_blocks(message: &Message) -> (&'static str, Vec<ContentBlock>) {
    match message.role {
        Role::User => {
            let mut blocks: Vec<ContentBlock> = message
                .attachments
                .iter()
                .map(attachment_block)
                .collect();
            if !message.content.is_empty() {
                blocks.push(ContentBlock::Text {
                    text: message.content.clone(),
                });
            }
            ("user", blocks)
        }
        Role::Assistant => {
            let mut blocks = Vec::with_capacity(message.tool_calls.len() + 1);
            if !message.content.is_empty() {
                blocks.push(ContentBlock::Text {
                    text: message.content.clone(),
                });
            }
            blocks.extend(message.tool_calls.iter().map(|call| ContentBlock::ToolUse {
                id: call.id.clone(),
                name: call.name.clone(),
                input: arguments_value(&call.arguments),
            }));
            ("assistant", blocks)
        }
        // Tool results travel inside a user turn.
        Role::Tool => {
            let blocks = message
                .tool_response
                .as_ref()
                .map(|response| ContentBlock::ToolResult {
                    tool_use_id: response.call_id.clone(),
                    content: message.content.clone(),
                })
                .into_iter()
                .collect();
            ("user", blocks)
        }
    }
}

fn attachment_block(attachment: &Attachment) -> ContentBlock {
    let blob = || BlobSource {
        kind: "base64".to_string(),
        media_type: attachment.mime_type.clone(),
        data: attachment.base64_data(),
    };
    match attachment.kind {
        AttachmentKind::Image => ContentBlock::Image { source: blob() },
        AttachmentKind::File if attachment.mime_type == "application/pdf" => {
            ContentBlock::Document { source: blob() }
        }
        _ => {
            let text = attachment.as_inline_text().unwrap_or_else(|| {
                debug!(mime = %attachment.mime_type, "attachment unsupported by the messages API");
                attachment.placeholder_text()
            });
            ContentBlock::Text { text }
        }
    }
}

/// Tracks which content blocks are tool calls so argument fragments can be
/// routed to the right call ordinal.
#[derive(Debug, Default)]
pub struct AnthropicStreamDecoder {
    tool_blocks: HashMap<usize, usize>,
    next_tool: usize,
}

impl StreamDecoder for AnthropicStreamDecoder {
    fn decode_payload(&mut self, payload: &str) -> Result<DecodeStep, ChatError> {
        let event: StreamEventPayload =
            serde_json::from_str(payload).map_err(|err| undecodable_payload(payload, err))?;
        let block_index = event.index.unwrap_or(0);

        match event.kind.as_str() {
            "content_block_start" => {
                let Some(block) = event.content_block else {
                    return Ok(DecodeStep::default());
                };
                match block.kind.as_str() {
                    "tool_use" => {
                        let ordinal = self.next_tool;
                        self.next_tool += 1;
                        self.tool_blocks.insert(block_index, ordinal);
                        Ok(DecodeStep::events(vec![StreamEvent::ToolCall(
                            ToolCallDelta {
                                index: ordinal,
                                id: block.id,
                                name: block.name,
                                arguments: None,
                            },
                        )]))
                    }
                    "text" => Ok(DecodeStep::events(
                        block.text.map(StreamEvent::Text).into_iter().collect(),
                    )),
                    _ => Ok(DecodeStep::default()),
                }
            }
            "content_block_delta" => {
                let Some(delta) = event.delta else {
                    return Ok(DecodeStep::default());
                };
                match delta.kind.as_deref() {
                    Some("text_delta") => Ok(DecodeStep::events(
                        delta.text.map(StreamEvent::Text).into_iter().collect(),
                    )),
                    Some("input_json_delta") => {
                        let Some(&ordinal) = self.tool_blocks.get(&block_index) else {
                            return Ok(DecodeStep::default());
                        };
                        Ok(DecodeStep::events(vec![StreamEvent::ToolCall(
                            ToolCallDelta {
                                index: ordinal,
                                arguments: delta.partial_json,
                                ..ToolCallDelta::default()
                            },
                        )]))
                    }
                    // thinking and signature deltas carry no answer text
                    _ => Ok(DecodeStep::default()),
                }
            }
            "message_delta" => {
                let stop_reason = event.delta.and_then(|delta| delta.stop_reason);
                if stop_reason.as_deref() == Some(REFUSAL) {
                    Ok(DecodeStep::failed(
                        Vec::new(),
                        ChatError::safety_blocked(REFUSAL),
                    ))
                } else {
                    Ok(DecodeStep::default())
                }
            }
            "message_stop" => Ok(DecodeStep::done()),
            "error" => Err(ChatError::vendor_rejected(None, payload)),
            _ => Ok(DecodeStep::default()),
        }
    }
}

pub fn parse_completion(body: &str) -> Result<Completion, ChatError> {
    let response: MessagesResponse =
        serde_json::from_str(body).map_err(|err| undecodable_payload(body, err))?;
    if response.error.is_some() {
        return Err(ChatError::vendor_rejected(None, body));
    }

    let mut completion = Completion::default();
    for block in response.content {
        match block.kind.as_str() {
            "text" => completion
                .text
                .push_str(block.text.as_deref().unwrap_or_default()),
            "tool_use" => completion.tool_calls.push(ToolCall {
                id: block.id.unwrap_or_default(),
                name: block.name.unwrap_or_default(),
                arguments: block
                    .input
                    .map(|input| input.to_string())
                    .unwrap_or_else(|| "{}".to_string()),
            }),
            _ => {}
        }
    }

    if completion.is_empty() && response.stop_reason.as_deref() == Some(REFUSAL) {
        return Err(ChatError::safety_blocked(REFUSAL));
    }
    Ok(completion)
}
