//! Google Gemini `generateContent` API.

use serde_json::json;

use super::sse::{undecodable_payload, DecodeStep, StreamDecoder};
use super::{arguments_value, Completion, StreamEvent, ToolCallDelta};
use crate::api::google::{
    Content, FunctionCall, FunctionDeclaration, FunctionResponse, GenerateContentRequest,
    GenerateContentResponse, GenerationSettings, GoogleTool, InlineData, Part,
};
use crate::core::error::{ChatError, ErrorKind};
use crate::core::generation::GenerationConfig;
use crate::core::ids::random_token;
use crate::core::message::{Message, Role};
use crate::utils::url::construct_model_method_url;

/// Finish reasons that mean the output was withheld for policy reasons.
const SAFETY_FINISH_REASONS: &[&str] = &[
    "SAFETY",
    "RECITATION",
    "BLOCKLIST",
    "PROHIBITED_CONTENT",
    "SPII",
    "IMAGE_SAFETY",
];

const NORMAL_FINISH_REASONS: &[&str] = &["STOP", "MAX_TOKENS", "FINISH_REASON_UNSPECIFIED"];

pub fn endpoint(base_url: &str, model: &str, stream: bool) -> String {
    if stream {
        format!(
            "{}?alt=sse",
            construct_model_method_url(base_url, model, "streamGenerateContent")
        )
    } else {
        construct_model_method_url(base_url, model, "generateContent")
    }
}

/// Builds the request body. The model travels in the URL; penalties are not
/// supported and are dropped.
pub fn build_request(history: &[Message], config: &GenerationConfig) -> GenerateContentRequest {
    let mut contents: Vec<Content> = Vec::with_capacity(history.len());
    for message in history {
        let (role, parts) = to_parts(message);
        if parts.is_empty() {
            continue;
        }
        match contents.last_mut() {
            Some(previous) if previous.role.as_deref() == Some(role) => {
                previous.parts.extend(parts)
            }
            _ => contents.push(Content {
                role: Some(role.to_string()),
                parts,
            }),
        }
    }

    let settings = GenerationSettings {
        temperature: config.temperature,
        top_p: config.top_p,
        max_output_tokens: config.max_tokens,
    };

    let tools = (!config.tools.is_empty()).then(|| {
        vec![GoogleTool {
            function_declarations: config
                .tools
                .iter()
                .map(|tool| FunctionDeclaration {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: tool.parameters.clone(),
                })
                .collect(),
        }]
    });

    GenerateContentRequest {
        contents,
        system_instruction: config.effective_system_prompt().map(|prompt| Content {
            role: None,
            parts: vec![Part::text(prompt)],
        }),
        generation_config: (!settings.is_empty()).then_some(settings),
        tools,
    }
}

fn to_parts(message: &Message) -> (&'static str, Vec<Part>) {
    match message.role {
        Role::User => {
            let mut parts = Vec::with_capacity(message.attachments.len() + 1);
            if !message.content.is_empty() {
                parts.push(Part::text(message.content.clone()));
            }
            parts.extend(message.attachments.iter().map(|attachment| Part {
                inline_data: Some(InlineData {
                    mime_type: attachment.mime_type.clone(),
                    data: attachment.base64_data(),
                }),
                ..Part::default()
            }));
            ("user", parts)
        }
        Role::Assistant => {
            let mut parts = Vec::with_capacity(message.tool_calls.len() + 1);
            if !message.content.is_empty() {
                parts.push(Part::text(message.content.clone()));
            }
            parts.extend(message.tool_calls.iter().map(|call| Part {
                function_call: Some(FunctionCall {
                    id: None,
                    name: call.name.clone(),
                    args: arguments_value(&call.arguments),
                }),
                ..Part::default()
            }));
            ("model", parts)
        }
        Role::Tool => {
            let parts = message
                .tool_response
                .as_ref()
                .map(|response| Part {
                    function_response: Some(FunctionResponse {
                        name: response.tool_name.clone(),
                        response: json!({ "content": message.content }),
                    }),
                    ..Part::default()
                })
                .into_iter()
                .collect();
            ("user", parts)
        }
    }
}

/// Gemini sends whole function calls per chunk, so each call gets its own
/// ordinal.
#[derive(Debug, Default)]
pub struct GoogleStreamDecoder {
    next_tool: usize,
    produced_output: bool,
}

impl GoogleStreamDecoder {
    fn interpret(&mut self, response: GenerateContentResponse) -> DecodeStep {
        if let Some(reason) = response
            .prompt_feedback
            .and_then(|feedback| feedback.block_reason)
        {
            return DecodeStep::failed(Vec::new(), ChatError::safety_blocked(reason));
        }

        let Some(candidate) = response.candidates.into_iter().next() else {
            return DecodeStep::default();
        };

        let mut events = Vec::new();
        let parts = candidate.content.map(|content| content.parts).unwrap_or_default();
        for part in parts {
            if part.thought == Some(true) {
                continue;
            }
            if let Some(text) = part.text.filter(|text| !text.is_empty()) {
                events.push(StreamEvent::Text(text));
            }
            if let Some(call) = part.function_call {
                let ordinal = self.next_tool;
                self.next_tool += 1;
                events.push(StreamEvent::ToolCall(ToolCallDelta {
                    index: ordinal,
                    id: Some(call.id.unwrap_or_else(|| format!("call_{}", random_token()))),
                    name: Some(call.name),
                    arguments: Some(call.args.to_string()),
                }));
            }
        }
        self.produced_output |= !events.is_empty();

        match candidate.finish_reason.as_deref() {
            None => DecodeStep::events(events),
            Some(reason) if NORMAL_FINISH_REASONS.contains(&reason) => DecodeStep::events(events),
            Some(reason) if SAFETY_FINISH_REASONS.contains(&reason) => {
                DecodeStep::failed(events, ChatError::safety_blocked(reason))
            }
            Some(reason) if !self.produced_output => DecodeStep::failed(
                events,
                ChatError::new(
                    ErrorKind::VendorRejected,
                    format!("Generation ended without output (finish reason {reason})"),
                ),
            ),
            Some(_) => DecodeStep::events(events),
        }
    }
}

impl StreamDecoder for GoogleStreamDecoder {
    fn decode_payload(&mut self, payload: &str) -> Result<DecodeStep, ChatError> {
        let response: GenerateContentResponse =
            serde_json::from_str(payload).map_err(|err| undecodable_payload(payload, err))?;
        if response.error.is_some() {
            return Err(ChatError::vendor_rejected(None, payload));
        }
        Ok(self.interpret(response))
    }
}

pub fn parse_completion(body: &str) -> Result<Completion, ChatError> {
    let response: GenerateContentResponse =
        serde_json::from_str(body).map_err(|err| undecodable_payload(body, err))?;
    if response.error.is_some() {
        return Err(ChatError::vendor_rejected(None, body));
    }

    let step = GoogleStreamDecoder::default().interpret(response);
    match step.failure {
        Some(failure) => Err(failure),
        None => Ok(Completion::from_events(step.events)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::adapters::sse::decode_all;
    use crate::core::message::{Attachment, ToolCall, ToolResponse};

    fn config() -> GenerationConfig {
        GenerationConfig::new("google", "gemini-2.0-flash")
    }

    #[test]
    fn roles_map_to_user_and_model() {
        let mut config = config();
        config.system_prompt = Some("Be brief.".into());
        let history = [Message::user("Hi"), Message::assistant("Hello")];
        let body = serde_json::to_value(build_request(&history, &config)).unwrap();

        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["contents"][1]["parts"][0]["text"], "Hello");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "Be brief.");
        assert!(body.get("generationConfig").is_none());
    }

    #[test]
    fn generation_settings_use_camel_case_and_skip_penalties() {
        let mut config = config();
        config.max_tokens = Some(128);
        config.top_p = Some(0.5);
        config.presence_penalty = Some(1.0);
        let body = serde_json::to_value(build_request(&[], &config)).unwrap();
        assert_eq!(
            body["generationConfig"],
            json!({"topP": 0.5, "maxOutputTokens": 128})
        );
    }

    #[test]
    fn attachments_and_tool_turns_use_inline_and_function_parts() {
        let user = Message::user("Look")
            .with_attachments(vec![Attachment::image("image/jpeg", vec![1])]);
        let mut assistant = Message::assistant("");
        assistant.tool_calls = vec![ToolCall {
            id: "call_1".into(),
            name: "zoom".into(),
            arguments: "{\"level\":2}".into(),
        }];
        let tool = Message::tool_result(ToolResponse {
            call_id: "call_1".into(),
            tool_name: "zoom".into(),
            content: "zoomed".into(),
        });

        let body = serde_json::to_value(build_request(&[user, assistant, tool], &config())).unwrap();
        assert_eq!(
            body["contents"][0]["parts"][1]["inlineData"],
            json!({"mimeType": "image/jpeg", "data": "AQ=="})
        );
        assert_eq!(body["contents"][1]["parts"][0]["functionCall"]["args"]["level"], 2);
        assert_eq!(
            body["contents"][2]["parts"][0]["functionResponse"],
            json!({"name": "zoom", "response": {"content": "zoomed"}})
        );
    }

    #[test]
    fn stream_skips_thoughts_and_collects_function_calls() {
        let body = concat!(
            "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"planning\",\"thought\":true},{\"text\":\"Hi\"}]}}]}\r\n\r\n",
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"functionCall\":{\"name\":\"zoom\",\"args\":{\"level\":2}}}]},\"finishReason\":\"STOP\"}]}\r\n\r\n",
        );
        let completion = Completion::from_events(
            decode_all(body.as_bytes(), GoogleStreamDecoder::default())
                .into_iter()
                .map(Result::unwrap),
        );
        assert_eq!(completion.text, "Hi");
        assert_eq!(completion.tool_calls[0].name, "zoom");
        assert_eq!(completion.tool_calls[0].arguments, "{\"level\":2}");
    }

    #[test]
    fn safety_signals_are_safety_blocks() {
        let prompt_blocked = "data: {\"promptFeedback\":{\"blockReason\":\"SAFETY\"}}\n\n";
        let events = decode_all(prompt_blocked.as_bytes(), GoogleStreamDecoder::default());
        assert_eq!(events[0].as_ref().unwrap_err().kind(), ErrorKind::SafetyBlocked);

        let recitation = concat!(
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Once\"}]}}]}\n\n",
            "data: {\"candidates\":[{\"finishReason\":\"RECITATION\"}]}\n\n",
        );
        let events = decode_all(recitation.as_bytes(), GoogleStreamDecoder::default());
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].as_ref().unwrap_err().kind(), ErrorKind::SafetyBlocked);
    }

    #[test]
    fn abnormal_finish_without_output_is_rejected() {
        let body = "data: {\"candidates\":[{\"finishReason\":\"MALFORMED_FUNCTION_CALL\"}]}\n\n";
        let events = decode_all(body.as_bytes(), GoogleStreamDecoder::default());
        assert_eq!(events[0].as_ref().unwrap_err().kind(), ErrorKind::VendorRejected);
    }

    #[test]
    fn completion_parses_single_response() {
        let body = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Test"}]},"finishReason":"STOP"}]}"#;
        assert_eq!(parse_completion(body).unwrap().text, "Test");

        let rejected = r#"{"error":{"code":400,"message":"API key not valid","status":"INVALID_ARGUMENT"}}"#;
        let err = parse_completion(rejected).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::VendorRejected);
        assert!(err.message().contains("API key not valid"));
    }
}
