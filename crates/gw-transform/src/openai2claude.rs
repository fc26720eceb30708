//! OpenAI chat-completions ↔ Claude messages, OpenAI → Claude direction.
//! Contract: spec.md §4.10 "OpenAI → Claude (request)".

use gw_protocol::claude;
use gw_protocol::openai;
use gw_protocol::sse::SseEvent;
use serde_json::Value;

use crate::registry::{BlockKind, StreamState, TransformError};

const DEFAULT_MAX_TOKENS: u32 = 32_000;

pub fn transform_request(body: Value) -> Result<Value, TransformError> {
    let request: openai::ChatCompletionRequest = match serde_json::from_value(body) {
        Ok(request) => request,
        Err(error) => {
            tracing::warn!(event = "transform_parse_error", pair = "openai->claude", %error);
            return Ok(empty_claude_request());
        }
    };

    let mut system_texts = Vec::new();
    let mut messages = Vec::new();

    for message in request.messages {
        if message.role == "system" || message.role == "developer" {
            if let Some(text) = content_to_text(message.content) {
                system_texts.push(text);
            }
            continue;
        }
        messages.push(map_message(message));
    }

    let system = (!system_texts.is_empty())
        .then(|| claude::SystemPrompt::Text(system_texts.join("\n")));

    let tools = request.tools.map(|tools| {
        tools
            .into_iter()
            .map(|tool| claude::ToolDefinition {
                name: tool.function.name,
                description: tool.function.description,
                input_schema: tool.function.parameters,
            })
            .collect()
    });

    let tool_choice = request.tool_choice.map(map_tool_choice);

    let out = claude::CreateMessageRequest {
        model: request.model,
        system,
        messages,
        max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        temperature: request.temperature,
        top_p: request.top_p,
        stream: request.stream,
        tools,
        tool_choice,
    };

    Ok(serde_json::to_value(out)?)
}

fn map_message(message: openai::ChatMessage) -> claude::Message {
    if message.role == "tool" {
        let tool_use_id = message.tool_call_id.unwrap_or_default();
        let text = content_to_text(message.content).unwrap_or_default();
        return claude::Message {
            role: "user".to_string(),
            content: claude::MessageContent::Blocks(vec![claude::ContentBlock::ToolResult {
                tool_use_id,
                content: claude::ToolResultContent::Text(text),
                is_error: false,
            }]),
        };
    }

    let mut blocks = Vec::new();
    match message.content {
        Some(openai::MessageContent::Text(text)) if !text.is_empty() => {
            blocks.push(claude::ContentBlock::Text { text });
        }
        Some(openai::MessageContent::Parts(parts)) => {
            for part in parts {
                match part {
                    openai::ContentPart::Text { text } => {
                        blocks.push(claude::ContentBlock::Text { text });
                    }
                    openai::ContentPart::ImageUrl { image_url } => {
                        blocks.push(claude::ContentBlock::Image {
                            source: map_image_source(&image_url.url),
                        });
                    }
                }
            }
        }
        _ => {}
    }

    if let Some(tool_calls) = message.tool_calls {
        for call in tool_calls {
            let input = serde_json::from_str(&call.function.arguments)
                .unwrap_or(Value::String(call.function.arguments));
            blocks.push(claude::ContentBlock::ToolUse {
                id: call.id,
                name: call.function.name,
                input,
            });
        }
    }

    claude::Message {
        role: message.role,
        content: claude::MessageContent::Blocks(blocks),
    }
}

fn map_image_source(url: &str) -> claude::ImageSource {
    if let Some(rest) = url.strip_prefix("data:")
        && let Some((meta, data)) = rest.split_once(',')
        && let Some((media_type, encoding)) = meta.split_once(';')
        && encoding == "base64"
    {
        return claude::ImageSource::Base64 {
            media_type: media_type.to_string(),
            data: data.to_string(),
        };
    }
    claude::ImageSource::Url { url: url.to_string() }
}

fn map_tool_choice(choice: openai::ToolChoice) -> claude::ToolChoice {
    match choice {
        openai::ToolChoice::Str(value) => match value.as_str() {
            "required" => claude::ToolChoice::Any,
            "none" => claude::ToolChoice::None,
            _ => claude::ToolChoice::Auto,
        },
        openai::ToolChoice::Function { function, .. } => claude::ToolChoice::Tool {
            name: function.name,
        },
    }
}

fn content_to_text(content: Option<openai::MessageContent>) -> Option<String> {
    match content {
        Some(openai::MessageContent::Text(text)) => Some(text),
        Some(openai::MessageContent::Parts(parts)) => {
            let text = parts
                .into_iter()
                .filter_map(|part| match part {
                    openai::ContentPart::Text { text } => Some(text),
                    openai::ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n");
            Some(text)
        }
        None => None,
    }
}

fn empty_claude_request() -> Value {
    serde_json::json!({
        "model": "",
        "messages": [],
        "max_tokens": DEFAULT_MAX_TOKENS,
    })
}

/// Provider (Claude) response → client (OpenAI) response.
pub fn transform_response(body: Value) -> Result<Value, TransformError> {
    let response: claude::CreateMessageResponse = match serde_json::from_value(body) {
        Ok(response) => response,
        Err(error) => {
            tracing::warn!(event = "transform_parse_error", pair = "openai<-claude_response", %error);
            return Ok(Value::Null);
        }
    };

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for block in response.content {
        match block {
            claude::ContentBlock::Text { text: part } => text.push_str(&part),
            claude::ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(openai::ToolCall {
                    id,
                    kind: "function".to_string(),
                    function: openai::FunctionCall {
                        name,
                        arguments: input.to_string(),
                    },
                });
            }
            _ => {}
        }
    }

    let message = openai::ChatMessage {
        role: "assistant".to_string(),
        content: (!text.is_empty()).then_some(openai::MessageContent::Text(text)),
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        tool_call_id: None,
        name: None,
    };

    let out = openai::ChatCompletionResponse {
        id: response.id,
        model: response.model,
        choices: vec![openai::Choice {
            index: 0,
            message,
            finish_reason: response.stop_reason.map(|reason| map_stop_reason(&reason)),
        }],
        usage: Some(openai::Usage {
            prompt_tokens: response.usage.input_tokens,
            completion_tokens: response.usage.output_tokens,
            total_tokens: response.usage.input_tokens + response.usage.output_tokens,
            prompt_tokens_details: Some(openai::PromptTokensDetails {
                cached_tokens: response.usage.cache_read_input_tokens,
            }),
            completion_tokens_details: None,
        }),
    };

    Ok(serde_json::to_value(out)?)
}

fn map_stop_reason(reason: &str) -> String {
    match reason {
        "end_turn" | "stop_sequence" => "stop".to_string(),
        "max_tokens" => "length".to_string(),
        "tool_use" => "tool_calls".to_string(),
        other => other.to_string(),
    }
}

/// Provider (Claude) SSE event → client (OpenAI) chunk(s). Claude frames
/// one block (text, thinking, or tool-use) at a time via
/// `content_block_start/delta/stop`; OpenAI has no block framing, so
/// only `content_block_delta` (and the tool-use `content_block_start`,
/// which carries the call's `id`/`name`) produce output.
pub fn transform_stream_chunk(event: SseEvent, state: &mut StreamState) -> Vec<SseEvent> {
    let Ok(native) = serde_json::from_str::<claude::StreamEvent>(&event.data) else {
        tracing::warn!(event = "transform_stream_parse_error", pair = "openai<-claude_stream");
        return Vec::new();
    };

    match native {
        claude::StreamEvent::MessageStart { message } => {
            state.message_id = Some(message.id);
            state.model = Some(message.model);
            state.message_started = true;
            vec![chunk_event(role_delta_chunk(state))]
        }
        claude::StreamEvent::ContentBlockStart { index, content_block } => {
            state.block_index = index;
            match content_block {
                claude::ContentBlock::ToolUse { id, name, .. } => {
                    state.current_block_type = Some(BlockKind::ToolUse);
                    state.has_tool_call = true;
                    vec![chunk_event(tool_call_start_chunk(state, index, id, name))]
                }
                claude::ContentBlock::Text { .. } => {
                    state.current_block_type = Some(BlockKind::Text);
                    Vec::new()
                }
                _ => {
                    state.current_block_type = Some(BlockKind::Thinking);
                    Vec::new()
                }
            }
        }
        claude::StreamEvent::ContentBlockDelta { index, delta } => match delta {
            claude::ContentBlockDelta::TextDelta { text } => {
                vec![chunk_event(text_delta_chunk(state, text))]
            }
            claude::ContentBlockDelta::InputJsonDelta { partial_json } => {
                vec![chunk_event(tool_call_delta_chunk(state, index, partial_json))]
            }
            claude::ContentBlockDelta::ThinkingDelta { .. } => Vec::new(),
        },
        claude::StreamEvent::ContentBlockStop { .. } => {
            state.current_block_type = None;
            Vec::new()
        }
        claude::StreamEvent::MessageDelta { delta, usage } => {
            vec![chunk_event(message_delta_chunk(state, delta.stop_reason.as_deref(), usage))]
        }
        claude::StreamEvent::MessageStop => {
            vec![SseEvent { event: None, data: "[DONE]".to_string() }]
        }
        claude::StreamEvent::Ping => Vec::new(),
    }
}

fn chunk_event(chunk: openai::ChatCompletionChunk) -> SseEvent {
    SseEvent {
        event: None,
        data: serde_json::to_string(&chunk).unwrap_or_default(),
    }
}

fn base_chunk(state: &StreamState) -> openai::ChatCompletionChunk {
    openai::ChatCompletionChunk {
        id: state.message_id.clone().unwrap_or_default(),
        model: state.model.clone().unwrap_or_default(),
        choices: Vec::new(),
        usage: None,
    }
}

fn choice(delta: openai::ChatMessageDelta, finish_reason: Option<String>) -> openai::ChunkChoice {
    openai::ChunkChoice { index: 0, delta, finish_reason }
}

fn role_delta_chunk(state: &StreamState) -> openai::ChatCompletionChunk {
    let mut chunk = base_chunk(state);
    chunk.choices.push(choice(
        openai::ChatMessageDelta { role: Some("assistant".to_string()), ..Default::default() },
        None,
    ));
    chunk
}

fn text_delta_chunk(state: &StreamState, text: String) -> openai::ChatCompletionChunk {
    let mut chunk = base_chunk(state);
    chunk.choices.push(choice(openai::ChatMessageDelta { content: Some(text), ..Default::default() }, None));
    chunk
}

fn tool_call_start_chunk(state: &StreamState, index: u32, id: String, name: String) -> openai::ChatCompletionChunk {
    let mut chunk = base_chunk(state);
    chunk.choices.push(choice(
        openai::ChatMessageDelta {
            tool_calls: Some(vec![openai::ToolCallDelta {
                index,
                id: Some(id),
                function: Some(openai::FunctionCallDelta { name: Some(name), arguments: Some(String::new()) }),
            }]),
            ..Default::default()
        },
        None,
    ));
    chunk
}

fn tool_call_delta_chunk(state: &StreamState, index: u32, partial_json: String) -> openai::ChatCompletionChunk {
    let mut chunk = base_chunk(state);
    chunk.choices.push(choice(
        openai::ChatMessageDelta {
            tool_calls: Some(vec![openai::ToolCallDelta {
                index,
                id: None,
                function: Some(openai::FunctionCallDelta { name: None, arguments: Some(partial_json) }),
            }]),
            ..Default::default()
        },
        None,
    ));
    chunk
}

fn message_delta_chunk(
    state: &StreamState,
    stop_reason: Option<&str>,
    usage: claude::MessageUsage,
) -> openai::ChatCompletionChunk {
    let mut chunk = base_chunk(state);
    chunk.choices.push(choice(openai::ChatMessageDelta::default(), stop_reason.map(map_stop_reason)));
    chunk.usage = Some(openai::Usage {
        prompt_tokens: usage.input_tokens,
        completion_tokens: usage.output_tokens,
        total_tokens: usage.input_tokens + usage.output_tokens,
        prompt_tokens_details: Some(openai::PromptTokensDetails { cached_tokens: usage.cache_read_input_tokens }),
        completion_tokens_details: None,
    });
    chunk
}

#[cfg(test)]
mod stream_tests {
    use super::*;

    #[test]
    fn message_start_emits_role_chunk() {
        let mut state = StreamState::default();
        let event = SseEvent {
            event: Some("message_start".to_string()),
            data: serde_json::to_string(&claude::StreamEvent::MessageStart {
                message: claude::CreateMessageResponse {
                    id: "msg_1".to_string(),
                    model: "claude-x".to_string(),
                    role: "assistant".to_string(),
                    content: vec![],
                    stop_reason: None,
                    usage: claude::MessageUsage::default(),
                },
            })
            .unwrap(),
        };
        let out = transform_stream_chunk(event, &mut state);
        assert_eq!(out.len(), 1);
        assert!(out[0].data.contains("\"role\":\"assistant\""));
        assert_eq!(state.message_id.as_deref(), Some("msg_1"));
    }

    #[test]
    fn message_stop_emits_done_sentinel() {
        let mut state = StreamState::default();
        let event = SseEvent { event: Some("message_stop".to_string()), data: "{\"type\":\"message_stop\"}".to_string() };
        let out = transform_stream_chunk(event, &mut state);
        assert_eq!(out[0].data, "[DONE]");
    }

    #[test]
    fn text_delta_forwards_content() {
        let mut state = StreamState::default();
        let event = SseEvent {
            event: Some("content_block_delta".to_string()),
            data: serde_json::to_string(&claude::StreamEvent::ContentBlockDelta {
                index: 0,
                delta: claude::ContentBlockDelta::TextDelta { text: "hi".to_string() },
            })
            .unwrap(),
        };
        let out = transform_stream_chunk(event, &mut state);
        assert!(out[0].data.contains("\"content\":\"hi\""));
    }
}
