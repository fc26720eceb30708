//! Claude messages ↔ OpenAI chat-completions, Claude → OpenAI direction.
//! Inverse leg of [`crate::openai2claude`]; preserves the same
//! round-trippable fields (spec.md §8 property 5).

use gw_protocol::claude;
use gw_protocol::openai;
use gw_protocol::sse::SseEvent;
use serde_json::Value;

use crate::registry::{StreamState, TransformError};

pub fn transform_request(body: Value) -> Result<Value, TransformError> {
    let request: claude::CreateMessageRequest = match serde_json::from_value(body) {
        Ok(request) => request,
        Err(error) => {
            tracing::warn!(event = "transform_parse_error", pair = "claude->openai", %error);
            return Ok(serde_json::json!({"model": "", "messages": []}));
        }
    };

    let mut messages = Vec::new();
    if let Some(system) = request.system {
        let text = match system {
            claude::SystemPrompt::Text(text) => text,
            claude::SystemPrompt::Blocks(blocks) => join_text_blocks(&blocks),
        };
        if !text.is_empty() {
            messages.push(openai::ChatMessage {
                role: "system".to_string(),
                content: Some(openai::MessageContent::Text(text)),
                tool_calls: None,
                tool_call_id: None,
                name: None,
            });
        }
    }

    for message in request.messages {
        messages.extend(map_message(message));
    }

    let tools = request.tools.map(|tools| {
        tools
            .into_iter()
            .map(|tool| openai::ToolDefinition {
                kind: "function".to_string(),
                function: openai::FunctionDef {
                    name: tool.name,
                    description: tool.description,
                    parameters: tool.input_schema,
                },
            })
            .collect()
    });

    let tool_choice = request.tool_choice.map(map_tool_choice);

    let out = openai::ChatCompletionRequest {
        model: request.model,
        messages,
        max_tokens: Some(request.max_tokens),
        max_completion_tokens: None,
        temperature: request.temperature,
        top_p: request.top_p,
        stream: request.stream,
        tools,
        tool_choice,
        reasoning_effort: None,
    };

    Ok(serde_json::to_value(out)?)
}

fn map_message(message: claude::Message) -> Vec<openai::ChatMessage> {
    let blocks = message.content.into_blocks();

    // A lone tool_result block becomes a `tool` role message.
    if let [claude::ContentBlock::ToolResult { tool_use_id, content, .. }] = blocks.as_slice() {
        let text = match content {
            claude::ToolResultContent::Text(text) => text.clone(),
            claude::ToolResultContent::Blocks(blocks) => join_text_blocks(blocks),
        };
        return vec![openai::ChatMessage {
            role: "tool".to_string(),
            content: Some(openai::MessageContent::Text(text)),
            tool_calls: None,
            tool_call_id: Some(tool_use_id.clone()),
            name: None,
        }];
    }

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    let mut parts = Vec::new();

    for block in blocks {
        match block {
            claude::ContentBlock::Text { text: part } => text.push_str(&part),
            claude::ContentBlock::Image { source } => parts.push(openai::ContentPart::ImageUrl {
                image_url: openai::ImageUrl {
                    url: image_source_to_url(&source),
                },
            }),
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

    if !text.is_empty() {
        parts.insert(0, openai::ContentPart::Text { text });
    }

    let content = if parts.len() == 1 {
        if let openai::ContentPart::Text { text } = &parts[0] {
            Some(openai::MessageContent::Text(text.clone()))
        } else {
            Some(openai::MessageContent::Parts(parts))
        }
    } else if !parts.is_empty() {
        Some(openai::MessageContent::Parts(parts))
    } else {
        None
    };

    vec![openai::ChatMessage {
        role: message.role,
        content,
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        tool_call_id: None,
        name: None,
    }]
}

fn image_source_to_url(source: &claude::ImageSource) -> String {
    match source {
        claude::ImageSource::Base64 { media_type, data } => {
            format!("data:{media_type};base64,{data}")
        }
        claude::ImageSource::Url { url } => url.clone(),
    }
}

fn join_text_blocks(blocks: &[claude::ContentBlock]) -> String {
    blocks
        .iter()
        .filter_map(|block| match block {
            claude::ContentBlock::Text { text } => Some(text.clone()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn map_tool_choice(choice: claude::ToolChoice) -> openai::ToolChoice {
    match choice {
        claude::ToolChoice::Auto => openai::ToolChoice::Str("auto".to_string()),
        claude::ToolChoice::Any => openai::ToolChoice::Str("required".to_string()),
        claude::ToolChoice::None => openai::ToolChoice::Str("none".to_string()),
        claude::ToolChoice::Tool { name } => openai::ToolChoice::Function {
            r#type: "function".to_string(),
            function: openai::ToolChoiceFunction { name },
        },
    }
}

/// Provider (OpenAI) response → client (Claude) response.
pub fn transform_response(body: Value) -> Result<Value, TransformError> {
    let response: openai::ChatCompletionResponse = match serde_json::from_value(body) {
        Ok(response) => response,
        Err(error) => {
            tracing::warn!(event = "transform_parse_error", pair = "claude<-openai_response", %error);
            return Ok(Value::Null);
        }
    };

    let choice = response.choices.into_iter().next();
    let mut blocks = Vec::new();
    let mut stop_reason = None;

    if let Some(choice) = choice {
        stop_reason = choice.finish_reason.map(|reason| map_finish_reason(&reason));
        if let Some(content) = choice.message.content {
            match content {
                openai::MessageContent::Text(text) if !text.is_empty() => {
                    blocks.push(claude::ContentBlock::Text { text });
                }
                openai::MessageContent::Parts(parts) => {
                    for part in parts {
                        if let openai::ContentPart::Text { text } = part {
                            blocks.push(claude::ContentBlock::Text { text });
                        }
                    }
                }
                _ => {}
            }
        }
        if let Some(tool_calls) = choice.message.tool_calls {
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
    }

    let usage = response.usage.unwrap_or_default();
    let out = claude::CreateMessageResponse {
        id: response.id,
        model: response.model,
        role: "assistant".to_string(),
        content: blocks,
        stop_reason,
        usage: claude::MessageUsage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            cache_creation_input_tokens: 0,
            cache_read_input_tokens: usage
                .prompt_tokens_details
                .map(|details| details.cached_tokens)
                .unwrap_or(0),
            cache_creation: None,
        },
    };

    Ok(serde_json::to_value(out)?)
}

fn map_finish_reason(reason: &str) -> String {
    match reason {
        "stop" => "end_turn".to_string(),
        "length" => "max_tokens".to_string(),
        "tool_calls" => "tool_use".to_string(),
        other => other.to_string(),
    }
}

fn sse(ev: claude::StreamEvent) -> SseEvent {
    let name = match &ev {
        claude::StreamEvent::MessageStart { .. } => "message_start",
        claude::StreamEvent::ContentBlockStart { .. } => "content_block_start",
        claude::StreamEvent::ContentBlockDelta { .. } => "content_block_delta",
        claude::StreamEvent::ContentBlockStop { .. } => "content_block_stop",
        claude::StreamEvent::MessageDelta { .. } => "message_delta",
        claude::StreamEvent::MessageStop => "message_stop",
        claude::StreamEvent::Ping => "ping",
    };
    SseEvent { event: Some(name.to_string()), data: serde_json::to_string(&ev).unwrap_or_default() }
}

/// `tool_call_blocks` doubles as the open-block registry here: the text
/// block (if any) is tracked under the key `"text"` alongside each
/// OpenAI tool-call index, so a single drain at `finish_reason` closes
/// every block Claude expects closed before `message_delta`.
fn text_block_index(state: &StreamState) -> u32 {
    state
        .tool_call_blocks
        .iter()
        .find(|(key, _)| key == "text")
        .map(|(_, index)| *index)
        .unwrap_or(0)
}

/// Provider (OpenAI) SSE chunk → client (Claude) event(s). OpenAI has no
/// block framing, so the first content delta opens a synthetic text
/// block and `finish_reason` closes every block that was opened.
pub fn transform_stream_chunk(event: SseEvent, state: &mut StreamState) -> Vec<SseEvent> {
    if event.data.trim() == "[DONE]" {
        return vec![sse(claude::StreamEvent::MessageStop)];
    }

    let Ok(chunk) = serde_json::from_str::<openai::ChatCompletionChunk>(&event.data) else {
        tracing::warn!(event = "transform_stream_parse_error", pair = "claude<-openai_stream");
        return Vec::new();
    };

    let mut out = Vec::new();

    if !state.message_started {
        state.message_id = Some(chunk.id.clone());
        state.model = Some(chunk.model.clone());
        state.message_started = true;
        out.push(sse(claude::StreamEvent::MessageStart {
            message: claude::CreateMessageResponse {
                id: chunk.id.clone(),
                model: chunk.model.clone(),
                role: "assistant".to_string(),
                content: vec![],
                stop_reason: None,
                usage: claude::MessageUsage::default(),
            },
        }));
    }

    let Some(choice) = chunk.choices.into_iter().next() else {
        return out;
    };

    if let Some(text) = choice.delta.content {
        if !state.text_block_open {
            state.text_block_open = true;
            out.push(sse(claude::StreamEvent::ContentBlockStart {
                index: state.block_index,
                content_block: claude::ContentBlock::Text { text: String::new() },
            }));
            state.tool_call_blocks.push(("text".to_string(), state.block_index));
            state.block_index += 1;
        }
        out.push(sse(claude::StreamEvent::ContentBlockDelta {
            index: text_block_index(state),
            delta: claude::ContentBlockDelta::TextDelta { text },
        }));
    }

    for call in choice.delta.tool_calls.into_iter().flatten() {
        let key = format!("tool:{}", call.index);
        let index = match state.tool_call_blocks.iter().find(|(existing, _)| *existing == key) {
            Some((_, index)) => *index,
            None => {
                let index = state.block_index;
                state.block_index += 1;
                state.tool_call_blocks.push((key, index));
                let id = call.id.clone().unwrap_or_default();
                let name = call.function.as_ref().and_then(|function| function.name.clone()).unwrap_or_default();
                out.push(sse(claude::StreamEvent::ContentBlockStart {
                    index,
                    content_block: claude::ContentBlock::ToolUse { id, name, input: serde_json::json!({}) },
                }));
                index
            }
        };
        if let Some(arguments) = call.function.and_then(|function| function.arguments) {
            out.push(sse(claude::StreamEvent::ContentBlockDelta {
                index,
                delta: claude::ContentBlockDelta::InputJsonDelta { partial_json: arguments },
            }));
        }
    }

    if let Some(finish_reason) = choice.finish_reason {
        for (_, index) in state.tool_call_blocks.drain(..) {
            out.push(sse(claude::StreamEvent::ContentBlockStop { index }));
        }
        state.text_block_open = false;
        let usage = chunk.usage.unwrap_or_default();
        out.push(sse(claude::StreamEvent::MessageDelta {
            delta: claude::MessageDeltaFields { stop_reason: Some(map_finish_reason(&finish_reason)) },
            usage: claude::MessageUsage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
                cache_creation_input_tokens: 0,
                cache_read_input_tokens: usage.prompt_tokens_details.map(|details| details.cached_tokens).unwrap_or(0),
                cache_creation: None,
            },
        }));
    }

    out
}

#[cfg(test)]
mod stream_tests {
    use super::*;

    fn chunk(content: Option<&str>, finish_reason: Option<&str>) -> String {
        serde_json::to_string(&openai::ChatCompletionChunk {
            id: "chatcmpl-1".to_string(),
            model: "gpt-x".to_string(),
            choices: vec![openai::ChunkChoice {
                index: 0,
                delta: openai::ChatMessageDelta {
                    content: content.map(|text| text.to_string()),
                    ..Default::default()
                },
                finish_reason: finish_reason.map(|reason| reason.to_string()),
            }],
            usage: None,
        })
        .unwrap()
    }

    #[test]
    fn first_chunk_opens_message_and_text_block() {
        let mut state = StreamState::default();
        let out = transform_stream_chunk(
            SseEvent { event: None, data: chunk(Some("hi"), None) },
            &mut state,
        );
        let events: Vec<_> = out.iter().map(|event| event.event.as_deref().unwrap()).collect();
        assert_eq!(events, vec!["message_start", "content_block_start", "content_block_delta"]);
    }

    #[test]
    fn finish_reason_closes_blocks_and_emits_message_delta() {
        let mut state = StreamState::default();
        transform_stream_chunk(SseEvent { event: None, data: chunk(Some("hi"), None) }, &mut state);
        let out = transform_stream_chunk(SseEvent { event: None, data: chunk(None, Some("stop")) }, &mut state);
        let events: Vec<_> = out.iter().map(|event| event.event.as_deref().unwrap()).collect();
        assert_eq!(events, vec!["content_block_stop", "message_delta"]);
        assert!(out[1].data.contains("\"stop_reason\":\"end_turn\""));
    }

    #[test]
    fn done_sentinel_emits_message_stop() {
        let mut state = StreamState::default();
        let out = transform_stream_chunk(SseEvent { event: None, data: "[DONE]".to_string() }, &mut state);
        assert_eq!(out[0].event.as_deref(), Some("message_stop"));
    }
}
