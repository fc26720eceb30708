//! Codex responses API ↔ OpenAI chat-completions, Codex → OpenAI
//! direction. Used when a client already speaks the Codex Responses
//! shape and the selected provider speaks OpenAI chat-completions.

use gw_protocol::codex;
use gw_protocol::openai;
use gw_protocol::sse::SseEvent;
use serde_json::Value;

use crate::registry::{StreamState, TransformError};

pub fn transform_request(body: Value) -> Result<Value, TransformError> {
    let request: codex::ResponseRequest = match serde_json::from_value(body) {
        Ok(request) => request,
        Err(error) => {
            tracing::warn!(event = "transform_parse_error", pair = "codex->openai", %error);
            return Ok(serde_json::json!({"model": "", "messages": []}));
        }
    };

    let mut messages = Vec::new();
    if let Some(instructions) = request.instructions {
        messages.push(openai::ChatMessage {
            role: "system".to_string(),
            content: Some(openai::MessageContent::Text(instructions)),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        });
    }

    for item in request.input {
        match item {
            codex::InputItem::Message { role, content } => {
                let parts: Vec<openai::ContentPart> = content
                    .into_iter()
                    .map(|part| match part {
                        codex::InputContentPart::InputText { text } => {
                            openai::ContentPart::Text { text }
                        }
                        codex::InputContentPart::InputImage { image_url } => {
                            openai::ContentPart::ImageUrl {
                                image_url: openai::ImageUrl { url: image_url },
                            }
                        }
                    })
                    .collect();
                let content_value = if parts.len() == 1 {
                    match &parts[0] {
                        openai::ContentPart::Text { text } => {
                            Some(openai::MessageContent::Text(text.clone()))
                        }
                        _ => Some(openai::MessageContent::Parts(parts)),
                    }
                } else {
                    Some(openai::MessageContent::Parts(parts))
                };
                messages.push(openai::ChatMessage {
                    role,
                    content: content_value,
                    tool_calls: None,
                    tool_call_id: None,
                    name: None,
                });
            }
            codex::InputItem::FunctionCall { call_id, name, arguments } => {
                messages.push(openai::ChatMessage {
                    role: "assistant".to_string(),
                    content: None,
                    tool_calls: Some(vec![openai::ToolCall {
                        id: call_id,
                        kind: "function".to_string(),
                        function: openai::FunctionCall { name, arguments },
                    }]),
                    tool_call_id: None,
                    name: None,
                });
            }
            codex::InputItem::FunctionCallOutput { call_id, output } => {
                messages.push(openai::ChatMessage {
                    role: "tool".to_string(),
                    content: Some(openai::MessageContent::Text(output)),
                    tool_calls: None,
                    tool_call_id: Some(call_id),
                    name: None,
                });
            }
            codex::InputItem::Reasoning { .. } => {}
        }
    }

    let tools = request.tools.map(|tools| {
        tools
            .into_iter()
            .map(|codex::ToolDefinition::Function(function)| openai::ToolDefinition {
                kind: "function".to_string(),
                function: openai::FunctionDef {
                    name: function.name,
                    description: function.description,
                    parameters: function.parameters,
                },
            })
            .collect()
    });

    let out = openai::ChatCompletionRequest {
        model: request.model,
        messages,
        max_tokens: request.max_output_tokens,
        max_completion_tokens: None,
        temperature: request.temperature,
        top_p: request.top_p,
        stream: request.stream,
        tools,
        tool_choice: None,
        reasoning_effort: request.reasoning.and_then(|r| r.effort),
    };

    Ok(serde_json::to_value(out)?)
}

/// Provider (OpenAI) response → client (Codex) response.
pub fn transform_response(body: Value) -> Result<Value, TransformError> {
    let response: openai::ChatCompletionResponse = match serde_json::from_value(body) {
        Ok(response) => response,
        Err(error) => {
            tracing::warn!(event = "transform_parse_error", pair = "codex<-openai_response", %error);
            return Ok(Value::Null);
        }
    };

    let mut output = Vec::new();
    if let Some(choice) = response.choices.into_iter().next() {
        if let Some(openai::MessageContent::Text(text)) = choice.message.content {
            if !text.is_empty() {
                output.push(codex::OutputItem::Message {
                    id: format!("msg_{}", response.id),
                    role: "assistant".to_string(),
                    content: vec![codex::OutputContentPart::OutputText { text }],
                });
            }
        }
        if let Some(tool_calls) = choice.message.tool_calls {
            for call in tool_calls {
                output.push(codex::OutputItem::FunctionCall {
                    id: format!("fc_{}", call.id),
                    call_id: call.id,
                    name: call.function.name,
                    arguments: call.function.arguments,
                });
            }
        }
    }

    let usage = response.usage.unwrap_or_default();
    let out = codex::ResponseObject {
        id: response.id,
        model: response.model,
        status: "completed".to_string(),
        output,
        usage: Some(codex::ResponseUsage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
            input_tokens_details: usage.prompt_tokens_details.map(|details| {
                codex::InputTokensDetails {
                    cached_tokens: details.cached_tokens,
                }
            }),
            output_tokens_details: usage.completion_tokens_details.map(|details| {
                codex::OutputTokensDetails {
                    reasoning_tokens: details.reasoning_tokens,
                }
            }),
        }),
    };

    Ok(serde_json::to_value(out)?)
}

/// Provider (OpenAI) SSE chunk → client (Codex) event sequence. OpenAI
/// has no item framing, so the first content delta opens a synthetic
/// message item at `output_index` 0 and each tool call claims the next
/// free index; `finish_reason` closes every open item before
/// `response.completed`.
pub fn transform_stream_chunk(event: SseEvent, state: &mut StreamState) -> Vec<SseEvent> {
    if event.data.trim() == "[DONE]" {
        return Vec::new();
    }

    let Ok(chunk) = serde_json::from_str::<openai::ChatCompletionChunk>(&event.data) else {
        tracing::warn!(event = "transform_stream_parse_error", pair = "codex<-openai_stream");
        return Vec::new();
    };

    let mut out = Vec::new();

    if !state.message_started {
        state.message_id = Some(chunk.id.clone());
        state.model = Some(chunk.model.clone());
        state.message_started = true;
        out.push(event_for(codex::StreamEvent::ResponseCreated {
            response: codex::ResponseObject {
                id: chunk.id.clone(),
                model: chunk.model.clone(),
                status: "in_progress".to_string(),
                output: vec![],
                usage: None,
            },
        }));
    }

    let Some(choice) = chunk.choices.into_iter().next() else {
        return out;
    };

    if let Some(text) = choice.delta.content {
        if !state.text_block_open {
            state.text_block_open = true;
            out.push(event_for(codex::StreamEvent::OutputItemAdded {
                output_index: 0,
                item: codex::OutputItem::Message { id: message_item_id(state), role: "assistant".to_string(), content: vec![] },
            }));
        }
        out.push(event_for(codex::StreamEvent::OutputTextDelta {
            output_index: 0,
            item_id: message_item_id(state),
            delta: text,
        }));
    }

    for call in choice.delta.tool_calls.into_iter().flatten() {
        let key = format!("tool:{}", call.index);
        let output_index = match state.tool_call_blocks.iter().find(|(existing, _)| *existing == key) {
            Some((_, index)) => *index,
            None => {
                let index = next_tool_output_index(state);
                state.tool_call_blocks.push((key, index));
                let name = call.function.as_ref().and_then(|function| function.name.clone()).unwrap_or_default();
                out.push(event_for(codex::StreamEvent::OutputItemAdded {
                    output_index: index,
                    item: codex::OutputItem::FunctionCall {
                        id: tool_item_id(state, index),
                        call_id: call.id.clone().unwrap_or_default(),
                        name,
                        arguments: String::new(),
                    },
                }));
                index
            }
        };
        if let Some(arguments) = call.function.and_then(|function| function.arguments) {
            out.push(event_for(codex::StreamEvent::FunctionCallArgumentsDelta {
                output_index,
                item_id: tool_item_id(state, output_index),
                delta: arguments,
            }));
        }
    }

    if let Some(finish_reason) = choice.finish_reason {
        if state.text_block_open {
            out.push(event_for(codex::StreamEvent::OutputItemDone {
                output_index: 0,
                item: codex::OutputItem::Message { id: message_item_id(state), role: "assistant".to_string(), content: vec![] },
            }));
        }
        for (_, index) in state.tool_call_blocks.drain(..) {
            out.push(event_for(codex::StreamEvent::OutputItemDone {
                output_index: index,
                item: codex::OutputItem::FunctionCall {
                    id: tool_item_id(state, index),
                    call_id: String::new(),
                    name: String::new(),
                    arguments: String::new(),
                },
            }));
        }
        let usage = chunk.usage.unwrap_or_default();
        out.push(event_for(codex::StreamEvent::ResponseCompleted {
            response: codex::ResponseObject {
                id: state.message_id.clone().unwrap_or_default(),
                model: state.model.clone().unwrap_or_default(),
                status: map_openai_finish_status(&finish_reason),
                output: vec![],
                usage: Some(codex::ResponseUsage {
                    input_tokens: usage.prompt_tokens,
                    output_tokens: usage.completion_tokens,
                    total_tokens: usage.total_tokens,
                    input_tokens_details: usage
                        .prompt_tokens_details
                        .map(|details| codex::InputTokensDetails { cached_tokens: details.cached_tokens }),
                    output_tokens_details: usage
                        .completion_tokens_details
                        .map(|details| codex::OutputTokensDetails { reasoning_tokens: details.reasoning_tokens }),
                }),
            },
        }));
        state.text_block_open = false;
    }

    out
}

fn event_for(ev: codex::StreamEvent) -> SseEvent {
    let name = match &ev {
        codex::StreamEvent::ResponseCreated { .. } => "response.created",
        codex::StreamEvent::OutputItemAdded { .. } => "response.output_item.added",
        codex::StreamEvent::OutputTextDelta { .. } => "response.output_text.delta",
        codex::StreamEvent::FunctionCallArgumentsDelta { .. } => "response.function_call_arguments.delta",
        codex::StreamEvent::OutputItemDone { .. } => "response.output_item.done",
        codex::StreamEvent::ResponseCompleted { .. } => "response.completed",
    };
    SseEvent { event: Some(name.to_string()), data: serde_json::to_string(&ev).unwrap_or_default() }
}

fn message_item_id(state: &StreamState) -> String {
    format!("msg_{}", state.message_id.clone().unwrap_or_default())
}

fn tool_item_id(state: &StreamState, index: u32) -> String {
    format!("fc_{}_{}", state.message_id.clone().unwrap_or_default(), index)
}

fn next_tool_output_index(state: &mut StreamState) -> u32 {
    if state.block_index == 0 {
        state.block_index = 1;
    }
    let index = state.block_index;
    state.block_index += 1;
    index
}

fn map_openai_finish_status(reason: &str) -> String {
    match reason {
        "length" => "incomplete".to_string(),
        _ => "completed".to_string(),
    }
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
                delta: openai::ChatMessageDelta { content: content.map(|text| text.to_string()), ..Default::default() },
                finish_reason: finish_reason.map(|reason| reason.to_string()),
            }],
            usage: None,
        })
        .unwrap()
    }

    #[test]
    fn first_chunk_opens_response_and_message_item() {
        let mut state = StreamState::default();
        let out = transform_stream_chunk(SseEvent { event: None, data: chunk(Some("hi"), None) }, &mut state);
        let events: Vec<_> = out.iter().map(|event| event.event.as_deref().unwrap()).collect();
        assert_eq!(events, vec!["response.created", "response.output_item.added", "response.output_text.delta"]);
    }

    #[test]
    fn finish_reason_closes_item_and_completes() {
        let mut state = StreamState::default();
        transform_stream_chunk(SseEvent { event: None, data: chunk(Some("hi"), None) }, &mut state);
        let out = transform_stream_chunk(SseEvent { event: None, data: chunk(None, Some("stop")) }, &mut state);
        let events: Vec<_> = out.iter().map(|event| event.event.as_deref().unwrap()).collect();
        assert_eq!(events, vec!["response.output_item.done", "response.completed"]);
        assert!(out[1].data.contains("\"status\":\"completed\""));
    }

    #[test]
    fn done_sentinel_yields_nothing() {
        let mut state = StreamState::default();
        let out = transform_stream_chunk(SseEvent { event: None, data: "[DONE]".to_string() }, &mut state);
        assert!(out.is_empty());
    }
}
