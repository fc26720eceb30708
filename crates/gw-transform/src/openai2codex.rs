//! OpenAI chat-completions ↔ Codex responses API, OpenAI → Codex
//! direction. Contract: spec.md §4.10 "OpenAI → Codex (request)".

use gw_protocol::codex;
use gw_protocol::openai;
use gw_protocol::sse::SseEvent;
use serde_json::Value;

use crate::registry::{StreamState, TransformError};

pub fn transform_request(body: Value) -> Result<Value, TransformError> {
    let request: openai::ChatCompletionRequest = match serde_json::from_value(body) {
        Ok(request) => request,
        Err(error) => {
            tracing::warn!(event = "transform_parse_error", pair = "openai->codex", %error);
            return Ok(serde_json::json!({"model": "", "input": []}));
        }
    };

    let mut system_texts = Vec::new();
    let mut input = Vec::new();
    let mut first_user_seen = false;

    for message in request.messages {
        match message.role.as_str() {
            "system" | "developer" => {
                if let Some(text) = content_to_text(&message.content) {
                    system_texts.push(text);
                }
            }
            "tool" => {
                input.push(codex::InputItem::FunctionCallOutput {
                    call_id: message.tool_call_id.unwrap_or_default(),
                    output: content_to_text(&message.content).unwrap_or_default(),
                });
            }
            "assistant" if message.tool_calls.is_some() => {
                for call in message.tool_calls.unwrap_or_default() {
                    input.push(codex::InputItem::FunctionCall {
                        call_id: call.id,
                        name: call.function.name,
                        arguments: call.function.arguments,
                    });
                }
            }
            role => {
                let mut parts = map_content_parts(&message.content);
                if role == "user" && !first_user_seen && !system_texts.is_empty() {
                    let merged = system_texts.join("\n\n");
                    parts.insert(0, codex::InputContentPart::InputText { text: merged });
                    first_user_seen = true;
                } else if role == "user" {
                    first_user_seen = true;
                }
                if parts.is_empty() {
                    continue;
                }
                input.push(codex::InputItem::Message {
                    role: role.to_string(),
                    content: parts,
                });
            }
        }
    }

    // If no user message ever arrived, still surface the system prompt.
    if !first_user_seen && !system_texts.is_empty() {
        input.insert(
            0,
            codex::InputItem::Message {
                role: "user".to_string(),
                content: vec![codex::InputContentPart::InputText {
                    text: system_texts.join("\n\n"),
                }],
            },
        );
    }

    let tools = request.tools.map(|tools| {
        tools
            .into_iter()
            .map(|tool| {
                codex::ToolDefinition::Function(codex::FunctionTool {
                    name: tool.function.name,
                    description: tool.function.description,
                    parameters: tool.function.parameters,
                })
            })
            .collect()
    });

    let tool_choice = request.tool_choice.map(|choice| match choice {
        openai::ToolChoice::Str(value) => Value::String(value),
        openai::ToolChoice::Function { function, .. } => serde_json::json!({
            "type": "function",
            "function": {"name": function.name},
        }),
    });

    let out = codex::ResponseRequest {
        model: request.model.clone(),
        input,
        instructions: Some(default_codex_instructions(&request.model)),
        stream: Some(true),
        store: Some(false),
        parallel_tool_calls: Some(true),
        tools,
        tool_choice,
        max_output_tokens: None,
        temperature: None,
        top_p: None,
        reasoning: None,
    };

    let mut value = serde_json::to_value(out)?;
    if let Some(object) = value.as_object_mut() {
        object.insert(
            "include".to_string(),
            serde_json::json!(["reasoning.encrypted_content"]),
        );
    }
    Ok(value)
}

/// The gateway never forwards client-supplied system text verbatim as
/// `instructions`; Codex enforces its own default prompt per model and
/// admin system text instead rides inside the message list.
fn default_codex_instructions(model: &str) -> String {
    format!("You are Codex, based on {model}, running as a coding agent in the Codex CLI.")
}

fn map_content_parts(content: &Option<openai::MessageContent>) -> Vec<codex::InputContentPart> {
    match content {
        Some(openai::MessageContent::Text(text)) if !text.is_empty() => {
            vec![codex::InputContentPart::InputText { text: text.clone() }]
        }
        Some(openai::MessageContent::Parts(parts)) => parts
            .iter()
            .map(|part| match part {
                openai::ContentPart::Text { text } => {
                    codex::InputContentPart::InputText { text: text.clone() }
                }
                openai::ContentPart::ImageUrl { image_url } => {
                    codex::InputContentPart::InputImage {
                        image_url: image_url.url.clone(),
                    }
                }
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn content_to_text(content: &Option<openai::MessageContent>) -> Option<String> {
    match content {
        Some(openai::MessageContent::Text(text)) => Some(text.clone()),
        Some(openai::MessageContent::Parts(parts)) => Some(
            parts
                .iter()
                .filter_map(|part| match part {
                    openai::ContentPart::Text { text } => Some(text.clone()),
                    openai::ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        None => None,
    }
}

pub fn transform_response(body: Value) -> Result<Value, TransformError> {
    Ok(body)
}

/// Provider (Codex) SSE event → client (OpenAI) chunk(s). Codex names
/// one output item per turn (`output_index`) and streams its text or
/// tool-call arguments by delta; `response.completed` carries the
/// terminal usage figures.
pub fn transform_stream_chunk(event: SseEvent, state: &mut StreamState) -> Vec<SseEvent> {
    let Ok(native) = serde_json::from_str::<codex::StreamEvent>(&event.data) else {
        tracing::warn!(event = "transform_stream_parse_error", pair = "openai<-codex_stream");
        return Vec::new();
    };

    match native {
        codex::StreamEvent::ResponseCreated { response } => {
            state.message_id = Some(response.id);
            state.model = Some(response.model);
            state.message_started = true;
            vec![chunk_event(role_delta_chunk(state))]
        }
        codex::StreamEvent::OutputItemAdded { output_index, item } => match item {
            codex::OutputItem::FunctionCall { call_id, name, .. } => {
                vec![chunk_event(tool_call_start_chunk(state, output_index, call_id, name))]
            }
            codex::OutputItem::Message { .. } | codex::OutputItem::Reasoning { .. } => Vec::new(),
        },
        codex::StreamEvent::OutputTextDelta { delta, .. } => {
            vec![chunk_event(text_delta_chunk(state, delta))]
        }
        codex::StreamEvent::FunctionCallArgumentsDelta { output_index, delta, .. } => {
            vec![chunk_event(tool_call_delta_chunk(state, output_index, delta))]
        }
        codex::StreamEvent::OutputItemDone { .. } => Vec::new(),
        codex::StreamEvent::ResponseCompleted { response } => {
            vec![chunk_event(completion_chunk(state, &response)), SseEvent { event: None, data: "[DONE]".to_string() }]
                .into_iter()
                .collect()
        }
    }
}

fn chunk_event(chunk: openai::ChatCompletionChunk) -> SseEvent {
    SseEvent { event: None, data: serde_json::to_string(&chunk).unwrap_or_default() }
}

fn base_chunk(state: &StreamState) -> openai::ChatCompletionChunk {
    openai::ChatCompletionChunk {
        id: state.message_id.clone().unwrap_or_default(),
        model: state.model.clone().unwrap_or_default(),
        choices: Vec::new(),
        usage: None,
    }
}

fn role_delta_chunk(state: &StreamState) -> openai::ChatCompletionChunk {
    let mut chunk = base_chunk(state);
    chunk.choices.push(openai::ChunkChoice {
        index: 0,
        delta: openai::ChatMessageDelta { role: Some("assistant".to_string()), ..Default::default() },
        finish_reason: None,
    });
    chunk
}

fn text_delta_chunk(state: &StreamState, text: String) -> openai::ChatCompletionChunk {
    let mut chunk = base_chunk(state);
    chunk.choices.push(openai::ChunkChoice {
        index: 0,
        delta: openai::ChatMessageDelta { content: Some(text), ..Default::default() },
        finish_reason: None,
    });
    chunk
}

fn tool_call_start_chunk(state: &StreamState, output_index: u32, call_id: String, name: String) -> openai::ChatCompletionChunk {
    let mut chunk = base_chunk(state);
    chunk.choices.push(openai::ChunkChoice {
        index: 0,
        delta: openai::ChatMessageDelta {
            tool_calls: Some(vec![openai::ToolCallDelta {
                index: output_index,
                id: Some(call_id),
                function: Some(openai::FunctionCallDelta { name: Some(name), arguments: Some(String::new()) }),
            }]),
            ..Default::default()
        },
        finish_reason: None,
    });
    chunk
}

fn tool_call_delta_chunk(state: &StreamState, output_index: u32, arguments: String) -> openai::ChatCompletionChunk {
    let mut chunk = base_chunk(state);
    chunk.choices.push(openai::ChunkChoice {
        index: 0,
        delta: openai::ChatMessageDelta {
            tool_calls: Some(vec![openai::ToolCallDelta {
                index: output_index,
                id: None,
                function: Some(openai::FunctionCallDelta { name: None, arguments: Some(arguments) }),
            }]),
            ..Default::default()
        },
        finish_reason: None,
    });
    chunk
}

fn map_codex_status(status: &str) -> String {
    match status {
        "incomplete" => "length".to_string(),
        _ => "stop".to_string(),
    }
}

fn completion_chunk(state: &StreamState, response: &codex::ResponseObject) -> openai::ChatCompletionChunk {
    let mut chunk = base_chunk(state);
    chunk.choices.push(openai::ChunkChoice {
        index: 0,
        delta: openai::ChatMessageDelta::default(),
        finish_reason: Some(map_codex_status(&response.status)),
    });
    if let Some(usage) = &response.usage {
        chunk.usage = Some(openai::Usage {
            prompt_tokens: usage.input_tokens,
            completion_tokens: usage.output_tokens,
            total_tokens: usage.total_tokens,
            prompt_tokens_details: usage
                .input_tokens_details
                .map(|details| openai::PromptTokensDetails { cached_tokens: details.cached_tokens }),
            completion_tokens_details: usage
                .output_tokens_details
                .map(|details| openai::CompletionTokensDetails { reasoning_tokens: details.reasoning_tokens }),
        });
    }
    chunk
}

#[cfg(test)]
mod stream_tests {
    use super::*;

    #[test]
    fn response_created_emits_role_chunk() {
        let mut state = StreamState::default();
        let event = SseEvent {
            event: Some("response.created".to_string()),
            data: serde_json::to_string(&codex::StreamEvent::ResponseCreated {
                response: codex::ResponseObject {
                    id: "resp_1".to_string(),
                    model: "gpt-5-codex".to_string(),
                    status: "in_progress".to_string(),
                    output: vec![],
                    usage: None,
                },
            })
            .unwrap(),
        };
        let out = transform_stream_chunk(event, &mut state);
        assert_eq!(state.message_id.as_deref(), Some("resp_1"));
        assert!(out[0].data.contains("\"role\":\"assistant\""));
    }

    #[test]
    fn response_completed_emits_finish_and_done() {
        let mut state = StreamState::default();
        let event = SseEvent {
            event: Some("response.completed".to_string()),
            data: serde_json::to_string(&codex::StreamEvent::ResponseCompleted {
                response: codex::ResponseObject {
                    id: "resp_1".to_string(),
                    model: "gpt-5-codex".to_string(),
                    status: "completed".to_string(),
                    output: vec![],
                    usage: None,
                },
            })
            .unwrap(),
        };
        let out = transform_stream_chunk(event, &mut state);
        assert_eq!(out.len(), 2);
        assert!(out[0].data.contains("\"finish_reason\":\"stop\""));
        assert_eq!(out[1].data, "[DONE]");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_sampling_params_and_forces_stream_flags() {
        let body = serde_json::json!({
            "model": "gpt-5-codex",
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 100,
            "temperature": 0.5,
        });
        let out = transform_request(body).unwrap();
        assert_eq!(out["stream"], true);
        assert_eq!(out["store"], false);
        assert_eq!(out["parallel_tool_calls"], true);
        assert!(out.get("max_tokens").is_none());
        assert!(out.get("temperature").is_none());
        assert!(out["instructions"].as_str().unwrap().contains("gpt-5-codex"));
    }

    #[test]
    fn merges_system_text_into_first_user_message() {
        let body = serde_json::json!({
            "model": "gpt-5-codex",
            "messages": [
                {"role": "system", "content": "be terse"},
                {"role": "user", "content": "hi"},
            ],
        });
        let out = transform_request(body).unwrap();
        let first = &out["input"][0];
        assert_eq!(first["role"], "user");
        assert_eq!(first["content"][0]["text"], "be terse");
        assert_eq!(first["content"][1]["text"], "hi");
    }
}
