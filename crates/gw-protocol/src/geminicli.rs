//! Gemini CLI wraps a plain `generateContent` body in a project/model
//! envelope (`POST /v1internal:generateContent`). Reuses the wire
//! types from [`crate::gemini`] for the inner request/response.

use serde::{Deserialize, Serialize};

use crate::gemini::{GenerateContentRequest, GenerateContentResponse};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub model: String,
    pub project: String,
    pub request: GenerateContentRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeResponse {
    pub response: GenerateContentResponse,
}
