pub mod claude2openai;
pub mod codex2openai;
pub mod format;
pub mod geminicli2openai;
pub mod model_redirect;
pub mod openai2claude;
pub mod openai2codex;
pub mod openai2geminicli;
pub mod registry;

pub use format::{detect, detect_from_body, detect_from_path};
pub use model_redirect::{RedirectOutcome, apply_redirect};
pub use registry::{BlockKind, StreamState, TransformError, transform_request, transform_response, transform_stream_chunk};
