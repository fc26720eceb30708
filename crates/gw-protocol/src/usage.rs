use serde::{Deserialize, Serialize};

/// Normalized usage, filled in from whichever of the four wire shapes
/// the upstream actually returned. Fields absent on the wire stay
/// `None`/`0` — the cost engine (gw-common::cost) treats missing
/// fields as zero quantity, matching spec.md's "don't guarantee exact
/// accounting when usage is absent" non-goal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_5m_tokens: u64,
    pub cache_creation_1h_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_input_tokens_unsplit: u64,
}
