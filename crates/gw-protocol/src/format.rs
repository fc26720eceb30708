use serde::{Deserialize, Serialize};

/// The wire protocol a client speaks, or a provider expects. Both
/// value spaces are the same (spec.md GLOSSARY: "Provider type").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Format {
    Claude,
    Codex,
    OpenAi,
    Gemini,
    GeminiCli,
}

impl Format {
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Claude => "claude",
            Format::Codex => "codex",
            Format::OpenAi => "openai",
            Format::Gemini => "gemini",
            Format::GeminiCli => "gemini-cli",
        }
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
