//! LLM provider clients. One of these answers every admitted prompt.

pub mod gemini;
pub mod groq;
pub mod ollama;

pub use gemini::GeminiClient;
pub use groq::GroqClient;
pub use ollama::OllamaClient;

use crate::modes::Mode;
use crate::store::conversation::HistoryEntry;

#[derive(Debug)]
pub enum Error {
    Http(String),
    Api(String),
    Parse(String),
    Empty,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Http(e) => write!(f, "HTTP error: {e}"),
            Error::Api(e) => write!(f, "API error: {e}"),
            Error::Parse(e) => write!(f, "Parse error: {e}"),
            Error::Empty => write!(f, "Empty response"),
        }
    }
}

impl std::error::Error for Error {}

/// The configured provider.
pub enum LlmClient {
    Gemini(GeminiClient),
    Groq(GroqClient),
    Ollama(OllamaClient),
}

impl LlmClient {
    /// Answer `prompt` under `system`, with `history` as prior context.
    /// Only the Groq provider varies model and sampling by mode.
    pub async fn complete(
        &self,
        mode: Mode,
        system: &str,
        history: &[HistoryEntry],
        prompt: &str,
    ) -> Result<String, Error> {
        match self {
            LlmClient::Gemini(client) => client.complete(system, history, prompt).await,
            LlmClient::Groq(client) => client.complete(mode, system, history, prompt).await,
            LlmClient::Ollama(client) => client.complete(system, history, prompt).await,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            LlmClient::Gemini(_) => "gemini",
            LlmClient::Groq(_) => "groq",
            LlmClient::Ollama(_) => "ollama",
        }
    }
}

/// Fold system prompt, history and the new prompt into one text block, for
/// providers whose API takes a single prompt string.
pub(crate) fn flatten_prompt(system: &str, history: &[HistoryEntry], prompt: &str) -> String {
    let mut text = String::from(system);
    for entry in history {
        text.push_str(&format!("\n{}: {}", entry.role.as_str(), entry.content));
    }
    text.push_str(&format!("\nuser: {prompt}"));
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::conversation::Role;

    #[test]
    fn test_flatten_prompt_keeps_order() {
        let history = vec![
            HistoryEntry {
                role: Role::User,
                content: "hi".to_string(),
                timestamp: 1,
            },
            HistoryEntry {
                role: Role::Assistant,
                content: "hello".to_string(),
                timestamp: 2,
            },
        ];

        let text = flatten_prompt("SYSTEM", &history, "how are you");
        assert_eq!(text, "SYSTEM\nuser: hi\nassistant: hello\nuser: how are you");
    }
}
