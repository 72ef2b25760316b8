//! OpenAI-compatible chat completions client pointed at Groq.
//!
//! Each mode runs a different model: a filtered general model for halus, a
//! less filtered one for kasar, and a long-context model for informasi
//! (which carries the search context in its system prompt).

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::llm::Error;
use crate::modes::Mode;
use crate::store::conversation::HistoryEntry;

const GROQ_API_URL: &str = "https://api.groq.com/openai/v1/chat/completions";

pub const MODEL_HALUS: &str = "openai/gpt-oss-120b";
pub const MODEL_KASAR: &str = "llama-3.3-70b-versatile";
pub const MODEL_INFORMASI: &str = "moonshotai/kimi-k2-instruct";

pub struct GroqClient {
    api_key: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct ChatRequest {
    model: &'static str,
    messages: Vec<ApiMessage>,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
}

#[derive(Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl GroqClient {
    pub fn new(api_key: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .expect("Failed to build HTTP client");

        Self { api_key, client }
    }

    pub async fn complete(
        &self,
        mode: Mode,
        system: &str,
        history: &[HistoryEntry],
        prompt: &str,
    ) -> Result<String, Error> {
        // Informasi trades temperature for accuracy and gets more room.
        let (model, max_tokens, temperature) = match mode {
            Mode::Halus => (MODEL_HALUS, 1500, 0.7),
            Mode::Kasar => (MODEL_KASAR, 1500, 0.7),
            Mode::Informasi => (MODEL_INFORMASI, 2000, 0.5),
        };

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ApiMessage {
            role: "system",
            content: system.to_string(),
        });
        for entry in history {
            messages.push(ApiMessage {
                role: entry.role.as_str(),
                content: entry.content.clone(),
            });
        }
        messages.push(ApiMessage {
            role: "user",
            content: prompt.to_string(),
        });

        let request = ChatRequest {
            model,
            messages,
            max_tokens,
            temperature,
            top_p: 0.9,
        };

        let response = self
            .client
            .post(GROQ_API_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api(format!("{status}: {body}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        debug!("Groq answered with model {model}");

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or(Error::Empty)
    }
}
