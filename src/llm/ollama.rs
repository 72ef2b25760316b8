//! Local Ollama client (/api/generate, non-streaming).

use serde::{Deserialize, Serialize};

use crate::llm::{flatten_prompt, Error};
use crate::store::conversation::HistoryEntry;

pub struct OllamaClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: Option<String>,
}

impl OllamaClient {
    pub fn new(base_url: String, model: String) -> Self {
        // Local models can be slow; give them plenty of time.
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(240))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            base_url,
            model,
            client,
        }
    }

    pub async fn complete(
        &self,
        system: &str,
        history: &[HistoryEntry],
        prompt: &str,
    ) -> Result<String, Error> {
        let request = GenerateRequest {
            model: &self.model,
            prompt: flatten_prompt(system, history, prompt),
            stream: false,
        };

        let url = format!("{}/api/generate", self.base_url.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api(format!("{status}: {body}")));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        parsed
            .response
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or(Error::Empty)
    }
}
