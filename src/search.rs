//! Web search for informasi mode, via the DuckDuckGo instant-answer API.
//!
//! Results are formatted into a numbered context block that the informasi
//! system prompt embeds. A failed or empty search degrades to a stub the
//! model can acknowledge honestly.

use serde::Deserialize;
use tracing::debug;

const SEARCH_URL: &str = "https://api.duckduckgo.com/";

/// Sources included in the context block.
const MAX_RESULTS: usize = 10;

pub struct SearchClient {
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct InstantAnswer {
    #[serde(rename = "Heading", default)]
    heading: String,
    #[serde(rename = "AbstractText", default)]
    abstract_text: String,
    #[serde(rename = "AbstractURL", default)]
    abstract_url: String,
    #[serde(rename = "RelatedTopics", default)]
    related_topics: Vec<Topic>,
}

/// Related topics come either as leaves or as named groups of leaves; one
/// struct covers both since the missing fields just default.
#[derive(Deserialize, Default)]
struct Topic {
    #[serde(rename = "Text", default)]
    text: String,
    #[serde(rename = "FirstURL", default)]
    first_url: String,
    #[serde(rename = "Topics", default)]
    topics: Vec<Topic>,
}

struct SearchHit {
    title: String,
    url: String,
}

impl SearchClient {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self { client }
    }

    /// Search and return the formatted context block.
    pub async fn search(&self, query: &str) -> Result<String, String> {
        let url = format!(
            "{SEARCH_URL}?q={}&format=json&no_html=1&skip_disambig=1",
            urlencoding::encode(query)
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| format!("HTTP error: {e}"))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| format!("Failed to read response: {e}"))?;

        if !status.is_success() {
            return Err(format!("API error {status}: {body}"));
        }

        let answer: InstantAnswer =
            serde_json::from_str(&body).map_err(|e| format!("Failed to parse response: {e}"))?;

        let hits = collect_hits(&answer);
        debug!("Search for {query:?} returned {} hits", hits.len());
        Ok(format_context(&answer, &hits))
    }
}

impl Default for SearchClient {
    fn default() -> Self {
        Self::new()
    }
}

fn collect_hits(answer: &InstantAnswer) -> Vec<SearchHit> {
    let mut hits = Vec::new();
    collect_topics(&answer.related_topics, &mut hits);
    hits.truncate(MAX_RESULTS);
    hits
}

fn collect_topics(topics: &[Topic], hits: &mut Vec<SearchHit>) {
    for topic in topics {
        if !topic.text.is_empty() {
            hits.push(SearchHit {
                title: topic.text.clone(),
                url: topic.first_url.clone(),
            });
        }
        collect_topics(&topic.topics, hits);
    }
}

fn format_context(answer: &InstantAnswer, hits: &[SearchHit]) -> String {
    let mut parts = Vec::new();

    if !answer.abstract_text.is_empty() {
        parts.push(format!(
            "[SUMMARY] {}\n    {}\n    Source: {}",
            answer.heading, answer.abstract_text, answer.abstract_url
        ));
    }

    for (i, hit) in hits.iter().enumerate() {
        parts.push(format!(
            "[{}] {}\n    Source: {}",
            i + 1,
            hit.title,
            hit.url
        ));
    }

    if parts.is_empty() {
        return "No search results were found for this query. \
                Answer from general knowledge and say the search came up empty."
            .to_string();
    }

    parts.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_format_instant_answer() {
        let body = r#"{
            "Heading": "Rust",
            "AbstractText": "A systems programming language.",
            "AbstractURL": "https://en.wikipedia.org/wiki/Rust_(programming_language)",
            "RelatedTopics": [
                {"Text": "Cargo - package manager", "FirstURL": "https://example.com/cargo"},
                {"Name": "Tools", "Topics": [
                    {"Text": "Clippy - linter", "FirstURL": "https://example.com/clippy"}
                ]}
            ]
        }"#;

        let answer: InstantAnswer = serde_json::from_str(body).unwrap();
        let hits = collect_hits(&answer);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[1].title, "Clippy - linter");

        let context = format_context(&answer, &hits);
        assert!(context.contains("[SUMMARY] Rust"));
        assert!(context.contains("[1] Cargo - package manager"));
        assert!(context.contains("[2] Clippy - linter"));
    }

    #[test]
    fn test_empty_answer_degrades_to_stub() {
        let answer: InstantAnswer = serde_json::from_str("{}").unwrap();
        let hits = collect_hits(&answer);
        assert!(hits.is_empty());

        let context = format_context(&answer, &hits);
        assert!(context.contains("No search results"));
    }

    #[test]
    fn test_result_cap() {
        let topics: Vec<String> = (0..20)
            .map(|i| format!(r#"{{"Text": "t{i}", "FirstURL": "u{i}"}}"#))
            .collect();
        let body = format!(r#"{{"RelatedTopics": [{}]}}"#, topics.join(","));

        let answer: InstantAnswer = serde_json::from_str(&body).unwrap();
        assert_eq!(collect_hits(&answer).len(), MAX_RESULTS);
    }
}
