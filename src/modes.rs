//! Conversation modes: sticky persona selectors locked per user until cleared.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A persona the bot answers with. Once a user picks one it stays locked
/// until they run /clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Polite, friendly assistant.
    Halus,
    /// Blunt, street-slang persona.
    Kasar,
    /// Research assistant backed by web search.
    Informasi,
}

impl Mode {
    pub const ALL: [Mode; 3] = [Mode::Halus, Mode::Kasar, Mode::Informasi];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Halus => "halus",
            Mode::Kasar => "kasar",
            Mode::Informasi => "informasi",
        }
    }

    pub fn parse(s: &str) -> Option<Mode> {
        match s.to_lowercase().as_str() {
            "halus" => Some(Mode::Halus),
            "kasar" => Some(Mode::Kasar),
            "informasi" => Some(Mode::Informasi),
            _ => None,
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Mode::Halus => "😇",
            Mode::Kasar => "😈",
            Mode::Informasi => "🔍",
        }
    }

    /// Persona system prompt for the chat modes. The informasi prompt needs
    /// search results, see [`informasi_prompt`].
    pub fn persona(&self) -> &'static str {
        match self {
            Mode::Halus => {
                "You are a friendly, polite and helpful assistant. \
                 Answer clearly and informatively, in the user's language. \
                 Keep answers under 3000 characters. Plain text only, no markdown."
            }
            Mode::Kasar => {
                "You are XMSA, a blunt, street-smart assistant with zero patience \
                 for politeness. You answer in casual slang, tease the user back \
                 when teased, and never sugarcoat. Still give correct, useful \
                 answers, in the user's language. Keep answers under 3000 \
                 characters. Plain text only, no markdown."
            }
            Mode::Informasi => {
                "You are a research assistant. Answer from the search context \
                 you are given, citing the source site where relevant. Plain \
                 text only, no markdown."
            }
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// System prompt for informasi mode with freshly fetched search results.
pub fn informasi_prompt(search_results: &str) -> String {
    format!(
        "You are a research assistant tasked with giving CURRENT and ACCURATE \
         information. You just searched the web and found the following \
         results:\n\n{search_results}\n\n\
         Instructions:\n\
         1. Use the information above to answer the user's question fully.\n\
         2. Mention the source site when relevant.\n\
         3. If the information is insufficient or contradictory, say so honestly.\n\
         4. Summarize in your own words, do not copy-paste.\n\
         5. Keep the answer under 3000 characters. Plain text, no markdown."
    )
}

/// Line appended to every system prompt so the model knows who it talks to.
pub fn user_context(username: &str, identity: &str) -> String {
    format!("\n\nYou are currently talking to @{username} (ID: {identity}).")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_roundtrip() {
        for mode in Mode::ALL {
            assert_eq!(Mode::parse(mode.as_str()), Some(mode));
        }
        assert_eq!(Mode::parse("KASAR"), Some(Mode::Kasar));
        assert_eq!(Mode::parse("unknown"), None);
    }

    #[test]
    fn test_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Mode::Halus).unwrap(), r#""halus""#);
        let mode: Mode = serde_json::from_str(r#""informasi""#).unwrap();
        assert_eq!(mode, Mode::Informasi);
    }

    #[test]
    fn test_informasi_prompt_embeds_results() {
        let prompt = informasi_prompt("[1] Some headline");
        assert!(prompt.contains("[1] Some headline"));
    }
}
