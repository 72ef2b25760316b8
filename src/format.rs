//! Reply formatting: markdown stripping and Telegram-sized chunking.
//!
//! Models are told to answer in plain text but markdown leaks through
//! anyway, so every reply is stripped before sending.

use regex::Regex;

/// Telegram caps messages at 4096 chars; stay under with some margin.
pub const CHUNK_SIZE: usize = 4000;

/// Remove markdown formatting, leaving clean plain text.
pub fn strip_markdown(text: &str) -> String {
    // Code fences first so their contents survive the inline passes.
    let fence = Regex::new(r"(?s)```[a-zA-Z0-9_+-]*\n?(.*?)```").unwrap();
    let text = fence.replace_all(text, "$1");
    let text = text.replace("```", "");

    let bold = Regex::new(r"\*\*(.+?)\*\*").unwrap();
    let text = bold.replace_all(&text, "$1");

    let underline = Regex::new(r"__(.+?)__").unwrap();
    let text = underline.replace_all(&text, "$1");

    let italic_star = Regex::new(r"\*(.+?)\*").unwrap();
    let text = italic_star.replace_all(&text, "$1");

    let italic_underscore = Regex::new(r"_(.+?)_").unwrap();
    let text = italic_underscore.replace_all(&text, "$1");

    let inline_code = Regex::new(r"`([^`]*)`").unwrap();
    let text = inline_code.replace_all(&text, "$1");

    let link = Regex::new(r"\[([^\]]+)\]\([^)]+\)").unwrap();
    let text = link.replace_all(&text, "$1");

    let header = Regex::new(r"(?m)^#{1,6}\s+").unwrap();
    let text = header.replace_all(&text, "");

    let blockquote = Regex::new(r"(?m)^>\s?").unwrap();
    let text = blockquote.replace_all(&text, "");

    text.trim().to_string()
}

/// Split a reply into chunks Telegram will accept, on char boundaries.
pub fn split_message(text: &str, chunk_size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(chunk_size)
        .map(|chunk| chunk.iter().collect())
        .collect()
}
