//! Plain-text transcript export

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::Result;
use regex::Regex;

use crate::state::Chat;

fn unsafe_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^A-Za-z0-9_-]+").expect("valid regex"))
}

/// `role: content` entries separated by a blank line
pub fn transcript(chat: &Chat) -> String {
    chat.messages
        .iter()
        .map(|m| format!("{}: {}", m.role.as_str(), m.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// File name derived from the chat title
pub fn file_name(title: &str) -> String {
    let sanitized = unsafe_chars().replace_all(title.trim(), "_");
    let sanitized = sanitized.trim_matches('_');
    if sanitized.is_empty() {
        "chat.txt".to_string()
    } else {
        format!("{}.txt", sanitized)
    }
}

pub fn write_transcript(chat: &Chat, dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(file_name(&chat.title));
    fs::write(&path, transcript(chat))?;
    Ok(path)
}
