//! Prompt text, title cleanup and in-character fallback messages

use rand::Rng;

use crate::mode::Mode;
use crate::state::PLACEHOLDER_TITLE;

/// Title given to chats started from the coding playground
pub const CODING_TITLE: &str = "Coding Session";

const MAX_TITLE_CHARS: usize = 100;
const TITLE_EXCERPT_CHARS: usize = 500;

const CONVERSATIONAL_PROMPT: &str = "You are Cognito, a thoughtful and witty AI companion. \
Answer clearly, keep a warm tone, and use Markdown (**bold**, lists, code blocks) when it helps. \
Keep answers concise unless the user asks for depth.";

const CODING_PROMPT: &str = "You are Cognito in coding-assistant mode. \
Help the user write, debug and explain code. Prefer short explanations followed by complete, \
runnable code in fenced blocks. When a code buffer or console output is attached, use it as \
the current state of the user's playground.";

/// Errors shown in place of a response when generation fails
pub const FALLBACK_ERRORS: &[&str] = &[
    "My neural pathways got tangled for a moment. Could you try that again?",
    "Hmm, the signal from the thought-cloud faded out. Please ask me once more.",
    "I lost my train of thought somewhere in the ether. Mind repeating that?",
    "Something short-circuited on my side. Give me another try in a moment.",
    "Even a cognitive engine needs a breather sometimes. Please try again.",
];

pub fn system_prompt(mode: Mode) -> &'static str {
    match mode {
        Mode::Conversational => CONVERSATIONAL_PROMPT,
        Mode::Coding => CODING_PROMPT,
    }
}

pub fn random_fallback_error() -> &'static str {
    let idx = rand::rng().random_range(0..FALLBACK_ERRORS.len());
    FALLBACK_ERRORS[idx]
}

/// Extra playground state sent alongside a coding-mode message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SideContext {
    pub code: Option<String>,
    pub console_output: Option<String>,
}

impl SideContext {
    pub fn is_empty(&self) -> bool {
        let blank = |s: &Option<String>| s.as_deref().map_or(true, |s| s.trim().is_empty());
        blank(&self.code) && blank(&self.console_output)
    }
}

/// Text actually sent to the model. The side context only rides along in
/// coding mode; the stored user message never contains it.
pub fn outgoing_payload(content: &str, mode: Mode, side: Option<&SideContext>) -> String {
    let side = match side {
        Some(side) if mode == Mode::Coding && !side.is_empty() => side,
        _ => return content.to_string(),
    };

    let mut payload = String::from(content);
    if let Some(code) = side.code.as_deref().filter(|c| !c.trim().is_empty()) {
        payload.push_str("\n\n--- CODE BUFFER ---\n");
        payload.push_str(code);
        payload.push_str("\n--- END CODE BUFFER ---");
    }
    if let Some(output) = side.console_output.as_deref().filter(|o| !o.trim().is_empty()) {
        payload.push_str("\n\n--- CONSOLE OUTPUT ---\n");
        payload.push_str(output);
        payload.push_str("\n--- END CONSOLE OUTPUT ---");
    }
    payload
}

fn truncate_text(text: &str, max_len: usize) -> String {
    text.chars().take(max_len).collect()
}

/// Prompt asking for a short title describing the first exchange
pub fn title_prompt(user_text: &str, model_text: &str) -> String {
    format!(
        "Generate a concise, descriptive title (3-7 words) for this conversation. \
        Output ONLY the title, no quotes, no explanation.\n\n\
        User: {}\n\nAssistant: {}",
        truncate_text(user_text, TITLE_EXCERPT_CHARS),
        truncate_text(model_text, TITLE_EXCERPT_CHARS)
    )
}

/// Clean and validate a generated title
pub fn clean_title(raw_title: &str) -> String {
    let cleaned = raw_title
        .trim()
        .lines()
        .next()
        .unwrap_or_default()
        .trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '*' || c == '#')
        .trim();

    if cleaned.is_empty() {
        PLACEHOLDER_TITLE.to_string()
    } else if cleaned.chars().count() > MAX_TITLE_CHARS {
        format!("{}...", truncate_text(cleaned, MAX_TITLE_CHARS - 3))
    } else {
        cleaned.to_string()
    }
}
