//! UI-agnostic chat data types
//!
//! This module contains data structures that are shared between the controller,
//! the chat store and any presentation layer. None of them depend on a specific
//! UI framework.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Title given to a chat until a summary (or the coding label) replaces it
pub const PLACEHOLDER_TITLE: &str = "New Chat";

/// The role of a chat message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
        }
    }
}

/// A single turn in a chat transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    /// Base64-encoded speech audio, attached after synthesis completes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_content: Option<String>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: next_id(),
            role,
            content: content.into(),
            audio_content: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Empty model message that streamed fragments are appended to
    pub fn placeholder() -> Self {
        Self::new(Role::Model, String::new())
    }
}

/// A conversation, persisted as one record keyed by `id`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: String,
    pub title: String,
    /// Creation time in milliseconds since the epoch
    pub created_at: i64,
    pub messages: Vec<Message>,
}

impl Chat {
    pub fn new() -> Self {
        Self {
            id: next_id(),
            title: PLACEHOLDER_TITLE.to_string(),
            created_at: now_millis() as i64,
            messages: Vec::new(),
        }
    }

    pub fn message(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn message_mut(&mut self, id: &str) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    pub fn has_placeholder_title(&self) -> bool {
        self.title == PLACEHOLDER_TITLE
    }

    /// Index of the last model message that directly follows a user message.
    ///
    /// Tolerates anomalies such as two consecutive model messages after an
    /// error: the search keeps walking back until a user/model pair is found.
    pub fn last_exchange(&self) -> Option<usize> {
        (1..self.messages.len()).rev().find(|&i| {
            self.messages[i].role == Role::Model && self.messages[i - 1].role == Role::User
        })
    }
}

impl Default for Chat {
    fn default() -> Self {
        Self::new()
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

static LAST_ID: AtomicU64 = AtomicU64::new(0);

/// Allocate an id from the current timestamp in milliseconds.
///
/// Two ids requested within the same millisecond would collide, so the
/// allocator never hands out a value lower than or equal to the previous one.
pub fn next_id() -> String {
    let now = now_millis();
    let mut prev = LAST_ID.load(Ordering::Relaxed);
    loop {
        let candidate = now.max(prev + 1);
        match LAST_ID.compare_exchange_weak(prev, candidate, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return candidate.to_string(),
            Err(actual) => prev = actual,
        }
    }
}
