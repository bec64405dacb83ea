//! AI Session Gateway contract
//!
//! The controller only talks to the remote model through these traits, so the
//! concrete clients in [`crate::ai`] and the mocks used in tests are
//! interchangeable.

use std::pin::Pin;

use anyhow::Result;
use async_trait::async_trait;
use futures_util::Stream;

use crate::mode::Mode;
use crate::state::Message;

/// Incremental text fragments of one model turn, in arrival order
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// A conversation seeded with prior turns and a mode-specific system prompt
#[async_trait]
pub trait Session: Send {
    async fn send_streaming(&mut self, text: &str) -> Result<FragmentStream>;
}

#[async_trait]
pub trait Gateway: Send + Sync + 'static {
    fn create_session(&self, history: &[Message], mode: Mode) -> Box<dyn Session>;

    /// Short title for the first user/model exchange of a chat
    async fn summarize_title(&self, user: &Message, model: &Message) -> Result<String>;

    /// 16-bit mono PCM speech for `text`; `None` when unavailable or failed
    async fn synthesize_speech(&self, text: &str) -> Option<Vec<u8>>;
}
