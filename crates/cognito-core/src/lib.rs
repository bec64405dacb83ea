pub mod ai;
pub mod audio;
pub mod config;
pub mod controller;
pub mod debounce;
pub mod export;
pub mod gateway;
pub mod i18n;
pub mod mode;
pub mod prompts;
pub mod provider;
mod speech;
pub mod state;
pub mod store;

// Re-export main types for convenience
pub use ai::{gateway_for, GeminiClient, OllamaClient};
pub use audio::{AudioBackend, Playback, PlaybackControl};
pub use config::{BackgroundAnimation, Config};
pub use controller::{Controller, ControllerConfig, ControllerError, ControllerEvent, Snapshot};
pub use gateway::{FragmentStream, Gateway, Session};
pub use i18n::Translations;
pub use mode::{Mode, Transition, View};
pub use prompts::SideContext;
pub use provider::Provider;
pub use speech::SpeechState;
pub use state::{Chat, Message, Role};
pub use store::{ChatStore, InMemoryChatStore, SqliteChatStore};
