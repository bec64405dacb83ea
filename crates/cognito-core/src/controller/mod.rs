//! Application controller
//!
//! Owns the chat list, the active chat, the generation flag, the speech slot
//! and the mode/view state. Presentation layers call the operations below and
//! re-render on [`ControllerEvent::Changed`].
//!
//! State lives behind one mutex that is never held across an await. Every
//! async completion (stream fragment, title, speech, timer) re-reads the
//! current state by chat id and message id, so a late result for a chat that
//! was deleted or truncated in the meantime is a no-op.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use futures_util::StreamExt;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::audio::{AudioBackend, Playback};
use crate::debounce::Debouncer;
use crate::export;
use crate::gateway::Gateway;
use crate::mode::{Mode, Transition, TransitionTimings, View};
use crate::prompts::{self, SideContext, CODING_TITLE};
use crate::speech::{SpeechSlot, SpeechState};
use crate::state::{Chat, Message, PLACEHOLDER_TITLE};
use crate::store::ChatStore;

#[cfg(test)]
mod tests;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("A response is already being generated")]
    Busy,
    #[error("Message is empty")]
    EmptyMessage,
    #[error("No active chat")]
    NoActiveChat,
    #[error("Nothing to regenerate")]
    NothingToRegenerate,
    #[error("Chat not found: {0}")]
    ChatNotFound(String),
    #[error("Message not found: {0}")]
    MessageNotFound(String),
    #[error("A mode transition is already in progress")]
    TransitionInProgress,
    #[error("Export failed: {0}")]
    Export(String),
}

/// Notifications for the presentation layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    /// State changed; take a new snapshot
    Changed,
    /// User-visible problem that needs acknowledging
    Alert(String),
}

#[derive(Debug, Clone, Copy)]
pub struct ControllerConfig {
    /// Quiet period before a chat mutation is written to the store
    pub persist_delay: Duration,
    pub timings: TransitionTimings,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            persist_delay: Duration::from_millis(500),
            timings: TransitionTimings::default(),
        }
    }
}

/// Presentation-relevant copy of the controller state
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub chats: Vec<Chat>,
    pub active_chat_id: Option<String>,
    pub generating: bool,
    pub speech: SpeechState,
    /// Message ids with speech synthesis in flight
    pub synthesizing: HashSet<String>,
    pub mode: Mode,
    pub view: View,
    pub transition: Transition,
    pub loaded: bool,
}

impl Snapshot {
    pub fn active_chat(&self) -> Option<&Chat> {
        let id = self.active_chat_id.as_deref()?;
        self.chats.iter().find(|c| c.id == id)
    }
}

/// One in-flight generation. `stop` is private to it, so stopping and then
/// sending again never lets the old stream touch the new generation.
#[derive(Clone)]
struct Generation {
    id: u64,
    chat_id: String,
    stop: Arc<AtomicBool>,
}

#[derive(Default)]
struct AppState {
    chats: Vec<Chat>,
    active: Option<String>,
    generating: bool,
    generation: Option<Generation>,
    generation_seq: u64,
    speech: SpeechSlot,
    synthesizing: HashSet<String>,
    mode: Mode,
    view: View,
    transition: Transition,
    loaded: bool,
}

impl AppState {
    fn chat(&self, id: &str) -> Option<&Chat> {
        self.chats.iter().find(|c| c.id == id)
    }

    fn chat_mut(&mut self, id: &str) -> Option<&mut Chat> {
        self.chats.iter_mut().find(|c| c.id == id)
    }

    fn insert_new_chat(&mut self) -> Chat {
        let chat = Chat::new();
        self.chats.insert(0, chat.clone());
        self.active = Some(chat.id.clone());
        chat
    }

    fn claim_generation(&mut self, chat_id: &str) -> Generation {
        self.generation_seq += 1;
        let generation = Generation {
            id: self.generation_seq,
            chat_id: chat_id.to_string(),
            stop: Arc::new(AtomicBool::new(false)),
        };
        self.generating = true;
        self.generation = Some(generation.clone());
        generation
    }

    fn cancel_generation(&mut self) {
        if let Some(generation) = self.generation.take() {
            generation.stop.store(true, Ordering::SeqCst);
        }
        self.generating = false;
    }

    /// Stop playback when it belongs to one of `messages`
    fn stop_speech_within(&mut self, messages: &[Message]) {
        let speaking = self
            .speech
            .state
            .message_id()
            .map(|id| messages.iter().any(|m| m.id == id))
            .unwrap_or(false);
        if speaking {
            self.speech.stop();
        }
    }
}

/// What a streaming turn needs once the state lock is released
struct Turn {
    chat_id: String,
    user_id: String,
    placeholder_id: String,
    history: Vec<Message>,
    payload: String,
    mode: Mode,
    first_exchange: bool,
}

enum Outcome {
    Completed,
    Stopped,
    Failed,
}

enum SpeechAction {
    Pause,
    Resume,
    Play(String),
    Synthesize { chat_id: String, text: String },
    Wait,
}

struct Inner {
    state: Mutex<AppState>,
    store: Arc<dyn ChatStore>,
    gateway: Arc<dyn Gateway>,
    audio: Arc<dyn AudioBackend>,
    config: ControllerConfig,
    timers: Mutex<HashMap<String, Debouncer>>,
    events: mpsc::UnboundedSender<ControllerEvent>,
}

#[derive(Clone)]
pub struct Controller {
    inner: Arc<Inner>,
}

impl Controller {
    pub fn new(
        store: Arc<dyn ChatStore>,
        gateway: Arc<dyn Gateway>,
        audio: Arc<dyn AudioBackend>,
        config: ControllerConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ControllerEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let inner = Inner {
            state: Mutex::new(AppState::default()),
            store,
            gateway,
            audio,
            config,
            timers: Mutex::new(HashMap::new()),
            events,
        };
        (Self { inner: Arc::new(inner) }, rx)
    }

    pub fn snapshot(&self) -> Snapshot {
        let st = self.inner.state.lock();
        Snapshot {
            chats: st.chats.clone(),
            active_chat_id: st.active.clone(),
            generating: st.generating,
            speech: st.speech.state.clone(),
            synthesizing: st.synthesizing.clone(),
            mode: st.mode,
            view: st.view,
            transition: st.transition,
            loaded: st.loaded,
        }
    }

    fn emit(&self, event: ControllerEvent) {
        // The presentation may already be gone during shutdown
        let _ = self.inner.events.send(event);
    }

    fn changed(&self) {
        self.emit(ControllerEvent::Changed);
    }

    fn alert(&self, message: impl Into<String>) {
        self.emit(ControllerEvent::Alert(message.into()));
    }

    // ----- persistence -----

    /// Debounced write of one chat, keyed by chat id
    fn schedule_persist(&self, chat_id: &str) {
        if !self.inner.state.lock().loaded {
            return;
        }

        let this = self.clone();
        let id = chat_id.to_string();
        let mut timers = self.inner.timers.lock();
        let debouncer = timers
            .entry(id.clone())
            .or_insert_with(|| Debouncer::new(self.inner.config.persist_delay));
        debouncer.schedule(async move {
            this.persist_now(&id).await;
        });
    }

    /// Write the chat as it is right now; a vanished chat is skipped
    async fn persist_now(&self, chat_id: &str) {
        let chat = match self.inner.state.lock().chat(chat_id).cloned() {
            Some(chat) => chat,
            None => return,
        };
        if let Err(e) = self.inner.store.put(&chat).await {
            error!(chat_id, error = %e, "Failed to persist chat");
        }
    }

    fn cancel_persist(&self, chat_id: &str) {
        self.inner.timers.lock().remove(chat_id);
    }

    // ----- chat list -----

    /// Load stored chats. Chats created before this completes are kept in
    /// front of the loaded ones and written out.
    pub async fn load(&self) {
        let stored = match self.inner.store.load_all().await {
            Ok(chats) => chats,
            Err(e) => {
                error!(error = %e, "Failed to load chats, starting empty");
                Vec::new()
            }
        };

        let early: Vec<String> = {
            let mut st = self.inner.state.lock();
            let early: Vec<String> = st.chats.iter().map(|c| c.id.clone()).collect();
            st.chats
                .extend(stored.into_iter().filter(|c| !early.contains(&c.id)));
            st.loaded = true;
            info!(chats = st.chats.len(), "Chats loaded");
            early
        };

        for id in &early {
            self.schedule_persist(id);
        }
        self.changed();
    }

    /// Create an empty chat, persist it and make it active
    pub async fn new_chat(&self) -> String {
        let (chat, loaded) = {
            let mut st = self.inner.state.lock();
            let chat = st.insert_new_chat();
            (chat, st.loaded)
        };
        self.persist_created(&chat, loaded).await;
        self.changed();
        chat.id
    }

    async fn persist_created(&self, chat: &Chat, loaded: bool) {
        if !loaded {
            return;
        }
        if let Err(e) = self.inner.store.put(chat).await {
            error!(chat_id = %chat.id, error = %e, "Failed to persist new chat");
        }
    }

    pub fn select_chat(&self, chat_id: &str) -> Result<(), ControllerError> {
        {
            let mut st = self.inner.state.lock();
            if st.chat(chat_id).is_none() {
                return Err(ControllerError::ChatNotFound(chat_id.to_string()));
            }
            st.active = Some(chat_id.to_string());
        }
        self.changed();
        Ok(())
    }

    /// Blank titles fall back to the placeholder
    pub fn rename_chat(&self, chat_id: &str, title: &str) -> Result<(), ControllerError> {
        {
            let mut st = self.inner.state.lock();
            let chat = st
                .chat_mut(chat_id)
                .ok_or_else(|| ControllerError::ChatNotFound(chat_id.to_string()))?;
            let title = title.trim();
            chat.title = if title.is_empty() {
                PLACEHOLDER_TITLE.to_string()
            } else {
                title.to_string()
            };
        }
        self.schedule_persist(chat_id);
        self.changed();
        Ok(())
    }

    pub async fn delete_chat(&self, chat_id: &str) -> Result<(), ControllerError> {
        {
            let mut st = self.inner.state.lock();
            let pos = st
                .chats
                .iter()
                .position(|c| c.id == chat_id)
                .ok_or_else(|| ControllerError::ChatNotFound(chat_id.to_string()))?;
            let removed = st.chats.remove(pos);
            st.stop_speech_within(&removed.messages);

            let generating_here = st
                .generation
                .as_ref()
                .map(|g| g.chat_id == chat_id)
                .unwrap_or(false);
            if generating_here {
                st.cancel_generation();
            }

            if st.active.as_deref() == Some(chat_id) {
                let next = (if pos > 0 { st.chats.get(pos - 1) } else { st.chats.first() })
                    .map(|c| c.id.clone());
                st.active = next;
            }
        }

        self.cancel_persist(chat_id);
        if let Err(e) = self.inner.store.delete_one(chat_id).await {
            error!(chat_id, error = %e, "Failed to delete chat from store");
        }
        self.changed();
        Ok(())
    }

    /// Clear every chat. Confirmation is the caller's job.
    pub async fn delete_all_chats(&self) {
        {
            let mut st = self.inner.state.lock();
            st.speech.stop();
            st.cancel_generation();
            st.chats.clear();
            st.active = None;
        }

        self.inner.timers.lock().clear();
        if let Err(e) = self.inner.store.delete_all().await {
            error!(error = %e, "Failed to clear chat store");
        }
        self.changed();
    }

    pub fn export_active_chat(&self, dir: &Path) -> Result<PathBuf, ControllerError> {
        let chat = {
            let st = self.inner.state.lock();
            let id = st.active.as_deref().ok_or(ControllerError::NoActiveChat)?;
            st.chat(id).cloned().ok_or(ControllerError::NoActiveChat)?
        };
        export::write_transcript(&chat, dir).map_err(|e| ControllerError::Export(format!("{:#}", e)))
    }

    // ----- generation -----

    /// Send `content` in the active chat (creating one when none is active)
    /// and stream the model's answer into a placeholder message.
    ///
    /// In coding mode the side context is appended to the text sent to the
    /// model; the stored user message only holds `content`.
    pub async fn send_message(
        &self,
        content: &str,
        side: Option<SideContext>,
    ) -> Result<(), ControllerError> {
        if content.trim().is_empty() {
            return Err(ControllerError::EmptyMessage);
        }

        let (turn, generation, created) = {
            let mut st = self.inner.state.lock();
            if st.generating {
                return Err(ControllerError::Busy);
            }

            let active = st.active.clone().filter(|id| st.chat(id).is_some());
            let (chat_id, created) = match active {
                Some(id) => (id, None),
                None => {
                    let chat = st.insert_new_chat();
                    (chat.id.clone(), Some((chat, st.loaded)))
                }
            };

            let mode = st.mode;
            let user = Message::user(content);
            let placeholder = Message::placeholder();
            let chat = st
                .chat_mut(&chat_id)
                .ok_or_else(|| ControllerError::ChatNotFound(chat_id.clone()))?;
            let first_exchange = chat.messages.is_empty();
            let history = chat.messages.clone();
            chat.messages.push(user.clone());
            chat.messages.push(placeholder.clone());

            let generation = st.claim_generation(&chat_id);
            let turn = Turn {
                chat_id,
                user_id: user.id,
                placeholder_id: placeholder.id,
                history,
                payload: prompts::outgoing_payload(content, mode, side.as_ref()),
                mode,
                first_exchange,
            };
            (turn, generation, created)
        };

        if let Some((chat, loaded)) = created {
            self.persist_created(&chat, loaded).await;
        }
        self.schedule_persist(&turn.chat_id);
        self.changed();

        self.run_turn(turn, generation).await;
        Ok(())
    }

    /// Replace the last model answer with a fresh one for the same question
    pub async fn regenerate(&self) -> Result<(), ControllerError> {
        let (turn, generation) = {
            let mut st = self.inner.state.lock();
            let chat_id = st.active.clone().ok_or(ControllerError::NoActiveChat)?;
            if st.generating {
                return Err(ControllerError::Busy);
            }

            let mode = st.mode;
            let chat = st.chat_mut(&chat_id).ok_or(ControllerError::NoActiveChat)?;
            let model_idx = chat
                .last_exchange()
                .ok_or(ControllerError::NothingToRegenerate)?;
            let removed: Vec<Message> = chat.messages.drain(model_idx - 1..).collect();
            let user = removed[0].clone();
            let history = chat.messages.clone();
            let placeholder = Message::placeholder();
            chat.messages.push(user.clone());
            chat.messages.push(placeholder.clone());

            st.stop_speech_within(&removed);
            let generation = st.claim_generation(&chat_id);
            let turn = Turn {
                chat_id,
                user_id: user.id,
                placeholder_id: placeholder.id,
                history,
                payload: user.content,
                mode,
                first_exchange: false,
            };
            (turn, generation)
        };

        self.schedule_persist(&turn.chat_id);
        self.changed();

        self.run_turn(turn, generation).await;
        Ok(())
    }

    /// Stop consuming the current stream; the partial answer stays
    pub fn stop_generation(&self) {
        {
            let mut st = self.inner.state.lock();
            if !st.generating {
                return;
            }
            st.cancel_generation();
        }
        debug!("Generation stopped");
        self.changed();
    }

    async fn run_turn(&self, turn: Turn, generation: Generation) {
        let outcome = self.stream_into_placeholder(&turn, &generation).await;

        if let Outcome::Failed = outcome {
            let replaced = {
                let mut st = self.inner.state.lock();
                st.chat_mut(&turn.chat_id)
                    .and_then(|chat| chat.message_mut(&turn.placeholder_id))
                    .map(|msg| msg.content = prompts::random_fallback_error().to_string())
                    .is_some()
            };
            if replaced {
                self.schedule_persist(&turn.chat_id);
            }
        }

        {
            let mut st = self.inner.state.lock();
            let current = st
                .generation
                .as_ref()
                .map(|g| g.id == generation.id)
                .unwrap_or(false);
            if current {
                st.generation = None;
                st.generating = false;
            }
        }
        self.changed();

        if let Outcome::Completed = outcome {
            self.after_completion(&turn);
        }
    }

    async fn stream_into_placeholder(&self, turn: &Turn, generation: &Generation) -> Outcome {
        let mut session = self.inner.gateway.create_session(&turn.history, turn.mode);
        let mut stream = match session.send_streaming(&turn.payload).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(chat_id = %turn.chat_id, error = %e, "Failed to open response stream");
                return if generation.stop.load(Ordering::SeqCst) {
                    Outcome::Stopped
                } else {
                    Outcome::Failed
                };
            }
        };

        while let Some(item) = stream.next().await {
            if generation.stop.load(Ordering::SeqCst) {
                return Outcome::Stopped;
            }
            match item {
                Ok(fragment) => self.append_fragment(turn, &fragment),
                Err(e) => {
                    warn!(chat_id = %turn.chat_id, error = %e, "Response stream failed");
                    return Outcome::Failed;
                }
            }
        }

        if generation.stop.load(Ordering::SeqCst) {
            Outcome::Stopped
        } else {
            Outcome::Completed
        }
    }

    fn append_fragment(&self, turn: &Turn, fragment: &str) {
        let applied = {
            let mut st = self.inner.state.lock();
            st.chat_mut(&turn.chat_id)
                .and_then(|chat| chat.message_mut(&turn.placeholder_id))
                .map(|msg| msg.content.push_str(fragment))
                .is_some()
        };
        if applied {
            self.schedule_persist(&turn.chat_id);
            self.changed();
        }
    }

    /// Title and speech side effects of a finished answer
    fn after_completion(&self, turn: &Turn) {
        let pair = {
            let st = self.inner.state.lock();
            st.chat(&turn.chat_id).and_then(|chat| {
                let user = chat.message(&turn.user_id)?.clone();
                let model = chat.message(&turn.placeholder_id)?.clone();
                Some((user, model))
            })
        };
        let (user, model) = match pair {
            Some(pair) if !pair.1.content.is_empty() => pair,
            _ => return,
        };

        if turn.first_exchange {
            match turn.mode {
                Mode::Coding => self.apply_title(&turn.chat_id, CODING_TITLE.to_string()),
                Mode::Conversational => {
                    let this = self.clone();
                    let chat_id = turn.chat_id.clone();
                    let (user, model) = (user, model.clone());
                    tokio::spawn(async move {
                        match this.inner.gateway.summarize_title(&user, &model).await {
                            Ok(title) => this.apply_title(&chat_id, title),
                            Err(e) => warn!(chat_id = %chat_id, error = %e, "Title generation failed"),
                        }
                    });
                }
            }
        }

        let claimed = self.inner.state.lock().synthesizing.insert(model.id.clone());
        if claimed {
            let this = self.clone();
            let chat_id = turn.chat_id.clone();
            tokio::spawn(async move {
                this.synthesize(chat_id, model.id, model.content, false).await;
            });
        }
    }

    /// A user rename made while the title was being generated wins
    fn apply_title(&self, chat_id: &str, title: String) {
        let applied = {
            let mut st = self.inner.state.lock();
            match st.chat_mut(chat_id) {
                Some(chat) if chat.has_placeholder_title() => {
                    chat.title = title;
                    true
                }
                _ => false,
            }
        };
        if applied {
            self.schedule_persist(chat_id);
            self.changed();
        }
    }

    // ----- speech -----

    /// Play, pause or resume speech for a message
    pub async fn toggle_speech(&self, message_id: &str) -> Result<(), ControllerError> {
        let action = {
            let mut st = self.inner.state.lock();
            if st.speech.state.is_playing(message_id) {
                SpeechAction::Pause
            } else if st.speech.state.is_paused(message_id) {
                SpeechAction::Resume
            } else {
                st.speech.stop();
                let (chat_id, message) = st
                    .chats
                    .iter()
                    .find_map(|c| c.message(message_id).map(|m| (c.id.clone(), m.clone())))
                    .ok_or_else(|| ControllerError::MessageNotFound(message_id.to_string()))?;

                match message.audio_content {
                    Some(audio) => SpeechAction::Play(audio),
                    None if st.synthesizing.contains(message_id) => SpeechAction::Wait,
                    None => {
                        st.synthesizing.insert(message_id.to_string());
                        SpeechAction::Synthesize {
                            chat_id,
                            text: message.content,
                        }
                    }
                }
            }
        };

        match action {
            SpeechAction::Pause => {
                let result = self.inner.state.lock().speech.pause();
                self.settle_control(result);
            }
            SpeechAction::Resume => {
                let result = self.inner.state.lock().speech.resume();
                self.settle_control(result);
            }
            SpeechAction::Play(encoded) => {
                match base64::engine::general_purpose::STANDARD.decode(encoded) {
                    Ok(pcm) => self.start_playback(message_id.to_string(), pcm).await,
                    Err(e) => {
                        warn!(message_id, error = %e, "Cached speech is not valid base64");
                        self.alert("Could not play this message.");
                        self.changed();
                    }
                }
            }
            SpeechAction::Synthesize { chat_id, text } => {
                self.changed();
                self.synthesize(chat_id, message_id.to_string(), text, true).await;
            }
            SpeechAction::Wait => self.changed(),
        }
        Ok(())
    }

    fn settle_control(&self, result: anyhow::Result<()>) {
        if let Err(e) = result {
            warn!(error = %e, "Playback control failed");
            self.inner.state.lock().speech.stop();
            self.alert("Playback failed.");
        }
        self.changed();
    }

    /// Synthesize and cache on the message; play it only when the user asked
    /// for it. The caller has already claimed `message_id` in the in-flight set.
    async fn synthesize(&self, chat_id: String, message_id: String, text: String, requested: bool) {
        let pcm = self.inner.gateway.synthesize_speech(&text).await;
        self.inner.state.lock().synthesizing.remove(&message_id);

        let pcm = match pcm {
            Some(pcm) => pcm,
            None => {
                if requested {
                    self.alert("Speech is not available right now.");
                } else {
                    debug!(message_id = %message_id, "No speech for finished answer");
                }
                self.changed();
                return;
            }
        };

        let encoded = base64::engine::general_purpose::STANDARD.encode(&pcm);
        let attached = {
            let mut st = self.inner.state.lock();
            st.chat_mut(&chat_id)
                .and_then(|chat| chat.message_mut(&message_id))
                .map(|msg| msg.audio_content = Some(encoded))
                .is_some()
        };
        if !attached {
            self.changed();
            return;
        }

        self.schedule_persist(&chat_id);
        if requested {
            self.start_playback(message_id, pcm).await;
        } else {
            // Cached for a later toggle; whatever is playing keeps playing
            self.changed();
        }
    }

    async fn start_playback(&self, message_id: String, pcm: Vec<u8>) {
        // Only one playback at a time: end the current one before the next starts
        self.inner.state.lock().speech.stop();

        match self.inner.audio.play(pcm).await {
            Ok(Playback { control, finished }) => {
                let token = self.inner.state.lock().speech.start(message_id.clone(), control);
                self.changed();

                let this = self.clone();
                tokio::spawn(async move {
                    let outcome = finished.await;
                    // A stopped or replaced playback no longer owns the slot
                    if !this.inner.state.lock().speech.finish(&message_id, token) {
                        return;
                    }
                    match outcome {
                        Ok(Ok(())) => debug!(message_id = %message_id, "Playback finished"),
                        Ok(Err(e)) => {
                            warn!(message_id = %message_id, error = %e, "Playback failed");
                            this.alert("Playback failed.");
                        }
                        Err(_) => {
                            warn!(message_id = %message_id, "Playback ended without a result");
                            this.alert("Playback failed.");
                        }
                    }
                    this.changed();
                });
            }
            Err(e) => {
                warn!(message_id = %message_id, error = %e, "Playback failed to start");
                self.inner.state.lock().speech.stop();
                self.alert("Playback failed.");
                self.changed();
            }
        }
    }

    // ----- mode -----

    /// Staged switch between the chat view and the coding playground
    pub async fn switch_mode(&self, target: Mode) -> Result<(), ControllerError> {
        let needs_chat = {
            let mut st = self.inner.state.lock();
            if st.transition != Transition::None {
                return Err(ControllerError::TransitionInProgress);
            }
            if st.mode == target {
                return Ok(());
            }
            st.transition = match target {
                Mode::Coding => Transition::Entering,
                Mode::Conversational => Transition::Exiting,
            };
            target == Mode::Coding && st.active.as_deref().and_then(|id| st.chat(id)).is_none()
        };

        if needs_chat {
            self.new_chat().await;
        }
        self.changed();

        let timings = self.inner.config.timings;
        match target {
            Mode::Coding => {
                tokio::time::sleep(timings.enter_dwell).await;
                self.swap_mode(target, true);
            }
            Mode::Conversational => {
                tokio::time::sleep(timings.exit_swap).await;
                self.swap_mode(target, false);
                tokio::time::sleep(timings.exit_tail()).await;
                self.inner.state.lock().transition = Transition::None;
                self.changed();
            }
        }
        info!(mode = ?target, "Mode switched");
        Ok(())
    }

    fn swap_mode(&self, mode: Mode, clear_overlay: bool) {
        {
            let mut st = self.inner.state.lock();
            st.mode = mode;
            st.view = mode.view();
            if clear_overlay {
                st.transition = Transition::None;
            }
        }
        self.changed();
    }
}
