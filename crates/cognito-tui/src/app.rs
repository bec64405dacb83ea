use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;

use cognito_core::{
    BackgroundAnimation, Chat, Config, Controller, ControllerError, ControllerEvent, Mode, Role,
    SideContext, Snapshot, Translations, View,
};
use ratatui::widgets::ListState;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::tui::AppEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    Sidebar,
    Transcript,
    Input,
    Code, // Code buffer (playground only)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Popup {
    Rename { chat_id: String },
    DisplayName,
    ConfirmDeleteAll,
    Alert(String),
}

/// Next locale after `current` in sorted order, wrapping around
pub fn next_locale(locales: &[&str], current: &str) -> String {
    if locales.is_empty() {
        return current.to_string();
    }
    let idx = locales.iter().position(|l| *l == current);
    let next = match idx {
        Some(i) => locales[(i + 1) % locales.len()],
        None => locales[0],
    };
    next.to_string()
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub controller: Controller,
    pub snapshot: Snapshot,
    pub config: Config,
    pub translations: Translations,
    pub model_label: String,
    events: mpsc::UnboundedSender<AppEvent>,

    // Layout state
    pub focus: Focus,
    pub sidebar_state: ListState,
    pub selected_message: Option<usize>,
    pub transcript_scroll: u16,
    pub follow_tail: bool,

    // Text entry
    pub input: String,
    pub input_cursor: usize, // cursor position in chars
    pub popup: Option<Popup>,
    pub popup_input: String,

    // Coding playground
    pub code: String,
    pub console_output: String,
    pub code_running: bool,

    pub status: Option<String>,
    pub frame: u64,
    pub export_dir: PathBuf,
}

impl App {
    pub fn new(
        controller: Controller,
        config: Config,
        events: mpsc::UnboundedSender<AppEvent>,
        model_label: String,
        export_dir: PathBuf,
    ) -> Self {
        let snapshot = controller.snapshot();
        Self {
            should_quit: false,
            controller,
            snapshot,
            config,
            translations: Translations::bundled(),
            model_label,
            events,
            focus: Focus::Input,
            sidebar_state: ListState::default(),
            selected_message: None,
            transcript_scroll: 0,
            follow_tail: true,
            input: String::new(),
            input_cursor: 0,
            popup: None,
            popup_input: String::new(),
            code: String::new(),
            console_output: String::new(),
            code_running: false,
            status: None,
            frame: 0,
            export_dir,
        }
    }

    pub fn t(&self, key: &str) -> String {
        self.translations.t(self.config.language(), key)
    }

    pub fn active_chat(&self) -> Option<&Chat> {
        self.snapshot.active_chat()
    }

    pub fn in_playground(&self) -> bool {
        self.snapshot.view == View::Playground
    }

    /// Pull fresh state from the controller and keep selections in range
    pub fn refresh(&mut self) {
        let previous_chat = self.snapshot.active_chat_id.clone();
        self.snapshot = self.controller.snapshot();

        let active_idx = self
            .snapshot
            .active_chat_id
            .as_deref()
            .and_then(|id| self.snapshot.chats.iter().position(|c| c.id == id));
        self.sidebar_state.select(active_idx);

        let message_count = self.active_chat().map(|c| c.messages.len()).unwrap_or(0);
        if previous_chat != self.snapshot.active_chat_id {
            self.selected_message = None;
            self.follow_tail = true;
        }
        if let Some(idx) = self.selected_message {
            if idx >= message_count {
                self.selected_message = None;
            }
        }
    }

    pub fn on_controller_event(&mut self, event: ControllerEvent) {
        match event {
            ControllerEvent::Changed => self.refresh(),
            ControllerEvent::Alert(message) => {
                self.refresh();
                self.popup = Some(Popup::Alert(message));
            }
        }
    }

    pub fn tick(&mut self) {
        self.frame = self.frame.wrapping_add(1);
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = Some(status.into());
    }

    /// Run a controller intent in the background; failures become the status line
    fn spawn<F>(&self, intent: F)
    where
        F: Future<Output = Result<(), ControllerError>> + Send + 'static,
    {
        let events = self.events.clone();
        tokio::spawn(async move {
            if let Err(e) = intent.await {
                let _ = events.send(AppEvent::Status(e.to_string()));
            }
        });
    }

    // ----- chat intents -----

    pub fn send_input(&mut self) {
        let text = self.input.trim().to_string();
        if text.is_empty() {
            return;
        }
        if self.snapshot.generating {
            self.set_status(self.t("input.busy"));
            return;
        }

        let side = if self.snapshot.mode == Mode::Coding {
            Some(self.side_context())
        } else {
            None
        };

        self.input.clear();
        self.input_cursor = 0;
        self.follow_tail = true;
        self.status = None;

        let controller = self.controller.clone();
        self.spawn(async move { controller.send_message(&text, side).await });
    }

    /// Code buffer and last console output; a run still in progress has no output yet
    fn side_context(&self) -> SideContext {
        SideContext {
            code: Some(self.code.clone()),
            console_output: (!self.code_running).then(|| self.console_output.clone()),
        }
    }

    pub fn new_chat(&mut self) {
        let controller = self.controller.clone();
        self.focus = Focus::Input;
        self.spawn(async move {
            controller.new_chat().await;
            Ok(())
        });
    }

    pub fn regenerate(&mut self) {
        self.follow_tail = true;
        let controller = self.controller.clone();
        self.spawn(async move { controller.regenerate().await });
    }

    pub fn stop(&mut self) {
        self.controller.stop_generation();
    }

    pub fn switch_mode(&mut self) {
        let target = self.snapshot.mode.toggled();
        self.focus = Focus::Input;
        let controller = self.controller.clone();
        self.spawn(async move { controller.switch_mode(target).await });
    }

    pub fn select_chat_offset(&mut self, delta: isize) {
        let len = self.snapshot.chats.len();
        if len == 0 {
            return;
        }
        let current = self.sidebar_state.selected().unwrap_or(0) as isize;
        let next = (current + delta).clamp(0, len as isize - 1) as usize;
        let id = self.snapshot.chats[next].id.clone();
        if let Err(e) = self.controller.select_chat(&id) {
            self.set_status(e.to_string());
        }
    }

    pub fn delete_active(&mut self) {
        match self.snapshot.active_chat_id.clone() {
            Some(id) => {
                let controller = self.controller.clone();
                self.spawn(async move { controller.delete_chat(&id).await });
            }
            None => self.set_status(self.t("status.noActiveChat")),
        }
    }

    pub fn confirm_delete_all(&mut self) {
        self.popup = None;
        let controller = self.controller.clone();
        self.spawn(async move {
            controller.delete_all_chats().await;
            Ok(())
        });
    }

    pub fn open_rename(&mut self) {
        let active = self.active_chat().map(|c| (c.id.clone(), c.title.clone()));
        match active {
            Some((chat_id, title)) => {
                self.popup_input = title;
                self.popup = Some(Popup::Rename { chat_id });
            }
            None => self.set_status(self.t("status.noActiveChat")),
        }
    }

    pub fn open_display_name(&mut self) {
        self.popup_input = self.config.display_name.clone().unwrap_or_default();
        self.popup = Some(Popup::DisplayName);
    }

    /// Apply the text entered in the current popup
    pub fn submit_popup(&mut self) {
        let text = std::mem::take(&mut self.popup_input);
        match self.popup.take() {
            Some(Popup::Rename { chat_id }) => {
                if let Err(e) = self.controller.rename_chat(&chat_id, &text) {
                    self.set_status(e.to_string());
                }
            }
            Some(Popup::DisplayName) => {
                if let Err(e) = self.config.set_display_name(&text) {
                    warn!(error = %e, "Failed to save display name");
                    self.set_status(e.to_string());
                }
            }
            Some(Popup::ConfirmDeleteAll) => self.confirm_delete_all(),
            Some(Popup::Alert(_)) | None => {}
        }
    }

    pub fn export(&mut self) {
        match self.controller.export_active_chat(&self.export_dir) {
            Ok(path) => {
                info!(path = %path.display(), "Chat exported");
                self.set_status(format!("{} {}", self.t("status.exported"), path.display()));
            }
            Err(e) => self.set_status(format!("{}: {}", self.t("status.exportFailed"), e)),
        }
    }

    // ----- speech -----

    /// Selected message, else the latest model answer
    fn speech_target(&self) -> Option<String> {
        let chat = self.active_chat()?;
        let message = match self.selected_message {
            Some(idx) => chat.messages.get(idx)?,
            None => chat.messages.iter().rev().find(|m| m.role == Role::Model)?,
        };
        Some(message.id.clone())
    }

    pub fn toggle_speech(&mut self) {
        let Some(message_id) = self.speech_target() else {
            return;
        };
        let controller = self.controller.clone();
        self.spawn(async move { controller.toggle_speech(&message_id).await });
    }

    pub fn select_message_offset(&mut self, delta: isize) {
        let count = self.active_chat().map(|c| c.messages.len()).unwrap_or(0);
        if count == 0 {
            return;
        }
        let current = self.selected_message.unwrap_or(count) as isize;
        let next = (current + delta).clamp(0, count as isize - 1) as usize;
        self.selected_message = Some(next);
        self.follow_tail = false;
    }

    // ----- preferences -----

    pub fn cycle_animation(&mut self) {
        let next = self.config.background_animation.next();
        if let Err(e) = self.config.set_background_animation(next) {
            warn!(error = %e, "Failed to save background animation");
        }
        self.set_status(format!("{}: {}", self.t("status.animation"), next.as_str()));
    }

    pub fn cycle_language(&mut self) {
        let next = next_locale(&self.translations.locales(), self.config.language());
        if let Err(e) = self.config.set_language(&next) {
            warn!(error = %e, "Failed to save language");
        }
        self.set_status(format!("{}: {}", self.t("status.language"), next));
    }

    pub fn animation(&self) -> BackgroundAnimation {
        self.config.background_animation
    }

    // ----- playground -----

    pub fn run_code(&mut self) {
        if self.code_running || self.code.trim().is_empty() {
            return;
        }
        self.code_running = true;
        self.console_output = self.t("playground.running");

        let code = self.code.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let output = tokio::process::Command::new("sh")
                .arg("-c")
                .arg(&code)
                .stdin(Stdio::null())
                .output()
                .await;
            let text = match output {
                Ok(out) => {
                    let mut text = String::from_utf8_lossy(&out.stdout).into_owned();
                    text.push_str(&String::from_utf8_lossy(&out.stderr));
                    if !out.status.success() {
                        text.push_str(&format!("\n[{}]", out.status));
                    }
                    text
                }
                Err(e) => format!("Failed to run code: {}", e),
            };
            let _ = events.send(AppEvent::CodeFinished(text));
        });
    }

    pub fn code_finished(&mut self, output: String) {
        self.code_running = false;
        self.console_output = output;
    }
}
