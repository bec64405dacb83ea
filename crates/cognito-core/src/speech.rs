//! The global "active speech" slot

use crate::audio::PlaybackControl;

/// Observable state of the speech slot
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SpeechState {
    #[default]
    Idle,
    Playing(String),
    Paused(String),
}

impl SpeechState {
    pub fn message_id(&self) -> Option<&str> {
        match self {
            SpeechState::Idle => None,
            SpeechState::Playing(id) | SpeechState::Paused(id) => Some(id),
        }
    }

    pub fn is_playing(&self, message_id: &str) -> bool {
        matches!(self, SpeechState::Playing(id) if id == message_id)
    }

    pub fn is_paused(&self, message_id: &str) -> bool {
        matches!(self, SpeechState::Paused(id) if id == message_id)
    }
}

/// Speech slot plus the playback resource backing it.
///
/// `token` increases with every playback so a completion callback from an
/// older playback of the same message cannot reset a newer one.
#[derive(Default)]
pub(crate) struct SpeechSlot {
    pub state: SpeechState,
    pub token: u64,
    control: Option<Box<dyn PlaybackControl>>,
}

impl SpeechSlot {
    /// Release the current playback (if any) and return to Idle
    pub fn stop(&mut self) {
        if let Some(mut control) = self.control.take() {
            control.stop();
        }
        self.state = SpeechState::Idle;
    }

    /// Stop whatever is active and take ownership of a new playback
    pub fn start(&mut self, message_id: String, control: Box<dyn PlaybackControl>) -> u64 {
        self.stop();
        self.token += 1;
        self.control = Some(control);
        self.state = SpeechState::Playing(message_id);
        self.token
    }

    pub fn pause(&mut self) -> anyhow::Result<()> {
        if let (SpeechState::Playing(id), Some(control)) = (&self.state, self.control.as_mut()) {
            control.pause()?;
            self.state = SpeechState::Paused(id.clone());
        }
        Ok(())
    }

    pub fn resume(&mut self) -> anyhow::Result<()> {
        if let (SpeechState::Paused(id), Some(control)) = (&self.state, self.control.as_mut()) {
            control.resume()?;
            self.state = SpeechState::Playing(id.clone());
        }
        Ok(())
    }

    /// End of a playback, natural or failed. Only the playback identified by
    /// `token` may end the slot, whether it is playing or paused.
    pub fn finish(&mut self, message_id: &str, token: u64) -> bool {
        if self.token == token && self.state.message_id() == Some(message_id) {
            self.control = None;
            self.state = SpeechState::Idle;
            true
        } else {
            false
        }
    }
}
