use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Interaction mode; decides the system prompt and title behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Mode {
    #[default]
    Conversational,
    Coding,
}

impl Mode {
    pub fn toggled(self) -> Self {
        match self {
            Mode::Conversational => Mode::Coding,
            Mode::Coding => Mode::Conversational,
        }
    }

    /// The view rendered while this mode is active
    pub fn view(self) -> View {
        match self {
            Mode::Conversational => View::Chat,
            Mode::Coding => View::Playground,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum View {
    #[default]
    Chat,
    Playground,
}

/// Overlay shown while the view swaps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transition {
    #[default]
    None,
    Entering,
    Exiting,
}

/// Timings for the staged view swap
#[derive(Debug, Clone, Copy)]
pub struct TransitionTimings {
    /// Overlay time before the swap when entering coding mode
    pub enter_dwell: Duration,
    /// Point into the exit overlay at which the view swaps back
    pub exit_swap: Duration,
    /// Full duration of the exit overlay
    pub exit_total: Duration,
}

impl Default for TransitionTimings {
    fn default() -> Self {
        Self {
            enter_dwell: Duration::from_millis(1500),
            exit_swap: Duration::from_millis(600),
            exit_total: Duration::from_millis(1200),
        }
    }
}

impl TransitionTimings {
    /// Remaining overlay time after the exit swap
    pub fn exit_tail(&self) -> Duration {
        self.exit_total.saturating_sub(self.exit_swap)
    }
}
