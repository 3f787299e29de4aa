use crate::error::VoiceError;
use crate::playback::PlaybackOutcome;
use crate::recognition::RecognitionEvent;
use std::fmt;

/// Phase of the voice conversation, as rendered by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Listening,
    Processing,
    Speaking,
}

impl SessionState {
    /// States in which the microphone is expected to be held.
    pub fn holds_microphone(self) -> bool {
        matches!(self, SessionState::Listening | SessionState::Processing)
    }
}

/// Identifies one forwarded transcript; a response must name the turn it
/// answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TurnId(pub(crate) u64);

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "turn-{}", self.0)
    }
}

/// Notifications from the controller to the host UI.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    StateChanged(SessionState),
    /// Live, non-final recognition text. Display only.
    Interim(String),
    /// The single final transcript of a listening cycle.
    Transcript { turn: TurnId, text: String },
    /// Fired exactly once per spoken response.
    SpeakingComplete(PlaybackOutcome),
    Error(VoiceError),
}

/// Reports from running sessions back to the controller, tagged with the
/// generation of the handle that produced them.
#[derive(Debug)]
pub enum SessionEvent {
    Recognition {
        generation: u64,
        event: RecognitionEvent,
    },
    PlaybackFinished {
        generation: u64,
        outcome: PlaybackOutcome,
    },
}
