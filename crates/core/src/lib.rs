//! Voice conversation session control.
//!
//! The [`VoiceSessionController`] arbitrates the microphone, continuous speech
//! recognition and spoken responses for one conversation. Every capability it
//! drives sits behind a trait so hosts can plug in native audio and hosted
//! speech services.

pub mod controller;
pub mod credentials;
pub mod error;
pub mod events;
pub mod handle;
pub mod microphone;
pub mod playback;
pub mod recognition;

#[cfg(test)]
pub(crate) mod testing;

pub use controller::{
    ControllerConfig, ControllerHandle, ControllerSnapshot, SpeechBackends, VoiceSessionController,
};
pub use credentials::{CredentialProvider, Credentials, NoCredentialEndpoint, TokenGrant};
pub use error::VoiceError;
pub use events::{HostEvent, SessionState, TurnId};
pub use handle::{ResourceHandle, ResourceKind};
pub use microphone::{
    AudioStream, CAPTURE_SAMPLE_RATE, CaptureStream, MicrophoneDevice, MicrophoneLease,
    MicrophoneResource,
};
pub use playback::{
    AudioClip, AudioSink, PlaybackOutcome, SpeechOutput, SpeechPlaybackSession, SynthesisBackend,
    SynthesisOptions, split_sentences,
};
pub use recognition::{
    RecognitionBackend, RecognitionChannel, RecognitionEvent, RecognitionOptions,
    RecognitionSession,
};
