//! Clients for the hosted speech service. Each one implements the matching
//! capability trait of `voice-coach-core`.

mod config;
mod consts;
mod credentials;
mod recognizer;
mod synthesizer;
mod utils;

pub use config::{ClientConfig, ClientConfigBuilder};
pub use credentials::HttpCredentialProvider;
pub use recognizer::StreamingRecognizer;
pub use synthesizer::RestSynthesizer;
