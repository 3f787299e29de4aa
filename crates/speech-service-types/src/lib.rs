//! Wire types for the hosted speech service.
pub mod audio;
pub mod messages;
pub mod ssml;
pub mod token;

pub use messages::{RecognitionStatus, ServiceMessage, SpeechHypothesis, SpeechPhrase};
pub use ssml::{SsmlDocument, escape_xml};
pub use token::TokenResponse;
