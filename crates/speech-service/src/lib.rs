mod client;

pub use speech_service_types as types;
pub use client::{
    ClientConfig, ClientConfigBuilder, HttpCredentialProvider, RestSynthesizer, StreamingRecognizer,
};
