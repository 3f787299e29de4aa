//! Native audio for the voice coach: device lookup, sample conversion and
//! `cpal` implementations of the microphone and speaker capabilities.

pub mod audio;
pub mod device;
pub mod microphone;
pub mod speaker;

pub use microphone::CpalMicrophone;
pub use speaker::CpalSpeaker;
