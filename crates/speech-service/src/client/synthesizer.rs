use crate::client::consts;
use crate::client::utils;
use async_trait::async_trait;
use secrecy::ExposeSecret;
use speech_service_types::SsmlDocument;
use speech_service_types::audio::{format_sample_rate, le_bytes_to_pcm16};
use voice_coach_core::{AudioClip, Credentials, SynthesisBackend, SynthesisOptions, VoiceError};

/// Sentence synthesis over the service's REST endpoint.
pub struct RestSynthesizer {
    http: reqwest::Client,
}

impl RestSynthesizer {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for RestSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Only raw PCM16 formats can be played without a decoder.
fn pcm_sample_rate(format: &str) -> Result<u32, VoiceError> {
    if !format.starts_with("raw-") || !format.contains("16bit") {
        return Err(VoiceError::Synthesis(format!(
            "output format '{}' is not raw 16-bit PCM",
            format
        )));
    }
    format_sample_rate(format).ok_or_else(|| {
        VoiceError::Synthesis(format!("output format '{}' has no sample rate", format))
    })
}

#[async_trait]
impl SynthesisBackend for RestSynthesizer {
    async fn synthesize(
        &self,
        credentials: &Credentials,
        options: &SynthesisOptions,
        fragment: &str,
    ) -> Result<AudioClip, VoiceError> {
        let sample_rate = pcm_sample_rate(options.sample_format())?;
        let body = SsmlDocument::new(options.voice_name(), fragment).render();

        let response = self
            .http
            .post(utils::synthesis_url(credentials))
            .header(consts::SUBSCRIPTION_KEY_HEADER, credentials.key().expose_secret())
            .header(reqwest::header::CONTENT_TYPE, consts::SSML_CONTENT_TYPE)
            .header(consts::OUTPUT_FORMAT_HEADER, options.sample_format())
            .header(reqwest::header::USER_AGENT, consts::USER_AGENT)
            .body(body)
            .send()
            .await
            .map_err(|e| VoiceError::Synthesis(format!("request failed: {}", e)))?;

        let status = response.status();
        if matches!(status.as_u16(), 401 | 403) {
            return Err(VoiceError::Credential(format!(
                "synthesis rejected with {}",
                status
            )));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(VoiceError::Synthesis(format!("{} {}", status, detail.trim())));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| VoiceError::Synthesis(format!("failed to read audio: {}", e)))?;
        tracing::debug!(
            "synthesized {} bytes for a {}-char fragment",
            bytes.len(),
            fragment.chars().count()
        );
        Ok(AudioClip::new(le_bytes_to_pcm16(&bytes), sample_rate, fragment))
    }
}
