use crate::client::consts;
use anyhow::{Context, Result};
use secrecy::ExposeSecret;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::{Request, generate_key};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use voice_coach_core::{CAPTURE_SAMPLE_RATE, Credentials, RecognitionOptions};

/// `wss://` base for recognition: the grant's endpoint, else the region host.
fn recognition_base(credentials: &Credentials) -> String {
    match credentials.endpoint() {
        Some(endpoint) => with_scheme(endpoint, "wss"),
        None => format!("wss://{}.stt.speech.microsoft.com", credentials.region()),
    }
}

fn synthesis_base(credentials: &Credentials) -> String {
    match credentials.endpoint() {
        Some(endpoint) => with_scheme(endpoint, "https"),
        None => format!("https://{}.tts.speech.microsoft.com", credentials.region()),
    }
}

fn with_scheme(endpoint: &str, scheme: &str) -> String {
    let rest = endpoint
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(endpoint);
    format!("{}://{}", scheme, rest.trim_end_matches('/'))
}

pub(crate) fn recognition_url(credentials: &Credentials, options: &RecognitionOptions) -> String {
    format!(
        "{}{}?language={}&format=simple&initialSilenceTimeoutMs={}&endSilenceTimeoutMs={}&segmentationSilenceTimeoutMs={}",
        recognition_base(credentials),
        consts::RECOGNITION_PATH,
        options.language(),
        options.initial_silence_ms(),
        options.end_silence_ms(),
        options.segmentation_silence_ms(),
    )
}

pub(crate) fn synthesis_url(credentials: &Credentials) -> String {
    format!("{}{}", synthesis_base(credentials), consts::SYNTHESIS_PATH)
}

pub(crate) fn connection_id() -> String {
    generate_key()
}

/// Builds the authenticated WebSocket handshake for continuous recognition.
pub(crate) fn build_recognition_request(
    credentials: &Credentials,
    options: &RecognitionOptions,
    connection_id: &str,
) -> Result<Request> {
    let url = recognition_url(credentials, options);
    let mut request = url
        .as_str()
        .into_client_request()
        .context("invalid recognition url")?;

    let headers = request.headers_mut();
    headers.insert(
        consts::SUBSCRIPTION_KEY_HEADER,
        HeaderValue::from_str(credentials.key().expose_secret())
            .context("speech key is not a valid header value")?,
    );
    headers.insert(
        consts::CONNECTION_ID_HEADER,
        HeaderValue::from_str(connection_id).context("invalid connection id")?,
    );
    headers.insert(
        "Content-Type",
        HeaderValue::from_str(&format!(
            "audio/wav; codecs=audio/pcm; samplerate={}",
            CAPTURE_SAMPLE_RATE
        ))?,
    );
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_urls() {
        let credentials = Credentials::new("k", "westus2");

        assert_eq!(
            recognition_url(&credentials, &RecognitionOptions::default()),
            "wss://westus2.stt.speech.microsoft.com/speech/recognition/conversation/cognitiveservices/v1\
             ?language=en-US&format=simple&initialSilenceTimeoutMs=5000&endSilenceTimeoutMs=1500&segmentationSilenceTimeoutMs=1000"
        );
        assert_eq!(
            synthesis_url(&credentials),
            "https://westus2.tts.speech.microsoft.com/cognitiveservices/v1"
        );
    }

    #[test]
    fn endpoint_overrides_region() {
        let credentials =
            Credentials::new("k", "").with_endpoint("https://coach.cognitiveservices.azure.com/");
        let options = RecognitionOptions::default().with_end_silence_ms(800);

        let url = recognition_url(&credentials, &options);
        assert!(url.starts_with(
            "wss://coach.cognitiveservices.azure.com/speech/recognition/conversation/cognitiveservices/v1?"
        ));
        assert!(url.contains("endSilenceTimeoutMs=800"));
        assert_eq!(
            synthesis_url(&credentials),
            "https://coach.cognitiveservices.azure.com/cognitiveservices/v1"
        );
    }

    #[test]
    fn handshake_carries_auth_and_format_headers() {
        let credentials = Credentials::new("secret-key", "eastus");

        let request =
            build_recognition_request(&credentials, &RecognitionOptions::default(), "abc").unwrap();

        let headers = request.headers();
        assert_eq!(headers[consts::SUBSCRIPTION_KEY_HEADER], "secret-key");
        assert_eq!(headers[consts::CONNECTION_ID_HEADER], "abc");
        assert_eq!(
            headers["Content-Type"],
            "audio/wav; codecs=audio/pcm; samplerate=16000"
        );
    }
}
