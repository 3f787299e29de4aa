//! Application Configuration Module
//!
//! Loads the voice coach settings from environment variables (and `.env` for
//! local development) into one struct that is passed to the wiring in `main`.

use secrecy::SecretString;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// Holds all configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Endpoint that issues short-lived speech credentials.
    pub speech_token_url: Option<String>,
    pub speech_key: Option<SecretString>,
    pub speech_region: Option<String>,
    pub speech_endpoint: Option<String>,
    pub voice_name: String,
    pub output_format: String,
    pub end_silence_ms: u32,
    pub segmentation_silence_ms: u32,
    pub initial_silence_ms: u32,
    pub processing_timeout: Duration,
    pub auto_resume: bool,
    pub openai_api_key: SecretString,
    pub chat_model: String,
    pub log_level: Level,
}

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    // *   `OPENAI_API_KEY`: Required. Key for the coach's chat model.
    // *   `SPEECH_TOKEN_URL`: (Optional) Endpoint issuing speech credentials.
    // *   `AZURE_SPEECH_KEY` / `AZURE_SPEECH_REGION` / `AZURE_SPEECH_ENDPOINT`: (Optional) Static speech credentials.
    // *   `SPEECH_VOICE_NAME`, `SPEECH_OUTPUT_FORMAT`: (Optional) Synthesis voice and raw PCM format.
    // *   `SPEECH_END_SILENCE_MS`, `SPEECH_SEGMENTATION_SILENCE_MS`, `SPEECH_INITIAL_SILENCE_MS`: (Optional) Recognizer timeouts.
    // *   `PROCESSING_TIMEOUT_SECS`: (Optional) How long to wait for a reply. Defaults to 15.
    // *   `AUTO_RESUME`: (Optional) Listen again after speaking. Defaults to false.
    // *   `CHAT_MODEL`: (Optional) Defaults to "gpt-4o-mini".
    // *   `RUST_LOG`: (Optional) The logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file. This is useful for local development and is ignored if not present.
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let openai_api_key = var("OPENAI_API_KEY")
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;

        let log_level_str = var("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str
            .parse::<Level>()
            .map_err(|_| invalid("RUST_LOG", &log_level_str))?;

        Ok(Self {
            speech_token_url: var("SPEECH_TOKEN_URL"),
            speech_key: var("AZURE_SPEECH_KEY").map(SecretString::from),
            speech_region: var("AZURE_SPEECH_REGION"),
            speech_endpoint: var("AZURE_SPEECH_ENDPOINT"),
            voice_name: var("SPEECH_VOICE_NAME").unwrap_or_else(|| "en-US-JennyNeural".to_string()),
            output_format: var("SPEECH_OUTPUT_FORMAT")
                .unwrap_or_else(|| "raw-16khz-16bit-mono-pcm".to_string()),
            end_silence_ms: parse_or(&var, "SPEECH_END_SILENCE_MS", 1500)?,
            segmentation_silence_ms: parse_or(&var, "SPEECH_SEGMENTATION_SILENCE_MS", 1000)?,
            initial_silence_ms: parse_or(&var, "SPEECH_INITIAL_SILENCE_MS", 5000)?,
            processing_timeout: Duration::from_secs(parse_or(&var, "PROCESSING_TIMEOUT_SECS", 15)?),
            auto_resume: parse_flag(&var, "AUTO_RESUME")?,
            openai_api_key,
            chat_model: var("CHAT_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
            log_level,
        })
    }
}

fn invalid(name: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        value: value.to_string(),
    }
}

fn parse_or<T: FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match var(name) {
        Some(value) => value.trim().parse().map_err(|_| invalid(name, &value)),
        None => Ok(default),
    }
}

fn parse_flag(var: &impl Fn(&str) -> Option<String>, name: &str) -> Result<bool, ConfigError> {
    let Some(value) = var(name) else {
        return Ok(false);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(name, &value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply() {
        let config = load(&[("OPENAI_API_KEY", "sk-test")]).unwrap();

        assert_eq!(config.openai_api_key.expose_secret(), "sk-test");
        assert_eq!(config.voice_name, "en-US-JennyNeural");
        assert_eq!(config.output_format, "raw-16khz-16bit-mono-pcm");
        assert_eq!(config.end_silence_ms, 1500);
        assert_eq!(config.segmentation_silence_ms, 1000);
        assert_eq!(config.initial_silence_ms, 5000);
        assert_eq!(config.processing_timeout, Duration::from_secs(15));
        assert!(!config.auto_resume);
        assert_eq!(config.chat_model, "gpt-4o-mini");
        assert_eq!(config.log_level, Level::INFO);
        assert!(config.speech_token_url.is_none());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = load(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("SPEECH_TOKEN_URL", "http://localhost:5000/api/ai/speech-token"),
            ("AZURE_SPEECH_KEY", "key"),
            ("AZURE_SPEECH_REGION", "westus2"),
            ("SPEECH_END_SILENCE_MS", "800"),
            ("PROCESSING_TIMEOUT_SECS", "30"),
            ("AUTO_RESUME", "true"),
            ("RUST_LOG", "debug"),
        ])
        .unwrap();

        assert_eq!(
            config.speech_token_url.as_deref(),
            Some("http://localhost:5000/api/ai/speech-token")
        );
        assert_eq!(config.speech_region.as_deref(), Some("westus2"));
        assert_eq!(config.end_silence_ms, 800);
        assert_eq!(config.processing_timeout, Duration::from_secs(30));
        assert!(config.auto_resume);
        assert_eq!(config.log_level, Level::DEBUG);
    }

    #[test]
    fn missing_chat_key_is_reported() {
        assert!(matches!(
            load(&[("OPENAI_API_KEY", "  ")]),
            Err(ConfigError::MissingVar(name)) if name == "OPENAI_API_KEY"
        ));
    }

    #[test]
    fn invalid_values_are_reported() {
        assert!(matches!(
            load(&[("OPENAI_API_KEY", "sk"), ("SPEECH_END_SILENCE_MS", "soon")]),
            Err(ConfigError::InvalidValue { name, .. }) if name == "SPEECH_END_SILENCE_MS"
        ));
        assert!(matches!(
            load(&[("OPENAI_API_KEY", "sk"), ("AUTO_RESUME", "maybe")]),
            Err(ConfigError::InvalidValue { name, .. }) if name == "AUTO_RESUME"
        ));
        assert!(matches!(
            load(&[("OPENAI_API_KEY", "sk"), ("RUST_LOG", "loud")]),
            Err(ConfigError::InvalidValue { name, .. }) if name == "RUST_LOG"
        ));
    }
}
