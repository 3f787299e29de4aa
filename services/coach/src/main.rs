mod coach;
mod config;
mod host;

use crate::coach::{ChatCoach, Coach};
use crate::config::Config;
use crate::host::TerminalHost;
use anyhow::{Context, Result};
use clap::Parser;
use secrecy::ExposeSecret;
use speech_service::{HttpCredentialProvider, RestSynthesizer, StreamingRecognizer};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::fmt::time::ChronoLocal;
use voice_coach_core::{
    ControllerConfig, CredentialProvider, Credentials, NoCredentialEndpoint, RecognitionOptions,
    SpeechBackends, SynthesisOptions, VoiceSessionController,
};
use voice_coach_native_utils::{CpalMicrophone, CpalSpeaker, device};

#[derive(Parser)]
#[command(version, about = "Voice conversation with the Centsi financial coach")]
struct Cli {
    /// Listen again after each spoken reply
    #[arg(long)]
    auto_resume: bool,
    /// Input device name (defaults to the system default)
    #[arg(long)]
    input_device: Option<String>,
    /// Output device name (defaults to the system default)
    #[arg(long)]
    output_device: Option<String>,
    /// Print the available audio devices and exit
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load application configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    // --- 3. Parse Command-Line Arguments ---
    let args = Cli::parse();
    if args.list_devices {
        println!("Input devices:\n{}", device::get_available_inputs()?);
        println!("Output devices:\n{}", device::get_available_outputs()?);
        return Ok(());
    }

    tracing::info!("Configuration loaded successfully. Starting voice coach...");

    // --- 4. Speech Backends ---
    let credentials: Arc<dyn CredentialProvider> = match &config.speech_token_url {
        Some(url) => Arc::new(HttpCredentialProvider::new(url.clone())),
        None => Arc::new(NoCredentialEndpoint),
    };
    let static_credentials = static_credentials(&config);
    if config.speech_token_url.is_none() && static_credentials.is_none() {
        tracing::warn!("Neither SPEECH_TOKEN_URL nor AZURE_SPEECH_KEY/AZURE_SPEECH_REGION is set; listening will fail");
    }

    let mut microphone = CpalMicrophone::new();
    if let Some(name) = &args.input_device {
        microphone = microphone.with_device(name.clone());
    }
    let speaker = CpalSpeaker::start(args.output_device.as_deref())
        .context("Failed to open audio output device")?;

    let backends = SpeechBackends {
        credentials,
        microphone: Arc::new(microphone),
        recognizer: Arc::new(StreamingRecognizer::default()),
        synthesizer: Arc::new(RestSynthesizer::new()),
        speaker: Arc::new(speaker),
    };
    let controller_config = ControllerConfig {
        processing_timeout: config.processing_timeout,
        auto_resume: config.auto_resume || args.auto_resume,
        recognition: RecognitionOptions::default()
            .with_end_silence_ms(config.end_silence_ms)
            .with_segmentation_silence_ms(config.segmentation_silence_ms)
            .with_initial_silence_ms(config.initial_silence_ms),
        synthesis: SynthesisOptions::default()
            .with_voice_name(config.voice_name.clone())
            .with_sample_format(config.output_format.clone()),
        static_credentials,
        ..ControllerConfig::default()
    };

    // --- 5. Controller and Host ---
    let (controller, events) = VoiceSessionController::spawn(controller_config, backends);
    let chat_coach = ChatCoach::new(config.openai_api_key.clone(), config.chat_model.clone());
    tracing::info!("Coach replies from model '{}'", chat_coach.model());
    let coach: Arc<dyn Coach> = Arc::new(chat_coach);
    let event_loop = tokio::spawn(TerminalHost::new(controller.clone(), coach).run(events));

    println!("{}", host::USAGE);
    tokio::select! {
        result = host::read_keys(controller.clone()) => {
            if let Err(e) = result {
                tracing::error!("Keyboard input failed: {:#}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => tracing::info!("Ctrl-C received"),
    }

    // Teardown releases the microphone and cancels any playback.
    controller.shutdown().await;
    if tokio::time::timeout(Duration::from_secs(2), event_loop).await.is_err() {
        tracing::warn!("host event loop did not finish after shutdown");
    }
    tracing::info!("Voice coach stopped");
    Ok(())
}

fn static_credentials(config: &Config) -> Option<Arc<Credentials>> {
    let key = config.speech_key.as_ref()?;
    let region = config.speech_region.clone().unwrap_or_default();
    let mut credentials = Credentials::new(key.expose_secret(), region);
    if let Some(endpoint) = &config.speech_endpoint {
        credentials = credentials.with_endpoint(endpoint.clone());
    }
    Some(Arc::new(credentials))
}
