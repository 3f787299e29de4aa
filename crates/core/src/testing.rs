//! In-crate fakes for the channel-driven capabilities.

use crate::credentials::{CredentialProvider, Credentials, TokenGrant};
use crate::error::VoiceError;
use crate::microphone::{AudioStream, CAPTURE_SAMPLE_RATE, CaptureStream, MicrophoneDevice};
use crate::playback::{AudioClip, AudioSink, SynthesisBackend, SynthesisOptions};
use crate::recognition::{RecognitionBackend, RecognitionChannel, RecognitionEvent, RecognitionOptions};
use async_trait::async_trait;
use secrecy::SecretString;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;

pub(crate) fn test_credentials() -> Credentials {
    Credentials::new("test-key", "westus2")
}

/// Provider that always grants `test_credentials()`.
pub(crate) struct GrantingProvider {
    fetches: AtomicUsize,
}

impl GrantingProvider {
    pub(crate) fn new() -> Self {
        Self {
            fetches: AtomicUsize::new(0),
        }
    }

    pub(crate) fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialProvider for GrantingProvider {
    async fn fetch(&self) -> Result<TokenGrant, VoiceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(TokenGrant {
            status: TokenGrant::SUCCESS.to_string(),
            key: Some(SecretString::from("test-key".to_string())),
            region: Some("westus2".to_string()),
            endpoint: None,
        })
    }
}

struct Capture {
    frames: mpsc::Sender<Vec<i16>>,
    stop: CancellationToken,
}

pub(crate) struct FakeMicrophone {
    failure: Option<VoiceError>,
    gate: Option<Arc<Notify>>,
    sample_rate: u32,
    opens: AtomicUsize,
    captures: Mutex<Vec<Capture>>,
}

impl FakeMicrophone {
    pub(crate) fn new() -> Self {
        Self {
            failure: None,
            gate: None,
            sample_rate: CAPTURE_SAMPLE_RATE,
            opens: AtomicUsize::new(0),
            captures: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing(error: VoiceError) -> Self {
        Self {
            failure: Some(error),
            ..Self::new()
        }
    }

    pub(crate) fn with_sample_rate(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            ..Self::new()
        }
    }

    /// `open` blocks until [`open_gate`](Self::open_gate) is called, like a
    /// pending permission prompt.
    pub(crate) fn gated() -> Self {
        Self {
            gate: Some(Arc::new(Notify::new())),
            ..Self::new()
        }
    }

    pub(crate) fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }

    pub(crate) fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub(crate) fn all_captures_stopped(&self) -> bool {
        self.captures
            .lock()
            .unwrap()
            .iter()
            .all(|capture| capture.stop.is_cancelled())
    }

    /// Delivers a frame on the most recent capture.
    pub(crate) async fn push_frame(&self, frame: Vec<i16>) {
        let sender = self
            .captures
            .lock()
            .unwrap()
            .last()
            .map(|capture| capture.frames.clone())
            .expect("microphone was never opened");
        sender.send(frame).await.expect("capture receiver dropped");
    }
}

#[async_trait]
impl MicrophoneDevice for FakeMicrophone {
    async fn open(&self) -> Result<CaptureStream, VoiceError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        self.opens.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = mpsc::channel(64);
        let stop = CancellationToken::new();
        self.captures.lock().unwrap().push(Capture {
            frames: tx,
            stop: stop.clone(),
        });
        Ok(CaptureStream {
            audio: AudioStream::new(rx, self.sample_rate),
            stop,
        })
    }
}

/// The test's end of one recognizer connection.
pub(crate) struct RecognizerLink {
    pub(crate) events: mpsc::Sender<RecognitionEvent>,
    pub(crate) shutdown: CancellationToken,
    pub(crate) audio: mpsc::Receiver<Vec<i16>>,
}

pub(crate) struct FakeRecognizer {
    failure: Option<VoiceError>,
    connects: AtomicUsize,
    links_tx: mpsc::UnboundedSender<RecognizerLink>,
    links_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<RecognizerLink>>,
}

impl FakeRecognizer {
    pub(crate) fn new() -> Self {
        let (links_tx, links_rx) = mpsc::unbounded_channel();
        Self {
            failure: None,
            connects: AtomicUsize::new(0),
            links_tx,
            links_rx: tokio::sync::Mutex::new(links_rx),
        }
    }

    pub(crate) fn failing(error: VoiceError) -> Self {
        Self {
            failure: Some(error),
            ..Self::new()
        }
    }

    pub(crate) fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// The newest connection made since the last call, if any. Older links
    /// are dropped.
    pub(crate) async fn latest_link(&self) -> Option<RecognizerLink> {
        let mut links = self.links_rx.lock().await;
        let mut latest = None;
        while let Ok(link) = links.try_recv() {
            latest = Some(link);
        }
        latest
    }

    pub(crate) async fn next_link(&self) -> RecognizerLink {
        let mut links = self.links_rx.lock().await;
        tokio::time::timeout(Duration::from_secs(2), links.recv())
            .await
            .expect("recognizer was not connected in time")
            .expect("recognizer dropped")
    }
}

#[async_trait]
impl RecognitionBackend for FakeRecognizer {
    async fn connect(
        &self,
        _credentials: &Credentials,
        _options: &RecognitionOptions,
    ) -> Result<RecognitionChannel, VoiceError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }

        let (audio_tx, audio_rx) = mpsc::channel(64);
        let (events_tx, events_rx) = mpsc::channel(16);
        let shutdown = CancellationToken::new();
        let _ = self.links_tx.send(RecognizerLink {
            events: events_tx,
            shutdown: shutdown.clone(),
            audio: audio_rx,
        });
        Ok(RecognitionChannel {
            audio: audio_tx,
            events: events_rx,
            shutdown,
        })
    }
}

pub(crate) struct FakeSynthesizer {
    fail_on: Option<String>,
    requests: Mutex<Vec<String>>,
}

impl FakeSynthesizer {
    pub(crate) fn new() -> Self {
        Self {
            fail_on: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Fails every fragment containing `needle`.
    pub(crate) fn failing_on(needle: &str) -> Self {
        Self {
            fail_on: Some(needle.to_string()),
            ..Self::new()
        }
    }

    pub(crate) fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl SynthesisBackend for FakeSynthesizer {
    async fn synthesize(
        &self,
        _credentials: &Credentials,
        _options: &SynthesisOptions,
        fragment: &str,
    ) -> Result<AudioClip, VoiceError> {
        self.requests.lock().unwrap().push(fragment.to_string());
        if let Some(needle) = &self.fail_on {
            if fragment.contains(needle.as_str()) {
                return Err(VoiceError::Synthesis(format!("cannot voice '{}'", fragment)));
            }
        }
        Ok(AudioClip::new(vec![0; 160], CAPTURE_SAMPLE_RATE, fragment))
    }
}

/// Records clips. A gated speaker holds each clip until
/// [`advance`](Self::advance) or cancellation.
pub(crate) struct FakeSpeaker {
    gate: Option<Notify>,
    started: Mutex<Vec<String>>,
    played: Mutex<Vec<String>>,
    started_tx: mpsc::UnboundedSender<String>,
    started_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
}

impl FakeSpeaker {
    pub(crate) fn new() -> Self {
        let (started_tx, started_rx) = mpsc::unbounded_channel();
        Self {
            gate: None,
            started: Mutex::new(Vec::new()),
            played: Mutex::new(Vec::new()),
            started_tx,
            started_rx: tokio::sync::Mutex::new(started_rx),
        }
    }

    pub(crate) fn gated() -> Self {
        Self {
            gate: Some(Notify::new()),
            ..Self::new()
        }
    }

    /// Lets the clip currently held by a gated speaker finish.
    pub(crate) fn advance(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }

    pub(crate) async fn next_started(&self) -> String {
        let mut started = self.started_rx.lock().await;
        tokio::time::timeout(Duration::from_secs(2), started.recv())
            .await
            .expect("no clip started in time")
            .expect("speaker dropped")
    }

    pub(crate) fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    pub(crate) fn played(&self) -> Vec<String> {
        self.played.lock().unwrap().clone()
    }
}

#[async_trait]
impl AudioSink for FakeSpeaker {
    async fn play(&self, clip: AudioClip, cancel: CancellationToken) -> Result<(), VoiceError> {
        let text = clip.text().to_string();
        self.started.lock().unwrap().push(text.clone());
        let _ = self.started_tx.send(text.clone());

        if let Some(gate) = &self.gate {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = gate.notified() => {}
            }
        }
        self.played.lock().unwrap().push(text);
        Ok(())
    }
}
