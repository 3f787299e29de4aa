use crate::credentials::Credentials;
use crate::error::VoiceError;
use crate::events::SessionEvent;
use crate::handle::ResourceHandle;
use crate::microphone::{AudioStream, CAPTURE_SAMPLE_RATE};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;

/// The closed set of events a recognition backend emits.
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionEvent {
    Partial(String),
    Final(String),
    Cancelled(String),
    Error(VoiceError),
}

/// Silence tunables and language for continuous recognition.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionOptions {
    language: String,
    end_silence_ms: u32,
    segmentation_silence_ms: u32,
    initial_silence_ms: u32,
}

impl Default for RecognitionOptions {
    fn default() -> Self {
        Self {
            language: "en-US".to_string(),
            end_silence_ms: 1500,
            segmentation_silence_ms: 1000,
            initial_silence_ms: 5000,
        }
    }
}

impl RecognitionOptions {
    pub fn with_end_silence_ms(mut self, ms: u32) -> Self {
        self.end_silence_ms = ms;
        self
    }

    pub fn with_segmentation_silence_ms(mut self, ms: u32) -> Self {
        self.segmentation_silence_ms = ms;
        self
    }

    pub fn with_initial_silence_ms(mut self, ms: u32) -> Self {
        self.initial_silence_ms = ms;
        self
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn end_silence_ms(&self) -> u32 {
        self.end_silence_ms
    }

    pub fn segmentation_silence_ms(&self) -> u32 {
        self.segmentation_silence_ms
    }

    pub fn initial_silence_ms(&self) -> u32 {
        self.initial_silence_ms
    }
}

/// A connected recognizer: audio goes in, events come out, `shutdown`
/// closes the underlying connection.
pub struct RecognitionChannel {
    pub audio: mpsc::Sender<Vec<i16>>,
    pub events: mpsc::Receiver<RecognitionEvent>,
    pub shutdown: CancellationToken,
}

/// Continuous speech-to-text capability.
#[async_trait]
pub trait RecognitionBackend: Send + Sync {
    async fn connect(
        &self,
        credentials: &Credentials,
        options: &RecognitionOptions,
    ) -> Result<RecognitionChannel, VoiceError>;
}

/// Continuous recognition over one acquired microphone stream.
///
/// A non-empty final transcript pauses the session on its own, so at most
/// one final is emitted until [`resume`](Self::resume) is called.
pub struct RecognitionSession {
    handle: ResourceHandle,
    paused: Arc<AtomicBool>,
    discard: Arc<Notify>,
    shutdown: CancellationToken,
}

impl RecognitionSession {
    pub async fn open(
        stream: AudioStream,
        credentials: &Credentials,
        backend: &dyn RecognitionBackend,
        options: &RecognitionOptions,
        handle: ResourceHandle,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Self, VoiceError> {
        credentials.validate()?;
        if stream.sample_rate() != CAPTURE_SAMPLE_RATE {
            return Err(VoiceError::Device(format!(
                "microphone stream delivers {} Hz, recognition needs {} Hz",
                stream.sample_rate(),
                CAPTURE_SAMPLE_RATE
            )));
        }

        let channel = backend.connect(credentials, options).await?;
        let shutdown = channel.shutdown.clone();
        let paused = Arc::new(AtomicBool::new(false));
        let discard = Arc::new(Notify::new());

        tokio::spawn(pump(
            stream,
            channel,
            handle.clone(),
            paused.clone(),
            discard.clone(),
            events,
        ));
        tracing::debug!("recognition session #{} open", handle.generation());

        Ok(Self {
            handle,
            paused,
            discard,
            shutdown,
        })
    }

    /// Suspends event production; the connection stays allocated.
    pub fn pause(&self) {
        if !self.paused.swap(true, Ordering::AcqRel) {
            tracing::debug!("recognition session #{} paused", self.handle.generation());
        }
    }

    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::AcqRel) {
            tracing::debug!("recognition session #{} resumed", self.handle.generation());
        }
    }

    /// Drops transcripts the backend has already queued but the session has
    /// not yet forwarded. Errors and cancellations still get through.
    pub fn discard_pending(&self) {
        self.discard.notify_one();
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Releases the recognizer and suppresses every later event. Idempotent.
    pub fn close(&self) {
        self.paused.store(true, Ordering::Release);
        self.shutdown.cancel();
        if self.handle.dispose() {
            tracing::debug!("recognition session #{} closed", self.handle.generation());
        }
    }

    pub fn handle(&self) -> &ResourceHandle {
        &self.handle
    }
}

impl Drop for RecognitionSession {
    fn drop(&mut self) {
        self.close();
    }
}

async fn pump(
    mut stream: AudioStream,
    mut channel: RecognitionChannel,
    handle: ResourceHandle,
    paused: Arc<AtomicBool>,
    discard: Arc<Notify>,
    events: mpsc::UnboundedSender<SessionEvent>,
) {
    let generation = handle.generation();
    let emit = |event: RecognitionEvent| {
        if handle.is_disposed() {
            return;
        }
        if events
            .send(SessionEvent::Recognition { generation, event })
            .is_err()
        {
            tracing::debug!("controller gone; dropping recognition event");
        }
    };

    loop {
        tokio::select! {
            biased;
            _ = handle.disposed() => break,
            _ = discard.notified() => {
                while let Ok(event) = channel.events.try_recv() {
                    match event {
                        RecognitionEvent::Partial(_) | RecognitionEvent::Final(_) => {
                            tracing::debug!("recognizer #{} discarded a queued transcript", generation);
                        }
                        event => emit(event),
                    }
                }
            }
            frame = stream.next_frame() => match frame {
                Some(frame) => {
                    if paused.load(Ordering::Acquire) {
                        continue;
                    }
                    if channel.audio.send(frame).await.is_err() {
                        tracing::trace!("recognizer #{} stopped accepting audio", generation);
                    }
                }
                None => {
                    emit(RecognitionEvent::Error(VoiceError::Device(
                        "microphone stream ended".to_string(),
                    )));
                    break;
                }
            },
            event = channel.events.recv() => match event {
                Some(RecognitionEvent::Partial(text)) => {
                    if !paused.load(Ordering::Acquire) && !text.trim().is_empty() {
                        emit(RecognitionEvent::Partial(text));
                    }
                }
                Some(RecognitionEvent::Final(text)) => {
                    let text = text.trim();
                    if paused.load(Ordering::Acquire) {
                        tracing::debug!("recognizer #{} is paused; dropping final transcript", generation);
                    } else if text.is_empty() {
                        tracing::debug!("recognizer #{} heard no speech", generation);
                    } else {
                        paused.store(true, Ordering::Release);
                        emit(RecognitionEvent::Final(text.to_string()));
                    }
                }
                Some(event) => emit(event),
                None => {
                    emit(RecognitionEvent::Cancelled("recognition stream closed".to_string()));
                    break;
                }
            },
        }
    }

    channel.shutdown.cancel();
    tracing::trace!("recognizer #{} pump finished", generation);
}
