use crate::credentials::Credentials;
use crate::error::VoiceError;
use crate::events::SessionEvent;
use crate::handle::ResourceHandle;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// One synthesized sentence, ready for the output device.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    samples: Vec<i16>,
    sample_rate: u32,
    text: String,
}

impl AudioClip {
    pub fn new(samples: Vec<i16>, sample_rate: u32, text: impl Into<String>) -> Self {
        Self {
            samples,
            sample_rate,
            text: text.into(),
        }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisOptions {
    voice_name: String,
    sample_format: String,
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        Self {
            voice_name: "en-US-JennyNeural".to_string(),
            sample_format: "raw-16khz-16bit-mono-pcm".to_string(),
        }
    }
}

impl SynthesisOptions {
    pub fn with_voice_name(mut self, voice_name: impl Into<String>) -> Self {
        self.voice_name = voice_name.into();
        self
    }

    pub fn with_sample_format(mut self, sample_format: impl Into<String>) -> Self {
        self.sample_format = sample_format.into();
        self
    }

    pub fn voice_name(&self) -> &str {
        &self.voice_name
    }

    pub fn sample_format(&self) -> &str {
        &self.sample_format
    }
}

/// Text-to-speech capability, one request per sentence fragment.
#[async_trait]
pub trait SynthesisBackend: Send + Sync {
    async fn synthesize(
        &self,
        credentials: &Credentials,
        options: &SynthesisOptions,
        fragment: &str,
    ) -> Result<AudioClip, VoiceError>;
}

/// Platform audio output.
///
/// On cancellation an implementation finishes the buffer it is writing and
/// returns early.
#[async_trait]
pub trait AudioSink: Send + Sync {
    async fn play(&self, clip: AudioClip, cancel: CancellationToken) -> Result<(), VoiceError>;
}

/// How a spoken response ended. Reported exactly once per `speak`.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackOutcome {
    Completed {
        fragments: usize,
    },
    Cancelled {
        played: usize,
        total: usize,
    },
    Failed {
        played: usize,
        total: usize,
        error: VoiceError,
    },
}

/// Splits a response into sentence fragments.
///
/// A fragment ends after a run of `.`, `!` or `?` followed by whitespace or
/// the end of the text, so `$20.50` stays whole.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut fragments = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if !is_terminator(c) {
            continue;
        }
        while let Some(&next) = chars.peek() {
            if !is_terminator(next) {
                break;
            }
            current.push(next);
            chars.next();
        }
        if chars.peek().is_none_or(|next| next.is_whitespace()) {
            push_fragment(&mut fragments, &current);
            current.clear();
        }
    }
    push_fragment(&mut fragments, &current);
    fragments
}

fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

fn push_fragment(fragments: &mut Vec<String>, raw: &str) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
        fragments.push(trimmed.to_string());
    }
}

/// The synthesis and output capabilities a playback session drives.
#[derive(Clone)]
pub struct SpeechOutput {
    synthesizer: Arc<dyn SynthesisBackend>,
    sink: Arc<dyn AudioSink>,
    options: SynthesisOptions,
}

impl SpeechOutput {
    pub fn new(
        synthesizer: Arc<dyn SynthesisBackend>,
        sink: Arc<dyn AudioSink>,
        options: SynthesisOptions,
    ) -> Self {
        Self {
            synthesizer,
            sink,
            options,
        }
    }

    pub fn options(&self) -> &SynthesisOptions {
        &self.options
    }
}

#[derive(Clone)]
struct Completion {
    fired: Arc<AtomicBool>,
    generation: u64,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl Completion {
    fn fire(&self, outcome: PlaybackOutcome) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        tracing::debug!("playback #{} finished: {:?}", self.generation, outcome);
        let event = SessionEvent::PlaybackFinished {
            generation: self.generation,
            outcome,
        };
        if self.events.send(event).is_err() {
            tracing::debug!("controller gone; dropping playback outcome");
        }
        true
    }
}

/// Synthesizes and plays one response, fragment by fragment.
pub struct SpeechPlaybackSession {
    handle: ResourceHandle,
    completion: Completion,
    played: Arc<AtomicUsize>,
    total: usize,
}

impl SpeechPlaybackSession {
    /// Starts speaking `text` in a background task.
    ///
    /// Errors never surface from here; they arrive as a
    /// [`PlaybackOutcome::Failed`] completion.
    pub fn speak(
        text: &str,
        credentials: Arc<Credentials>,
        output: &SpeechOutput,
        handle: ResourceHandle,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let fragments = split_sentences(text);
        let session = Self {
            completion: Completion {
                fired: Arc::new(AtomicBool::new(false)),
                generation: handle.generation(),
                events,
            },
            played: Arc::new(AtomicUsize::new(0)),
            total: fragments.len(),
            handle,
        };

        if fragments.is_empty() {
            session
                .completion
                .fire(PlaybackOutcome::Completed { fragments: 0 });
            session.handle.dispose();
            return session;
        }
        if let Err(error) = credentials.validate() {
            session.completion.fire(PlaybackOutcome::Failed {
                played: 0,
                total: session.total,
                error,
            });
            session.handle.dispose();
            return session;
        }

        tracing::debug!(
            "playback #{} speaking {} fragment(s)",
            session.handle.generation(),
            session.total
        );
        tokio::spawn(play_fragments(
            fragments,
            credentials,
            output.clone(),
            session.handle.clone(),
            session.completion.clone(),
            session.played.clone(),
        ));
        session
    }

    /// Stops after the current buffer; no later fragment starts.
    ///
    /// Returns `true` if this call reported the completion.
    pub fn cancel(&self) -> bool {
        self.handle.dispose();
        self.completion.fire(PlaybackOutcome::Cancelled {
            played: self.played.load(Ordering::Acquire),
            total: self.total,
        })
    }

    pub fn generation(&self) -> u64 {
        self.handle.generation()
    }

    pub fn is_finished(&self) -> bool {
        self.completion.fired.load(Ordering::Acquire)
    }

    pub fn handle(&self) -> &ResourceHandle {
        &self.handle
    }
}

impl Drop for SpeechPlaybackSession {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn play_fragments(
    fragments: Vec<String>,
    credentials: Arc<Credentials>,
    output: SpeechOutput,
    handle: ResourceHandle,
    completion: Completion,
    played: Arc<AtomicUsize>,
) {
    let total = fragments.len();
    let fail = |error: VoiceError| {
        completion.fire(PlaybackOutcome::Failed {
            played: played.load(Ordering::Acquire),
            total,
            error,
        });
        handle.dispose();
    };

    for fragment in fragments {
        if handle.is_disposed() {
            return;
        }

        let clip = tokio::select! {
            biased;
            _ = handle.disposed() => return,
            clip = output.synthesizer.synthesize(&credentials, &output.options, &fragment) => clip,
        };
        let clip = match clip {
            Ok(clip) => clip,
            Err(e) => {
                tracing::warn!("synthesis of fragment {} failed: {}", played.load(Ordering::Acquire) + 1, e);
                fail(e);
                return;
            }
        };

        if handle.is_disposed() {
            return;
        }
        if let Err(e) = output.sink.play(clip, handle.cancellation()).await {
            tracing::warn!("audio output failed: {}", e);
            fail(e);
            return;
        }
        if handle.is_disposed() {
            return;
        }
        played.fetch_add(1, Ordering::AcqRel);
    }

    completion.fire(PlaybackOutcome::Completed { fragments: total });
    handle.dispose();
}
