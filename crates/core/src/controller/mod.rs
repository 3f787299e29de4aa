//! The voice session state machine.
//!
//! [`VoiceSessionController::spawn`] starts an actor task that owns every
//! session and the microphone. Hosts drive it through a [`ControllerHandle`]
//! and observe it through [`HostEvent`]s.

use crate::credentials::{CredentialProvider, Credentials, resolve_credentials};
use crate::error::VoiceError;
use crate::events::{HostEvent, SessionEvent, SessionState, TurnId};
use crate::handle::{ResourceHandle, ResourceKind};
use crate::microphone::{MicrophoneDevice, MicrophoneLease, MicrophoneResource};
use crate::playback::{
    AudioSink, PlaybackOutcome, SpeechOutput, SpeechPlaybackSession, SynthesisBackend,
    SynthesisOptions,
};
use crate::recognition::{
    RecognitionBackend, RecognitionEvent, RecognitionOptions, RecognitionSession,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;


#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// How long `Processing` waits for a response before listening again.
    pub processing_timeout: Duration,
    /// Listen again after a response has been spoken, instead of going idle.
    pub auto_resume: bool,
    pub microphone_release_grace: Duration,
    pub recognition: RecognitionOptions,
    pub synthesis: SynthesisOptions,
    /// Used when the credential provider cannot supply a grant.
    pub static_credentials: Option<Arc<Credentials>>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            processing_timeout: Duration::from_secs(15),
            auto_resume: false,
            microphone_release_grace: Duration::from_secs(2),
            recognition: RecognitionOptions::default(),
            synthesis: SynthesisOptions::default(),
            static_credentials: None,
        }
    }
}

/// The capability providers a controller drives.
#[derive(Clone)]
pub struct SpeechBackends {
    pub credentials: Arc<dyn CredentialProvider>,
    pub microphone: Arc<dyn MicrophoneDevice>,
    pub recognizer: Arc<dyn RecognitionBackend>,
    pub synthesizer: Arc<dyn SynthesisBackend>,
    pub speaker: Arc<dyn AudioSink>,
}

/// Point-in-time view of the controller and the resources it holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerSnapshot {
    pub state: SessionState,
    pub pending_turn: Option<TurnId>,
    pub microphone_held: bool,
    pub recognizer_open: bool,
    pub synthesizer_open: bool,
}

enum ControllerCommand {
    Start,
    Stop(oneshot::Sender<()>),
    Interrupt,
    Respond { turn: TurnId, text: String },
    ResumeListening,
    Snapshot(oneshot::Sender<ControllerSnapshot>),
    Shutdown(oneshot::Sender<()>),
}

enum Internal {
    CredentialsResolved(Option<Arc<Credentials>>),
    ListeningReady {
        generation: u64,
        result: Result<(MicrophoneLease, RecognitionSession), VoiceError>,
    },
}

/// Resources of one listening cycle. The lease and session arrive once the
/// microphone has been acquired and the recognizer connected.
struct ListeningCycle {
    handle: ResourceHandle,
    lease: Option<MicrophoneLease>,
    recognition: Option<RecognitionSession>,
}

impl ListeningCycle {
    fn is_resumable(&self) -> bool {
        !self.handle.is_disposed() && self.lease.is_some() && self.recognition.is_some()
    }

    fn close(mut self) {
        self.handle.dispose();
        if let Some(recognition) = self.recognition.take() {
            recognition.close();
        }
        if let Some(mut lease) = self.lease.take() {
            lease.release();
        }
    }
}

struct PendingTurn {
    id: TurnId,
    deadline: Instant,
}

pub struct VoiceSessionController {
    config: ControllerConfig,
    credential_provider: Arc<dyn CredentialProvider>,
    recognizer: Arc<dyn RecognitionBackend>,
    microphone: Arc<MicrophoneResource>,
    output: SpeechOutput,

    credentials: Option<Arc<Credentials>>,
    resolving: bool,
    start_requested: bool,

    state: SessionState,
    state_tx: watch::Sender<SessionState>,
    host: mpsc::UnboundedSender<HostEvent>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    session_tx: mpsc::UnboundedSender<SessionEvent>,

    generation: u64,
    turn: u64,
    listening: Option<ListeningCycle>,
    playback: Option<SpeechPlaybackSession>,
    pending: Option<PendingTurn>,
}

impl VoiceSessionController {
    /// Spawns the controller on the current tokio runtime.
    pub fn spawn(
        config: ControllerConfig,
        backends: SpeechBackends,
    ) -> (ControllerHandle, mpsc::UnboundedReceiver<HostEvent>) {
        let (command_tx, command_rx) = mpsc::channel(32);
        let (host_tx, host_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (session_tx, session_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);

        let microphone = Arc::new(MicrophoneResource::new(
            backends.microphone,
            config.microphone_release_grace,
        ));
        let output = SpeechOutput::new(
            backends.synthesizer,
            backends.speaker,
            config.synthesis.clone(),
        );

        let controller = Self {
            config,
            credential_provider: backends.credentials,
            recognizer: backends.recognizer,
            microphone,
            output,
            credentials: None,
            resolving: false,
            start_requested: false,
            state: SessionState::Idle,
            state_tx,
            host: host_tx,
            internal_tx,
            session_tx,
            generation: 0,
            turn: 0,
            listening: None,
            playback: None,
            pending: None,
        };
        tokio::spawn(controller.run(command_rx, internal_rx, session_rx));

        let handle = ControllerHandle {
            commands: command_tx,
            state: state_rx,
        };
        (handle, host_rx)
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<ControllerCommand>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
        mut sessions: mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        tracing::info!("voice session controller running");
        loop {
            let deadline = self.pending.as_ref().map(|turn| turn.deadline);
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(ControllerCommand::Shutdown(ack)) => {
                        self.stop();
                        let _ = ack.send(());
                        break;
                    }
                    Some(command) => {
                        if matches!(
                            command,
                            ControllerCommand::Interrupt | ControllerCommand::ResumeListening
                        ) {
                            self.supersede_transcript(&mut sessions);
                        }
                        self.on_command(command)
                    }
                    None => {
                        tracing::info!("all controller handles dropped; tearing down");
                        self.stop();
                        break;
                    }
                },
                Some(message) = internal.recv() => self.on_internal(message),
                Some(event) = sessions.recv() => self.on_session_event(event),
                _ = processing_deadline(deadline) => self.on_processing_timeout(),
            }
        }
        tracing::info!("voice session controller stopped");
    }

    fn on_command(&mut self, command: ControllerCommand) {
        match command {
            ControllerCommand::Start => self.start(),
            ControllerCommand::Stop(ack) => {
                self.stop();
                let _ = ack.send(());
            }
            ControllerCommand::Interrupt => self.interrupt(),
            ControllerCommand::Respond { turn, text } => self.respond(turn, text),
            ControllerCommand::ResumeListening => self.interrupt(),
            ControllerCommand::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            // Handled by the run loop.
            ControllerCommand::Shutdown(_) => {}
        }
    }

    fn start(&mut self) {
        if self.state != SessionState::Idle || self.start_requested {
            tracing::debug!("start ignored in {:?}", self.state);
            return;
        }
        if self.credentials.is_some() {
            self.begin_listening();
            return;
        }

        self.start_requested = true;
        if self.resolving {
            return;
        }
        self.resolving = true;
        let provider = self.credential_provider.clone();
        let fallback = self.config.static_credentials.clone();
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let credentials = resolve_credentials(provider.as_ref(), fallback).await;
            let _ = internal.send(Internal::CredentialsResolved(credentials));
        });
    }

    /// Tears everything down. Safe to call in any state, any number of times.
    fn stop(&mut self) {
        self.start_requested = false;
        if let Some(turn) = self.pending.take() {
            tracing::debug!("abandoning {}", turn.id);
        }
        if let Some(playback) = self.playback.take() {
            playback.cancel();
        }
        self.end_listening();
        self.set_state(SessionState::Idle);
    }

    /// An interrupt wins over a final transcript that is already in flight:
    /// queued transcripts of the current cycle are dropped, everything else
    /// queued before the interrupt is applied first.
    fn supersede_transcript(&mut self, sessions: &mut mpsc::UnboundedReceiver<SessionEvent>) {
        if self.state != SessionState::Listening {
            return;
        }
        if let Some(recognition) = self.listening.as_ref().and_then(|c| c.recognition.as_ref()) {
            recognition.discard_pending();
        }
        while let Ok(event) = sessions.try_recv() {
            match event {
                SessionEvent::Recognition {
                    generation,
                    event: RecognitionEvent::Final(_),
                } if self.state == SessionState::Listening && self.is_current_cycle(generation) => {
                    tracing::info!("final transcript superseded by interrupt");
                    if let Some(recognition) =
                        self.listening.as_ref().and_then(|c| c.recognition.as_ref())
                    {
                        recognition.resume();
                    }
                }
                event => self.on_session_event(event),
            }
        }
    }

    /// Barge-in. Cancels speech, or abandons a pending turn, and listens.
    fn interrupt(&mut self) {
        match self.state {
            SessionState::Speaking => {
                if let Some(playback) = self.playback.take() {
                    playback.cancel();
                }
                tracing::info!("speech interrupted");
                self.begin_listening();
            }
            SessionState::Processing => {
                if let Some(turn) = self.pending.take() {
                    tracing::info!("{} abandoned by interrupt", turn.id);
                }
                self.resume_after_processing();
            }
            SessionState::Idle | SessionState::Listening => {
                tracing::debug!("interrupt ignored in {:?}", self.state);
            }
        }
    }

    fn respond(&mut self, turn: TurnId, text: String) {
        let is_pending = self
            .pending
            .as_ref()
            .is_some_and(|pending| pending.id == turn);
        if !is_pending || self.state != SessionState::Processing {
            tracing::warn!("discarding response for {}; it is no longer pending", turn);
            return;
        }
        self.pending = None;

        if text.trim().is_empty() {
            tracing::debug!("{} answered with empty text", turn);
            self.resume_after_processing();
            return;
        }
        self.begin_speaking(&text);
    }

    fn begin_listening(&mut self) {
        let Some(credentials) = self.credentials.clone() else {
            tracing::warn!("no speech credentials; staying idle");
            self.set_state(SessionState::Idle);
            return;
        };
        self.end_listening();

        let generation = self.next_generation();
        let handle = ResourceHandle::new(ResourceKind::Recognizer, generation);
        self.listening = Some(ListeningCycle {
            handle: handle.clone(),
            lease: None,
            recognition: None,
        });
        self.set_state(SessionState::Listening);

        let microphone = self.microphone.clone();
        let recognizer = self.recognizer.clone();
        let options = self.config.recognition.clone();
        let internal = self.internal_tx.clone();
        let sessions = self.session_tx.clone();
        tokio::spawn(async move {
            let acquired = microphone.acquire(generation).await;
            if handle.is_disposed() {
                tracing::debug!("cycle #{} ended while acquiring the microphone", generation);
                return;
            }
            let result = match acquired {
                Ok((lease, stream)) => RecognitionSession::open(
                    stream,
                    &credentials,
                    recognizer.as_ref(),
                    &options,
                    handle.clone(),
                    sessions,
                )
                .await
                .map(|recognition| (lease, recognition)),
                Err(e) => Err(e),
            };
            if handle.is_disposed() {
                tracing::debug!("cycle #{} ended while connecting the recognizer", generation);
                return;
            }
            let _ = internal.send(Internal::ListeningReady { generation, result });
        });
    }

    fn end_listening(&mut self) {
        if let Some(cycle) = self.listening.take() {
            cycle.close();
        }
    }

    fn begin_speaking(&mut self, text: &str) {
        let Some(credentials) = self.credentials.clone() else {
            self.abort_cycle(VoiceError::Credential("no speech credentials".to_string()));
            return;
        };
        self.end_listening();

        let generation = self.next_generation();
        let handle = ResourceHandle::new(ResourceKind::Synthesizer, generation);
        self.set_state(SessionState::Speaking);
        self.playback = Some(SpeechPlaybackSession::speak(
            text,
            credentials,
            &self.output,
            handle,
            self.session_tx.clone(),
        ));
    }

    /// Leaves `Processing` for `Listening`, reusing the paused recognizer
    /// when it is still alive.
    fn resume_after_processing(&mut self) {
        self.pending = None;
        let resumable = self
            .listening
            .as_ref()
            .is_some_and(ListeningCycle::is_resumable);
        if !resumable {
            self.begin_listening();
            return;
        }
        if let Some(recognition) = self.listening.as_ref().and_then(|c| c.recognition.as_ref()) {
            recognition.resume();
        }
        self.set_state(SessionState::Listening);
    }

    fn abort_cycle(&mut self, error: VoiceError) {
        tracing::error!("voice cycle aborted: {}", error);
        self.stop();
        self.emit(HostEvent::Error(error));
    }

    fn on_internal(&mut self, message: Internal) {
        match message {
            Internal::CredentialsResolved(credentials) => {
                self.resolving = false;
                if credentials.is_some() {
                    self.credentials = credentials;
                }
                if !std::mem::take(&mut self.start_requested) {
                    return;
                }
                if self.credentials.is_some() {
                    self.begin_listening();
                } else {
                    tracing::warn!("cannot start listening without speech credentials");
                }
            }
            Internal::ListeningReady { generation, result } => {
                let Some(cycle) = self
                    .listening
                    .as_mut()
                    .filter(|cycle| cycle.handle.generation() == generation)
                    .filter(|cycle| !cycle.handle.is_disposed())
                else {
                    tracing::debug!("dropping stale listening resources of cycle #{}", generation);
                    return;
                };
                match result {
                    Ok((lease, recognition)) => {
                        cycle.lease = Some(lease);
                        cycle.recognition = Some(recognition);
                        tracing::info!("listening (cycle #{})", generation);
                    }
                    Err(e) => self.abort_cycle(e),
                }
            }
        }
    }

    fn on_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Recognition { generation, event } => {
                self.on_recognition(generation, event)
            }
            SessionEvent::PlaybackFinished {
                generation,
                outcome,
            } => self.on_playback_finished(generation, outcome),
        }
    }

    fn on_recognition(&mut self, generation: u64, event: RecognitionEvent) {
        if !self.is_current_cycle(generation) {
            tracing::debug!("ignoring recognition event of stale cycle #{}", generation);
            return;
        }

        match event {
            RecognitionEvent::Partial(text) => {
                if self.state == SessionState::Listening {
                    self.emit(HostEvent::Interim(text));
                }
            }
            RecognitionEvent::Final(text) => {
                if self.state == SessionState::Listening {
                    self.on_final_transcript(text);
                } else {
                    tracing::warn!("final transcript outside listening dropped");
                }
            }
            RecognitionEvent::Cancelled(reason) => {
                tracing::info!("recognition cancelled: {}", reason);
                self.on_recognition_ended(None);
            }
            RecognitionEvent::Error(error) => {
                tracing::warn!("recognition failed: {}", error);
                self.on_recognition_ended(Some(error));
            }
        }
    }

    fn is_current_cycle(&self, generation: u64) -> bool {
        self.listening
            .as_ref()
            .is_some_and(|cycle| cycle.handle.generation() == generation && !cycle.handle.is_disposed())
    }

    /// A dead recognizer ends a listening cycle. While a turn is pending the
    /// microphone is kept and a new recognizer is opened on resume.
    fn on_recognition_ended(&mut self, error: Option<VoiceError>) {
        let device_failure = error.as_ref().is_some_and(VoiceError::is_device_failure);
        if self.state == SessionState::Processing && !device_failure {
            if let Some(recognition) = self.listening.as_mut().and_then(|c| c.recognition.take()) {
                recognition.close();
            }
            if let Some(error) = error {
                self.emit(HostEvent::Error(error));
            }
            return;
        }
        match error {
            Some(error) => self.abort_cycle(error),
            None => self.stop(),
        }
    }

    fn on_final_transcript(&mut self, text: String) {
        if let Some(recognition) = self.listening.as_ref().and_then(|c| c.recognition.as_ref()) {
            recognition.pause();
        }
        self.turn += 1;
        let turn = TurnId(self.turn);
        self.pending = Some(PendingTurn {
            id: turn,
            deadline: Instant::now() + self.config.processing_timeout,
        });
        tracing::info!("{}: \"{}\"", turn, text);
        self.set_state(SessionState::Processing);
        self.emit(HostEvent::Transcript { turn, text });
    }

    fn on_processing_timeout(&mut self) {
        if let Some(turn) = self.pending.take() {
            tracing::warn!(
                "no response for {} within {:?}; listening again",
                turn.id,
                self.config.processing_timeout
            );
            self.resume_after_processing();
        }
    }

    fn on_playback_finished(&mut self, generation: u64, outcome: PlaybackOutcome) {
        if let PlaybackOutcome::Failed { error, .. } = &outcome {
            self.emit(HostEvent::Error(error.clone()));
        }
        self.emit(HostEvent::SpeakingComplete(outcome));

        let current = self
            .playback
            .as_ref()
            .is_some_and(|playback| playback.generation() == generation);
        if !current || self.state != SessionState::Speaking {
            return;
        }
        self.playback = None;
        if self.config.auto_resume {
            self.begin_listening();
        } else {
            self.set_state(SessionState::Idle);
        }
    }

    fn snapshot(&self) -> ControllerSnapshot {
        ControllerSnapshot {
            state: self.state,
            pending_turn: self.pending.as_ref().map(|turn| turn.id),
            microphone_held: self.microphone.is_held(),
            recognizer_open: self
                .listening
                .as_ref()
                .is_some_and(|cycle| cycle.recognition.is_some() && !cycle.handle.is_disposed()),
            synthesizer_open: self
                .playback
                .as_ref()
                .is_some_and(|playback| !playback.handle().is_disposed()),
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }
        tracing::info!("voice session {:?} -> {:?}", self.state, state);
        self.state = state;
        self.state_tx.send_replace(state);
        self.emit(HostEvent::StateChanged(state));
    }

    fn emit(&self, event: HostEvent) {
        if self.host.send(event).is_err() {
            tracing::trace!("host event receiver dropped");
        }
    }

    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }
}

async fn processing_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Cheap, cloneable access to a running [`VoiceSessionController`].
#[derive(Clone)]
pub struct ControllerHandle {
    commands: mpsc::Sender<ControllerCommand>,
    state: watch::Receiver<SessionState>,
}

impl ControllerHandle {
    /// Starts listening. A no-op unless idle; stays idle without credentials.
    pub async fn start(&self) -> Result<(), VoiceError> {
        self.send(ControllerCommand::Start).await
    }

    /// Returns once the controller is idle with every resource released. A
    /// controller that already stopped counts as stopped.
    pub async fn stop(&self) {
        let (ack, done) = oneshot::channel();
        if self.commands.send(ControllerCommand::Stop(ack)).await.is_ok() {
            let _ = done.await;
        }
    }

    pub async fn interrupt(&self) -> Result<(), VoiceError> {
        self.send(ControllerCommand::Interrupt).await
    }

    /// Supplies the response to speak for `turn`. Ignored unless `turn` is
    /// still pending.
    pub async fn respond(&self, turn: TurnId, text: impl Into<String>) -> Result<(), VoiceError> {
        self.send(ControllerCommand::Respond {
            turn,
            text: text.into(),
        })
        .await
    }

    pub async fn resume_listening(&self) -> Result<(), VoiceError> {
        self.send(ControllerCommand::ResumeListening).await
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    pub async fn snapshot(&self) -> Result<ControllerSnapshot, VoiceError> {
        let (reply, snapshot) = oneshot::channel();
        self.send(ControllerCommand::Snapshot(reply)).await?;
        snapshot.await.map_err(|_| VoiceError::ControllerClosed)
    }

    /// Stops the controller and ends its task.
    pub async fn shutdown(&self) {
        let (ack, done) = oneshot::channel();
        if self
            .commands
            .send(ControllerCommand::Shutdown(ack))
            .await
            .is_ok()
        {
            let _ = done.await;
        }
    }

    async fn send(&self, command: ControllerCommand) -> Result<(), VoiceError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| VoiceError::ControllerClosed)
    }
}
