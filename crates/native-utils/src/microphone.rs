use crate::audio::{StreamResampler, convert_f32_to_i16, downmix};
use crate::device;
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BuildStreamError, FrameCount, StreamConfig};
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender, sync_channel};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use voice_coach_core::{
    AudioStream, CAPTURE_SAMPLE_RATE, CaptureStream, MicrophoneDevice, VoiceError,
};

/// The size of each audio chunk read from the input stream.
pub const INPUT_CHUNK_SIZE: usize = 1024;
const RAW_CAPACITY: usize = 64;
const FRAME_CAPACITY: usize = 128;
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Microphone backed by a `cpal` input stream.
///
/// The native stream is not `Send`, so each acquisition owns a dedicated
/// thread that keeps the stream alive until the capture token is cancelled.
#[derive(Debug, Clone, Default)]
pub struct CpalMicrophone {
    device_name: Option<String>,
}

impl CpalMicrophone {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, device_name: impl Into<String>) -> Self {
        self.device_name = Some(device_name.into());
        self
    }

    pub fn device_name(&self) -> Option<&str> {
        self.device_name.as_deref()
    }
}

#[async_trait]
impl MicrophoneDevice for CpalMicrophone {
    async fn open(&self) -> Result<CaptureStream, VoiceError> {
        let (frames_tx, frames_rx) = mpsc::channel(FRAME_CAPACITY);
        let (ready_tx, ready_rx) = oneshot::channel();
        let stop = CancellationToken::new();

        let device_name = self.device_name.clone();
        let thread_stop = stop.clone();
        std::thread::Builder::new()
            .name("microphone".to_string())
            .spawn(move || capture(device_name, frames_tx, thread_stop, ready_tx))
            .map_err(|e| VoiceError::Device(format!("failed to spawn capture thread: {}", e)))?;

        match ready_rx.await {
            Ok(Ok(())) => Ok(CaptureStream {
                audio: AudioStream::new(frames_rx, CAPTURE_SAMPLE_RATE),
                stop,
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(VoiceError::Device(
                "capture thread exited before the stream started".to_string(),
            )),
        }
    }
}

/// Body of the capture thread: starts the stream, then resamples and forwards
/// frames until stopped.
fn capture(
    device_name: Option<String>,
    frames: mpsc::Sender<Vec<i16>>,
    stop: CancellationToken,
    ready: oneshot::Sender<Result<(), VoiceError>>,
) {
    let (raw_tx, raw_rx) = sync_channel(RAW_CAPACITY);
    let (stream, input_rate) = match start_input(device_name.as_deref(), raw_tx) {
        Ok(started) => started,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let mut resampler =
        match StreamResampler::new(input_rate, CAPTURE_SAMPLE_RATE, INPUT_CHUNK_SIZE) {
            Ok(resampler) => resampler,
            Err(e) => {
                let _ = ready.send(Err(VoiceError::Device(format!(
                    "cannot resample {} Hz input: {}",
                    input_rate, e
                ))));
                return;
            }
        };
    if ready.send(Ok(())).is_err() {
        tracing::debug!("microphone opener went away; dropping stream");
        return;
    }

    forward_frames(&raw_rx, &mut resampler, &frames, &stop);
    drop(stream);
    tracing::debug!("microphone capture stopped");
}

fn forward_frames(
    raw: &Receiver<Vec<f32>>,
    resampler: &mut StreamResampler,
    frames: &mpsc::Sender<Vec<i16>>,
    stop: &CancellationToken,
) {
    while !stop.is_cancelled() {
        let chunk = match raw.recv_timeout(POLL_INTERVAL) {
            Ok(chunk) => chunk,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                tracing::error!("input stream ended unexpectedly");
                return;
            }
        };
        let resampled = resampler.push(&chunk);
        if resampled.is_empty() {
            continue;
        }
        match frames.try_send(convert_f32_to_i16(&resampled)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("audio consumer is behind; dropping a microphone frame");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => return,
        }
    }
}

fn start_input(
    device_name: Option<&str>,
    raw: SyncSender<Vec<f32>>,
) -> Result<(cpal::Stream, u32), VoiceError> {
    let input = device::get_or_default_input(device_name)
        .map_err(|e| VoiceError::Device(format!("{:#}", e)))?;
    tracing::info!("Using input device: {:?}", input.name().unwrap_or_default());

    let input_config = input.default_input_config().map_err(|e| match e {
        cpal::DefaultStreamConfigError::BackendSpecific { err }
            if is_permission_refusal(&err.description) =>
        {
            VoiceError::PermissionDenied(err.description)
        }
        other => VoiceError::Device(format!("no usable input config: {}", other)),
    })?;

    let input_config = StreamConfig {
        channels: input_config.channels(),
        sample_rate: input_config.sample_rate(),
        buffer_size: cpal::BufferSize::Fixed(FrameCount::from(INPUT_CHUNK_SIZE as u32)),
    };
    let input_channel_count = input_config.channels as usize;
    tracing::debug!("Input stream config: {:?}", &input_config);

    let input_data_fn = move |data: &[f32], _: &cpal::InputCallbackInfo| {
        if let Err(e) = raw.try_send(downmix(data, input_channel_count)) {
            tracing::trace!("dropping input buffer: {:?}", e);
        }
    };

    let stream = input
        .build_input_stream(
            &input_config,
            input_data_fn,
            move |err| tracing::error!("An error occurred on input stream: {}", err),
            None,
        )
        .map_err(build_error)?;
    stream.play().map_err(|e| match e {
        cpal::PlayStreamError::BackendSpecific { err }
            if is_permission_refusal(&err.description) =>
        {
            VoiceError::PermissionDenied(err.description)
        }
        other => VoiceError::Device(format!("failed to start input stream: {}", other)),
    })?;

    Ok((stream, input_config.sample_rate.0))
}

fn build_error(error: BuildStreamError) -> VoiceError {
    match error {
        BuildStreamError::BackendSpecific { err } if is_permission_refusal(&err.description) => {
            VoiceError::PermissionDenied(err.description)
        }
        other => VoiceError::Device(format!("failed to build input stream: {}", other)),
    }
}

/// Backends report refused microphone access only as free text.
fn is_permission_refusal(description: &str) -> bool {
    let description = description.to_ascii_lowercase();
    ["permission", "not authorized", "access denied", "privacy"]
        .iter()
        .any(|needle| description.contains(needle))
}
