use crate::audio::{StreamResampler, convert_i16_to_f32, shared_buffer};
use crate::device;
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FrameCount, StreamConfig};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use voice_coach_core::{AudioClip, AudioSink, VoiceError};

/// The size of each buffer pushed to the output ring.
pub const OUTPUT_CHUNK_SIZE: usize = 1024;
/// The latency for the output audio buffer in milliseconds.
pub const OUTPUT_LATENCY_MS: usize = 1000;
const POLL_INTERVAL: Duration = Duration::from_millis(10);
const FLUSH_WAIT: Duration = Duration::from_millis(250);

/// State shared between `play` and the output callback.
struct Playout {
    producer: Mutex<HeapProd<f32>>,
    /// Samples pushed but not yet rendered.
    queued: AtomicUsize,
    /// Set by `play` on cancellation; the callback empties the ring and clears it.
    flush: AtomicBool,
}

/// Speaker backed by one long-lived `cpal` output stream.
///
/// The stream lives on its own thread and is fed from a heap ring buffer.
/// Dropping the speaker stops the stream.
pub struct CpalSpeaker {
    playout: Arc<Playout>,
    sample_rate: u32,
    _shutdown: std::sync::mpsc::Sender<()>,
}

impl CpalSpeaker {
    /// Opens the named output device, or the default one.
    pub fn start(device_name: Option<&str>) -> Result<Self, VoiceError> {
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel(1);
        let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel::<()>();
        let device_name = device_name.map(str::to_string);

        std::thread::Builder::new()
            .name("speaker".to_string())
            .spawn(move || {
                let stream = match start_output(device_name.as_deref()) {
                    Ok((stream, playout, sample_rate)) => {
                        if ready_tx.send(Ok((playout, sample_rate))).is_err() {
                            return;
                        }
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Blocks until the speaker is dropped.
                let _ = shutdown_rx.recv();
                drop(stream);
                tracing::debug!("output stream stopped");
            })
            .map_err(|e| VoiceError::Device(format!("failed to spawn output thread: {}", e)))?;

        let (playout, sample_rate) = ready_rx.recv().map_err(|_| {
            VoiceError::Device("output thread exited before the stream started".to_string())
        })??;
        Ok(Self {
            playout,
            sample_rate,
            _shutdown: shutdown_tx,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

#[async_trait]
impl AudioSink for CpalSpeaker {
    async fn play(&self, clip: AudioClip, cancel: CancellationToken) -> Result<(), VoiceError> {
        let samples = prepare_clip(&clip, self.sample_rate)
            .map_err(|e| VoiceError::Device(format!("cannot play clip: {:#}", e)))?;
        tracing::debug!(
            "playing {} samples at {} Hz for \"{}\"",
            samples.len(),
            self.sample_rate,
            clip.text()
        );
        feed(&self.playout, &samples, &cancel).await;
        Ok(())
    }
}

/// Converts a clip to f32 at the device rate.
fn prepare_clip(clip: &AudioClip, device_rate: u32) -> anyhow::Result<Vec<f32>> {
    let samples = convert_i16_to_f32(clip.samples());
    let mut resampler = StreamResampler::new(clip.sample_rate(), device_rate, OUTPUT_CHUNK_SIZE)?;
    let mut resampled = resampler.push(&samples);
    resampled.extend(resampler.flush());
    Ok(resampled)
}

/// Pushes `samples` in fixed-size buffers and waits for the ring to drain.
/// Cancellation is checked between buffers and while draining.
async fn feed(playout: &Playout, samples: &[f32], cancel: &CancellationToken) {
    let mut producer = playout.producer.lock().await;

    for chunk in samples.chunks(OUTPUT_CHUNK_SIZE) {
        if cancel.is_cancelled() {
            return flush(playout).await;
        }
        let mut offset = 0;
        while offset < chunk.len() {
            let remaining = chunk.len() - offset;
            playout.queued.fetch_add(remaining, Ordering::AcqRel);
            let pushed = producer.push_slice(&chunk[offset..]);
            playout.queued.fetch_sub(remaining - pushed, Ordering::AcqRel);
            offset += pushed;
            if offset < chunk.len() {
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }
    }

    while playout.queued.load(Ordering::Acquire) > 0 {
        if cancel.is_cancelled() {
            return flush(playout).await;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

async fn flush(playout: &Playout) {
    playout.flush.store(true, Ordering::Release);
    let deadline = tokio::time::Instant::now() + FLUSH_WAIT;
    while playout.flush.load(Ordering::Acquire) && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    tracing::debug!("playback cut short");
}

/// Fills one output buffer from the ring, duplicating each sample across
/// channels and padding with silence.
fn fill_output(data: &mut [f32], channels: usize, consumer: &mut HeapCons<f32>, playout: &Playout) {
    if playout.flush.load(Ordering::Acquire) {
        consumer.clear();
        playout.queued.store(0, Ordering::Release);
        playout.flush.store(false, Ordering::Release);
    }

    let mut popped = 0;
    for frame in data.chunks_mut(channels.max(1)) {
        let sample = match consumer.try_pop() {
            Some(sample) => {
                popped += 1;
                sample
            }
            None => 0.0,
        };
        frame.fill(sample);
    }
    if popped > 0 {
        playout.queued.fetch_sub(popped, Ordering::AcqRel);
    }
}

fn playout_ring(capacity: usize) -> (Arc<Playout>, HeapCons<f32>) {
    let (producer, consumer) = shared_buffer(capacity).split();
    let playout = Arc::new(Playout {
        producer: Mutex::new(producer),
        queued: AtomicUsize::new(0),
        flush: AtomicBool::new(false),
    });
    (playout, consumer)
}

fn start_output(device_name: Option<&str>) -> Result<(cpal::Stream, Arc<Playout>, u32), VoiceError> {
    let output = device::get_or_default_output(device_name)
        .map_err(|e| VoiceError::Device(format!("{:#}", e)))?;
    tracing::info!("Using output device: {:?}", output.name().unwrap_or_default());

    let output_config = output
        .default_output_config()
        .map_err(|e| VoiceError::Device(format!("no usable output config: {}", e)))?;
    let output_config = StreamConfig {
        channels: output_config.channels(),
        sample_rate: output_config.sample_rate(),
        buffer_size: cpal::BufferSize::Fixed(FrameCount::from(OUTPUT_CHUNK_SIZE as u32)),
    };
    let output_channel_count = output_config.channels as usize;
    let output_sample_rate = output_config.sample_rate.0;
    tracing::debug!("Output stream config: {:?}", &output_config);

    let (playout, mut audio_out_rx) =
        playout_ring(output_sample_rate as usize * OUTPUT_LATENCY_MS / 1000);
    let callback_playout = playout.clone();
    let output_data_fn = move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
        fill_output(data, output_channel_count, &mut audio_out_rx, &callback_playout);
    };

    let stream = output
        .build_output_stream(
            &output_config,
            output_data_fn,
            move |err| tracing::error!("An error occurred on output stream: {}", err),
            None,
        )
        .map_err(|e| VoiceError::Device(format!("failed to build output stream: {}", e)))?;
    stream
        .play()
        .map_err(|e| VoiceError::Device(format!("failed to start output stream: {}", e)))?;

    Ok((stream, playout, output_sample_rate))
}
