use crate::error::VoiceError;
use crate::handle::{ResourceHandle, ResourceKind};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio_util::sync::CancellationToken;

/// Sample rate of every frame a [`MicrophoneDevice`] delivers.
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// Live mono PCM16 frames from the microphone.
pub struct AudioStream {
    frames: mpsc::Receiver<Vec<i16>>,
    sample_rate: u32,
}

impl AudioStream {
    pub fn new(frames: mpsc::Receiver<Vec<i16>>, sample_rate: u32) -> Self {
        Self {
            frames,
            sample_rate,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub async fn next_frame(&mut self) -> Option<Vec<i16>> {
        self.frames.recv().await
    }
}

/// What a device hands back when opened: the audio plus the token that stops
/// the underlying tracks.
pub struct CaptureStream {
    pub audio: AudioStream,
    pub stop: CancellationToken,
}

/// Platform microphone. Implementations deliver [`CAPTURE_SAMPLE_RATE`] mono
/// frames and stop capturing once `stop` is cancelled.
#[async_trait]
pub trait MicrophoneDevice: Send + Sync {
    async fn open(&self) -> Result<CaptureStream, VoiceError>;
}

/// Guard enforcing at most one live microphone acquisition per process.
pub struct MicrophoneResource {
    device: Arc<dyn MicrophoneDevice>,
    slot: Arc<Semaphore>,
    release_grace: Duration,
}

impl MicrophoneResource {
    pub fn new(device: Arc<dyn MicrophoneDevice>, release_grace: Duration) -> Self {
        Self {
            device,
            slot: Arc::new(Semaphore::new(1)),
            release_grace,
        }
    }

    /// Acquires the microphone for one cycle.
    ///
    /// Waits at most the release grace for an overlapping teardown to return
    /// the device, then fails with [`VoiceError::Device`].
    pub async fn acquire(
        &self,
        generation: u64,
    ) -> Result<(MicrophoneLease, AudioStream), VoiceError> {
        let permit = tokio::time::timeout(self.release_grace, self.slot.clone().acquire_owned())
            .await
            .map_err(|_| VoiceError::Device("microphone is already held".to_string()))?
            .map_err(|_| VoiceError::Device("microphone guard is closed".to_string()))?;

        // The permit is dropped, and the slot freed, if opening fails.
        let capture = self.device.open().await?;
        tracing::debug!("microphone acquired for cycle #{}", generation);

        let lease = MicrophoneLease {
            handle: ResourceHandle::new(ResourceKind::Microphone, generation),
            stop: capture.stop,
            permit: Some(permit),
        };
        Ok((lease, capture.audio))
    }

    pub fn is_held(&self) -> bool {
        self.slot.available_permits() == 0
    }
}

/// Exclusive hold on the microphone. Released explicitly or on drop.
pub struct MicrophoneLease {
    handle: ResourceHandle,
    stop: CancellationToken,
    permit: Option<OwnedSemaphorePermit>,
}

impl MicrophoneLease {
    /// Stops all tracks and frees the device. Idempotent.
    pub fn release(&mut self) {
        if let Some(permit) = self.permit.take() {
            self.stop.cancel();
            self.handle.dispose();
            drop(permit);
            tracing::debug!("microphone released (cycle #{})", self.handle.generation());
        }
    }

    pub fn is_released(&self) -> bool {
        self.permit.is_none()
    }

    pub fn handle(&self) -> &ResourceHandle {
        &self.handle
    }
}

impl Drop for MicrophoneLease {
    fn drop(&mut self) {
        self.release();
    }
}
