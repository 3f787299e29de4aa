use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Microphone,
    Recognizer,
    Synthesizer,
}

/// Ownership marker for one device or network resource in one cycle.
///
/// Clones share the same disposed flag, so a task spawned for a cycle can
/// check whether the controller has already moved on before applying any
/// effect. Once disposed a handle stays disposed; the next cycle gets a new
/// handle with a higher generation.
#[derive(Clone)]
pub struct ResourceHandle {
    kind: ResourceKind,
    generation: u64,
    disposed: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl ResourceHandle {
    pub fn new(kind: ResourceKind, generation: u64) -> Self {
        Self {
            kind,
            generation,
            disposed: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Marks the handle disposed and wakes every task waiting on it.
    ///
    /// Returns `true` only for the call that performed the disposal.
    pub fn dispose(&self) -> bool {
        let first = !self.disposed.swap(true, Ordering::AcqRel);
        self.cancel.cancel();
        if first {
            tracing::trace!("disposed {:?} handle #{}", self.kind, self.generation);
        }
        first
    }

    /// Resolves once the handle has been disposed.
    pub async fn disposed(&self) {
        self.cancel.cancelled().await
    }

    /// A token that is cancelled together with this handle.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("kind", &self.kind)
            .field("generation", &self.generation)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
