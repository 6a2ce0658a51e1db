//! Background enrichment pipelines.
//!
//! Two independent pipelines (caption/tag metadata, faces) plus an
//! on-demand single-photo caption worker run on their own threads and
//! report back over an mpsc channel. Every update and every store write
//! is tagged with the generation of the folder load that spawned it; a
//! newer load bumps the shared generation, and anything still in flight
//! from the old one stops writing and has its pending events discarded.

pub mod caption;
pub mod faces;
pub mod metadata;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;

/// Monotonically increasing tag identifying one folder-load cycle.
pub type Generation = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineKind {
    Metadata,
    Faces,
}

impl PipelineKind {
    pub fn display_name(&self) -> &'static str {
        match self {
            PipelineKind::Metadata => "metadata",
            PipelineKind::Faces => "faces",
        }
    }
}

/// Update messages sent from worker threads.
#[derive(Debug, Clone)]
pub enum PipelineUpdate {
    Started { total: usize },
    /// Reported after every item.
    Progress {
        processed: usize,
        total: usize,
        path: String,
    },
    Completed { processed: usize, failed: usize },
    Cancelled,
    Failed { error: String },
}

#[derive(Debug, Clone)]
pub struct PipelineEvent {
    pub kind: PipelineKind,
    pub generation: Generation,
    pub update: PipelineUpdate,
}

/// Foreground-owned coordinator: the current generation and the receiving
/// end of the shared update channel.
pub struct PipelineHub {
    current: Arc<AtomicU64>,
    tx: mpsc::Sender<PipelineEvent>,
    rx: mpsc::Receiver<PipelineEvent>,
}

impl PipelineHub {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            current: Arc::new(AtomicU64::new(0)),
            tx,
            rx,
        }
    }

    pub fn current_generation(&self) -> Generation {
        self.current.load(Ordering::SeqCst)
    }

    /// Start a new folder-load cycle. Workers from earlier cycles observe
    /// the bump and stop writing.
    pub fn next_generation(&self) -> Generation {
        self.current.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Capabilities handed to a worker thread for one pipeline run.
    pub fn handle(&self, kind: PipelineKind, generation: Generation) -> WorkerHandle {
        WorkerHandle {
            kind,
            generation,
            tx: self.tx.clone(),
            current: Arc::clone(&self.current),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Drain pending events, discarding those tagged with a superseded
    /// generation so a stale pipeline can never touch the fresh view.
    pub fn poll(&self) -> Vec<PipelineEvent> {
        let current = self.current_generation();
        let mut events = Vec::new();

        while let Ok(event) = self.rx.try_recv() {
            if event.generation != current {
                tracing::debug!(
                    kind = event.kind.display_name(),
                    generation = event.generation,
                    current,
                    "discarding stale pipeline event"
                );
                continue;
            }
            events.push(event);
        }

        events
    }
}

impl Default for PipelineHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Worker-side handle: progress reporting, cancellation, and the
/// superseded check implementing the generation guard.
#[derive(Clone)]
pub struct WorkerHandle {
    pub kind: PipelineKind,
    pub generation: Generation,
    tx: mpsc::Sender<PipelineEvent>,
    current: Arc<AtomicU64>,
    cancel: Arc<AtomicBool>,
}

impl WorkerHandle {
    pub fn send(&self, update: PipelineUpdate) {
        let _ = self.tx.send(PipelineEvent {
            kind: self.kind,
            generation: self.generation,
            update,
        });
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// True once a newer folder load owns the store; pending writes from
    /// this run must be dropped.
    pub fn superseded(&self) -> bool {
        self.current.load(Ordering::SeqCst) != self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_discards_stale_generation_events() {
        let hub = PipelineHub::new();
        let gen1 = hub.next_generation();
        let handle = hub.handle(PipelineKind::Metadata, gen1);

        handle.send(PipelineUpdate::Started { total: 3 });
        assert_eq!(hub.poll().len(), 1);

        // A new load supersedes gen1; its late events must be dropped
        let _gen2 = hub.next_generation();
        handle.send(PipelineUpdate::Completed {
            processed: 3,
            failed: 0,
        });
        assert!(hub.poll().is_empty());
    }

    #[test]
    fn test_handle_observes_supersession() {
        let hub = PipelineHub::new();
        let gen1 = hub.next_generation();
        let handle = hub.handle(PipelineKind::Faces, gen1);

        assert!(!handle.superseded());
        hub.next_generation();
        assert!(handle.superseded());
    }

    #[test]
    fn test_cancel_flag() {
        let hub = PipelineHub::new();
        let handle = hub.handle(PipelineKind::Metadata, hub.next_generation());

        assert!(!handle.cancelled());
        handle.cancel();
        assert!(handle.cancelled());
    }
}
