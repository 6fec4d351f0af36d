//! Progress reporting and cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::domain::{ProgressSnapshot, RunEvent};

/// Shared, monotonic cancellation flag.
///
/// Once set it stays set. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Pushes progress snapshots and run events to observers
#[derive(Debug)]
pub struct ProgressTracker {
    cancel: CancelFlag,
    progress: watch::Sender<ProgressSnapshot>,
    events: Option<mpsc::UnboundedSender<RunEvent>>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        let (progress, _) = watch::channel(ProgressSnapshot::empty(0));
        Self {
            cancel: CancelFlag::new(),
            progress,
            events: None,
        }
    }

    /// Share an externally owned cancellation flag
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Forward every run event to a channel
    pub fn with_events(mut self, events: mpsc::UnboundedSender<RunEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Latest-value view of progress
    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.progress.subscribe()
    }

    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Send an event; a dropped receiver is ignored
    pub fn emit(&self, event: RunEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    /// Publish a snapshot to the watch channel and the event stream
    pub fn publish(&self, snapshot: ProgressSnapshot) {
        self.progress.send_replace(snapshot);
        self.emit(RunEvent::Progress(snapshot));
    }
}
