//! Progress reporting and cooperative cancellation for bulk operations.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Default number of units between two progress events.
pub const DEFAULT_PROGRESS_INTERVAL: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub processed_count: usize,
    pub total_count: usize,
    pub percent: u8,
}

impl ProgressEvent {
    pub fn new(processed_count: usize, total_count: usize) -> Self {
        let percent = if total_count == 0 {
            100
        } else {
            (processed_count.min(total_count) * 100 / total_count) as u8
        };
        Self {
            processed_count,
            total_count,
            percent,
        }
    }
}

/// Receiver of progress events.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn emit(&self, event: ProgressEvent) {
        self(event)
    }
}

/// Sink that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Counts processed units and emits at a bounded frequency.
///
/// An event goes out every `interval` units and once more for the last unit.
pub struct ProgressTracker<'a> {
    sink: &'a dyn ProgressSink,
    total: usize,
    interval: usize,
    processed: usize,
}

impl<'a> ProgressTracker<'a> {
    pub fn new(sink: &'a dyn ProgressSink, total: usize, interval: usize) -> Self {
        Self {
            sink,
            total,
            interval: interval.max(1),
            processed: 0,
        }
    }

    pub fn advance(&mut self) {
        self.processed += 1;
        if self.processed % self.interval == 0 || self.processed == self.total {
            self.sink.emit(ProgressEvent::new(self.processed, self.total));
        }
    }

    pub fn processed(&self) -> usize {
        self.processed
    }
}

/// Shared flag checked between units of work.
///
/// Cancelling never interrupts a unit in flight; the run stops before the next one.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
