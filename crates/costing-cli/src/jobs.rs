//! Bulk jobs run on a blocking worker with progress and Ctrl-C cancellation.

use crate::support::exit_with;
use costing_tree::{CancelFlag, ProgressEvent, ProgressSink};
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};
use tracing::warn;

struct ChannelSink(UnboundedSender<ProgressEvent>);

impl ProgressSink for ChannelSink {
    fn emit(&self, event: ProgressEvent) {
        let _ = self.0.send(event);
    }
}

/// Run `job` to completion on a blocking thread.
///
/// Progress events are printed to stderr unless `quiet`. The first Ctrl-C sets
/// the job's cancel flag; the job stops at its next unit boundary and its
/// partial result is still returned.
pub fn run_bulk<T, F>(label: &'static str, quiet: bool, job: F) -> T
where
    F: FnOnce(&CancelFlag, &dyn ProgressSink) -> T + Send + 'static,
    T: Send + 'static,
{
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap_or_else(|e| exit_with(format!("failed to create tokio runtime: {e}")));

    runtime.block_on(async move {
        let cancel = CancelFlag::new();
        let (tx, mut rx) = unbounded_channel::<ProgressEvent>();
        let worker_cancel = cancel.clone();
        let mut worker = tokio::task::spawn_blocking(move || {
            let sink = ChannelSink(tx);
            job(&worker_cancel, &sink)
        });

        let report = |event: ProgressEvent| {
            if !quiet {
                eprintln!(
                    "{label}: {}/{} ({}%)",
                    event.processed_count, event.total_count, event.percent
                );
            }
        };

        loop {
            tokio::select! {
                joined = &mut worker => {
                    while let Ok(event) = rx.try_recv() {
                        report(event);
                    }
                    return joined.unwrap_or_else(|e| exit_with(format!("{label} worker failed: {e}")));
                }
                Some(event) = rx.recv() => report(event),
                signal = tokio::signal::ctrl_c(), if !cancel.is_cancelled() => {
                    if let Err(e) = signal {
                        warn!(error = %e, "ctrl-c handler unavailable");
                    }
                    eprintln!("{label}: cancelling after the current unit");
                    cancel.cancel();
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use costing_tree::ProgressTracker;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn job_result_and_progress_are_delivered() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&seen);
        let total = run_bulk("test", true, move |cancel, sink| {
            let mut tracker = ProgressTracker::new(sink, 5, 2);
            for _ in 0..5 {
                assert!(!cancel.is_cancelled());
                tracker.advance();
                counted.fetch_add(1, Ordering::SeqCst);
            }
            tracker.processed()
        });
        assert_eq!(total, 5);
        assert_eq!(seen.load(Ordering::SeqCst), 5);
    }
}
