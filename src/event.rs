//! Events emitted by running operations.
//!
//! An operation emits zero or more `Progress` (and, when unzipping,
//! `FileOutput`) events, then exactly one `Finished` on success. A failed
//! operation emits nothing after the failure.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Events of a zip operation.
#[derive(Debug, Clone, PartialEq)]
pub enum ZipEvent {
    /// Fraction of the operation completed, in `[0.0, 1.0]`.
    Progress(f64),
    Finished,
}

/// Events of an unzip operation.
#[derive(Debug, Clone, PartialEq)]
pub enum UnzipEvent {
    /// Fraction of the operation completed, in `[0.0, 1.0]`.
    Progress(f64),
    /// A file or directory was written to this destination path.
    FileOutput(PathBuf),
    Finished,
}

impl From<Progress> for ZipEvent {
    fn from(p: Progress) -> Self {
        Self::Progress(p.0)
    }
}

impl From<Progress> for UnzipEvent {
    fn from(p: Progress) -> Self {
        Self::Progress(p.0)
    }
}

/// A progress fraction, for converting into either event type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress(pub f64);

/// Receiver of operation events.
///
/// The engine calls [`is_canceled`](EventSink::is_canceled) between entries
/// and stops with [`ZipError::OperationCanceled`](crate::ZipError) once it
/// returns `true`.
pub trait EventSink<E> {
    fn emit(&mut self, event: E);

    fn is_canceled(&self) -> bool {
        false
    }
}

impl<E, F: FnMut(E)> EventSink<E> for F {
    fn emit(&mut self, event: E) {
        self(event)
    }
}

/// Discards every event.
pub struct NoopSink;

impl<E> EventSink<E> for NoopSink {
    fn emit(&mut self, _event: E) {}
}

/// Shared cooperative cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Wraps a sink so a [`CancelToken`] can stop the operation.
pub struct Cancelable<S> {
    pub sink: S,
    pub token: CancelToken,
}

impl<E, S: EventSink<E>> EventSink<E> for Cancelable<S> {
    fn emit(&mut self, event: E) {
        self.sink.emit(event);
    }

    fn is_canceled(&self) -> bool {
        self.token.is_canceled() || self.sink.is_canceled()
    }
}

/// Turns processed counts into non-decreasing progress fractions.
///
/// Progress is measured in bytes when the operation has any, otherwise in
/// entries. Totals are fixed before the first event.
#[derive(Debug)]
pub(crate) struct ProgressTracker {
    total_bytes: u64,
    total_entries: usize,
    done_bytes: u64,
    done_entries: usize,
    last: f64,
}

impl ProgressTracker {
    pub(crate) fn new(total_bytes: u64, total_entries: usize) -> Self {
        Self {
            total_bytes,
            total_entries,
            done_bytes: 0,
            done_entries: 0,
            last: 0.0,
        }
    }

    /// Record one finished entry and return the updated fraction.
    pub(crate) fn entry_done(&mut self, bytes: u64) -> Progress {
        self.done_bytes = self.done_bytes.saturating_add(bytes);
        self.done_entries += 1;

        let fraction = if self.total_bytes > 0 {
            self.done_bytes as f64 / self.total_bytes as f64
        } else if self.total_entries > 0 {
            self.done_entries as f64 / self.total_entries as f64
        } else {
            1.0
        };
        // Inputs may grow between the sizing pass and the write pass.
        self.last = fraction.clamp(self.last, 1.0);
        Progress(self.last)
    }

    /// Final fraction, reported once all entries are done.
    pub(crate) fn complete(&mut self) -> Progress {
        self.last = 1.0;
        Progress(1.0)
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.last >= 1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_progress_is_monotonic_and_clamped() {
        let mut tracker = ProgressTracker::new(10, 3);
        assert_eq!(tracker.entry_done(0), Progress(0.0));
        assert_eq!(tracker.entry_done(5), Progress(0.5));
        // File grew after sizing
        assert_eq!(tracker.entry_done(50), Progress(1.0));
        assert!(tracker.is_complete());
    }

    #[test]
    fn entry_progress_when_no_bytes() {
        let mut tracker = ProgressTracker::new(0, 4);
        assert_eq!(tracker.entry_done(0), Progress(0.25));
        assert_eq!(tracker.entry_done(0), Progress(0.5));
    }

    #[test]
    fn closures_are_sinks() {
        let mut seen = Vec::new();
        {
            let mut sink = |e: ZipEvent| seen.push(e);
            sink.emit(ZipEvent::Progress(0.5));
            assert!(!EventSink::<ZipEvent>::is_canceled(&sink));
        }
        assert_eq!(seen, [ZipEvent::Progress(0.5)]);
    }

    #[test]
    fn cancel_token_stops_wrapped_sink() {
        let token = CancelToken::new();
        let sink = Cancelable {
            sink: NoopSink,
            token: token.clone(),
        };
        assert!(!EventSink::<ZipEvent>::is_canceled(&sink));
        token.cancel();
        assert!(EventSink::<ZipEvent>::is_canceled(&sink));
    }
}
