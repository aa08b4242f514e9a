//! Progress and message notifications.
//!
//! The pipeline reports to an [`Observer`] but never depends on one: every run can be
//! done headless with [`NoopObserver`]. Notifications are informational only and do not
//! change control flow.

use std::fmt;
use std::sync::mpsc::Sender;
use std::sync::Mutex;

/// Severity of a [`Observer::message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    /// Status information.
    Info,
    /// Something was skipped, the run continues.
    Warning,
    /// Something failed.
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        })
    }
}

/// Receiver of progress and message notifications.
///
/// Methods may be called from worker threads.
pub trait Observer: Send + Sync {
    /// Percent complete, `0..=100`, non-decreasing within one run.
    fn progress(&self, _percent: u8) {}

    /// Human-readable message.
    fn message(&self, _severity: Severity, _text: &str) {}
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl Observer for NoopObserver {}

/// A notification, as delivered through a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// See [`Observer::progress`].
    Progress(u8),
    /// See [`Observer::message`].
    Message(Severity, String),
}

/// Forward notifications as [`Event`]s. A disconnected receiver is ignored.
impl Observer for Sender<Event> {
    fn progress(&self, percent: u8) {
        let _ = self.send(Event::Progress(percent));
    }

    fn message(&self, severity: Severity, text: &str) {
        let _ = self.send(Event::Message(severity, text.to_owned()));
    }
}

/// Observer that writes messages to `tracing` and logs progress every 10 %.
#[derive(Debug, Default)]
pub struct LogObserver {
    last_logged: Mutex<Option<u8>>,
}

impl LogObserver {
    /// Create a new log observer.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Observer for LogObserver {
    fn progress(&self, percent: u8) {
        let mut last = self
            .last_logged
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let bucket = percent / 10;
        if last.map_or(true, |l| bucket > l / 10) {
            *last = Some(percent);
            tracing::info!(percent, "progress");
        }
    }

    fn message(&self, severity: Severity, text: &str) {
        match severity {
            Severity::Info => tracing::info!("{text}"),
            Severity::Warning => tracing::warn!("{text}"),
            Severity::Error => tracing::error!("{text}"),
        }
    }
}

/// Turns `done / total` counts into monotonic percentages within `[start, end]`.
///
/// Workers finish out of order; the tracker only forwards values larger than the last one
/// it emitted, so observers see a non-decreasing sequence.
pub(crate) struct ProgressTracker<'a> {
    observer: &'a dyn Observer,
    last: Mutex<u8>,
}

impl<'a> ProgressTracker<'a> {
    pub(crate) fn new(observer: &'a dyn Observer) -> Self {
        Self {
            observer,
            last: Mutex::new(0),
        }
    }

    /// Report `done` of `total` units of a stage mapped onto `[start, end]` percent.
    pub(crate) fn stage(&self, start: u8, end: u8, done: usize, total: usize) {
        let span = usize::from(end.saturating_sub(start));
        let within = if total == 0 { span } else { done.min(total) * span / total };
        // within <= span <= 100, so the sum fits.
        self.set(start.saturating_add(within as u8));
    }

    /// Report an absolute percentage.
    pub(crate) fn set(&self, percent: u8) {
        let percent = percent.min(100);
        let mut last = self.last.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if percent > *last {
            *last = percent;
            self.observer.progress(percent);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn channel_observer_forwards_events() {
        let (tx, rx) = mpsc::channel();
        tx.progress(40);
        tx.message(Severity::Warning, "skipped a.png");
        drop(tx);
        let events: Vec<Event> = rx.iter().collect();
        assert_eq!(
            events,
            vec![
                Event::Progress(40),
                Event::Message(Severity::Warning, "skipped a.png".into())
            ]
        );
    }

    #[test]
    fn tracker_is_monotonic() {
        let (tx, rx) = mpsc::channel();
        let tracker = ProgressTracker::new(&tx);
        tracker.stage(0, 90, 2, 4);
        tracker.stage(0, 90, 1, 4);
        tracker.stage(0, 90, 4, 4);
        tracker.set(95);
        tracker.set(95);
        tracker.set(250);
        drop(tracker);
        drop(tx);
        let seen: Vec<Event> = rx.iter().collect();
        assert_eq!(
            seen,
            vec![
                Event::Progress(45),
                Event::Progress(90),
                Event::Progress(95),
                Event::Progress(100)
            ]
        );
    }

    #[test]
    fn noop_observer_accepts_everything() {
        let obs = NoopObserver;
        obs.progress(10);
        obs.message(Severity::Error, "ignored");
    }

    #[test]
    fn severity_display() {
        assert_eq!(Severity::Warning.to_string(), "warning");
    }
}
