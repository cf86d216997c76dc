//! Progress bar for interactive runs.

use indicatif::{ProgressBar, ProgressStyle};

use gharchive_core::{EventSink, FetchEvent, TracingSink};

/// Advances a per-year progress bar and forwards every event to `tracing`.
///
/// Log lines are printed through [`ProgressBar::suspend`] so they do not
/// tear the bar.
pub(crate) struct ProgressSink {
    bar: ProgressBar,
    inner: TracingSink,
}

impl ProgressSink {
    pub(crate) fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{msg} [{bar:40}] {pos}/{len} ({eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        Self {
            bar,
            inner: TracingSink,
        }
    }

    pub(crate) fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl EventSink for ProgressSink {
    fn emit(&self, event: &FetchEvent<'_>) {
        self.bar.suspend(|| self.inner.emit(event));

        match event {
            FetchEvent::YearStarted { year, total, .. } => {
                self.bar.reset();
                self.bar.set_length(*total as u64);
                self.bar.set_message(year.to_string());
            }
            // Exactly one of these ends every bucket.
            FetchEvent::AlreadyValid { .. }
            | FetchEvent::Verified { .. }
            | FetchEvent::Exhausted { .. }
            | FetchEvent::Aborted { .. }
            | FetchEvent::RemoveFailed { .. } => self.bar.inc(1),
            _ => {}
        }
    }
}
