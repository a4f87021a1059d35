//! Multi-row download progress display.
//!
//! Two modes: fixed (one row per artifact, good for small batches) and
//! worker (one row per worker plus a `[done/total]` status line, good for
//! many artifacts). Rows are byte-denominated bars; the label column only
//! ever grows so rows never reflow. Rendering is elided when stderr is not
//! a terminal.

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::Mutex;

/// Display layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressMode {
    /// One row per artifact
    Fixed,
    /// One row per worker plus a status line
    Worker,
}

#[derive(Debug, Default)]
struct Counters {
    completed: usize,
    failed: usize,
}

/// Thread-safe multi-row progress display
#[derive(Debug)]
pub struct MultiBar {
    mode: ProgressMode,
    bars: Vec<ProgressBar>,
    status: Option<ProgressBar>,
    total: usize,
    counters: Mutex<Counters>,
    /// Monotonically growing label column width
    label_width: Mutex<usize>,
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template("{msg} [{bar:30}] {bytes}/{total_bytes}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

impl MultiBar {
    /// One row per artifact
    #[must_use]
    pub fn fixed(labels: &[String]) -> Self {
        let multi = MultiProgress::with_draw_target(ProgressDrawTarget::stderr());
        let mut display = Self {
            mode: ProgressMode::Fixed,
            bars: Vec::with_capacity(labels.len()),
            status: None,
            total: labels.len(),
            counters: Mutex::new(Counters::default()),
            label_width: Mutex::new(0),
        };

        for _label in labels {
            let bar = multi.add(ProgressBar::no_length());
            bar.set_style(bar_style());
            display.bars.push(bar);
        }
        for (slot, label) in labels.iter().enumerate() {
            display.set_label(slot, label);
        }
        display
    }

    /// One row per worker, plus a `[done/total]` status line
    #[must_use]
    pub fn worker(workers: usize, total: usize) -> Self {
        let multi = MultiProgress::with_draw_target(ProgressDrawTarget::stderr());
        let mut bars = Vec::with_capacity(workers);
        for _ in 0..workers {
            let bar = multi.add(ProgressBar::no_length());
            bar.set_style(bar_style());
            bars.push(bar);
        }

        let status = multi.add(ProgressBar::no_length());
        status.set_style(
            ProgressStyle::with_template("{msg}").unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        status.set_message(format!("[0/{total}]"));

        Self {
            mode: ProgressMode::Worker,
            bars,
            status: Some(status),
            total,
            counters: Mutex::new(Counters::default()),
            label_width: Mutex::new(0),
        }
    }

    /// A display that renders nothing (`--quiet`)
    #[must_use]
    pub fn hidden(total: usize) -> Self {
        let multi = MultiProgress::with_draw_target(ProgressDrawTarget::hidden());
        let bar = multi.add(ProgressBar::no_length());
        Self {
            mode: ProgressMode::Fixed,
            bars: vec![bar],
            status: None,
            total,
            counters: Mutex::new(Counters::default()),
            label_width: Mutex::new(0),
        }
    }

    /// The row a worker should report to for a given artifact
    #[must_use]
    pub fn slot(&self, worker: usize, artifact: usize) -> usize {
        let raw = match self.mode {
            ProgressMode::Fixed => artifact,
            ProgressMode::Worker => worker,
        };
        raw.min(self.bars.len().saturating_sub(1))
    }

    /// Set a row's label, growing the shared label column as needed
    pub fn set_label(&self, slot: usize, label: &str) {
        let width = {
            let mut width = self
                .label_width
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            *width = (*width).max(label.len());
            *width
        };

        if let Some(bar) = self.bars.get(slot) {
            bar.reset();
            bar.unset_length();
            bar.set_message(format!("{label:<width$}"));
        }
    }

    /// Report bytes received for a row
    pub fn update(&self, slot: usize, received: u64, total: Option<u64>) {
        let Some(bar) = self.bars.get(slot) else {
            return;
        };
        if let Some(total) = total {
            bar.set_length(total);
        }
        bar.set_position(received);
    }

    /// Mark one artifact finished
    pub fn finish(&self, slot: usize) {
        if let Some(bar) = self.bars.get(slot)
            && self.mode == ProgressMode::Fixed
        {
            bar.finish();
        }
        let completed = {
            let mut counters = self
                .counters
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            counters.completed += 1;
            counters.completed + counters.failed
        };
        self.bump_status(completed);
    }

    /// Mark one artifact failed
    pub fn fail(&self, slot: usize) {
        if let Some(bar) = self.bars.get(slot)
            && self.mode == ProgressMode::Fixed
        {
            bar.abandon();
        }
        let done = {
            let mut counters = self
                .counters
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            counters.failed += 1;
            counters.completed + counters.failed
        };
        self.bump_status(done);
    }

    fn bump_status(&self, done: usize) {
        if let Some(status) = &self.status {
            status.set_message(format!("[{done}/{total}]", total = self.total));
        }
    }

    /// Counts of completed and failed artifacts so far
    #[must_use]
    pub fn progress(&self) -> (usize, usize) {
        let counters = self
            .counters
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        (counters.completed, counters.failed)
    }

    /// Finish every row (end of a run)
    pub fn close(&self) {
        for bar in &self.bars {
            if !bar.is_finished() {
                bar.finish_and_clear();
            }
        }
        if let Some(status) = &self.status {
            status.finish();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_mode_maps_slots_to_artifacts() {
        let bar = MultiBar::fixed(&["a".to_string(), "bb".to_string()]);
        assert_eq!(bar.slot(0, 1), 1);
        assert_eq!(bar.slot(5, 0), 0);
    }

    #[test]
    fn worker_mode_maps_slots_to_workers() {
        let bar = MultiBar::worker(2, 10);
        assert_eq!(bar.slot(1, 7), 1);
        assert_eq!(bar.slot(0, 9), 0);
    }

    #[test]
    fn counters_accumulate() {
        let bar = MultiBar::worker(2, 3);
        bar.finish(0);
        bar.finish(1);
        bar.fail(0);
        assert_eq!(bar.progress(), (2, 1));
    }

    #[test]
    fn updates_are_safe_out_of_range() {
        let bar = MultiBar::fixed(&["only".to_string()]);
        bar.update(9, 100, Some(200));
        bar.finish(9);
    }

    #[test]
    fn hidden_display_works() {
        let bar = MultiBar::hidden(2);
        bar.set_label(0, "x");
        bar.update(0, 1, None);
        bar.finish(0);
        bar.close();
    }
}
