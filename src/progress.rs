//! Progress indicators for elabctl.
//!
//! Re-exports the pintui progress functions and drives a bar from the
//! executor's progress callbacks.

use indicatif::ProgressBar;
pub use pintui::progress::{bar, finish_clear, finish_error, finish_success, spinner};
use reconcile::{EntryOutcome, ManifestId, Pass, PlanEntry, ProgressCallback};

/// One progress bar per apply pass
#[derive(Default)]
pub struct BarProgress {
    bar: Option<ProgressBar>,
    failures: usize,
}

impl BarProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressCallback for BarProgress {
    fn on_pass_start(&mut self, pass: Pass, count: usize) {
        self.failures = 0;
        let label = match pass {
            Pass::Apply => "Applying",
            Pass::Resolve => "Resolving references",
        };
        self.bar = Some(bar(count as u64, label));
    }

    fn on_entry_start(&mut self, entry: &PlanEntry) {
        if let Some(pb) = &self.bar {
            pb.set_message(format!("{} {}", entry.action.symbol(), entry.target));
        }
    }

    fn on_entry_complete(&mut self, id: &ManifestId, outcome: &EntryOutcome) {
        let symbol = match outcome {
            EntryOutcome::Failed(_) => {
                self.failures += 1;
                "✗"
            }
            EntryOutcome::Skipped(_) => "⊘",
            _ => "✓",
        };
        log::debug!("{id}: {outcome}");
        if let Some(pb) = &self.bar {
            pb.set_message(format!("{symbol} {id}"));
            pb.inc(1);
        }
    }

    fn on_pass_complete(&mut self, pass: Pass) {
        if let Some(pb) = self.bar.take() {
            if self.failures > 0 {
                finish_error(&pb, &format!("{pass}: {} failed", self.failures));
            } else {
                finish_clear(&pb);
            }
        }
    }
}
