//! Format coverage reports for human consumption.

use membugs_fault::catalog::{AccessKind, FaultCategory};
use membugs_fault::report::{ExecutionResult, Outcome};
use std::collections::BTreeMap;

/// Outcome counts for one fault.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub detected: usize,
    pub undetected: usize,
    pub crashed: usize,
    pub leaked: usize,
    pub skipped: usize,
    /// Control runs that were nevertheless flagged.
    pub false_positives: usize,
}

impl Tally {
    pub fn record(&mut self, result: &ExecutionResult) {
        match result.outcome {
            Outcome::Detected => self.detected += 1,
            Outcome::Undetected => self.undetected += 1,
            Outcome::Crashed => self.crashed += 1,
            Outcome::Leaked => self.leaked += 1,
            Outcome::SkippedResourceExhausted => self.skipped += 1,
        }
        if result.access == AccessKind::Control && result.outcome == Outcome::Detected {
            self.false_positives += 1;
        }
    }

    pub fn total(&self) -> usize {
        self.detected + self.undetected + self.crashed + self.leaked + self.skipped
    }
}

/// Per-fault tallies in catalog order.
pub fn tally<'a>(results: impl IntoIterator<Item = &'a ExecutionResult>) -> BTreeMap<FaultCategory, Tally> {
    let mut tallies: BTreeMap<FaultCategory, Tally> = BTreeMap::new();
    for result in results {
        tallies.entry(result.category).or_default().record(result);
    }
    tallies
}

/// Format a result log as a summary table.
pub fn format_report<'a>(
    sanitizer: &str,
    results: impl IntoIterator<Item = &'a ExecutionResult>,
) -> String {
    let tallies = tally(results);
    let mut output = String::new();

    output.push_str("═══════════════════════════════════════════════════════════════════════\n");
    output.push_str("  membugs Sanitizer Coverage Report\n");
    output.push_str("═══════════════════════════════════════════════════════════════════════\n\n");

    let total: Tally = tallies.values().fold(Tally::default(), |mut acc, t| {
        acc.detected += t.detected;
        acc.undetected += t.undetected;
        acc.crashed += t.crashed;
        acc.leaked += t.leaked;
        acc.skipped += t.skipped;
        acc.false_positives += t.false_positives;
        acc
    });

    output.push_str(&format!("Sanitizer:              {sanitizer}\n"));
    output.push_str(&format!("Executions:             {}\n", total.total()));
    output.push_str(&format!("Faults exercised:       {}\n", tallies.len()));
    output.push('\n');

    output.push_str("─── Outcomes per Fault ────────────────────────────────────────────────\n");
    output.push_str(&format!(
        "{:<28} {:>8} {:>10} {:>7} {:>6} {:>7}\n",
        "fault", "detected", "undetected", "crashed", "leaked", "skipped"
    ));
    for (category, t) in &tallies {
        output.push_str(&format!(
            "{:<28} {:>8} {:>10} {:>7} {:>6} {:>7}\n",
            category.as_str(),
            t.detected,
            t.undetected,
            t.crashed,
            t.leaked,
            t.skipped
        ));
    }
    output.push('\n');

    if total.false_positives > 0 {
        output.push_str("─── Flagged Control Accesses ──────────────────────────────────────────\n");
        for (category, t) in tallies.iter().filter(|(_, t)| t.false_positives > 0) {
            output.push_str(&format!("{:<28} {}\n", category.as_str(), t.false_positives));
        }
        output.push('\n');
    }

    output.push_str("═══════════════════════════════════════════════════════════════════════\n");
    output
}
