//! Format campaign results for human consumption.

use crate::campaign::{CampaignResult, SuiteResult};
use crate::iteration::Outcome;

const RULE: &str = "═══════════════════════════════════════════════════════════════════════\n";

pub fn format_report(result: &CampaignResult) -> String {
    let mut output = String::new();

    output.push_str(RULE);
    output.push_str(&format!("  crashprobe campaign: {}\n", result.name));
    output.push_str(RULE);
    output.push('\n');

    let summary = &result.analytics;
    output.push_str(&format!("Final state:            {:?}\n", result.state));
    output.push_str(&format!("Stop reason:            {}\n", result.stop_reason));
    output.push_str(&format!("Iterations:             {}\n", summary.iterations));
    output.push_str(&format!("  aborted:              {}\n", summary.counts.aborted));
    output.push_str(&format!(
        "  finished naturally:   {}\n",
        summary.counts.finished_naturally
    ));
    output.push_str(&format!("  corrupted:            {}\n", summary.counts.corrupted));
    output.push_str(&format!("Elapsed:                {:.1}s\n", summary.elapsed_secs));
    output.push('\n');

    output.push_str("─── Trigger Coverage ──────────────────────────────────────────────────\n");
    if summary.max_threshold > 0 {
        output.push_str(&format!("Highest threshold:      {}\n", summary.max_threshold));
    }
    if let Some(calibration) = &result.calibration {
        output.push_str(&format!(
            "Calibrated window:      {:.3}s\n",
            calibration.window().as_secs_f64()
        ));
    }
    if let Some(coverage) = summary.timeline_coverage {
        output.push_str(&format!("Timeline coverage:      {:.0}%\n", coverage * 100.0));
    }
    output.push_str(&format!("Expected state:         {:?}\n", result.expected));
    output.push('\n');

    if let Some(iteration) = result.corrupted_iteration() {
        output.push_str("─── Corruption ────────────────────────────────────────────────────────\n");
        output.push_str(&format!("Iteration:              {}\n", iteration.index));
        output.push_str(&format!("Trigger:                {}\n", iteration.trigger));
        if let Outcome::Corrupted { reason } = &iteration.outcome {
            output.push_str(&format!("Reason:                 {reason}\n"));
        }
        if let Some(exit) = &iteration.exit {
            output.push_str(&format!("Killed process:         {exit}\n"));
        }
        if result.capsule.is_some() {
            output.push_str("Reproduction capsule:   attached\n");
        }
        output.push('\n');
    }

    output
}

pub fn format_suite_report(suite: &SuiteResult) -> String {
    let mut output = String::new();

    output.push_str(RULE);
    output.push_str(&format!("  crashprobe suite: {}\n", suite.name));
    output.push_str(RULE);
    output.push('\n');

    for result in &suite.results {
        output.push_str(&format!(
            "  {:<32} {:?} ({} iterations, {})\n",
            result.name, result.state, result.analytics.iterations, result.stop_reason
        ));
    }
    let skipped = suite.planned.saturating_sub(suite.results.len());
    if skipped > 0 {
        output.push_str(&format!("  {skipped} campaign(s) not run\n"));
    }
    output.push_str(&format!(
        "\nVerdict: {}\n",
        if suite.passed() { "PASS" } else { "FAIL" }
    ));

    output
}
