//! Display formatting for CLI output
//!
//! Provides styled lines for:
//! - Progress messages forwarded while a server starts
//! - Deploy and teardown summaries with skipped resources

use console::style;
use kubetemplate_kube::{OperationSummary, ProgressFeed};

/// Print a step being started
pub fn step(message: &str) {
    println!("{} {}", style("→").blue().bold(), message);
}

/// Print a completed step
pub fn success(message: &str) {
    println!("{} {}", style("✓").green().bold(), message);
}

/// Print a warning
pub fn warning(message: &str) {
    println!("{} {}", style("⚠").yellow(), message);
}

/// One progress line, indented under the current step
pub fn progress_line(message: &str) -> String {
    format!("  {} {}", style("•").dim(), message)
}

/// Print progress messages until the feed finishes
pub async fn follow_progress(mut feed: ProgressFeed) {
    while let Some(message) = feed.next().await {
        println!("{}", progress_line(&message));
    }
}

/// Lines describing what a teardown left behind
pub fn summary_lines(summary: &OperationSummary) -> Vec<String> {
    let mut lines = Vec::new();
    for name in &summary.succeeded {
        lines.push(format!("  {} {}", style("deleted").red(), name));
    }
    for (name, reason) in &summary.skipped {
        lines.push(format!("  {} {} ({})", style("kept").dim(), name, reason));
    }
    for name in &summary.unconfirmed {
        lines.push(format!(
            "  {} {} (still terminating)",
            style("pending").yellow(),
            name
        ));
    }
    lines
}

/// Print a teardown summary
pub fn print_summary(summary: &OperationSummary) {
    for line in summary_lines(summary) {
        println!("{}", line);
    }
    if summary.is_complete() {
        success(&summary.summary());
    } else {
        warning(&format!(
            "{}; some objects were not confirmed deleted",
            summary.summary()
        ));
    }
}
