//! Terminal rendering for run events and results

use colored::*;

use crate::export::ExportResult;
use crate::transfer::{
    EntityType, LogLevel, ProgressUpdate, RunEvent, RunOutcome, RunResult, TypeSummary,
};

/// Prints progress lines without flooding the terminal
///
/// A line is printed when the phase changes, every ten percent within a
/// phase, and for the last item of a phase.
#[derive(Debug, Default)]
pub struct ProgressPrinter {
    phase: Option<String>,
    last_step: Option<u32>,
}

impl ProgressPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&mut self, event: &RunEvent) {
        match event {
            RunEvent::Progress(update) => {
                if self.should_print(update) {
                    print_progress(update);
                }
            }
            RunEvent::Log(log) => match log.level {
                LogLevel::Info => println!("  {}", log.message.dimmed()),
                LogLevel::Warn => println!("  {} {}", "warning:".yellow().bold(), log.message),
                LogLevel::Error => println!("  {} {}", "error:".red().bold(), log.message),
            },
        }
    }

    fn should_print(&mut self, update: &ProgressUpdate) -> bool {
        let step = (update.percent / 10.0).floor() as u32;
        let new_phase = self.phase.as_deref() != Some(update.phase.as_str());
        let last_item = update.total > 0 && update.current >= update.total;
        let new_step = self.last_step != Some(step);

        if new_phase {
            self.phase = Some(update.phase.clone());
        }
        if new_phase || new_step || last_item {
            self.last_step = Some(step);
            true
        } else {
            false
        }
    }
}

fn print_progress(update: &ProgressUpdate) {
    let counter = if update.total > 0 {
        format!(" ({}/{})", update.current, update.total)
    } else {
        String::new()
    };
    println!(
        "{:>5.1}% {} {}{}",
        update.percent,
        update.phase.cyan(),
        update.message,
        counter.dimmed()
    );
}

pub fn outcome_label(outcome: RunOutcome) -> ColoredString {
    let text = outcome.to_string();
    match outcome {
        RunOutcome::Completed => text.green().bold(),
        RunOutcome::Partial => text.yellow().bold(),
        RunOutcome::Cancelled => text.yellow(),
        RunOutcome::Failed => text.red().bold(),
    }
}

/// Per-type counts in processing order, keyed by display label
pub fn summary_rows(result: &RunResult) -> Vec<(String, TypeSummary)> {
    result
        .summary()
        .into_iter()
        .map(|(t, s): (EntityType, TypeSummary)| (t.label().to_string(), s))
        .collect()
}

pub fn print_run_summary(result: &RunResult, dry_run: bool) {
    println!();
    println!(
        "Run {} {}",
        result.run_id.to_string().dimmed(),
        outcome_label(result.outcome)
    );
    if let Some(error) = &result.error {
        println!("{} {}", "error:".red().bold(), error);
    }

    let rows = summary_rows(result);
    if rows.is_empty() {
        println!("No records processed.");
        return;
    }

    let new_header = if dry_run { "Would create" } else { "Created" };
    let width = rows.iter().map(|(label, _)| label.len()).max().unwrap_or(0).max(4);
    println!();
    println!(
        "{:<width$}  {:>12}  {:>8}  {:>8}",
        "Type".bold(),
        new_header.bold(),
        "Skipped".bold(),
        "Failed".bold(),
        width = width
    );
    for (label, s) in &rows {
        let new_count = if dry_run { s.would_create } else { s.created };
        let failed = if s.failed > 0 {
            s.failed.to_string().red().bold()
        } else {
            s.failed.to_string().normal()
        };
        println!(
            "{:<width$}  {:>12}  {:>8}  {:>8}",
            label,
            new_count,
            s.skipped,
            failed,
            width = width
        );
    }
    println!("{} records processed", result.total_processed);

    let failures: Vec<_> = result.failures().collect();
    if !failures.is_empty() {
        println!();
        println!("{}", format!("Failures ({})", failures.len()).red().bold());
        for f in failures {
            println!(
                "  {} {} [{}]: {}",
                f.entity_type,
                f.name,
                f.source_id.dimmed(),
                f.detail.as_deref().unwrap_or("no detail")
            );
        }
    }
}

pub fn print_export_summary(result: &ExportResult) {
    println!();
    println!("Export {}", outcome_label(result.outcome));
    for (entity_type, count) in &result.counts {
        println!("  {:<24} {:>8}", entity_type.label(), count);
    }
    println!("  {:<24} {:>8}", "Total".bold(), result.total_records());

    for file in &result.files {
        println!(
            "  {} {} ({} records)",
            "wrote".green(),
            file.path.display(),
            file.records
        );
    }
    for warning in &result.warnings {
        println!("  {} {}", "warning:".yellow().bold(), warning);
    }
}
