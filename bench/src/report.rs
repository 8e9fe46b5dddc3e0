//! Report module: prints human-readable benchmark results and stage progress.

use std::io::Write;

use crate::orchestrator::{Progress, RunResult, RunSource};
use crate::timer::{StageTiming, TOTAL_STAGE};

/// Display label of a stage: `zoom-16-query` becomes `Zoom-16 query`.
pub fn stage_label(stage: &str) -> String {
    let spaced = match stage.strip_suffix("-query") {
        Some(prefix) => format!("{prefix} query"),
        None => stage.to_string(),
    };
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => spaced,
    }
}

/// Writes `Zoom-16 query....done (42)` lines to stderr.
pub struct StderrProgress;

impl Progress for StderrProgress {
    fn stage_started(&mut self, stage: &str) {
        eprint!("  {}....", stage_label(stage));
        let _ = std::io::stderr().flush();
    }

    fn stage_finished(&mut self, _timing: &StageTiming, detail: Option<&str>) {
        match detail {
            Some(detail) => eprintln!("done ({detail})"),
            None => eprintln!("done"),
        }
    }
}

fn counter_summary(stage: &StageTiming) -> String {
    stage
        .counters
        .iter()
        .filter(|c| c.delta > 0)
        .map(|c| format!("{}={}", c.name, c.delta))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Print the formatted report of a finished run.
pub fn print_report(result: &RunResult) {
    println!("\n{}", "=".repeat(80));
    println!("  Geospatial Store Benchmark Report");
    match &result.source {
        RunSource::Random { nodes } => println!("  Source: {nodes} random nodes"),
        RunSource::Dataset { path } => println!("  Source: dataset {}", path.display()),
    }
    println!("{}", "=".repeat(80));

    println!("\n  Indexed records: {:>10}", result.indexed);
    println!("  Centroid:        {}", result.centroid);
    for zoom in &result.zoom_results {
        println!(
            "  {:16} {:>10}  (radius {}°)",
            format!("{}:", stage_label(&zoom.label)),
            zoom.count,
            zoom.radius
        );
    }
    println!("  Full map:        {:>10}", result.full_map_count);
    println!(
        "  Replication:     {:>10} primary->replica / {} replica->primary  ({} entries in {})",
        result.replication.a.sent,
        result.replication.b.sent,
        result.replica_entries,
        result.replica_dir.display()
    );

    println!("\n  Stage timings:");
    println!("  {:24} {:>12} {:>8}  {}", "Stage", "Time (ms)", "% total", "I/O");
    println!("  {}", "-".repeat(66));

    let total_ms = result.total().map_or(0.0, StageTiming::millis);
    for stage in result.stages.iter().filter(|s| s.name != TOTAL_STAGE) {
        let pct = if total_ms > 0.0 {
            stage.millis() / total_ms * 100.0
        } else {
            0.0
        };
        println!(
            "  {:24} {:>12.3} {:>7.1}%  {}",
            stage_label(&stage.name),
            stage.millis(),
            pct,
            counter_summary(stage)
        );
    }
    if let Some(total) = result.total() {
        println!("  {}", "-".repeat(66));
        println!(
            "  {:24} {:>12.3} {:>8}  {}",
            stage_label(&total.name),
            total.millis(),
            "",
            counter_summary(total)
        );
    }

    println!("\n{}", "=".repeat(80));
    println!();
}

/// Print the stages that completed before a run failed.
pub fn print_partial(completed: &[StageTiming]) {
    if completed.is_empty() {
        return;
    }
    eprintln!("\n  Completed before failure:");
    for stage in completed {
        eprintln!("  {:24} {:>12.3} ms", stage_label(&stage.name), stage.millis());
    }
}
