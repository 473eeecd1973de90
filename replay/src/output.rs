use std::time::Duration;

use replay_core::{ActivitySnapshot, StatsRenderer, StatsSnapshot};

/// Print the aggregated statistics of a single replay run.
pub fn print_replay_stats(snapshot: &StatsSnapshot) {
    println!();
    println!("=== Replay statistics ===");
    if let Some(elapsed) = snapshot.object_creation {
        println!("Object creation:  {}", fmt_duration(elapsed));
    }
    if let Some(initial) = &snapshot.initial_data {
        println!("Initial data:     {}", fmt_duration(initial.time));
    }
    print_activity("Queries", &snapshot.queries);
    print_activity("Ingestions", &snapshot.ingestions);
    if let Some(peak) = peak_memory(snapshot) {
        println!("Peak memory:      {}", fmt_bytes(peak));
    }
}

fn print_activity(label: &str, activity: &ActivitySnapshot) {
    if activity.total == 0 {
        return;
    }
    println!(
        "{label}: {} total, {} failed ({:.1}%), {} slow",
        activity.total,
        activity.failed,
        activity.failure_rate() * 100.0,
        activity.slow,
    );
    if let Some((p50, p90, p99, max)) = activity.latency_percentiles_ms() {
        println!("  latency (ms): p50={p50} p90={p90} p99={p99} max={max}");
    }
    for (message, contexts) in &activity.errors {
        println!("  error [{}x] {message}", contexts.len());
        for context in contexts.iter().take(3) {
            println!("    in {context}");
        }
        if contexts.len() > 3 {
            println!("    ... and {} more", contexts.len() - 3);
        }
    }
}

fn peak_memory(snapshot: &StatsSnapshot) -> Option<u64> {
    snapshot
        .docker
        .iter()
        .flat_map(|s| s.containers.iter().map(|c| c.mem_bytes))
        .max()
}

/// Side-by-side table of a reference run and a candidate run.
pub struct TextRenderer;

impl StatsRenderer for TextRenderer {
    fn render(
        &self,
        workload_name: &str,
        reference: &StatsSnapshot,
        candidate: &StatsSnapshot,
        old_version: &str,
        new_version: &str,
    ) {
        println!();
        println!("=== Comparison: {workload_name} ===");
        println!("{:<28} {:>18} {:>18}", "", old_version, new_version);
        render_row(
            "object creation",
            reference.object_creation.map(fmt_duration),
            candidate.object_creation.map(fmt_duration),
        );
        render_row(
            "initial data",
            reference.initial_data.as_ref().map(|i| fmt_duration(i.time)),
            candidate.initial_data.as_ref().map(|i| fmt_duration(i.time)),
        );
        render_activity("queries", &reference.queries, &candidate.queries);
        render_activity("ingestions", &reference.ingestions, &candidate.ingestions);
        render_row(
            "peak memory",
            peak_memory(reference).map(fmt_bytes),
            peak_memory(candidate).map(fmt_bytes),
        );
    }
}

fn render_activity(label: &str, reference: &ActivitySnapshot, candidate: &ActivitySnapshot) {
    if reference.total == 0 && candidate.total == 0 {
        return;
    }
    render_row(
        &format!("{label} total"),
        Some(reference.total.to_string()),
        Some(candidate.total.to_string()),
    );
    render_row(
        &format!("{label} failed"),
        Some(format!(
            "{} ({:.1}%)",
            reference.failed,
            reference.failure_rate() * 100.0
        )),
        Some(format!(
            "{} ({:.1}%)",
            candidate.failed,
            candidate.failure_rate() * 100.0
        )),
    );
    for (name, reference_value, candidate_value) in latency_rows(
        reference.latency_percentiles_ms(),
        candidate.latency_percentiles_ms(),
    ) {
        render_row(
            &format!("{label} latency {name} (ms)"),
            reference_value.map(|v| v.to_string()),
            candidate_value.map(|v| v.to_string()),
        );
    }
}

/// The same percentile set as the single-run printout, one row per rank.
fn latency_rows(
    reference: Option<(u64, u64, u64, u64)>,
    candidate: Option<(u64, u64, u64, u64)>,
) -> [(&'static str, Option<u64>, Option<u64>); 4] {
    let pick = |p: Option<(u64, u64, u64, u64)>, f: fn((u64, u64, u64, u64)) -> u64| p.map(f);
    [
        ("p50", pick(reference, |p| p.0), pick(candidate, |p| p.0)),
        ("p90", pick(reference, |p| p.1), pick(candidate, |p| p.1)),
        ("p99", pick(reference, |p| p.2), pick(candidate, |p| p.2)),
        ("max", pick(reference, |p| p.3), pick(candidate, |p| p.3)),
    ]
}

fn render_row(label: &str, reference: Option<String>, candidate: Option<String>) {
    if reference.is_none() && candidate.is_none() {
        return;
    }
    let dash = || "-".to_string();
    println!(
        "{label:<28} {:>18} {:>18}",
        reference.unwrap_or_else(dash),
        candidate.unwrap_or_else(dash)
    );
}

fn fmt_duration(d: Duration) -> String {
    // Millisecond precision is plenty for phase timings.
    humantime::format_duration(Duration::from_millis(d.as_millis() as u64)).to_string()
}

fn fmt_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
