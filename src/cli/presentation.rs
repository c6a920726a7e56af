//! CLI presentation: text and json formatters per command.

use comfy_table::presets::{UTF8_BORDERS_ONLY, UTF8_FULL};
use comfy_table::Table;
use owo_colors::OwoColorize;
use serde_json::json;

use crate::catalog::Catalog;
use crate::pipeline::{RunSummary, SeedSummary};
use crate::progress::{RunRecord, RunStatus};
use crate::schema::SchemaRegistry;
use crate::status::{GenerationState, GenerationStatus, StatusBreakdown};

pub fn format_section_heading(title: &str) -> String {
    format!("{}", title.bold().underline())
}

fn colored_state(state: GenerationState) -> String {
    match state {
        GenerationState::Pending => state.as_str().yellow().to_string(),
        GenerationState::InProgress => state.as_str().cyan().to_string(),
        GenerationState::Completed => state.as_str().green().to_string(),
        GenerationState::Failed => state.as_str().red().to_string(),
    }
}

fn format_timestamp(ms: u64) -> String {
    chrono::DateTime::from_timestamp_millis(ms as i64)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn to_pretty_json(value: &serde_json::Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}

pub fn format_status_text(breakdown: &StatusBreakdown) -> String {
    let mut out = String::new();
    out.push_str(&format!("{}\n\n", format_section_heading("Generation Status")));
    if breakdown.total == 0 {
        out.push_str("No specs seeded yet.\n\nUse 'coursegen seed' or 'coursegen run' to start.\n");
        return out;
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["State", "Specs"]);
    for state in [
        GenerationState::Pending,
        GenerationState::InProgress,
        GenerationState::Completed,
        GenerationState::Failed,
    ] {
        table.add_row(vec![colored_state(state), breakdown.count(state).to_string()]);
    }
    out.push_str(&format!("{}\n\n", table));
    out.push_str(&format!("  Total: {}\n", breakdown.total));
    out.push_str(&format!(
        "  Completion: {:.1}%\n",
        breakdown.completion_rate()
    ));
    if breakdown.reclaimable > 0 {
        out.push_str(&format!(
            "  Reclaimable (expired lease): {}\n",
            breakdown.reclaimable.yellow()
        ));
    }
    if breakdown.exhausted > 0 {
        out.push_str(&format!(
            "  Retry budget exhausted: {}\n",
            breakdown.exhausted.red()
        ));
    }

    if !breakdown.failures_by_reason.is_empty() {
        out.push_str(&format!("\n{}\n\n", format_section_heading("Failures by reason")));
        let mut table = Table::new();
        table.load_preset(UTF8_BORDERS_ONLY);
        table.set_header(vec!["Reason", "Specs"]);
        for (reason, count) in &breakdown.failures_by_reason {
            table.add_row(vec![reason.clone(), count.to_string()]);
        }
        out.push_str(&format!("{}\n", table));
    }
    out
}

pub fn format_status_json(breakdown: &StatusBreakdown) -> String {
    to_pretty_json(&json!({
        "total": breakdown.total,
        "pending": breakdown.pending,
        "in_progress": breakdown.in_progress,
        "completed": breakdown.completed,
        "failed": breakdown.failed,
        "reclaimable": breakdown.reclaimable,
        "exhausted": breakdown.exhausted,
        "completion_rate": breakdown.completion_rate(),
        "failures_by_reason": breakdown.failures_by_reason,
    }))
}

pub fn format_seed_summary(summary: &SeedSummary) -> String {
    format!(
        "Seeded {} combination(s), {} spec(s): {} new, {} already present",
        summary.combinations, summary.specs, summary.inserted, summary.existing
    )
}

pub fn format_run_summary_text(summary: &RunSummary) -> String {
    let mut out = String::new();
    if summary.dry_run {
        out.push_str(&format!("{}\n\n", format_section_heading("Dry run")));
        out.push_str(&format!(
            "  Combinations: {}\n  Specs: {}\n  Already tracked: {}\n",
            summary.seed.combinations, summary.seed.specs, summary.breakdown.total
        ));
        return out;
    }

    let title = if summary.cancelled {
        "Run cancelled"
    } else {
        "Run finished"
    };
    out.push_str(&format!("{}\n\n", format_section_heading(title)));
    if let Some(ref run_id) = summary.run_id {
        out.push_str(&format!("  Run: {}\n", run_id));
    }
    out.push_str(&format!("  {}\n", format_seed_summary(&summary.seed)));
    out.push_str(&format!(
        "  Batches: {} ({} ms)\n\n",
        summary.batches, summary.duration_ms
    ));

    let report = &summary.report;
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Outcome", "Specs"]);
    table.add_row(vec!["claimed".to_string(), report.claimed.to_string()]);
    table.add_row(vec!["accepted".green().to_string(), report.accepted.to_string()]);
    table.add_row(vec![
        "  low diversity".to_string(),
        report.low_diversity.to_string(),
    ]);
    table.add_row(vec!["retried".yellow().to_string(), report.retried.to_string()]);
    table.add_row(vec!["failed".red().to_string(), report.failed.to_string()]);
    table.add_row(vec![
        "rolled back".to_string(),
        report.rolled_back.to_string(),
    ]);
    table.add_row(vec!["released".to_string(), report.released.to_string()]);
    out.push_str(&format!("{}\n\n", table));
    out.push_str(&format_status_text(&summary.breakdown));
    out
}

pub fn format_run_summary_json(summary: &RunSummary) -> String {
    let mut value = serde_json::to_value(summary).unwrap_or_else(|_| json!({}));
    if let Some(obj) = value.as_object_mut() {
        obj.insert("exit_code".to_string(), json!(summary.exit_code()));
    }
    to_pretty_json(&value)
}

pub fn format_preview_text(rows: &[GenerationStatus]) -> String {
    if rows.is_empty() {
        return "Nothing pending.".to_string();
    }
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Spec", "Combination", "Priority", "State", "Attempts"]);
    for row in rows {
        table.add_row(vec![
            row.key.to_string(),
            row.spec.combination.key(),
            row.spec.combination.priority.to_string(),
            colored_state(row.state),
            row.attempts.to_string(),
        ]);
    }
    format!("{}\n\nShowing {} spec(s) in claim order", table, rows.len())
}

pub fn format_preview_json(rows: &[GenerationStatus]) -> String {
    let specs: Vec<_> = rows
        .iter()
        .map(|row| {
            json!({
                "key": row.key.as_str(),
                "combination": row.spec.combination.key(),
                "priority": row.spec.combination.priority,
                "state": row.state.as_str(),
                "attempts": row.attempts,
            })
        })
        .collect();
    to_pretty_json(&json!({ "specs": specs, "total": rows.len() }))
}

pub fn format_reset_result(status: &GenerationStatus) -> String {
    format!("Reset {} to {}", status.key, colored_state(status.state))
}

pub fn format_schemas_text(registry: &SchemaRegistry) -> String {
    let mut out = format!(
        "{}\n\n",
        format_section_heading(&format!("Schemas (registry v{})", registry.version()))
    );
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Exercise type", "Name", "Version", "Required fields"]);
    for schema in registry.schemas() {
        let required: Vec<&str> = schema.required_fields().map(|f| f.name.as_str()).collect();
        table.add_row(vec![
            schema.id.clone(),
            schema.name.clone(),
            schema.version.to_string(),
            required.join(", "),
        ]);
    }
    out.push_str(&format!("{}\n", table));
    out
}

pub fn format_schemas_json(registry: &SchemaRegistry) -> String {
    let schemas: Vec<_> = registry.schemas().collect();
    to_pretty_json(&json!({ "version": registry.version(), "schemas": schemas }))
}

pub fn format_catalog_text(catalog: &Catalog, combinations: usize) -> String {
    let mut out = format!("{}\n\n", format_section_heading("Catalog"));
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Dimension", "Code", "Name", "Active"]);
    let mark = |active: bool| if active { "yes" } else { "no" };
    for pair in &catalog.language_pairs {
        table.add_row(vec![
            "language pair".to_string(),
            pair.code.clone(),
            pair.display_name(),
            mark(pair.active).to_string(),
        ]);
    }
    for level in &catalog.levels {
        table.add_row(vec!["level".to_string(), level.code.clone(), level.name.clone(), mark(level.active).to_string()]);
    }
    for category in &catalog.categories {
        table.add_row(vec![
            "category".to_string(),
            category.code.clone(),
            category.name.clone(),
            mark(category.active).to_string(),
        ]);
    }
    for exercise in &catalog.exercise_types {
        table.add_row(vec![
            "exercise type".to_string(),
            exercise.code.clone(),
            exercise.name.clone(),
            mark(exercise.active).to_string(),
        ]);
    }
    for topic in &catalog.topics {
        table.add_row(vec!["topic".to_string(), topic.code.clone(), topic.name.clone(), mark(topic.active).to_string()]);
    }
    out.push_str(&format!("{}\n\n", table));
    out.push_str(&format!("Resolved combinations: {}\n", combinations));
    out
}

pub fn format_catalog_json(catalog: &Catalog, combinations: usize) -> String {
    to_pretty_json(&json!({ "catalog": catalog, "combinations": combinations }))
}

pub fn format_runs_text(runs: &[RunRecord]) -> String {
    if runs.is_empty() {
        return "No runs recorded.".to_string();
    }
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Run", "Command", "Started", "Status", "Error"]);
    for run in runs {
        let status = match run.status {
            RunStatus::Completed => run.status.as_str().green().to_string(),
            RunStatus::Failed | RunStatus::Interrupted => run.status.as_str().red().to_string(),
            RunStatus::Active | RunStatus::Cancelled => run.status.as_str().yellow().to_string(),
        };
        table.add_row(vec![
            run.run_id.clone(),
            run.command.clone(),
            format_timestamp(run.started_at_ms),
            status,
            run.error.clone().unwrap_or_default(),
        ]);
    }
    format!("{}", table)
}
