//! Console tables for run results.

use std::path::{Path, PathBuf};

use comfy_table::modifiers::{UTF8_ROUND_CORNERS, UTF8_SOLID_INNER_BORDERS};
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, CellAlignment, ContentArrangement, Table};

use stanza_core::{RepStatus, RunSummary};
use stanza_model::{OutdatednessReason, RepId};

pub fn print_run_summary(summary: &RunSummary) {
    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Rep"),
        header_cell("Status"),
        header_cell("Reason"),
        header_cell("Outputs"),
    ]);
    apply_table_style(&mut table);
    align_column(&mut table, 1, CellAlignment::Center);

    for report in &summary.reports {
        table.add_row(vec![
            Cell::new(report.rep.to_string()),
            status_cell(report.status),
            match &report.reason {
                Some(reason) => Cell::new(reason.to_string()),
                None => dim_cell("-"),
            },
            outputs_cell(&report.outputs),
        ]);
    }
    println!("{table}");
    println!(
        "{} compiled, {} fresh, {} failed, {} pruned",
        summary.compiled(),
        summary.skipped(),
        summary.failed(),
        summary.pruned.len()
    );

    let failures: Vec<_> = summary
        .reports
        .iter()
        .filter_map(|r| r.error.as_ref().map(|e| (&r.rep, e)))
        .collect();
    if !failures.is_empty() {
        eprintln!("Errors:");
        for (rep, error) in failures {
            eprintln!("- {rep}: {error}");
        }
    }
}

pub fn print_status(report: &[(RepId, Option<OutdatednessReason>)]) {
    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Rep"),
        header_cell("State"),
        header_cell("Reason"),
    ]);
    apply_table_style(&mut table);
    align_column(&mut table, 1, CellAlignment::Center);

    for (rep, reason) in report {
        let (state, reason_cell) = match reason {
            Some(reason) => (
                Cell::new("outdated")
                    .fg(comfy_table::Color::Yellow)
                    .add_attribute(Attribute::Bold),
                Cell::new(reason.to_string()),
            ),
            None => (
                Cell::new("fresh").fg(comfy_table::Color::Green),
                dim_cell("-"),
            ),
        };
        table.add_row(vec![Cell::new(rep.to_string()), state, reason_cell]);
    }
    println!("{table}");
    let outdated = report.iter().filter(|(_, r)| r.is_some()).count();
    println!("{outdated} of {} reps outdated", report.len());
}

pub fn print_pruned(pruned: &[PathBuf], dry_run: bool) {
    if pruned.is_empty() {
        println!("nothing to prune");
        return;
    }
    for path in pruned {
        if dry_run {
            println!("would prune {}", path.display());
        } else {
            println!("pruned {}", path.display());
        }
    }
    println!("{} file(s)", pruned.len());
}

fn status_cell(status: RepStatus) -> Cell {
    match status {
        RepStatus::Done => Cell::new("compiled")
            .fg(comfy_table::Color::Green)
            .add_attribute(Attribute::Bold),
        RepStatus::Skipped => Cell::new("fresh").fg(comfy_table::Color::DarkGrey),
        RepStatus::Failed => Cell::new("failed")
            .fg(comfy_table::Color::Red)
            .add_attribute(Attribute::Bold),
        // Terminal states only reach the summary; anything else means a
        // scheduler bug, surface it verbatim.
        other => Cell::new(format!("{other:?}")),
    }
}

fn outputs_cell(outputs: &[PathBuf]) -> Cell {
    if outputs.is_empty() {
        return dim_cell("-");
    }
    let joined = outputs
        .iter()
        .map(|p| display_name(p))
        .collect::<Vec<_>>()
        .join(", ");
    Cell::new(joined)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn apply_table_style(table: &mut Table) {
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .apply_modifier(UTF8_SOLID_INNER_BORDERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_width(120);
}

fn align_column(table: &mut Table, index: usize, alignment: CellAlignment) {
    if let Some(column) = table.column_mut(index) {
        column.set_cell_alignment(alignment);
    }
}

fn header_cell(label: &str) -> Cell {
    Cell::new(label)
        .fg(comfy_table::Color::Cyan)
        .add_attribute(Attribute::Bold)
}

fn dim_cell<T: ToString>(value: T) -> Cell {
    Cell::new(value).fg(comfy_table::Color::DarkGrey)
}
