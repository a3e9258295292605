//! Table rendering for branches and query results.

use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use serde_json::Value;

use branchlore_core::{Branch, QueryOutcome};

fn new_table() -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Text for one result cell. SQL `NULL` prints as `NULL`.
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn branch_table(branches: &[Branch]) -> Table {
    let mut table = new_table();
    table.set_header(vec!["Branch", "Revision", "Created"]);
    for b in branches {
        let name = if b.is_main {
            Cell::new(format!("{} (trunk)", b.name)).fg(Color::Cyan)
        } else {
            Cell::new(&b.name)
        };
        table.add_row(vec![
            name,
            Cell::new(b.short_revision()),
            Cell::new(b.created_at.format("%Y-%m-%d %H:%M:%S").to_string()),
        ]);
    }
    table
}

/// A result set as a table, or a one-line summary for a modification.
pub fn outcome(outcome: &QueryOutcome) -> String {
    match outcome {
        QueryOutcome::Rows {
            columns,
            rows,
            count,
        } => {
            let mut table = new_table();
            table.set_header(columns.clone());
            for row in rows {
                table.add_row(row.iter().map(cell_text).collect::<Vec<_>>());
            }
            let noun = if *count == 1 { "row" } else { "rows" };
            format!("{}\n({} {})", table, count, noun)
        }
        QueryOutcome::Modified {
            rows_affected,
            last_insert_id,
        } => format!(
            "{} row(s) affected, last insert id {}",
            rows_affected, last_insert_id
        ),
    }
}

/// Human-readable byte count.
pub fn size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
