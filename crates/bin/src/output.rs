//! Output formatting helpers for human-readable and JSON output.

use gitstore::Status;
use serde::Serialize;

/// Output format selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Human,
    Json,
}

/// Print any serializable value as one line of JSON.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

/// Print a status snapshot.
pub fn print_status(status: &Status, format: OutputFormat) -> Result<(), serde_json::Error> {
    match format {
        OutputFormat::Human => {
            print_table(&["FIELD", "VALUE"], &status_rows(status));
            Ok(())
        }
        OutputFormat::Json => print_json(status),
    }
}

/// Remote position as serialized, e.g. `updated` or `diverged`.
pub fn relative_label(status: &Status) -> String {
    serde_json::to_value(status.status_relative_to_local)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

fn status_rows(status: &Status) -> Vec<Vec<String>> {
    let last = status
        .last_synchronized
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "never".to_string());

    [
        ("online", status.is_online.to_string()),
        ("remote", relative_label(status)),
        ("local changes", status.has_local_changes.to_string()),
        ("needs password", status.needs_password.to_string()),
        ("misconfigured", status.is_misconfigured.to_string()),
        ("pulling", status.is_pulling.to_string()),
        ("pushing", status.is_pushing.to_string()),
        ("last synchronized", last),
    ]
    .into_iter()
    .map(|(field, value)| vec![field.to_string(), value])
    .collect()
}

/// Print strings one per line, or as a JSON array.
pub fn print_list(items: &[String], format: OutputFormat) -> Result<(), serde_json::Error> {
    match format {
        OutputFormat::Human => {
            for item in items {
                println!("{item}");
            }
            Ok(())
        }
        OutputFormat::Json => print_json(items),
    }
}

/// Print a table with aligned columns in human-readable format.
///
/// `headers` and each row in `rows` must have the same length.
pub fn print_table(headers: &[&str], rows: &[Vec<String>]) {
    if rows.is_empty() {
        return;
    }

    let col_count = headers.len();
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate().take(col_count) {
            widths[i] = widths[i].max(cell.len());
        }
    }

    let header_line: Vec<String> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| format!("{:<width$}", h, width = widths[i]))
        .collect();
    println!("{}", header_line.join("  "));

    for row in rows {
        let line: Vec<String> = row
            .iter()
            .enumerate()
            .take(col_count)
            .map(|(i, cell)| format!("{:<width$}", cell, width = widths[i]))
            .collect();
        println!("{}", line.join("  "));
    }
}
