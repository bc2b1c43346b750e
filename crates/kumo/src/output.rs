//! Output formatting: table, JSON, plain.
//!
//! Renders data in the format selected by `--output`. Table uses `tabled`,
//! structured formats use serde, plain emits one identifier per line.

use std::io::{self, IsTerminal, Write};

use owo_colors::OwoColorize;
use tabled::{Table, Tabled, settings::Style};

use kumo_core::{HoldState, Source};

use crate::cli::{ColorMode, OutputFormat};

// ── Color helpers ────────────────────────────────────────────────────

/// Determine whether color output should be enabled.
pub fn should_color(mode: ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none(),
    }
}

/// Short label for where a value came from, colored by hold state.
pub fn provenance(source: Source, hold: HoldState, color: bool) -> String {
    let label = match (source, hold) {
        (_, HoldState::OptimisticPending) => "pending",
        (_, HoldState::Confirmed) => "confirmed",
        (_, HoldState::Expired) => "unconfirmed",
        (_, HoldState::RolledBack) => "rolled back",
        (Source::Optimistic, HoldState::Idle) => "local",
        (Source::Remote, HoldState::Idle) => "",
    };
    if !color || label.is_empty() {
        return label.to_owned();
    }
    match hold {
        HoldState::OptimisticPending => label.yellow().to_string(),
        HoldState::Confirmed => label.green().to_string(),
        HoldState::Expired | HoldState::RolledBack => label.red().to_string(),
        HoldState::Idle => label.dimmed().to_string(),
    }
}

// ── Render dispatchers ───────────────────────────────────────────────

/// Render a list of serde-serializable + tabled items in the chosen format.
///
/// - `table`: uses the `Tabled` derive to build a pretty table
/// - `json` / `json-compact`: serializes the original data via serde
/// - `plain`: calls `id_fn` on each item to emit one identifier per line
pub fn render_list<T, R>(
    format: OutputFormat,
    data: &[T],
    to_row: impl Fn(&T) -> R,
    id_fn: impl Fn(&T) -> String,
) -> String
where
    T: serde::Serialize,
    R: Tabled,
{
    match format {
        OutputFormat::Table => {
            let rows: Vec<R> = data.iter().map(to_row).collect();
            render_table(&rows)
        }
        OutputFormat::Json => render_json(data, false),
        OutputFormat::JsonCompact => render_json(data, true),
        OutputFormat::Plain => data.iter().map(&id_fn).collect::<Vec<_>>().join("\n"),
    }
}

/// Render a single serde-serializable item in the chosen format.
///
/// Table rendering uses a custom `detail_fn` that returns a pre-formatted
/// string, since single-item detail views don't use `Tabled` derive.
pub fn render_single<T>(
    format: OutputFormat,
    data: &T,
    detail_fn: impl Fn(&T) -> String,
    id_fn: impl Fn(&T) -> String,
) -> String
where
    T: serde::Serialize,
{
    match format {
        OutputFormat::Table => detail_fn(data),
        OutputFormat::Json => render_json(data, false),
        OutputFormat::JsonCompact => render_json(data, true),
        OutputFormat::Plain => id_fn(data),
    }
}

/// Print the rendered output to stdout, respecting quiet mode.
pub fn print_output(output: &str, quiet: bool) {
    if quiet || output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}

// ── Format-specific renderers ────────────────────────────────────────

fn render_table<R: Tabled>(rows: &[R]) -> String {
    Table::new(rows).with(Style::rounded()).to_string()
}

/// Serialized JSON; serializing plain data structs cannot fail, an empty
/// string is returned if it somehow does.
pub(crate) fn render_json<T: serde::Serialize + ?Sized>(data: &T, compact: bool) -> String {
    let rendered = if compact {
        serde_json::to_string(data)
    } else {
        serde_json::to_string_pretty(data)
    };
    rendered.unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(serde::Serialize, Tabled)]
    struct Row {
        name: String,
        value: u32,
    }

    fn rows() -> Vec<Row> {
        vec![
            Row {
                name: "den".into(),
                value: 1,
            },
            Row {
                name: "loft".into(),
                value: 2,
            },
        ]
    }

    fn same(row: &Row) -> Row {
        Row {
            name: row.name.clone(),
            value: row.value,
        }
    }

    #[test]
    fn plain_lists_one_id_per_line() {
        let out = render_list(OutputFormat::Plain, &rows(), same, |r| r.name.clone());
        assert_eq!(out, "den\nloft");
    }

    #[test]
    fn compact_json_is_single_line() {
        let out = render_list(OutputFormat::JsonCompact, &rows(), same, |r| r.name.clone());
        assert_eq!(out, r#"[{"name":"den","value":1},{"name":"loft","value":2}]"#);
    }

    #[test]
    fn table_contains_headers() {
        let out = render_list(OutputFormat::Table, &rows(), same, |r| r.name.clone());
        assert!(out.contains("name"));
        assert!(out.contains("loft"));
    }

    #[test]
    fn provenance_labels_without_color() {
        assert_eq!(provenance(Source::Remote, HoldState::Idle, false), "");
        assert_eq!(
            provenance(Source::Optimistic, HoldState::OptimisticPending, false),
            "pending"
        );
        assert_eq!(provenance(Source::Remote, HoldState::RolledBack, false), "rolled back");
    }
}
