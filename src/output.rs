//! Terminal and JSON rendering helpers shared by the commands

use std::io::Write;

use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use serde::Serialize;

use crate::error::Result;
use crate::supervisor::ProcessStatus;

/// Bordered table that wraps to the terminal width
pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn header_cell(text: &str) -> Cell {
    Cell::new(text).fg(Color::Cyan).add_attribute(Attribute::Bold)
}

pub fn status_cell(status: ProcessStatus) -> Cell {
    let color = match status {
        ProcessStatus::Running => Color::Green,
        ProcessStatus::Stale => Color::Yellow,
        ProcessStatus::Exited => Color::DarkGrey,
        ProcessStatus::Unknown => Color::Red,
    };
    Cell::new(status.to_string()).fg(color)
}

/// Single-line terminal value: trimmed, CR/LF stripped, `n/a` when empty
pub fn terminal_value(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| *c != '\r' && *c != '\n')
        .collect();
    if cleaned.is_empty() {
        "n/a".to_string()
    } else {
        cleaned
    }
}

/// Indented JSON followed by a newline
pub fn print_json<T: Serialize + ?Sized>(out: &mut dyn Write, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}
