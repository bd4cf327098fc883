//! Terminal output for the scopestore CLI.

use anyhow::{Context, Result};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets::UTF8_FULL};
use console::{StyledObject, style};
use dialoguer::Confirm;
use serde::Serialize;
use std::fmt::Display;

/// How command results are rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Human,
    /// Machine readable, one JSON document per command
    Json,
}

impl OutputFormat {
    pub fn is_json(&self) -> bool {
        matches!(self, Self::Json)
    }
}

#[derive(Clone, Copy)]
enum Mark {
    Ok,
    Failed,
    Warn,
    Note,
}

impl Mark {
    fn symbol(self) -> StyledObject<&'static str> {
        match self {
            Mark::Ok => style("✓").green(),
            Mark::Failed => style("✗").red(),
            Mark::Warn => style("!").yellow(),
            Mark::Note => style("•").blue(),
        }
        .bold()
    }
}

fn line(mark: Mark, msg: impl Display) -> String {
    format!("{} {}", mark.symbol(), msg)
}

pub fn success(msg: impl Display) {
    println!("{}", line(Mark::Ok, msg));
}

/// Errors go to stderr so JSON output on stdout stays parseable
pub fn error(msg: impl Display) {
    eprintln!("{}", line(Mark::Failed, msg));
}

pub fn warning(msg: impl Display) {
    println!("{}", line(Mark::Warn, msg));
}

pub fn info(msg: impl Display) {
    println!("{}", line(Mark::Note, msg));
}

pub fn header(title: impl Display) {
    println!("\n{}", style(title).bold().underlined());
}

pub fn kv(key: impl Display, value: impl Display) {
    println!("  {}: {}", style(key).cyan(), value);
}

/// Ask a yes/no question, defaulting to no
pub fn confirm(question: impl Into<String>) -> Result<bool> {
    Confirm::new()
        .with_prompt(question)
        .default(false)
        .interact()
        .context("Failed to read the answer")
}

/// Render rows under a highlighted header
pub fn table<R>(headers: &[&str], rows: impl IntoIterator<Item = R>) -> Table
where
    R: IntoIterator<Item = String>,
{
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(headers.iter().map(|h| Cell::new(h).fg(Color::Cyan)));
    for row in rows {
        table.add_row(row.into_iter().map(Cell::new));
    }
    table
}

pub fn json<T: Serialize>(data: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(data)?);
    Ok(())
}

/// Shorten a JSON value to at most `max` characters
pub fn preview(value: &serde_json::Value, max: usize) -> String {
    let text = value.to_string();
    if text.chars().count() <= max {
        return text;
    }
    let mut cut: String = text.chars().take(max.saturating_sub(1)).collect();
    cut.push('…');
    cut
}
