use anyhow::Result;
use colored::Colorize;
use comfy_table::{Attribute, Cell, Color, Table};
use serde_json::Value;

pub enum OutputFormat {
    Json,
    Pretty,
    Table,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            "pretty" => OutputFormat::Pretty,
            _ => OutputFormat::Table,
        }
    }
}

pub fn format_json(value: &Value, format: &OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string(value)?),
        OutputFormat::Pretty => Ok(serde_json::to_string_pretty(value)?),
        OutputFormat::Table => match value {
            Value::Array(rows) => format_table(rows),
            Value::Object(map) if map.values().any(Value::is_object) => format_sections(value),
            Value::Object(_) => format_table(std::slice::from_ref(value)),
            _ => Ok(serde_json::to_string_pretty(value)?),
        },
    }
}

pub fn format_table(rows: &[Value]) -> Result<String> {
    if rows.is_empty() {
        return Ok("No entries".to_string());
    }

    let mut table = new_table();

    // columns in first-seen order
    let mut keys: Vec<String> = Vec::new();
    for row in rows {
        if let Value::Object(map) = row {
            for key in map.keys() {
                if !keys.contains(key) {
                    keys.push(key.clone());
                }
            }
        }
    }

    let header: Vec<Cell> = keys
        .iter()
        .map(|k| Cell::new(k).fg(Color::Cyan).add_attribute(Attribute::Bold))
        .collect();
    table.set_header(header);

    for row in rows {
        if let Value::Object(map) = row {
            let cells: Vec<Cell> = keys
                .iter()
                .map(|key| Cell::new(format_value_compact(map.get(key).unwrap_or(&Value::Null))))
                .collect();
            table.add_row(cells);
        }
    }

    Ok(table.to_string())
}

// One two-column table per nested section.
fn format_sections(value: &Value) -> Result<String> {
    let mut table = new_table();
    table.set_header(vec![
        Cell::new("metric").fg(Color::Cyan).add_attribute(Attribute::Bold),
        Cell::new("value").fg(Color::Cyan).add_attribute(Attribute::Bold),
    ]);

    if let Value::Object(sections) = value {
        for (section, fields) in sections {
            match fields {
                Value::Object(fields) => {
                    for (name, field) in fields {
                        table.add_row(vec![
                            Cell::new(format!("{}.{}", section, name)),
                            Cell::new(format_value_compact(field)),
                        ]);
                    }
                }
                other => {
                    table.add_row(vec![Cell::new(section), Cell::new(format_value_compact(other))]);
                }
            }
        }
    }

    Ok(table.to_string())
}

fn new_table() -> Table {
    let mut table = Table::new();
    table.load_preset(comfy_table::presets::UTF8_FULL);
    table.apply_modifier(comfy_table::modifiers::UTF8_ROUND_CORNERS);
    table
}

fn format_value_compact(val: &Value) -> String {
    match val {
        Value::Null => "null".dimmed().to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(arr) => format!("[{} items]", arr.len()),
        Value::Object(obj) => format!("{{{} fields}}", obj.len()),
    }
}

/// Printable start of a value: text as-is, anything else as hex.
pub fn preview(bytes: &[u8]) -> String {
    let text = match std::str::from_utf8(bytes) {
        Ok(text) => text,
        // a character cut off at the end of the preview
        Err(e) if e.error_len().is_none() => std::str::from_utf8(&bytes[..e.valid_up_to()]).unwrap_or_default(),
        Err(_) => return bytes.iter().map(|b| format!("{:02x}", b)).collect(),
    };
    text.chars().map(|c| if c.is_control() { '.' } else { c }).collect()
}

pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green().bold(), msg);
}

pub fn print_info(msg: &str) {
    println!("{} {}", "ℹ".blue().bold(), msg);
}

pub fn print_warning(msg: &str) {
    println!("{} {}", "⚠".yellow().bold(), msg);
}
