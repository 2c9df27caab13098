//! Config show subcommand
//!
//! Displays current configuration in table or JSON format.

use anyhow::Result;
use comfy_table::{Cell, Color, Table};
use hostkeep_core::{Config, config};
use serde_json::Value;

/// Copy of the config that is safe to print
fn masked(config: &Config) -> Config {
    let mut shown = config.clone();
    shown.host_password = format_password(&config.host_password);
    shown
}

/// Format a password for display (masked)
fn format_password(value: &Option<String>) -> Option<String> {
    match value {
        Some(s) if !s.is_empty() => Some("********".to_string()),
        _ => None,
    }
}

/// Render one value for a table cell
fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "(not set)".to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) if items.is_empty() => "(none)".to_string(),
        Value::Array(items) => items.iter().map(format_value).collect::<Vec<_>>().join(", "),
        Value::Object(map) if map.is_empty() => "(none)".to_string(),
        other => other.to_string(),
    }
}

/// Show current configuration
///
/// Displays all configuration values in a formatted table.
/// The host password is masked.
pub fn cmd_config_show(config: &Config, json: bool, _quiet: bool) -> Result<()> {
    let shown = serde_json::to_value(masked(config))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&shown)?);
        return Ok(());
    }

    let defaults = serde_json::to_value(Config::default())?;
    let mut table = Table::new();
    table.set_header(vec!["Key", "Value"]);
    if let Value::Object(fields) = &shown {
        for (key, value) in fields {
            let cell = Cell::new(format_value(value));
            // highlight what the operator changed
            let cell = if defaults.get(key) == Some(value) {
                cell
            } else {
                cell.fg(Color::Cyan)
            };
            table.add_row(vec![Cell::new(key), cell]);
        }
    }
    println!("{table}");

    if let Some(path) = config::paths::get_config_path() {
        println!();
        println!("Config file: {}", path.display());
    }
    Ok(())
}
