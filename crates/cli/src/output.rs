// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::ValueEnum;
use serde::Serialize;

#[derive(Clone, Copy, Debug, Default, PartialEq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Format-branch helper for a single-record command (show/create/cancel):
/// prints pretty JSON in `Json` mode, calls `text_fn` otherwise.
pub fn format_or_json<T: Serialize>(
    format: OutputFormat,
    data: &T,
    text_fn: impl FnOnce(&T),
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(data)?),
        OutputFormat::Text => text_fn(data),
    }
    Ok(())
}

/// Render a list as a line-per-item table or as JSON.
pub fn handle_list<T: Serialize>(
    format: OutputFormat,
    items: &[T],
    empty_msg: &str,
    render_text: impl Fn(&T) -> String,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(items)?),
        OutputFormat::Text => {
            if items.is_empty() {
                println!("{empty_msg}");
            } else {
                for item in items {
                    println!("{}", render_text(item));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_list_prints_empty_message_in_text_mode() {
        let items: Vec<serde_json::Value> = vec![];
        handle_list(OutputFormat::Text, &items, "nothing here", |v| v.to_string()).unwrap();
    }

    #[test]
    fn format_or_json_serializes_in_json_mode() {
        let value = serde_json::json!({ "a": 1 });
        format_or_json(OutputFormat::Json, &value, |_| panic!("should not call text_fn")).unwrap();
    }
}
