use std::fmt;

use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::{format::Writer, FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

/// ANSI color codes for console output
const COLOR_RESET: &str = "\x1b[0m";
const COLOR_CYAN: &str = "\x1b[36m";
const COLOR_GREEN: &str = "\x1b[32m";
const COLOR_BRIGHT_YELLOW: &str = "\x1b[93m";
const COLOR_BRIGHT_RED: &str = "\x1b[91m";
const COLOR_BRIGHT_GRAY: &str = "\x1b[90m";

/// Column widths for aligned output
const NODE_NAME_WIDTH: usize = 16;
const LOG_LEVEL_WIDTH: usize = 7;

/// Install the global subscriber with the hub's line format.
///
/// `RUST_LOG` wins over the configured default level.
pub fn init(node_name: &str, default_level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))?;
    tracing_subscriber::fmt()
        .event_format(WeftLogFormatter::new(node_name.to_string()))
        .with_env_filter(filter)
        .init();
    Ok(())
}

/// Formatter producing `[timestamp] [node] [level] message` lines.
pub struct WeftLogFormatter {
    node_name: String,
    color_enabled: bool,
}

impl WeftLogFormatter {
    pub fn new(node_name: String) -> Self {
        let color_enabled = is_terminal();
        Self {
            node_name,
            color_enabled,
        }
    }

    fn format_node_name(&self) -> String {
        // Counted in chars, not bytes, so a multi-byte name never gets
        // sliced mid-character.
        if self.node_name.chars().count() > NODE_NAME_WIDTH {
            let head: String = self.node_name.chars().take(NODE_NAME_WIDTH - 1).collect();
            format!("{head}…")
        } else {
            format!("{:<width$}", self.node_name, width = NODE_NAME_WIDTH)
        }
    }

    fn format_log_level(&self, level: &tracing::Level) -> String {
        let level_str = match *level {
            tracing::Level::ERROR => "✗ ERROR",
            tracing::Level::WARN => "⚠ WARN",
            tracing::Level::INFO => "ℹ INFO",
            tracing::Level::DEBUG => "◦ DEBUG",
            tracing::Level::TRACE => "◦ TRACE",
        };
        format!("{:<width$}", level_str, width = LOG_LEVEL_WIDTH + 2)
    }

    fn get_color_for_level(&self, level: &tracing::Level) -> &'static str {
        if !self.color_enabled {
            return "";
        }
        match *level {
            tracing::Level::ERROR => COLOR_BRIGHT_RED,
            tracing::Level::WARN => COLOR_BRIGHT_YELLOW,
            tracing::Level::INFO => COLOR_GREEN,
            tracing::Level::DEBUG => COLOR_BRIGHT_GRAY,
            tracing::Level::TRACE => COLOR_BRIGHT_GRAY,
        }
    }
}

impl<S, N> FormatEvent<S, N> for WeftLogFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let now = chrono::Local::now();
        let timestamp = now.format("%Y-%m-%d %H:%M:%S%.3f").to_string();
        let level = event.metadata().level();

        let color = self.get_color_for_level(level);
        let reset_color = if self.color_enabled { COLOR_RESET } else { "" };
        let cyan_color = if self.color_enabled { COLOR_CYAN } else { "" };

        write!(
            writer,
            "{}[{}] [{}] [{}{}{}] ",
            cyan_color,
            timestamp,
            self.format_node_name(),
            color,
            self.format_log_level(level),
            reset_color
        )?;

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer, "{reset_color}")
    }
}

/// Check whether output goes to a terminal, for color support.
fn is_terminal() -> bool {
    if std::env::var("TERM").unwrap_or_default() == "dumb" {
        return false;
    }
    std::env::var("TERM").is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_multibyte_name_truncates_cleanly() {
        // Byte 15 falls inside the two-byte "é", which a byte slice
        // would panic on.
        let formatter = WeftLogFormatter::new("abcdefghijklmnéops".to_string());
        let name = formatter.format_node_name();
        assert_eq!(name.chars().count(), NODE_NAME_WIDTH);
        assert!(name.ends_with('…'));
    }

    #[test]
    fn test_short_name_pads_to_width() {
        let formatter = WeftLogFormatter::new("hub".to_string());
        assert_eq!(formatter.format_node_name().len(), NODE_NAME_WIDTH);
    }
}
