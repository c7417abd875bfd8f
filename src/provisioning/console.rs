//! Line-oriented provisioning console.
//!
//! The host binary reads stdin lines and hands them to [`handle_line`]; the
//! same [`Provisioning::on_write`] path as the BLE service stores the value.
//!
//! # Commands
//!
//! - `set <field> <value>` - Store a credential (`wifi.ssid`, `cellular.apn`, ...)
//! - `status` - Show the active transport and signal levels
//! - `fields` - List credential fields
//! - `help` - Show available commands

use super::Provisioning;
use crate::config::CredentialField;
use crate::state::{
    ConnectivityState, StateHandle, CELLULAR_SIGNAL_UNKNOWN, WIFI_SIGNAL_UNKNOWN,
};

/// Parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Store one credential field.
    Set {
        field: CredentialField,
        value: String,
    },
    Status,
    Fields,
    Help,
    /// Unknown or invalid command, with a message for the user.
    Unknown(String),
}

impl ConsoleCommand {
    /// Parse a command from an input line.
    pub fn parse(input: &str) -> Self {
        let input = input.trim();
        if input.is_empty() {
            return ConsoleCommand::Unknown(String::new());
        }

        let mut parts = input.splitn(2, ' ');
        let cmd = parts.next().unwrap_or("");
        let args = parts.next().unwrap_or("").trim();

        match cmd.to_lowercase().as_str() {
            "set" => {
                let mut set_parts = args.splitn(2, ' ');
                let field = set_parts.next().unwrap_or("");
                // values may contain spaces; keep everything after the field
                let value = set_parts.next().unwrap_or("").trim_start();
                if field.is_empty() || value.is_empty() {
                    return ConsoleCommand::Unknown("Usage: set <field> <value>".to_string());
                }
                match field.parse::<CredentialField>() {
                    Ok(field) => ConsoleCommand::Set {
                        field,
                        value: value.to_string(),
                    },
                    Err(_) => ConsoleCommand::Unknown(format!(
                        "Unknown field: {}. Type 'fields' to list them.",
                        field
                    )),
                }
            }
            "status" | "stat" | "s" => ConsoleCommand::Status,
            "fields" | "f" => ConsoleCommand::Fields,
            "help" | "h" | "?" => ConsoleCommand::Help,
            _ => ConsoleCommand::Unknown(format!(
                "Unknown command: {}. Type 'help' for commands.",
                cmd
            )),
        }
    }
}

/// Help text for available commands.
pub const HELP_TEXT: &str = r#"
Available commands:
  set <field> <value>  Store a credential (takes effect next cycle)
  status               Show connectivity status
  fields               List credential fields
  help                 Show this help

Shortcuts: s=status, f=fields, h=help

Examples:
  set wifi.ssid FieldNet
  set cellular.apn internet.example
"#;

/// One line per signal, plus the session state.
pub fn format_status(state: &ConnectivityState) -> String {
    let wifi = if state.wifi_signal != WIFI_SIGNAL_UNKNOWN {
        format!("{} dBm", state.wifi_signal)
    } else {
        "unknown".to_string()
    };
    let cellular = if state.cellular_signal != CELLULAR_SIGNAL_UNKNOWN {
        format!("CSQ {}", state.cellular_signal)
    } else {
        "unknown".to_string()
    };
    format!(
        "Transport: {} ({} bars)\nWiFi:      {}\nCellular:  {}\nSession:   {}\nSwitches:  {}",
        state.active_transport,
        state.signal_bars(),
        wifi,
        cellular,
        if state.session_connected { "up" } else { "down" },
        state.transport_switches
    )
}

/// Execute one console line and return the reply to print.
pub fn handle_line(line: &str, provisioning: &dyn Provisioning, state: &StateHandle) -> String {
    match ConsoleCommand::parse(line) {
        ConsoleCommand::Set { field, value } => {
            match provisioning.on_write(field, value.as_bytes()) {
                Ok(()) => format!("Stored {}", field),
                Err(e) => format!("Rejected {}: {}", field, e),
            }
        }
        ConsoleCommand::Status => format_status(&state.snapshot()),
        ConsoleCommand::Fields => CredentialField::all()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join("\n"),
        ConsoleCommand::Help => HELP_TEXT.trim().to_string(),
        ConsoleCommand::Unknown(msg) => msg,
    }
}
