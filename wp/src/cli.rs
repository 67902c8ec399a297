//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

/// Waypoint - travel planner over a supervised worker fleet
#[derive(Parser)]
#[command(
    name = "wp",
    about = "Travel planner that supervises its data workers",
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start every worker, wait for readiness and keep them running until Ctrl-C
    Up,

    /// Probe the configured workers without starting any
    Status {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Start the fleet, make one tool call and print the result
    Call {
        /// Worker name (e.g. flight-server)
        worker: String,

        /// Tool name (e.g. search_flights)
        tool: String,

        /// Tool parameters as a JSON object
        #[arg(short, long, default_value = "{}")]
        params: String,

        /// Override the call timeout in milliseconds
        #[arg(short, long)]
        timeout_ms: Option<u64>,
    },

    /// Plan a trip from a free-text request
    Plan {
        /// The travel request, e.g. "3 days in Tokyo from LAX in May"
        message: String,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("waypoint")
        .join("logs")
        .join("waypoint.log")
}

/// Generate the after_help text
pub fn generate_after_help() -> String {
    debug!("generate_after_help: called");
    format!("Logs are written to: {}\n", get_log_path().display())
}

/// Output format for status and plan commands
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => {
                debug!(%s, "OutputFormat::from_str: unknown format");
                Err(format!("Unknown format: {}. Use: text or json", s))
            }
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_up() {
        let cli = Cli::parse_from(["wp", "up"]);
        assert!(matches!(cli.command, Command::Up));
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_cli_parse_status_json() {
        let cli = Cli::parse_from(["wp", "status", "--format", "json"]);
        assert!(matches!(
            cli.command,
            Command::Status {
                format: OutputFormat::Json
            }
        ));
    }

    #[test]
    fn test_cli_parse_call() {
        let cli = Cli::parse_from([
            "wp",
            "call",
            "flight-server",
            "search_flights",
            "--params",
            r#"{"origin": "LAX"}"#,
            "--timeout-ms",
            "90000",
        ]);
        if let Command::Call {
            worker,
            tool,
            params,
            timeout_ms,
        } = cli.command
        {
            assert_eq!(worker, "flight-server");
            assert_eq!(tool, "search_flights");
            assert_eq!(params, r#"{"origin": "LAX"}"#);
            assert_eq!(timeout_ms, Some(90000));
        } else {
            panic!("Expected Call command");
        }
    }

    #[test]
    fn test_cli_parse_call_defaults() {
        let cli = Cli::parse_from(["wp", "call", "hotel-server", "search_hotels"]);
        if let Command::Call { params, timeout_ms, .. } = cli.command {
            assert_eq!(params, "{}");
            assert!(timeout_ms.is_none());
        } else {
            panic!("Expected Call command");
        }
    }

    #[test]
    fn test_cli_parse_plan_with_globals() {
        let cli = Cli::parse_from(["wp", "plan", "Tokyo in May", "-l", "debug", "-c", "/tmp/wp.yml"]);
        assert!(matches!(cli.command, Command::Plan { .. }));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/wp.yml")));
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("plain".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert!("table".parse::<OutputFormat>().is_err());
        assert_eq!(OutputFormat::Json.to_string(), "json");
    }
}
