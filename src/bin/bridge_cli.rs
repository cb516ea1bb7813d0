//! Command-line interface for the Mumble JSON bridge.
//!
//! Reads one envelope (inline via `--json` or from stdin), registers a
//! session with the running bridge, executes either a single api-call or a
//! scripted operation, and prints the final reply to stdout.

use std::io::Read;
use std::process::ExitCode;

use clap::Parser;
use serde_json::Value;

use mumble_json_bridge::client::{
    BridgeSession, DEFAULT_READ_TIMEOUT_MS, DEFAULT_WRITE_TIMEOUT_MS,
};
use mumble_json_bridge::messages::{require, FieldType};
use mumble_json_bridge::operation::run_operation;
use mumble_json_bridge::{init_logging, BridgeError};

#[derive(Debug, Parser)]
#[command(
    name = "mumble-bridge-cli",
    about = "Command-line interface for the Mumble JSON bridge",
    version
)]
struct CliConfig {
    /// JSON message to send to the bridge (read from stdin when omitted)
    #[arg(short = 'j', long = "json")]
    json: Option<String>,

    /// The timeout for read-operations (in ms)
    #[arg(short = 'r', long = "read-timeout", default_value_t = DEFAULT_READ_TIMEOUT_MS)]
    read_timeout: u32,

    /// The timeout for write-operations (in ms)
    #[arg(short = 'w', long = "write-timeout", default_value_t = DEFAULT_WRITE_TIMEOUT_MS)]
    write_timeout: u32,

    /// Enable debug file logging
    #[arg(long = "logs", env = "MUMBLE_BRIDGE_LOGS", default_value_t = false)]
    logs: bool,

    /// Allow message payloads into the debug log
    #[arg(
        long = "log-content",
        env = "MUMBLE_BRIDGE_LOG_CONTENT",
        default_value_t = false
    )]
    log_content: bool,
}

const EXIT_TIMEOUT: u8 = 2;
const EXIT_OPERATION_FAILED: u8 = 3;
const EXIT_FAILURE: u8 = 4;

fn main() -> ExitCode {
    let config = CliConfig::parse();
    init_logging(config.logs, config.log_content);

    match run(&config) {
        Ok(reply) => {
            let pretty =
                serde_json::to_string_pretty(&reply).unwrap_or_else(|_| reply.to_string());
            println!("{pretty}");
            ExitCode::SUCCESS
        }
        Err(BridgeError::Timeout) => {
            eprintln!("[ERROR]: The operation timed out (are you sure the JSON bridge is running?)");
            ExitCode::from(EXIT_TIMEOUT)
        }
        Err(BridgeError::Operation(reason)) => {
            eprintln!("[ERROR]: Operation failed: {reason}");
            ExitCode::from(EXIT_OPERATION_FAILED)
        }
        Err(err) => {
            eprintln!("[ERROR]: {err}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

fn read_envelope(config: &CliConfig) -> Result<Value, BridgeError> {
    let content = match &config.json {
        Some(inline) => inline.clone(),
        None => {
            let mut content = String::new();
            std::io::stdin()
                .read_to_string(&mut content)
                .map_err(|err| {
                    BridgeError::InvalidMessage(format!("Failed to read standard input: {err}"))
                })?;
            content
        }
    };

    serde_json::from_str(content.trim()).map_err(|err| {
        BridgeError::InvalidMessage(format!("The given message is not valid JSON: {err}"))
    })
}

fn run(config: &CliConfig) -> Result<Value, BridgeError> {
    let envelope = read_envelope(config)?;

    let kind = require(&envelope, "message_type", FieldType::String)?
        .as_str()
        .unwrap_or_default()
        .to_string();

    match kind.as_str() {
        "api_call" => {
            let session =
                BridgeSession::connect_with_timeouts(config.read_timeout, config.write_timeout)?;
            session.process(envelope)
        }
        "operation" => {
            let script = require(&envelope, "message", FieldType::Object)?.clone();
            let session =
                BridgeSession::connect_with_timeouts(config.read_timeout, config.write_timeout)?;
            run_operation(&script, |call| session.process(call))
        }
        other => Err(BridgeError::InvalidMessage(format!(
            "Unknown \"message_type\" option \"{other}\""
        ))),
    }
}
