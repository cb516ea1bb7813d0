//! Tests for the standalone CLI binary.
//!
//! The whole binary runs against a private temp directory (exported as
//! `TMPDIR` to the CLI child processes as well) so a bridge started here
//! can never collide with one in the real temp directory.

#![cfg(unix)]

mod common;

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::{json, Value};

use common::{MockApi, ACTIVE_CONNECTION, LOCAL_USER_ID, LOCAL_USER_NAME};
use mumble_json_bridge::api::HostApi;
use mumble_json_bridge::bridge::{bridge_pipe_path, Bridge};
use mumble_json_bridge::pipe::NamedPipe;

fn cli_bin() -> &'static str {
    option_env!("CARGO_BIN_EXE_mumble-bridge-cli").expect("mumble-bridge-cli binary not built")
}

fn test_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

fn private_tmpdir() -> PathBuf {
    static DIR: OnceLock<PathBuf> = OnceLock::new();
    DIR.get_or_init(|| {
        let dir = std::env::temp_dir().join(format!("bridge_cli_test_{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("create private temp dir");
        std::env::set_var("TMPDIR", &dir);
        dir
    })
    .clone()
}

fn cli_command() -> Command {
    let mut command = Command::new(cli_bin());
    command.env("TMPDIR", private_tmpdir());
    command
}

fn combined_output(output: &Output) -> String {
    let mut combined = String::new();
    combined.push_str(&String::from_utf8_lossy(&output.stdout));
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    combined
}

fn wait_for_pipe(path: &std::path::Path) {
    let start = Instant::now();
    while !NamedPipe::exists(path) {
        assert!(
            start.elapsed() < Duration::from_secs(5),
            "pipe never appeared at {}",
            path.display()
        );
        thread::sleep(Duration::from_millis(5));
    }
}

/// A broker serving the mock API for the duration of one test.
struct CliBridge {
    bridge: Bridge,
    _guard: MutexGuard<'static, ()>,
}

impl CliBridge {
    fn start() -> Self {
        let guard = test_lock()
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        private_tmpdir();
        let _ = std::fs::remove_file(bridge_pipe_path());

        let mut bridge = Bridge::new(Arc::new(MockApi::new()) as Arc<dyn HostApi>);
        bridge.start();
        wait_for_pipe(&bridge_pipe_path());

        Self {
            bridge,
            _guard: guard,
        }
    }
}

impl Drop for CliBridge {
    fn drop(&mut self) {
        self.bridge.stop(true);
    }
}

#[test]
fn help_mentions_the_bridge() {
    let output = cli_command().arg("--help").output().expect("run --help");
    assert!(output.status.success());
    assert!(combined_output(&output).contains("Mumble JSON bridge"));
}

#[test]
fn invalid_json_fails_with_the_generic_exit_code() {
    let output = cli_command()
        .args(["--json", "{ this is not json"])
        .output()
        .expect("run with invalid JSON");
    assert_eq!(output.status.code(), Some(4));
    assert!(combined_output(&output).contains("[ERROR]"));
}

#[test]
fn unknown_message_type_fails_with_the_generic_exit_code() {
    let output = cli_command()
        .args(["--json", r#"{"message_type":"dance","message":{}}"#])
        .output()
        .expect("run with unknown message type");
    assert_eq!(output.status.code(), Some(4));
    assert!(combined_output(&output).contains("message_type"));
}

#[test]
fn api_call_without_a_bridge_times_out() {
    let _guard = test_lock()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    private_tmpdir();
    let _ = std::fs::remove_file(bridge_pipe_path());

    let envelope = json!({
        "message_type": "api_call",
        "message": {
            "function": "getLocalUserID",
            "parameter": {"connection": ACTIVE_CONNECTION},
        }
    });

    let start = Instant::now();
    let output = cli_command()
        .args(["--json", &envelope.to_string()])
        .args(["--write-timeout", "50", "--read-timeout", "200"])
        .output()
        .expect("run without a bridge");

    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("timed out"));
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[test]
fn api_call_end_to_end() {
    let _bridge = CliBridge::start();

    let envelope = json!({
        "message_type": "api_call",
        "message": {
            "function": "getLocalUserID",
            "parameter": {"connection": ACTIVE_CONNECTION},
        }
    });

    let output = cli_command()
        .args(["--json", &envelope.to_string()])
        .output()
        .expect("run api_call");
    assert_eq!(output.status.code(), Some(0), "{}", combined_output(&output));

    let reply: Value =
        serde_json::from_slice(&output.stdout).expect("stdout is the pretty-printed reply");
    assert_eq!(reply["response_type"], "api_call");
    assert_eq!(reply["response"]["function"], "getLocalUserID");
    assert_eq!(reply["response"]["status"], "executed");
    assert_eq!(reply["response"]["return_value"], LOCAL_USER_ID);
}

#[test]
fn the_envelope_can_come_from_stdin() {
    let _bridge = CliBridge::start();

    let envelope = json!({
        "message_type": "api_call",
        "message": {
            "function": "getUserName",
            "parameter": {"connection": ACTIVE_CONNECTION, "user_id": LOCAL_USER_ID},
        }
    });

    let mut child = cli_command()
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn CLI");
    child
        .stdin
        .take()
        .expect("stdin handle")
        .write_all(format!("{envelope}\n").as_bytes())
        .expect("write envelope");

    let output = child.wait_with_output().expect("wait for CLI");
    assert_eq!(output.status.code(), Some(0), "{}", combined_output(&output));

    let reply: Value = serde_json::from_slice(&output.stdout).expect("reply JSON");
    assert_eq!(reply["response"]["return_value"], LOCAL_USER_NAME);
}

#[test]
fn operation_end_to_end() {
    let _bridge = CliBridge::start();

    let envelope = json!({
        "message_type": "operation",
        "message": {
            "sequence": [
                {"function": "findUserByName",
                 "parameter": {"connection": ACTIVE_CONNECTION, "user_name": LOCAL_USER_NAME}},
                {"function": "getUserName",
                 "parameter": {"connection": ACTIVE_CONNECTION,
                               "user_id": "${results.0.response.return_value}"}},
            ]
        }
    });

    let output = cli_command()
        .args(["--json", &envelope.to_string()])
        .output()
        .expect("run operation");
    assert_eq!(output.status.code(), Some(0), "{}", combined_output(&output));

    let reply: Value = serde_json::from_slice(&output.stdout).expect("reply JSON");
    assert_eq!(reply["response_type"], "api_call");
    assert_eq!(reply["response"]["return_value"], LOCAL_USER_NAME);
}

#[test]
fn a_failing_operation_uses_its_own_exit_code() {
    let _bridge = CliBridge::start();

    let envelope = json!({
        "message_type": "operation",
        "message": {"sequence": []},
    });

    let output = cli_command()
        .args(["--json", &envelope.to_string()])
        .output()
        .expect("run empty operation");
    assert_eq!(output.status.code(), Some(3), "{}", combined_output(&output));
    assert!(combined_output(&output).contains("Operation failed"));
}
