//! The in-host broker: one rendezvous pipe, one worker thread, one client
//! registry.
//!
//! Architecture:
//! - `start` spawns the worker thread; all mutable broker state (registry,
//!   id counter, broker secret) lives on that thread's stack, so it needs
//!   no locking
//! - the worker loops read → parse → dispatch and writes replies through
//!   the registry entries
//! - `stop` trips a shared cancel flag; the worker notices it at the next
//!   transport poll interval and tears its pipe down on the way out

mod registry;


use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use serde_json::Value;

use crate::api::HostApi;
use crate::dispatch;
use crate::error::BridgeError;
use crate::logging::{log_debug, log_debug_content};
use crate::messages::{
    parse_basic_format, require, ClientId, FieldType, MessageKind, Registration, Reply,
    INVALID_CLIENT_ID,
};
use crate::pipe::{CancelToken, NamedPipe, READ_NO_TIMEOUT};
use crate::secret::{generate_secret, SECRET_LEN};

use registry::BridgeClient;

/// Well-known path of the rendezvous pipe. If nothing exists at this path,
/// the bridge is not running.
pub fn bridge_pipe_path() -> PathBuf {
    #[cfg(unix)]
    {
        std::env::temp_dir().join(".mumble-json-bridge")
    }
    #[cfg(windows)]
    {
        PathBuf::from(r"\\.\pipe\.mumble-json-bridge")
    }
}

/// The broker. Owned by the host process; at most one per process, since
/// all instances would contend for the same well-known pipe.
pub struct Bridge {
    api: Arc<dyn HostApi>,
    cancel: CancelToken,
    worker: Option<thread::JoinHandle<()>>,
}

impl Bridge {
    pub fn new(api: Arc<dyn HostApi>) -> Self {
        Self {
            api,
            cancel: CancelToken::new(),
            worker: None,
        }
    }

    /// Start the broker. Returns immediately; everything else happens on
    /// the worker thread.
    pub fn start(&mut self) {
        assert!(self.worker.is_none(), "the bridge is already running");
        self.cancel = CancelToken::new();
        let api = Arc::clone(&self.api);
        let cancel = self.cancel.clone();
        self.worker = Some(thread::spawn(move || worker_run(api.as_ref(), &cancel)));
    }

    /// Stop the broker. With `join` the call blocks until the worker has
    /// torn down its pipe; otherwise the worker finishes in the background.
    pub fn stop(&mut self, join: bool) {
        self.cancel.cancel();
        if let Some(worker) = self.worker.take() {
            if join && worker.join().is_err() {
                eprintln!("mumble-json-bridge: bridge worker panicked");
            }
        }
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.stop(true);
    }
}

// ============================================================================
// Worker
// ============================================================================

fn worker_run(api: &dyn HostApi, cancel: &CancelToken) {
    let broker_secret = generate_secret(SECRET_LEN);

    let pipe = match NamedPipe::create(bridge_pipe_path()) {
        Ok(pipe) => pipe,
        Err(err) => {
            eprintln!("mumble-json-bridge: error creating rendezvous pipe: {err}");
            return;
        }
    };

    let mut registry: HashMap<ClientId, BridgeClient> = HashMap::new();
    let mut next_id: ClientId = 0;

    loop {
        let content = match pipe.read_blocking_cancellable(READ_NO_TIMEOUT, cancel) {
            Ok(content) => content,
            Err(BridgeError::Interrupted) => break,
            Err(BridgeError::Timeout) => {
                log_debug("rendezvous pipe read timed out");
                continue;
            }
            Err(err) => {
                eprintln!("mumble-json-bridge: bridge worker failed: {err}");
                break;
            }
        };
        log_debug_content(&format!("read from rendezvous pipe: {content}"));

        // A parse failure is the sender's problem, never the worker's.
        let msg: Value = match serde_json::from_str(&content) {
            Ok(msg) => msg,
            Err(err) => {
                eprintln!("mumble-json-bridge: can't parse message: {err}");
                continue;
            }
        };

        process_message(api, &broker_secret, &mut registry, &mut next_id, &msg);
    }
    // `pipe` goes out of scope here and removes the endpoint, on every exit
    // path including panics further up the loop.
}

/// Run one envelope through parse → authorize → handler, routing any
/// invalid-message failure back to the offending client where possible.
fn process_message(
    api: &dyn HostApi,
    broker_secret: &str,
    registry: &mut HashMap<ClientId, BridgeClient>,
    next_id: &mut ClientId,
    msg: &Value,
) {
    let mut id = INVALID_CLIENT_ID;

    let result = handle_message(api, broker_secret, registry, next_id, msg, &mut id);

    if let Err(err) = result {
        let reason = err.to_string();
        if id != INVALID_CLIENT_ID && registry.contains_key(&id) {
            let reply = Reply::error(broker_secret, reason).to_wire();
            send_or_evict(registry, id, &reply);
        } else {
            eprintln!("mumble-json-bridge: got error for unknown client: {reason}");
        }
    }
}

fn handle_message(
    api: &dyn HostApi,
    broker_secret: &str,
    registry: &mut HashMap<ClientId, BridgeClient>,
    next_id: &mut ClientId,
    msg: &Value,
    id: &mut ClientId,
) -> Result<(), BridgeError> {
    let kind = match parse_basic_format(msg) {
        Ok(kind) => kind,
        Err(err) => {
            // If the broken envelope still names a client we can route the
            // error back instead of only writing it to stderr, which the
            // client never sees.
            if let Some(found) = msg.get("client_id").and_then(Value::as_u64) {
                *id = found;
            }
            return Err(err);
        }
    };

    if kind != MessageKind::Registration {
        require(msg, "client_id", FieldType::Integer)?;
        *id = msg["client_id"].as_u64().unwrap_or(INVALID_CLIENT_ID);
        require(msg, "secret", FieldType::String)?;

        let client = registry
            .get(id)
            .ok_or_else(|| BridgeError::invalid("Invalid client ID"))?;
        if !client.secret_matches(msg["secret"].as_str().unwrap_or_default()) {
            return Err(BridgeError::invalid("Permission denied (invalid secret)"));
        }
    }

    match kind {
        MessageKind::Registration => {
            handle_registration(broker_secret, registry, next_id, &msg["message"])
        }
        MessageKind::ApiCall => handle_api_call(api, broker_secret, registry, *id, &msg["message"]),
        MessageKind::Disconnect => {
            handle_disconnect(broker_secret, registry, *id);
            Ok(())
        }
        MessageKind::Operation => Err(BridgeError::invalid(
            "\"operation\" messages are executed client-side and cannot be sent to the bridge",
        )),
    }
}

// ============================================================================
// Handlers
// ============================================================================

fn handle_registration(
    broker_secret: &str,
    registry: &mut HashMap<ClientId, BridgeClient>,
    next_id: &mut ClientId,
    body: &Value,
) -> Result<(), BridgeError> {
    let registration = Registration::parse(body)?;

    let reply_path = PathBuf::from(&registration.pipe_path);
    if !NamedPipe::exists(&reply_path) {
        // Without a reply pipe there is no channel to report the problem
        // over; drop the request but leave a trace for the operator.
        eprintln!(
            "mumble-json-bridge: ignoring registration for non-existent pipe {}",
            reply_path.display()
        );
        return Ok(());
    }

    let id = *next_id;
    *next_id += 1;
    registry.insert(id, BridgeClient::new(id, reply_path, registration.secret));
    log_debug(&format!("registered client {id}"));

    let reply = Reply::registration(broker_secret, id).to_wire();
    send_or_evict(registry, id, &reply);
    Ok(())
}

fn handle_api_call(
    api: &dyn HostApi,
    broker_secret: &str,
    registry: &mut HashMap<ClientId, BridgeClient>,
    id: ClientId,
    body: &Value,
) -> Result<(), BridgeError> {
    let reply = dispatch::dispatch(api, broker_secret, body)?;
    send_or_evict(registry, id, &reply.to_wire());
    Ok(())
}

fn handle_disconnect(
    broker_secret: &str,
    registry: &mut HashMap<ClientId, BridgeClient>,
    id: ClientId,
) {
    // Remove the record first; a repeated disconnect for the same id must
    // time out on the client side instead of reaching a stale entry.
    let Some(client) = registry.remove(&id) else {
        return;
    };
    log_debug(&format!("client {} disconnected", client.id()));

    // The client is already going away; a failed farewell is not actionable.
    let _ = client.send(&Reply::disconnect(broker_secret).to_wire());
}

/// Write a reply to a registered client, evicting the record if its pipe
/// can no longer be reached.
fn send_or_evict(registry: &mut HashMap<ClientId, BridgeClient>, id: ClientId, reply: &str) {
    let Some(client) = registry.get(&id) else {
        return;
    };
    if let Err(err) = client.send(reply) {
        eprintln!(
            "mumble-json-bridge: dropping client {id} ({}): reply write failed: {err}",
            client.reply_path().display()
        );
        registry.remove(&id);
    }
}
