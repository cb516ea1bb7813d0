//! Process-side session for talking to the bridge.
//!
//! A session owns one private reply pipe. Construction registers with the
//! broker and stores both parties' secrets; `process` round-trips a single
//! request; dropping the session disconnects. Calls must be serialized by
//! the owner; there is no in-session queuing.

use std::path::PathBuf;

use serde_json::Value;

use crate::bridge::bridge_pipe_path;
use crate::error::BridgeError;
use crate::logging::log_debug;
use crate::messages::{require, ClientId, FieldType};
use crate::pipe::NamedPipe;
use crate::secret::{generate_secret, SECRET_LEN};

/// Default timeout for reads from the reply pipe, in milliseconds.
pub const DEFAULT_READ_TIMEOUT_MS: u32 = 1_000;

/// Default timeout for writes to the rendezvous pipe, in milliseconds.
pub const DEFAULT_WRITE_TIMEOUT_MS: u32 = 100;

fn reply_pipe_path() -> PathBuf {
    let name = format!(".mumble-json-bridge-client-{}", std::process::id());
    #[cfg(unix)]
    {
        std::env::temp_dir().join(name)
    }
    #[cfg(windows)]
    {
        PathBuf::from(r"\\.\pipe\").join(name)
    }
}

/// A registered connection to the bridge.
pub struct BridgeSession {
    reply_pipe: NamedPipe,
    client_id: ClientId,
    secret: String,
    broker_secret: String,
    read_timeout_ms: u32,
    write_timeout_ms: u32,
}

impl BridgeSession {
    /// Register with the broker using the default timeouts.
    pub fn connect() -> Result<Self, BridgeError> {
        Self::connect_with_timeouts(DEFAULT_READ_TIMEOUT_MS, DEFAULT_WRITE_TIMEOUT_MS)
    }

    /// Register with the broker: create the reply pipe, send a registration
    /// envelope and wait for the assigned client id.
    pub fn connect_with_timeouts(
        read_timeout_ms: u32,
        write_timeout_ms: u32,
    ) -> Result<Self, BridgeError> {
        let path = reply_pipe_path();
        let reply_pipe = NamedPipe::create(&path)?;
        let secret = generate_secret(SECRET_LEN);

        let registration = serde_json::json!({
            "message_type": "registration",
            "message": {
                "pipe_path": path.to_string_lossy(),
                "secret": secret,
            }
        });
        NamedPipe::write_to(
            &bridge_pipe_path(),
            &registration.to_string(),
            write_timeout_ms,
        )?;

        let reply: Value = parse_reply(&reply_pipe.read_blocking(read_timeout_ms)?)?;
        let broker_secret = require(&reply, "secret", FieldType::String)?
            .as_str()
            .unwrap_or_default()
            .to_string();
        let response = require(&reply, "response", FieldType::Object)?;
        let client_id = require(response, "client_id", FieldType::Unsigned)?
            .as_u64()
            .unwrap_or_default();

        Ok(Self {
            reply_pipe,
            client_id,
            secret,
            broker_secret,
            read_timeout_ms,
            write_timeout_ms,
        })
    }

    /// The id the broker assigned to this session.
    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// Send one envelope to the bridge and return its reply.
    ///
    /// The session's credentials are injected into the envelope, so callers
    /// only provide `message_type` and the message body. A reply carrying
    /// the wrong broker secret is discarded and `Value::Null` returned.
    pub fn process(&self, mut msg: Value) -> Result<Value, BridgeError> {
        if let Some(envelope) = msg.as_object_mut() {
            envelope.insert("client_id".to_string(), self.client_id.into());
            envelope.insert("secret".to_string(), self.secret.clone().into());
        }

        NamedPipe::write_to(&bridge_pipe_path(), &msg.to_string(), self.write_timeout_ms)?;

        let mut reply: Value = parse_reply(&self.reply_pipe.read_blocking(self.read_timeout_ms)?)?;

        if reply.get("secret").and_then(Value::as_str) != Some(self.broker_secret.as_str()) {
            eprintln!("mumble-json-bridge: bridge secret doesn't match, discarding reply");
            return Ok(Value::Null);
        }

        // The secret has served its purpose once it is validated here.
        if let Some(envelope) = reply.as_object_mut() {
            envelope.remove("secret");
        }
        Ok(reply)
    }
}

impl Drop for BridgeSession {
    fn drop(&mut self) {
        let disconnect = serde_json::json!({
            "message_type": "disconnect",
            "client_id": self.client_id,
            "secret": self.secret,
        });

        // Best effort only. We do wait for the broker's farewell though, so
        // its reply write doesn't run into a timeout against a pipe we are
        // about to delete.
        if NamedPipe::write_to(
            &bridge_pipe_path(),
            &disconnect.to_string(),
            self.write_timeout_ms,
        )
        .is_ok()
        {
            let _ = self.reply_pipe.read_blocking(self.read_timeout_ms);
        } else {
            log_debug("disconnect write failed; leaving the registration behind");
        }
    }
}

fn parse_reply(content: &str) -> Result<Value, BridgeError> {
    serde_json::from_str(content)
        .map_err(|err| BridgeError::invalid(format!("The bridge's reply is not valid JSON: {err}")))
}
