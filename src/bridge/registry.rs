//! Registered-client records.

use std::path::{Path, PathBuf};

use crate::error::BridgeError;
use crate::messages::ClientId;
use crate::pipe::{NamedPipe, DEFAULT_WRITE_TIMEOUT_MS};

/// One registered client: its id, the reply pipe it listens on and the
/// secret it authenticates with. Immutable once inserted into the registry.
#[derive(Debug)]
pub(super) struct BridgeClient {
    id: ClientId,
    reply_path: PathBuf,
    secret: String,
}

impl BridgeClient {
    pub(super) fn new(id: ClientId, reply_path: PathBuf, secret: String) -> Self {
        Self {
            id,
            reply_path,
            secret,
        }
    }

    pub(super) fn id(&self) -> ClientId {
        self.id
    }

    pub(super) fn reply_path(&self) -> &Path {
        &self.reply_path
    }

    /// Plain byte equality. The trust boundary is the local machine, so no
    /// timing-attack hardening is attempted.
    pub(super) fn secret_matches(&self, candidate: &str) -> bool {
        self.secret == candidate
    }

    /// Write a reply to this client's pipe with the default write timeout.
    pub(super) fn send(&self, text: &str) -> Result<(), BridgeError> {
        NamedPipe::write_to(&self.reply_path, text, DEFAULT_WRITE_TIMEOUT_MS)
    }
}
