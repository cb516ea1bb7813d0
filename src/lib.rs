//! JSON bridge between a Mumble host process and external clients.
//!
//! External processes register with an in-host broker over a well-known
//! named pipe, then exchange request/response JSON envelopes: api-call
//! requests are dispatched against the host's plugin API and answered on a
//! per-client reply pipe.
//!
//! Architecture:
//! - Broker worker thread: reads the rendezvous pipe, dispatches envelopes,
//!   writes replies through the client registry
//! - Client session: external-process counterpart owning one reply pipe
//! - Pipe transport: FIFO (Unix) / overlapped named pipe (Windows) behind
//!   one interface, cancellable at every poll interval
//! - Operation interpreter: client-side scripting of call sequences with
//!   `${…}` result substitution

pub mod api;
pub mod bridge;
pub mod client;
pub mod dispatch;
pub mod error;
mod logging;
pub mod messages;
pub mod operation;
pub mod pipe;
mod secret;

pub use error::BridgeError;
pub use logging::{init_logging, log_debug, log_debug_content, log_file_path};
