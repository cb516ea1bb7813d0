//! Host-API surface the bridge forwards calls to.
//!
//! The bridge core treats the voice client's plugin API as an opaque
//! dispatcher; this trait is the seam the host process implements. Return
//! values are owned, so any buffer the host allocates for a call is
//! released as soon as the reply has been serialized.

use thiserror::Error;

/// Handle of one server connection.
pub type ConnectionId = i32;

/// Identifier of a user on a server.
pub type UserId = u32;

/// Identifier of a channel on a server.
pub type ChannelId = i32;

/// Failure reported by the host API for an otherwise well-formed call.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ApiError {
    pub message: String,
}

impl ApiError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// The host functions callable through the bridge.
///
/// Implementations must be callable from the broker's worker thread while
/// the host runs elsewhere, hence `Send + Sync`.
pub trait HostApi: Send + Sync {
    fn active_server_connection(&self) -> ApiResult<ConnectionId>;
    fn is_connection_synchronized(&self, connection: ConnectionId) -> ApiResult<bool>;
    fn local_user_id(&self, connection: ConnectionId) -> ApiResult<UserId>;
    fn all_users(&self, connection: ConnectionId) -> ApiResult<Vec<UserId>>;
    fn user_name(&self, connection: ConnectionId, user: UserId) -> ApiResult<String>;
    fn find_user_by_name(&self, connection: ConnectionId, name: &str) -> ApiResult<UserId>;
    fn channel_name(&self, connection: ConnectionId, channel: ChannelId) -> ApiResult<String>;
    fn find_channel_by_name(&self, connection: ConnectionId, name: &str) -> ApiResult<ChannelId>;
    fn is_user_locally_muted(&self, connection: ConnectionId, user: UserId) -> ApiResult<bool>;
    fn log(&self, message: &str) -> ApiResult<()>;
}
