//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use mumble_json_bridge::api::{ApiError, ApiResult, ChannelId, ConnectionId, HostApi, UserId};

pub const ACTIVE_CONNECTION: ConnectionId = 13;
pub const LOCAL_USER_ID: UserId = 5;
pub const OTHER_USER_ID: UserId = 7;
pub const LOCAL_USER_NAME: &str = "Local user";
pub const OTHER_USER_NAME: &str = "Other user";
pub const LOCAL_USER_CHANNEL: ChannelId = 244;
pub const LOCAL_USER_CHANNEL_NAME: &str = "Channel of local user";

/// Host-API stand-in with two users on one connection. Records how often
/// each function was invoked so tests can assert exactly which calls the
/// bridge forwarded.
pub struct MockApi {
    calls: Mutex<HashMap<&'static str, usize>>,
}

impl MockApi {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn call_count(&self, function: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(function)
            .copied()
            .unwrap_or(0)
    }

    fn record(&self, function: &'static str) {
        *self
            .calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(function)
            .or_insert(0) += 1;
    }

    fn check_connection(&self, connection: ConnectionId) -> Result<(), ApiError> {
        if connection == ACTIVE_CONNECTION {
            Ok(())
        } else {
            Err(ApiError::new("Unknown connection"))
        }
    }
}

impl HostApi for MockApi {
    fn active_server_connection(&self) -> ApiResult<ConnectionId> {
        self.record("getActiveServerConnection");
        Ok(ACTIVE_CONNECTION)
    }

    fn is_connection_synchronized(&self, connection: ConnectionId) -> ApiResult<bool> {
        self.record("isConnectionSynchronized");
        self.check_connection(connection)?;
        Ok(true)
    }

    fn local_user_id(&self, connection: ConnectionId) -> ApiResult<UserId> {
        self.record("getLocalUserID");
        self.check_connection(connection)?;
        Ok(LOCAL_USER_ID)
    }

    fn all_users(&self, connection: ConnectionId) -> ApiResult<Vec<UserId>> {
        self.record("getAllUsers");
        self.check_connection(connection)?;
        Ok(vec![LOCAL_USER_ID, OTHER_USER_ID])
    }

    fn user_name(&self, connection: ConnectionId, user: UserId) -> ApiResult<String> {
        self.record("getUserName");
        self.check_connection(connection)?;
        match user {
            LOCAL_USER_ID => Ok(LOCAL_USER_NAME.to_string()),
            OTHER_USER_ID => Ok(OTHER_USER_NAME.to_string()),
            _ => Err(ApiError::new("Unknown user")),
        }
    }

    fn find_user_by_name(&self, connection: ConnectionId, name: &str) -> ApiResult<UserId> {
        self.record("findUserByName");
        self.check_connection(connection)?;
        match name {
            LOCAL_USER_NAME => Ok(LOCAL_USER_ID),
            OTHER_USER_NAME => Ok(OTHER_USER_ID),
            _ => Err(ApiError::new("No user with that name")),
        }
    }

    fn channel_name(&self, connection: ConnectionId, channel: ChannelId) -> ApiResult<String> {
        self.record("getChannelName");
        self.check_connection(connection)?;
        if channel == LOCAL_USER_CHANNEL {
            Ok(LOCAL_USER_CHANNEL_NAME.to_string())
        } else {
            Err(ApiError::new("Unknown channel"))
        }
    }

    fn find_channel_by_name(&self, connection: ConnectionId, name: &str) -> ApiResult<ChannelId> {
        self.record("findChannelByName");
        self.check_connection(connection)?;
        if name == LOCAL_USER_CHANNEL_NAME {
            Ok(LOCAL_USER_CHANNEL)
        } else {
            Err(ApiError::new("Unknown channel"))
        }
    }

    fn is_user_locally_muted(&self, connection: ConnectionId, user: UserId) -> ApiResult<bool> {
        self.record("isUserLocallyMuted");
        self.check_connection(connection)?;
        Ok(user == OTHER_USER_ID)
    }

    fn log(&self, _message: &str) -> ApiResult<()> {
        self.record("log");
        Ok(())
    }
}
