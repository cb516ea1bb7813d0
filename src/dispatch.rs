//! Dispatch of api-call message bodies against the host API.
//!
//! A static catalog names every callable function and the functions that
//! take no parameters. Parameters are validated with the shared field
//! assertions, so a malformed call produces the same error kind (and reply)
//! as any other malformed message.

use serde_json::{json, Value};

use crate::api::{ApiError, ChannelId, ConnectionId, HostApi, UserId};
use crate::error::BridgeError;
use crate::messages::{require, ApiCallResponse, FieldType, Reply};

/// Every function name the bridge accepts.
pub const ALL_FUNCTIONS: &[&str] = &[
    "getActiveServerConnection",
    "isConnectionSynchronized",
    "getLocalUserID",
    "getAllUsers",
    "getUserName",
    "findUserByName",
    "getChannelName",
    "findChannelByName",
    "isUserLocallyMuted",
    "log",
];

/// Functions that are called without a `parameter` object.
pub const NO_PARAM_FUNCTIONS: &[&str] = &["getActiveServerConnection"];

fn api_failure(function: &str, err: ApiError) -> BridgeError {
    BridgeError::invalid(format!("API function \"{function}\" failed: {err}"))
}

fn connection_param(params: &Value) -> Result<ConnectionId, BridgeError> {
    let value = require(params, "connection", FieldType::Integer)?;
    value
        .as_i64()
        .and_then(|v| ConnectionId::try_from(v).ok())
        .ok_or_else(|| BridgeError::invalid("The \"connection\" field is out of range"))
}

fn user_param(params: &Value) -> Result<UserId, BridgeError> {
    let value = require(params, "user_id", FieldType::Unsigned)?;
    value
        .as_u64()
        .and_then(|v| UserId::try_from(v).ok())
        .ok_or_else(|| BridgeError::invalid("The \"user_id\" field is out of range"))
}

fn channel_param(params: &Value) -> Result<ChannelId, BridgeError> {
    let value = require(params, "channel_id", FieldType::Integer)?;
    value
        .as_i64()
        .and_then(|v| ChannelId::try_from(v).ok())
        .ok_or_else(|| BridgeError::invalid("The \"channel_id\" field is out of range"))
}

fn string_param<'a>(params: &'a Value, name: &str) -> Result<&'a str, BridgeError> {
    let value = require(params, name, FieldType::String)?;
    Ok(value.as_str().unwrap_or_default())
}

/// Execute the api-call message body `body` against `api` and build the
/// reply the broker forwards verbatim.
///
/// Catalog misses, malformed parameters and host-API failures all surface
/// as [`BridgeError::InvalidMessage`]; the broker turns those into error
/// replies.
pub fn dispatch(
    api: &dyn HostApi,
    broker_secret: &str,
    body: &Value,
) -> Result<Reply, BridgeError> {
    let function = require(body, "function", FieldType::String)?
        .as_str()
        .unwrap_or_default()
        .to_string();

    if !ALL_FUNCTIONS.contains(&function.as_str()) {
        return Err(BridgeError::invalid(format!(
            "Unknown API function \"{function}\""
        )));
    }

    let params: &Value = if NO_PARAM_FUNCTIONS.contains(&function.as_str()) {
        &Value::Null
    } else {
        require(body, "parameter", FieldType::Object)?
    };

    let return_value: Option<Value> = match function.as_str() {
        "getActiveServerConnection" => Some(
            api.active_server_connection()
                .map_err(|e| api_failure(&function, e))?
                .into(),
        ),
        "isConnectionSynchronized" => {
            let connection = connection_param(params)?;
            Some(
                api.is_connection_synchronized(connection)
                    .map_err(|e| api_failure(&function, e))?
                    .into(),
            )
        }
        "getLocalUserID" => {
            let connection = connection_param(params)?;
            Some(
                api.local_user_id(connection)
                    .map_err(|e| api_failure(&function, e))?
                    .into(),
            )
        }
        "getAllUsers" => {
            let connection = connection_param(params)?;
            let users = api
                .all_users(connection)
                .map_err(|e| api_failure(&function, e))?;
            Some(json!(users))
        }
        "getUserName" => {
            let connection = connection_param(params)?;
            let user = user_param(params)?;
            Some(
                api.user_name(connection, user)
                    .map_err(|e| api_failure(&function, e))?
                    .into(),
            )
        }
        "findUserByName" => {
            let connection = connection_param(params)?;
            let name = string_param(params, "user_name")?;
            Some(
                api.find_user_by_name(connection, name)
                    .map_err(|e| api_failure(&function, e))?
                    .into(),
            )
        }
        "getChannelName" => {
            let connection = connection_param(params)?;
            let channel = channel_param(params)?;
            Some(
                api.channel_name(connection, channel)
                    .map_err(|e| api_failure(&function, e))?
                    .into(),
            )
        }
        "findChannelByName" => {
            let connection = connection_param(params)?;
            let name = string_param(params, "channel_name")?;
            Some(
                api.find_channel_by_name(connection, name)
                    .map_err(|e| api_failure(&function, e))?
                    .into(),
            )
        }
        "isUserLocallyMuted" => {
            let connection = connection_param(params)?;
            let user = user_param(params)?;
            Some(
                api.is_user_locally_muted(connection, user)
                    .map_err(|e| api_failure(&function, e))?
                    .into(),
            )
        }
        "log" => {
            let message = string_param(params, "message")?;
            api.log(message).map_err(|e| api_failure(&function, e))?;
            None
        }
        _ => unreachable!("catalog membership was checked above"),
    };

    Ok(Reply::ApiCall {
        secret: broker_secret.to_string(),
        response: ApiCallResponse {
            function,
            status: "executed",
            return_value,
        },
    })
}
