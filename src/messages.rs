//! Message model for the bridge wire protocol.
//!
//! Every envelope is a JSON object with a `message_type` discriminator;
//! every reply is a JSON object with a `response_type` discriminator and
//! the broker's secret. Requests are validated with [`require`], the single
//! field-assertion helper, so every structural failure produces the same
//! error kind with a human-legible description.

use serde::Serialize;
use serde_json::Value;

use crate::error::BridgeError;

/// Identifier the broker assigns to a registered client.
pub type ClientId = u64;

/// Sentinel for "no client assigned (yet)".
pub const INVALID_CLIENT_ID: ClientId = ClientId::MAX;

// ============================================================================
// Message kinds
// ============================================================================

/// The kinds of envelopes a client may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Registration,
    ApiCall,
    Operation,
    Disconnect,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Registration => "registration",
            MessageKind::ApiCall => "api_call",
            MessageKind::Operation => "operation",
            MessageKind::Disconnect => "disconnect",
        }
    }

    /// Parse a kind from its wire representation, case-insensitively.
    pub fn from_str(kind: &str) -> Option<Self> {
        match kind.to_lowercase().as_str() {
            "registration" => Some(MessageKind::Registration),
            "api_call" => Some(MessageKind::ApiCall),
            "operation" => Some(MessageKind::Operation),
            "disconnect" => Some(MessageKind::Disconnect),
            _ => None,
        }
    }
}

// ============================================================================
// Field assertions
// ============================================================================

/// JSON types [`require`] can assert.
#[derive(Debug, Clone, Copy)]
pub enum FieldType {
    String,
    Object,
    Integer,
    Unsigned,
    Array,
    Boolean,
}

impl FieldType {
    fn name(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Object => "object",
            FieldType::Integer => "integer",
            FieldType::Unsigned => "unsigned integer",
            FieldType::Array => "array",
            FieldType::Boolean => "boolean",
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Object => value.is_object(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Unsigned => value.is_u64(),
            FieldType::Array => value.is_array(),
            FieldType::Boolean => value.is_boolean(),
        }
    }
}

/// Assert that `msg` carries a field `name` of the given type and return it.
pub fn require<'a>(
    msg: &'a Value,
    name: &str,
    field_type: FieldType,
) -> Result<&'a Value, BridgeError> {
    let field = msg.get(name).ok_or_else(|| {
        BridgeError::invalid(format!(
            "The given message does not specify a \"{name}\" field"
        ))
    })?;
    if !field_type.matches(field) {
        return Err(BridgeError::invalid(format!(
            "The \"{name}\" field is expected to be of type {}",
            field_type.name()
        )));
    }
    Ok(field)
}

// ============================================================================
// Envelope validation
// ============================================================================

/// Verify that an envelope meets the basic requirements every message
/// shares and return its kind.
///
/// All kinds except `disconnect` must carry a `message` object; the
/// per-client credential fields are checked by the broker once it knows
/// which client to charge the failure to.
pub fn parse_basic_format(msg: &Value) -> Result<MessageKind, BridgeError> {
    if !msg.is_object() {
        return Err(BridgeError::invalid("The given message is not a JSON object"));
    }

    let type_field = require(msg, "message_type", FieldType::String)?;
    let type_str = type_field.as_str().unwrap_or_default();
    let kind = MessageKind::from_str(type_str).ok_or_else(|| {
        BridgeError::invalid(format!("The given message_type \"{type_str}\" is unknown"))
    })?;

    if kind != MessageKind::Disconnect {
        // The disconnect message doesn't require a message body.
        require(msg, "message", FieldType::Object)?;
    }

    Ok(kind)
}

/// Body of a registration request.
#[derive(Debug, Clone)]
pub struct Registration {
    pub pipe_path: String,
    pub secret: String,
}

impl Registration {
    pub fn parse(body: &Value) -> Result<Self, BridgeError> {
        let pipe_path = require(body, "pipe_path", FieldType::String)?;
        let secret = require(body, "secret", FieldType::String)?;
        Ok(Self {
            pipe_path: pipe_path.as_str().unwrap_or_default().to_string(),
            secret: secret.as_str().unwrap_or_default().to_string(),
        })
    }
}

// ============================================================================
// Replies
// ============================================================================

/// Replies the broker writes to a client's pipe.
///
/// Serialized with a `"response_type"` tag field for type discrimination.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "response_type")]
pub enum Reply {
    #[serde(rename = "registration")]
    Registration {
        secret: String,
        response: RegistrationResponse,
    },

    #[serde(rename = "api_call")]
    ApiCall { secret: String, response: ApiCallResponse },

    /// Farewell to a disconnecting client. Deliberately has no body.
    #[serde(rename = "disconnect")]
    Disconnect { secret: String },

    #[serde(rename = "error")]
    Error { secret: String, response: ErrorResponse },
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistrationResponse {
    pub client_id: ClientId,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiCallResponse {
    pub function: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_value: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error_message: String,
}

impl Reply {
    pub fn registration(broker_secret: &str, client_id: ClientId) -> Self {
        Reply::Registration {
            secret: broker_secret.to_string(),
            response: RegistrationResponse { client_id },
        }
    }

    pub fn disconnect(broker_secret: &str) -> Self {
        Reply::Disconnect {
            secret: broker_secret.to_string(),
        }
    }

    pub fn error(broker_secret: &str, error_message: impl Into<String>) -> Self {
        Reply::Error {
            secret: broker_secret.to_string(),
            response: ErrorResponse {
                error_message: error_message.into(),
            },
        }
    }

    /// Wire form of this reply.
    pub fn to_wire(&self) -> String {
        serde_json::to_string(self).expect("replies contain only serializable values")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reason(err: BridgeError) -> String {
        match err {
            BridgeError::InvalidMessage(reason) => reason,
            other => panic!("expected InvalidMessage, got {other:?}"),
        }
    }

    #[test]
    fn parses_every_kind_case_insensitively() {
        for (wire, kind) in [
            ("registration", MessageKind::Registration),
            ("REGISTRATION", MessageKind::Registration),
            ("api_call", MessageKind::ApiCall),
            ("Api_Call", MessageKind::ApiCall),
            ("operation", MessageKind::Operation),
            ("disconnect", MessageKind::Disconnect),
        ] {
            assert_eq!(MessageKind::from_str(wire), Some(kind), "kind {wire}");
        }
        assert_eq!(MessageKind::from_str("handshake"), None);
        assert_eq!(MessageKind::from_str(""), None);
    }

    #[test]
    fn rejects_non_object_envelopes() {
        let err = parse_basic_format(&json!([1, 2, 3])).unwrap_err();
        assert!(reason(err).contains("not a JSON object"));
    }

    #[test]
    fn rejects_missing_message_type() {
        let err = parse_basic_format(&json!({"message": {}})).unwrap_err();
        assert!(reason(err).contains("message_type"));
    }

    #[test]
    fn rejects_unknown_message_type() {
        let err =
            parse_basic_format(&json!({"message_type": "I am wrong", "message": {}})).unwrap_err();
        let reason = reason(err);
        assert!(reason.contains("message_type"));
        assert!(reason.contains("I am wrong"));
    }

    #[test]
    fn disconnect_needs_no_message_body() {
        let kind = parse_basic_format(&json!({"message_type": "disconnect"})).unwrap();
        assert_eq!(kind, MessageKind::Disconnect);
    }

    #[test]
    fn other_kinds_need_a_message_object() {
        let err = parse_basic_format(&json!({"message_type": "api_call"})).unwrap_err();
        assert!(reason(err).contains("message"));

        let err = parse_basic_format(&json!({"message_type": "api_call", "message": 42}))
            .unwrap_err();
        assert!(reason(err).contains("object"));
    }

    #[test]
    fn require_names_the_offending_field() {
        let msg = json!({"function": 7});

        let missing = reason(require(&msg, "parameter", FieldType::Object).unwrap_err());
        assert!(missing.contains("parameter"));
        assert!(missing.contains("does not specify"));

        let mistyped = reason(require(&msg, "function", FieldType::String).unwrap_err());
        assert!(mistyped.contains("function"));
        assert!(mistyped.contains("string"));
    }

    #[test]
    fn registration_body_extracts_both_fields() {
        let body = json!({"pipe_path": "/tmp/pipe", "secret": "hunter2hunter"});
        let registration = Registration::parse(&body).unwrap();
        assert_eq!(registration.pipe_path, "/tmp/pipe");
        assert_eq!(registration.secret, "hunter2hunter");

        let err = Registration::parse(&json!({"secret": "x"})).unwrap_err();
        assert!(reason(err).contains("pipe_path"));
    }

    #[test]
    fn replies_carry_exactly_the_documented_fields() {
        let reply: Value =
            serde_json::from_str(&Reply::registration("brokerSecret", 3).to_wire()).unwrap();
        assert_eq!(reply["response_type"], "registration");
        assert_eq!(reply["secret"], "brokerSecret");
        assert_eq!(reply["response"]["client_id"], 3);
        assert_eq!(reply.as_object().unwrap().len(), 3);

        let reply: Value =
            serde_json::from_str(&Reply::disconnect("brokerSecret").to_wire()).unwrap();
        assert_eq!(reply["response_type"], "disconnect");
        assert_eq!(reply.as_object().unwrap().len(), 2);

        let reply: Value =
            serde_json::from_str(&Reply::error("brokerSecret", "boom").to_wire()).unwrap();
        assert_eq!(reply["response_type"], "error");
        assert_eq!(reply["response"]["error_message"], "boom");
        assert_eq!(reply.as_object().unwrap().len(), 3);
    }
}
