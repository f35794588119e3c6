//! Envelope and auth message builders for coordinator frames.
//!
//! Every frame crossing a panel session is a JSON envelope
//! `{v, type, msg_id, device_id, ts, body}`. Builders here produce those
//! envelopes plus the time-sync and auth bodies; `parse_auth_ok` is the one
//! inbound parser the session needs before version negotiation.

use chrono::{DateTime, Offset, Utc};
use serde_json::{Value, json};
use thiserror::Error;
use uuid::Uuid;

/// Protocol versions this coordinator speaks.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[i64] = &[1];

/// Malformed frame contents. Logged and ignored by the session listener;
/// never crashes it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("protocol versions must be integers")]
    NonIntegerVersion,

    #[error("at least one protocol version is required")]
    EmptyVersions,

    #[error("coordinator_protocol_versions must be a list")]
    VersionsNotAList,

    #[error("auth_invalid requires a non-empty message")]
    EmptyAuthMessage,
}

/// Build a canonical envelope for coordinator messages.
///
/// `msg_id` is generated when omitted; `timestamp_ms` defaults to the
/// current epoch milliseconds.
pub fn build_envelope(
    device_id: &str,
    msg_type: &str,
    body: Value,
    msg_id: Option<String>,
    timestamp_ms: Option<i64>,
) -> Value {
    json!({
        "v": 1,
        "type": msg_type,
        "msg_id": msg_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
        "device_id": device_id,
        "ts": timestamp_ms.unwrap_or_else(|| Utc::now().timestamp_millis()),
        "body": body,
    })
}

/// Create a time-sync payload: epoch seconds, UTC offset seconds, and an
/// optional IANA timezone identifier.
pub fn build_time_body<Tz: chrono::TimeZone>(
    now: &DateTime<Tz>,
    timezone_name: Option<&str>,
) -> Value {
    let mut body = json!({
        "epoch": now.timestamp(),
        "utc_offset": now.offset().fix().local_minus_utc(),
    });
    if let Some(tz) = timezone_name {
        body["timezone"] = json!(tz);
    }
    body
}

/// Normalize a protocol version list into integers.
///
/// Booleans are not integers here, even though JSON-adjacent ecosystems
/// sometimes conflate them.
fn normalize_protocol_versions(versions: &[Value]) -> Result<Vec<i64>, ProtocolError> {
    let mut normalized = Vec::with_capacity(versions.len());
    for version in versions {
        match version {
            Value::Bool(_) => return Err(ProtocolError::NonIntegerVersion),
            Value::Number(n) => match n.as_i64() {
                Some(v) => normalized.push(v),
                None => return Err(ProtocolError::NonIntegerVersion),
            },
            _ => return Err(ProtocolError::NonIntegerVersion),
        }
    }
    if normalized.is_empty() {
        return Err(ProtocolError::EmptyVersions);
    }
    Ok(normalized)
}

/// Extract supported coordinator protocol versions from an `auth_ok` body.
///
/// An absent key yields an empty list; a present key must be a list of
/// integers.
pub fn parse_auth_ok(body: &Value) -> Result<Vec<i64>, ProtocolError> {
    match body.get("coordinator_protocol_versions") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(versions)) => normalize_protocol_versions(versions),
        Some(_) => Err(ProtocolError::VersionsNotAList),
    }
}

/// Build an `auth_ok` envelope advertising coordinator protocol versions.
pub fn build_auth_ok(device_id: &str, coordinator_versions: &[Value]) -> Result<Value, ProtocolError> {
    let versions = normalize_protocol_versions(coordinator_versions)?;
    Ok(build_envelope(
        device_id,
        "auth_ok",
        json!({ "coordinator_protocol_versions": versions }),
        None,
        None,
    ))
}

/// Build an `auth_invalid` envelope. The message must be non-empty so the
/// panel has something to show.
pub fn build_auth_invalid(device_id: &str, message: &str) -> Result<Value, ProtocolError> {
    if message.is_empty() {
        return Err(ProtocolError::EmptyAuthMessage);
    }
    Ok(build_envelope(
        device_id,
        "auth_invalid",
        json!({ "message": message }),
        None,
        None,
    ))
}

/// Build the `auth_confirmed` envelope the coordinator sends after
/// selecting a mutual protocol version.
pub fn build_auth_confirmed(device_id: &str) -> Value {
    build_envelope(device_id, "auth_confirmed", json!({}), None, None)
}
