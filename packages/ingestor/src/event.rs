//! Event Normalizer
//!
//! Converts raw watcher notifications into canonical relay events.
//! The event id depends only on the on-chain hash and the event kind, so every
//! redelivery of the same notification normalizes to the same id regardless of
//! headers, delivery timestamps or retry counts.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Maximum number of hex digits accepted in a hash (32 bytes)
pub const MAX_HASH_HEX_LEN: usize = 64;

/// Field carrying the transaction hash (and the fallback for message hashes)
pub const HASH_FIELD: &str = "hash";

/// Field carrying the message hash for message-level events
pub const MESSAGE_HASH_FIELD: &str = "messageHash";

/// Field carrying the event kind
pub const KIND_FIELD: &str = "kind";

/// Errors that can occur during normalization
///
/// All of these are caused by the sender and are never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizationError {
    #[error("Notification body must be a JSON object")]
    NotAnObject,

    #[error("Missing hash field")]
    MissingHash,

    #[error("Hash field must be a string")]
    HashNotString,

    #[error("Empty hash")]
    EmptyHash,

    #[error("Malformed hash: {0}")]
    MalformedHash(String),

    #[error("Unknown event kind: {0}")]
    UnknownKind(String),
}

/// Kind of relayed event
///
/// The kind doubles as the dedup namespace, which keeps transaction-hash ids
/// and message-hash ids apart even when the raw hashes are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Transaction,
    Message,
}

impl EventKind {
    /// Returns the namespace prefix used in dedup keys
    pub fn namespace(&self) -> &'static str {
        match self {
            EventKind::Transaction => "Transaction",
            EventKind::Message => "Message",
        }
    }

    /// Builds the dedup key for a canonical hash in this namespace
    pub fn dedup_key(&self, hash: &str) -> String {
        format!("{}:{}", self.namespace(), hash)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.namespace())
    }
}

impl FromStr for EventKind {
    type Err = NormalizationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "transaction" | "tx" => Ok(EventKind::Transaction),
            "message" | "msg" => Ok(EventKind::Message),
            _ => Err(NormalizationError::UnknownKind(s.to_string())),
        }
    }
}

/// Inbound notification as received from the watcher
///
/// Keeps the exact request text next to its parsed form. Only `kind` and the
/// hash fields are read from the parsed value; the raw text is what gets
/// relayed, so large integers and key order survive untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    fields: Value,
    raw: String,
}

impl Notification {
    /// Parse a request body, keeping the original bytes
    pub fn from_slice(body: &[u8]) -> Result<Self, serde_json::Error> {
        let fields = serde_json::from_slice(body)?;
        // parsing succeeded, so the body is valid UTF-8
        let raw = String::from_utf8_lossy(body).into_owned();
        Ok(Self { fields, raw })
    }

    /// Parsed view of the body
    pub fn fields(&self) -> &Value {
        &self.fields
    }

    /// Body text exactly as received
    pub fn raw(&self) -> &str {
        &self.raw
    }
}

impl From<Value> for Notification {
    fn from(fields: Value) -> Self {
        let raw = fields.to_string();
        Self { fields, raw }
    }
}

/// Canonical event handed through the relay pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct RelayEvent {
    /// Dedup key, `<Kind>:<hash>`
    pub id: String,
    /// Event kind
    pub kind: EventKind,
    /// Canonical hash, lower-case with 0x prefix
    pub hash: String,
    /// Notification body exactly as received
    pub payload: String,
    /// Unix timestamp in milliseconds when the notification was received.
    /// Informational only, not part of identity.
    pub received_at: u64,
}

/// Normalize a raw notification into a `RelayEvent`
///
/// # Arguments
/// * `notification` - The inbound notification, or an already parsed JSON value
///
/// # Returns
/// A `RelayEvent` whose id is derived from the kind and hash only
pub fn normalize(notification: impl Into<Notification>) -> Result<RelayEvent, NormalizationError> {
    let Notification { fields, raw } = notification.into();
    let fields = fields.as_object().ok_or(NormalizationError::NotAnObject)?;

    let kind = match fields.get(KIND_FIELD) {
        None | Some(Value::Null) => EventKind::Transaction,
        Some(Value::String(kind)) => kind.parse()?,
        Some(other) => return Err(NormalizationError::UnknownKind(other.to_string())),
    };

    let raw_hash = match kind {
        EventKind::Message => fields
            .get(MESSAGE_HASH_FIELD)
            .filter(|v| !v.is_null())
            .or_else(|| fields.get(HASH_FIELD)),
        EventKind::Transaction => fields.get(HASH_FIELD),
    };

    let hash = match raw_hash {
        None | Some(Value::Null) => return Err(NormalizationError::MissingHash),
        Some(Value::String(raw)) => canonical_hash(raw)?,
        Some(_) => return Err(NormalizationError::HashNotString),
    };

    Ok(RelayEvent {
        id: kind.dedup_key(&hash),
        kind,
        hash,
        payload: raw,
        received_at: current_timestamp_millis(),
    })
}

/// Canonicalize a hash string
///
/// Accepts hex digits with or without a `0x` prefix and returns the lower-case
/// form with the prefix, so `0xABC` and `abc` both become `0xabc`.
pub fn canonical_hash(raw: &str) -> Result<String, NormalizationError> {
    if raw.trim().is_empty() {
        return Err(NormalizationError::EmptyHash);
    }

    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .unwrap_or(raw);

    if digits.is_empty() {
        return Err(NormalizationError::EmptyHash);
    }

    if digits.len() > MAX_HASH_HEX_LEN {
        return Err(NormalizationError::MalformedHash(format!(
            "{} hex digits exceeds maximum of {}",
            digits.len(),
            MAX_HASH_HEX_LEN
        )));
    }

    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(NormalizationError::MalformedHash(raw.to_string()));
    }

    Ok(format!("0x{}", digits.to_ascii_lowercase()))
}

/// Get current timestamp in milliseconds
pub fn current_timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
