//! Cross-process invalidation of local caches
//!
//! Every mutation of a local backend is announced as an
//! [`InvalidationMessage`] through an [`InvalidationProvider`]. Each process
//! feeds received messages to its [`InvalidationListener`], which evicts the
//! affected key from its own local backends when the content really changed.
//!
//! ## Wire format
//!
//! A JSON object:
//!
//! ```text
//! {"processIdentity": "3f2c…", "key": "orders&42", "contentFingerprint": "9a1b…"}
//! ```
//!
//! `key` absent means "clear everything"; `contentFingerprint` absent means
//! "evict unconditionally".

mod bus;
mod listener;
mod provider;
mod subscriber;

pub use bus::BroadcastBus;
pub use listener::{ApplyReport, InvalidationListener};
pub use provider::{InvalidationProvider, RedisInvalidationProvider};
pub use subscriber::RedisInvalidationSubscriber;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

use crate::{CacheError, ProcessIdentity};

/// Hex SHA-256 of a value's canonical JSON form.
///
/// Object keys are sorted at every level before hashing, so field and map
/// ordering does not change the fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of<V: Serialize + ?Sized>(value: &V) -> Result<Self, CacheError> {
        let canonical = canonicalize(serde_json::to_value(value)?);
        let bytes = serde_json::to_vec(&canonical)?;
        Ok(Self(hex::encode(Sha256::digest(&bytes))))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Rebuild objects in key order. `serde_json` keeps insertion order when its
/// `preserve_order` feature is enabled anywhere in the build.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(fields) => {
            let mut entries: Vec<(String, Value)> = fields.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, canonicalize(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Notification that a local cache entry changed in some process
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidationMessage {
    pub process_identity: ProcessIdentity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_fingerprint: Option<Fingerprint>,
}

impl InvalidationMessage {
    /// Everything was cleared
    pub fn clear(process_identity: ProcessIdentity) -> Self {
        Self {
            process_identity,
            key: None,
            content_fingerprint: None,
        }
    }

    /// `key` was evicted
    pub fn evict(process_identity: ProcessIdentity, key: impl Into<String>) -> Self {
        Self {
            process_identity,
            key: Some(key.into()),
            content_fingerprint: None,
        }
    }

    /// `key` now holds content with the given fingerprint
    pub fn put(
        process_identity: ProcessIdentity,
        key: impl Into<String>,
        fingerprint: Option<Fingerprint>,
    ) -> Self {
        Self {
            process_identity,
            key: Some(key.into()),
            content_fingerprint: fingerprint,
        }
    }

    pub fn to_wire(&self) -> Result<String, CacheError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a wire payload.
    ///
    /// Only a missing or blank `processIdentity` (or a payload that is not a
    /// JSON object) is an error. Non-string keys are stringified and a
    /// malformed fingerprint is dropped, which makes receivers evict.
    pub fn parse(raw: &str) -> Result<Self, CacheError> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| CacheError::InvalidMessage(format!("payload is not JSON: {e}")))?;
        let Value::Object(fields) = value else {
            return Err(CacheError::InvalidMessage(
                "payload is not a JSON object".to_owned(),
            ));
        };

        let process_identity = match fields.get("processIdentity") {
            Some(Value::String(id)) if !id.trim().is_empty() => ProcessIdentity::new(id.clone()),
            _ => {
                return Err(CacheError::InvalidMessage(
                    "missing processIdentity".to_owned(),
                ));
            }
        };

        let key = match fields.get("key") {
            None | Some(Value::Null) => None,
            Some(Value::String(key)) => Some(key.clone()),
            Some(other) => Some(other.to_string()),
        };

        let content_fingerprint = match fields.get("contentFingerprint") {
            Some(Value::String(fp)) if !fp.is_empty() => Some(Fingerprint(fp.clone())),
            _ => None,
        };

        Ok(Self {
            process_identity,
            key,
            content_fingerprint,
        })
    }
}
