//! Envelope and header types — the wire currency of the runtime. An
//! envelope's payload is always an opaque byte string; its logical type
//! is carried by `header["type"]` so structured decoding stays an agent
//! concern, never a transport concern.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Error, Result};

pub const HDR_TYPE: &str = "type";
pub const HDR_REPLY_TO: &str = "reply_to";
pub const HDR_SESSION_ID: &str = "session_id";
pub const HDR_STREAM: &str = "stream";
pub const HDR_TERMINATE: &str = "terminate";
pub const HDR_ERROR: &str = "error";
pub const HDR_ERROR_DETAIL: &str = "error_detail";

/// A string-to-string map attached to every envelope. Reserved keys are
/// exposed through typed accessors so call sites never repeat the raw
/// string literals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header(HashMap<String, String>);

impl Header {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.0.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    #[must_use]
    pub fn payload_type(&self) -> Option<&str> {
        self.get(HDR_TYPE)
    }

    #[must_use]
    pub fn reply_to(&self) -> Option<&str> {
        self.get(HDR_REPLY_TO)
    }

    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.get(HDR_SESSION_ID)
    }

    #[must_use]
    pub fn is_stream(&self) -> bool {
        self.get(HDR_STREAM) == Some("1")
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.get(HDR_TERMINATE) == Some("1")
    }

    pub fn set_terminate(&mut self) -> &mut Self {
        self.set(HDR_TERMINATE, "1")
    }

    #[must_use]
    pub fn error_kind(&self) -> Option<&str> {
        self.get(HDR_ERROR)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }
}

/// `{ header, payload }`. The only thing transports move.
#[derive(Debug, Clone, Default)]
pub struct Envelope {
    pub header: Header,
    pub payload: Bytes,
}

impl Envelope {
    #[must_use]
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            header: Header::new(),
            payload: payload.into(),
        }
    }

    #[must_use]
    pub fn with_header(mut self, header: Header) -> Self {
        self.header = header;
        self
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.header.set(key, value);
        self
    }

    /// Builds a terminating error reply. A streaming caller observes this
    /// as the final chunk; a unary caller observes it as the only reply
    /// and must inspect `header.error_kind()`.
    #[must_use]
    pub fn error(kind: &str, detail: impl Into<String>) -> Self {
        let mut header = Header::new();
        header.set(HDR_ERROR, kind);
        header.set(HDR_ERROR_DETAIL, detail.into());
        header.set_terminate();
        Self {
            header,
            payload: Bytes::new(),
        }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.header.error_kind().is_some()
    }

    /// Encodes header + payload as JSON with a base64-encoded payload.
    /// Shared by the HTTP gateway and broker bindings (`spec.md` §6).
    ///
    /// # Errors
    /// Never fails in practice; returns `Result` to keep the broker/HTTP
    /// bindings' error-propagation uniform.
    pub fn to_wire(&self) -> Result<Bytes> {
        let wire = WireEnvelope {
            header: self.header.0.clone(),
            payload: BASE64.encode(&self.payload),
        };
        let json = serde_json::to_vec(&wire)
            .map_err(|e| Error::BadEnvelope(format!("cannot encode envelope: {e}")))?;
        Ok(Bytes::from(json))
    }

    /// # Errors
    /// Returns `Error::BadEnvelope` if `bytes` isn't a valid encoded
    /// envelope (malformed JSON, or an un-decodable base64 payload).
    pub fn from_wire(bytes: &[u8]) -> Result<Self> {
        let wire: WireEnvelope = serde_json::from_slice(bytes)
            .map_err(|e| Error::BadEnvelope(format!("cannot decode envelope: {e}")))?;
        let payload = BASE64
            .decode(wire.payload)
            .map_err(|e| Error::BadEnvelope(format!("cannot decode payload: {e}")))?;
        Ok(Self {
            header: Header(wire.header),
            payload: Bytes::from(payload),
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireEnvelope {
    header: HashMap<String, String>,
    payload: String,
}
