//! Wire codec for the Jupyter message envelope.
//!
//! A message travels as a multipart ZeroMQ message:
//!
//! ```text
//! [identities...] <IDS|MSG> signature header parent_header metadata content [buffers...]
//! ```
//!
//! The signature is the lowercase hex HMAC-SHA256 of the four JSON frames,
//! keyed with the connection file's `key`. An empty key turns signing off and
//! the signature frame is sent (and accepted) empty.

use crate::types::connection::{ConnectionInfo, DEFAULT_SIGNATURE_SCHEME};
use crate::types::message::{Header, Message};
use bytes::Bytes;
use hmac::{Hmac, Mac};
use serde_json::{Map, Value};
use sha2::Sha256;
use std::fmt;
use thiserror::Error;

/// Frame separating routing identities from the signed message
pub const DELIMITER: &[u8] = b"<IDS|MSG>";

/// Frames that must follow the delimiter: signature plus four JSON parts
const REQUIRED_FRAMES: usize = 5;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("message has no <IDS|MSG> delimiter")]
    MissingDelimiter,

    #[error("message has {0} frames after the delimiter, expected at least 5")]
    TooFewFrames(usize),

    #[error("message signature does not match")]
    InvalidSignature,

    #[error("invalid {part} JSON: {source}")]
    Json {
        part: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("unsupported signature scheme: {0}")]
    UnsupportedScheme(String),
}

fn json_err(part: &'static str) -> impl FnOnce(serde_json::Error) -> WireError {
    move |source| WireError::Json { part, source }
}

/// Signs outgoing and verifies incoming messages
#[derive(Clone)]
pub struct Signer {
    key: Option<Vec<u8>>,
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl Signer {
    pub fn new(scheme: &str, key: &str) -> Result<Self, WireError> {
        if scheme != DEFAULT_SIGNATURE_SCHEME {
            return Err(WireError::UnsupportedScheme(scheme.to_string()));
        }
        if key.is_empty() {
            return Ok(Self::unsigned());
        }
        Ok(Self {
            key: Some(key.as_bytes().to_vec()),
        })
    }

    pub fn unsigned() -> Self {
        Self { key: None }
    }

    pub fn from_connection(info: &ConnectionInfo) -> Result<Self, WireError> {
        Self::new(&info.signature_scheme, &info.key)
    }

    pub fn is_enabled(&self) -> bool {
        self.key.is_some()
    }

    fn mac(&self, parts: &[&[u8]]) -> Option<HmacSha256> {
        // HMAC takes keys of any length, so construction only fails without a key
        let mut mac = HmacSha256::new_from_slice(self.key.as_deref()?).ok()?;
        for part in parts {
            mac.update(part);
        }
        Some(mac)
    }

    /// Hex digest over `parts`, empty when signing is off
    pub fn sign(&self, parts: &[&[u8]]) -> String {
        match self.mac(parts) {
            Some(mac) => hex::encode(mac.finalize().into_bytes()),
            None => String::new(),
        }
    }

    /// Constant-time check of a received hex digest
    pub fn verify(&self, signature: &[u8], parts: &[&[u8]]) -> bool {
        let Some(mac) = self.mac(parts) else {
            return true;
        };
        match hex::decode(signature) {
            Ok(expected) => mac.verify_slice(&expected).is_ok(),
            Err(_) => false,
        }
    }
}

impl Message {
    /// Encode into multipart frames, signing with `signer`
    pub fn to_frames(&self, signer: &Signer) -> Result<Vec<Bytes>, WireError> {
        let header = serde_json::to_vec(&self.header).map_err(json_err("header"))?;
        let parent = match &self.parent_header {
            Some(parent) => serde_json::to_vec(parent).map_err(json_err("parent_header"))?,
            None => b"{}".to_vec(),
        };
        let metadata = serde_json::to_vec(&self.metadata).map_err(json_err("metadata"))?;
        let content = serde_json::to_vec(&self.content).map_err(json_err("content"))?;

        let signature = signer.sign(&[&header[..], &parent[..], &metadata[..], &content[..]]);

        let mut frames = Vec::with_capacity(self.identities.len() + 6 + self.buffers.len());
        frames.extend(self.identities.iter().cloned());
        frames.push(Bytes::from_static(DELIMITER));
        frames.push(Bytes::from(signature));
        frames.push(Bytes::from(header));
        frames.push(Bytes::from(parent));
        frames.push(Bytes::from(metadata));
        frames.push(Bytes::from(content));
        frames.extend(self.buffers.iter().cloned());
        Ok(frames)
    }

    /// Decode multipart frames, rejecting messages whose signature does not verify
    pub fn from_frames(frames: Vec<Bytes>, signer: &Signer) -> Result<Self, WireError> {
        let delimiter = frames
            .iter()
            .position(|frame| &frame[..] == DELIMITER)
            .ok_or(WireError::MissingDelimiter)?;

        let identities = frames[..delimiter].to_vec();
        let rest = &frames[delimiter + 1..];
        if rest.len() < REQUIRED_FRAMES {
            return Err(WireError::TooFewFrames(rest.len()));
        }

        let (signature, header, parent, metadata, content) =
            (&rest[0], &rest[1], &rest[2], &rest[3], &rest[4]);

        if !signer.verify(signature, &[&header[..], &parent[..], &metadata[..], &content[..]]) {
            return Err(WireError::InvalidSignature);
        }

        let header: Header = serde_json::from_slice(header).map_err(json_err("header"))?;
        let parent: Value = serde_json::from_slice(parent).map_err(json_err("parent_header"))?;
        let parent_header = match parent {
            Value::Object(ref map) if map.is_empty() => None,
            other => Some(serde_json::from_value(other).map_err(json_err("parent_header"))?),
        };
        let metadata: Map<String, Value> =
            serde_json::from_slice(metadata).map_err(json_err("metadata"))?;
        let content: Value = serde_json::from_slice(content).map_err(json_err("content"))?;

        Ok(Message {
            identities,
            header,
            parent_header,
            metadata,
            content,
            buffers: rest[REQUIRED_FRAMES..].to_vec(),
        })
    }
}
