//! Wire frame codec and classifier.
//!
//! Every frame on the wrapped transport is a CBOR-encoded map carrying a
//! string `type` and a string `senderId` (`targetId` is absent on broadcast
//! frames). This layer introduces two frame types of its own:
//!
//! | `type` | fields | purpose |
//! |---|---|---|
//! | `auth` | `payload: { shareId, serializedConnectionMessage }` | one handshake message for one share |
//! | `encrypted` | `shareId`, `encryptedMessage` | sealed repository message |
//!
//! Every other `type` is classified as pass-through and forwarded untouched;
//! unknown frame types are never an error here.

use crate::registry::DocumentId;
use serde_cbor::Value;
use std::collections::BTreeMap;
use thiserror::Error;
use vouch_crypto::ShareId;
use vouch_transport::PeerId;

/// `type` value of handshake transport frames
pub const AUTH_TYPE: &str = "auth";
/// `type` value of sealed repository frames
pub const ENCRYPTED_TYPE: &str = "encrypted";

/// Frame decode and classification errors
#[derive(Debug, Error)]
pub enum WireError {
    /// The frame is not a CBOR map
    #[error("frame is not an object")]
    NotAnObject,

    /// A required field is missing or has the wrong type
    #[error("missing or invalid field: {0}")]
    BadField(&'static str),

    /// CBOR encoding or decoding failed
    #[error("cbor error: {0}")]
    Cbor(#[from] serde_cbor::Error),
}

/// Result type for wire operations
pub type WireResult<T> = Result<T, WireError>;

/// A classified frame.
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    /// Handshake transport for one (share, peer) pair
    Auth {
        /// Sending peer
        sender_id: PeerId,
        /// Receiving peer, absent on broadcast
        target_id: Option<PeerId>,
        /// Share the handshake belongs to
        share_id: ShareId,
        /// One serialized connection message
        message: Vec<u8>,
    },
    /// Sealed repository message
    Encrypted {
        /// Sending peer
        sender_id: PeerId,
        /// Receiving peer, absent on broadcast
        target_id: Option<PeerId>,
        /// Share whose session key sealed the message
        share_id: ShareId,
        /// Sealed bytes; decrypts to a full repository message
        ciphertext: Vec<u8>,
    },
    /// Any other frame type; forwarded untouched
    PassThrough {
        /// Sending peer
        sender_id: PeerId,
        /// The original frame
        frame: Value,
    },
}

impl WireMessage {
    /// Decode and classify an encoded frame.
    ///
    /// # Errors
    ///
    /// Returns a [`WireError`] if the bytes are not CBOR or the frame lacks
    /// a string `type` or `senderId`.
    pub fn decode(bytes: &[u8]) -> WireResult<Self> {
        let frame: Value = serde_cbor::from_slice(bytes)?;
        Self::classify(frame)
    }

    /// Classify a decoded frame.
    ///
    /// # Errors
    ///
    /// Returns a [`WireError`] if the frame is not an object with a string
    /// `type` and a string `senderId`, or a recognized type lacks its fields.
    pub fn classify(frame: Value) -> WireResult<Self> {
        let Value::Map(ref map) = frame else {
            return Err(WireError::NotAnObject);
        };
        let frame_type = text_field(map, "type").ok_or(WireError::BadField("type"))?;
        let sender_id =
            PeerId::new(text_field(map, "senderId").ok_or(WireError::BadField("senderId"))?);
        let target_id = text_field(map, "targetId").map(PeerId::new);

        match frame_type.as_str() {
            AUTH_TYPE => {
                let Some(Value::Map(payload)) = field(map, "payload") else {
                    return Err(WireError::BadField("payload"));
                };
                let share_id = ShareId::new(
                    text_field(payload, "shareId").ok_or(WireError::BadField("payload.shareId"))?,
                );
                let message = bytes_field(payload, "serializedConnectionMessage")
                    .ok_or(WireError::BadField("payload.serializedConnectionMessage"))?;
                Ok(Self::Auth {
                    sender_id,
                    target_id,
                    share_id,
                    message,
                })
            }
            ENCRYPTED_TYPE => {
                let share_id =
                    ShareId::new(text_field(map, "shareId").ok_or(WireError::BadField("shareId"))?);
                let ciphertext = bytes_field(map, "encryptedMessage")
                    .ok_or(WireError::BadField("encryptedMessage"))?;
                Ok(Self::Encrypted {
                    sender_id,
                    target_id,
                    share_id,
                    ciphertext,
                })
            }
            _ => Ok(Self::PassThrough { sender_id, frame }),
        }
    }

    /// The sending peer.
    #[must_use]
    pub fn sender_id(&self) -> &PeerId {
        match self {
            Self::Auth { sender_id, .. }
            | Self::Encrypted { sender_id, .. }
            | Self::PassThrough { sender_id, .. } => sender_id,
        }
    }

    /// Encode this frame for the wire.
    ///
    /// # Errors
    ///
    /// Returns a [`WireError`] if CBOR encoding fails.
    pub fn encode(&self) -> WireResult<Vec<u8>> {
        Ok(serde_cbor::to_vec(&self.to_value())?)
    }

    /// Render this frame as a CBOR value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Auth {
                sender_id,
                target_id,
                share_id,
                message,
            } => {
                let mut payload = BTreeMap::new();
                payload.insert(text("shareId"), text(share_id.as_str()));
                payload.insert(
                    text("serializedConnectionMessage"),
                    Value::Bytes(message.clone()),
                );

                let mut map = BTreeMap::new();
                map.insert(text("type"), text(AUTH_TYPE));
                map.insert(text("senderId"), text(sender_id.as_str()));
                if let Some(target) = target_id {
                    map.insert(text("targetId"), text(target.as_str()));
                }
                map.insert(text("payload"), Value::Map(payload));
                Value::Map(map)
            }
            Self::Encrypted {
                sender_id,
                target_id,
                share_id,
                ciphertext,
            } => {
                let mut map = BTreeMap::new();
                map.insert(text("type"), text(ENCRYPTED_TYPE));
                map.insert(text("senderId"), text(sender_id.as_str()));
                if let Some(target) = target_id {
                    map.insert(text("targetId"), text(target.as_str()));
                }
                map.insert(text("shareId"), text(share_id.as_str()));
                map.insert(text("encryptedMessage"), Value::Bytes(ciphertext.clone()));
                Value::Map(map)
            }
            Self::PassThrough { frame, .. } => frame.clone(),
        }
    }
}

/// Target peer named by a plaintext repository message, if any.
#[must_use]
pub fn plaintext_target(frame: &Value) -> Option<PeerId> {
    let Value::Map(map) = frame else { return None };
    text_field(map, "targetId").map(PeerId::new)
}

/// Document named by a plaintext repository message, if any.
#[must_use]
pub fn plaintext_document(frame: &Value) -> Option<DocumentId> {
    let Value::Map(map) = frame else { return None };
    text_field(map, "documentId").map(DocumentId::new)
}

fn text(s: impl Into<String>) -> Value {
    Value::Text(s.into())
}

fn field<'a>(map: &'a BTreeMap<Value, Value>, key: &str) -> Option<&'a Value> {
    map.get(&Value::Text(key.to_string()))
}

fn text_field(map: &BTreeMap<Value, Value>, key: &str) -> Option<String> {
    match field(map, key) {
        Some(Value::Text(s)) => Some(s.clone()),
        _ => None,
    }
}

fn bytes_field(map: &BTreeMap<Value, Value>, key: &str) -> Option<Vec<u8>> {
    match field(map, key) {
        Some(Value::Bytes(b)) => Some(b.clone()),
        _ => None,
    }
}
