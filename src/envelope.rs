//! Envelope codec: the transport-neutral wire record around a message.
//!
//! JSON shape:
//!
//! ```text
//! { "id": "…", "timestamp": 1700000000, "type": "UserCreated", "payload": { … } }
//! ```

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::message::{AnyMessage, Message};

/// Wire record wrapping one message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    /// Unix seconds.
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub message_type: String,
    pub payload: serde_json::Value,
}

/// Byte encoding used when an envelope crosses a transport.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    #[default]
    Json,
    /// Compact binary framing of the same four fields; the payload travels as JSON bytes.
    Bitcode,
}

#[derive(Serialize, Deserialize)]
struct BinaryEnvelope {
    id: String,
    timestamp: i64,
    message_type: String,
    payload: Vec<u8>,
}

impl Envelope {
    /// Wrap a message with a fresh id and the current time.
    pub fn new(message: &dyn AnyMessage) -> Result<Self, CodecError> {
        Ok(Self {
            id: new_id(),
            timestamp: unix_now(),
            message_type: message.type_tag().to_string(),
            payload: message.to_payload()?,
        })
    }

    /// Decode the payload as `M`, refusing envelopes tagged for another type.
    pub fn decode<M: Message>(&self) -> Result<M, CodecError> {
        if self.message_type != M::message_type() {
            return Err(CodecError::TypeMismatch {
                expected: M::message_type(),
                actual: self.message_type.clone(),
            });
        }
        Ok(M::deserialize(&self.payload)?)
    }

    pub fn to_bytes(&self, format: WireFormat) -> Result<Vec<u8>, CodecError> {
        match format {
            WireFormat::Json => Ok(serde_json::to_vec(self)?),
            WireFormat::Bitcode => {
                let binary = BinaryEnvelope {
                    id: self.id.clone(),
                    timestamp: self.timestamp,
                    message_type: self.message_type.clone(),
                    payload: serde_json::to_vec(&self.payload)?,
                };
                bitcode::serialize(&binary).map_err(|e| CodecError::Binary(e.to_string()))
            }
        }
    }

    pub fn from_bytes(bytes: &[u8], format: WireFormat) -> Result<Self, CodecError> {
        match format {
            WireFormat::Json => Ok(serde_json::from_slice(bytes)?),
            WireFormat::Bitcode => {
                let binary: BinaryEnvelope = bitcode::deserialize(bytes)
                    .map_err(|e| CodecError::Binary(e.to_string()))?;
                Ok(Self {
                    id: binary.id,
                    timestamp: binary.timestamp,
                    message_type: binary.message_type,
                    payload: serde_json::from_slice(&binary.payload)?,
                })
            }
        }
    }
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
