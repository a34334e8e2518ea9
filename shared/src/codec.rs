//! Newline-delimited JSON codec for envelopes
//!
//! Every message is one line:
//! ```text
//! {"meta":{"pend":<bool>,"hmac":"<64 hex>"},"data":{"lux1":..,"p":..}}\n
//! ```
//!
//! The `hmac` authenticates the exact bytes of the `data` object, so the body
//! is serialized once, signed, and embedded verbatim.

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use thiserror::Error;

use crate::auth::Authenticator;
use crate::snapshot::{DataBody, Snapshot};

/// Maximum encoded envelope size, newline included
pub const MAX_MESSAGE_SIZE: usize = 1024;

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Message too large: {0} bytes (max: {MAX_MESSAGE_SIZE})")]
    MessageTooLarge(usize),

    #[error("Line exceeds {MAX_MESSAGE_SIZE} bytes without a terminator")]
    LineTooLong,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct Meta {
    pend: bool,
    hmac: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireEnvelope {
    meta: Meta,
    data: Box<RawValue>,
}

/// Serialize the `data` body of a snapshot
pub fn encode_body(snapshot: &Snapshot) -> Result<String, CodecError> {
    Ok(serde_json::to_string(&DataBody::from(snapshot))?)
}

/// Build a signed, newline-terminated envelope for a snapshot
pub fn encode(
    snapshot: &Snapshot,
    pending: bool,
    auth: &Authenticator,
) -> Result<Bytes, CodecError> {
    let body = encode_body(snapshot)?;
    let hmac = auth.sign(body.as_bytes());

    let envelope = WireEnvelope {
        meta: Meta { pend: pending, hmac },
        data: RawValue::from_string(body)?,
    };

    let mut line = serde_json::to_vec(&envelope)?;
    line.push(b'\n');

    if line.len() > MAX_MESSAGE_SIZE {
        return Err(CodecError::MessageTooLarge(line.len()));
    }

    Ok(Bytes::from(line))
}

/// An envelope as received by the collector
#[derive(Debug, Clone)]
pub struct ReceivedEnvelope {
    /// Whether the station had a pending retry when this was built
    pub pending: bool,
    /// Hex digest claimed by the sender
    pub hmac: String,
    /// Exact bytes of the `data` object
    pub body: String,
    /// Parsed readings
    pub data: DataBody,
}

impl ReceivedEnvelope {
    /// Check the claimed digest against the raw body
    pub fn verify(&self, auth: &Authenticator) -> bool {
        auth.verify(self.body.as_bytes(), &self.hmac)
    }
}

/// Decode a single line (terminator optional)
pub fn decode(line: &[u8]) -> Result<ReceivedEnvelope, CodecError> {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    let line = line.strip_suffix(b"\r").unwrap_or(line);

    let envelope: WireEnvelope = serde_json::from_slice(line)?;
    let body = envelope.data.get().to_owned();
    let data: DataBody = serde_json::from_str(&body)?;

    Ok(ReceivedEnvelope {
        pending: envelope.meta.pend,
        hmac: envelope.meta.hmac,
        body,
        data,
    })
}

/// Streaming line decoder
#[derive(Debug, Default)]
pub struct LineDecoder {
    /// Partial line data being accumulated
    buffer: BytesMut,
}

impl LineDecoder {
    /// Create a new line decoder
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(MAX_MESSAGE_SIZE),
        }
    }

    /// Add data to the decoder buffer
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next line from the buffer
    ///
    /// Returns `Ok(None)` when more data is needed. A malformed line is
    /// consumed before its error is returned, so decoding can continue.
    pub fn decode_next(&mut self) -> Result<Option<ReceivedEnvelope>, CodecError> {
        loop {
            let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') else {
                if self.buffer.len() > MAX_MESSAGE_SIZE {
                    self.buffer.clear();
                    return Err(CodecError::LineTooLong);
                }
                return Ok(None);
            };

            let line = self.buffer.split_to(pos + 1);
            if line.len() > MAX_MESSAGE_SIZE {
                return Err(CodecError::MessageTooLarge(line.len()));
            }
            if line.iter().all(|b| b.is_ascii_whitespace()) {
                continue;
            }
            return decode(&line).map(Some);
        }
    }

    /// Get the current buffer length (for debugging)
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }
}
