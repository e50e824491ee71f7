// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Packet framing and CBOR helpers.
//!
//! Packet layout:
//!
//! ``MAGIC(4) || VERSION(2) || FLAGS(2) || LENGTH(4) || PAYLOAD || CHECKSUM(32)``
//!
//! * PAYLOAD is a CBOR [`Envelope`]
//! * CHECKSUM = blake3-256 over HEADER (first 12 bytes) || PAYLOAD

use blake3::Hasher;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::Message;

/// Protocol magic constant "XATM".
pub const MAGIC: [u8; 4] = [0x58, 0x41, 0x54, 0x4d];
/// Wire protocol version (big-endian u16).
pub const VERSION: u16 = 0x0001;
/// Reserved flags (zero).
pub const FLAGS: u16 = 0x0000;
/// Header length in bytes.
pub const HEADER_LEN: usize = 12;
/// Checksum length in bytes.
pub const CHECKSUM_LEN: usize = 32;
/// Upper bound on a single payload.
pub const MAX_PAYLOAD: usize = 8 * 1024 * 1024;

/// Framing and codec errors.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Not enough bytes for a full packet yet.
    #[error("incomplete packet")]
    Incomplete,
    /// Header does not start with [`MAGIC`].
    #[error("bad magic")]
    BadMagic,
    /// Header carries an unknown version.
    #[error("unsupported version {0:#06x}")]
    UnsupportedVersion(u16),
    /// Payload exceeds [`MAX_PAYLOAD`].
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),
    /// Checksum does not match header and payload.
    #[error("checksum mismatch")]
    ChecksumMismatch,
    /// Envelope op does not match its payload variant.
    #[error("op mismatch: envelope says {envelope}, payload is {payload}")]
    OpMismatch {
        /// Op carried in the envelope.
        envelope: String,
        /// Op implied by the payload.
        payload: &'static str,
    },
    /// CBOR encoding failed.
    #[error("encode: {0}")]
    Encode(String),
    /// CBOR decoding failed.
    #[error("decode: {0}")]
    Decode(String),
}

/// Envelope carried as the payload of a packet.
///
/// * `op` – operation name, must agree with the payload variant.
/// * `correlation` – ties replies to the request that caused them.
/// * `payload` – the message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Envelope {
    /// Operation name.
    pub op: String,
    /// Request correlation id.
    pub correlation: Uuid,
    /// Message body.
    pub payload: Message,
}

impl Envelope {
    /// Wraps a message under a correlation id.
    pub fn new(correlation: Uuid, payload: Message) -> Self {
        Self {
            op: payload.op_name().to_string(),
            correlation,
            payload,
        }
    }
}

/// Encode to CBOR bytes.
pub fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtoError> {
    let mut out = Vec::new();
    ciborium::ser::into_writer(value, &mut out).map_err(|e| ProtoError::Encode(e.to_string()))?;
    Ok(out)
}

/// Decode from CBOR bytes.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtoError> {
    ciborium::de::from_reader(bytes).map_err(|e| ProtoError::Decode(e.to_string()))
}

fn checksum(header: &[u8], payload: &[u8]) -> [u8; CHECKSUM_LEN] {
    let mut hasher = Hasher::new();
    hasher.update(header);
    hasher.update(payload);
    *hasher.finalize().as_bytes()
}

/// Validates a 12-byte header and returns the payload length it announces.
pub fn payload_len(header: &[u8]) -> Result<usize, ProtoError> {
    if header.len() < HEADER_LEN {
        return Err(ProtoError::Incomplete);
    }
    if header[0..4] != MAGIC {
        return Err(ProtoError::BadMagic);
    }
    let version = u16::from_be_bytes([header[4], header[5]]);
    if version != VERSION {
        return Err(ProtoError::UnsupportedVersion(version));
    }
    let len = u32::from_be_bytes([header[8], header[9], header[10], header[11]]) as usize;
    if len > MAX_PAYLOAD {
        return Err(ProtoError::PayloadTooLarge(len));
    }
    Ok(len)
}

/// Total packet length announced by a header.
pub fn frame_len(header: &[u8]) -> Result<usize, ProtoError> {
    Ok(HEADER_LEN + payload_len(header)? + CHECKSUM_LEN)
}

/// Encode an envelope into a full packet.
pub fn encode_envelope(env: &Envelope) -> Result<Vec<u8>, ProtoError> {
    let payload = to_cbor(env)?;
    if payload.len() > MAX_PAYLOAD {
        return Err(ProtoError::PayloadTooLarge(payload.len()));
    }
    let mut header = [0u8; HEADER_LEN];
    header[0..4].copy_from_slice(&MAGIC);
    header[4..6].copy_from_slice(&VERSION.to_be_bytes());
    header[6..8].copy_from_slice(&FLAGS.to_be_bytes());
    // bounded by MAX_PAYLOAD
    header[8..12].copy_from_slice(&(payload.len() as u32).to_be_bytes());
    let sum = checksum(&header, &payload);

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len() + CHECKSUM_LEN);
    out.extend_from_slice(&header);
    out.extend_from_slice(&payload);
    out.extend_from_slice(&sum);
    Ok(out)
}

/// Decode a packet, returning the envelope and bytes consumed.
pub fn decode_envelope(bytes: &[u8]) -> Result<(Envelope, usize), ProtoError> {
    let total = frame_len(bytes)?;
    if bytes.len() < total {
        return Err(ProtoError::Incomplete);
    }
    let header = &bytes[..HEADER_LEN];
    let payload = &bytes[HEADER_LEN..total - CHECKSUM_LEN];
    if checksum(header, payload) != bytes[total - CHECKSUM_LEN..total] {
        return Err(ProtoError::ChecksumMismatch);
    }
    let env: Envelope = from_cbor(payload)?;
    if env.op != env.payload.op_name() {
        return Err(ProtoError::OpMismatch {
            envelope: env.op,
            payload: env.payload.op_name(),
        });
    }
    Ok((env, total))
}

/// Encode a message under a correlation id.
pub fn encode_message(msg: Message, correlation: Uuid) -> Result<Vec<u8>, ProtoError> {
    encode_envelope(&Envelope::new(correlation, msg))
}

/// Decode bytes into `(message, correlation, bytes_consumed)`.
pub fn decode_message(bytes: &[u8]) -> Result<(Message, Uuid, usize), ProtoError> {
    let (env, used) = decode_envelope(bytes)?;
    Ok((env.payload, env.correlation, used))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::{CommitRequest, Pid, ResourceId, XaFlags, Xid};

    fn commit() -> Message {
        Message::Commit(CommitRequest {
            trid: Xid::create(),
            process: Pid(42),
            flags: XaFlags::NO_FLAGS,
            involved: vec![ResourceId::Local(1)],
        })
    }

    #[test]
    fn packet_round_trips_and_reports_length() {
        let msg = commit();
        let id = Uuid::new_v4();
        let bytes = encode_message(msg.clone(), id).unwrap();
        assert_eq!(&bytes[0..4], &MAGIC);
        assert_eq!(frame_len(&bytes[..HEADER_LEN]).unwrap(), bytes.len());

        let (decoded, correlation, used) = decode_message(&bytes).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(correlation, id);
        assert_eq!(used, bytes.len());
    }

    #[test]
    fn two_packets_back_to_back_decode_in_order() {
        let mut bytes = encode_message(Message::State, Uuid::nil()).unwrap();
        bytes.extend(encode_message(Message::Shutdown, Uuid::nil()).unwrap());
        let (first, _, used) = decode_message(&bytes).unwrap();
        let (second, _, _) = decode_message(&bytes[used..]).unwrap();
        assert_eq!(first, Message::State);
        assert_eq!(second, Message::Shutdown);
    }

    #[test]
    fn truncated_packet_is_incomplete() {
        let bytes = encode_message(commit(), Uuid::nil()).unwrap();
        assert!(matches!(
            decode_message(&bytes[..bytes.len() - 1]),
            Err(ProtoError::Incomplete)
        ));
        assert!(matches!(
            decode_message(&bytes[..4]),
            Err(ProtoError::Incomplete)
        ));
    }

    #[test]
    fn corrupted_payload_fails_checksum() {
        let mut bytes = encode_message(commit(), Uuid::nil()).unwrap();
        bytes[HEADER_LEN + 2] ^= 0xff;
        assert!(matches!(
            decode_message(&bytes),
            Err(ProtoError::ChecksumMismatch)
        ));
    }

    #[test]
    fn bad_magic_and_version_are_rejected() {
        let mut bytes = encode_message(Message::State, Uuid::nil()).unwrap();
        bytes[0] = b'J';
        assert!(matches!(decode_message(&bytes), Err(ProtoError::BadMagic)));

        let mut bytes = encode_message(Message::State, Uuid::nil()).unwrap();
        bytes[5] = 9;
        assert!(matches!(
            decode_message(&bytes),
            Err(ProtoError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn op_must_match_payload() {
        let env = Envelope {
            op: "commit".into(),
            correlation: Uuid::nil(),
            payload: Message::Shutdown,
        };
        let bytes = encode_envelope(&env).unwrap();
        assert!(matches!(
            decode_envelope(&bytes),
            Err(ProtoError::OpMismatch { .. })
        ));
    }
}
