//! MessagePack framing of outbound records and inbound acknowledgments.
//!
//! An outbound frame is the array `[tag, time, record, {"chunk": id}]`. The
//! collector answers each frame with `{"ack": id}`; with a 24-character id
//! that map always encodes to exactly [`ACK_FRAME_SIZE`] bytes, which is what
//! lets the worker cut acknowledgments out of the byte stream without a
//! length prefix.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64_STANDARD};
use rmp_serde::Serializer;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::flatten::FlatRecord;

/// Size of an encoded acknowledgment (6 bytes overhead + 24 bytes id).
pub const ACK_FRAME_SIZE: usize = 30;

/// Errors raised while encoding frames or decoding acknowledgments.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("failed to encode frame: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("failed to decode ack: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Generate a correlation id: base64 of 16 random bytes (24 characters).
pub fn new_chunk_id() -> String {
    let bytes: [u8; 16] = rand::random();
    BASE64_STANDARD.encode(bytes)
}

#[derive(Serialize)]
struct FrameOptions<'a> {
    chunk: &'a str,
}

#[derive(Serialize, Deserialize)]
struct Ack<'a> {
    #[serde(borrow)]
    ack: std::borrow::Cow<'a, str>,
}

/// An encoded frame together with its correlation id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub chunk: String,
    pub bytes: Vec<u8>,
}

impl Frame {
    /// Encode `record` under `tag` with a fresh correlation id.
    pub fn encode(tag: &str, time: i64, record: &FlatRecord) -> Result<Self, FrameError> {
        let chunk = new_chunk_id();
        let bytes = encode_frame(tag, time, record, &chunk)?;
        Ok(Self { chunk, bytes })
    }
}

/// Encode one outbound frame.
pub fn encode_frame(
    tag: &str,
    time: i64,
    record: &FlatRecord,
    chunk: &str,
) -> Result<Vec<u8>, FrameError> {
    let mut buf = Vec::with_capacity(128);
    (tag, time, record, FrameOptions { chunk })
        .serialize(&mut Serializer::new(&mut buf).with_struct_map())?;
    Ok(buf)
}

/// Decode an acknowledgment and return the acknowledged chunk id.
pub fn decode_ack(packet: &[u8]) -> Result<String, FrameError> {
    let ack: Ack<'_> = rmp_serde::from_slice(packet)?;
    Ok(ack.ack.into_owned())
}

/// Encode an acknowledgment the way the collector does.
pub fn encode_ack(chunk: &str) -> Result<Vec<u8>, FrameError> {
    let mut buf = Vec::with_capacity(ACK_FRAME_SIZE);
    Ack {
        ack: std::borrow::Cow::Borrowed(chunk),
    }
    .serialize(&mut Serializer::new(&mut buf).with_struct_map())?;
    Ok(buf)
}
