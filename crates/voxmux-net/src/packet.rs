//! Packet kinds carried inside a frame payload.
//!
//! The first payload byte selects the kind. Message packets large enough to
//! benefit (media bunches, definition lists) are LZ4-compressed; everything
//! else is sent as-is. A disconnect notice tells the remote side that the
//! close was deliberate rather than a dropped connection.

use lz4_flex::{compress_prepend_size, decompress_size_prepended};

/// Uncompressed message bytes follow.
pub const KIND_PLAIN: u8 = 0x00;

/// LZ4-compressed message bytes follow (size-prepended block).
pub const KIND_LZ4: u8 = 0x01;

/// Deliberate disconnect; no further packets follow.
pub const KIND_DISCONNECT: u8 = 0x7F;

/// Controls when message packets are compressed.
#[derive(Debug, Clone)]
pub struct CompressionConfig {
    /// Minimum message size (bytes) before compression is applied. Default: 1024.
    pub threshold: usize,
    /// Whether compression is enabled at all. Default: true.
    pub enabled: bool,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            threshold: 1024,
            enabled: true,
        }
    }
}

/// A decoded packet.
#[derive(Debug, PartialEq, Eq)]
pub enum Packet {
    /// Versioned message bytes, ready for [`crate::messages::decode`].
    Message(Vec<u8>),
    /// The remote side closed the connection on purpose.
    Disconnect,
}

/// Wrap message bytes into a packet payload.
pub fn encode_message(data: &[u8], config: &CompressionConfig) -> Vec<u8> {
    if !config.enabled || data.len() < config.threshold {
        let mut out = Vec::with_capacity(1 + data.len());
        out.push(KIND_PLAIN);
        out.extend_from_slice(data);
        out
    } else {
        let compressed = compress_prepend_size(data);
        let mut out = Vec::with_capacity(1 + compressed.len());
        out.push(KIND_LZ4);
        out.extend_from_slice(&compressed);
        out
    }
}

/// Payload of a disconnect notice.
pub fn encode_disconnect() -> Vec<u8> {
    vec![KIND_DISCONNECT]
}

/// Unwrap a packet payload, decompressing if necessary.
pub fn decode_packet(data: &[u8]) -> Result<Packet, PacketError> {
    let Some((&kind, body)) = data.split_first() else {
        return Err(PacketError::EmptyPayload);
    };

    match kind {
        KIND_PLAIN => Ok(Packet::Message(body.to_vec())),
        KIND_LZ4 => decompress_size_prepended(body)
            .map(Packet::Message)
            .map_err(|e| PacketError::DecompressFailed(e.to_string())),
        KIND_DISCONNECT => Ok(Packet::Disconnect),
        other => Err(PacketError::UnknownKind(other)),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error("empty payload, no packet kind")]
    EmptyPayload,
    #[error("LZ4 decompression failed: {0}")]
    DecompressFailed(String),
    #[error("unknown packet kind: 0x{0:02X}")]
    UnknownKind(u8),
}
