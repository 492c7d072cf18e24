pub mod codec;

use bytes::{BufMut, BytesMut};

use crate::error::FrameError;

/// Length prefix size in bytes (`u32`, big-endian).
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default maximum payload size: 32 MiB.
pub const MAX_PAYLOAD_SIZE: u32 = 32 * 1024 * 1024;

/// Marker sent by the client to ask for the bootstrap secret.
pub const SECRET_REQUEST_MARKER: &[u8] = b"SECRET_PROVISION_RA_TLS_REQUEST_V1";

/// Append one length-prefixed frame to `dst`.
pub fn encode_frame(payload: &[u8], max_payload_size: u32, dst: &mut BytesMut) -> Result<(), FrameError> {
    if payload.len() as u64 > u64::from(max_payload_size) {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len() as u64,
            max: max_payload_size,
        });
    }
    dst.reserve(LENGTH_PREFIX_SIZE + payload.len());
    dst.put_u32(payload.len() as u32);
    dst.put_slice(payload);
    Ok(())
}
