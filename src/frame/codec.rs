use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::{encode_frame, LENGTH_PREFIX_SIZE};
use crate::error::FrameError;

/// Upper bound on how much buffer space a single decode call reserves while
/// waiting for a payload, so a hostile length prefix cannot force one huge
/// allocation up front.
const MAX_RESERVE_PER_DECODE: usize = 64 * 1024;

/// Tokio codec for length-prefixed frames.
#[derive(Debug)]
pub struct LengthPrefixCodec {
    /// Declared length of the frame being assembled, once its prefix is parsed.
    current_len: Option<u32>,
    /// Maximum accepted payload size (enforced on both encode and decode).
    max_payload_size: u32,
}

impl Default for LengthPrefixCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl LengthPrefixCodec {
    pub fn new() -> Self {
        Self::with_max_payload_size(super::MAX_PAYLOAD_SIZE)
    }

    /// Create a codec with a custom maximum payload size.
    pub fn with_max_payload_size(max_payload_size: u32) -> Self {
        Self {
            current_len: None,
            max_payload_size,
        }
    }

    pub fn max_payload_size(&self) -> u32 {
        self.max_payload_size
    }

    /// Declared length of a partially received frame, if any.
    pub fn pending_len(&self) -> Option<u32> {
        self.current_len
    }
}

impl Decoder for LengthPrefixCodec {
    type Item = BytesMut;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let len = match self.current_len {
            Some(len) => len,
            None => {
                if src.len() < LENGTH_PREFIX_SIZE {
                    return Ok(None);
                }
                let len = src.get_u32();
                if len > self.max_payload_size {
                    return Err(FrameError::PayloadTooLarge {
                        size: u64::from(len),
                        max: self.max_payload_size,
                    });
                }
                len
            }
        };

        let payload_len = len as usize;
        if src.len() < payload_len {
            let missing = payload_len - src.len();
            src.reserve(missing.min(MAX_RESERVE_PER_DECODE));
            self.current_len = Some(len);
            return Ok(None);
        }

        self.current_len = None;
        Ok(Some(src.split_to(payload_len)))
    }
}

impl<'a> Encoder<&'a [u8]> for LengthPrefixCodec {
    type Error = FrameError;

    fn encode(&mut self, payload: &'a [u8], dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_frame(payload, self.max_payload_size, dst)
    }
}
