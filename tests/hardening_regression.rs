//! Regression tests for frame decoding under hostile input.
//!
//! These tests prevent reintroduction of:
//! 1. Unbounded codec reserve() from attacker-controlled length prefixes
//! 2. Encoders emitting frames the peer must reject
//! 3. Codec state leaking across frames after a partial read

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder};

use secret_prov_client::error::FrameError;
use secret_prov_client::frame::codec::LengthPrefixCodec;
use secret_prov_client::frame::{MAX_PAYLOAD_SIZE, SECRET_REQUEST_MARKER};

// ---------------------------------------------------------------------------
// Fix 1: Codec reserve() caps at 64 KB per decode call
// ---------------------------------------------------------------------------

/// A large declared length must not cause a single allocation proportional
/// to it.
#[test]
fn codec_reserve_capped_under_large_length_prefix() {
    let mut codec = LengthPrefixCodec::new();

    let mut buf = BytesMut::new();
    buf.put_u32(8 * 1024 * 1024); // 8 MB, no payload bytes yet
    let cap_before = buf.capacity();

    let result = codec.decode(&mut buf).unwrap();
    assert!(result.is_none(), "should return None waiting for payload");
    assert_eq!(codec.pending_len(), Some(8 * 1024 * 1024));

    let reserved = buf.capacity().saturating_sub(cap_before);
    assert!(
        reserved <= 80_000, // 64 KB + some allocator overhead
        "codec reserved {reserved} bytes, expected ≤ ~64 KB"
    );
}

#[test]
fn codec_reserve_incremental_across_multiple_calls() {
    let mut codec = LengthPrefixCodec::new();
    let payload_len = 200 * 1024;

    let mut buf = BytesMut::new();
    buf.put_u32(payload_len as u32);
    assert!(codec.decode(&mut buf).unwrap().is_none());

    let chunk = vec![0xAB; 50 * 1024];
    for _ in 0..3 {
        buf.extend_from_slice(&chunk);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    buf.extend_from_slice(&chunk);
    let frame = codec.decode(&mut buf).unwrap().unwrap();
    assert_eq!(frame.len(), payload_len);
    assert_eq!(codec.pending_len(), None);
}

#[test]
fn oversized_prefix_rejected_before_buffering() {
    let mut codec = LengthPrefixCodec::with_max_payload_size(1024);
    let mut buf = BytesMut::new();
    buf.put_u32(1025);

    let err = codec.decode(&mut buf).unwrap_err();
    assert!(matches!(
        err,
        FrameError::PayloadTooLarge {
            size: 1025,
            max: 1024
        }
    ));
}

// ---------------------------------------------------------------------------
// Fix 2: Encoders refuse what decoders would reject
// ---------------------------------------------------------------------------

#[test]
fn encoder_rejects_payload_over_max() {
    let mut codec = LengthPrefixCodec::with_max_payload_size(16);
    let mut buf = BytesMut::new();
    let err = codec.encode(&[0u8; 17][..], &mut buf).unwrap_err();
    assert!(matches!(err, FrameError::PayloadTooLarge { .. }));
    assert!(buf.is_empty(), "nothing may be written on failure");
}

#[test]
fn frame_at_max_payload_size_succeeds() {
    let max = 4096;
    let mut codec = LengthPrefixCodec::with_max_payload_size(max);
    let mut buf = BytesMut::new();
    codec.encode(&vec![7u8; max as usize][..], &mut buf).unwrap();
    let frame = codec.decode(&mut buf).unwrap().unwrap();
    assert_eq!(frame.len(), max as usize);
}

#[test]
fn default_limit_is_32_mib() {
    assert_eq!(MAX_PAYLOAD_SIZE, 32 * 1024 * 1024);
    assert_eq!(LengthPrefixCodec::new().max_payload_size(), MAX_PAYLOAD_SIZE);
}

// ---------------------------------------------------------------------------
// Fix 3: Stream decoding keeps frame boundaries
// ---------------------------------------------------------------------------

#[tokio::test]
async fn multiple_frames_over_duplex() {
    let (mut client, mut server) = tokio::io::duplex(8192);

    let payloads: Vec<Vec<u8>> = vec![
        SECRET_REQUEST_MARKER.to_vec(),
        b"topsecret\0".to_vec(),
        Vec::new(),
        b"MORE".to_vec(),
        b"AB".to_vec(),
    ];

    let to_send = payloads.clone();
    let write_handle = tokio::spawn(async move {
        let mut codec = LengthPrefixCodec::new();
        for payload in &to_send {
            let mut buf = BytesMut::new();
            codec.encode(&payload[..], &mut buf).unwrap();
            client.write_all(&buf).await.unwrap();
        }
        client.shutdown().await.unwrap();
    });

    let mut codec = LengthPrefixCodec::new();
    let mut read_buf = BytesMut::with_capacity(16);
    let mut decoded = Vec::new();
    loop {
        let n = server.read_buf(&mut read_buf).await.unwrap();
        while let Some(frame) = codec.decode(&mut read_buf).unwrap() {
            decoded.push(frame.to_vec());
        }
        if n == 0 {
            break;
        }
    }

    write_handle.await.unwrap();
    assert_eq!(decoded, payloads);
    assert!(read_buf.is_empty());
    assert_eq!(codec.pending_len(), None);
}
