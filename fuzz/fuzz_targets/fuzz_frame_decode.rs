#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use tokio_util::codec::Decoder;

use secret_prov_client::frame::codec::LengthPrefixCodec;

fuzz_target!(|data: &[u8]| {
    // Small limit so the fuzzer reaches both the accept and reject paths.
    let mut codec = LengthPrefixCodec::with_max_payload_size(4096);
    let mut buf = BytesMut::from(data);

    loop {
        match codec.decode(&mut buf) {
            Ok(Some(frame)) => assert!(frame.len() <= 4096),
            Ok(None) => break,
            Err(_) => break,
        }
    }
});
