#![no_main]

use libfuzzer_sys::fuzz_target;

use secret_prov_client::attestation::extension::extract_evidence;

fuzz_target!(|data: &[u8]| {
    // Server certificates are untrusted input until verified.
    if let Ok(found) = extract_evidence(data) {
        assert!(!found.evidence.raw.is_empty());
    }
});
