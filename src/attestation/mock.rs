use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::types::{Evidence, VerifiedAttestation};
use super::AttestationVerifier;
use crate::error::AttestError;

const MOCK_QUOTE_MAGIC: &[u8] = b"MOCK_QUOTE_V1\0";

/// Build a mock quote bound to `public_key` (a DER SubjectPublicKeyInfo).
///
/// Layout: magic, SHA-256 of the public key, then an arbitrary measurement
/// blob reported back by [`MockVerifier`].
pub fn mock_quote(public_key: &[u8], measurement: &[u8]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(MOCK_QUOTE_MAGIC.len() + 32 + measurement.len());
    raw.extend_from_slice(MOCK_QUOTE_MAGIC);
    raw.extend_from_slice(&Sha256::digest(public_key));
    raw.extend_from_slice(measurement);
    raw
}

/// Mock attestation verifier for testing. Accepts quotes produced by
/// [`mock_quote`] whose key hash matches the certificate key.
///
/// # Security Warning
///
/// This verifier performs **zero cryptographic verification** of any TEE
/// quote and must never be used in production. Enable it only via
/// `features = ["mock"]` for development and testing.
#[derive(Debug, Default)]
pub struct MockVerifier;

impl MockVerifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AttestationVerifier for MockVerifier {
    async fn verify(
        &self,
        evidence: &Evidence,
        public_key: &[u8],
    ) -> Result<VerifiedAttestation, AttestError> {
        let raw = &evidence.raw;

        let body = raw.strip_prefix(MOCK_QUOTE_MAGIC).ok_or_else(|| {
            AttestError::VerificationFailed("not a mock quote".to_string())
        })?;
        if body.len() < 32 {
            return Err(AttestError::VerificationFailed(
                "truncated mock quote".to_string(),
            ));
        }

        let (key_hash, measurement) = body.split_at(32);
        let expected: [u8; 32] = Sha256::digest(public_key).into();
        if key_hash != expected.as_slice() {
            return Err(AttestError::PublicKeyMismatch);
        }

        Ok(VerifiedAttestation {
            kind: evidence.kind,
            evidence_hash: Sha256::digest(raw).into(),
            measurements: if measurement.is_empty() {
                Vec::new()
            } else {
                vec![measurement.to_vec()]
            },
        })
    }
}

/// Verifier whose policy rejects every quote.
#[derive(Debug, Default)]
pub struct RejectingVerifier;

#[async_trait]
impl AttestationVerifier for RejectingVerifier {
    async fn verify(
        &self,
        _evidence: &Evidence,
        _public_key: &[u8],
    ) -> Result<VerifiedAttestation, AttestError> {
        Err(AttestError::VerificationFailed(
            "policy rejects all evidence".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attestation::types::EvidenceKind;

    #[tokio::test]
    async fn mock_roundtrip() {
        let key = b"spki-der";
        let evidence = Evidence::new(EvidenceKind::SgxQuote, mock_quote(key, b"mrenclave"));

        let verified = MockVerifier::new().verify(&evidence, key).await.unwrap();
        assert_eq!(verified.kind, EvidenceKind::SgxQuote);
        assert_eq!(verified.measurements, vec![b"mrenclave".to_vec()]);
    }

    #[tokio::test]
    async fn mock_rejects_other_key() {
        let evidence = Evidence::new(EvidenceKind::SgxQuote, mock_quote(b"key-a", b""));
        let err = MockVerifier::new()
            .verify(&evidence, b"key-b")
            .await
            .unwrap_err();
        assert!(matches!(err, AttestError::PublicKeyMismatch));
    }

    #[tokio::test]
    async fn mock_rejects_invalid() {
        let evidence = Evidence::new(EvidenceKind::TdxQuote, b"INVALID".to_vec());
        assert!(MockVerifier::new().verify(&evidence, b"k").await.is_err());

        let truncated = Evidence::new(EvidenceKind::TdxQuote, MOCK_QUOTE_MAGIC.to_vec());
        assert!(MockVerifier::new().verify(&truncated, b"k").await.is_err());
    }

    #[tokio::test]
    async fn rejecting_verifier_rejects() {
        let evidence = Evidence::new(EvidenceKind::SgxQuote, mock_quote(b"k", b""));
        assert!(RejectingVerifier.verify(&evidence, b"k").await.is_err());
    }
}
