/// The kind of quote carried in the peer certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvidenceKind {
    /// Intel SGX quote (RA-TLS extension `1.2.840.113741.1.13.1`).
    SgxQuote,
    /// Intel TDX quote (extension `1.2.840.113741.1.5.5.1.6`).
    TdxQuote,
}

/// Raw attestation evidence (opaque to the provisioning protocol).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evidence {
    pub kind: EvidenceKind,
    /// Raw quote bytes, exactly as embedded in the certificate extension.
    pub raw: Vec<u8>,
}

impl Evidence {
    pub fn new(kind: EvidenceKind, raw: Vec<u8>) -> Self {
        Self { kind, raw }
    }
}

/// The result of a successful attestation verification.
#[derive(Debug, Clone)]
pub struct VerifiedAttestation {
    pub kind: EvidenceKind,

    /// SHA-256 of the raw evidence, for logging and auditing.
    pub evidence_hash: [u8; 32],

    /// Measurement registers reported by the verifier (platform-specific,
    /// opaque to this crate).
    pub measurements: Vec<Vec<u8>>,
}
