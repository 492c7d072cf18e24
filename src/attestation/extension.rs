//! Locating attestation evidence inside an RA-TLS certificate.

use x509_parser::prelude::*;

use super::types::{Evidence, EvidenceKind};
use crate::error::AttestError;

/// RA-TLS extension carrying an SGX quote.
pub const SGX_QUOTE_OID: &str = "1.2.840.113741.1.13.1";

/// RA-TLS extension carrying a TDX quote.
pub const TDX_QUOTE_OID: &str = "1.2.840.113741.1.5.5.1.6";

/// Map an extension OID (dotted form) to the evidence it carries.
pub fn evidence_kind(oid: &str) -> Option<EvidenceKind> {
    match oid {
        SGX_QUOTE_OID => Some(EvidenceKind::SgxQuote),
        TDX_QUOTE_OID => Some(EvidenceKind::TdxQuote),
        _ => None,
    }
}

/// Evidence pulled out of a certificate, together with the key it must be
/// bound to.
#[derive(Debug, Clone)]
pub struct CertificateEvidence {
    pub evidence: Evidence,
    /// DER SubjectPublicKeyInfo of the certificate.
    pub public_key: Vec<u8>,
}

fn parse(cert_der: &[u8]) -> Result<X509Certificate<'_>, AttestError> {
    let (rest, cert) = X509Certificate::from_der(cert_der)
        .map_err(|e| AttestError::MalformedCertificate(e.to_string()))?;
    if !rest.is_empty() {
        return Err(AttestError::MalformedCertificate(format!(
            "{} trailing bytes after certificate",
            rest.len()
        )));
    }
    Ok(cert)
}

/// DER SubjectPublicKeyInfo of a certificate.
pub fn subject_public_key_info(cert_der: &[u8]) -> Result<Vec<u8>, AttestError> {
    let cert = parse(cert_der)?;
    Ok(cert.public_key().raw.to_vec())
}

/// Extract the first recognised evidence extension from a DER certificate.
pub fn extract_evidence(cert_der: &[u8]) -> Result<CertificateEvidence, AttestError> {
    let cert = parse(cert_der)?;

    let evidence = cert
        .extensions()
        .iter()
        .find_map(|ext| {
            evidence_kind(&ext.oid.to_id_string())
                .map(|kind| Evidence::new(kind, ext.value.to_vec()))
        })
        .ok_or(AttestError::MissingEvidence)?;

    if evidence.raw.is_empty() {
        return Err(AttestError::VerificationFailed(
            "evidence extension is empty".into(),
        ));
    }

    Ok(CertificateEvidence {
        evidence,
        public_key: cert.public_key().raw.to_vec(),
    })
}
