pub mod extension;
pub mod types;

#[cfg(feature = "mock")]
pub mod mock;

use async_trait::async_trait;

use crate::error::AttestError;
use types::{Evidence, VerifiedAttestation};

/// Verifier for the evidence embedded in the server's certificate.
///
/// Implementations own the whole verification policy (quote signature,
/// collateral, measurement allow-lists, freshness). The provisioning client
/// only extracts the evidence and refuses the channel when this returns an
/// error.
#[async_trait]
pub trait AttestationVerifier: Send + Sync {
    /// Verify `evidence` and check that it is bound to `public_key`, the DER
    /// SubjectPublicKeyInfo of the certificate that carried it.
    async fn verify(
        &self,
        evidence: &Evidence,
        public_key: &[u8],
    ) -> Result<VerifiedAttestation, AttestError>;
}
