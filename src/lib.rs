pub mod attestation;
pub mod blocking;
pub mod error;
pub mod frame;
pub mod secret;
pub mod session;
pub mod state;
pub mod transfer;
pub mod transport;

// Re-export key types at crate root for convenience.
pub use error::{AttestError, Error, Result, TransferError};
pub use secret::Secret;
pub use session::{start, Endpoint, ProvisionSession, SessionConfig, SessionStatus};
pub use state::{teardown, was_constructor_provisioned};

pub use attestation::types::{Evidence, EvidenceKind, VerifiedAttestation};
pub use attestation::AttestationVerifier;

#[cfg(feature = "mock")]
pub use attestation::mock::{mock_quote, MockVerifier, RejectingVerifier};
