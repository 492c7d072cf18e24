//! Thread-blocking provisioning session for callers without an async
//! runtime.
//!
//! Each [`BlockingSession`] owns a current-thread tokio runtime and drives
//! every operation to completion on the calling thread. It must not be used
//! from inside another tokio runtime.

use tokio::runtime::{Builder, Runtime};

use crate::attestation::AttestationVerifier;
use crate::error::{Error, Result};
use crate::secret::Secret;
use crate::session::{ProvisionSession, SessionConfig, SessionStatus};

pub struct BlockingSession {
    inner: ProvisionSession,
    runtime: Runtime,
}

impl BlockingSession {
    /// Create an unstarted session.
    pub fn new(config: SessionConfig) -> Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(Error::Runtime)?;
        Ok(Self {
            inner: ProvisionSession::new(config),
            runtime,
        })
    }

    /// Create a session and establish it in one call.
    pub fn connect(config: SessionConfig, verifier: &dyn AttestationVerifier) -> Result<Self> {
        let mut session = Self::new(config)?;
        session.start(verifier)?;
        Ok(session)
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.status()
    }

    pub fn start(&mut self, verifier: &dyn AttestationVerifier) -> Result<()> {
        self.runtime.block_on(self.inner.start(verifier))
    }

    pub fn get_bootstrap_secret(&mut self) -> Result<Secret> {
        self.runtime.block_on(self.inner.get_bootstrap_secret())
    }

    pub fn write(&mut self, payload: &[u8]) -> Result<usize> {
        self.runtime.block_on(self.inner.write(payload))
    }

    pub fn read(&mut self, expected_max_len: usize) -> Result<Secret> {
        self.runtime.block_on(self.inner.read(expected_max_len))
    }

    pub fn read_exact(&mut self, len: usize) -> Result<Secret> {
        self.runtime.block_on(self.inner.read_exact(len))
    }

    pub fn exchange(&mut self, payload: &[u8], expected_max_len: usize) -> Result<Secret> {
        self.runtime
            .block_on(self.inner.exchange(payload, expected_max_len))
    }

    /// Idempotent; see [`ProvisionSession::close`].
    pub fn close(&mut self) {
        self.runtime.block_on(self.inner.close());
    }

    /// The async session, for operations not mirrored here.
    pub fn parts_mut(&mut self) -> (&Runtime, &mut ProvisionSession) {
        (&self.runtime, &mut self.inner)
    }
}

impl Drop for BlockingSession {
    fn drop(&mut self) {
        if self.inner.status() == SessionStatus::Established {
            self.runtime.block_on(self.inner.close());
        }
    }
}

impl std::fmt::Debug for BlockingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingSession")
            .field("session", &self.inner)
            .finish_non_exhaustive()
    }
}
