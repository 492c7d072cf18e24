//! Process-wide provisioning state.
//!
//! Tracks whether secrets were already provisioned for this process by an
//! earlier start-up phase, holds a bootstrap secret captured by that phase
//! until the application takes it, and caches parsed trust anchors. The CA
//! bundle is re-read on every session start; only an unchanged bundle reuses
//! its parsed store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use rustls::RootCertStore;
use sha2::{Digest, Sha256};

use crate::attestation::AttestationVerifier;
use crate::error::Error;
use crate::secret::Secret;
use crate::session::{handshake, ProvisionSession, SessionConfig};

/// Environment variable signalling that provisioning already ran at start-up.
pub const CONSTRUCTOR_ENV_VAR: &str = "SECRET_PROVISION_CONSTRUCTOR";

/// Accepted truthy values of [`CONSTRUCTOR_ENV_VAR`]. Anything else,
/// including absence, means "not provisioned".
pub fn is_truthy(value: &str) -> bool {
    matches!(value, "1" | "true" | "TRUE")
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Provisioning state shared by every session of a process.
///
/// Use [`global`] in applications; tests build private instances.
#[derive(Debug)]
pub struct ProvisioningState {
    env_var: String,
    /// Environment signal, read once at the first decision point.
    from_env: OnceLock<bool>,
    /// Set by a start-up phase run in this process.
    marked: AtomicBool,
    startup: tokio::sync::Mutex<()>,
    bootstrap_secret: Mutex<Option<Secret>>,
    /// Parsed CA bundles keyed by path, tagged with the SHA-256 of the
    /// file contents they were parsed from.
    trust_anchors: Mutex<HashMap<PathBuf, ([u8; 32], Arc<RootCertStore>)>>,
}

impl Default for ProvisioningState {
    fn default() -> Self {
        Self::new()
    }
}

impl ProvisioningState {
    pub fn new() -> Self {
        Self::with_env_var(CONSTRUCTOR_ENV_VAR)
    }

    /// State reading its provisioning signal from a custom variable.
    pub fn with_env_var(name: impl Into<String>) -> Self {
        Self {
            env_var: name.into(),
            from_env: OnceLock::new(),
            marked: AtomicBool::new(false),
            startup: tokio::sync::Mutex::new(()),
            bootstrap_secret: Mutex::new(None),
            trust_anchors: Mutex::new(HashMap::new()),
        }
    }

    /// State whose signal is fixed up front instead of read from the
    /// environment.
    pub fn from_flag(provisioned: bool) -> Self {
        let state = Self::new();
        let _ = state.from_env.set(provisioned);
        state
    }

    /// Whether an earlier phase already provisioned this process.
    ///
    /// The environment is consulted only on the first call.
    pub fn was_constructor_provisioned(&self) -> bool {
        let from_env = *self.from_env.get_or_init(|| {
            let value = std::env::var(&self.env_var);
            value.as_deref().is_ok_and(is_truthy)
        });
        from_env || self.marked.load(Ordering::Acquire)
    }

    /// Record that provisioning ran. Returns `true` if this call set the flag.
    pub fn mark_provisioned(&self) -> bool {
        !self.marked.swap(true, Ordering::AcqRel)
    }

    /// Keep a secret obtained during start-up until the application takes it.
    /// A previously stored secret is dropped (and wiped).
    pub fn store_bootstrap_secret(&self, secret: Secret) {
        *lock(&self.bootstrap_secret) = Some(secret);
    }

    /// Move the start-up secret out. The state keeps no copy.
    pub fn take_bootstrap_secret(&self) -> Option<Secret> {
        lock(&self.bootstrap_secret).take()
    }

    /// Run the start-up provisioning phase once for this process: attested
    /// connect, bootstrap secret retrieval, close. The secret is kept for
    /// [`take_bootstrap_secret`](Self::take_bootstrap_secret).
    ///
    /// Returns `Ok(false)` without connecting if the process is already
    /// provisioned.
    pub async fn provision_at_startup(
        &self,
        config: SessionConfig,
        verifier: &dyn AttestationVerifier,
    ) -> Result<bool, Error> {
        let _guard = self.startup.lock().await;
        if self.was_constructor_provisioned() {
            tracing::debug!("process already provisioned, skipping start-up provisioning");
            return Ok(false);
        }

        let mut session = ProvisionSession::new(config);
        session.start(verifier).await?;
        let secret = session.get_bootstrap_secret().await;
        session.close().await;

        self.store_bootstrap_secret(secret?);
        self.mark_provisioned();
        tracing::info!("start-up provisioning complete");
        Ok(true)
    }

    /// Current root store for the CA bundle at `path`.
    ///
    /// The file is read on every call, so a rotated or shrunk bundle takes
    /// effect for the next session. Parsing is skipped when the contents are
    /// unchanged.
    pub(crate) async fn trust_anchor(&self, path: &Path) -> Result<Arc<RootCertStore>, Error> {
        let pem = tokio::fs::read(path).await.map_err(|e| Error::TrustAnchor {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let digest: [u8; 32] = Sha256::digest(&pem).into();

        let unchanged = lock(&self.trust_anchors)
            .get(path)
            .filter(|(cached, _)| *cached == digest)
            .map(|(_, roots)| Arc::clone(roots));
        if let Some(roots) = unchanged {
            return Ok(roots);
        }

        let roots = Arc::new(handshake::parse_trust_anchor(path, &pem)?);
        let previous =
            lock(&self.trust_anchors).insert(path.to_path_buf(), (digest, Arc::clone(&roots)));
        if previous.is_some() {
            tracing::info!(path = %path.display(), "trust anchor bundle changed, reloaded");
        }
        Ok(roots)
    }

    /// Number of CA bundles currently cached.
    pub fn cached_trust_anchors(&self) -> usize {
        lock(&self.trust_anchors).len()
    }

    /// Release process-wide resources: wipe a stored start-up secret and
    /// drop cached trust anchors. Safe to call any number of times, also on
    /// a state that was never used. The provisioned flag is kept.
    pub fn teardown(&self) {
        let secret = lock(&self.bootstrap_secret).take();
        let anchors = std::mem::take(&mut *lock(&self.trust_anchors));
        if secret.is_some() || !anchors.is_empty() {
            tracing::debug!(
                had_secret = secret.is_some(),
                trust_anchors = anchors.len(),
                "provisioning state torn down"
            );
        }
    }

    /// Return to the pristine state, including the provisioned flag. The
    /// environment is read again on the next query.
    pub fn reset(&mut self) {
        self.teardown();
        self.from_env = OnceLock::new();
        *self.marked.get_mut() = false;
    }
}

static GLOBAL: OnceLock<ProvisioningState> = OnceLock::new();

/// The state shared by the whole process.
pub fn global() -> &'static ProvisioningState {
    GLOBAL.get_or_init(ProvisioningState::new)
}

/// Whether an earlier phase already provisioned this process; see
/// [`ProvisioningState::was_constructor_provisioned`].
pub fn was_constructor_provisioned() -> bool {
    global().was_constructor_provisioned()
}

/// Release process-wide provisioning resources; see
/// [`ProvisioningState::teardown`]. A no-op if nothing was ever allocated.
pub fn teardown() {
    if let Some(state) = GLOBAL.get() {
        state.teardown();
    }
}
