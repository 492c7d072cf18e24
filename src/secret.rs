use std::fmt;

use zeroize::Zeroizing;

/// Secret bytes received from the provisioning server.
///
/// The buffer is wiped when dropped. `Debug` prints only the length.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(Zeroizing<Vec<u8>>);

impl Secret {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn expose(&self) -> &[u8] {
        &self.0
    }

    /// The secret without trailing NUL bytes, for servers that send
    /// C-string secrets such as `"topsecret\0"`.
    pub fn trim_trailing_nul(&self) -> &[u8] {
        let end = self
            .0
            .iter()
            .rposition(|&b| b != 0)
            .map_or(0, |idx| idx + 1);
        &self.0[..end]
    }

    /// Move the bytes out, still wrapped for wiping on drop.
    pub fn into_bytes(self) -> Zeroizing<Vec<u8>> {
        self.0
    }
}

impl From<Vec<u8>> for Secret {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl AsRef<[u8]> for Secret {
    fn as_ref(&self) -> &[u8] {
        self.expose()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret").field("len", &self.len()).finish()
    }
}
