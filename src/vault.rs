//! Session cache of CA passphrases.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{PkiError, Result};
use crate::policy::CaRole;

/// A CA private key passphrase. The backing memory is wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Passphrase(String);

impl Passphrase {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Equality without early exit on the first differing byte.
    pub fn matches(&self, other: &Passphrase) -> bool {
        let (a, b) = (self.0.as_bytes(), other.0.as_bytes());
        a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Passphrase(***)")
    }
}

type Entries = Arc<Mutex<BTreeMap<CaRole, Passphrase>>>;

fn wipe(entries: &Entries) {
    let mut entries = entries.lock();
    if entries.is_empty() {
        return;
    }
    for secret in entries.values_mut() {
        secret.zeroize();
    }
    entries.clear();
    debug!("passphrase vault cleared");
}

/// Maps each CA to its passphrase for the lifetime of one session.
///
/// Entries are set once; replacing one requires [`PassphraseVault::forget`]
/// first. Everything is zeroized by [`PassphraseVault::clear_all`], by a
/// [`VaultWipe`] handle and on drop. The map is locked only for the
/// duration of a single call, never while an operator is being prompted.
#[derive(Default)]
pub struct PassphraseVault {
    entries: Entries,
}

impl PassphraseVault {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of the cached passphrase for `ca`.
    pub fn get(&self, ca: CaRole) -> Option<Passphrase> {
        self.entries.lock().get(&ca).cloned()
    }

    pub fn set(&mut self, ca: CaRole, secret: Passphrase) -> Result<()> {
        if secret.is_blank() {
            return Err(PkiError::EmptyPassphrase);
        }
        let mut entries = self.entries.lock();
        if entries.contains_key(&ca) {
            return Err(PkiError::PassphraseAlreadySet { ca });
        }
        entries.insert(ca, secret);
        debug!(%ca, "cached passphrase");
        Ok(())
    }

    /// Wipes and removes a single entry.
    pub fn forget(&mut self, ca: CaRole) {
        if let Some(mut secret) = self.entries.lock().remove(&ca) {
            secret.zeroize();
        }
    }

    pub fn clear_all(&mut self) {
        wipe(&self.entries);
    }

    /// A handle that can clear this vault from another thread, e.g. a
    /// signal handler, while the session still holds the vault.
    pub fn wipe_handle(&self) -> VaultWipe {
        VaultWipe {
            entries: Arc::clone(&self.entries),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl fmt::Debug for PassphraseVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cached: Vec<CaRole> = self.entries.lock().keys().copied().collect();
        f.debug_struct("PassphraseVault")
            .field("cached", &cached)
            .finish()
    }
}

/// Clears the [`PassphraseVault`] it was taken from.
#[derive(Clone)]
pub struct VaultWipe {
    entries: Entries,
}

impl VaultWipe {
    pub fn wipe(&self) {
        wipe(&self.entries);
    }
}

impl fmt::Debug for VaultWipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("VaultWipe")
    }
}

impl Drop for PassphraseVault {
    fn drop(&mut self) {
        self.clear_all();
    }
}
