//! On-disk layout of the hierarchy.
//!
//! ```text
//! <base>/root/
//! <base>/intermediate/<role>/
//!     private/ca.key.pem    certs/ca.cert.pem    certs/ca-chain.cert.pem
//!     certs/<artifact>.{key,cert,csr,fullchain}.pem
//!     index    serial    crl/    newcerts/
//! ```

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{PkiError, Result};
use crate::policy::CaRole;

const KEY_MODE: u32 = 0o400;
const CERT_MODE: u32 = 0o444;
const DIR_MODE: u32 = 0o700;

const CA_STEM: &str = "ca";
const CHAIN_STEM: &str = "ca-chain";

/// Whether an issued bundle named `name` would land on the CA's own files.
pub fn is_reserved_artifact(name: &str) -> bool {
    name == CA_STEM || name == CHAIN_STEM
}

/// Paths belonging to one CA directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaPaths {
    dir: PathBuf,
}

impl CaPaths {
    pub fn new(base_dir: &Path, role: CaRole) -> Self {
        let dir = if role.is_root() {
            base_dir.join("root")
        } else {
            base_dir.join("intermediate").join(role.dir_name())
        };
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn private_dir(&self) -> PathBuf {
        self.dir.join("private")
    }

    pub fn certs_dir(&self) -> PathBuf {
        self.dir.join("certs")
    }

    pub fn key_file(&self) -> PathBuf {
        self.private_dir().join(format!("{CA_STEM}.key.pem"))
    }

    pub fn cert_file(&self) -> PathBuf {
        self.certs_dir().join(format!("{CA_STEM}.cert.pem"))
    }

    pub fn chain_file(&self) -> PathBuf {
        self.certs_dir().join(format!("{CHAIN_STEM}.cert.pem"))
    }

    pub fn index_file(&self) -> PathBuf {
        self.dir.join("index")
    }

    pub fn serial_file(&self) -> PathBuf {
        self.dir.join("serial")
    }

    pub fn artifact(&self, name: &str) -> ArtifactPaths {
        let certs = self.certs_dir();
        ArtifactPaths {
            key: certs.join(format!("{name}.key.pem")),
            cert: certs.join(format!("{name}.cert.pem")),
            csr: certs.join(format!("{name}.csr.pem")),
            fullchain: certs.join(format!("{name}.fullchain.pem")),
        }
    }

    /// Whether the CA's key, certificate, chain and ledger are all present.
    pub fn is_complete(&self) -> bool {
        [
            self.key_file(),
            self.cert_file(),
            self.chain_file(),
            self.index_file(),
        ]
        .iter()
        .all(|path| path.is_file())
    }

    /// Creates the directory skeleton, including the `crl` and `newcerts` scratch dirs.
    pub fn create_layout(&self) -> Result<()> {
        for dir in [
            self.dir.clone(),
            self.private_dir(),
            self.certs_dir(),
            self.dir.join("crl"),
            self.dir.join("newcerts"),
        ] {
            fs::create_dir_all(&dir).map_err(|e| PkiError::storage(&dir, e))?;
        }
        set_mode(&self.private_dir(), DIR_MODE)?;
        debug!(dir = %self.dir.display(), "created CA directory layout");
        Ok(())
    }

    pub fn remove(&self) -> Result<()> {
        remove_tree(&self.dir)
    }
}

/// The four files making up an issued bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub key: PathBuf,
    pub cert: PathBuf,
    pub csr: PathBuf,
    pub fullchain: PathBuf,
}

impl ArtifactPaths {
    pub fn all(&self) -> [&Path; 4] {
        [&self.key, &self.cert, &self.csr, &self.fullchain]
    }

    pub fn any_exists(&self) -> bool {
        self.all().iter().any(|path| path.exists())
    }

    /// Deletes whichever of the four files exist.
    pub fn remove_all(&self) -> Result<()> {
        for path in self.all() {
            match fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "removed artifact"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(PkiError::storage(path, e)),
            }
        }
        Ok(())
    }
}

/// Writes `contents` next to `path` and renames it into place.
///
/// Readers see either the old file or the new one, never a torn write.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = temp_path(path);
    let result = (|| -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();
    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(PkiError::storage(path, e));
    }
    Ok(())
}

/// Private key material, owner read-only.
pub fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    write_atomic(path, contents)?;
    set_mode(path, KEY_MODE)
}

/// Certificates, CSRs and chains, read-only for everyone.
pub fn write_public(path: &Path, contents: &[u8]) -> Result<()> {
    write_atomic(path, contents)?;
    set_mode(path, CERT_MODE)
}

pub fn read_to_string(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| PkiError::storage(path, e))
}

pub fn remove_tree(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => {
            debug!(dir = %dir.display(), "removed directory");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(PkiError::storage(dir, e)),
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|e| PkiError::storage(path, e))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_paths() {
        let base = Path::new("/srv/pki");
        assert_eq!(CaPaths::new(base, CaRole::Root).dir(), Path::new("/srv/pki/root"));
        let people = CaPaths::new(base, CaRole::People);
        assert_eq!(people.dir(), Path::new("/srv/pki/intermediate/people"));
        assert_eq!(
            people.key_file(),
            Path::new("/srv/pki/intermediate/people/private/ca.key.pem")
        );
        assert_eq!(
            people.artifact("fritz_meier").fullchain,
            Path::new("/srv/pki/intermediate/people/certs/fritz_meier.fullchain.pem")
        );
    }

    #[test]
    fn test_reserved_artifacts_are_the_ca_files() {
        let paths = CaPaths::new(Path::new("/srv/pki"), CaRole::DomainServer);
        for name in ["ca", "ca-chain"] {
            assert!(is_reserved_artifact(name));
            let artifact = paths.artifact(name);
            assert!(artifact.cert == paths.cert_file() || artifact.cert == paths.chain_file());
        }
        assert!(!is_reserved_artifact("ca.example.com"));
        assert!(!is_reserved_artifact("cab"));
    }

    #[test]
    fn test_write_atomic_replaces_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "two");
        assert!(!dir.path().join("index.tmp").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_modes() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let key = dir.path().join("ca.key.pem");
        let cert = dir.path().join("ca.cert.pem");
        write_private(&key, b"secret").unwrap();
        write_public(&cert, b"public").unwrap();
        assert_eq!(fs::metadata(&key).unwrap().permissions().mode() & 0o777, 0o400);
        assert_eq!(fs::metadata(&cert).unwrap().permissions().mode() & 0o777, 0o444);
    }

    #[test]
    fn test_remove_all_tolerates_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let paths = CaPaths::new(dir.path(), CaRole::Device);
        paths.create_layout().unwrap();
        let artifact = paths.artifact("sensor");
        fs::write(&artifact.cert, "x").unwrap();
        assert!(artifact.any_exists());
        artifact.remove_all().unwrap();
        assert!(!artifact.any_exists());
    }
}
