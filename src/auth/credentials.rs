// Credential persistence
//
// The credential files are shared by every process using the same directory.
// Concurrent refreshes race and the last writer wins; a process left holding a
// superseded refresh token sees an ordinary refresh failure next time. There is
// no cross-process locking.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::types::Credential;
use crate::error::{ProbeError, Result};

const ACCESS_TOKEN_FILE: &str = "access_token";
const REFRESH_TOKEN_FILE: &str = "refresh_token";

/// Durable storage for the credential pair
pub trait CredentialStore: Send + Sync {
    /// Read the stored credential, or `CredentialNotFound`
    fn load(&self) -> Result<Credential>;

    /// Overwrite the stored credential
    fn save(&self, credential: &Credential) -> Result<()>;

    /// Human readable location, used in messages
    fn location(&self) -> String;
}

/// Two plain text files, `access_token` and `refresh_token`, in one directory
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    dir: PathBuf,
}

impl FileCredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read_token(&self, name: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.dir.join(name)) {
            Ok(content) => {
                let token = content.trim();
                Ok((!token.is_empty()).then(|| token.to_string()))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write via a temp file and rename so readers never see a partial token
    fn write_token(&self, name: &str, token: &str) -> Result<()> {
        let target = self.dir.join(name);
        let tmp = self.dir.join(format!(".{}.tmp", name));

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&tmp)?;
        file.write_all(token.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp, &target)?;
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Credential> {
        let access_token = self
            .read_token(ACCESS_TOKEN_FILE)?
            .ok_or_else(|| ProbeError::CredentialNotFound(self.location()))?;
        let refresh_token = self.read_token(REFRESH_TOKEN_FILE)?;

        tracing::debug!(
            dir = %self.dir.display(),
            has_refresh_token = refresh_token.is_some(),
            "Loaded stored credential"
        );

        Ok(Credential::new(access_token, refresh_token))
    }

    fn save(&self, credential: &Credential) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        self.write_token(ACCESS_TOKEN_FILE, &credential.access_token)?;

        match credential.refresh_token {
            Some(ref refresh_token) => self.write_token(REFRESH_TOKEN_FILE, refresh_token)?,
            None => match fs::remove_file(self.dir.join(REFRESH_TOKEN_FILE)) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            },
        }

        tracing::debug!(dir = %self.dir.display(), "Saved credential");
        Ok(())
    }

    fn location(&self) -> String {
        self.dir.display().to_string()
    }
}

/// In-process store, for embedding and tests
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    credential: Mutex<Option<Credential>>,
    saves: Mutex<usize>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(credential: Credential) -> Self {
        Self {
            credential: Mutex::new(Some(credential)),
            saves: Mutex::new(0),
        }
    }

    /// Number of successful `save` calls
    pub fn save_count(&self) -> usize {
        *self.saves.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current contents without going through `load`
    pub fn snapshot(&self) -> Option<Credential> {
        self.credential
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Credential> {
        self.snapshot()
            .ok_or_else(|| ProbeError::CredentialNotFound(self.location()))
    }

    fn save(&self, credential: &Credential) -> Result<()> {
        *self.credential.lock().unwrap_or_else(|e| e.into_inner()) = Some(credential.clone());
        *self.saves.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_store_missing_is_credential_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("creds"));
        assert!(matches!(
            store.load(),
            Err(ProbeError::CredentialNotFound(_))
        ));
    }

    #[test]
    fn test_file_store_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("creds"));

        let credential = Credential::new("h.p.s", Some("r1".to_string()));
        store.save(&credential).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.access_token, "h.p.s");
        assert_eq!(loaded.refresh_token.as_deref(), Some("r1"));

        let on_disk = fs::read_to_string(dir.path().join("creds/access_token")).unwrap();
        assert_eq!(on_disk, "h.p.s");
    }

    #[test]
    fn test_file_store_trims_whitespace_and_ignores_empty_refresh() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(ACCESS_TOKEN_FILE), "a.b.c\n").unwrap();
        fs::write(dir.path().join(REFRESH_TOKEN_FILE), "  \n").unwrap();

        let store = FileCredentialStore::new(dir.path());
        let loaded = store.load().unwrap();
        assert_eq!(loaded.access_token, "a.b.c");
        assert_eq!(loaded.refresh_token, None);
    }

    #[test]
    fn test_file_store_overwrite_drops_stale_refresh_token() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path());

        store
            .save(&Credential::new("a.b.c", Some("r1".to_string())))
            .unwrap();
        store.save(&Credential::new("d.e.f", None)).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.access_token, "d.e.f");
        assert_eq!(loaded.refresh_token, None);
        assert!(!dir.path().join(REFRESH_TOKEN_FILE).exists());
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryCredentialStore::new();
        assert!(store.load().is_err());

        store.save(&Credential::new("a.b.c", None)).unwrap();
        assert_eq!(store.load().unwrap().access_token, "a.b.c");
        assert_eq!(store.save_count(), 1);
    }
}
