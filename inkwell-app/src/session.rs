//! Session state derived from the stored bearer credential.
//!
//! The credential lives in a [`CredentialStore`] shared by every consumer of the
//! [`SessionGuard`]. Reads never modify it. It is written only by [`SessionGuard::sign_in`]
//! and cleared only by [`SessionGuard::sign_out`] and the forced-expiry path taken when a
//! credential turns out to be dead.

use inkwell_common::model::{
    Id,
    auth::{Claims, Credential, CredentialDecodeError},
    user::{User, UserMarker},
};
use std::{
    env, fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, PoisonError, RwLock},
};
use thiserror::Error;
use time::UtcDateTime;
use tracing::{debug, error, info, warn};

const CREDENTIAL_DIR_NAME: &str = "inkwell";
const CREDENTIAL_FILE_NAME: &str = "credential";

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Error)]
pub enum SessionError {
    #[error("Not logged in")]
    Missing,
    #[error("The session has expired")]
    Expired,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Credential file {} could not be accessed: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },
}

#[derive(Debug, Error)]
pub enum SignInError {
    #[error("The issued credential could not be decoded: {0}")]
    Malformed(#[from] CredentialDecodeError),
    #[error("The issued credential has already expired")]
    Expired,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Result<Option<Credential>, StorageError>;
    fn save(&self, credential: &Credential) -> Result<(), StorageError>;
    fn clear(&self) -> Result<(), StorageError>;
}

#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    credential: RwLock<Option<Credential>>,
}

impl MemoryCredentialStore {
    #[must_use]
    pub fn new(credential: Option<Credential>) -> Self {
        Self {
            credential: RwLock::new(credential),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Option<Credential>, StorageError> {
        Ok(self
            .credential
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, credential: &Credential) -> Result<(), StorageError> {
        *self
            .credential
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(credential.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        *self
            .credential
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

/// Keeps the credential in a single file, readable only by the owner on unix.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// `$XDG_CONFIG_HOME/inkwell/credential`, falling back to `$HOME/.config`.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        let config_home = env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))?;

        Some(
            config_home
                .join(CREDENTIAL_DIR_NAME)
                .join(CREDENTIAL_FILE_NAME),
        )
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> StorageError {
        StorageError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn write(&self, token: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&self.path)?;
        // The open mode only applies to newly created files.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(0o600))?;
        }
        file.write_all(token.as_bytes())
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<Credential>, StorageError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => {
                let token = contents.trim();
                Ok((!token.is_empty()).then(|| Credential::new(token.to_owned())))
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(self.io_error(err)),
        }
    }

    fn save(&self, credential: &Credential) -> Result<(), StorageError> {
        self.write(credential.as_str())
            .map_err(|err| self.io_error(err))
    }

    fn clear(&self) -> Result<(), StorageError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(self.io_error(err)),
        }
    }
}

/// A credential that was live when it was handed out, with the identity it carries.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct LiveSession {
    pub user: User,
    pub credential: Credential,
    pub expires_at: UtcDateTime,
}

#[derive(Clone)]
pub struct SessionGuard {
    store: Arc<dyn CredentialStore>,
}

impl SessionGuard {
    #[must_use]
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    fn load(&self) -> Option<Credential> {
        self.store.load().unwrap_or_else(|err| {
            warn!(error = %err, "Could not read stored credential");
            None
        })
    }

    fn claims(&self) -> Option<Claims> {
        let credential = self.load()?;
        credential
            .decode()
            .inspect_err(|err| debug!(error = %err, "Stored credential is malformed"))
            .ok()
    }

    /// The identity in the stored credential, whether or not it has expired.
    #[must_use]
    pub fn current_identity(&self) -> Option<User> {
        self.claims().map(|claims| claims.user)
    }

    /// Whether `author` is the user the stored credential belongs to.
    #[must_use]
    pub fn owns(&self, author: Id<UserMarker>) -> bool {
        self.current_identity().is_some_and(|user| user.id == author)
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.is_live_at(UtcDateTime::now())
    }

    #[must_use]
    pub fn is_live_at(&self, now: UtcDateTime) -> bool {
        self.claims().is_some_and(|claims| claims.is_live_at(now))
    }

    pub fn require_live(&self) -> Result<LiveSession, SessionError> {
        self.require_live_at(UtcDateTime::now())
    }

    /// Hands out the stored credential if it is live at `now`.
    ///
    /// A dead or undecodable credential is cleared from storage. Either error means the
    /// user has to log in again.
    pub fn require_live_at(&self, now: UtcDateTime) -> Result<LiveSession, SessionError> {
        let credential = self.load().ok_or(SessionError::Missing)?;

        match credential.decode() {
            Ok(claims) if claims.is_live_at(now) => Ok(LiveSession {
                user: claims.user,
                credential,
                expires_at: claims.expires_at,
            }),
            Ok(claims) => {
                info!(user = %claims.user.username, expired_at = ?claims.expires_at, "Session expired");
                self.force_expiry();
                Err(SessionError::Expired)
            }
            Err(err) => {
                warn!(error = %err, "Discarding malformed credential");
                self.force_expiry();
                Err(SessionError::Expired)
            }
        }
    }

    /// Clears the stored credential after it was found or reported dead.
    pub(crate) fn force_expiry(&self) {
        if let Err(err) = self.store.clear() {
            error!(error = %err, "Could not clear expired credential");
        }
    }

    /// Stores a freshly issued credential, provided it decodes and is live.
    pub fn sign_in(&self, credential: &Credential) -> Result<User, SignInError> {
        let claims = credential.decode()?;
        if !claims.is_live_at(UtcDateTime::now()) {
            return Err(SignInError::Expired);
        }

        self.store.save(credential)?;
        info!(user = %claims.user.username, "Signed in");
        Ok(claims.user)
    }

    pub fn sign_out(&self) -> Result<(), StorageError> {
        self.store.clear()
    }
}
