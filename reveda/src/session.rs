//! Local session persistence.
//!
//! The session lives under three keys (`accessToken`, `refreshToken`, `user`). [`SessionStore`]
//! is the only writer of those keys: it keeps an in-memory snapshot behind a lock and pushes the
//! whole record to a [`SessionBackend`] on every change, so readers never see a half-written
//! session.

use crate::models::{AuthTokens, Session, UserRecord};
use anyhow::{anyhow, Context};
pub use anyhow::Result;
use log::debug;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock};

/// Persisted form of the session. Field names are the storage keys.
#[allow(non_snake_case)]
#[derive(Default, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StoredSession {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accessToken: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refreshToken: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserRecord>,
}

// tokens are never printed
impl std::fmt::Debug for StoredSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredSession")
            .field("accessToken", &self.accessToken.as_ref().map(|_| "<redacted>"))
            .field("refreshToken", &self.refreshToken.as_ref().map(|_| "<redacted>"))
            .field("user", &self.user.as_ref().map(|u| &u.email))
            .finish()
    }
}

impl StoredSession {
    /// A local check only: is there a non-empty access token?
    pub fn is_authenticated(&self) -> bool {
        self.accessToken.as_deref().map_or(false, |t| !t.is_empty())
    }

    /// The complete session, or `None` if any part is missing.
    pub fn session(&self) -> Option<Session> {
        match (&self.accessToken, &self.refreshToken, &self.user) {
            (Some(access), Some(refresh), Some(user)) if !access.is_empty() => Some(Session {
                accessToken: access.clone(),
                refreshToken: refresh.clone(),
                user: user.clone(),
            }),
            _ => None,
        }
    }
}

/// Somewhere to keep the session between runs.
pub trait SessionBackend: Send + Sync {
    /// Returns an empty session if nothing has been saved yet.
    fn load(&self) -> Result<StoredSession>;
    /// Replaces the whole persisted record.
    fn save(&self, session: &StoredSession) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// Keeps the session in process memory only; eg, for tests or one-shot scripts.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    inner: Mutex<StoredSession>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Default::default()
    }
}

impl SessionBackend for MemoryBackend {
    fn load(&self) -> Result<StoredSession> {
        Ok(self.inner.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn save(&self, session: &StoredSession) -> Result<()> {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = session.clone();
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = StoredSession::default();
        Ok(())
    }
}

/// JSON file on disk, readable only by the owner (0600 on unix).
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        FileBackend {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl SessionBackend for FileBackend {
    fn load(&self) -> Result<StoredSession> {
        if !self.path.exists() {
            return Ok(StoredSession::default());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read session from {}", self.path.display()))?;
        if contents.trim().is_empty() {
            return Ok(StoredSession::default());
        }
        serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse session from {}", self.path.display()))
    }

    fn save(&self, session: &StoredSession) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create directory {}", parent.display()))?;
            }
        }
        let contents =
            serde_json::to_string_pretty(session).context("failed to serialize session")?;

        // write next to the target, then rename over it
        let tmp = self.tmp_path();
        let mut opts = OpenOptions::new();
        opts.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(0o600);
        }
        let mut file = opts
            .open(&tmp)
            .with_context(|| format!("failed to open {} for writing", tmp.display()))?;
        file.write_all(contents.as_bytes())
            .with_context(|| format!("failed to write to {}", tmp.display()))?;
        file.sync_all()?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to move session into {}", self.path.display()))?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(anyhow!(e).context(format!("failed to remove {}", self.path.display()))),
        }
    }
}

fn check_tokens(tokens: &AuthTokens) -> Result<()> {
    if tokens.accessToken.is_empty() || tokens.refreshToken.is_empty() {
        return Err(anyhow!("refusing to store an empty token"));
    }
    Ok(())
}

/// Single owner of the persisted session.
///
/// Reads are served from the snapshot; every write goes through the backend first and only
/// replaces the snapshot once the backend accepted it.
pub struct SessionStore {
    backend: Box<dyn SessionBackend>,
    state: RwLock<StoredSession>,
}

impl SessionStore {
    /// Loads whatever the backend has persisted.
    pub fn open<B: SessionBackend + 'static>(backend: B) -> Result<Self> {
        let state = backend.load()?;
        debug!("session store opened: {:?}", state);
        Ok(SessionStore {
            backend: Box::new(backend),
            state: RwLock::new(state),
        })
    }

    pub fn in_memory() -> Self {
        SessionStore {
            backend: Box::new(MemoryBackend::new()),
            state: RwLock::new(StoredSession::default()),
        }
    }

    /// Consistent copy of all three keys.
    pub fn snapshot(&self) -> StoredSession {
        self.state.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn access_token(&self) -> Option<String> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.accessToken.clone().filter(|t| !t.is_empty())
    }

    pub fn refresh_token(&self) -> Option<String> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.refreshToken.clone().filter(|t| !t.is_empty())
    }

    pub fn current_user(&self) -> Option<UserRecord> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.user.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_authenticated()
    }

    fn commit<F>(&self, update: F) -> Result<StoredSession>
    where
        F: FnOnce(&mut StoredSession) -> Result<()>,
    {
        // held across the backend write so concurrent writers serialize
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = state.clone();
        update(&mut next)?;
        self.backend.save(&next)?;
        *state = next.clone();
        Ok(next)
    }

    /// Stores tokens and user record as one unit. On failure nothing changes.
    pub fn establish(&self, tokens: &AuthTokens, user: &UserRecord) -> Result<Session> {
        check_tokens(tokens)?;
        let next = self.commit(|s| {
            s.accessToken = Some(tokens.accessToken.clone());
            s.refreshToken = Some(tokens.refreshToken.clone());
            s.user = Some(user.clone());
            Ok(())
        })?;
        next.session()
            .ok_or(anyhow!("session incomplete after write"))
    }

    pub fn replace_tokens(&self, tokens: &AuthTokens) -> Result<()> {
        check_tokens(tokens)?;
        self.commit(|s| {
            s.accessToken = Some(tokens.accessToken.clone());
            s.refreshToken = Some(tokens.refreshToken.clone());
            Ok(())
        })?;
        Ok(())
    }

    /// Updates the cached user of the current session. Refused once the session is gone (eg, a
    /// logout raced with the request that produced `user`).
    pub fn replace_user(&self, user: &UserRecord) -> Result<()> {
        self.commit(|s| {
            if !s.is_authenticated() {
                return Err(anyhow!("no session to attach the user record to"));
            }
            s.user = Some(user.clone());
            Ok(())
        })?;
        Ok(())
    }

    /// Forgets the session. The in-memory state is always cleared, even if the backend fails.
    pub fn clear(&self) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        *state = StoredSession::default();
        self.backend.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    fn user(email: &str) -> UserRecord {
        UserRecord {
            id: "64f0c2a1b2c3d4e5f6a7b8c9".to_string(),
            firstName: "Asha".to_string(),
            lastName: "Rao".to_string(),
            email: email.to_string(),
            phoneNumber: "9876543210".to_string(),
            role: Role::Patient,
            isVerified: true,
            profilePicture: None,
            createdAt: "2024-01-05T10:00:00.000Z".to_string(),
            updatedAt: "2024-01-05T10:00:00.000Z".to_string(),
        }
    }

    fn tokens(n: u32) -> AuthTokens {
        AuthTokens {
            accessToken: format!("access-{n}"),
            refreshToken: format!("refresh-{n}"),
        }
    }

    /// Accepts loads, refuses every write.
    struct ReadOnlyBackend;

    impl SessionBackend for ReadOnlyBackend {
        fn load(&self) -> Result<StoredSession> {
            Ok(StoredSession::default())
        }
        fn save(&self, _session: &StoredSession) -> Result<()> {
            Err(anyhow!("disk full"))
        }
        fn clear(&self) -> Result<()> {
            Err(anyhow!("disk full"))
        }
    }

    #[test]
    fn establish_and_clear() {
        let store = SessionStore::in_memory();
        assert!(!store.is_authenticated());
        assert_eq!(store.current_user(), None);

        let session = store.establish(&tokens(1), &user("user@example.com")).unwrap();
        assert_eq!(session.accessToken, "access-1");
        assert_eq!(session.user.email, "user@example.com");
        assert!(store.is_authenticated());
        assert_eq!(store.refresh_token().as_deref(), Some("refresh-1"));
        assert_eq!(store.snapshot().session(), Some(session));

        store.replace_tokens(&tokens(2)).unwrap();
        assert_eq!(store.access_token().as_deref(), Some("access-2"));
        assert_eq!(store.current_user().unwrap().email, "user@example.com");

        store.clear().unwrap();
        assert!(!store.is_authenticated());
        assert_eq!(store.current_user(), None);
        assert_eq!(store.snapshot(), StoredSession::default());

        // clearing twice is fine
        store.clear().unwrap();
    }

    #[test]
    fn failed_write_leaves_state_alone() {
        let store = SessionStore::open(ReadOnlyBackend).unwrap();
        assert!(store.establish(&tokens(1), &user("user@example.com")).is_err());
        assert!(!store.is_authenticated());
        assert_eq!(store.current_user(), None);

        // clear reports the backend failure but still forgets the in-memory session
        assert!(store.clear().is_err());
        assert!(!store.is_authenticated());
    }

    #[test]
    fn establish_rejects_empty_tokens() {
        let store = SessionStore::in_memory();
        store.establish(&tokens(1), &user("user@example.com")).unwrap();
        let blank = AuthTokens {
            accessToken: "".to_string(),
            refreshToken: "refresh-2".to_string(),
        };
        assert!(store.establish(&blank, &user("other@example.com")).is_err());
        assert!(store.replace_tokens(&blank).is_err());
        assert_eq!(store.access_token().as_deref(), Some("access-1"));
        assert_eq!(store.current_user().unwrap().email, "user@example.com");
    }

    #[test]
    fn replace_user_after_clear_is_refused() {
        let store = SessionStore::in_memory();
        store.establish(&tokens(1), &user("user@example.com")).unwrap();
        // eg, logout while a profile picture upload is still in flight
        store.clear().unwrap();

        assert!(store.replace_user(&user("user@example.com")).is_err());
        assert!(!store.is_authenticated());
        assert_eq!(store.current_user(), None);
        assert_eq!(store.snapshot(), StoredSession::default());

        // with a live session it goes through
        store.establish(&tokens(2), &user("user@example.com")).unwrap();
        store.replace_user(&user("renamed@example.com")).unwrap();
        assert_eq!(store.current_user().unwrap().email, "renamed@example.com");
        assert_eq!(store.access_token().as_deref(), Some("access-2"));
    }

    #[test]
    fn empty_access_token_is_not_a_session() {
        let stored = StoredSession {
            accessToken: Some("".to_string()),
            refreshToken: Some("refresh-1".to_string()),
            user: Some(user("user@example.com")),
        };
        assert!(!stored.is_authenticated());
        assert_eq!(stored.session(), None);

        let partial = StoredSession {
            accessToken: Some("access-1".to_string()),
            ..Default::default()
        };
        assert!(partial.is_authenticated());
        assert_eq!(partial.session(), None);
    }

    #[test]
    fn debug_output_hides_tokens() {
        let stored = StoredSession {
            accessToken: Some("secret-access".to_string()),
            refreshToken: Some("secret-refresh".to_string()),
            user: None,
        };
        let out = format!("{:?}", stored);
        assert!(!out.contains("secret"));
    }

    #[test]
    fn file_backend_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");

        let store = SessionStore::open(FileBackend::new(&path)).unwrap();
        assert!(!store.is_authenticated());
        store.establish(&tokens(7), &user("user@example.com")).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["accessToken"], "access-7");
        assert_eq!(raw["refreshToken"], "refresh-7");
        assert_eq!(raw["user"]["email"], "user@example.com");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        // a second store (eg, the next CLI invocation) sees the same session
        let reopened = SessionStore::open(FileBackend::new(&path)).unwrap();
        assert_eq!(reopened.snapshot(), store.snapshot());

        reopened.clear().unwrap();
        assert!(!path.exists());
        let again = SessionStore::open(FileBackend::new(&path)).unwrap();
        assert!(!again.is_authenticated());
    }

    #[test]
    fn file_backend_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        fs::write(&path, "{not json").unwrap();
        assert!(SessionStore::open(FileBackend::new(&path)).is_err());

        fs::write(&path, "").unwrap();
        assert!(!SessionStore::open(FileBackend::new(&path))
            .unwrap()
            .is_authenticated());
    }
}
