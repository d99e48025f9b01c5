//! Cookie-backed token storage
//!
//! [`TokenStore`] is a thin key/value wrapper with cookie semantics: values
//! may carry an expiry, expired values read as absent, and a missing key is a
//! perfectly valid state. No validation happens here.

use crate::cookies::{CookieOptions, MAX_COOKIE_LIFETIME};
use crate::error::CoreResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::warn;

/// Process-wide session storage
pub trait TokenStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str, options: CookieOptions);

    fn remove(&self, key: &str);

    /// Options a live cookie was written with
    fn options(&self, key: &str) -> Option<CookieOptions>;

    /// Remove every key in `keys`
    fn clear(&self, keys: &[&str]) {
        for key in keys {
            self.remove(key);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredCookie {
    value: String,
    options: CookieOptions,
    expires_at: Option<DateTime<Utc>>,
}

impl StoredCookie {
    fn new(value: &str, options: CookieOptions, now: DateTime<Utc>) -> Self {
        let expires_at = options.expires.and_then(|lifetime| {
            let lifetime = chrono::Duration::from_std(lifetime.min(MAX_COOKIE_LIFETIME)).ok()?;
            now.checked_add_signed(lifetime)
        });
        Self {
            value: value.to_string(),
            options,
            expires_at,
        }
    }

    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
struct CookieJar {
    cookies: HashMap<String, StoredCookie>,
}

impl CookieJar {
    fn get(&self, key: &str, now: DateTime<Utc>) -> Option<&StoredCookie> {
        self.cookies.get(key).filter(|cookie| cookie.is_live(now))
    }

    fn insert(&mut self, key: &str, value: &str, options: CookieOptions, now: DateTime<Utc>) {
        self.cookies
            .insert(key.to_string(), StoredCookie::new(value, options, now));
    }

    fn remove(&mut self, key: &str) -> bool {
        self.cookies.remove(key).is_some()
    }

    /// Copy of the persistent, unexpired cookies
    fn persistent(&self, now: DateTime<Utc>) -> Self {
        let cookies = self
            .cookies
            .iter()
            .filter(|(_, cookie)| cookie.expires_at.is_some() && cookie.is_live(now))
            .map(|(key, cookie)| (key.clone(), cookie.clone()))
            .collect();
        Self { cookies }
    }
}

fn lock(jar: &Mutex<CookieJar>) -> MutexGuard<'_, CookieJar> {
    jar.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory cookie jar scoped to the current process
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    jar: Mutex<CookieJar>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live cookies
    pub fn len(&self) -> usize {
        let now = Utc::now();
        lock(&self.jar)
            .cookies
            .values()
            .filter(|cookie| cookie.is_live(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.jar)
            .get(key, Utc::now())
            .map(|cookie| cookie.value.clone())
    }

    fn set(&self, key: &str, value: &str, options: CookieOptions) {
        lock(&self.jar).insert(key, value, options, Utc::now());
    }

    fn remove(&self, key: &str) {
        lock(&self.jar).remove(key);
    }

    fn options(&self, key: &str) -> Option<CookieOptions> {
        lock(&self.jar)
            .get(key, Utc::now())
            .map(|cookie| cookie.options.clone())
    }
}

/// Cookie jar persisted as JSON.
///
/// Session cookies live in memory only, so they vanish with the process just
/// like browser session cookies do; persistent cookies are written through to
/// disk on every change.
///
/// The write-through is a small synchronous file write done while the jar
/// lock is held, so the file always reflects the latest change. Each write
/// goes to an owner-only temp file that is renamed over the jar.
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    jar: Mutex<CookieJar>,
}

impl FileTokenStore {
    /// Open the jar at `path`, starting empty if the file does not exist yet
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed
    pub fn open(path: impl Into<PathBuf>) -> CoreResult<Self> {
        let path = path.into();
        let jar = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => CookieJar::default(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            path,
            jar: Mutex::new(jar),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, jar: &CookieJar) -> CoreResult<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let mut file = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut file, &jar.persistent(Utc::now()))?;

        // Owner read/write only, the jar holds refresh tokens
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o600))?;
        }

        file.persist(&self.path).map_err(|err| err.error)?;
        Ok(())
    }

    fn write_through(&self, jar: &CookieJar) {
        if let Err(err) = self.persist(jar) {
            warn!(path = %self.path.display(), error = %err, "Failed to persist cookie jar");
        }
    }
}

impl TokenStore for FileTokenStore {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.jar)
            .get(key, Utc::now())
            .map(|cookie| cookie.value.clone())
    }

    fn set(&self, key: &str, value: &str, options: CookieOptions) {
        let mut jar = lock(&self.jar);
        jar.insert(key, value, options, Utc::now());
        self.write_through(&jar);
    }

    fn remove(&self, key: &str) {
        let mut jar = lock(&self.jar);
        if jar.remove(key) {
            self.write_through(&jar);
        }
    }

    fn options(&self, key: &str) -> Option<CookieOptions> {
        lock(&self.jar)
            .get(key, Utc::now())
            .map(|cookie| cookie.options.clone())
    }
}
