//! Token storage.
//!
//! [`TokenStore`] is the capability set the client uses to read and persist
//! credentials. The default, [`DefaultTokenStore`], keeps the access token in a
//! short-lived [`CookieStore`] and the refresh token in a durable
//! [`KeyValueStore`], both under the configured token names.

#[cfg(not(target_arch = "wasm32"))]
use std::path::{Path, PathBuf};
use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::{JwtHttpError, Result};

/// Storage strategy for the access and refresh tokens.
///
/// Setters must leave the stored value untouched when given an empty string.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait TokenStore: Send + Sync {
    async fn access_token(&self) -> Result<Option<String>>;
    async fn set_access_token(&self, value: &str) -> Result<()>;
    async fn refresh_token(&self) -> Result<Option<String>>;
    async fn set_refresh_token(&self, value: &str) -> Result<()>;
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl<T: TokenStore + ?Sized> TokenStore for Arc<T> {
    async fn access_token(&self) -> Result<Option<String>> {
        (**self).access_token().await
    }

    async fn set_access_token(&self, value: &str) -> Result<()> {
        (**self).set_access_token(value).await
    }

    async fn refresh_token(&self) -> Result<Option<String>> {
        (**self).refresh_token().await
    }

    async fn set_refresh_token(&self, value: &str) -> Result<()> {
        (**self).set_refresh_token(value).await
    }
}

/// Cookie-style storage.
pub trait CookieStore: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;
    fn set(&self, name: &str, value: &str);
}

/// Durable key-value storage.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait KeyValueStore: Send + Sync {
    async fn get_item(&self, name: &str) -> Result<Option<String>>;
    async fn set_item(&self, name: &str, value: &str) -> Result<()>;
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(not(target_arch = "wasm32"))]
type Instant = std::time::Instant;

struct Cookie {
    value: String,
    #[cfg(not(target_arch = "wasm32"))]
    expires_at: Option<Instant>,
}

/// In-process cookie jar, cleared when the process exits.
///
/// With a max-age, cookies expire that long after they were set (native
/// targets only; WASM has no monotonic clock in `std`).
#[derive(Default)]
pub struct MemoryCookieJar {
    cookies: Mutex<HashMap<String, Cookie>>,
    max_age: Option<Duration>,
}

impl MemoryCookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_age(max_age: Duration) -> Self {
        Self {
            cookies: Mutex::default(),
            max_age: Some(max_age),
        }
    }
}

impl fmt::Debug for MemoryCookieJar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = lock_unpoisoned(&self.cookies).keys().cloned().collect();
        f.debug_struct("MemoryCookieJar")
            .field("names", &names)
            .field("max_age", &self.max_age)
            .finish()
    }
}

impl CookieStore for MemoryCookieJar {
    fn get(&self, name: &str) -> Option<String> {
        let mut cookies = lock_unpoisoned(&self.cookies);
        #[cfg(not(target_arch = "wasm32"))]
        {
            let expired = cookies
                .get(name)
                .and_then(|cookie| cookie.expires_at)
                .is_some_and(|at| Instant::now() >= at);
            if expired {
                cookies.remove(name);
                return None;
            }
        }
        cookies.get(name).map(|cookie| cookie.value.clone())
    }

    fn set(&self, name: &str, value: &str) {
        let cookie = Cookie {
            value: value.to_owned(),
            #[cfg(not(target_arch = "wasm32"))]
            // Unrepresentable deadlines never expire.
            expires_at: self.max_age.and_then(|age| Instant::now().checked_add(age)),
        };
        lock_unpoisoned(&self.cookies).insert(name.to_owned(), cookie);
    }
}

/// Non-durable [`KeyValueStore`], mostly useful in tests.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    items: Mutex<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get_item(&self, name: &str) -> Result<Option<String>> {
        Ok(lock_unpoisoned(&self.items).get(name).cloned())
    }

    async fn set_item(&self, name: &str, value: &str) -> Result<()> {
        lock_unpoisoned(&self.items).insert(name.to_owned(), value.to_owned());
        Ok(())
    }
}

/// [`KeyValueStore`] persisted as a JSON object in a single file.
///
/// A missing file reads as empty and is created on the first write. On unix
/// the file is owner-only (`0o600`).
#[cfg(not(target_arch = "wasm32"))]
#[derive(Debug)]
pub struct FileKeyValueStore {
    path: PathBuf,
    guard: tokio::sync::Mutex<()>,
}

#[cfg(not(target_arch = "wasm32"))]
impl FileKeyValueStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<Map<String, Value>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(err) => return Err(self.io_error("read", err)),
        };
        if content.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str(&content) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(JwtHttpError::Storage(format!(
                "{} does not contain a JSON object",
                self.path.display()
            ))),
            Err(err) => Err(JwtHttpError::Storage(format!(
                "failed to parse {}: {err}",
                self.path.display()
            ))),
        }
    }

    async fn write_items(&self, items: Map<String, Value>) -> Result<()> {
        use tokio::io::AsyncWriteExt;

        let content = serde_json::to_string_pretty(&Value::Object(items))
            .map_err(|err| JwtHttpError::Storage(format!("failed to encode store: {err}")))?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|err| {
                JwtHttpError::Storage(format!("failed to create {}: {err}", parent.display()))
            })?;
        }

        let mut file_opts = tokio::fs::OpenOptions::new();
        file_opts.create(true).truncate(true).write(true);
        #[cfg(unix)]
        file_opts.mode(0o600);

        let mut file = file_opts
            .open(&self.path)
            .await
            .map_err(|err| self.io_error("open", err))?;
        // `mode` only applies on creation; tighten files that already existed.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(|err| self.io_error("restrict", err))?;
        }
        file.write_all(content.as_bytes())
            .await
            .map_err(|err| self.io_error("write", err))?;
        file.flush().await.map_err(|err| self.io_error("write", err))
    }

    fn io_error(&self, action: &str, err: std::io::Error) -> JwtHttpError {
        JwtHttpError::Storage(format!("failed to {action} {}: {err}", self.path.display()))
    }
}

#[cfg(not(target_arch = "wasm32"))]
#[async_trait]
impl KeyValueStore for FileKeyValueStore {
    async fn get_item(&self, name: &str) -> Result<Option<String>> {
        let _guard = self.guard.lock().await;
        let items = self.read_all().await?;
        Ok(items
            .get(name)
            .and_then(|value| value.as_str())
            .map(str::to_owned))
    }

    async fn set_item(&self, name: &str, value: &str) -> Result<()> {
        let _guard = self.guard.lock().await;
        let mut items = self.read_all().await?;
        items.insert(name.to_owned(), Value::String(value.to_owned()));
        self.write_items(items).await
    }
}

/// Access token in a cookie store, refresh token in a key-value store.
pub struct DefaultTokenStore<C = MemoryCookieJar, K = MemoryKeyValueStore> {
    cookies: C,
    storage: K,
    access_token_name: String,
    refresh_token_name: String,
}

impl DefaultTokenStore {
    /// In-memory store using the given token names.
    pub fn in_memory(
        access_token_name: impl Into<String>,
        refresh_token_name: impl Into<String>,
    ) -> Self {
        Self::new(
            MemoryCookieJar::new(),
            MemoryKeyValueStore::new(),
            access_token_name,
            refresh_token_name,
        )
    }
}

impl<C, K> DefaultTokenStore<C, K> {
    pub fn new(
        cookies: C,
        storage: K,
        access_token_name: impl Into<String>,
        refresh_token_name: impl Into<String>,
    ) -> Self {
        Self {
            cookies,
            storage,
            access_token_name: access_token_name.into(),
            refresh_token_name: refresh_token_name.into(),
        }
    }

    pub fn cookies(&self) -> &C {
        &self.cookies
    }

    pub fn storage(&self) -> &K {
        &self.storage
    }
}

impl<C, K> fmt::Debug for DefaultTokenStore<C, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultTokenStore")
            .field("access_token_name", &self.access_token_name)
            .field("refresh_token_name", &self.refresh_token_name)
            .finish_non_exhaustive()
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl<C: CookieStore, K: KeyValueStore> TokenStore for DefaultTokenStore<C, K> {
    async fn access_token(&self) -> Result<Option<String>> {
        Ok(self
            .cookies
            .get(&self.access_token_name)
            .filter(|token| !token.is_empty()))
    }

    async fn set_access_token(&self, value: &str) -> Result<()> {
        if !value.is_empty() {
            self.cookies.set(&self.access_token_name, value);
        }
        Ok(())
    }

    async fn refresh_token(&self) -> Result<Option<String>> {
        Ok(self
            .storage
            .get_item(&self.refresh_token_name)
            .await?
            .filter(|token| !token.is_empty()))
    }

    async fn set_refresh_token(&self, value: &str) -> Result<()> {
        if value.is_empty() {
            return Ok(());
        }
        self.storage.set_item(&self.refresh_token_name, value).await
    }
}
