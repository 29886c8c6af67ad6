//! Token Blacklist Store (C4, spec.md §4.4): tracks revoked token ids
//! (`jti`) so a refresh/access token can be invalidated before it expires
//! naturally. Fails closed by default — a lookup error is treated as
//! "revoked" unless `TOKEN_BLACKLIST_FAIL_OPEN` overrides it
//! (spec.md §6.4, §9).
//!
//! C4 is specified as a persistent revocation set that survives a process
//! restart (spec.md §4.4, §8 invariant 8). [`FileBlacklist`] is that
//! implementation; [`InMemoryBlacklist`] exists solely as the test double
//! (spec.md §9: "an in-memory implementation is acceptable for tests but
//! not production").

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Storage backend for revoked token ids. Object-safe so
/// [`crate::auth::gate::AuthGate`] can be built against any implementation.
pub trait BlacklistStore: Send + Sync {
    /// Mark `jti` revoked for `ttl` (normally the token's remaining lifetime;
    /// no point outliving a token that would expire naturally anyway).
    fn revoke(&self, jti: &str, ttl: Duration);

    /// `Ok(true)` if `jti` is revoked, `Ok(false)` if known-good, `Err` if
    /// the store itself failed to answer (e.g. a remote store timing out).
    fn is_revoked(&self, jti: &str) -> Result<bool, String>;

    /// Best-effort count of live entries, for diagnostics only.
    fn len_hint(&self) -> usize;
}

/// In-process blacklist with per-entry TTL. Process-local: restarting the
/// orchestrator forgets all revocations. This is the test double only —
/// [`FileBlacklist`] is the persistent implementation `AuthGate` should be
/// wired against in production.
#[derive(Default)]
pub struct InMemoryBlacklist {
    entries: DashMap<String, Instant>,
}

impl InMemoryBlacklist {
    pub fn new() -> Self {
        Self::default()
    }

    fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, expires_at| *expires_at > now);
    }
}

impl BlacklistStore for InMemoryBlacklist {
    fn revoke(&self, jti: &str, ttl: Duration) {
        self.entries.insert(jti.to_string(), Instant::now() + ttl);
    }

    fn is_revoked(&self, jti: &str) -> Result<bool, String> {
        match self.entries.get(jti) {
            Some(expires_at) => Ok(*expires_at > Instant::now()),
            None => Ok(false),
        }
    }

    fn len_hint(&self) -> usize {
        self.purge_expired();
        self.entries.len()
    }
}

#[derive(Default, Serialize, Deserialize)]
struct PersistedEntries {
    entries: HashMap<String, DateTime<Utc>>,
}

/// File-backed blacklist: the whole entry set is read into memory on
/// [`FileBlacklist::open`] and rewritten to disk after every mutation, so
/// revocations survive a process restart (spec.md §4.4, §8 invariant 8).
/// Suitable for a single-process deployment; a multi-process deployment
/// would need the file replaced with a shared external store behind the
/// same [`BlacklistStore`] trait.
pub struct FileBlacklist {
    path: PathBuf,
    entries: DashMap<String, DateTime<Utc>>,
    write_lock: Mutex<()>,
}

impl FileBlacklist {
    /// Opens (creating if absent) the blacklist file at `path` and loads
    /// any entries already persisted there.
    pub fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let entries = Self::load(&path)?;
        let store = Self {
            path,
            entries: entries.into_iter().collect(),
            write_lock: Mutex::new(()),
        };
        store.purge_expired();
        Ok(store)
    }

    fn load(path: &Path) -> std::io::Result<HashMap<String, DateTime<Utc>>> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Ok(serde_json::from_str::<PersistedEntries>(&raw)
                .map(|persisted| persisted.entries)
                .unwrap_or_default()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(err) => Err(err),
        }
    }

    fn purge_expired(&self) {
        let now = Utc::now();
        self.entries.retain(|_, expires_at| *expires_at > now);
    }

    fn persist(&self) {
        let snapshot = PersistedEntries {
            entries: self.entries.iter().map(|e| (e.key().clone(), *e.value())).collect(),
        };
        let _guard = self.write_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match serde_json::to_string(&snapshot) {
            Ok(raw) => {
                if let Err(err) = std::fs::write(&self.path, raw) {
                    tracing::warn!(path = %self.path.display(), %err, "failed to persist token blacklist");
                }
            }
            Err(err) => tracing::warn!(%err, "failed to serialize token blacklist"),
        }
    }
}

impl BlacklistStore for FileBlacklist {
    fn revoke(&self, jti: &str, ttl: Duration) {
        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero());
        self.entries.insert(jti.to_string(), expires_at);
        self.persist();
    }

    fn is_revoked(&self, jti: &str) -> Result<bool, String> {
        match self.entries.get(jti) {
            Some(expires_at) => Ok(*expires_at > Utc::now()),
            None => Ok(false),
        }
    }

    fn len_hint(&self) -> usize {
        self.purge_expired();
        self.entries.len()
    }
}
