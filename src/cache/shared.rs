//! Process-wide token cache shared between acquisition flows.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::store::CacheStore;
use super::token_cache::TokenCache;
use crate::error::CacheError;

/// A [`TokenCache`] bound to its persistent store.
///
/// Mutations and the flush that follows them run under a single lock
/// acquisition, so concurrent acquisitions never lose an update and the
/// caller only observes success once the store write has completed.
pub struct SharedTokenCache {
    cache: Mutex<TokenCache>,
    store: Arc<dyn CacheStore>,
}

impl SharedTokenCache {
    /// Load the cache from `store`.
    ///
    /// Corrupt data is logged and replaced by an empty cache; read failures
    /// are returned.
    pub fn open(store: Arc<dyn CacheStore>) -> Result<Self, CacheError> {
        let cache = match store.read()? {
            None => TokenCache::new(),
            Some(bytes) => match TokenCache::load(&bytes) {
                Ok(cache) => cache,
                Err(e) => {
                    warn!("Ignoring unreadable token cache, starting empty: {}", e);
                    TokenCache::new()
                }
            },
        };

        info!(
            "Token cache opened with {} account(s)",
            cache.accounts().count()
        );

        Ok(Self {
            cache: Mutex::new(cache),
            store,
        })
    }

    /// Run a read-only closure against the cache.
    pub async fn read<R>(&self, f: impl FnOnce(&TokenCache) -> R) -> R {
        let cache = self.cache.lock().await;
        f(&cache)
    }

    /// Mutate the cache and persist the result before releasing the lock.
    ///
    /// If the write fails the in-memory change is kept and the cache stays
    /// dirty so a later flush can retry.
    pub async fn update<R>(&self, f: impl FnOnce(&mut TokenCache) -> R) -> Result<R, CacheError> {
        let mut cache = self.cache.lock().await;
        let result = f(&mut cache);
        flush_locked(&mut cache, self.store.as_ref())?;
        Ok(result)
    }

    /// Persist pending changes. Returns whether a write happened.
    pub async fn flush(&self) -> Result<bool, CacheError> {
        let mut cache = self.cache.lock().await;
        flush_locked(&mut cache, self.store.as_ref())
    }

    /// Serialized form of the current in-memory state.
    pub async fn snapshot(&self) -> Result<Vec<u8>, CacheError> {
        self.cache.lock().await.serialize()
    }

    pub async fn has_unsaved_changes(&self) -> bool {
        self.cache.lock().await.has_state_changed()
    }
}

fn flush_locked(cache: &mut TokenCache, store: &dyn CacheStore) -> Result<bool, CacheError> {
    if !cache.has_state_changed() {
        return Ok(false);
    }

    let bytes = cache.serialize()?;
    if let Err(e) = store.write(&bytes) {
        warn!("Token cache write failed, keeping changes in memory: {}", e);
        return Err(e);
    }
    cache.mark_persisted();

    debug!("Token cache persisted ({} bytes)", bytes.len());
    Ok(true)
}
