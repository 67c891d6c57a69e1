//! The backend contract and the write-through cache transport.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use reqwest::Method;

use crate::error::Result;
use crate::key::CacheKeyFn;
use crate::response::{HitOrMiss, ResponseEnvelope};
use crate::transport::Transport;

/// A single cached record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    /// The fingerprint the record is stored under
    pub key: String,
    /// The stored wire-format response bytes
    pub value: Vec<u8>,
}

/// Something that can store and retrieve to and from a cache. The backend
/// owns the TTL applied at set time.
///
/// A `get` error means "miss" to callers: absent, unreachable and corrupt
/// are deliberately indistinguishable through this interface. Writes may be
/// eventually visible; read-your-writes across processes is not promised.
#[async_trait]
pub trait Cacher: Send + Sync + 'static {
    /// Attempts to pull a record from the cache.
    async fn get(&self, key: &str) -> Result<Option<Item>>;
    /// Persists a record.
    async fn set(&self, item: Item) -> Result<()>;
}

/// A transport that short-circuits repeat requests from a shared response
/// cache and populates it on misses without delaying the caller.
pub struct CacheTransport<C: Cacher> {
    inner: Arc<dyn Transport>,
    cacher: Arc<C>,
    cache_key: CacheKeyFn,
}

impl<C: Cacher> fmt::Debug for CacheTransport<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheTransport")
            .field("cache_key", &"Fn(&Request) -> Result<String>")
            .finish_non_exhaustive()
    }
}

impl<C: Cacher> CacheTransport<C> {
    /// Wraps `inner` with the cache backed by `cacher`, keyed by
    /// `cache_key`.
    pub fn new(
        inner: Arc<dyn Transport>,
        cacher: C,
        cache_key: CacheKeyFn,
    ) -> Self {
        Self { inner, cacher: Arc::new(cacher), cache_key }
    }

    async fn lookup(&self, key: &str) -> Option<ResponseEnvelope> {
        let item = match self.cacher.get(key).await {
            Ok(Some(item)) => item,
            Ok(None) => return None,
            Err(err) => {
                tracing::debug!(key, error = %err, "cache get failed");
                return None;
            }
        };
        match ResponseEnvelope::from_wire(&item.value) {
            Ok(res) => Some(res),
            Err(err) => {
                // a corrupt record is a miss; the fresh write will replace it
                tracing::warn!(key, error = %err, "error reading response from cache");
                None
            }
        }
    }
}

#[async_trait]
impl<C: Cacher> Transport for CacheTransport<C> {
    async fn round_trip(
        &self,
        req: reqwest::Request,
    ) -> Result<ResponseEnvelope> {
        let cacheable =
            req.method() == Method::GET || req.method() == Method::HEAD;
        let key = if cacheable {
            match (self.cache_key)(&req) {
                Ok(key) => Some(key),
                Err(err) => {
                    // no identity, no key; bypassing beats a broader key
                    // that could leak one caller's response to another
                    tracing::debug!(error = %err, "request not cacheable");
                    None
                }
            }
        } else {
            None
        };

        let Some(key) = key else {
            return self.inner.round_trip(req).await;
        };

        if let Some(mut hit) = self.lookup(&key).await {
            hit.cache_lookup_status(HitOrMiss::HIT);
            hit.cache_status(HitOrMiss::HIT);
            return Ok(hit);
        }
        tracing::debug!(
            key = %key,
            method = %req.method(),
            url = %req.url(),
            "cache miss"
        );

        let mut res = self.inner.round_trip(req).await?;

        // fork before stamping: the stored copy carries exactly what the
        // upstream sent, not the per-request cache markers
        let cache_copy = res.clone();
        let cacher = Arc::clone(&self.cacher);
        tokio::spawn(async move {
            match cache_copy.to_wire() {
                Ok(value) => {
                    if let Err(err) = cacher.set(Item { key, value }).await {
                        tracing::warn!(error = %err, "cache set failed");
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "could not encode response for cache");
                }
            }
        });

        res.cache_lookup_status(HitOrMiss::MISS);
        res.cache_status(HitOrMiss::MISS);
        Ok(res)
    }
}
