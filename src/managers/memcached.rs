use std::fmt;

use async_trait::async_trait;
use rsmc_core::client::{ClientConfig, NoCompressor};
use rsmc_tokio::Pool;

use crate::cache::{Cacher, Item};
use crate::error::{Error, Result};

/// Connections kept per memcached endpoint.
const POOL_SIZE: usize = 16;

/// Implements [`Cacher`] over a memcached cluster speaking the binary
/// protocol, with keys spread across endpoints by consistent hashing.
pub struct MemcachedCacher {
    pool: Pool<NoCompressor>,
    expiration: u32,
}

impl fmt::Debug for MemcachedCacher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemcachedCacher")
            .field("expiration", &self.expiration)
            .finish_non_exhaustive()
    }
}

impl MemcachedCacher {
    /// Creates a cacher over the given `host:port` endpoints. `expiration`
    /// is the TTL in seconds attached to every set; 0 leaves expiry to the
    /// server. Connections are established on first use, so an unreachable
    /// cluster degrades to misses instead of failing startup.
    pub fn new(hosts: Vec<String>, expiration: u32) -> Self {
        let config = ClientConfig::new_uncompressed(hosts);
        let pool = Pool::builder(config)
            .max_size(POOL_SIZE)
            .build()
            .expect("pool configuration is valid");
        Self { pool, expiration }
    }
}

#[async_trait]
impl Cacher for MemcachedCacher {
    async fn get(&self, key: &str) -> Result<Option<Item>> {
        let mut client = self
            .pool
            .get()
            .await
            .map_err(|err| Error::Cache(err.to_string()))?;
        let value: Option<Vec<u8>> = client
            .get(key.as_bytes())
            .await
            .map_err(|err| Error::Cache(err.to_string()))?;
        Ok(value.map(|value| Item { key: key.to_string(), value }))
    }

    async fn set(&self, item: Item) -> Result<()> {
        let mut client = self
            .pool
            .get()
            .await
            .map_err(|err| Error::Cache(err.to_string()))?;
        client
            .set(item.key.as_bytes(), &item.value, self.expiration)
            .await
            .map_err(|err| Error::Cache(err.to_string()))
    }
}
