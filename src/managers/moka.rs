use std::{fmt, sync::Arc};

use async_trait::async_trait;
use moka::future::Cache;

use crate::cache::{Cacher, Item};
use crate::error::Result;

/// Implements [`Cacher`] with [`moka`](https://github.com/moka-rs/moka) as
/// an in-process backend. Entry lifetime comes from the cache builder
/// (`Cache::builder().time_to_live(..)`); the default has no expiry.
#[derive(Clone)]
pub struct MokaCacher {
    /// The instance of `moka::future::Cache`
    pub cache: Arc<Cache<String, Arc<Vec<u8>>>>,
}

impl fmt::Debug for MokaCacher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MokaCacher").finish_non_exhaustive()
    }
}

impl Default for MokaCacher {
    fn default() -> Self {
        Self::new(Cache::new(1024))
    }
}

impl MokaCacher {
    /// Create a new cacher from a pre-configured cache
    pub fn new(cache: Cache<String, Arc<Vec<u8>>>) -> Self {
        Self { cache: Arc::new(cache) }
    }

    /// Clears out the entire cache.
    pub async fn clear(&self) -> Result<()> {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
        Ok(())
    }
}

#[async_trait]
impl Cacher for MokaCacher {
    async fn get(&self, key: &str) -> Result<Option<Item>> {
        Ok(self.cache.get(key).await.map(|value| Item {
            key: key.to_string(),
            value: value.to_vec(),
        }))
    }

    async fn set(&self, item: Item) -> Result<()> {
        self.cache.insert(item.key, Arc::new(item.value)).await;
        self.cache.run_pending_tasks().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_returns_what_set_stored() -> Result<()> {
        let cacher = MokaCacher::default();
        let item = Item {
            key: "test key".to_string(),
            value: b"test value".to_vec(),
        };
        cacher.set(item.clone()).await?;
        assert_eq!(cacher.get("test key").await?, Some(item));

        cacher.clear().await?;
        assert_eq!(cacher.get("test key").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn missing_key_is_none() -> Result<()> {
        let cacher = MokaCacher::default();
        assert_eq!(cacher.get("absent").await?, None);
        Ok(())
    }
}
