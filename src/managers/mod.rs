//! Backends implementing the [`Cacher`](crate::cache::Cacher) contract.

/// [`Cacher`](crate::cache::Cacher) backed by a memcached cluster.
pub mod memcached;
/// [`Cacher`](crate::cache::Cacher) backed by an in-process moka cache.
pub mod moka;

pub use memcached::MemcachedCacher;
pub use moka::MokaCacher;
