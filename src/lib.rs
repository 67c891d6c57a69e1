#![forbid(unsafe_code, future_incompatible)]
#![deny(
    missing_docs,
    missing_debug_implementations,
    nonstandard_style,
    unused_qualifications,
    trivial_casts,
    trivial_numeric_casts
)]
//! Charm is a reverse-proxy gateway that makes a flaky upstream look stable
//! and amortizes its load with a shared response cache keyed per caller.
//!
//! Every inbound request runs through a chain of transports:
//!
//! - [`CacheTransport`] answers repeats from the cache and asynchronously
//!   persists misses, keyed by an authorization-safe [`fingerprint`] of the
//!   request (the caller identity header is part of the key, so one
//!   caller's responses are never served to another).
//! - [`StableTransport`] fans each miss out into several concurrent
//!   upstream attempts and returns the first good response, so a single
//!   flaky upstream call rarely surfaces.
//! - [`ClientTransport`] is the leaf that performs real HTTP round trips.
//!
//! In production the cache lives in memcached ([`MemcachedCacher`]);
//! [`MokaCacher`] offers the same contract in process memory.
//!
//! ```no_run
//! use std::sync::Arc;
//! use charm::{
//!     identity_key, CacheTransport, ClientTransport, MokaCacher,
//!     StableTransport, Transport, DEFAULT_IDENTITY_HEADER,
//! };
//!
//! # async fn demo() -> charm::Result<()> {
//! let base = Arc::new(ClientTransport::default());
//! let stable = Arc::new(StableTransport::new(base, 3));
//! let chain = CacheTransport::new(
//!     stable,
//!     MokaCacher::default(),
//!     identity_key(DEFAULT_IDENTITY_HEADER),
//! );
//!
//! let mut req = reqwest::Request::new(
//!     reqwest::Method::GET,
//!     "http://upstream.internal/api/v1/object".parse().unwrap(),
//! );
//! req.headers_mut()
//!     .insert(DEFAULT_IDENTITY_HEADER, "ops@example.com".parse().unwrap());
//! let res = chain.round_trip(req).await?;
//! println!("{} ({} bytes)", res.status, res.body.len());
//! # Ok(())
//! # }
//! ```
//!
//! The binary wires the chain from a TOML config and serves it behind a
//! per-request deadline; see [`start`].

pub mod cache;
pub mod config;
pub mod error;
pub mod key;
pub mod managers;
pub mod proxy;
pub mod response;
pub mod stabilizer;
pub mod transport;

pub use cache::{CacheTransport, Cacher, Item};
pub use config::Config;
pub use error::{Error, Result};
pub use key::{fingerprint, identity_key, CacheKeyFn, DEFAULT_IDENTITY_HEADER};
pub use managers::{MemcachedCacher, MokaCacher};
pub use proxy::{start, Gateway};
pub use response::{
    HitOrMiss, HttpVersion, ResponseEnvelope, XCACHE, XCACHELOOKUP,
};
pub use stabilizer::{Classifier, StableTransport};
pub use transport::{ClientTransport, Transport};
