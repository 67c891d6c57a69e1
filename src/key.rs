//! Cache-key derivation: the per-caller request fingerprint.

use std::sync::Arc;

use sha2::{Digest, Sha224};
use url::Position;

use crate::error::{Error, Result};

/// The request header trusted to carry the caller identity. Upstream
/// authentication infrastructure must set it and strip any client-supplied
/// value at the trust boundary; the gateway does not validate it.
pub const DEFAULT_IDENTITY_HEADER: &str = "X-Forwarded-Email";

/// A closure that derives the cache key for a request. Returning an error
/// marks the request uncacheable and the cache layer bypasses itself
/// entirely; it never substitutes a fallback key.
pub type CacheKeyFn =
    Arc<dyn Fn(&reqwest::Request) -> Result<String> + Send + Sync>;

/// Returns the fingerprint identifying a request for caching purposes:
/// the lowercase hex SHA-224 digest of method, host, path, raw query and
/// the first value of `identity_header`, concatenated in that order.
///
/// The identity value is part of the digest. A key computed without it
/// could hand one caller's authorized response to another caller, so a
/// missing or empty identity header is an error, not a broader key.
pub fn fingerprint(
    req: &reqwest::Request,
    identity_header: &str,
) -> Result<String> {
    let identity = req
        .headers()
        .get(identity_header)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    if identity.is_empty() {
        return Err(Error::IdentityMissing(identity_header.to_string()));
    }

    let url = req.url();
    let mut hasher = Sha224::new();
    hasher.update(req.method().as_str().as_bytes());
    hasher.update(&url[Position::BeforeHost..Position::AfterPort]);
    hasher.update(url.path().as_bytes());
    hasher.update(url.query().unwrap_or("").as_bytes());
    hasher.update(identity.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Builds the default [`CacheKeyFn`]: [`fingerprint`] keyed on the named
/// identity header.
pub fn identity_key(identity_header: impl Into<String>) -> CacheKeyFn {
    let name = identity_header.into();
    Arc::new(move |req| fingerprint(req, &name))
}
