//! Startup configuration.

use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::{Error, Result};
use crate::key::DEFAULT_IDENTITY_HEADER;

/// Runtime configuration, loaded once at startup and immutable for the
/// process lifetime. Key names match the deployed TOML files.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// The single upstream origin requests are rewritten onto
    #[serde(rename = "Upstream")]
    pub upstream: String,
    /// How many duplicate attempts the stabilizer issues per request
    #[serde(rename = "ReqFanFactor")]
    pub req_fan_factor: usize,
    /// Per-request deadline in milliseconds
    #[serde(rename = "TimeoutMS")]
    pub timeout_ms: u64,
    /// Memcached `host:port` endpoints
    #[serde(rename = "MemcacheHosts")]
    pub memcache_hosts: Vec<String>,
    /// TTL in seconds applied when a response is cached; 0 leaves expiry
    /// to the backend
    #[serde(rename = "CacheSeconds")]
    pub cache_seconds: u32,
    /// Listen address for the HTTP listener
    #[serde(rename = "Listen", default = "default_listen")]
    pub listen: String,
    /// Header carrying the trusted caller identity
    #[serde(rename = "IdentityHeader", default = "default_identity_header")]
    pub identity_header: String,
}

fn default_listen() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_identity_header() -> String {
    DEFAULT_IDENTITY_HEADER.to_string()
}

impl Config {
    /// Parses a TOML document.
    pub fn from_toml(text: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Checks the value ranges the rest of the gateway assumes.
    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.upstream)
            .map_err(|err| Error::Config(format!("Upstream: {err}")))?;
        if self.req_fan_factor < 1 {
            return Err(Error::Config(
                "ReqFanFactor must be at least 1".to_string(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(Error::Config(
                "TimeoutMS must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// The parsed upstream origin.
    pub fn upstream_url(&self) -> Result<Url> {
        Ok(Url::parse(&self.upstream)?)
    }

    /// The per-request deadline.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD: &str = r#"
        Upstream = "http://upstream.internal:9000"
        ReqFanFactor = 3
        TimeoutMS = 2000
        MemcacheHosts = ["10.0.0.1:11211", "10.0.0.2:11211"]
        CacheSeconds = 120
    "#;

    #[test]
    fn parses_a_full_config() {
        let conf = Config::from_toml(GOOD).unwrap();
        assert_eq!(conf.upstream, "http://upstream.internal:9000");
        assert_eq!(conf.req_fan_factor, 3);
        assert_eq!(conf.timeout_ms, 2000);
        assert_eq!(conf.memcache_hosts.len(), 2);
        assert_eq!(conf.cache_seconds, 120);
        assert!(conf.validate().is_ok());
    }

    #[test]
    fn listen_and_identity_header_have_defaults() {
        let conf = Config::from_toml(GOOD).unwrap();
        assert_eq!(conf.listen, "0.0.0.0:8000");
        assert_eq!(conf.identity_header, DEFAULT_IDENTITY_HEADER);
    }

    #[test]
    fn rejects_missing_keys() {
        assert!(Config::from_toml("Upstream = \"http://u\"").is_err());
    }

    #[test]
    fn rejects_zero_fan_factor() {
        let conf = Config::from_toml(&GOOD.replace(
            "ReqFanFactor = 3",
            "ReqFanFactor = 0",
        ))
        .unwrap();
        assert!(matches!(conf.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_zero_timeout() {
        let conf = Config::from_toml(&GOOD.replace(
            "TimeoutMS = 2000",
            "TimeoutMS = 0",
        ))
        .unwrap();
        assert!(matches!(conf.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_unparseable_upstream() {
        let conf = Config::from_toml(&GOOD.replace(
            "http://upstream.internal:9000",
            "not a url",
        ))
        .unwrap();
        assert!(matches!(conf.validate(), Err(Error::Config(_))));
    }
}
