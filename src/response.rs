//! The buffered response envelope and its cached wire format.

use std::{collections::HashMap, convert::TryFrom, fmt};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

/// Status of the cache for a given request
pub const XCACHE: &str = "x-cache";
/// Status of the cache lookup for a given request
pub const XCACHELOOKUP: &str = "x-cache-lookup";

/// Represents a cache hit or miss
#[derive(Debug, Clone, Copy)]
pub enum HitOrMiss {
    /// Yes, there was a hit
    HIT,
    /// No, there was no hit
    MISS,
}

impl fmt::Display for HitOrMiss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HIT => write!(f, "HIT"),
            Self::MISS => write!(f, "MISS"),
        }
    }
}

/// Represents an HTTP version
#[derive(Debug, Copy, Clone, Deserialize, Serialize)]
#[non_exhaustive]
pub enum HttpVersion {
    /// HTTP Version 0.9
    #[serde(rename = "HTTP/0.9")]
    Http09,
    /// HTTP Version 1.0
    #[serde(rename = "HTTP/1.0")]
    Http10,
    /// HTTP Version 1.1
    #[serde(rename = "HTTP/1.1")]
    Http11,
    /// HTTP Version 2.0
    #[serde(rename = "HTTP/2.0")]
    H2,
    /// HTTP Version 3.0
    #[serde(rename = "HTTP/3.0")]
    H3,
}

impl TryFrom<http::Version> for HttpVersion {
    type Error = Error;

    fn try_from(value: http::Version) -> Result<Self> {
        Ok(match value {
            http::Version::HTTP_09 => HttpVersion::Http09,
            http::Version::HTTP_10 => HttpVersion::Http10,
            http::Version::HTTP_11 => HttpVersion::Http11,
            http::Version::HTTP_2 => HttpVersion::H2,
            http::Version::HTTP_3 => HttpVersion::H3,
            _ => return Err(Error::BadVersion),
        })
    }
}

impl From<HttpVersion> for http::Version {
    fn from(value: HttpVersion) -> Self {
        match value {
            HttpVersion::Http09 => http::Version::HTTP_09,
            HttpVersion::Http10 => http::Version::HTTP_10,
            HttpVersion::Http11 => http::Version::HTTP_11,
            HttpVersion::H2 => http::Version::HTTP_2,
            HttpVersion::H3 => http::Version::HTTP_3,
        }
    }
}

/// A fully buffered HTTP response. This is what moves between the transports
/// in the chain: the body is always whole bytes in memory, so the caller's
/// copy and a cached copy never share reader state.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResponseEnvelope {
    /// HTTP response body
    pub body: Vec<u8>,
    /// HTTP response headers
    pub headers: HashMap<String, String>,
    /// HTTP response status code
    pub status: u16,
    /// HTTP response url
    pub url: Url,
    /// HTTP response version
    pub version: HttpVersion,
}

impl ResponseEnvelope {
    /// Encodes the response into the byte format stored by cache backends.
    pub fn to_wire(&self) -> Result<Vec<u8>> {
        Ok(postcard::to_allocvec(self)?)
    }

    /// Decodes a response from stored cache bytes.
    pub fn from_wire(bytes: &[u8]) -> Result<Self> {
        Ok(postcard::from_bytes(bytes)?)
    }

    /// Adds the custom `x-cache` header to the response
    pub fn cache_status(&mut self, hit_or_miss: HitOrMiss) {
        self.headers.insert(XCACHE.to_string(), hit_or_miss.to_string());
    }

    /// Adds the custom `x-cache-lookup` header to the response
    pub fn cache_lookup_status(&mut self, hit_or_miss: HitOrMiss) {
        self.headers.insert(XCACHELOOKUP.to_string(), hit_or_miss.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope() -> ResponseEnvelope {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "text/plain".to_string());
        ResponseEnvelope {
            body: b"test body".to_vec(),
            headers,
            status: 200,
            url: Url::parse("http://upstream.test/api/v1/object").unwrap(),
            version: HttpVersion::Http11,
        }
    }

    #[test]
    fn wire_format_round_trips() -> Result<()> {
        let res = envelope();
        let decoded = ResponseEnvelope::from_wire(&res.to_wire()?)?;
        assert_eq!(decoded.status, res.status);
        assert_eq!(decoded.headers, res.headers);
        assert_eq!(decoded.body, res.body);
        Ok(())
    }

    #[test]
    fn corrupt_wire_bytes_fail_to_decode() {
        assert!(ResponseEnvelope::from_wire(b"not a stored response").is_err());
    }

    #[test]
    fn hit_and_miss_render_as_header_values() {
        let mut res = envelope();
        res.cache_status(HitOrMiss::HIT);
        res.cache_lookup_status(HitOrMiss::MISS);
        assert_eq!(res.headers.get(XCACHE).map(String::as_str), Some("HIT"));
        assert_eq!(
            res.headers.get(XCACHELOOKUP).map(String::as_str),
            Some("MISS")
        );
    }
}
