//! Error and result types shared across the gateway.

use thiserror::Error;

/// A `Result` typedef to use with the [`Error`] type
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for gateway operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A round trip failed at the transport layer (connect, DNS, TLS, body read)
    #[error(transparent)]
    Upstream(#[from] reqwest::Error),
    /// Every fan-out attempt failed without producing an HTTP response
    #[error("all {attempts} upstream attempts failed, last error: {last}")]
    UpstreamExhausted {
        /// How many attempts were issued
        attempts: usize,
        /// Rendering of the last transport error observed
        last: String,
    },
    /// The cache backend reported a failure; callers treat this as a miss
    #[error("cache backend: {0}")]
    Cache(String),
    /// Stored bytes failed to encode or decode as a cached response
    #[error(transparent)]
    Codec(#[from] postcard::Error),
    /// The identity header was absent or empty, so no cache key exists
    #[error("identity header {0} missing or empty")]
    IdentityMissing(String),
    /// There was an error cloning the HTTP request
    #[error(
        "Request object is not cloneable. Are you passing a streaming body?"
    )]
    BadRequest,
    /// The inbound request body could not be buffered
    #[error("could not buffer request body: {0}")]
    Body(String),
    /// Error from http
    #[error(transparent)]
    Http(#[from] http::Error),
    /// There was an error converting the header to a string
    #[error(transparent)]
    HeaderToStr(#[from] http::header::ToStrError),
    /// There was an error parsing an HTTP header name
    #[error(transparent)]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),
    /// There was an error parsing an HTTP header value
    #[error(transparent)]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),
    /// There was an error parsing the URL
    #[error(transparent)]
    InvalidUrl(#[from] url::ParseError),
    /// There was an error parsing the HTTP request version
    #[error("Unknown HTTP version")]
    BadVersion,
    /// The configuration failed validation
    #[error("invalid configuration: {0}")]
    Config(String),
}
