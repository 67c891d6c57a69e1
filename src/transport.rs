//! The round-trip contract and the leaf HTTP client transport.

use std::collections::HashMap;
use std::convert::TryInto;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::response::ResponseEnvelope;

/// An asynchronous HTTP round-tripper. Implementations are layered: the
/// leaf executes real network I/O and each wrapper adds behavior on top of
/// an inner transport. A transport is shared across concurrent requests and
/// holds no per-request state.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Issues the request and returns the fully buffered response.
    async fn round_trip(
        &self,
        req: reqwest::Request,
    ) -> Result<ResponseEnvelope>;
}

/// The leaf transport: an ordinary HTTP client round trip.
#[derive(Debug, Clone, Default)]
pub struct ClientTransport {
    client: reqwest::Client,
}

impl ClientTransport {
    /// Wraps a pre-configured client.
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ClientTransport {
    async fn round_trip(
        &self,
        req: reqwest::Request,
    ) -> Result<ResponseEnvelope> {
        let res = self.client.execute(req).await?;
        into_envelope(res).await
    }
}

pub(crate) fn clone_request(
    request: &reqwest::Request,
) -> Result<reqwest::Request> {
    request.try_clone().ok_or(Error::BadRequest)
}

pub(crate) async fn into_envelope(
    res: reqwest::Response,
) -> Result<ResponseEnvelope> {
    let mut headers = HashMap::new();
    for header in res.headers() {
        headers
            .insert(header.0.as_str().to_owned(), header.1.to_str()?.to_owned());
    }
    let url = res.url().clone();
    let status = res.status().into();
    let version = res.version().try_into()?;
    let body = res.bytes().await?.to_vec();
    Ok(ResponseEnvelope { body, headers, status, url, version })
}
