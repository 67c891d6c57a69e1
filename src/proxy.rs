//! Chain assembly, the reverse-proxy handler, and process startup.

use std::{fmt, str::FromStr, sync::Arc, time::Duration};

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use bytes::Bytes;
use http_body_util::BodyExt;
use tokio::sync::oneshot;
use url::Url;

use crate::cache::CacheTransport;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::key::identity_key;
use crate::managers::MemcachedCacher;
use crate::response::ResponseEnvelope;
use crate::stabilizer::StableTransport;
use crate::transport::{ClientTransport, Transport};

/// Body of the fixed response returned when the per-request deadline fires.
const TIMEOUT_BODY: &str = "upstream timeout";

/// Connection-scoped headers that must not be forwarded in either direction.
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// The reverse proxy: one transport chain built at startup and shared by
/// every inbound request.
pub struct Gateway {
    chain: Arc<dyn Transport>,
    upstream: Url,
    timeout: Duration,
}

impl fmt::Debug for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gateway")
            .field("upstream", &self.upstream.as_str())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Gateway {
    /// Assembles the production chain from config: a plain client wrapped
    /// by the stabilizer, wrapped by the memcached-backed cache.
    pub fn new(conf: &Config) -> Result<Self> {
        let upstream = conf.upstream_url()?;
        let base = Arc::new(ClientTransport::default());
        let stable =
            Arc::new(StableTransport::new(base, conf.req_fan_factor));
        let cacher = MemcachedCacher::new(
            conf.memcache_hosts.clone(),
            conf.cache_seconds,
        );
        let chain = Arc::new(CacheTransport::new(
            stable,
            cacher,
            identity_key(conf.identity_header.clone()),
        ));
        Ok(Self { chain, upstream, timeout: conf.timeout() })
    }

    /// Assembles a gateway around an already-built transport chain.
    pub fn from_parts(
        chain: Arc<dyn Transport>,
        upstream: Url,
        timeout: Duration,
    ) -> Self {
        Self { chain, upstream, timeout }
    }

    /// The HTTP surface: every method and path is proxied.
    pub fn router(self) -> Router {
        Router::new().fallback(forward).with_state(Arc::new(self))
    }

    async fn dispatch(&self, req: Request) -> Result<Response> {
        let (parts, body) = req.into_parts();
        let body: Bytes = body
            .collect()
            .await
            .map_err(|err| Error::Body(err.to_string()))?
            .to_bytes();

        let mut out = reqwest::Request::new(
            parts.method.clone(),
            rewrite_url(&self.upstream, &parts.uri),
        );
        for (name, value) in parts.headers.iter() {
            if !is_hop_by_hop(name) {
                out.headers_mut().append(name.clone(), value.clone());
            }
        }
        // the client sets Host from the rewritten URL
        out.headers_mut().remove(header::HOST);
        if !body.is_empty() {
            *out.body_mut() = Some(reqwest::Body::from(body));
        }

        let envelope = self.chain.round_trip(out).await?;
        let status = envelope.status;
        let response = into_response(envelope)?;
        tracing::info!(method = %parts.method, uri = %parts.uri, status, "proxied");
        Ok(response)
    }
}

/// Keeps the inbound path and query, swaps everything else for the
/// upstream origin.
fn rewrite_url(upstream: &Url, uri: &http::Uri) -> Url {
    let mut url = upstream.clone();
    url.set_path(uri.path());
    url.set_query(uri.query());
    url
}

fn into_response(envelope: ResponseEnvelope) -> Result<Response> {
    let mut res = Response::builder()
        .status(envelope.status)
        .body(Body::from(envelope.body))?;
    for (name, value) in &envelope.headers {
        let name = HeaderName::from_str(name)?;
        if is_hop_by_hop(&name) {
            continue;
        }
        res.headers_mut().append(name, HeaderValue::from_str(value)?);
    }
    Ok(res)
}

/// The one response clients see when no usable upstream response exists,
/// whether the deadline fired or every attempt failed outright. Nothing in
/// the gateway synthesizes any other error body.
fn timeout_response() -> Response {
    (StatusCode::SERVICE_UNAVAILABLE, TIMEOUT_BODY).into_response()
}

async fn forward(
    State(gateway): State<Arc<Gateway>>,
    req: Request,
) -> Response {
    match tokio::time::timeout(gateway.timeout, gateway.dispatch(req)).await {
        Ok(Ok(response)) => response,
        Ok(Err(err)) => {
            tracing::error!(error = %err, "proxy failure");
            timeout_response()
        }
        Err(_elapsed) => timeout_response(),
    }
}

/// Starts the gateway and returns the channel the terminal message will
/// arrive on. Config problems are reported there right away with the exact
/// strings deployment tooling watches for; otherwise the listener is
/// spawned and the channel stays pending for the life of the process.
///
/// Must be called from within a tokio runtime.
pub fn start(conf_path: &str) -> oneshot::Receiver<String> {
    let (done_tx, done_rx) = oneshot::channel();

    tracing::info!("Charm is starting up.");
    tracing::info!(".   . Reading {conf_path}");
    let text = match std::fs::read_to_string(conf_path) {
        Ok(text) => text,
        Err(_) => {
            let _ = done_tx.send(format!("Could not read file at {conf_path}"));
            return done_rx;
        }
    };

    tracing::info!(".   . Loading config");
    let conf = match Config::from_toml(&text) {
        Ok(conf) => conf,
        Err(err) => {
            tracing::error!(error = %err, "config did not parse");
            let _ = done_tx.send("Could not decode config".to_string());
            return done_rx;
        }
    };
    if let Err(err) = conf.validate() {
        tracing::error!(error = %err, "config failed validation");
        let _ = done_tx.send("Could not decode config".to_string());
        return done_rx;
    }

    tracing::info!("Charm is configured!");
    tracing::info!(".   . Stabilizing {}", conf.upstream);
    tracing::info!(".   . with {} duplicate requests", conf.req_fan_factor);
    tracing::info!(".   . and a {} millisecond timeout.", conf.timeout_ms);
    tracing::info!(
        ".   . memcached at {:?} for {} seconds.",
        conf.memcache_hosts,
        conf.cache_seconds
    );

    tokio::spawn(run(conf, done_tx));
    done_rx
}

async fn run(conf: Config, done_tx: oneshot::Sender<String>) {
    // the sender is held for the life of the listener so the receiver
    // stays pending while the gateway serves
    let _done_tx = done_tx;

    let gateway = match Gateway::new(&conf) {
        Ok(gateway) => gateway,
        Err(err) => {
            tracing::error!(error = %err, "could not assemble gateway");
            std::process::exit(1);
        }
    };
    let listener =
        match tokio::net::TcpListener::bind(conf.listen.as_str()).await {
            Ok(listener) => listener,
            Err(err) => {
                tracing::error!(error = %err, addr = %conf.listen, "could not bind listener");
                std::process::exit(1);
            }
        };
    tracing::info!(addr = %conf.listen, "listening");
    if let Err(err) = axum::serve(listener, gateway.router()).await {
        tracing::error!(error = %err, "server terminated");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrite_keeps_path_and_query() {
        let upstream = Url::parse("http://upstream.internal:9000").unwrap();
        let uri: http::Uri =
            "http://edge.example/api/v1/object?page=2".parse().unwrap();
        let url = rewrite_url(&upstream, &uri);
        assert_eq!(
            url.as_str(),
            "http://upstream.internal:9000/api/v1/object?page=2"
        );
    }

    #[test]
    fn rewrite_without_query_drops_the_query() {
        let upstream = Url::parse("http://upstream.internal:9000").unwrap();
        let uri: http::Uri = "/api/v1/object".parse().unwrap();
        let url = rewrite_url(&upstream, &uri);
        assert_eq!(url.as_str(), "http://upstream.internal:9000/api/v1/object");
    }

    #[test]
    fn hop_by_hop_headers_are_recognized() {
        assert!(is_hop_by_hop(&header::TRANSFER_ENCODING));
        assert!(is_hop_by_hop(&header::CONNECTION));
        assert!(!is_hop_by_hop(&header::CONTENT_TYPE));
    }

    #[test]
    fn envelope_becomes_a_client_response() -> Result<()> {
        let mut headers = std::collections::HashMap::new();
        headers.insert("content-type".to_string(), "text/plain".to_string());
        headers.insert("transfer-encoding".to_string(), "chunked".to_string());
        let res = into_response(ResponseEnvelope {
            body: b"hello".to_vec(),
            headers,
            status: 200,
            url: Url::parse("http://upstream.test/").unwrap(),
            version: crate::response::HttpVersion::Http11,
        })?;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers().get("content-type").unwrap(), "text/plain");
        assert!(res.headers().get("transfer-encoding").is_none());
        Ok(())
    }
}
