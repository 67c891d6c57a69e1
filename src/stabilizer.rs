//! The fan-out transport that papers over a flaky upstream.

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::Method;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::response::ResponseEnvelope;
use crate::transport::{clone_request, Transport};

/// Decides whether a status code may satisfy the inbound request.
pub type Classifier = Arc<dyn Fn(u16) -> bool + Send + Sync>;

/// How long a finished attempt waits for the coordinator to take its
/// response before dropping it. Attempts finishing after the winner was
/// dispatched self-collect within this window.
const DELIVERY_WAIT: Duration = Duration::from_millis(5);

enum Attempt {
    Bad(ResponseEnvelope),
    Failed(Error),
}

/// A transport that makes many round trips and returns the first good
/// response. Tolerates up to `fan_factor - 1` failed attempts per request;
/// when no attempt is good, one representative bad response is returned
/// rather than a synthesized one.
pub struct StableTransport {
    inner: Arc<dyn Transport>,
    fan_factor: usize,
    classify: Classifier,
}

impl fmt::Debug for StableTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StableTransport")
            .field("fan_factor", &self.fan_factor)
            .field("classify", &"Fn(u16) -> bool")
            .finish_non_exhaustive()
    }
}

impl StableTransport {
    /// Wraps `inner` with a `fan_factor`-way fan-out. A factor of 1
    /// degenerates to a pass-through.
    pub fn new(inner: Arc<dyn Transport>, fan_factor: usize) -> Self {
        Self {
            inner,
            fan_factor: fan_factor.max(1),
            classify: Arc::new(|status| (200..300).contains(&status)),
        }
    }

    /// Replaces the good-response classifier. The default accepts any 2xx;
    /// deployments that only trust plain `200 OK` can narrow it here.
    pub fn with_classifier(mut self, classify: Classifier) -> Self {
        self.classify = classify;
        self
    }

    fn fan_for(&self, method: &Method) -> usize {
        // fanning out replays the request body; only idempotent reads fan
        if method == Method::GET || method == Method::HEAD {
            self.fan_factor
        } else {
            1
        }
    }
}

#[async_trait]
impl Transport for StableTransport {
    async fn round_trip(
        &self,
        req: reqwest::Request,
    ) -> Result<ResponseEnvelope> {
        let fan = self.fan_for(req.method());

        // clone up front so a non-replayable body fails before any attempt
        let mut attempts = Vec::with_capacity(fan);
        for _ in 1..fan {
            attempts.push(clone_request(&req)?);
        }
        attempts.push(req);

        // first good response lands in a single-buffered slot; bad outcomes
        // are collected until every attempt has reported
        let (good_tx, mut good_rx) = mpsc::channel::<ResponseEnvelope>(1);
        let (bad_tx, mut bad_rx) = mpsc::channel::<Attempt>(fan);

        for (fan_num, attempt) in attempts.into_iter().enumerate() {
            let inner = Arc::clone(&self.inner);
            let classify = Arc::clone(&self.classify);
            let good_tx = good_tx.clone();
            let bad_tx = bad_tx.clone();
            tokio::spawn(async move {
                tracing::debug!(fan_num, "fan request starting");
                match inner.round_trip(attempt).await {
                    Ok(res) if classify(res.status) => {
                        if timeout(DELIVERY_WAIT, good_tx.send(res))
                            .await
                            .is_err()
                        {
                            // not the first response, no one is waiting
                            tracing::debug!(
                                fan_num,
                                "dropping late good response"
                            );
                        }
                    }
                    Ok(res) => {
                        let status = res.status;
                        tracing::debug!(fan_num, status, "bad response");
                        let _ = bad_tx.send(Attempt::Bad(res)).await;
                    }
                    Err(err) => {
                        tracing::warn!(fan_num, error = %err, "transport error");
                        let _ = bad_tx.send(Attempt::Failed(err)).await;
                    }
                }
            });
        }
        drop(good_tx);
        drop(bad_tx);

        let mut bad_responses = Vec::new();
        let mut errored = 0usize;
        let mut last_error = None;
        loop {
            tokio::select! {
                Some(first_good) = good_rx.recv() => return Ok(first_good),
                Some(outcome) = bad_rx.recv() => {
                    match outcome {
                        Attempt::Bad(res) => bad_responses.push(res),
                        Attempt::Failed(err) => {
                            errored += 1;
                            last_error = Some(err);
                        }
                    }
                    // every attempt reported and none of them was good
                    if bad_responses.len() + errored == fan {
                        break;
                    }
                }
                else => break,
            }
        }

        if let Some(first_bad) = bad_responses.into_iter().next() {
            return Ok(first_bad);
        }
        Err(Error::UpstreamExhausted {
            attempts: fan,
            last: last_error
                .map(|err| err.to_string())
                .unwrap_or_else(|| "no attempts completed".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use url::Url;

    fn envelope(status: u16, body: &str) -> ResponseEnvelope {
        ResponseEnvelope {
            body: body.as_bytes().to_vec(),
            headers: HashMap::new(),
            status,
            url: Url::parse("http://upstream.test/").unwrap(),
            version: crate::response::HttpVersion::Http11,
        }
    }

    fn request(method: Method) -> reqwest::Request {
        reqwest::Request::new(method, "http://upstream.test/".parse().unwrap())
    }

    /// Alternates per call: even calls return 500, odd calls sleep briefly
    /// and return 200.
    struct FlakyTransport {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Transport for FlakyTransport {
        async fn round_trip(
            &self,
            _req: reqwest::Request,
        ) -> Result<ResponseEnvelope> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call % 2 == 0 {
                Ok(envelope(500, "boom"))
            } else {
                tokio::time::sleep(Duration::from_millis(1)).await;
                Ok(envelope(200, "delayed good response"))
            }
        }
    }

    struct ConstTransport {
        status: u16,
        body: &'static str,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Transport for ConstTransport {
        async fn round_trip(
            &self,
            _req: reqwest::Request,
        ) -> Result<ResponseEnvelope> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(envelope(self.status, self.body))
        }
    }

    struct FailingTransport;

    #[async_trait]
    impl Transport for FailingTransport {
        async fn round_trip(
            &self,
            _req: reqwest::Request,
        ) -> Result<ResponseEnvelope> {
            Err(Error::Cache("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn returns_the_one_good_response_among_bad() -> Result<()> {
        let inner = Arc::new(FlakyTransport { calls: AtomicUsize::new(0) });
        let stable = StableTransport::new(inner, 2);
        let res = stable.round_trip(request(Method::GET)).await?;
        assert_eq!(res.status, 200);
        assert_eq!(res.body, b"delayed good response");
        Ok(())
    }

    #[tokio::test]
    async fn all_bad_returns_a_representative_response() -> Result<()> {
        let calls = Arc::new(AtomicUsize::new(0));
        let inner = Arc::new(ConstTransport {
            status: 500,
            body: "upstream sad",
            calls: Arc::clone(&calls),
        });
        let stable = StableTransport::new(inner, 2);
        let res = stable.round_trip(request(Method::GET)).await?;
        assert_eq!(res.status, 500);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[tokio::test]
    async fn all_transport_errors_surface_as_exhaustion() {
        let stable = StableTransport::new(Arc::new(FailingTransport), 3);
        let err = stable.round_trip(request(Method::GET)).await.unwrap_err();
        assert!(matches!(
            err,
            Error::UpstreamExhausted { attempts: 3, .. }
        ));
    }

    #[tokio::test]
    async fn fan_factor_one_passes_through() -> Result<()> {
        let calls = Arc::new(AtomicUsize::new(0));
        let inner = Arc::new(ConstTransport {
            status: 200,
            body: "single",
            calls: Arc::clone(&calls),
        });
        let stable = StableTransport::new(inner, 1);
        let res = stable.round_trip(request(Method::GET)).await?;
        assert_eq!(res.body, b"single");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn non_idempotent_methods_do_not_fan_out() -> Result<()> {
        let calls = Arc::new(AtomicUsize::new(0));
        let inner = Arc::new(ConstTransport {
            status: 200,
            body: "created",
            calls: Arc::clone(&calls),
        });
        let stable = StableTransport::new(inner, 4);
        stable.round_trip(request(Method::POST)).await?;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn strict_classifier_rejects_other_success_codes() -> Result<()> {
        let calls = Arc::new(AtomicUsize::new(0));
        let inner = Arc::new(ConstTransport {
            status: 204,
            body: "",
            calls: Arc::clone(&calls),
        });
        let stable = StableTransport::new(inner, 2)
            .with_classifier(Arc::new(|status| status == 200));
        // 204 is bad under the strict classifier, so it comes back as the
        // representative response once both attempts report
        let res = stable.round_trip(request(Method::GET)).await?;
        assert_eq!(res.status, 204);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        Ok(())
    }
}
