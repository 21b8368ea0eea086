//! Multi-endpoint HTTP readiness polling with consecutive-success gating.

use crate::cancel::{CancelToken, sleep_cancellable};
use crate::errors::HealthError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tokio::time::Instant;

/// Final status of one polled endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    #[default]
    Error,
}

/// Per-endpoint record carried into the audit report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointHealth {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<f64>,
    pub consecutive_ok: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One HTTP GET against a health endpoint.
///
/// The trait seam lets tests script responses without a live server.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Returns `(http_status, response_time_ms)` or a transport error
    /// description.
    async fn get(&self, url: &str) -> Result<(u16, f64), String>;
}

/// Probe backed by a shared `reqwest` client.
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(request_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn get(&self, url: &str) -> Result<(u16, f64), String> {
        let start = Instant::now();
        match self.client.get(url).send().await {
            Ok(resp) => {
                let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
                Ok((resp.status().as_u16(), elapsed_ms))
            }
            Err(e) => Err(e.to_string()),
        }
    }
}

/// Polling parameters.
#[derive(Debug, Clone)]
pub struct PollOptions {
    pub timeout: Duration,
    pub interval: Duration,
    pub required_consecutive: u32,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            interval: Duration::from_secs(3),
            required_consecutive: 2,
        }
    }
}

/// Poll every endpoint until all are healthy or the timeout expires.
///
/// An endpoint is healthy once it has returned HTTP 200 for
/// `required_consecutive` successive polls; healthy endpoints are not
/// re-polled. Any non-200 or transport error resets that endpoint's
/// consecutive counter to zero. On timeout the error names the
/// still-unhealthy endpoints.
pub async fn poll_until_healthy<P: Probe + ?Sized>(
    endpoints: &BTreeMap<String, String>,
    probe: &P,
    options: &PollOptions,
    cancel: &CancelToken,
) -> Result<BTreeMap<String, EndpointHealth>, HealthError> {
    let mut results: BTreeMap<String, EndpointHealth> = BTreeMap::new();
    let mut healthy: BTreeSet<String> = BTreeSet::new();
    let deadline = Instant::now() + options.timeout;

    tracing::info!(
        endpoints = endpoints.len(),
        timeout_s = options.timeout.as_secs(),
        interval_s = options.interval.as_secs_f64(),
        "polling service health"
    );

    while Instant::now() < deadline {
        for (name, url) in endpoints {
            if healthy.contains(name) {
                continue;
            }
            let entry = results.entry(name.clone()).or_default();
            match probe.get(url).await {
                Ok((200, elapsed_ms)) => {
                    entry.consecutive_ok += 1;
                    entry.status = HealthStatus::Healthy;
                    entry.http_status = Some(200);
                    entry.response_time_ms = Some((elapsed_ms * 10.0).round() / 10.0);
                    entry.error = None;
                    if entry.consecutive_ok >= options.required_consecutive {
                        healthy.insert(name.clone());
                        tracing::info!(service = %name, "service is healthy");
                    }
                }
                Ok((status, elapsed_ms)) => {
                    entry.consecutive_ok = 0;
                    entry.status = HealthStatus::Unhealthy;
                    entry.http_status = Some(status);
                    entry.response_time_ms = Some((elapsed_ms * 10.0).round() / 10.0);
                    entry.error = None;
                }
                Err(message) => {
                    entry.consecutive_ok = 0;
                    entry.status = HealthStatus::Error;
                    entry.http_status = None;
                    entry.response_time_ms = None;
                    entry.error = Some(message);
                }
            }
        }

        if healthy.len() == endpoints.len() {
            tracing::info!(count = endpoints.len(), "all services healthy");
            return Ok(results);
        }

        if !sleep_cancellable(options.interval, cancel).await {
            return Err(HealthError::Cancelled);
        }
    }

    let unhealthy: Vec<String> = endpoints
        .keys()
        .filter(|name| !healthy.contains(*name))
        .cloned()
        .collect();
    Err(HealthError::Timeout {
        waited_s: options.timeout.as_secs(),
        unhealthy,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Probe that pops scripted responses per URL, repeating the last.
    struct ScriptedProbe {
        responses: Mutex<BTreeMap<String, Vec<Result<(u16, f64), String>>>>,
    }

    impl ScriptedProbe {
        fn new(map: BTreeMap<String, Vec<Result<(u16, f64), String>>>) -> Self {
            Self {
                responses: Mutex::new(map),
            }
        }
    }

    #[async_trait]
    impl Probe for ScriptedProbe {
        async fn get(&self, url: &str) -> Result<(u16, f64), String> {
            let mut map = self.responses.lock().unwrap();
            let queue = map.get_mut(url).expect("unexpected url");
            if queue.len() > 1 {
                queue.remove(0)
            } else {
                queue[0].clone()
            }
        }
    }

    fn endpoints(names: &[&str]) -> BTreeMap<String, String> {
        names
            .iter()
            .map(|n| (n.to_string(), format!("http://{}/health", n)))
            .collect()
    }

    fn fast_options() -> PollOptions {
        PollOptions {
            timeout: Duration::from_secs(30),
            interval: Duration::from_millis(100),
            required_consecutive: 2,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn healthy_after_consecutive_successes() {
        let probe = ScriptedProbe::new(BTreeMap::from([(
            "http://svc/health".to_string(),
            vec![Ok((200, 3.0))],
        )]));
        let eps = BTreeMap::from([("svc".to_string(), "http://svc/health".to_string())]);

        let results =
            poll_until_healthy(&eps, &probe, &fast_options(), &CancelToken::never())
                .await
                .unwrap();

        let record = &results["svc"];
        assert_eq!(record.status, HealthStatus::Healthy);
        assert_eq!(record.consecutive_ok, 2);
        assert_eq!(record.http_status, Some(200));
    }

    #[tokio::test(start_paused = true)]
    async fn non_200_resets_the_counter() {
        // 200, then 503, then 200s: needs two more 200s after the reset.
        let probe = ScriptedProbe::new(BTreeMap::from([(
            "http://svc/health".to_string(),
            vec![Ok((200, 1.0)), Ok((503, 1.0)), Ok((200, 1.0))],
        )]));
        let eps = BTreeMap::from([("svc".to_string(), "http://svc/health".to_string())]);

        let results =
            poll_until_healthy(&eps, &probe, &fast_options(), &CancelToken::never())
                .await
                .unwrap();
        assert_eq!(results["svc"].consecutive_ok, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_names_unhealthy_endpoints() {
        let probe = ScriptedProbe::new(BTreeMap::from([
            ("http://ok/health".to_string(), vec![Ok((200, 1.0))]),
            (
                "http://bad/health".to_string(),
                vec![Err("connection refused".to_string())],
            ),
        ]));
        let eps = endpoints(&["ok", "bad"]);

        let options = PollOptions {
            timeout: Duration::from_secs(2),
            interval: Duration::from_millis(100),
            required_consecutive: 2,
        };
        let err = poll_until_healthy(&eps, &probe, &options, &CancelToken::never())
            .await
            .unwrap_err();

        match err {
            HealthError::Timeout { unhealthy, .. } => {
                assert_eq!(unhealthy, vec!["bad".to_string()]);
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_polling() {
        let probe = ScriptedProbe::new(BTreeMap::from([(
            "http://svc/health".to_string(),
            vec![Ok((503, 1.0))],
        )]));
        let eps = BTreeMap::from([("svc".to_string(), "http://svc/health".to_string())]);

        let (handle, token) = crate::cancel::cancel_pair();
        handle.cancel();
        let err = poll_until_healthy(&eps, &probe, &fast_options(), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, HealthError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn transport_error_records_message() {
        let probe = ScriptedProbe::new(BTreeMap::from([(
            "http://svc/health".to_string(),
            vec![
                Err("dns failure".to_string()),
                Ok((200, 1.0)),
                Ok((200, 1.0)),
            ],
        )]));
        let eps = BTreeMap::from([("svc".to_string(), "http://svc/health".to_string())]);

        let results =
            poll_until_healthy(&eps, &probe, &fast_options(), &CancelToken::never())
                .await
                .unwrap();
        // Recovered after the transport error.
        assert_eq!(results["svc"].status, HealthStatus::Healthy);
    }
}
