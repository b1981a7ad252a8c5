//! Verification of a deployed tool server over HTTP.

use reqwest::Client;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::{AuthError, Result};

use super::token::AccessToken;

/// Probe timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Connection timeout in seconds.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Unauthenticated liveness endpoint.
pub const HEALTH_PATH: &str = "/health";

/// Authenticated tool listing endpoint.
pub const TOOLS_PATH: &str = "/tools";

/// Result of a single endpoint check.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointCheck {
    /// Endpoint URL.
    pub url: String,
    /// Whether the check passed.
    pub healthy: bool,
    /// HTTP status code, if a response arrived.
    pub status_code: Option<u16>,
    /// Response time in milliseconds.
    pub response_time_ms: Option<u64>,
    /// Error message, if any.
    pub error: Option<String>,
}

/// Result of probing a server.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    /// Base URL that was probed.
    pub base_url: String,
    /// `/health` check.
    pub health: EndpointCheck,
    /// `/tools` check; `None` when no token was available.
    pub tools: Option<EndpointCheck>,
}

impl ProbeReport {
    /// Healthy when every performed check passed.
    #[must_use]
    pub fn healthy(&self) -> bool {
        self.health.healthy && self.tools.as_ref().is_none_or(|c| c.healthy)
    }

    /// All performed checks.
    #[must_use]
    pub fn checks(&self) -> Vec<&EndpointCheck> {
        std::iter::once(&self.health).chain(self.tools.as_ref()).collect()
    }
}

/// Probes the endpoints a deployed server exposes.
#[derive(Debug, Clone)]
pub struct ServerProbe {
    client: Client,
}

impl ServerProbe {
    /// Creates a probe.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| AuthError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client })
    }

    /// Checks `/health`, and `/tools` when a token is given.
    pub async fn verify(&self, base_url: &str, token: Option<&AccessToken>) -> ProbeReport {
        let base = base_url.trim_end_matches('/');
        debug!("Probing {base}");

        let health = self.check(&format!("{base}{HEALTH_PATH}"), None).await;
        let tools = match token {
            Some(token) => Some(self.check(&format!("{base}{TOOLS_PATH}"), Some(token)).await),
            None => {
                debug!("No token, skipping {TOOLS_PATH}");
                None
            }
        };

        ProbeReport {
            base_url: base.to_string(),
            health,
            tools,
        }
    }

    async fn check(&self, url: &str, token: Option<&AccessToken>) -> EndpointCheck {
        let start = Instant::now();

        let mut request = self.client.get(url);
        if let Some(token) = token {
            request = request.bearer_auth(&token.token);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                let response_time = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
                let healthy = status.is_success();

                if !healthy {
                    debug!("Endpoint {url} returned status {status}");
                }

                EndpointCheck {
                    url: url.to_string(),
                    healthy,
                    status_code: Some(status.as_u16()),
                    response_time_ms: Some(response_time),
                    error: (!healthy).then(|| format!("HTTP {status}")),
                }
            }
            Err(e) => {
                warn!("Probe failed for {url}: {e}");

                EndpointCheck {
                    url: url.to_string(),
                    healthy: false,
                    status_code: None,
                    response_time_ms: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn token() -> AccessToken {
        AccessToken {
            token: String::from("test-token"),
            token_type: String::from("Bearer"),
            expires_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_health_only_without_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let probe = ServerProbe::new().expect("probe");
        let report = probe.verify(&format!("{}/", server.uri()), None).await;

        assert!(report.healthy());
        assert!(report.tools.is_none());
        assert_eq!(report.health.status_code, Some(200));
        assert!(report.health.response_time_ms.is_some());
        assert_eq!(report.checks().len(), 1);
    }

    #[tokio::test]
    async fn test_tools_uses_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/tools"))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let probe = ServerProbe::new().expect("probe");
        let report = probe.verify(&server.uri(), Some(&token())).await;

        assert!(report.healthy());
        assert_eq!(report.checks().len(), 2);
    }

    #[tokio::test]
    async fn test_unauthorized_tools_is_unhealthy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/tools"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let probe = ServerProbe::new().expect("probe");
        let report = probe.verify(&server.uri(), Some(&token())).await;

        assert!(!report.healthy());
        let tools = report.tools.expect("tools checked");
        assert_eq!(tools.status_code, Some(401));
        assert_eq!(tools.error.as_deref(), Some("HTTP 401 Unauthorized"));
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        let probe = ServerProbe::new().expect("probe");
        let report = probe.verify("http://127.0.0.1:1", None).await;

        assert!(!report.healthy());
        assert!(report.health.status_code.is_none());
        assert!(report.health.error.is_some());
    }
}
