use std::fmt;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::{Probe, template::expand, until_cancelled};
use crate::backend::Host;
use crate::config::{HttpMethod, HttpProbeConfig};
use crate::metric::{Metric, check_value};

/// Shared across all HTTP probes; per-request timeouts are set on the request
static CLIENT: LazyLock<reqwest::Client> = LazyLock::new(reqwest::Client::new);

/// Requests a URL and validates status code and body
#[derive(Debug)]
pub struct HttpProbe {
    host_id: String,
    url: String,
    method: HttpMethod,
    body: Option<String>,
    expected_status: Option<Vec<u16>>,
    body_pattern: Option<Regex>,
    timeout: Duration,
}

/// What came back from one request
struct HttpResponse {
    status_code: u16,
    content_length: usize,
    body: String,
}

impl HttpProbe {
    pub fn generate(config: &HttpProbeConfig, host: &Host) -> Result<Self> {
        let url = expand(&config.url, host)?;
        let body = config
            .body
            .as_deref()
            .map(|body| expand(body, host))
            .transpose()?;

        let body_pattern = config
            .body_pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .context("invalid body_pattern")?;

        Ok(Self {
            host_id: host.id.clone(),
            url,
            method: config.method,
            body,
            expected_status: config.expected_status.clone(),
            body_pattern,
            timeout: Duration::from_secs(config.timeout),
        })
    }

    async fn execute_request(&self) -> Result<HttpResponse> {
        let method = match self.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Head => reqwest::Method::HEAD,
        };

        let mut request = CLIENT
            .request(method, &self.url)
            .timeout(self.timeout);

        if let Some(body) = &self.body {
            request = request.body(body.clone());
        }

        let response = request.send().await.context("HTTP request failed")?;
        let status_code = response.status().as_u16();

        // HEAD responses carry no body
        let body = if matches!(self.method, HttpMethod::Head) {
            String::new()
        } else {
            response
                .text()
                .await
                .context("failed to read response body")?
        };

        Ok(HttpResponse {
            status_code,
            content_length: body.len(),
            body,
        })
    }

    /// Status must be expected (any 2xx by default) and body must match
    fn evaluate_response(&self, response: &HttpResponse) -> bool {
        let status_ok = match &self.expected_status {
            Some(expected) => expected.contains(&response.status_code),
            None => (200..300).contains(&response.status_code),
        };

        if !status_ok {
            return false;
        }

        match &self.body_pattern {
            Some(pattern) => pattern.is_match(&response.body),
            None => true,
        }
    }
}

impl fmt::Display for HttpProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let method = match self.method {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Head => "HEAD",
        };
        write!(f, "http {} {}", method, self.url)
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn run(&self, cancel: &CancellationToken) -> Result<Vec<Metric>> {
        let start = Instant::now();
        let outcome = until_cancelled(cancel, async { Ok(self.execute_request().await) }).await?;
        let elapsed = start.elapsed().as_secs_f64();

        let response = match outcome {
            Ok(response) => response,
            Err(e) => {
                debug!("{self} failed: {e:#}");
                return Ok(vec![
                    Metric::new(&self.host_id, "http.check.ok", check_value(false)),
                    Metric::new(&self.host_id, "http.response_time.seconds", elapsed),
                ]);
            }
        };

        let ok = self.evaluate_response(&response);
        trace!("{self} returned {} (ok: {ok})", response.status_code);

        Ok(vec![
            Metric::new(&self.host_id, "http.check.ok", check_value(ok)),
            Metric::new(&self.host_id, "http.response_time.seconds", elapsed),
            Metric::new(
                &self.host_id,
                "http.status.code",
                f64::from(response.status_code),
            ),
            Metric::new(
                &self.host_id,
                "http.content.length",
                response.content_length as f64,
            ),
        ])
    }
}
