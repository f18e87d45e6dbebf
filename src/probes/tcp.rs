use std::fmt;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::{Probe, template::expand, until_cancelled};
use crate::backend::Host;
use crate::config::TcpProbeConfig;
use crate::metric::{Metric, check_value};

const READ_BUFFER_SIZE: usize = 4096;

/// Connects to a TCP port, optionally exchanging a payload
#[derive(Debug)]
pub struct TcpProbe {
    host_id: String,
    address: String,
    port: u16,
    send: Option<String>,
    expect: Option<Regex>,
    timeout: Duration,
}

impl TcpProbe {
    pub fn generate(config: &TcpProbeConfig, host: &Host) -> Result<Self> {
        let address = expand(&config.host, host)?;
        let port = expand(&config.port, host)?;
        let port = port
            .parse::<u16>()
            .with_context(|| format!("invalid port `{port}`"))?;

        let send = config
            .send
            .as_deref()
            .map(|payload| expand(payload, host))
            .transpose()?;

        let expect = config
            .expect_pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .context("invalid expect_pattern")?;

        Ok(Self {
            host_id: host.id.clone(),
            address,
            port,
            send,
            expect,
            timeout: Duration::from_secs(config.timeout),
        })
    }

    /// Connect, send and match, all within one probe timeout
    async fn check(&self) -> Result<()> {
        timeout(self.timeout, self.exchange())
            .await
            .with_context(|| format!("check timed out after {:?}", self.timeout))?
    }

    async fn exchange(&self) -> Result<()> {
        let mut stream = TcpStream::connect((self.address.as_str(), self.port))
            .await
            .context("connect failed")?;

        if let Some(payload) = &self.send {
            stream
                .write_all(payload.as_bytes())
                .await
                .context("failed to send payload")?;
        }

        if let Some(pattern) = &self.expect {
            let mut buffer = vec![0u8; READ_BUFFER_SIZE];
            let read = stream.read(&mut buffer).await.context("read failed")?;
            let received = String::from_utf8_lossy(&buffer[..read]);
            trace!("received {read} bytes from {}:{}", self.address, self.port);

            if !pattern.is_match(&received) {
                anyhow::bail!("response did not match `{}`", pattern.as_str());
            }
        }

        Ok(())
    }
}

impl fmt::Display for TcpProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tcp {}:{}", self.address, self.port)
    }
}

#[async_trait]
impl Probe for TcpProbe {
    async fn run(&self, cancel: &CancellationToken) -> Result<Vec<Metric>> {
        let start = Instant::now();
        let outcome = until_cancelled(cancel, async { Ok(self.check().await) }).await?;
        let elapsed = start.elapsed().as_secs_f64();

        if let Err(e) = &outcome {
            debug!("{self} check failed: {e:#}");
        }

        Ok(vec![
            Metric::new(&self.host_id, "tcp.check.ok", check_value(outcome.is_ok())),
            Metric::new(&self.host_id, "tcp.elapsed.seconds", elapsed),
        ])
    }
}
