use std::fmt;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::process::Command;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use super::{Probe, template::expand, until_cancelled};
use crate::backend::Host;
use crate::config::CommandProbeConfig;
use crate::metric::Metric;

/// Runs a plugin command and turns each output line into a sample
///
/// Output lines look like `name<TAB>value<TAB>epoch_seconds`; the timestamp
/// column is optional.
#[derive(Debug)]
pub struct CommandProbe {
    host_id: String,
    argv: Vec<String>,
    timeout: Duration,
}

impl CommandProbe {
    pub fn generate(config: &CommandProbeConfig, host: &Host) -> Result<Self> {
        if config.command.is_empty() {
            bail!("empty command");
        }

        let argv = config
            .command
            .iter()
            .map(|arg| expand(arg, host))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            host_id: host.id.clone(),
            argv,
            timeout: Duration::from_secs(config.timeout),
        })
    }

    async fn execute(&self) -> Result<String> {
        let (program, args) = self
            .argv
            .split_first()
            .context("empty command")?;

        // kill_on_drop terminates the child when cancellation drops this future
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn `{program}`"))?;

        let output = timeout(self.timeout, child.wait_with_output())
            .await
            .context("command timed out")?
            .context("failed to wait for command")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("command exited with {}: {}", output.status, stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn parse_output(&self, output: &str, now: DateTime<Utc>) -> Vec<Metric> {
        output
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match parse_line(line, now) {
                Some((name, value, timestamp)) => {
                    Some(Metric::at(&self.host_id, name, value, timestamp))
                }
                None => {
                    warn!("{self}: ignoring malformed output line `{line}`");
                    None
                }
            })
            .collect()
    }
}

fn parse_line(line: &str, now: DateTime<Utc>) -> Option<(&str, f64, DateTime<Utc>)> {
    let mut columns = line.split('\t');
    let name = columns.next()?.trim();
    let value = columns.next()?.trim().parse::<f64>().ok()?;

    let timestamp = match columns.next() {
        Some(epoch) => Utc
            .timestamp_opt(epoch.trim().parse::<i64>().ok()?, 0)
            .single()?,
        None => now,
    };

    if name.is_empty() || !value.is_finite() {
        return None;
    }

    Some((name, value, timestamp))
}

impl fmt::Display for CommandProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "command [{}]", self.argv.join(" "))
    }
}

#[async_trait]
impl Probe for CommandProbe {
    async fn run(&self, cancel: &CancellationToken) -> Result<Vec<Metric>> {
        let output = until_cancelled(cancel, self.execute()).await?;
        let metrics = self.parse_output(&output, Utc::now());
        trace!("{self} produced {} metrics", metrics.len());
        Ok(metrics)
    }
}
