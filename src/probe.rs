//! iperf3 subprocess backend.
//!
//! Every measurement is one `iperf3 ... -J` invocation bounded by an outer
//! timeout. The child is killed when the timeout expires.

use crate::config::Settings;
use crate::error::{NetblastError, Result};
use crate::traits::ThroughputProbe;
use crate::types::{Attempt, Direction, ServerRecord};
use async_trait::async_trait;
use serde_json::Value;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

pub struct Iperf3Probe {
    binary: String,
    test_duration_secs: u64,
    retry_duration_secs: u64,
    timeout_factor: u64,
}

impl Iperf3Probe {
    pub fn new(settings: &Settings) -> Self {
        Self {
            binary: settings.iperf3_binary.clone(),
            test_duration_secs: settings.test_duration_secs,
            retry_duration_secs: settings.retry_duration_secs,
            timeout_factor: settings.timeout_factor,
        }
    }

    fn duration_secs(&self, attempt: Attempt) -> u64 {
        match attempt {
            Attempt::Primary => self.test_duration_secs,
            Attempt::Degraded => self.retry_duration_secs,
        }
    }

    /// Outer timeout leaves room for connection setup and teardown.
    pub fn timeout(&self, attempt: Attempt) -> Duration {
        Duration::from_secs(self.duration_secs(attempt).saturating_mul(self.timeout_factor))
    }

    /// Arguments passed to the iperf3 binary (program name excluded).
    pub fn build_args(
        &self,
        server: &ServerRecord,
        direction: Direction,
        attempt: Attempt,
    ) -> Result<Vec<String>> {
        let mut args: Vec<String> = match attempt {
            Attempt::Primary => {
                // 沿用服务器列表给出的启动命令, 去掉开头的程序名
                let mut tokens = server.test_command_template.split_whitespace().peekable();
                if tokens.peek().is_some_and(|t| !t.starts_with('-')) {
                    tokens.next();
                }
                let tokens: Vec<String> = tokens.map(str::to_string).collect();
                if !tokens.iter().any(|t| t == "-c") || tokens.len() < 2 {
                    return Err(NetblastError::ProbeFailed(format!(
                        "invalid launch command '{}'",
                        server.test_command_template
                    )));
                }
                tokens
            }
            Attempt::Degraded => vec![
                "-c".to_string(),
                server.host.clone(),
                "-p".to_string(),
                server.port.to_string(),
                "-P".to_string(),
                "1".to_string(),
            ],
        };

        args.push("-t".to_string());
        args.push(self.duration_secs(attempt).to_string());
        if direction == Direction::Upload {
            args.push("-R".to_string());
        }
        args.push("-J".to_string());
        Ok(args)
    }
}

#[async_trait]
impl ThroughputProbe for Iperf3Probe {
    fn name(&self) -> &'static str {
        "iperf3"
    }

    fn ensure_available(&self) -> Result<()> {
        // 只认可执行文件, 与 PATH 解析规则一致
        which::which(&self.binary)
            .map(|path| tracing::debug!(path = %path.display(), "found throughput tool"))
            .map_err(|_| NetblastError::ToolMissing(self.binary.clone()))
    }

    async fn measure(
        &self,
        server: &ServerRecord,
        direction: Direction,
        attempt: Attempt,
    ) -> Result<f64> {
        let args = self.build_args(server, direction, attempt)?;
        let limit = self.timeout(attempt);

        tracing::debug!(
            host = %server.host,
            %direction,
            ?attempt,
            command = %format!("{} {}", self.binary, args.join(" ")),
            "running throughput test"
        );

        let mut cmd = Command::new(&self.binary);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(limit, cmd.output()).await {
            Err(_) => return Err(NetblastError::ProbeTimeout(limit.as_secs())),
            Ok(Err(e)) => {
                return Err(NetblastError::ProbeFailed(format!(
                    "failed to launch {}: {}",
                    self.binary, e
                )))
            }
            Ok(Ok(output)) => output,
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            // With -J iperf3 reports failures as {"error": "..."} on stdout
            let reason = report_error(&stdout)
                .unwrap_or_else(|| String::from_utf8_lossy(&output.stderr).trim().to_string());
            return Err(NetblastError::ProbeFailed(format!(
                "{} ({})",
                reason, output.status
            )));
        }

        parse_throughput(&stdout, direction)
    }
}

fn report_error(stdout: &str) -> Option<String> {
    let v: Value = serde_json::from_str(stdout).ok()?;
    v.get("error").and_then(Value::as_str).map(str::to_string)
}

/// Extract the throughput (Mbps) from an iperf3 JSON report.
///
/// Download reads `end.sum_received`, upload (reverse mode) `end.sum_sent`.
pub fn parse_throughput(report: &str, direction: Direction) -> Result<f64> {
    let v: Value = serde_json::from_str(report)
        .map_err(|e| NetblastError::MalformedOutput(e.to_string()))?;

    if let Some(err) = v.get("error").and_then(Value::as_str) {
        return Err(NetblastError::MalformedOutput(err.to_string()));
    }

    let sum = match direction {
        Direction::Download => "sum_received",
        Direction::Upload => "sum_sent",
    };

    let bits_per_second = v
        .get("end")
        .and_then(|end| end.get(sum))
        .and_then(|s| s.get("bits_per_second"))
        .and_then(Value::as_f64)
        .ok_or_else(|| NetblastError::MalformedOutput(format!("missing end.{}", sum)))?;

    if !(bits_per_second.is_finite() && bits_per_second > 0.0) {
        return Err(NetblastError::MalformedOutput(format!(
            "non-positive throughput {}",
            bits_per_second
        )));
    }

    Ok(bits_per_second / 1_000_000.0)
}
