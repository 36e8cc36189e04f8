//! Container runtime shell-out (docker-compatible CLI, argv only)

use std::io;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerStat {
    pub id: String,
    pub name: String,
    pub rss: u64,
}

#[async_trait::async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Memory stats for all running containers. A missing runtime binary
    /// yields an empty list, not an error; a runtime that exists but
    /// fails is an error the caller may log.
    async fn snapshot(&self, deadline: Duration) -> io::Result<Vec<ContainerStat>>;

    /// Graceful stop with a bounded timeout. Returns false on failure.
    async fn stop(&self, id: &str, timeout_s: u64) -> bool;
}

pub struct DockerCli {
    binary: String,
}

impl DockerCli {
    pub fn new() -> Self {
        Self {
            binary: "docker".to_string(),
        }
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ContainerRuntime for DockerCli {
    async fn snapshot(&self, deadline: Duration) -> io::Result<Vec<ContainerStat>> {
        let child = Command::new(&self.binary)
            .args(["stats", "--no-stream", "--format", "json"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output();
        let out = match timeout(deadline, child).await {
            Err(_) => return Err(io::Error::new(io::ErrorKind::TimedOut, "docker stats timed out")),
            Ok(Err(e)) if e.kind() == io::ErrorKind::NotFound => {
                debug!("container runtime not installed");
                return Ok(Vec::new());
            }
            Ok(Err(e)) => return Err(e),
            Ok(Ok(out)) => out,
        };
        if !out.status.success() {
            return Err(io::Error::other(format!("docker stats exited with {}", out.status)));
        }
        Ok(parse_stats(&String::from_utf8_lossy(&out.stdout)))
    }

    async fn stop(&self, id: &str, timeout_s: u64) -> bool {
        let child = Command::new(&self.binary)
            .args(["stop", "--time", &timeout_s.to_string(), id])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();
        matches!(
            timeout(Duration::from_secs(timeout_s + 5), child).await,
            Ok(Ok(status)) if status.success()
        )
    }
}

/// One JSON object per line, as emitted by `--format json`.
fn parse_stats(raw: &str) -> Vec<ContainerStat> {
    raw.lines()
        .filter_map(|line| {
            let value: serde_json::Value = serde_json::from_str(line.trim()).ok()?;
            let id = value.get("Container")?.as_str()?;
            if id.is_empty() {
                return None;
            }
            let name = value.get("Name").and_then(|n| n.as_str()).unwrap_or(id);
            let usage = value.get("MemUsage")?.as_str()?;
            let current = usage.split('/').next()?.trim();
            Some(ContainerStat {
                id: id.chars().take(12).collect(),
                name: name.to_string(),
                rss: parse_mem_size(current)?,
            })
        })
        .collect()
}

/// Parse a runtime memory figure such as "512MiB" or "1.5GiB" into bytes.
pub fn parse_mem_size(s: &str) -> Option<u64> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit() && c != '.')?;
    let value: f64 = s[..split].parse().ok()?;
    let multiplier: u64 = match s[split..].trim().to_ascii_uppercase().as_str() {
        "B" => 1,
        "KB" | "KIB" => 1024,
        "MB" | "MIB" => 1024 * 1024,
        "GB" | "GIB" => 1024 * 1024 * 1024,
        _ => return None,
    };
    Some((value * multiplier as f64) as u64)
}
