use std::process::Stdio;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Deserialize;

use replay_core::{ClientError, ContainerUsage, ResourceMonitor};

/// One line of `docker stats --no-stream --format '{{json .}}'`.
#[derive(Debug, Deserialize)]
struct DockerStatsLine {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "CPUPerc")]
    cpu_perc: String,
    #[serde(rename = "MemUsage")]
    mem_usage: String,
}

/// Samples per-container CPU and memory usage of the compose project's
/// containers via the docker CLI.
pub struct DockerStatsMonitor {
    project: String,
}

impl DockerStatsMonitor {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
        }
    }

    /// Whether `docker stats` works at all in this environment.
    pub async fn probe(&self) -> bool {
        self.collect().await.is_ok()
    }

    async fn collect(&self) -> Result<Vec<ContainerUsage>, ClientError> {
        let output = tokio::process::Command::new("docker")
            .args(["stats", "--no-stream", "--format", "{{json .}}"])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|err| ClientError::new(format!("docker failed to start: {err}")))?;
        if !output.status.success() {
            return Err(ClientError::new(format!(
                "docker stats failed ({}): {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let prefix = format!("{}-", self.project);
        let mut containers = Vec::new();
        for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
            let parsed: DockerStatsLine = serde_json::from_str(line)
                .map_err(|err| ClientError::new(format!("unparseable docker stats line: {err}")))?;
            if !parsed.name.starts_with(&prefix) {
                continue;
            }
            containers.push(ContainerUsage {
                name: parsed.name,
                cpu_percent: parse_percent(&parsed.cpu_perc)
                    .ok_or_else(|| ClientError::new(format!("bad CPU value {:?}", parsed.cpu_perc)))?,
                mem_bytes: parse_mem_usage(&parsed.mem_usage)
                    .ok_or_else(|| ClientError::new(format!("bad memory value {:?}", parsed.mem_usage)))?,
            });
        }
        Ok(containers)
    }
}

#[async_trait]
impl ResourceMonitor for DockerStatsMonitor {
    async fn sample(&self) -> Result<Vec<ContainerUsage>, ClientError> {
        self.collect().await
    }
}

/// Whole-host fallback for environments where `docker stats` is unavailable.
/// Reports a single pseudo-container covering the whole machine.
pub struct HostMonitor {
    system: Mutex<sysinfo::System>,
}

impl HostMonitor {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(sysinfo::System::new()),
        }
    }
}

impl Default for HostMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceMonitor for HostMonitor {
    async fn sample(&self) -> Result<Vec<ContainerUsage>, ClientError> {
        let mut system = self
            .system
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        system.refresh_cpu_usage();
        system.refresh_memory();
        let cpu_percent = f64::from(system.global_cpu_usage());
        let mem_bytes = system.used_memory();
        Ok(vec![ContainerUsage {
            name: "host".into(),
            cpu_percent,
            mem_bytes,
        }])
    }
}

fn parse_percent(text: &str) -> Option<f64> {
    text.trim().trim_end_matches('%').parse().ok()
}

/// Parse the used part of docker's `MemUsage` column (`1.5GiB / 7.7GiB`).
fn parse_mem_usage(text: &str) -> Option<u64> {
    let used = text.split('/').next()?.trim();
    parse_size(used)
}

fn parse_size(text: &str) -> Option<u64> {
    let split = text.find(|c: char| c.is_ascii_alphabetic())?;
    let (value, unit) = text.split_at(split);
    let value: f64 = value.trim().parse().ok()?;
    let multiplier: f64 = match unit.trim() {
        "B" => 1.0,
        "KiB" => 1024.0,
        "MiB" => 1024.0 * 1024.0,
        "GiB" => 1024.0 * 1024.0 * 1024.0,
        "TiB" => 1024.0_f64.powi(4),
        "kB" => 1e3,
        "MB" => 1e6,
        "GB" => 1e9,
        "TB" => 1e12,
        _ => return None,
    };
    if value < 0.0 {
        return None;
    }
    Some((value * multiplier) as u64)
}
