use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;

use replay_core::{ClientError, DeploymentManager, ServiceManager};

/// Manages the target deployment and its dependent services through
/// `docker compose`. One instance covers both roles: bringing up workload
/// dependencies (kafka, schema registry, ...) and cycling the target itself
/// between benchmark runs.
pub struct ComposeManager {
    compose_file: PathBuf,
    project: String,
    target_service: String,
}

impl ComposeManager {
    pub fn new(compose_file: PathBuf, project: impl Into<String>) -> Self {
        Self {
            compose_file,
            project: project.into(),
            target_service: "materialized".into(),
        }
    }

    fn command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new("docker");
        cmd.arg("compose")
            .arg("-f")
            .arg(&self.compose_file)
            .arg("-p")
            .arg(&self.project)
            .stdin(Stdio::null());
        cmd
    }

    async fn run(&self, args: &[&str]) -> Result<(), ClientError> {
        let output = self
            .command()
            .args(args)
            .output()
            .await
            .map_err(|err| ClientError::new(format!("docker compose failed to start: {err}")))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(ClientError::new(format!(
                "docker compose {} failed ({}): {}",
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    /// Drop the target's state volume so the next deployment starts from an
    /// empty catalog. Missing volume is fine.
    async fn remove_state_volume(&self) -> Result<(), ClientError> {
        let volume = format!("{}_mzdata", self.project);
        let output = tokio::process::Command::new("docker")
            .args(["volume", "rm", "-f", &volume])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|err| ClientError::new(format!("docker failed to start: {err}")))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(ClientError::new(format!(
                "removing volume {volume} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

#[async_trait]
impl ServiceManager for ComposeManager {
    async fn ensure_up(&self, services: &[String]) -> Result<(), ClientError> {
        if services.is_empty() {
            return Ok(());
        }
        let mut args = vec!["up", "-d", "--wait"];
        args.extend(services.iter().map(String::as_str));
        self.run(&args).await
    }

    async fn tear_down(&self) -> Result<(), ClientError> {
        self.run(&["down", "-v"]).await
    }
}

#[async_trait]
impl DeploymentManager for ComposeManager {
    fn resolve(&self, target: &str) -> Result<String, ClientError> {
        if target == "latest" || is_version_tag(target) {
            Ok(target.to_string())
        } else {
            Err(ClientError::new(format!(
                "unknown comparison target {target:?} (expected `latest` or a vX.Y.Z tag)"
            )))
        }
    }

    async fn deploy(&self, version: Option<&str>) -> Result<(), ClientError> {
        self.run(&["kill", &self.target_service]).await?;
        self.run(&["rm", "-f", "-v", &self.target_service]).await?;
        self.remove_state_volume().await?;

        let mut cmd = self.command();
        if let Some(version) = version {
            cmd.env("REPLAY_TARGET_VERSION", version);
        }
        let output = cmd
            .args(["up", "-d", "--wait", &self.target_service])
            .output()
            .await
            .map_err(|err| ClientError::new(format!("docker compose failed to start: {err}")))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(ClientError::new(format!(
                "deploying {} failed ({}): {}",
                version.unwrap_or("current build"),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    async fn tear_down(&self) -> Result<(), ClientError> {
        self.run(&["kill", &self.target_service]).await?;
        self.run(&["rm", "-f", "-v", &self.target_service]).await
    }
}

fn is_version_tag(tag: &str) -> bool {
    let Some(rest) = tag.strip_prefix('v') else {
        return false;
    };
    let mut parts = rest.split('.');
    let all_numeric = parts.all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));
    all_numeric && rest.split('.').count() == 3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_latest_and_version_tags() {
        let manager = ComposeManager::new(PathBuf::from("compose.yaml"), "replay");
        assert!(manager.resolve("latest").is_ok());
        assert!(manager.resolve("v0.127.0").is_ok());
        assert!(manager.resolve("v1.2.3").is_ok());
    }

    #[test]
    fn rejects_other_targets() {
        let manager = ComposeManager::new(PathBuf::from("compose.yaml"), "replay");
        assert!(manager.resolve("main").is_err());
        assert!(manager.resolve("v1.2").is_err());
        assert!(manager.resolve("1.2.3").is_err());
        assert!(manager.resolve("v1.2.x").is_err());
    }
}
