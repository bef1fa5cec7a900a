use std::process::Stdio;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use super::{InstanceInfo, Provisioner};
use crate::config::types::ResolvedConfig;
use crate::state::models::InstanceState;

pub const LOCAL_EXEC: &str = "local-exec";

/// Runs `command` through `sh -c` on the machine running the apply.
///
/// Optional settings: `working_dir`, and `environment` (a map of extra env vars).
#[derive(Debug, Default)]
pub struct LocalExec;

impl LocalExec {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Provisioner for LocalExec {
    async fn provision(
        &self,
        info: &InstanceInfo,
        state: &InstanceState,
        config: &ResolvedConfig,
        _connection: &ResolvedConfig,
    ) -> Result<()> {
        let Some(command) = config.get("command").and_then(|c| c.as_str()) else {
            bail!("local-exec: 'command' must be a string");
        };
        tracing::info!(
            id = %info.id,
            instance = %state.id,
            command = command,
            "Running local-exec"
        );

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .env("CONVERGE_RESOURCE", &info.id)
            .env("CONVERGE_INSTANCE_ID", &state.id)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = config.get("working_dir").and_then(|d| d.as_str()) {
            cmd.current_dir(dir);
        }
        if let Some(env) = config.get("environment").and_then(|e| e.as_object()) {
            for (key, value) in env {
                let value = match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                cmd.env(key, value);
            }
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn local-exec for {}", info.id))?;

        let stdout = child.stdout.take().context("local-exec stdout not captured")?;
        let stderr = child.stderr.take().context("local-exec stderr not captured")?;
        let mut stdout_stream = BufReader::new(stdout).lines();
        let mut stderr_stream = BufReader::new(stderr).lines();

        let stdout_handle = tokio::spawn(async move {
            while let Ok(Some(line)) = stdout_stream.next_line().await {
                tracing::debug!(stream = "stdout", "{}", line);
            }
        });
        let stderr_handle = tokio::spawn(async move {
            let mut lines = Vec::new();
            while let Ok(Some(line)) = stderr_stream.next_line().await {
                tracing::debug!(stream = "stderr", "{}", line);
                lines.push(line);
            }
            lines
        });

        stdout_handle.await?;
        let stderr_lines = stderr_handle.await?;
        let status = child.wait().await?;

        if !status.success() {
            bail!(
                "local-exec exited with code {}: {}",
                status.code().unwrap_or(-1),
                stderr_lines.join("\n")
            );
        }
        Ok(())
    }
}
