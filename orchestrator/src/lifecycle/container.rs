//! Container backend: shells out to the `docker` CLI. No docker SDK crate
//! appears anywhere in this workspace's dependency corpus, so lifecycle
//! actions are real subprocess invocations rather than a fabricated binding.

use crate::config::ChunkServerEntry;
use crate::lifecycle::PollResult;
use anyhow::{anyhow, bail};
use std::collections::HashMap;
use tokio::process::Command;

pub async fn start(entry: &ChunkServerEntry, env: &HashMap<String, String>) -> anyhow::Result<String> {
	let image = entry.container_image.clone().ok_or_else(|| anyhow!("chunk server {} has no container_image configured", entry.id))?;

	ensure_image_present(&image).await?;

	let mut args = vec!["create".to_string(), "--name".to_string(), format!("voxelcluster-{}", entry.id)];
	for (key, value) in env {
		args.push("-e".into());
		args.push(format!("{key}={value}"));
	}
	args.push(image);
	args.extend(entry.args.clone());

	let output = Command::new("docker").args(&args).output().await?;
	if !output.status.success() {
		bail!("docker create failed: {}", String::from_utf8_lossy(&output.stderr));
	}
	let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();

	let start = Command::new("docker").args(["start", &container_id]).status().await?;
	if !start.success() {
		bail!("docker start failed for container {container_id}");
	}

	Ok(container_id)
}

async fn ensure_image_present(image: &str) -> anyhow::Result<()> {
	let inspect = Command::new("docker").args(["image", "inspect", image]).output().await?;
	if inspect.status.success() {
		return Ok(());
	}
	let pull = Command::new("docker").args(["pull", image]).status().await?;
	if !pull.success() {
		bail!("failed to pull image {image}");
	}
	Ok(())
}

pub async fn poll(container_id: &str) -> PollResult {
	let output = match Command::new("docker").args(["inspect", "-f", "{{.State.Status}}|{{.State.ExitCode}}", container_id]).output().await {
		Ok(output) if output.status.success() => output,
		Ok(output) => return PollResult::Failed(String::from_utf8_lossy(&output.stderr).trim().to_string()),
		Err(error) => return PollResult::Failed(error.to_string()),
	};

	let text = String::from_utf8_lossy(&output.stdout);
	let mut parts = text.trim().splitn(2, '|');
	let status = parts.next().unwrap_or("");
	let exit_code: i32 = parts.next().unwrap_or("0").parse().unwrap_or(0);

	match status {
		"running" | "created" | "restarting" => PollResult::Running,
		"exited" if exit_code == 0 => PollResult::Exited,
		"exited" => PollResult::Failed(format!("container exited with code {exit_code}")),
		"dead" => PollResult::Failed("container is dead".into()),
		other => PollResult::Failed(format!("unrecognized container status {other:?}")),
	}
}

/// 10s graceful stop timeout, enforced by `docker stop`'s own `-t` flag.
pub async fn stop(container_id: &str) -> anyhow::Result<()> {
	Command::new("docker").args(["stop", "-t", "10", container_id]).status().await?;
	Ok(())
}
