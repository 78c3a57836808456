//! Local subprocess backend: spawn, wait, SIGINT-then-kill stop (spec §4.10).

use crate::config::{ChunkServerEntry, ClusterConfig};
use anyhow::{anyhow, Context};
use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};

pub async fn start(entry: &ChunkServerEntry, cluster: &ClusterConfig, env: &HashMap<String, String>) -> anyhow::Result<Child> {
	let binary = entry
		.executable
		.clone()
		.or_else(|| cluster.default_binary.clone())
		.ok_or_else(|| anyhow!("chunk server {} has no executable and no default_binary is configured", entry.id))?;

	let child = Command::new(&binary)
		.args(&entry.args)
		.envs(env)
		.stdout(Stdio::inherit())
		.stderr(Stdio::inherit())
		.kill_on_drop(true)
		.spawn()
		.with_context(|| format!("failed to spawn {}", binary.display()))?;

	Ok(child)
}

/// SIGINT, then a 5s grace period, then SIGKILL.
pub async fn stop(child: &mut Child) -> anyhow::Result<()> {
	if let Some(pid) = child.id() {
		let _ = Command::new("kill").args(["-2", &pid.to_string()]).status().await;
	}

	match tokio::time::timeout(Duration::from_secs(5), child.wait()).await {
		Ok(Ok(_)) => Ok(()),
		Ok(Err(error)) => Err(error.into()),
		Err(_) => {
			child.kill().await?;
			Ok(())
		}
	}
}
