//! Kubernetes backend: shells out to the `kubectl` CLI. Mirrors
//! [`super::container`]'s reasoning — no `kube`/`k8s-openapi` binding is
//! pulled in; a Pod manifest is applied and polled via the real binary.

use crate::config::ChunkServerEntry;
use crate::lifecycle::PollResult;
use anyhow::{bail, Context};
use std::collections::HashMap;
use std::time::Duration;
use tokio::process::Command;

fn namespace() -> String {
	std::env::var("POD_NAMESPACE").unwrap_or_else(|_| "default".into())
}

fn pod_name(entry: &ChunkServerEntry) -> String {
	format!("voxelcluster-{}", entry.id)
}

fn manifest(entry: &ChunkServerEntry, env: &HashMap<String, String>) -> String {
	let name = pod_name(entry);
	let image = entry.container_image.as_deref().unwrap_or("voxelcluster-chunk-server:latest");
	let env_entries: String =
		env.iter().map(|(key, value)| format!("        - name: {key}\n          value: {:?}\n", value)).collect::<Vec<_>>().concat();
	let args_entries: String = entry.args.iter().map(|arg| format!("        - {:?}\n", arg)).collect::<Vec<_>>().concat();

	format!(
		"apiVersion: v1\nkind: Pod\nmetadata:\n  name: {name}\n  namespace: {ns}\n  labels:\n    app: voxelcluster-chunk-server\nspec:\n  restartPolicy: Never\n  containers:\n    - name: chunk-server\n      image: {image}\n{args_header}{args_entries}      env:\n{env_entries}",
		ns = namespace(),
		args_header = if entry.args.is_empty() { "".to_string() } else { "      args:\n".to_string() },
	)
}

pub async fn start(entry: &ChunkServerEntry, env: &HashMap<String, String>) -> anyhow::Result<String> {
	let name = pod_name(entry);
	let ns = namespace();

	let existing = Command::new("kubectl").args(["get", "pod", &name, "-n", &ns]).output().await?;
	if existing.status.success() {
		delete_and_wait(&name, &ns).await?;
	}

	let manifest = manifest(entry, env);
	let mut child = Command::new("kubectl")
		.args(["apply", "-f", "-"])
		.stdin(std::process::Stdio::piped())
		.spawn()
		.context("failed to spawn kubectl apply")?;

	{
		use tokio::io::AsyncWriteExt;
		let stdin = child.stdin.as_mut().context("kubectl apply stdin unavailable")?;
		stdin.write_all(manifest.as_bytes()).await?;
	}

	let status = child.wait().await?;
	if !status.success() {
		bail!("kubectl apply failed for pod {name}");
	}

	Ok(name)
}

async fn delete_and_wait(name: &str, namespace: &str) -> anyhow::Result<()> {
	Command::new("kubectl").args(["delete", "pod", name, "-n", namespace, "--wait=true", "--timeout=30s"]).status().await?;
	Ok(())
}

pub async fn poll(name: &str) -> PollResult {
	let ns = namespace();
	let output = match Command::new("kubectl").args(["get", "pod", name, "-n", &ns, "-o", "jsonpath={.status.phase}"]).output().await {
		Ok(output) if output.status.success() => output,
		Ok(output) => return PollResult::Failed(String::from_utf8_lossy(&output.stderr).trim().to_string()),
		Err(error) => return PollResult::Failed(error.to_string()),
	};

	match String::from_utf8_lossy(&output.stdout).trim() {
		"Pending" => PollResult::Pending,
		"Running" => PollResult::Running,
		"Succeeded" => PollResult::Exited,
		"Failed" => PollResult::Failed("pod phase is Failed".into()),
		other => PollResult::Failed(format!("unrecognized pod phase {other:?}")),
	}
}

/// The pod backend has no separate graceful-stop RPC; delete with a 30s
/// wait covers both the explicit stop path and the name-collision restart.
pub async fn stop(name: &str) -> anyhow::Result<()> {
	let ns = namespace();
	let _ = tokio::time::timeout(Duration::from_secs(30), Command::new("kubectl").args(["delete", "pod", name, "-n", &ns, "--wait=true"]).status()).await;
	Ok(())
}
