//! Starts, watches, and stops chunk-server processes across the three
//! runtime backends (spec §4.10).

pub mod container;
pub mod local;
pub mod payload;
pub mod pod;

use crate::config::{ChunkServerEntry, ClusterConfig, WorldConfig};
use crate::runtime_detector::RuntimeBackend;
use crate::topology::{self, NeighborLink};
use dashmap::DashMap;
use log::warn;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProcessStatus {
	Starting,
	Pending,
	Running,
	Exited,
	Stopped,
}

#[derive(Clone, Debug)]
pub struct ProcessSnapshot {
	pub id: String,
	pub status: ProcessStatus,
	pub listen_address: SocketAddr,
	pub http_address: SocketAddr,
	pub started_at: Option<OffsetDateTime>,
	pub stopped_at: Option<OffsetDateTime>,
	pub last_error: Option<String>,
}

pub(crate) enum PollResult {
	Pending,
	Running,
	Exited,
	Failed(String),
}

enum Handle {
	Local(tokio::process::Child),
	Container(String),
	Pod(String),
}

struct ManagedProcess {
	entry: ChunkServerEntry,
	status: ProcessStatus,
	started_at: Option<OffsetDateTime>,
	stopped_at: Option<OffsetDateTime>,
	last_error: Option<String>,
	handle: Option<Handle>,
}

#[derive(Debug, Error)]
pub enum LifecycleError {
	#[error("chunk server {id}: {source}")]
	Start { id: String, source: anyhow::Error },
	#[error("chunk server {0} is not managed")]
	Unknown(String),
}

/// Deterministic FNV-1a fold from a configured string id to the `u64`
/// `server_id` the chunk-server wire protocol and config payload expect.
fn derive_server_id(id: &str) -> u64 {
	const FNV_OFFSET: u64 = 0xcbf29ce484222325;
	const FNV_PRIME: u64 = 0x100000001b3;
	id.bytes().fold(FNV_OFFSET, |hash, byte| (hash ^ byte as u64).wrapping_mul(FNV_PRIME))
}

fn set_status(processes: &DashMap<String, ManagedProcess>, id: &str, status: ProcessStatus, error: Option<String>) {
	if let Some(mut process) = processes.get_mut(id) {
		process.status = status;
		if error.is_some() {
			process.last_error = error;
		}
		if matches!(status, ProcessStatus::Exited | ProcessStatus::Stopped) {
			process.stopped_at = Some(OffsetDateTime::now_utc());
		}
	}
}

fn resolve_poll(poll: PollResult) -> Option<(ProcessStatus, Option<String>)> {
	match poll {
		PollResult::Pending => Some((ProcessStatus::Pending, None)),
		PollResult::Running => Some((ProcessStatus::Running, None)),
		PollResult::Exited => Some((ProcessStatus::Exited, None)),
		PollResult::Failed(message) => Some((ProcessStatus::Stopped, Some(message))),
	}
}

/// Watches a single managed process every 2s until it reaches a terminal
/// state, updating the shared table in place (spec §4.10, "poll Pod phase
/// every 2s" generalized to all three backends).
async fn watch(processes: Arc<DashMap<String, ManagedProcess>>, id: String) {
	enum Step {
		Continue,
		Terminal(ProcessStatus, Option<String>),
		PollContainer(String),
		PollPod(String),
		Gone,
	}

	let interval = Duration::from_secs(2);
	loop {
		tokio::time::sleep(interval).await;

		let step = match processes.get_mut(&id) {
			None => Step::Gone,
			Some(mut process) => match &mut process.handle {
				None => Step::Gone,
				Some(Handle::Local(child)) => match child.try_wait() {
					Ok(None) => Step::Continue,
					Ok(Some(status)) if status.success() => Step::Terminal(ProcessStatus::Exited, None),
					Ok(Some(status)) => Step::Terminal(ProcessStatus::Stopped, Some(format!("exited with {status}"))),
					Err(error) => Step::Terminal(ProcessStatus::Stopped, Some(error.to_string())),
				},
				Some(Handle::Container(container_id)) => Step::PollContainer(container_id.clone()),
				Some(Handle::Pod(pod_name)) => Step::PollPod(pod_name.clone()),
			},
		};

		let resolved = match step {
			Step::Gone => return,
			Step::Continue => continue,
			Step::Terminal(status, error) => Some((status, error)),
			Step::PollContainer(container_id) => resolve_poll(container::poll(&container_id).await),
			Step::PollPod(pod_name) => resolve_poll(pod::poll(&pod_name).await),
		};

		let Some((status, error)) = resolved else {
			continue;
		};

		let terminal = matches!(status, ProcessStatus::Exited | ProcessStatus::Stopped);
		set_status(&processes, &id, status, error);
		if terminal {
			return;
		}
	}
}

pub struct LifecycleManager {
	backend: RuntimeBackend,
	cluster: ClusterConfig,
	world: WorldConfig,
	neighbors: HashMap<String, Vec<NeighborLink>>,
	processes: Arc<DashMap<String, ManagedProcess>>,
}

impl LifecycleManager {
	pub fn new(backend: RuntimeBackend, cluster: ClusterConfig, world: WorldConfig, entries: &[ChunkServerEntry]) -> Self {
		let neighbors = topology::compute_neighbors(entries);
		let processes = DashMap::new();
		for entry in entries {
			processes.insert(
				entry.id.clone(),
				ManagedProcess { entry: entry.clone(), status: ProcessStatus::Starting, started_at: None, stopped_at: None, last_error: None, handle: None },
			);
		}
		Self { backend, cluster, world, neighbors, processes: Arc::new(processes) }
	}

	/// Starts every managed entry, aggregating per-entry failures rather
	/// than aborting the whole cluster on the first one (spec §4.10,
	/// "Failure semantics").
	pub async fn start_all(&self) -> Vec<(String, Result<(), LifecycleError>)> {
		let ids: Vec<String> = self.processes.iter().map(|entry| entry.key().clone()).collect();
		let mut results = Vec::with_capacity(ids.len());
		for id in ids {
			let result = self.start_one(&id).await;
			results.push((id, result));
		}
		results
	}

	async fn start_one(&self, id: &str) -> Result<(), LifecycleError> {
		let entry = self.processes.get(id).map(|process| process.entry.clone()).ok_or_else(|| LifecycleError::Unknown(id.to_string()))?;
		let neighbors = self.neighbors.get(id).cloned().unwrap_or_default();
		let server_id = derive_server_id(id);
		let (json_payload, yaml_b64) = payload::build(server_id, &entry, &self.world, &neighbors, &self.cluster.data_root, 0);

		let mut env = self.cluster.env.clone();
		env.extend(entry.env.clone());
		env.insert("CHUNK_LISTEN".into(), entry.listen_address.to_string());
		env.insert("CHUNK_CONFIG_JSON".into(), json_payload);
		env.insert("CHUNK_CONFIG_YAML_B64".into(), yaml_b64);

		let started = match self.backend {
			RuntimeBackend::Local => local::start(&entry, &self.cluster, &env).await.map(Handle::Local),
			RuntimeBackend::Container => container::start(&entry, &env).await.map(Handle::Container),
			RuntimeBackend::Kubernetes => pod::start(&entry, &env).await.map(Handle::Pod),
		};

		match started {
			Ok(handle) => {
				if let Some(mut process) = self.processes.get_mut(id) {
					process.status = ProcessStatus::Running;
					process.started_at = Some(OffsetDateTime::now_utc());
					process.handle = Some(handle);
				}
				tokio::spawn(watch(self.processes.clone(), id.to_string()));
				Ok(())
			}
			Err(error) => {
				if let Some(mut process) = self.processes.get_mut(id) {
					process.status = ProcessStatus::Stopped;
					process.last_error = Some(error.to_string());
				}
				Err(LifecycleError::Start { id: id.to_string(), source: error })
			}
		}
	}

	/// Signals every managed process in parallel, capped at a 10s aggregate
	/// ceiling (spec §4.10, "Failure semantics").
	pub async fn shutdown(&self) {
		let ids: Vec<String> = self.processes.iter().map(|entry| entry.key().clone()).collect();
		let handles: Vec<_> = ids
			.into_iter()
			.map(|id| {
				let processes = self.processes.clone();
				tokio::spawn(async move { stop_one(&processes, &id).await })
			})
			.collect();

		let join_all = async {
			for handle in handles {
				let _ = handle.await;
			}
		};

		if tokio::time::timeout(Duration::from_secs(10), join_all).await.is_err() {
			warn!("shutdown exceeded the 10s aggregate ceiling; some chunk servers may still be stopping");
		}
	}

	pub fn snapshot(&self) -> Vec<ProcessSnapshot> {
		self.processes
			.iter()
			.map(|entry| {
				let process = entry.value();
				ProcessSnapshot {
					id: entry.key().clone(),
					status: process.status,
					listen_address: process.entry.listen_address,
					http_address: process.entry.http_address,
					started_at: process.started_at,
					stopped_at: process.stopped_at,
					last_error: process.last_error.clone(),
				}
			})
			.collect()
	}
}

async fn stop_one(processes: &DashMap<String, ManagedProcess>, id: &str) {
	let handle = match processes.get_mut(id) {
		Some(mut process) => process.handle.take(),
		None => return,
	};
	let Some(handle) = handle else { return };

	let result = match handle {
		Handle::Local(mut child) => local::stop(&mut child).await,
		Handle::Container(container_id) => container::stop(&container_id).await,
		Handle::Pod(pod_name) => pod::stop(&pod_name).await,
	};

	if let Err(error) = result {
		warn!("failed to stop chunk server {id}: {error}");
	}
	set_status(processes, id, ProcessStatus::Stopped, None);
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn derive_server_id_is_deterministic() {
		assert_eq!(derive_server_id("a"), derive_server_id("a"));
		assert_ne!(derive_server_id("a"), derive_server_id("b"));
	}
}
