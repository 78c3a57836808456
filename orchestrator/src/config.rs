//! Declarative cluster layout: YAML config loader for the orchestrator
//! (spec §6, §8 scenario f, and §2's "emits default on first run").

use log::info;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct OrchestratorConfig {
	pub listen_address: SocketAddr,
	pub http_port: u16,
	pub world: WorldConfig,
	#[serde(default)]
	pub cluster: ClusterConfig,
	pub chunk_servers: Vec<ChunkServerEntry>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct WorldConfig {
	pub chunk_width: u32,
	pub chunk_depth: u32,
	pub chunk_height: u32,
	#[serde(default)]
	pub blocks: Vec<BlockDef>,
	#[serde(default = "default_day_length")]
	pub day_length: f64,
	#[serde(default)]
	pub initial_hour: f64,
}

fn default_day_length() -> f64 {
	1200.0
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct BlockDef {
	pub id: String,
	pub color: String,
	#[serde(default)]
	pub vein_min_size: Option<u32>,
	#[serde(default)]
	pub vein_max_size: Option<u32>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ClusterConfig {
	pub default_binary: Option<PathBuf>,
	#[serde(default = "default_data_root")]
	pub data_root: PathBuf,
	#[serde(default)]
	pub env: HashMap<String, String>,
}

fn default_data_root() -> PathBuf {
	PathBuf::from("./data")
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ChunkOrigin {
	pub chunk_x: i64,
	pub chunk_y: i64,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct ChunkSpan {
	pub chunks_x: u32,
	pub chunks_y: u32,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ChunkServerEntry {
	pub id: String,
	pub global_origin: ChunkOrigin,
	pub chunk_span: ChunkSpan,
	pub executable: Option<PathBuf>,
	pub container_image: Option<String>,
	#[serde(default)]
	pub args: Vec<String>,
	#[serde(default)]
	pub env: HashMap<String, String>,
	pub listen_address: SocketAddr,
	pub http_address: SocketAddr,
}

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read config file {path}: {source}")]
	Read { path: PathBuf, source: std::io::Error },
	#[error("failed to write default config to {path}: {source}")]
	Write { path: PathBuf, source: std::io::Error },
	#[error("failed to parse YAML config: {0}")]
	Yaml(#[from] serde_yaml::Error),
	#[error("{0}")]
	Invalid(String),
}

impl OrchestratorConfig {
	/// A single-region, local-subprocess layout, written to `path` the first
	/// time the orchestrator is started against it (spec §2, Config Loader).
	fn default_layout() -> Self {
		Self {
			listen_address: "127.0.0.1:9700".parse().unwrap(),
			http_port: 8080,
			world: WorldConfig { chunk_width: 16, chunk_depth: 16, chunk_height: 64, blocks: Vec::new(), day_length: default_day_length(), initial_hour: 6.0 },
			cluster: ClusterConfig { default_binary: Some(PathBuf::from("./chunk-server")), data_root: default_data_root(), env: HashMap::new() },
			chunk_servers: vec![ChunkServerEntry {
				id: "default".into(),
				global_origin: ChunkOrigin { chunk_x: 0, chunk_y: 0 },
				chunk_span: ChunkSpan { chunks_x: 4, chunks_y: 4 },
				executable: None,
				container_image: None,
				args: Vec::new(),
				env: HashMap::new(),
				listen_address: "127.0.0.1:9800".parse().unwrap(),
				http_address: "127.0.0.1:9801".parse().unwrap(),
			}],
		}
	}

	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		if !path.exists() {
			let default = Self::default_layout();
			let yaml = serde_yaml::to_string(&default)?;
			if let Some(parent) = path.parent() {
				if !parent.as_os_str().is_empty() {
					std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write { path: path.to_owned(), source })?;
				}
			}
			std::fs::write(path, yaml).map_err(|source| ConfigError::Write { path: path.to_owned(), source })?;
			info!("no config found at {}; wrote a default single-region cluster layout", path.display());
		}

		let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read { path: path.to_owned(), source })?;
		let config: Self = serde_yaml::from_str(&text)?;
		config.validate()?;
		Ok(config)
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.chunk_servers.is_empty() {
			return Err(ConfigError::Invalid("chunk_servers must not be empty".into()));
		}

		let mut seen_ids = std::collections::HashSet::new();
		for entry in &self.chunk_servers {
			if entry.id.trim().is_empty() {
				return Err(ConfigError::Invalid("chunk server id must not be empty".into()));
			}
			if !seen_ids.insert(entry.id.clone()) {
				return Err(ConfigError::Invalid(format!("duplicate chunk server id {:?}", entry.id)));
			}
			if entry.chunk_span.chunks_x == 0 || entry.chunk_span.chunks_y == 0 {
				return Err(ConfigError::Invalid(format!("chunk server {:?} has a non-positive chunk_span", entry.id)));
			}
			if entry.chunk_span.chunks_x != entry.chunk_span.chunks_y {
				return Err(ConfigError::Invalid(format!("chunk server {:?} must have a square chunk_span (chunks_x == chunks_y)", entry.id)));
			}
			if entry.executable.is_none() && entry.container_image.is_none() && self.cluster.default_binary.is_none() {
				return Err(ConfigError::Invalid(format!(
					"chunk server {:?} has neither executable nor container_image, and cluster.default_binary is unset",
					entry.id
				)));
			}
		}

		let mut seen_blocks = std::collections::HashSet::new();
		for block in &self.world.blocks {
			if !seen_blocks.insert(block.id.clone()) {
				return Err(ConfigError::Invalid(format!("duplicate block id {:?}", block.id)));
			}
			let hex = block.color.strip_prefix('#').unwrap_or(&block.color);
			if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
				return Err(ConfigError::Invalid(format!("block {:?} has an invalid hex color {:?}", block.id, block.color)));
			}
			if let (Some(min), Some(max)) = (block.vein_min_size, block.vein_max_size) {
				if min > max {
					return Err(ConfigError::Invalid(format!("block {:?} has vein_min_size > vein_max_size", block.id)));
				}
			}
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample() -> OrchestratorConfig {
		OrchestratorConfig {
			listen_address: "0.0.0.0:9700".parse().unwrap(),
			http_port: 8080,
			world: WorldConfig { chunk_width: 16, chunk_depth: 16, chunk_height: 64, blocks: vec![], day_length: 1200.0, initial_hour: 6.0 },
			cluster: ClusterConfig::default(),
			chunk_servers: vec![ChunkServerEntry {
				id: "a".into(),
				global_origin: ChunkOrigin { chunk_x: 0, chunk_y: 0 },
				chunk_span: ChunkSpan { chunks_x: 2, chunks_y: 2 },
				executable: Some(PathBuf::from("/bin/chunk-server")),
				container_image: None,
				args: vec![],
				env: HashMap::new(),
				listen_address: "0.0.0.0:9800".parse().unwrap(),
				http_address: "0.0.0.0:9801".parse().unwrap(),
			}],
		}
	}

	#[test]
	fn rejects_empty_id() {
		let mut config = sample();
		config.chunk_servers[0].id = "".into();
		assert!(config.validate().is_err());
	}

	#[test]
	fn rejects_zero_span() {
		let mut config = sample();
		config.chunk_servers[0].chunk_span = ChunkSpan { chunks_x: 0, chunks_y: 2 };
		assert!(config.validate().is_err());
	}

	#[test]
	fn rejects_missing_launch_target() {
		let mut config = sample();
		config.chunk_servers[0].executable = None;
		assert!(config.validate().is_err());
	}

	#[test]
	fn accepts_default_binary_fallback() {
		let mut config = sample();
		config.chunk_servers[0].executable = None;
		config.cluster.default_binary = Some(PathBuf::from("/bin/chunk-server"));
		assert!(config.validate().is_ok());
	}

	#[test]
	fn rejects_non_monotonic_vein_sizes() {
		let mut config = sample();
		config.world.blocks.push(BlockDef { id: "ore".into(), color: "#ff00ff".into(), vein_min_size: Some(10), vein_max_size: Some(2) });
		assert!(config.validate().is_err());
	}

	#[test]
	fn rejects_invalid_hex_color() {
		let mut config = sample();
		config.world.blocks.push(BlockDef { id: "ore".into(), color: "not-a-color".into(), vein_min_size: None, vein_max_size: None });
		assert!(config.validate().is_err());
	}

	#[test]
	fn load_emits_a_default_layout_on_first_run() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("cluster.yaml");
		assert!(!path.exists());

		let config = OrchestratorConfig::load(&path).expect("first run should synthesize a default layout");
		assert!(path.exists(), "the default layout must be persisted to disk");
		assert!(!config.chunk_servers.is_empty());

		let reloaded = OrchestratorConfig::load(&path).expect("second run should load the written default unchanged");
		assert_eq!(reloaded.chunk_servers[0].id, config.chunk_servers[0].id);
	}
}
