use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Declarative configuration for a single chunk server. Carried either as a
/// `--config` HOCON file, or injected by the orchestrator via
/// `CHUNK_CONFIG_JSON` / `CHUNK_CONFIG_YAML_B64` (spec §6). JSON is
/// preferred when both are present.
#[derive(Clone, Debug, Deserialize)]
pub struct ChunkConfig {
	pub server_id: u64,

	#[serde(default = "default_listen")]
	pub listen: SocketAddr,

	pub region: RegionConfig,

	#[serde(default = "default_data_root")]
	pub data_root: PathBuf,

	#[serde(default)]
	pub tick: TickConfig,

	#[serde(default)]
	pub persistence: PersistenceConfig,

	#[serde(default)]
	pub transport: TransportConfig,

	#[serde(default)]
	pub migration: MigrationConfig,

	#[serde(default)]
	pub stability: StabilityConfig,

	#[serde(default)]
	pub neighbors: Vec<NeighborConfig>,

	#[serde(default = "default_seed")]
	pub generation_seed: u64,
}

#[derive(Clone, Copy, Debug, Deserialize)]
pub struct RegionConfig {
	pub origin_x: i64,
	pub origin_y: i64,
	pub chunks_per_axis: u32,
	pub width: u32,
	pub depth: u32,
	pub height: u32,
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct TickConfig {
	pub rate_hz: u32,
	pub workers: usize,
}

impl Default for TickConfig {
	fn default() -> Self {
		Self { rate_hz: 20, workers: 4 }
	}
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
	pub max_chunk_file_size: u64,
}

impl Default for PersistenceConfig {
	fn default() -> Self {
		Self { max_chunk_file_size: 16 * 1024 * 1024 }
	}
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
	pub max_datagram_size: usize,
}

impl Default for TransportConfig {
	fn default() -> Self {
		Self { max_datagram_size: voxelcluster_shared::envelope::DEFAULT_MAX_DATAGRAM_SIZE }
	}
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
	pub discovery_interval_secs: u64,
	pub transfer_retry_secs: u64,
	pub drain_batch: usize,
}

impl Default for MigrationConfig {
	fn default() -> Self {
		Self { discovery_interval_secs: 5, transfer_retry_secs: 10, drain_batch: 16 }
	}
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct StabilityConfig {
	pub ground_support: f64,
	pub hanging_penalty: f64,
}

impl Default for StabilityConfig {
	fn default() -> Self {
		Self { ground_support: 1_000_000.0, hanging_penalty: 0.5 }
	}
}

#[derive(Clone, Copy, Debug, Deserialize)]
pub struct NeighborConfig {
	pub endpoint: SocketAddr,
	pub delta_x: i64,
	pub delta_y: i64,
}

fn default_listen() -> SocketAddr {
	"0.0.0.0:9800".parse().expect("valid default listen address")
}

fn default_data_root() -> PathBuf {
	PathBuf::from("./data")
}

fn default_seed() -> u64 {
	0
}

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read config file {path}: {source}")]
	Read { path: PathBuf, source: std::io::Error },
	#[error("failed to parse HOCON config: {0}")]
	Hocon(#[from] hocon::Error),
	#[error("failed to parse JSON config: {0}")]
	Json(#[from] serde_json::Error),
	#[error("failed to parse YAML config: {0}")]
	Yaml(#[from] serde_yaml::Error),
	#[error("failed to base64-decode CHUNK_CONFIG_YAML_B64: {0}")]
	Base64(#[from] base64::DecodeError),
	#[error("no configuration found: neither CHUNK_CONFIG_JSON/CHUNK_CONFIG_YAML_B64 nor --config were provided")]
	Missing,
}

impl ChunkConfig {
	/// Loads configuration following spec §6: prefer `CHUNK_CONFIG_JSON`,
	/// then `CHUNK_CONFIG_YAML_B64`, then the `--config` file. `CHUNK_LISTEN`
	/// overrides `listen` regardless of source when present.
	pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
		let mut config = if let Ok(json) = std::env::var("CHUNK_CONFIG_JSON") {
			serde_json::from_str(&json)?
		} else if let Ok(b64) = std::env::var("CHUNK_CONFIG_YAML_B64") {
			let yaml = STANDARD.decode(b64.as_bytes())?;
			serde_yaml::from_slice(&yaml)?
		} else if let Some(path) = config_path {
			let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read { path: path.to_owned(), source })?;
			hocon::de::from_str(&text)?
		} else {
			return Err(ConfigError::Missing);
		};

		if let Ok(listen) = std::env::var("CHUNK_LISTEN") {
			if let Ok(addr) = listen.parse() {
				Self::override_listen(&mut config, addr);
			}
		}

		Ok(config)
	}

	fn override_listen(config: &mut ChunkConfig, addr: SocketAddr) {
		config.listen = addr;
	}
}
