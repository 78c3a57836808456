//! Builds the chunk-config payload injected into a managed process's
//! environment (spec §6, "Chunk configuration payload").

use crate::config::{ChunkServerEntry, WorldConfig};
use crate::topology::NeighborLink;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::json;

fn config_value(server_id: u64, entry: &ChunkServerEntry, world: &WorldConfig, neighbors: &[NeighborLink], data_root: &std::path::Path, seed: u64) -> serde_json::Value {
	json!({
		"server_id": server_id,
		"listen": entry.listen_address,
		"region": {
			"origin_x": entry.global_origin.chunk_x,
			"origin_y": entry.global_origin.chunk_y,
			"chunks_per_axis": entry.chunk_span.chunks_x,
			"width": world.chunk_width,
			"depth": world.chunk_depth,
			"height": world.chunk_height,
		},
		"data_root": data_root.join(&entry.id),
		"neighbors": neighbors.iter().map(|n| json!({
			"endpoint": n.endpoint,
			"delta_x": n.delta_x,
			"delta_y": n.delta_y,
		})).collect::<Vec<_>>(),
		"generation_seed": seed,
	})
}

/// Returns `(CHUNK_CONFIG_JSON, CHUNK_CONFIG_YAML_B64)`, per spec §6 the
/// chunk server prefers JSON but either is sufficient on its own.
pub fn build(server_id: u64, entry: &ChunkServerEntry, world: &WorldConfig, neighbors: &[NeighborLink], data_root: &std::path::Path, seed: u64) -> (String, String) {
	let value = config_value(server_id, entry, world, neighbors, data_root, seed);
	let json_payload = value.to_string();
	let yaml_payload = serde_yaml::to_string(&value).unwrap_or_default();
	let yaml_b64 = STANDARD.encode(yaml_payload);
	(json_payload, yaml_b64)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::{ChunkOrigin, ChunkSpan};
	use std::collections::HashMap;
	use std::path::PathBuf;

	#[test]
	fn json_payload_round_trips_through_serde_json() {
		let entry = ChunkServerEntry {
			id: "a".into(),
			global_origin: ChunkOrigin { chunk_x: 0, chunk_y: 0 },
			chunk_span: ChunkSpan { chunks_x: 4, chunks_y: 4 },
			executable: None,
			container_image: Some("image".into()),
			args: vec![],
			env: HashMap::new(),
			listen_address: "0.0.0.0:9800".parse().unwrap(),
			http_address: "0.0.0.0:9801".parse().unwrap(),
		};
		let world = WorldConfig { chunk_width: 16, chunk_depth: 16, chunk_height: 64, blocks: vec![], day_length: 1200.0, initial_hour: 0.0 };
		let (json_payload, yaml_b64) = build(7, &entry, &world, &[], &PathBuf::from("./data"), 42);

		let value: serde_json::Value = serde_json::from_str(&json_payload).unwrap();
		assert_eq!(value["server_id"], 7);
		assert_eq!(value["region"]["chunks_per_axis"], 4);
		assert!(!yaml_b64.is_empty());
	}
}
