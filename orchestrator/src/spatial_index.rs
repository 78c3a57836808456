//! Maps a block coordinate to the chunk server that owns it (spec §4.11,
//! §8 scenario f).

use crate::config::{ChunkServerEntry, WorldConfig};

#[derive(Debug, Eq, PartialEq)]
pub struct Lookup<'a> {
	pub server_id: &'a str,
	pub listen_address: std::net::SocketAddr,
	pub http_address: std::net::SocketAddr,
}

#[derive(Debug, Eq, PartialEq)]
pub struct NotFound;

pub struct SpatialIndex<'a> {
	chunk_width: u32,
	chunk_depth: u32,
	entries: &'a [ChunkServerEntry],
}

impl<'a> SpatialIndex<'a> {
	pub fn new(world: &WorldConfig, entries: &'a [ChunkServerEntry]) -> Self {
		Self { chunk_width: world.chunk_width, chunk_depth: world.chunk_depth, entries }
	}

	/// Returns the first registered entry whose `[origin, origin+span)`
	/// chunk rectangle contains `(blockX, blockY)`'s chunk coordinate.
	pub fn lookup(&self, block_x: i64, block_y: i64) -> Result<Lookup<'_>, NotFound> {
		let chunk_x = block_x.div_euclid(self.chunk_width as i64);
		let chunk_y = block_y.div_euclid(self.chunk_depth as i64);

		for entry in self.entries {
			let origin_x = entry.global_origin.chunk_x;
			let origin_y = entry.global_origin.chunk_y;
			let end_x = origin_x + entry.chunk_span.chunks_x as i64;
			let end_y = origin_y + entry.chunk_span.chunks_y as i64;

			if chunk_x >= origin_x && chunk_x < end_x && chunk_y >= origin_y && chunk_y < end_y {
				return Ok(Lookup { server_id: &entry.id, listen_address: entry.listen_address, http_address: entry.http_address });
			}
		}

		Err(NotFound)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::{ChunkOrigin, ChunkSpan};
	use std::collections::HashMap;

	fn entry(id: &str, chunk_x: i64, chunk_y: i64, chunks_x: u32, chunks_y: u32) -> ChunkServerEntry {
		ChunkServerEntry {
			id: id.into(),
			global_origin: ChunkOrigin { chunk_x, chunk_y },
			chunk_span: ChunkSpan { chunks_x, chunks_y },
			executable: None,
			container_image: Some("image".into()),
			args: vec![],
			env: HashMap::new(),
			listen_address: "0.0.0.0:9800".parse().unwrap(),
			http_address: "0.0.0.0:9801".parse().unwrap(),
		}
	}

	fn world() -> WorldConfig {
		WorldConfig { chunk_width: 16, chunk_depth: 16, chunk_height: 64, blocks: vec![], day_length: 1200.0, initial_hour: 0.0 }
	}

	#[test]
	fn scenario_f_found() {
		let entries = vec![entry("a", 0, 0, 2, 2)];
		let index = SpatialIndex::new(&world(), &entries);
		let hit = index.lookup(16, 16).unwrap();
		assert_eq!(hit.server_id, "a");
	}

	#[test]
	fn scenario_f_not_found() {
		let entries = vec![entry("a", 0, 0, 2, 2)];
		let index = SpatialIndex::new(&world(), &entries);
		assert_eq!(index.lookup(32, 32), Err(NotFound));
	}

	#[test]
	fn negative_coordinates_floor_toward_negative_infinity() {
		let entries = vec![entry("west", -2, 0, 2, 2)];
		let index = SpatialIndex::new(&world(), &entries);
		assert!(index.lookup(-1, 0).is_ok());
		assert_eq!(index.lookup(-33, 0), Err(NotFound));
	}

	#[test]
	fn first_match_wins_on_overlap() {
		let entries = vec![entry("first", 0, 0, 4, 4), entry("second", 0, 0, 4, 4)];
		let index = SpatialIndex::new(&world(), &entries);
		assert_eq!(index.lookup(0, 0).unwrap().server_id, "first");
	}
}
