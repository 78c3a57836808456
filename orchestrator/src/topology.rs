//! Derives each chunk server's neighbor list from the declarative cluster
//! layout, so operators only need to describe regions once (spec §4.9's
//! neighbor handshake is driven by this).

use crate::config::ChunkServerEntry;
use std::collections::HashMap;
use std::net::SocketAddr;

#[derive(Clone, Copy, Debug)]
pub struct NeighborLink {
	pub endpoint: SocketAddr,
	pub delta_x: i64,
	pub delta_y: i64,
}

/// Two regions are neighbors when their chunk rectangles share a full edge:
/// touching on one axis, overlapping on the other.
pub fn compute_neighbors(entries: &[ChunkServerEntry]) -> HashMap<String, Vec<NeighborLink>> {
	let mut neighbors: HashMap<String, Vec<NeighborLink>> = HashMap::new();

	for a in entries {
		let a_x0 = a.global_origin.chunk_x;
		let a_y0 = a.global_origin.chunk_y;
		let a_x1 = a_x0 + a.chunk_span.chunks_x as i64;
		let a_y1 = a_y0 + a.chunk_span.chunks_y as i64;

		for b in entries {
			if a.id == b.id {
				continue;
			}
			let b_x0 = b.global_origin.chunk_x;
			let b_y0 = b.global_origin.chunk_y;
			let b_x1 = b_x0 + b.chunk_span.chunks_x as i64;
			let b_y1 = b_y0 + b.chunk_span.chunks_y as i64;

			let touches_on_x = a_x1 == b_x0 || b_x1 == a_x0;
			let overlaps_on_y = a_y0.max(b_y0) < a_y1.min(b_y1);
			let touches_on_y = a_y1 == b_y0 || b_y1 == a_y0;
			let overlaps_on_x = a_x0.max(b_x0) < a_x1.min(b_x1);

			if (touches_on_x && overlaps_on_y) || (touches_on_y && overlaps_on_x) {
				neighbors.entry(a.id.clone()).or_default().push(NeighborLink {
					endpoint: b.listen_address,
					delta_x: b_x0 - a_x0,
					delta_y: b_y0 - a_y0,
				});
			}
		}
	}

	neighbors
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::{ChunkOrigin, ChunkSpan};
	use std::collections::HashMap;

	fn entry(id: &str, chunk_x: i64, chunk_y: i64, chunks_x: u32, chunks_y: u32, listen_port: u16) -> ChunkServerEntry {
		ChunkServerEntry {
			id: id.into(),
			global_origin: ChunkOrigin { chunk_x, chunk_y },
			chunk_span: ChunkSpan { chunks_x, chunks_y },
			executable: None,
			container_image: Some("image".into()),
			args: vec![],
			env: HashMap::new(),
			listen_address: format!("0.0.0.0:{listen_port}").parse().unwrap(),
			http_address: format!("0.0.0.0:{}", listen_port + 1).parse().unwrap(),
		}
	}

	#[test]
	fn adjacent_east_west_regions_see_each_other() {
		let entries = vec![entry("a", 0, 0, 4, 4, 9800), entry("b", 4, 0, 4, 4, 9810)];
		let neighbors = compute_neighbors(&entries);
		let a_neighbors = &neighbors["a"];
		assert_eq!(a_neighbors.len(), 1);
		assert_eq!(a_neighbors[0].delta_x, 4);
		assert_eq!(a_neighbors[0].delta_y, 0);

		let b_neighbors = &neighbors["b"];
		assert_eq!(b_neighbors[0].delta_x, -4);
	}

	#[test]
	fn diagonal_touch_is_not_a_neighbor() {
		let entries = vec![entry("a", 0, 0, 4, 4, 9800), entry("b", 4, 4, 4, 4, 9810)];
		let neighbors = compute_neighbors(&entries);
		assert!(neighbors.get("a").is_none());
	}

	#[test]
	fn distant_regions_are_not_neighbors() {
		let entries = vec![entry("a", 0, 0, 4, 4, 9800), entry("b", 100, 100, 4, 4, 9810)];
		let neighbors = compute_neighbors(&entries);
		assert!(neighbors.get("a").is_none());
	}
}
