use crate::error::OutOfRegion;
use serde::{Deserialize, Serialize};

/// Global chunk coordinates.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ChunkCoord {
	pub x: i64,
	pub y: i64,
}

impl ChunkCoord {
	pub fn new(x: i64, y: i64) -> Self {
		Self { x, y }
	}
}

/// Global block coordinates. `z` is always vertical, ground at `z = 0`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct BlockCoord {
	pub x: i64,
	pub y: i64,
	pub z: i64,
}

impl BlockCoord {
	pub fn new(x: i64, y: i64, z: i64) -> Self {
		Self { x, y, z }
	}
}

/// A local index within a chunk, `0 <= x < W`, `0 <= y < D`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct LocalIndex {
	pub x: u32,
	pub y: u32,
}

/// Inclusive block-coordinate bounding box.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Bounds {
	pub min: BlockCoord,
	pub max: BlockCoord,
}

/// Chunk width (X), depth (Y), and height (Z) in blocks.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
	pub w: u32,
	pub d: u32,
	pub h: u32,
}

/// Mathematical floor division, correct for negative `a` (unlike truncating `/`).
pub fn floor_div(a: i64, b: i64) -> i64 {
	let q = a / b;
	let r = a % b;
	if (r != 0) && ((r < 0) != (b < 0)) {
		q - 1
	} else {
		q
	}
}

pub fn floor_mod(a: i64, b: i64) -> i64 {
	a - floor_div(a, b) * b
}

/// `{origin: ChunkCoord, chunksPerAxis, dim}` — the rectangular grid of
/// chunks a single chunk server owns. Pure and stateless: every operation
/// here is a closed-form computation with no shared state.
#[derive(Clone, Copy, Debug)]
pub struct ServerRegion {
	pub origin: ChunkCoord,
	pub chunks_per_axis: u32,
	pub dim: Dimensions,
}

impl ServerRegion {
	pub fn new(origin: ChunkCoord, chunks_per_axis: u32, dim: Dimensions) -> Self {
		Self { origin, chunks_per_axis, dim }
	}

	/// Whether global chunk `c` belongs to this region.
	pub fn contains_global_chunk(&self, c: ChunkCoord) -> bool {
		let span = self.chunks_per_axis as i64;
		c.x >= self.origin.x && c.x < self.origin.x + span && c.y >= self.origin.y && c.y < self.origin.y + span
	}

	/// Global chunk coordinates for a local index within this region.
	pub fn local_to_global(&self, local: LocalIndex) -> ChunkCoord {
		ChunkCoord::new(self.origin.x + local.x as i64, self.origin.y + local.y as i64)
	}

	/// Local index for a global chunk coordinate, or [`OutOfRegion`] if it
	/// does not belong to this region.
	pub fn global_to_local(&self, c: ChunkCoord) -> Result<LocalIndex, OutOfRegion> {
		if !self.contains_global_chunk(c) {
			return Err(OutOfRegion);
		}
		Ok(LocalIndex { x: (c.x - self.origin.x) as u32, y: (c.y - self.origin.y) as u32 })
	}

	/// Inclusive block bounds owned by global chunk `c`, independent of
	/// whether `c` belongs to this region (pure coordinate algebra).
	pub fn chunk_bounds(&self, c: ChunkCoord) -> Bounds {
		let min = BlockCoord::new(c.x * self.dim.w as i64, c.y * self.dim.d as i64, 0);
		let max = BlockCoord::new(min.x + self.dim.w as i64 - 1, min.y + self.dim.d as i64 - 1, self.dim.h as i64 - 1);
		Bounds { min, max }
	}

	/// Locates the chunk owning global block `b`. Requires `b.z` within
	/// `[0, H)`; the chunk coordinate is returned regardless of whether it
	/// is owned by this region — the `in_region` flag reports that.
	pub fn locate_block(&self, b: BlockCoord) -> Result<(ChunkCoord, bool), OutOfRegion> {
		if b.z < 0 || b.z >= self.dim.h as i64 {
			return Err(OutOfRegion);
		}

		let chunk = ChunkCoord::new(floor_div(b.x, self.dim.w as i64), floor_div(b.y, self.dim.d as i64));
		let in_region = self.contains_global_chunk(chunk);
		Ok((chunk, in_region))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn region() -> ServerRegion {
		ServerRegion::new(ChunkCoord::new(-2, -2), 4, Dimensions { w: 16, d: 16, h: 64 })
	}

	#[test]
	fn floor_div_handles_negatives() {
		assert_eq!(floor_div(-1, 16), -1);
		assert_eq!(floor_div(-16, 16), -1);
		assert_eq!(floor_div(-17, 16), -2);
		assert_eq!(floor_div(15, 16), 0);
	}

	#[test]
	fn contains_global_chunk_respects_span() {
		let region = region();
		assert!(region.contains_global_chunk(ChunkCoord::new(-2, -2)));
		assert!(region.contains_global_chunk(ChunkCoord::new(1, 1)));
		assert!(!region.contains_global_chunk(ChunkCoord::new(2, -2)));
		assert!(!region.contains_global_chunk(ChunkCoord::new(-3, -2)));
	}

	#[test]
	fn global_to_local_round_trips() {
		let region = region();
		let local = region.global_to_local(ChunkCoord::new(-1, 0)).expect("in region");
		assert_eq!(local, LocalIndex { x: 1, y: 2 });
		assert_eq!(region.local_to_global(local), ChunkCoord::new(-1, 0));
	}

	#[test]
	fn global_to_local_out_of_region() {
		let region = region();
		assert!(region.global_to_local(ChunkCoord::new(100, 100)).is_err());
	}

	#[test]
	fn locate_block_negative_coordinates_floor_correctly() {
		let region = region();
		let (chunk, in_region) = region.locate_block(BlockCoord::new(-1, -1, 0)).expect("valid z");
		assert_eq!(chunk, ChunkCoord::new(-1, -1));
		assert!(in_region);
	}

	#[test]
	fn locate_block_rejects_out_of_height() {
		let region = region();
		assert!(region.locate_block(BlockCoord::new(0, 0, -1)).is_err());
		assert!(region.locate_block(BlockCoord::new(0, 0, 64)).is_err());
	}
}
