use voxelcluster_shared::block::{Block, Column};
use voxelcluster_shared::region::{ChunkCoord, Dimensions};

/// The seam the real (out-of-scope) terrain generator plugs into — spec §1
/// lists terrain noise generation as an external collaborator "via the
/// interfaces stated in §6". Mirrors the teacher's `Generator` function
/// pointer (`sector-server/src/generation.rs`) but as an object-safe trait so
/// the flat-world generator here and a future noise-based one share a seam.
pub trait ChunkGenerator: Send + Sync {
	fn generate_column(&self, chunk: ChunkCoord, local_x: u32, local_y: u32, dim: Dimensions, seed: u64) -> Column;
}

/// A flat world with a ground plane at `z = 0..ground_height`. Used for
/// tests and as the default when no richer generator is configured.
pub struct FlatWorldGenerator {
	pub ground_height: u32,
}

impl Default for FlatWorldGenerator {
	fn default() -> Self {
		Self { ground_height: 1 }
	}
}

impl ChunkGenerator for FlatWorldGenerator {
	fn generate_column(&self, _chunk: ChunkCoord, _local_x: u32, _local_y: u32, _dim: Dimensions, _seed: u64) -> Column {
		let mut column = Column::new();
		for z in 0..self.ground_height {
			column.set(z as usize, Some(Block::solid(100.0, 1_000_000.0, 1.0)));
		}
		column
	}
}
