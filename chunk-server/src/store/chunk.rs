use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Notify, RwLock};
use voxelcluster_shared::block::Column;
use voxelcluster_shared::region::{ChunkCoord, Dimensions};

/// One chunk's in-memory voxel state: `W*D` columns, indexed as
/// `local_y * W + local_x`. Mutation is serialized by the per-chunk
/// `RwLock` (spec §5: "block mutations appear in a single total order to
/// observers of that chunk").
pub struct Chunk {
	pub coord: ChunkCoord,
	pub dim: Dimensions,

	columns: RwLock<Vec<Column>>,
	light: RwLock<HashMap<(u32, u32, i64), u8>>,

	generation_started: AtomicBool,
	generated: AtomicBool,
	generation_done: Notify,

	dirty: AtomicBool,
}

impl Chunk {
	pub fn new_empty(coord: ChunkCoord, dim: Dimensions) -> Self {
		let column_count = (dim.w * dim.d) as usize;
		Self {
			coord,
			dim,
			columns: RwLock::new(vec![Column::new(); column_count]),
			light: RwLock::new(HashMap::new()),
			generation_started: AtomicBool::new(false),
			generated: AtomicBool::new(false),
			generation_done: Notify::new(),
			dirty: AtomicBool::new(false),
		}
	}

	pub fn column_index(&self, local_x: u32, local_y: u32) -> usize {
		(local_y as usize) * (self.dim.w as usize) + local_x as usize
	}

	pub fn is_generated(&self) -> bool {
		self.generated.load(Ordering::Acquire)
	}

	/// Returns `true` for exactly one caller per chunk: that caller becomes
	/// responsible for running (and persisting) generation. Every other
	/// caller should await [`Self::wait_until_generated`] instead.
	pub fn try_become_generation_owner(&self) -> bool {
		self.generation_started.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok()
	}

	pub async fn wait_until_generated(&self, cancel: &tokio_util::sync::CancellationToken) -> Result<(), voxelcluster_shared::error::Cancelled> {
		loop {
			if self.is_generated() {
				return Ok(());
			}
			let notified = self.generation_done.notified();
			if self.is_generated() {
				return Ok(());
			}
			tokio::select! {
				_ = notified => {}
				_ = cancel.cancelled() => return Err(voxelcluster_shared::error::Cancelled),
			}
		}
	}

	pub async fn set_columns(&self, columns: Vec<Column>) {
		*self.columns.write().await = columns;
		self.generated.store(true, Ordering::Release);
		self.generation_done.notify_waiters();
	}

	pub async fn column(&self, local_x: u32, local_y: u32) -> Column {
		let index = self.column_index(local_x, local_y);
		self.columns.read().await[index].clone()
	}

	pub async fn with_column_mut<R>(&self, local_x: u32, local_y: u32, f: impl FnOnce(&mut Column) -> R) -> R {
		let index = self.column_index(local_x, local_y);
		let mut columns = self.columns.write().await;
		let result = f(&mut columns[index]);
		self.dirty.store(true, Ordering::Release);
		result
	}

	pub async fn all_columns(&self) -> Vec<Column> {
		self.columns.read().await.clone()
	}

	pub fn take_dirty(&self) -> bool {
		self.dirty.swap(false, Ordering::AcqRel)
	}

	pub fn mark_dirty(&self) {
		self.dirty.store(true, Ordering::Release);
	}

	pub async fn light(&self, local_x: u32, local_y: u32, z: i64) -> u8 {
		*self.light.read().await.get(&(local_x, local_y, z)).unwrap_or(&0)
	}

	pub async fn set_light(&self, local_x: u32, local_y: u32, z: i64, level: u8) {
		self.light.write().await.insert((local_x, local_y, z), level);
	}

	/// Returns the count of non-air blocks and an FNV-1a fold over each
	/// present block's kind and hp, for `ChunkSummary` divergence detection
	/// (spec §4.12) rather than a full block-for-block comparison.
	pub async fn occupancy_checksum(&self) -> (u64, u64) {
		const FNV_OFFSET: u64 = 0xcbf29ce484222325;
		const FNV_PRIME: u64 = 0x100000001b3;

		let columns = self.columns.read().await;
		let mut count = 0u64;
		let mut checksum = FNV_OFFSET;
		for column in columns.iter() {
			for (z, block) in column.iter() {
				count += 1;
				checksum ^= z as u64;
				checksum = checksum.wrapping_mul(FNV_PRIME);
				checksum ^= block.kind as u64;
				checksum = checksum.wrapping_mul(FNV_PRIME);
				checksum ^= block.hp.to_bits();
				checksum = checksum.wrapping_mul(FNV_PRIME);
			}
		}
		(count, checksum)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use voxelcluster_shared::block::Block;

	#[tokio::test]
	async fn occupancy_checksum_counts_only_present_blocks() {
		let chunk = Chunk::new_empty(ChunkCoord::new(0, 0), Dimensions { w: 2, d: 2, h: 4 });
		let (count, _) = chunk.occupancy_checksum().await;
		assert_eq!(count, 0);

		chunk.with_column_mut(0, 0, |column| column.set(0, Some(Block::solid(10.0, 1.0, 1.0)))).await;
		let (count, _) = chunk.occupancy_checksum().await;
		assert_eq!(count, 1);
	}

	#[tokio::test]
	async fn occupancy_checksum_changes_when_hp_changes() {
		let chunk = Chunk::new_empty(ChunkCoord::new(0, 0), Dimensions { w: 1, d: 1, h: 4 });
		chunk.with_column_mut(0, 0, |column| column.set(0, Some(Block::solid(10.0, 1.0, 1.0)))).await;
		let (_, before) = chunk.occupancy_checksum().await;

		chunk.with_column_mut(0, 0, |column| column.set(0, Some(Block::solid(5.0, 1.0, 1.0)))).await;
		let (_, after) = chunk.occupancy_checksum().await;

		assert_ne!(before, after);
	}
}
