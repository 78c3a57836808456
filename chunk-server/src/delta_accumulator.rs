//! Per-chunk, per-block delta coalescer with a streaming occlusion filter
//! (spec §4.4).

use crate::store::ChunkStore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use voxelcluster_shared::delta::{BlockChange, ChangeReason, DamageSummary};
use voxelcluster_shared::envelope::{BlockTypeCode, ChangeReasonCode, ChunkDeltaPayload, WireBlockChange};
use voxelcluster_shared::region::{BlockCoord, ChunkCoord};

/// Accumulates [`BlockChange`]s grouped by chunk until [`Self::flush`] is
/// called, coalescing repeated coordinates under the same priority rule as
/// [`DamageSummary`].
pub struct DeltaAccumulator {
	server_id: u64,
	seq: AtomicU64,
	pending: Mutex<HashMap<ChunkCoord, HashMap<BlockCoord, BlockChange>>>,
}

impl DeltaAccumulator {
	pub fn new(server_id: u64) -> Self {
		Self { server_id, seq: AtomicU64::new(0), pending: Mutex::new(HashMap::new()) }
	}

	/// Records every change in `summary`, suppressing interior damage
	/// changes (all six axis-neighbors present and solid) as a streaming
	/// optimization. Destroy and collapse changes are never suppressed.
	pub async fn accumulate(&self, store: &ChunkStore, summary: DamageSummary, cancel: &CancellationToken) {
		for change in summary.changes() {
			if change.reason == ChangeReason::Damage && is_fully_occluded(store, change.coord, cancel).await {
				continue;
			}
			let Ok((chunk, _)) = store.region.locate_block(change.coord) else { continue };
			self.record(chunk, change.clone());
		}
	}

	fn record(&self, chunk: ChunkCoord, change: BlockChange) {
		let mut pending = self.pending.lock().expect("delta accumulator mutex poisoned");
		let bucket = pending.entry(chunk).or_default();
		bucket
			.entry(change.coord)
			.and_modify(|existing| {
				let taken = std::mem::replace(existing, BlockChange { coord: change.coord, before: None, after: None, reason: ChangeReason::Damage });
				*existing = taken.coalesce(change.clone());
			})
			.or_insert(change);
	}

	/// Drains every chunk's pending changes into a `ChunkDelta` payload,
	/// advancing the shared sequence counter by one per chunk emitted.
	pub fn flush(&self) -> Vec<ChunkDeltaPayload> {
		let drained = std::mem::take(&mut *self.pending.lock().expect("delta accumulator mutex poisoned"));
		drained
			.into_iter()
			.filter(|(_, changes)| !changes.is_empty())
			.map(|(chunk, changes)| {
				let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
				ChunkDeltaPayload {
					server_id: self.server_id,
					chunk_x: chunk.x,
					chunk_y: chunk.y,
					seq,
					timestamp: OffsetDateTime::now_utc(),
					blocks: changes.into_values().map(to_wire_change).collect(),
				}
			})
			.collect()
	}
}

fn to_wire_change(change: BlockChange) -> WireBlockChange {
	let kind = change.after.as_ref().map(|b| b.kind).unwrap_or(voxelcluster_shared::block::BlockKind::Air);
	let (hp, max_hp, material, color, texture, light_emission) = match &change.after {
		Some(block) => (block.hp, block.max_hp, block.material.clone(), block.color.clone(), block.texture.clone(), block.light_emission),
		None => (0.0, 0.0, None, None, None, None),
	};

	WireBlockChange {
		x: change.coord.x,
		y: change.coord.y,
		z: change.coord.z,
		block_type: BlockTypeCode::from(kind),
		material,
		color,
		texture,
		hp,
		max_hp,
		reason: ChangeReasonCode::from(change.reason),
		light_emission,
	}
}

async fn is_fully_occluded(store: &ChunkStore, coord: BlockCoord, cancel: &CancellationToken) -> bool {
	const OFFSETS: [(i64, i64, i64); 6] = [(1, 0, 0), (-1, 0, 0), (0, 1, 0), (0, -1, 0), (0, 0, 1), (0, 0, -1)];

	for (dx, dy, dz) in OFFSETS {
		let neighbor = BlockCoord::new(coord.x + dx, coord.y + dy, coord.z + dz);
		match store.get_block(neighbor, cancel).await {
			Ok(Some(block)) if block.kind.is_solid_for_occlusion() => {}
			_ => return false,
		}
	}
	true
}

#[cfg(test)]
mod tests {
	use super::*;
	use voxelcluster_shared::block::Block;
	use voxelcluster_shared::delta::ChangeReason;

	fn change(coord: BlockCoord, reason: ChangeReason) -> BlockChange {
		BlockChange { coord, before: Some(Block::solid(1.0, 1.0, 1.0)), after: None, reason }
	}

	#[test]
	fn repeated_coord_coalesces_by_priority() {
		let accumulator = DeltaAccumulator::new(1);
		let chunk = ChunkCoord::new(0, 0);
		accumulator.record(chunk, change(BlockCoord::new(0, 0, 0), ChangeReason::Damage));
		accumulator.record(chunk, change(BlockCoord::new(0, 0, 0), ChangeReason::Destroy));

		let deltas = accumulator.flush();
		assert_eq!(deltas.len(), 1);
		assert_eq!(deltas[0].blocks.len(), 1);
		assert_eq!(deltas[0].blocks[0].reason, ChangeReasonCode::Destroy);
	}

	#[test]
	fn flush_advances_seq_per_chunk() {
		let accumulator = DeltaAccumulator::new(1);
		accumulator.record(ChunkCoord::new(0, 0), change(BlockCoord::new(0, 0, 0), ChangeReason::Destroy));
		accumulator.record(ChunkCoord::new(1, 0), change(BlockCoord::new(20, 0, 0), ChangeReason::Destroy));

		let mut deltas = accumulator.flush();
		deltas.sort_by_key(|d| d.chunk_x);
		assert_eq!(deltas[0].seq, 1);
		assert_eq!(deltas[1].seq, 2);
	}
}
