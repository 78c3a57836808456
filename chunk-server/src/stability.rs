//! Column stability cascade: iterative removal of blocks whose support is
//! less than their load, re-evaluated to a fixed point (spec §4.3).

use crate::store::chunk::Chunk;
use voxelcluster_shared::block::{Block, Column};
use voxelcluster_shared::delta::{BlockChange, ChangeReason};
use voxelcluster_shared::region::{BlockCoord, ChunkCoord, LocalIndex, ServerRegion};

#[derive(Clone, Copy, Debug)]
pub struct StabilityConfig {
	pub ground_support: f64,
	pub hanging_penalty: f64,
}

/// Report for one column touched during a cascade; `StabilityReport` in
/// spec §4.2's `evaluateColumnStability` signature.
#[derive(Debug)]
pub struct StabilityReport {
	pub local: LocalIndex,
	pub collapsed: Vec<BlockChange>,
}

/// Evaluates one column to a fixed point, removing unsupported blocks.
/// Bottom-up pass computes support, top-down computes load; both read the
/// column as it stood before this call, so every per-iteration removal
/// commits atomically (spec §4.3 tie-break rule).
///
/// Returns the local-Z and dislodged block for every collapse, across every
/// iteration until the column reaches a fixed point.
fn cascade_column(column: &mut Column, cfg: StabilityConfig) -> Vec<(usize, Block)> {
	let mut collapsed = Vec::new();

	loop {
		let height = column.height();
		if height == 0 {
			break;
		}

		let mut support = vec![0.0_f64; height];
		let mut chain_depth = vec![0u32; height];
		for z in 0..height {
			let Some(block) = column.get(z) else {
				chain_depth[z] = if z == 0 { 1 } else { chain_depth[z - 1] + 1 };
				continue;
			};
			support[z] = if z == 0 {
				block.connecting_force + cfg.ground_support
			} else if let Some(below) = column.get(z - 1) {
				block.connecting_force.min(below.connecting_force).min(support[z - 1])
			} else {
				block.connecting_force * cfg.hanging_penalty.powi(chain_depth[z - 1].max(1) as i32)
			};
		}

		let mut load = vec![0.0_f64; height];
		for z in (0..height).rev() {
			let Some(block) = column.get(z) else { continue };
			load[z] = block.weight + if z + 1 < height { load[z + 1] } else { 0.0 };
		}

		let mut to_remove = Vec::new();
		for z in 0..height {
			let Some(block) = column.get(z) else { continue };
			if support[z] < load[z] {
				to_remove.push((z, block.clone()));
			}
		}

		if to_remove.is_empty() {
			break;
		}

		for (z, before) in to_remove {
			column.set(z, None);
			collapsed.push((z, before));
		}
	}

	collapsed
}

/// Re-evaluates `(local_x, local_y)` and its 4-neighborhood, BFS-style,
/// enqueuing any neighbor whose column produced a collapse until nothing
/// new collapses (spec §4.2, "Stability cascade").
pub async fn evaluate_with_neighbors(
	chunk: &Chunk,
	chunk_coord: ChunkCoord,
	region: &ServerRegion,
	cfg: StabilityConfig,
	local_x: u32,
	local_y: u32,
) -> Vec<StabilityReport> {
	let mut queue = std::collections::VecDeque::new();
	let mut visited = std::collections::HashSet::new();
	queue.push_back((local_x, local_y));
	visited.insert((local_x, local_y));

	let mut reports = Vec::new();

	while let Some((x, y)) = queue.pop_front() {
		let removed = chunk.with_column_mut(x, y, |column| cascade_column(column, cfg)).await;
		if removed.is_empty() {
			continue;
		}

		let global_x = chunk_coord.x * region.dim.w as i64 + x as i64;
		let global_y = chunk_coord.y * region.dim.d as i64 + y as i64;
		let changes = removed
			.into_iter()
			.map(|(z, before)| BlockChange {
				coord: BlockCoord::new(global_x, global_y, z as i64),
				before: Some(before),
				after: None,
				reason: ChangeReason::Collapse,
			})
			.collect();

		reports.push(StabilityReport { local: LocalIndex { x, y }, collapsed: changes });

		for (dx, dy) in [(-1i64, 0i64), (1, 0), (0, -1), (0, 1)] {
			let nx = x as i64 + dx;
			let ny = y as i64 + dy;
			if nx < 0 || ny < 0 || nx as u32 >= chunk.dim.w || ny as u32 >= chunk.dim.d {
				continue;
			}
			let key = (nx as u32, ny as u32);
			if visited.insert(key) {
				queue.push_back(key);
			}
		}
	}

	reports
}

#[cfg(test)]
mod tests {
	use super::*;
	use voxelcluster_shared::block::Block;

	fn cfg() -> StabilityConfig {
		StabilityConfig { ground_support: 1_000_000.0, hanging_penalty: 0.5 }
	}

	#[test]
	fn ground_supported_column_is_stable() {
		let mut column = Column::new();
		column.set(0, Some(Block::solid(10.0, 5.0, 2.0)));
		column.set(1, Some(Block::solid(10.0, 5.0, 2.0)));
		let collapsed = cascade_column(&mut column, cfg());
		assert!(collapsed.is_empty());
		assert_eq!(column.height(), 2);
	}

	#[test]
	fn unsupported_floating_block_collapses() {
		let mut column = Column::new();
		column.set(0, None);
		column.set(1, Some(Block::solid(10.0, 0.1, 50.0)));
		let collapsed = cascade_column(&mut column, cfg());
		assert_eq!(collapsed.len(), 1);
		assert!(column.get(1).is_none());
	}

	#[test]
	fn collapse_cascades_upward_through_dependents() {
		let mut column = Column::new();
		column.set(0, Some(Block::solid(10.0, 0.01, 1000.0)));
		column.set(1, Some(Block::solid(10.0, 5.0, 1.0)));
		let collapsed = cascade_column(&mut column, cfg());
		assert_eq!(collapsed.len(), 2, "both blocks should collapse once the base fails");
	}

	#[tokio::test]
	async fn neighbor_cascade_visits_adjacent_columns() {
		use crate::store::chunk::Chunk;
		use voxelcluster_shared::region::Dimensions;

		let dim = Dimensions { w: 4, d: 4, h: 4 };
		let chunk = Chunk::new_empty(ChunkCoord::new(0, 0), dim);
		let mut columns = vec![Column::new(); (dim.w * dim.d) as usize];
		// (0,0) has a floating block; (1,0) rests on (0,0)'s removed support transitively via its own base.
		let mut floating = Column::new();
		floating.set(0, None);
		floating.set(1, Some(Block::solid(10.0, 0.1, 1000.0)));
		columns[chunk.column_index(0, 0)] = floating;
		chunk.set_columns(columns).await;

		let region = ServerRegion::new(ChunkCoord::new(0, 0), 1, dim);
		let reports = evaluate_with_neighbors(&chunk, ChunkCoord::new(0, 0), &region, cfg(), 0, 0).await;
		assert_eq!(reports.len(), 1);
		assert_eq!(reports[0].collapsed.len(), 1);
	}
}
