//! Block-level A* with per-unit traversal profiles (spec §4.7).

use crate::store::ChunkStore;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use tokio_util::sync::CancellationToken;
use voxelcluster_shared::region::{BlockCoord, ChunkCoord};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TraversalMode {
	Ground,
	Flying,
	Underground,
}

#[derive(Clone, Copy, Debug)]
pub struct TraversalProfile {
	pub mode: TraversalMode,
	pub clearance: u32,
	pub max_climb: i64,
	pub max_drop: i64,
	pub can_dig: bool,
}

/// Cumulative search statistics, safe to share across concurrent searches
/// via atomics (spec §4.7, Profiler).
#[derive(Default)]
pub struct NavigatorProfiler {
	pub cache_hits: AtomicU64,
	pub cache_misses: AtomicU64,
	pub node_expansions: AtomicU64,
	pub neighbor_generations: AtomicU64,
	pub heuristic_evaluations: AtomicU64,
}

impl NavigatorProfiler {
	fn record_cache(&self, hit: bool) {
		if hit {
			self.cache_hits.fetch_add(1, AtomicOrdering::Relaxed);
		} else {
			self.cache_misses.fetch_add(1, AtomicOrdering::Relaxed);
		}
	}
}

#[derive(Clone, Copy, Eq, PartialEq)]
struct QueueEntry {
	f: i64,
	g: i64,
	coord: BlockCoord,
}

impl Ord for QueueEntry {
	fn cmp(&self, other: &Self) -> Ordering {
		other.f.cmp(&self.f).then_with(|| other.g.cmp(&self.g))
	}
}

impl PartialOrd for QueueEntry {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

fn heuristic(a: BlockCoord, b: BlockCoord) -> i64 {
	(a.x - b.x).abs() + (a.y - b.y).abs() + (a.z - b.z).abs()
}

/// Per-search cache of loaded chunks, to avoid repeated store lookups for
/// the same coordinate within one search.
struct ChunkCache<'a> {
	store: &'a ChunkStore,
	profiler: Option<&'a NavigatorProfiler>,
	loaded: HashMap<ChunkCoord, std::sync::Arc<crate::store::chunk::Chunk>>,
}

impl<'a> ChunkCache<'a> {
	fn new(store: &'a ChunkStore, profiler: Option<&'a NavigatorProfiler>) -> Self {
		Self { store, profiler, loaded: HashMap::new() }
	}

	async fn block_at(&mut self, coord: BlockCoord, cancel: &CancellationToken) -> Option<voxelcluster_shared::block::Block> {
		let (chunk_coord, in_region) = self.store.region.locate_block(coord).ok()?;
		if !in_region {
			return None;
		}

		if let Some(profiler) = self.profiler {
			profiler.record_cache(self.loaded.contains_key(&chunk_coord));
		}

		let chunk = if let Some(chunk) = self.loaded.get(&chunk_coord) {
			chunk.clone()
		} else {
			let chunk = self.store.chunk(chunk_coord, cancel).await.ok()?;
			self.loaded.insert(chunk_coord, chunk.clone());
			chunk
		};

		let (local_x, local_y) = self.store.local_xy(coord);
		let column = chunk.column(local_x, local_y).await;
		column.get(coord.z as usize).cloned()
	}
}

/// Passability for `coord` under `profile`: underground mode permits
/// non-solid non-air blocks when `canDig`; otherwise the block and the
/// `clearance - 1` blocks above must all be air.
async fn is_passable(cache: &mut ChunkCache<'_>, coord: BlockCoord, profile: &TraversalProfile, cancel: &CancellationToken) -> bool {
	if coord.z < 0 {
		return false;
	}
	match cache.store.region.locate_block(coord) {
		Ok((_, in_region)) if in_region => {}
		_ => return false,
	}

	for dz in 0..profile.clearance.max(1) {
		let here = BlockCoord::new(coord.x, coord.y, coord.z + dz as i64);
		let block = cache.block_at(here, cancel).await;
		let passable = match &block {
			None => true,
			Some(block) => profile.mode == TraversalMode::Underground && profile.can_dig && !block.kind.is_solid(),
		};
		if !passable {
			return false;
		}
	}
	true
}

async fn is_supported(cache: &mut ChunkCache<'_>, coord: BlockCoord, cancel: &CancellationToken) -> bool {
	if coord.z == 0 {
		return false;
	}
	cache.block_at(BlockCoord::new(coord.x, coord.y, coord.z - 1), cancel).await.is_some()
}

async fn neighbors(cache: &mut ChunkCache<'_>, coord: BlockCoord, profile: &TraversalProfile, cancel: &CancellationToken, profiler: Option<&NavigatorProfiler>) -> Vec<BlockCoord> {
	if let Some(profiler) = profiler {
		profiler.neighbor_generations.fetch_add(1, AtomicOrdering::Relaxed);
	}

	let mut out = Vec::new();
	match profile.mode {
		TraversalMode::Ground => {
			for (dx, dy) in [(-1i64, 0i64), (1, 0), (0, -1), (0, 1)] {
				for dz in -profile.max_drop..=profile.max_climb {
					if dz > profile.max_climb || -dz > profile.max_drop {
						continue;
					}
					let candidate = BlockCoord::new(coord.x + dx, coord.y + dy, coord.z + dz);
					if candidate.z == 0 {
						continue;
					}
					if is_passable(cache, candidate, profile, cancel).await && is_supported(cache, candidate, cancel).await {
						out.push(candidate);
					}
				}
			}
		}
		TraversalMode::Flying | TraversalMode::Underground => {
			for (dx, dy, dz) in [(-1i64, 0i64, 0i64), (1, 0, 0), (0, -1, 0), (0, 1, 0), (0, 0, -1), (0, 0, 1)] {
				if dz > 0 && dz > profile.max_climb {
					continue;
				}
				if dz < 0 && -dz > profile.max_drop {
					continue;
				}
				let candidate = BlockCoord::new(coord.x + dx, coord.y + dy, coord.z + dz);
				if is_passable(cache, candidate, profile, cancel).await {
					out.push(candidate);
				}
			}
		}
	}
	out
}

/// Searches for a path from `start` to `goal`. Returns an empty vector if
/// no route exists, either endpoint is impassable, or the search is
/// cancelled.
pub async fn find_path(
	store: &ChunkStore,
	start: BlockCoord,
	goal: BlockCoord,
	profile: TraversalProfile,
	cancel: &CancellationToken,
	profiler: Option<&NavigatorProfiler>,
) -> Vec<BlockCoord> {
	let mut cache = ChunkCache::new(store, profiler);

	if !is_passable(&mut cache, start, &profile, cancel).await || !is_passable(&mut cache, goal, &profile, cancel).await {
		return Vec::new();
	}

	let mut open = BinaryHeap::new();
	let mut g_score: HashMap<BlockCoord, i64> = HashMap::new();
	let mut came_from: HashMap<BlockCoord, BlockCoord> = HashMap::new();

	g_score.insert(start, 0);
	if let Some(profiler) = profiler {
		profiler.heuristic_evaluations.fetch_add(1, AtomicOrdering::Relaxed);
	}
	open.push(QueueEntry { f: heuristic(start, goal), g: 0, coord: start });

	while let Some(QueueEntry { g, coord, .. }) = open.pop() {
		if cancel.is_cancelled() {
			return Vec::new();
		}
		if coord == goal {
			return reconstruct_path(&came_from, coord);
		}
		if g > *g_score.get(&coord).unwrap_or(&i64::MAX) {
			continue;
		}
		if let Some(profiler) = profiler {
			profiler.node_expansions.fetch_add(1, AtomicOrdering::Relaxed);
		}

		for next in neighbors(&mut cache, coord, &profile, cancel, profiler).await {
			let tentative_g = g + 1;
			if tentative_g < *g_score.get(&next).unwrap_or(&i64::MAX) {
				came_from.insert(next, coord);
				g_score.insert(next, tentative_g);
				if let Some(profiler) = profiler {
					profiler.heuristic_evaluations.fetch_add(1, AtomicOrdering::Relaxed);
				}
				open.push(QueueEntry { f: tentative_g + heuristic(next, goal), g: tentative_g, coord: next });
			}
		}
	}

	Vec::new()
}

fn reconstruct_path(came_from: &HashMap<BlockCoord, BlockCoord>, mut current: BlockCoord) -> Vec<BlockCoord> {
	let mut path = vec![current];
	while let Some(&prev) = came_from.get(&current) {
		path.push(prev);
		current = prev;
	}
	path.reverse();
	path
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::store::generator::FlatWorldGenerator;
	use std::sync::Arc;
	use voxelcluster_shared::block::Block;
	use voxelcluster_shared::region::{Dimensions, ServerRegion};

	fn flat_profile() -> TraversalProfile {
		TraversalProfile { mode: TraversalMode::Ground, clearance: 2, max_climb: 1, max_drop: 1, can_dig: false }
	}

	fn store() -> (tempfile::TempDir, ChunkStore) {
		let dir = tempfile::tempdir().expect("tempdir");
		let region = ServerRegion::new(ChunkCoord::new(0, 0), 1, Dimensions { w: 8, d: 8, h: 8 });
		let stability = crate::stability::StabilityConfig { ground_support: 1_000_000.0, hanging_penalty: 0.5 };
		let store = ChunkStore::new(region, dir.path().to_owned(), 1024 * 1024, 0, Arc::new(FlatWorldGenerator::default()), stability);
		(dir, store)
	}

	#[tokio::test]
	async fn finds_straight_line_path_on_flat_ground() {
		let (_dir, store) = store();
		let cancel = CancellationToken::new();
		let path = find_path(&store, BlockCoord::new(0, 0, 1), BlockCoord::new(3, 0, 1), flat_profile(), &cancel, None).await;
		assert!(!path.is_empty());
		assert_eq!(*path.first().unwrap(), BlockCoord::new(0, 0, 1));
		assert_eq!(*path.last().unwrap(), BlockCoord::new(3, 0, 1));
	}

	#[tokio::test]
	async fn goal_outside_region_returns_empty() {
		let (_dir, store) = store();
		let cancel = CancellationToken::new();
		let path = find_path(&store, BlockCoord::new(0, 0, 1), BlockCoord::new(1000, 0, 1), flat_profile(), &cancel, None).await;
		assert!(path.is_empty());
	}

	#[tokio::test]
	async fn cancelled_search_returns_empty() {
		let (_dir, store) = store();
		let cancel = CancellationToken::new();
		cancel.cancel();
		let path = find_path(&store, BlockCoord::new(0, 0, 1), BlockCoord::new(3, 0, 1), flat_profile(), &cancel, None).await;
		assert!(path.is_empty());
	}

	#[test]
	fn block_block() {
		let _ = Block::solid(1.0, 1.0, 1.0);
	}

	fn dig_profile() -> TraversalProfile {
		TraversalProfile { mode: TraversalMode::Underground, clearance: 1, max_climb: 0, max_drop: 0, can_dig: true }
	}

	#[tokio::test]
	async fn ground_unit_is_blocked_by_a_mineral_wall() {
		let (_dir, store) = store();
		let cancel = CancellationToken::new();
		let chunk = store.chunk(ChunkCoord::new(0, 0), &cancel).await.expect("chunk");
		chunk.with_column_mut(1, 0, |column| column.set(1, Some(Block::solid(10.0, 1.0, 1.0)))).await;

		let path = find_path(&store, BlockCoord::new(0, 0, 1), BlockCoord::new(3, 0, 1), flat_profile(), &cancel, None).await;
		assert!(path.is_empty());
	}

	#[tokio::test]
	async fn digging_unit_tunnels_through_a_mineral_vein() {
		let (_dir, store) = store();
		let cancel = CancellationToken::new();
		let chunk = store.chunk(ChunkCoord::new(0, 0), &cancel).await.expect("chunk");
		let mut mineral = Block::solid(10.0, 1.0, 1.0);
		mineral.kind = voxelcluster_shared::block::BlockKind::Mineral;
		chunk.with_column_mut(1, 0, |column| column.set(1, Some(mineral))).await;

		let path = find_path(&store, BlockCoord::new(0, 0, 1), BlockCoord::new(3, 0, 1), dig_profile(), &cancel, None).await;
		assert!(!path.is_empty(), "a digging unit should tunnel through a mineral block");
		assert!(path.contains(&BlockCoord::new(1, 0, 1)));
	}
}
