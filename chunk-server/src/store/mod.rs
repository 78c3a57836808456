pub mod chunk;
pub mod codec;
pub mod generator;
pub mod persistence;

use self::chunk::Chunk;
use self::generator::ChunkGenerator;
use self::persistence::{ChunkPersistence, PersistenceError};
use crate::damage;
use crate::stability::{self, StabilityConfig, StabilityReport};
use dashmap::DashMap;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use voxelcluster_shared::block::{Block, Column};
use voxelcluster_shared::delta::DamageSummary;
use voxelcluster_shared::error::{Cancelled, OutOfRegion};
use voxelcluster_shared::region::{BlockCoord, ChunkCoord, ServerRegion};

#[derive(Debug, Error)]
pub enum StoreError {
	#[error(transparent)]
	OutOfRegion(#[from] OutOfRegion),
	#[error(transparent)]
	Cancelled(#[from] Cancelled),
	#[error("persistence failure: {0}")]
	Persistence(#[from] PersistenceError),
}

/// Dense-addressable, sparse-backed voxel storage for every chunk in this
/// server's region, with generation dedup and append-only persistence
/// (spec §4.2).
pub struct ChunkStore {
	pub region: ServerRegion,
	pub stability: StabilityConfig,
	data_root: PathBuf,
	max_chunk_file_size: u64,
	generation_seed: u64,
	generator: Arc<dyn ChunkGenerator>,

	chunks: DashMap<ChunkCoord, Arc<Chunk>>,
	persistence: DashMap<ChunkCoord, Arc<Mutex<ChunkPersistence>>>,
}

impl ChunkStore {
	pub fn new(
		region: ServerRegion,
		data_root: PathBuf,
		max_chunk_file_size: u64,
		generation_seed: u64,
		generator: Arc<dyn ChunkGenerator>,
		stability: StabilityConfig,
	) -> Self {
		Self {
			region,
			stability,
			data_root,
			max_chunk_file_size,
			generation_seed,
			generator,
			chunks: DashMap::new(),
			persistence: DashMap::new(),
		}
	}

	/// Applies point damage at `b`, cascading stability and persisting every
	/// touched column. Spec §4.2 `applyBlockDamage`.
	pub async fn apply_block_damage(&self, b: BlockCoord, amount: f64, cancel: &CancellationToken) -> Result<DamageSummary, StoreError> {
		damage::apply_block_damage(self, b, amount, self.stability, cancel).await
	}

	/// Applies radial damage around `center`. Spec §4.2 `applyExplosion`.
	pub async fn apply_explosion(
		&self,
		center: BlockCoord,
		radius: f64,
		max_damage: f64,
		cancel: &CancellationToken,
	) -> Result<DamageSummary, StoreError> {
		damage::apply_explosion(self, center, radius, max_damage, self.stability, cancel).await
	}

	/// Re-evaluates one column and its collapse-propagated 4-neighborhood.
	/// Spec §4.2 `evaluateColumnStability`.
	pub async fn evaluate_column_stability(&self, coord: ChunkCoord, lx: u32, ly: u32, cancel: &CancellationToken) -> Result<Vec<StabilityReport>, StoreError> {
		let chunk = self.chunk(coord, cancel).await?;
		let reports = stability::evaluate_with_neighbors(&chunk, coord, &self.region, self.stability, lx, ly).await;
		for report in &reports {
			let index = chunk.column_index(report.local.x, report.local.y) as u32;
			self.persist_column(coord, index, &chunk).await;
		}
		Ok(reports)
	}

	fn persistence_for(&self, coord: ChunkCoord) -> Result<Arc<Mutex<ChunkPersistence>>, StoreError> {
		if let Some(existing) = self.persistence.get(&coord) {
			return Ok(existing.clone());
		}
		let opened = ChunkPersistence::open(&self.data_root, coord, self.max_chunk_file_size)?;
		let arc = Arc::new(Mutex::new(opened));
		self.persistence.insert(coord, arc.clone());
		Ok(arc)
	}

	/// Returns the chunk at `coord`, generating it (once, shared across
	/// concurrent callers) if this is the first access. Blocks until
	/// generation completes; if `cancel` fires first, returns
	/// [`Cancelled`] without aborting the in-progress generation (spec §5).
	pub async fn chunk(&self, coord: ChunkCoord, cancel: &CancellationToken) -> Result<Arc<Chunk>, StoreError> {
		let chunk = self
			.chunks
			.entry(coord)
			.or_insert_with(|| Arc::new(Chunk::new_empty(coord, self.region.dim)))
			.clone();

		if chunk.try_become_generation_owner() {
			self.spawn_generation(coord, chunk.clone());
		}

		chunk.wait_until_generated(cancel).await?;
		Ok(chunk)
	}

	/// Spawns generation as a task detached from the calling context, so
	/// that cancelling one caller never cancels the shared generation.
	fn spawn_generation(&self, coord: ChunkCoord, chunk: Arc<Chunk>) {
		let persistence = self.persistence_for(coord);
		let generator = self.generator.clone();
		let dim = self.region.dim;
		let seed = self.generation_seed;

		tokio::spawn(async move {
			let persistence = match persistence {
				Ok(persistence) => persistence,
				Err(error) => {
					warn!("failed to open persistence for chunk {coord:?}: {error}; generating in-memory only");
					let columns = generate_all_columns(&*generator, coord, dim, seed);
					chunk.set_columns(columns).await;
					return;
				}
			};

			let mut guard = persistence.lock().await;
			if guard.has_any_data() {
				match guard.load_all() {
					Ok(loaded) => {
						let columns = assemble_columns(loaded, dim);
						drop(guard);
						chunk.set_columns(columns).await;
						return;
					}
					Err(error) => warn!("failed to load persisted chunk {coord:?}, regenerating: {error}"),
				}
			}

			let columns = generate_all_columns(&*generator, coord, dim, seed);
			for (index, column) in columns.iter().enumerate() {
				if let Err(error) = guard.save_column(index as u32, column) {
					warn!("failed to persist generated column {index} of chunk {coord:?}: {error}");
				}
			}
			drop(guard);

			info!("generated chunk {coord:?}");
			chunk.set_columns(columns).await;
		});
	}

	/// Returns the chunk owning global block `b`, per the region's
	/// coordinate algebra.
	pub async fn chunk_for_block(&self, b: BlockCoord, cancel: &CancellationToken) -> Result<Arc<Chunk>, StoreError> {
		let (coord, in_region) = self.region.locate_block(b)?;
		if !in_region {
			return Err(StoreError::OutOfRegion(OutOfRegion));
		}
		self.chunk(coord, cancel).await
	}

	pub async fn get_block(&self, b: BlockCoord, cancel: &CancellationToken) -> Result<Option<Block>, StoreError> {
		let chunk = self.chunk_for_block(b, cancel).await?;
		let local = self.local_xy(b);
		let column = chunk.column(local.0, local.1).await;
		Ok(column.get(b.z as usize).cloned())
	}

	pub async fn set_block(&self, b: BlockCoord, block: Option<Block>, cancel: &CancellationToken) -> Result<(), StoreError> {
		let chunk = self.chunk_for_block(b, cancel).await?;
		let local = self.local_xy(b);
		chunk.with_column_mut(local.0, local.1, |column| column.set(b.z as usize, block)).await;
		self.persist_column(chunk.coord, chunk.column_index(local.0, local.1) as u32, &chunk).await;
		Ok(())
	}

	pub(crate) async fn persist_column(&self, coord: ChunkCoord, index: u32, chunk: &Chunk) {
		let Ok(persistence) = self.persistence_for(coord) else { return };
		let local_x = index % chunk.dim.w;
		let local_y = index / chunk.dim.w;
		let column = chunk.column(local_x, local_y).await;
		let mut guard = persistence.lock().await;
		if let Err(error) = guard.save_column(index, &column) {
			warn!("failed to persist column {index} of chunk {coord:?}: {error}");
		}
	}

	pub(crate) fn local_xy(&self, b: BlockCoord) -> (u32, u32) {
		use voxelcluster_shared::region::floor_mod;
		(floor_mod(b.x, self.region.dim.w as i64) as u32, floor_mod(b.y, self.region.dim.d as i64) as u32)
	}

	pub async fn light(&self, b: BlockCoord, cancel: &CancellationToken) -> Result<u8, StoreError> {
		let chunk = self.chunk_for_block(b, cancel).await?;
		let local = self.local_xy(b);
		Ok(chunk.light(local.0, local.1, b.z).await)
	}

	pub async fn set_light(&self, b: BlockCoord, level: u8, cancel: &CancellationToken) -> Result<(), StoreError> {
		let chunk = self.chunk_for_block(b, cancel).await?;
		let local = self.local_xy(b);
		chunk.set_light(local.0, local.1, b.z, level).await;
		Ok(())
	}

	pub fn loaded_chunk_coords(&self) -> Vec<ChunkCoord> {
		self.chunks.iter().map(|entry| *entry.key()).collect()
	}
}

fn generate_all_columns(
	generator: &dyn ChunkGenerator,
	coord: ChunkCoord,
	dim: voxelcluster_shared::region::Dimensions,
	seed: u64,
) -> Vec<Column> {
	let mut columns = Vec::with_capacity((dim.w * dim.d) as usize);
	for local_y in 0..dim.d {
		for local_x in 0..dim.w {
			columns.push(generator.generate_column(coord, local_x, local_y, dim, seed));
		}
	}
	columns
}

fn assemble_columns(
	mut loaded: std::collections::HashMap<u32, Column>,
	dim: voxelcluster_shared::region::Dimensions,
) -> Vec<Column> {
	let count = (dim.w * dim.d) as usize;
	(0..count as u32).map(|index| loaded.remove(&index).unwrap_or_default()).collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::store::generator::FlatWorldGenerator;
	use voxelcluster_shared::region::Dimensions;

	fn store() -> (tempfile::TempDir, ChunkStore) {
		let dir = tempfile::tempdir().expect("tempdir");
		let region = ServerRegion::new(ChunkCoord::new(0, 0), 2, Dimensions { w: 4, d: 4, h: 8 });
		let stability = StabilityConfig { ground_support: 1_000_000.0, hanging_penalty: 0.5 };
		let store = ChunkStore::new(region, dir.path().to_owned(), 1024 * 1024, 0, Arc::new(FlatWorldGenerator::default()), stability);
		(dir, store)
	}

	#[tokio::test]
	async fn chunk_is_idempotent_across_sequential_calls() {
		let (_dir, store) = store();
		let cancel = CancellationToken::new();
		let a = store.chunk(ChunkCoord::new(0, 0), &cancel).await.expect("chunk");
		let b = store.chunk(ChunkCoord::new(0, 0), &cancel).await.expect("chunk");
		assert!(Arc::ptr_eq(&a, &b));
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn concurrent_first_access_generates_once() {
		let (_dir, store) = store();
		let store = Arc::new(store);
		let cancel = CancellationToken::new();

		let mut handles = Vec::new();
		for _ in 0..8 {
			let store = store.clone();
			let cancel = cancel.clone();
			handles.push(tokio::spawn(async move { store.chunk(ChunkCoord::new(1, 1), &cancel).await.expect("chunk") }));
		}

		let mut results = Vec::new();
		for handle in handles {
			results.push(handle.await.expect("join"));
		}

		for window in results.windows(2) {
			assert!(Arc::ptr_eq(&window[0], &window[1]), "all callers must observe the same generated chunk");
		}
	}

	#[tokio::test]
	async fn out_of_region_block_is_rejected() {
		let (_dir, store) = store();
		let cancel = CancellationToken::new();
		let far = BlockCoord::new(1000, 1000, 0);
		assert!(store.get_block(far, &cancel).await.is_err());
	}
}
