//! Point and radial damage application (spec §4.4): mutates a block, then
//! drives the stability cascade over the affected column and its
//! collapse-propagated neighbors, aggregating everything into one
//! [`DamageSummary`].

use crate::stability::{self, StabilityConfig};
use crate::store::{ChunkStore, StoreError};
use tokio_util::sync::CancellationToken;
use voxelcluster_shared::delta::{BlockChange, ChangeReason, DamageSummary};
use voxelcluster_shared::region::BlockCoord;

/// Subtracts `amount` from the block's hp; removes it (`destroy`) if the
/// result is `<= 0`, otherwise records the new hp (`damage`). A destroy
/// triggers the stability cascade on that column and its 4-neighborhood.
pub async fn apply_block_damage(
	store: &ChunkStore,
	b: BlockCoord,
	amount: f64,
	cfg: StabilityConfig,
	cancel: &CancellationToken,
) -> Result<DamageSummary, StoreError> {
	let chunk = store.chunk_for_block(b, cancel).await?;
	let (local_x, local_y) = store.local_xy(b);
	let chunk_coord = chunk.coord;

	let change = chunk
		.with_column_mut(local_x, local_y, |column| {
			let before = column.get(b.z as usize)?.clone();
			let new_hp = before.hp - amount;
			if new_hp <= 0.0 {
				column.set(b.z as usize, None);
				Some(BlockChange { coord: b, before: Some(before), after: None, reason: ChangeReason::Destroy })
			} else {
				let mut after = before.clone();
				after.hp = new_hp;
				column.set(b.z as usize, Some(after.clone()));
				Some(BlockChange { coord: b, before: Some(before), after: Some(after), reason: ChangeReason::Damage })
			}
		})
		.await;

	let mut summary = DamageSummary::new();
	let Some(change) = change else { return Ok(summary) };
	let is_destroy = change.reason == ChangeReason::Destroy;
	summary.record(change, chunk_coord);

	if is_destroy {
		let reports = stability::evaluate_with_neighbors(&chunk, chunk_coord, &store.region, cfg, local_x, local_y).await;
		for report in reports {
			for collapse in report.collapsed {
				summary.record(collapse, chunk_coord);
			}
			let index = chunk.column_index(report.local.x, report.local.y) as u32;
			store.persist_column(chunk_coord, index, &chunk).await;
		}
	}

	let touched_index = chunk.column_index(local_x, local_y) as u32;
	store.persist_column(chunk_coord, touched_index, &chunk).await;

	Ok(summary)
}

/// Damages every block inside the axis-aligned cube bounding the sphere of
/// `radius` around `center` whose Euclidean distance is within `radius`,
/// scaled linearly from `maxDamage` at the center to 0 at the edge.
/// Below-ground and out-of-region blocks are skipped (spec §4.2).
pub async fn apply_explosion(
	store: &ChunkStore,
	center: BlockCoord,
	radius: f64,
	max_damage: f64,
	cfg: StabilityConfig,
	cancel: &CancellationToken,
) -> Result<DamageSummary, StoreError> {
	let mut summary = DamageSummary::new();
	if radius <= 0.0 {
		return Ok(summary);
	}

	let extent = radius.ceil() as i64;
	for dz in -extent..=extent {
		let z = center.z + dz;
		if z < 0 {
			continue;
		}
		for dy in -extent..=extent {
			for dx in -extent..=extent {
				let distance = ((dx * dx + dy * dy + dz * dz) as f64).sqrt();
				if distance > radius {
					continue;
				}

				let coord = BlockCoord::new(center.x + dx, center.y + dy, z);
				let (chunk_coord, in_region) = match store.region.locate_block(coord) {
					Ok(located) => located,
					Err(_) => continue,
				};
				if !in_region {
					continue;
				}
				let _ = chunk_coord;

				let damage = max_damage * (1.0 - distance / radius);
				if damage <= 0.0 {
					continue;
				}

				let point_summary = apply_block_damage(store, coord, damage, cfg, cancel).await?;
				summary.merge(point_summary);
			}
		}
	}

	Ok(summary)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::store::generator::FlatWorldGenerator;
	use std::sync::Arc;
	use voxelcluster_shared::block::Block;
	use voxelcluster_shared::region::{ChunkCoord, Dimensions, ServerRegion};

	fn cfg() -> StabilityConfig {
		StabilityConfig { ground_support: 1_000_000.0, hanging_penalty: 0.5 }
	}

	fn store() -> (tempfile::TempDir, ChunkStore) {
		let dir = tempfile::tempdir().expect("tempdir");
		let region = ServerRegion::new(ChunkCoord::new(0, 0), 1, Dimensions { w: 4, d: 4, h: 8 });
		let store = ChunkStore::new(region, dir.path().to_owned(), 1024 * 1024, 0, Arc::new(FlatWorldGenerator::default()), cfg());
		(dir, store)
	}

	#[tokio::test]
	async fn damage_below_destroy_threshold_keeps_block() {
		let (_dir, store) = store();
		let cancel = CancellationToken::new();
		let coord = BlockCoord::new(0, 0, 0);
		store.set_block(coord, Some(Block::solid(10.0, 1_000_000.0, 1.0)), &cancel).await.expect("set");

		let summary = apply_block_damage(&store, coord, 4.0, cfg(), &cancel).await.expect("damage");
		assert_eq!(summary.len(), 1);
		let remaining = store.get_block(coord, &cancel).await.expect("get").expect("present");
		assert_eq!(remaining.hp, 6.0);
	}

	#[tokio::test]
	async fn lethal_damage_destroys_block() {
		let (_dir, store) = store();
		let cancel = CancellationToken::new();
		let coord = BlockCoord::new(0, 0, 0);
		store.set_block(coord, Some(Block::solid(5.0, 1_000_000.0, 1.0)), &cancel).await.expect("set");

		apply_block_damage(&store, coord, 10.0, cfg(), &cancel).await.expect("damage");
		assert!(store.get_block(coord, &cancel).await.expect("get").is_none());
	}

	#[tokio::test]
	async fn explosion_skips_below_ground_and_out_of_region() {
		let (_dir, store) = store();
		let cancel = CancellationToken::new();
		let center = BlockCoord::new(0, 0, 0);
		store.set_block(center, Some(Block::solid(1.0, 1_000_000.0, 1.0)), &cancel).await.expect("set");

		let summary = apply_explosion(&store, center, 2.0, 100.0, cfg(), &cancel).await.expect("explosion");
		assert!(!summary.is_empty());
	}
}
