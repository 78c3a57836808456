//! Id-indexed, chunk-indexed entity set with dirty tracking (spec §4.6).

use dashmap::{DashMap, DashSet};
use rayon::prelude::*;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use voxelcluster_shared::entity::{Entity, EntityId};
use voxelcluster_shared::region::ChunkCoord;

#[derive(Debug, Error)]
pub enum RegistryError {
	#[error("entity {0:?} already registered")]
	DuplicateId(EntityId),
	#[error("entity {0:?} not found")]
	NotFound(EntityId),
}

/// Owns every live [`Entity`] plus a secondary `chunk -> entity ids` index.
/// Mutating operations are the only externally visible way to change an
/// entity; readers receive deep snapshots (spec §3, Entity ownership).
pub struct EntityRegistry {
	entities: DashMap<EntityId, RwLock<Entity>>,
	by_chunk: DashMap<ChunkCoord, DashSet<EntityId>>,
}

impl Default for EntityRegistry {
	fn default() -> Self {
		Self::new()
	}
}

impl EntityRegistry {
	pub fn new() -> Self {
		Self { entities: DashMap::new(), by_chunk: DashMap::new() }
	}

	pub fn add(&self, entity: Entity) -> Result<(), RegistryError> {
		if self.entities.contains_key(&entity.id) {
			return Err(RegistryError::DuplicateId(entity.id));
		}
		let chunk = entity.chunk.coord;
		let id = entity.id;
		self.entities.insert(id, RwLock::new(entity));
		self.by_chunk.entry(chunk).or_default().insert(id);
		Ok(())
	}

	pub fn remove(&self, id: EntityId) -> Result<(), RegistryError> {
		let (_, entry) = self.entities.remove(&id).ok_or(RegistryError::NotFound(id))?;
		let chunk = entry.into_inner().chunk.coord;
		if let Some(bucket) = self.by_chunk.get(&chunk) {
			bucket.remove(&id);
		}
		Ok(())
	}

	/// Atomically moves `id` to `new_chunk` under `server_id`, updating both
	/// indices so that observers iterating a bucket never see a half-moved
	/// entity.
	pub async fn transfer(&self, id: EntityId, new_chunk: ChunkCoord, server_id: voxelcluster_shared::entity::ServerId) -> Result<(), RegistryError> {
		let entry = self.entities.get(&id).ok_or(RegistryError::NotFound(id))?;
		let old_chunk = {
			let mut guard = entry.write().await;
			let old_chunk = guard.chunk.coord;
			guard.chunk.coord = new_chunk;
			guard.chunk.server_id = server_id;
			old_chunk
		};
		drop(entry);

		if let Some(bucket) = self.by_chunk.get(&old_chunk) {
			bucket.remove(&id);
		}
		self.by_chunk.entry(new_chunk).or_default().insert(id);
		Ok(())
	}

	pub async fn apply(&self, id: EntityId, f: impl FnOnce(&mut Entity)) -> Result<(), RegistryError> {
		let entry = self.entities.get(&id).ok_or(RegistryError::NotFound(id))?;
		let mut guard = entry.write().await;
		f(&mut guard);
		guard.dirty = true;
		Ok(())
	}

	/// Applies `f` to every entity using `workers` rayon threads; entities
	/// are partitioned by id so each worker owns a disjoint subset (spec
	/// §4.5, tick pass partitioning).
	pub fn apply_concurrent(&self, workers: usize, f: impl Fn(&mut Entity) + Sync + Send) {
		let ids: Vec<EntityId> = self.entities.iter().map(|entry| *entry.key()).collect();
		let chunk_size = ids.len().div_ceil(workers.max(1));

		ids.par_chunks(chunk_size.max(1)).for_each(|chunk_ids| {
			for id in chunk_ids {
				if let Some(entry) = self.entities.get(id) {
					let mut guard = entry.blocking_write();
					f(&mut guard);
					guard.dirty = true;
				}
			}
		});
	}

	pub fn snapshot(&self, id: EntityId) -> Option<Entity> {
		self.entities.get(&id).map(|entry| entry.blocking_read().clone())
	}

	pub fn snapshot_chunk(&self, chunk: ChunkCoord) -> Vec<Entity> {
		let Some(bucket) = self.by_chunk.get(&chunk) else { return Vec::new() };
		bucket.iter().filter_map(|id| self.entities.get(&id).map(|e| e.blocking_read().clone())).collect()
	}

	pub fn snapshot_all(&self) -> Vec<Entity> {
		self.entities.iter().map(|entry| entry.value().blocking_read().clone()).collect()
	}

	/// Removes every entity with `dying = true`, under the registry's own
	/// locking discipline (spec §4.5, "the registry removes dying entities
	/// under its own lock").
	pub fn remove_dying(&self) -> Vec<EntityId> {
		let dying: Vec<EntityId> = self
			.entities
			.iter()
			.filter(|entry| entry.value().blocking_read().dying)
			.map(|entry| *entry.key())
			.collect();

		for id in &dying {
			let _ = self.remove(*id);
		}
		dying
	}

	pub fn take_dirty(&self) -> Vec<Entity> {
		let mut dirty = Vec::new();
		for entry in self.entities.iter() {
			let mut guard = entry.value().blocking_write();
			if guard.dirty {
				guard.dirty = false;
				dirty.push(guard.clone());
			}
		}
		dirty
	}

	pub fn len(&self) -> usize {
		self.entities.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entities.is_empty()
	}
}

pub type SharedRegistry = Arc<EntityRegistry>;

#[cfg(test)]
mod tests {
	use super::*;
	use nalgebra::Vector3;
	use voxelcluster_shared::entity::{Capabilities, ChunkRef, EntityKind, ServerId, Stats};

	fn entity(id: u64, chunk: ChunkCoord) -> Entity {
		Entity {
			id: EntityId(id),
			kind: EntityKind::Unit,
			chunk: ChunkRef { server_id: ServerId(1), coord: chunk },
			position: Vector3::zeros(),
			velocity: Vector3::zeros(),
			orientation: Vector3::zeros(),
			blocks: vec![],
			stats: Stats { hp: 10.0, max_hp: 10.0, block_hp: vec![], repair_rate: 0.0, mass: 1.0 },
			capabilities: Capabilities::default(),
			attributes: Default::default(),
			dirty: false,
			dying: false,
		}
	}

	#[test]
	fn duplicate_add_is_rejected() {
		let registry = EntityRegistry::new();
		registry.add(entity(1, ChunkCoord::new(0, 0))).expect("first add");
		assert!(registry.add(entity(1, ChunkCoord::new(0, 0))).is_err());
	}

	#[tokio::test]
	async fn transfer_moves_between_chunk_buckets() {
		let registry = EntityRegistry::new();
		registry.add(entity(1, ChunkCoord::new(0, 0))).expect("add");
		registry.transfer(EntityId(1), ChunkCoord::new(1, 0), ServerId(2)).await.expect("transfer");

		assert!(registry.snapshot_chunk(ChunkCoord::new(0, 0)).is_empty());
		assert_eq!(registry.snapshot_chunk(ChunkCoord::new(1, 0)).len(), 1);
	}

	#[test]
	fn remove_dying_clears_registry() {
		let registry = EntityRegistry::new();
		let mut dead = entity(1, ChunkCoord::new(0, 0));
		dead.dying = true;
		registry.add(dead).expect("add");
		registry.add(entity(2, ChunkCoord::new(0, 0))).expect("add");

		let removed = registry.remove_dying();
		assert_eq!(removed, vec![EntityId(1)]);
		assert_eq!(registry.len(), 1);
	}
}
