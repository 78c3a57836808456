//! Fixed-rate tick scheduler / movement engine (spec §4.5).
//!
//! Mirrors the teacher's `Sector::run()`: a `thread::sleep`-paced loop on a
//! dedicated thread, never polled as an async task, so that the entity
//! registry's `blocking_read`/`blocking_write` calls inside
//! [`crate::entity_registry::EntityRegistry::apply_concurrent`] stay safe.

use crate::delta_accumulator::DeltaAccumulator;
use crate::entity_registry::EntityRegistry;
use crate::migration::MigrationEngine;
use crate::neighbor::NeighborManager;
use crate::store::ChunkStore;
use dashmap::DashSet;
use log::warn;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use voxelcluster_shared::entity::{Entity, EntityId, EntityKind};
use voxelcluster_shared::region::{floor_div, BlockCoord, ChunkCoord, ServerRegion};

const GRAVITY: f64 = 9.8;
const AIR_DRAG: f64 = 0.02;
const GROUND_FRICTION: f64 = 4.0;
const PROJECTILE_DRAG: f64 = 0.01;
const DEFAULT_PROJECTILE_LIFETIME_ATTR: &str = "lifetime";
const DEFAULT_EXPLOSION_RADIUS_ATTR: &str = "explosion_radius";
const DEFAULT_EXPLOSION_DAMAGE_ATTR: &str = "explosion_max_damage";
const FALLBACK_PROJECTILE_LIFETIME: f64 = 6.0;
const FALLBACK_EXPLOSION_RADIUS: f64 = 3.0;
const FALLBACK_EXPLOSION_DAMAGE: f64 = 40.0;

struct Detonation {
	at: BlockCoord,
	radius: f64,
	max_damage: f64,
}

struct PendingMigration {
	entity_id: EntityId,
	target_chunk: ChunkCoord,
}

struct PendingTransfer {
	entity_id: EntityId,
	new_chunk: ChunkCoord,
	server_id: voxelcluster_shared::entity::ServerId,
}

#[derive(Default)]
struct TickOutcomes {
	detonations: Vec<Detonation>,
	migrations: Vec<PendingMigration>,
	transfers: Vec<PendingTransfer>,
}

pub struct TickScheduler {
	store: Arc<ChunkStore>,
	registry: Arc<EntityRegistry>,
	migration: Arc<MigrationEngine>,
	neighbor: Arc<NeighborManager>,
	accumulator: Arc<DeltaAccumulator>,
	tick_interval: Duration,
	workers: usize,
	dirty_chunks: DashSet<ChunkCoord>,
	running: AtomicBool,
}

impl TickScheduler {
	pub fn new(
		store: Arc<ChunkStore>,
		registry: Arc<EntityRegistry>,
		migration: Arc<MigrationEngine>,
		neighbor: Arc<NeighborManager>,
		accumulator: Arc<DeltaAccumulator>,
		tick_interval: Duration,
		workers: usize,
	) -> Self {
		Self { store, registry, migration, neighbor, accumulator, tick_interval, workers: workers.max(1), dirty_chunks: DashSet::new(), running: AtomicBool::new(false) }
	}

	/// Runs the tick loop on the calling thread until `shutdown` fires.
	/// Intended to be called from a dedicated `std::thread`, not a tokio
	/// task; async work inside a tick is driven via `Handle::block_on`,
	/// exactly as the teacher's `Sector::run()` blocks on database work.
	pub fn run(&self, shutdown: CancellationToken) {
		self.running.store(true, Ordering::SeqCst);
		let handle = Handle::current();
		let mut last_tick_start = Instant::now();

		while !shutdown.is_cancelled() {
			let tick_start = Instant::now();
			let mut delta = tick_start.duration_since(last_tick_start);
			if delta.is_zero() || delta > self.tick_interval * 10 {
				delta = self.tick_interval;
			}
			last_tick_start = tick_start;

			handle.block_on(self.tick(delta, &shutdown));

			let tick_duration = Instant::now() - tick_start;
			match self.tick_interval.checked_sub(tick_duration) {
				Some(remaining) => thread::sleep(remaining),
				None => warn!("tick took {tick_duration:?}, exceeding {:?} target", self.tick_interval),
			}
		}
		self.running.store(false, Ordering::SeqCst);
	}

	pub fn is_running(&self) -> bool {
		self.running.load(Ordering::SeqCst)
	}

	async fn tick(&self, delta: Duration, cancel: &CancellationToken) {
		let dt = delta.as_secs_f64();
		let outcomes = self.process_entities(dt);

		for detonation in outcomes.detonations {
			match self.store.apply_explosion(detonation.at, detonation.radius, detonation.max_damage, cancel).await {
				Ok(summary) => self.accumulator.accumulate(&self.store, summary, cancel).await,
				Err(error) => warn!("detonation at {:?} failed: {error}", detonation.at),
			}
		}

		for migration in outcomes.migrations {
			self.migration.enqueue(&self.registry, migration.entity_id, migration.target_chunk, &self.neighbor, "left region").await;
		}

		for transfer in outcomes.transfers {
			if let Err(error) = self.registry.transfer(transfer.entity_id, transfer.new_chunk, transfer.server_id).await {
				warn!("intra-region chunk transfer for {:?} failed: {error}", transfer.entity_id);
			}
		}

		self.registry.remove_dying();
	}

	/// Partitions the registry's entities across `self.workers` rayon
	/// threads via `apply_concurrent`, collecting detonations and
	/// out-of-region transitions for the async follow-up pass. Spec §4.5.
	fn process_entities(&self, dt: f64) -> TickOutcomes {
		let outcomes = Mutex::new(TickOutcomes::default());
		let region = self.store.region;

		self.registry.apply_concurrent(self.workers, |entity| {
			let outcome = step_entity(entity, dt, &region, &self.dirty_chunks);
			if outcome.detonation.is_some() || outcome.migration.is_some() || outcome.transfer.is_some() {
				let mut guard = outcomes.lock().expect("tick outcomes mutex poisoned");
				if let Some(detonation) = outcome.detonation {
					guard.detonations.push(detonation);
				}
				if let Some(migration) = outcome.migration {
					guard.migrations.push(migration);
				}
				if let Some(transfer) = outcome.transfer {
					guard.transfers.push(transfer);
				}
			}
		});

		outcomes.into_inner().expect("tick outcomes mutex poisoned")
	}

	/// Drains and returns every chunk marked dirty by entity movement since
	/// the last call (owning chunk + 8-neighborhood on any in-region
	/// transition), for the broadcaster to fold into its next summary pass.
	pub fn take_dirty_chunks(&self) -> Vec<ChunkCoord> {
		let drained: Vec<ChunkCoord> = self.dirty_chunks.iter().map(|entry| *entry).collect();
		for coord in &drained {
			self.dirty_chunks.remove(coord);
		}
		drained
	}
}

struct EntityOutcome {
	detonation: Option<Detonation>,
	migration: Option<PendingMigration>,
	transfer: Option<PendingTransfer>,
}

fn step_entity(entity: &mut Entity, dt: f64, region: &ServerRegion, dirty_chunks: &DashSet<ChunkCoord>) -> EntityOutcome {
	let mut detonation = None;

	match entity.kind {
		EntityKind::Projectile => {
			entity.velocity.z -= GRAVITY * dt;
			let drag = (PROJECTILE_DRAG * dt).min(1.0);
			entity.velocity *= 1.0 - drag;
			entity.position += entity.velocity * dt;

			let remaining = entity.attributes.entry(DEFAULT_PROJECTILE_LIFETIME_ATTR.to_string()).or_insert(FALLBACK_PROJECTILE_LIFETIME);
			*remaining -= dt;
			let lifetime_expired = *remaining <= 0.0;

			if lifetime_expired || entity.position.z <= 0.0 {
				let radius = entity.attributes.get(DEFAULT_EXPLOSION_RADIUS_ATTR).copied().unwrap_or(FALLBACK_EXPLOSION_RADIUS);
				let max_damage = entity.attributes.get(DEFAULT_EXPLOSION_DAMAGE_ATTR).copied().unwrap_or(FALLBACK_EXPLOSION_DAMAGE);
				let at = BlockCoord::new(entity.position.x.round() as i64, entity.position.y.round() as i64, entity.position.z.max(0.0).round() as i64);
				detonation = Some(Detonation { at, radius, max_damage });
				entity.dying = true;
			}
		}
		EntityKind::Unit | EntityKind::Structure | EntityKind::Factory => {
			if entity.capabilities.can_fly {
				let drag = (AIR_DRAG * dt).min(1.0);
				entity.velocity *= 1.0 - drag;
			} else {
				entity.velocity.z -= GRAVITY * dt;
				let friction = (GROUND_FRICTION * dt).min(1.0);
				entity.velocity.x *= 1.0 - friction;
				entity.velocity.y *= 1.0 - friction;
			}
			entity.position += entity.velocity * dt;
			if entity.position.z < 0.0 {
				entity.position.z = 0.0;
				entity.velocity.z = 0.0;
			}
		}
	}

	let old_chunk = entity.chunk.coord;
	let new_chunk = chunk_for_position(entity.position.x, entity.position.y, region);
	let mut migration = None;
	let mut transfer = None;

	if new_chunk != old_chunk {
		if region.contains_global_chunk(new_chunk) {
			// Chunk membership is updated by `EntityRegistry::transfer`, not
			// here, so the `chunk -> entities` secondary index never goes
			// stale relative to the entity's own `chunk.coord` field.
			entity.dirty = true;
			transfer = Some(PendingTransfer { entity_id: entity.id, new_chunk, server_id: entity.chunk.server_id });
			mark_neighborhood_dirty(new_chunk, dirty_chunks);
		} else {
			migration = Some(PendingMigration { entity_id: entity.id, target_chunk: new_chunk });
		}
	}

	EntityOutcome { detonation, migration, transfer }
}

fn chunk_for_position(x: f64, y: f64, region: &ServerRegion) -> ChunkCoord {
	ChunkCoord::new(floor_div(x.floor() as i64, region.dim.w as i64), floor_div(y.floor() as i64, region.dim.d as i64))
}

fn mark_neighborhood_dirty(center: ChunkCoord, dirty_chunks: &DashSet<ChunkCoord>) {
	for dx in -1..=1 {
		for dy in -1..=1 {
			dirty_chunks.insert(ChunkCoord::new(center.x + dx, center.y + dy));
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use nalgebra::Vector3;
	use voxelcluster_shared::entity::{Capabilities, ChunkRef, ServerId, Stats};
	use voxelcluster_shared::region::Dimensions;

	fn region() -> ServerRegion {
		ServerRegion::new(ChunkCoord::new(0, 0), 2, Dimensions { w: 16, d: 16, h: 64 })
	}

	fn entity(kind: EntityKind, position: Vector3<f64>) -> Entity {
		Entity {
			id: EntityId(1),
			kind,
			chunk: ChunkRef { server_id: ServerId(1), coord: ChunkCoord::new(0, 0) },
			position,
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
	fn grounded_unit_never_falls_below_zero() {
		let dirty = DashSet::new();
		let mut unit = entity(EntityKind::Unit, Vector3::new(1.0, 1.0, 0.0));
		for _ in 0..50 {
			step_entity(&mut unit, 0.05, &region(), &dirty);
		}
		assert_eq!(unit.position.z, 0.0);
	}

	#[test]
	fn projectile_detonates_on_ground_contact() {
		let dirty = DashSet::new();
		let mut projectile = entity(EntityKind::Projectile, Vector3::new(1.0, 1.0, 0.2));
		projectile.velocity = Vector3::new(0.0, 0.0, -5.0);
		let outcome = step_entity(&mut projectile, 0.1, &region(), &dirty);
		assert!(outcome.detonation.is_some());
		assert!(projectile.dying);
	}

	#[test]
	fn crossing_region_boundary_enqueues_migration() {
		let dirty = DashSet::new();
		let mut unit = entity(EntityKind::Unit, Vector3::new(31.5, 1.0, 0.0));
		unit.velocity = Vector3::new(10.0, 0.0, 0.0);
		let outcome = step_entity(&mut unit, 0.1, &region(), &dirty);
		assert!(outcome.migration.is_some());
		assert_eq!(outcome.migration.unwrap().target_chunk, ChunkCoord::new(2, 0));
	}

	#[test]
	fn in_region_chunk_change_marks_neighborhood_dirty() {
		let dirty = DashSet::new();
		let mut unit = entity(EntityKind::Unit, Vector3::new(15.5, 1.0, 0.0));
		unit.velocity = Vector3::new(10.0, 0.0, 0.0);
		step_entity(&mut unit, 0.1, &region(), &dirty);
		assert!(dirty.len() >= 1);
	}
}
