use crate::region::ChunkCoord;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u64);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum EntityKind {
	Unit,
	Projectile,
	Structure,
	Factory,
}

/// Which chunk server and chunk an entity currently belongs to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ChunkRef {
	pub server_id: ServerId,
	pub coord: ChunkCoord,
}

/// A small copy-able server identifier. Kept distinct from [`EntityId`] so
/// the two are never accidentally interchanged.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ServerId(pub u64);

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Stats {
	pub hp: f64,
	pub max_hp: f64,
	pub block_hp: Vec<f64>,
	pub repair_rate: f64,
	pub mass: f64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Capabilities {
	pub can_fly: bool,
	pub can_dig: bool,
	pub projectile_vel: Option<f64>,
}

/// A fully owned snapshot of an entity. The [`super::entity`] module itself
/// has no notion of a registry or lock — those live in the chunk server's
/// entity registry, which hands out exactly these snapshots to readers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Entity {
	pub id: EntityId,
	pub kind: EntityKind,
	pub chunk: ChunkRef,

	pub position: Vector3<f64>,
	pub velocity: Vector3<f64>,
	pub orientation: Vector3<f64>,

	pub blocks: Vec<crate::block::Block>,
	pub stats: Stats,
	pub capabilities: Capabilities,
	pub attributes: HashMap<String, f64>,

	pub dirty: bool,
	pub dying: bool,
}

impl Entity {
	/// `id` non-empty is enforced at construction (an `EntityId` of `0` is
	/// reserved/invalid); `hp <= max_hp`; `dying => hp == 0`.
	pub fn invariants_hold(&self) -> bool {
		self.id.0 != 0 && self.stats.hp <= self.stats.max_hp && (!self.dying || self.stats.hp == 0.0)
	}

	/// Sets `hp`, clamping to `[0, max_hp]` and raising `dying` once it
	/// reaches zero.
	pub fn apply_hp_delta(&mut self, delta: f64) {
		self.stats.hp = (self.stats.hp + delta).clamp(0.0, self.stats.max_hp);
		if self.stats.hp <= 0.0 {
			self.stats.hp = 0.0;
			self.dying = true;
		}
		self.dirty = true;
	}
}
