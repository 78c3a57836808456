use crate::entity::{Entity, EntityId, ServerId};
use crate::region::ChunkCoord;
use std::net::SocketAddr;
use std::time::Instant;

/// Why a migration was triggered. Currently there is exactly one trigger
/// (an entity's chunk left the region during a tick), but the field is kept
/// so additional triggers (explicit transfer commands, admin relocation)
/// can be added without changing the wire shape.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MigrationReason {
	LeftRegion,
}

/// A queued or in-flight cross-region entity transfer. The richer
/// `EntityID` + `nonce` variant is authoritative (see "Two migration
/// request variants" design note) — `nonce` is `None` while queued and
/// assigned when the request is dispatched; it is cleared again on retry.
#[derive(Clone, Debug)]
pub struct MigrationRequest {
	pub entity_id: EntityId,
	pub snapshot: Entity,
	pub target_chunk: ChunkCoord,
	pub target_server_id: ServerId,
	pub target_endpoint: SocketAddr,
	pub queued_at: Instant,
	pub last_attempt: Option<Instant>,
	pub reason: MigrationReason,
	pub nonce: Option<u64>,
}

impl MigrationRequest {
	pub fn new(
		entity_id: EntityId,
		snapshot: Entity,
		target_chunk: ChunkCoord,
		target_server_id: ServerId,
		target_endpoint: SocketAddr,
		queued_at: Instant,
	) -> Self {
		Self {
			entity_id,
			snapshot,
			target_chunk,
			target_server_id,
			target_endpoint,
			queued_at,
			last_attempt: None,
			reason: MigrationReason::LeftRegion,
			nonce: None,
		}
	}

	/// Clears the assigned nonce, marking the request as ready to be
	/// re-sent by the next drain pass.
	pub fn clear_nonce_for_retry(&mut self) {
		self.nonce = None;
		self.last_attempt = None;
	}
}
