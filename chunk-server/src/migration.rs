//! Cross-region entity migration: queue → in-flight table → TransferRequest
//! → TransferAck, with retry on timeout or rejection (spec §4.9).

use crate::entity_registry::{EntityRegistry, RegistryError};
use crate::neighbor::NeighborManager;
use crate::transport::UdpTransport;
use log::{info, warn};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use voxelcluster_shared::entity::{Entity, EntityId};
use voxelcluster_shared::envelope::{MessageType, TransferAckPayload, TransferRequestPayload};
use voxelcluster_shared::region::{ChunkCoord, ServerRegion};

const MIGRATION_PENDING_ATTR: &str = "migration_pending";

#[derive(Clone, Debug)]
struct MigrationRequestState {
	entity_id: EntityId,
	snapshot: Entity,
	target_chunk: ChunkCoord,
	target_server_id: u64,
	target_endpoint: SocketAddr,
	reason: String,
	nonce: u64,
}

struct InFlight {
	request: MigrationRequestState,
	sent_at: Instant,
}

/// Owns the migration queue and in-flight table. Non-blocking send; the only
/// blocking wait lives on the ack-handler path (spec §5).
pub struct MigrationEngine {
	server_id: u64,
	nonce: AtomicU64,
	queue: Mutex<Vec<MigrationRequestState>>,
	in_flight: Mutex<HashMap<EntityId, InFlight>>,
}

impl MigrationEngine {
	pub fn new(server_id: u64) -> Self {
		Self { server_id, nonce: AtomicU64::new(0), queue: Mutex::new(Vec::new()), in_flight: Mutex::new(HashMap::new()) }
	}

	/// Marks `entity_id` migration-pending and enqueues it for `target_chunk`,
	/// unless migration is already pending or no neighbor owns the target.
	/// Spec §4.9 steps 1-3.
	pub async fn enqueue(&self, registry: &EntityRegistry, entity_id: EntityId, target_chunk: ChunkCoord, neighbor: &NeighborManager, reason: &str) {
		let Some(current) = registry.snapshot(entity_id) else { return };
		if current.attributes.get(MIGRATION_PENDING_ATTR).copied().unwrap_or(0.0) != 0.0 {
			return;
		}
		let Some((target_server_id, target_endpoint)) = neighbor.find_owner(target_chunk) else {
			warn!("no known neighbor owns chunk {target_chunk:?}; dropping migration for {entity_id:?}");
			return;
		};

		if registry.apply(entity_id, |e| { e.attributes.insert(MIGRATION_PENDING_ATTR.to_string(), 1.0); }).await.is_err() {
			return;
		}
		let Some(snapshot) = registry.snapshot(entity_id) else { return };

		self.queue.lock().expect("migration queue poisoned").push(MigrationRequestState {
			entity_id,
			snapshot,
			target_chunk,
			target_server_id,
			target_endpoint,
			reason: reason.to_string(),
			nonce: 0,
		});
	}

	/// Drains up to `max_batch` queued requests, assigns each a fresh nonce,
	/// sends `TransferRequest`, and records it in the in-flight table. Spec
	/// §4.9 step 4.
	pub async fn drain(&self, transport: &UdpTransport, max_batch: usize) {
		let due: Vec<MigrationRequestState> = {
			let mut queue = self.queue.lock().expect("migration queue poisoned");
			let take = queue.len().min(max_batch);
			queue.drain(..take).collect()
		};

		for mut request in due {
			let nonce = self.nonce.fetch_add(1, Ordering::Relaxed) + 1;
			request.nonce = nonce;

			let payload = TransferRequestPayload {
				entity_id: request.entity_id.0,
				from_server: self.server_id,
				to_server: request.target_server_id,
				global_chunk_x: request.target_chunk.x,
				global_chunk_y: request.target_chunk.y,
				reason: request.reason.clone(),
				state: serde_json::to_value(&request.snapshot).unwrap_or_default(),
				nonce,
				timestamp: OffsetDateTime::now_utc(),
			};

			let endpoint = request.target_endpoint;
			let entity_id = request.entity_id;
			self.in_flight.lock().expect("in-flight table poisoned").insert(entity_id, InFlight { request, sent_at: Instant::now() });

			let value = serde_json::to_value(&payload).unwrap_or_default();
			if let Err(error) = transport.send(endpoint, MessageType::TransferRequest, value).await {
				warn!("failed to send TransferRequest for {entity_id:?}: {error}");
			}
		}
	}

	/// Handles an inbound `TransferRequest`: validates the target chunk and
	/// entity id, constructs a local entity, and replies with
	/// `TransferAck`. Spec §4.9 step 5.
	pub async fn handle_transfer_request(&self, transport: &UdpTransport, from: SocketAddr, registry: &EntityRegistry, local_region: &ServerRegion, payload: TransferRequestPayload) {
		let entity_id = payload.entity_id;
		let target = ChunkCoord::new(payload.global_chunk_x, payload.global_chunk_y);

		let (accepted, message) = if entity_id == 0 {
			(false, "empty entity id".to_string())
		} else if !local_region.contains_global_chunk(target) {
			(false, "target chunk not in this region".to_string())
		} else {
			match serde_json::from_value::<Entity>(payload.state.clone()) {
				Ok(mut entity) => {
					entity.attributes.remove(MIGRATION_PENDING_ATTR);
					match registry.add(entity) {
						Ok(()) => (true, "accepted".to_string()),
						Err(RegistryError::DuplicateId(_)) => (true, "already present".to_string()),
						Err(error) => (false, error.to_string()),
					}
				}
				Err(error) => (false, format!("malformed entity state: {error}")),
			}
		};

		let ack = TransferAckPayload { entity_id, from_server: payload.to_server, to_server: payload.from_server, nonce: payload.nonce, accepted, message };
		let value = serde_json::to_value(&ack).unwrap_or_default();
		if let Err(error) = transport.send(from, MessageType::TransferAck, value).await {
			warn!("failed to send TransferAck for entity {entity_id}: {error}");
		}
	}

	/// Handles an inbound `TransferAck`: removes the local entity on
	/// acceptance, or clears `migration_pending` and re-queues with a reset
	/// nonce on rejection. Spec §4.9 step 6.
	pub async fn handle_transfer_ack(&self, registry: &EntityRegistry, ack: TransferAckPayload) {
		let entity_id = EntityId(ack.entity_id);
		let Some(in_flight) = self.in_flight.lock().expect("in-flight table poisoned").remove(&entity_id) else { return };

		if ack.accepted {
			let _ = registry.remove(entity_id);
			info!("entity {entity_id:?} migrated to server {}", in_flight.request.target_server_id);
		} else {
			let _ = registry.apply(entity_id, |e| { e.attributes.remove(MIGRATION_PENDING_ATTR); }).await;
			let mut request = in_flight.request;
			request.nonce = 0;
			self.queue.lock().expect("migration queue poisoned").push(request);
		}
	}

	/// Re-queues in-flight entries whose last send predates `timeout`, with
	/// nonce reset. Spec §4.9 step 7.
	pub fn retry_stale(&self, timeout: Duration) {
		let now = Instant::now();
		let mut in_flight = self.in_flight.lock().expect("in-flight table poisoned");
		let stale: Vec<EntityId> = in_flight.iter().filter(|(_, entry)| now.duration_since(entry.sent_at) >= timeout).map(|(id, _)| *id).collect();

		let mut queue = self.queue.lock().expect("migration queue poisoned");
		for id in stale {
			if let Some(entry) = in_flight.remove(&id) {
				let mut request = entry.request;
				request.nonce = 0;
				queue.push(request);
			}
		}
	}

	pub fn queue_len(&self) -> usize {
		self.queue.lock().expect("migration queue poisoned").len()
	}

	pub fn in_flight_len(&self) -> usize {
		self.in_flight.lock().expect("in-flight table poisoned").len()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::neighbor::NeighborConfig;
	use voxelcluster_shared::entity::{Capabilities, ChunkRef, EntityKind, ServerId, Stats};
	use voxelcluster_shared::region::Dimensions;

	fn region(origin: ChunkCoord) -> ServerRegion {
		ServerRegion::new(origin, 2, Dimensions { w: 16, d: 16, h: 64 })
	}

	fn entity(id: u64, chunk: ChunkCoord) -> Entity {
		Entity {
			id: EntityId(id),
			kind: EntityKind::Unit,
			chunk: ChunkRef { server_id: ServerId(1), coord: chunk },
			position: nalgebra::Vector3::zeros(),
			velocity: nalgebra::Vector3::zeros(),
			orientation: nalgebra::Vector3::zeros(),
			blocks: vec![],
			stats: Stats { hp: 10.0, max_hp: 10.0, block_hp: vec![], repair_rate: 0.0, mass: 1.0 },
			capabilities: Capabilities::default(),
			attributes: Default::default(),
			dirty: false,
			dying: false,
		}
	}

	#[tokio::test]
	async fn enqueue_is_idempotent_under_pending_flag() {
		let registry = EntityRegistry::new();
		registry.add(entity(1, ChunkCoord::new(0, 0))).expect("add");

		let neighbor = NeighborManager::new(1, region(ChunkCoord::new(0, 0)), vec![NeighborConfig { endpoint: "127.0.0.1:9000".parse().unwrap(), delta_x: 2, delta_y: 0 }]);
		neighbor.mark_connected_for_test((2, 0), ChunkCoord::new(2, 0), 2);

		let engine = MigrationEngine::new(1);
		engine.enqueue(&registry, EntityId(1), ChunkCoord::new(2, 0), &neighbor, "left region").await;
		engine.enqueue(&registry, EntityId(1), ChunkCoord::new(2, 0), &neighbor, "left region").await;

		assert_eq!(engine.queue_len(), 1);
		let pending = registry.snapshot(EntityId(1)).expect("snapshot").attributes.get(MIGRATION_PENDING_ATTR).copied();
		assert_eq!(pending, Some(1.0));
	}

	#[tokio::test]
	async fn accepted_ack_removes_local_entity() {
		let registry = EntityRegistry::new();
		registry.add(entity(1, ChunkCoord::new(0, 0))).expect("add");
		let engine = MigrationEngine::new(1);

		engine.in_flight.lock().unwrap().insert(
			EntityId(1),
			InFlight {
				request: MigrationRequestState {
					entity_id: EntityId(1),
					snapshot: entity(1, ChunkCoord::new(0, 0)),
					target_chunk: ChunkCoord::new(2, 0),
					target_server_id: 2,
					target_endpoint: "127.0.0.1:9000".parse().unwrap(),
					reason: "left region".to_string(),
					nonce: 7,
				},
				sent_at: Instant::now(),
			},
		);

		engine.handle_transfer_ack(&registry, TransferAckPayload { entity_id: 1, from_server: 2, to_server: 1, nonce: 7, accepted: true, message: "ok".to_string() }).await;

		assert!(registry.snapshot(EntityId(1)).is_none());
		assert_eq!(engine.in_flight_len(), 0);
	}

	#[tokio::test]
	async fn rejected_ack_requeues_with_reset_nonce() {
		let registry = EntityRegistry::new();
		registry.add(entity(1, ChunkCoord::new(0, 0))).expect("add");
		let engine = MigrationEngine::new(1);

		engine.in_flight.lock().unwrap().insert(
			EntityId(1),
			InFlight {
				request: MigrationRequestState {
					entity_id: EntityId(1),
					snapshot: entity(1, ChunkCoord::new(0, 0)),
					target_chunk: ChunkCoord::new(2, 0),
					target_server_id: 2,
					target_endpoint: "127.0.0.1:9000".parse().unwrap(),
					reason: "left region".to_string(),
					nonce: 7,
				},
				sent_at: Instant::now(),
			},
		);

		engine.handle_transfer_ack(&registry, TransferAckPayload { entity_id: 1, from_server: 2, to_server: 1, nonce: 7, accepted: false, message: "duplicate".to_string() }).await;

		assert_eq!(engine.queue_len(), 1);
		assert_eq!(engine.in_flight_len(), 0);
	}

	#[tokio::test]
	async fn duplicate_transfer_request_is_accepted_idempotently() {
		let registry = EntityRegistry::new();
		registry.add(entity(1, ChunkCoord::new(2, 0))).expect("add");
		let engine = MigrationEngine::new(2);
		let transport = UdpTransport::bind("127.0.0.1:0".parse().unwrap(), 65536).await.expect("bind");
		let local_region = region(ChunkCoord::new(2, 0));

		let mut snapshot = entity(1, ChunkCoord::new(2, 0));
		snapshot.chunk.coord = ChunkCoord::new(2, 0);
		let payload = TransferRequestPayload {
			entity_id: 1,
			from_server: 1,
			to_server: 2,
			global_chunk_x: 2,
			global_chunk_y: 0,
			reason: "left region".to_string(),
			state: serde_json::to_value(&snapshot).unwrap(),
			nonce: 1,
			timestamp: time::OffsetDateTime::now_utc(),
		};

		engine.handle_transfer_request(&transport, "127.0.0.1:9000".parse().unwrap(), &registry, &local_region, payload).await;
		assert_eq!(registry.len(), 1);
	}
}
