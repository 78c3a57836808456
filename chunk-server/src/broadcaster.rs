//! Periodic chunk summaries, dirty-entity batches, and forwarded voxel
//! deltas (spec §2 `Stream Broadcaster`, detailed in SPEC_FULL §4.12).

use crate::delta_accumulator::DeltaAccumulator;
use crate::entity_registry::EntityRegistry;
use crate::store::ChunkStore;
use crate::tick::TickScheduler;
use crate::transport::UdpTransport;
use log::warn;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use voxelcluster_shared::envelope::{ChunkSummaryPayload, EntityUpdatePayload, MessageType};
use voxelcluster_shared::region::ChunkCoord;

/// Runs three independent periodic publishers on its own ticker (default
/// interval 1s for summaries/dirty-entity batches; voxel deltas are driven
/// directly by the accumulator's flush cadence).
pub struct StreamBroadcaster {
	server_id: u64,
	store: Arc<ChunkStore>,
	registry: Arc<EntityRegistry>,
	accumulator: Arc<DeltaAccumulator>,
	tick: Arc<TickScheduler>,
	targets: Vec<SocketAddr>,
	interval: Duration,
}

impl StreamBroadcaster {
	pub fn new(server_id: u64, store: Arc<ChunkStore>, registry: Arc<EntityRegistry>, accumulator: Arc<DeltaAccumulator>, tick: Arc<TickScheduler>, targets: Vec<SocketAddr>, interval: Duration) -> Self {
		Self { server_id, store, registry, accumulator, tick, targets, interval }
	}

	/// Runs until `shutdown` fires, publishing a summary/dirty-entity/delta
	/// batch once per tick of its own ticker.
	pub async fn run(&self, transport: &UdpTransport, shutdown: CancellationToken) {
		let mut ticker = tokio::time::interval(self.interval);
		loop {
			tokio::select! {
				_ = ticker.tick() => self.publish_once(transport).await,
				_ = shutdown.cancelled() => return,
			}
		}
	}

	async fn publish_once(&self, transport: &UdpTransport) {
		self.publish_chunk_summaries(transport).await;
		self.publish_dirty_entities(transport).await;
		self.publish_voxel_deltas(transport).await;
	}

	/// Sends a lightweight `ChunkSummary` per loaded chunk to every
	/// configured neighbor, for divergence detection. Carries no per-block
	/// data.
	async fn publish_chunk_summaries(&self, transport: &UdpTransport) {
		for coord in self.store.loaded_chunk_coords() {
			let Some(summary) = self.summarize(coord).await else { continue };
			let payload = serde_json::to_value(&summary).unwrap_or_default();
			self.send_to_all(transport, MessageType::ChunkSummary, payload).await;
		}
	}

	async fn summarize(&self, coord: ChunkCoord) -> Option<ChunkSummaryPayload> {
		let cancel = CancellationToken::new();
		let chunk = self.store.chunk(coord, &cancel).await.ok()?;
		let (stored_block_count, checksum) = chunk.occupancy_checksum().await;
		Some(ChunkSummaryPayload { server_id: self.server_id, chunk_x: coord.x, chunk_y: coord.y, stored_block_count, checksum })
	}

	/// Drains the entity registry's dirty set and broadcasts one
	/// `EntityUpdate` batch; each entity's dirty flag was already cleared
	/// by `take_dirty`.
	async fn publish_dirty_entities(&self, transport: &UdpTransport) {
		let dirty = self.registry.take_dirty();
		if dirty.is_empty() {
			return;
		}
		let entities = dirty.into_iter().map(|entity| serde_json::to_value(&entity).unwrap_or_default()).collect();
		let payload = EntityUpdatePayload { server_id: self.server_id, entities };
		let value = serde_json::to_value(&payload).unwrap_or_default();
		self.send_to_all(transport, MessageType::EntityUpdate, value).await;
	}

	/// Forwards the delta accumulator's flushed `ChunkDelta` messages
	/// verbatim onto the transport.
	async fn publish_voxel_deltas(&self, transport: &UdpTransport) {
		let _ = self.tick.take_dirty_chunks();
		for delta in self.accumulator.flush() {
			let value = serde_json::to_value(&delta).unwrap_or_default();
			self.send_to_all(transport, MessageType::ChunkDelta, value).await;
		}
	}

	async fn send_to_all(&self, transport: &UdpTransport, message_type: MessageType, payload: serde_json::Value) {
		for &target in &self.targets {
			if let Err(error) = transport.send(target, message_type, payload.clone()).await {
				warn!("broadcaster send of {message_type:?} to {target} failed: {error}");
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::migration::MigrationEngine;
	use crate::neighbor::NeighborManager;
	use crate::store::generator::FlatWorldGenerator;
	use voxelcluster_shared::region::{Dimensions, ServerRegion};

	async fn harness() -> (tempfile::TempDir, StreamBroadcaster, UdpTransport) {
		let dir = tempfile::tempdir().expect("tempdir");
		let region = ServerRegion::new(ChunkCoord::new(0, 0), 1, Dimensions { w: 4, d: 4, h: 8 });
		let stability = crate::stability::StabilityConfig { ground_support: 1_000_000.0, hanging_penalty: 0.5 };
		let store = Arc::new(ChunkStore::new(region, dir.path().to_owned(), 1024 * 1024, 0, Arc::new(FlatWorldGenerator::default()), stability));
		let registry = Arc::new(EntityRegistry::new());
		let accumulator = Arc::new(DeltaAccumulator::new(1));
		let migration = Arc::new(MigrationEngine::new(1));
		let neighbor = Arc::new(NeighborManager::new(1, region, vec![]));
		let tick = Arc::new(TickScheduler::new(store.clone(), registry.clone(), migration, neighbor, accumulator.clone(), Duration::from_millis(50), 2));
		let transport = UdpTransport::bind("127.0.0.1:0".parse().unwrap(), 65536).await.expect("bind");
		let broadcaster = StreamBroadcaster::new(1, store, registry, accumulator, tick, vec!["127.0.0.1:9".parse().unwrap()], Duration::from_millis(10));
		(dir, broadcaster, transport)
	}

	#[tokio::test]
	async fn publish_once_does_not_panic_with_empty_state() {
		let (_dir, broadcaster, transport) = harness().await;
		broadcaster.publish_once(&transport).await;
	}

	#[tokio::test]
	async fn chunk_summary_reports_loaded_chunk() {
		let (_dir, broadcaster, _transport) = harness().await;
		let cancel = CancellationToken::new();
		broadcaster.store.chunk(ChunkCoord::new(0, 0), &cancel).await.expect("chunk");
		let summary = broadcaster.summarize(ChunkCoord::new(0, 0)).await.expect("summary");
		assert_eq!(summary.chunk_x, 0);
		assert_eq!(summary.chunk_y, 0);
	}
}
