//! Wires every subsystem together from a loaded [`crate::config::ChunkConfig`]
//! and owns the handler registrations on the UDP transport (spec §4.8,
//! §4.9, §6).

use crate::broadcaster::StreamBroadcaster;
use crate::config::ChunkConfig;
use crate::delta_accumulator::DeltaAccumulator;
use crate::entity_registry::EntityRegistry;
use crate::migration::MigrationEngine;
use crate::navigator::{self, NavigatorProfiler, TraversalMode as NavTraversalMode, TraversalProfile};
use crate::neighbor::{NeighborConfig, NeighborManager};
use crate::stability::StabilityConfig;
use crate::store::generator::FlatWorldGenerator;
use crate::store::ChunkStore;
use crate::tick::TickScheduler;
use crate::transport::UdpTransport;
use log::{error, warn};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use voxelcluster_shared::envelope::{
	MessageType, NeighborAck, NeighborHello, PathRequest, PathResponse, RouteNode, TraversalMode as WireTraversalMode, TransferAckPayload,
	TransferRequestPayload,
};
use voxelcluster_shared::region::{BlockCoord, ChunkCoord, Dimensions, ServerRegion};

#[derive(Debug, Error)]
pub enum ServerError {
	#[error("failed to bind udp transport: {0}")]
	Transport(#[from] crate::transport::TransportError),
}

/// Owns every chunk-server subsystem and the background tasks driving them.
/// `run` blocks the calling thread forever (or until `shutdown` fires),
/// exactly as the teacher's binary blocks on `Sector::run()`.
pub struct ChunkServer {
	server_id: u64,
	store: Arc<ChunkStore>,
	registry: Arc<EntityRegistry>,
	navigator_profiler: Arc<NavigatorProfiler>,
	transport: Arc<UdpTransport>,
	neighbor: Arc<NeighborManager>,
	migration: Arc<MigrationEngine>,
	accumulator: Arc<DeltaAccumulator>,
	broadcaster: Arc<StreamBroadcaster>,
	tick: Arc<TickScheduler>,
	discovery_interval: Duration,
	transfer_retry: Duration,
	drain_batch: usize,
}

impl ChunkServer {
	pub async fn bind(config: ChunkConfig) -> Result<Self, ServerError> {
		let region = ServerRegion::new(
			ChunkCoord::new(config.region.origin_x, config.region.origin_y),
			config.region.chunks_per_axis,
			Dimensions { w: config.region.width, d: config.region.depth, h: config.region.height },
		);

		let stability = StabilityConfig { ground_support: config.stability.ground_support, hanging_penalty: config.stability.hanging_penalty };

		let store = Arc::new(ChunkStore::new(
			region,
			config.data_root.clone(),
			config.persistence.max_chunk_file_size,
			config.generation_seed,
			Arc::new(FlatWorldGenerator::default()),
			stability,
		));

		let registry = Arc::new(EntityRegistry::new());
		let navigator_profiler = Arc::new(NavigatorProfiler::default());

		let neighbors = config.neighbors.iter().map(|n| NeighborConfig { endpoint: n.endpoint, delta_x: n.delta_x, delta_y: n.delta_y }).collect();
		let neighbor = Arc::new(NeighborManager::new(config.server_id, region, neighbors));

		let migration = Arc::new(MigrationEngine::new(config.server_id));
		let accumulator = Arc::new(DeltaAccumulator::new(config.server_id));

		let transport = Arc::new(UdpTransport::bind(config.listen, config.transport.max_datagram_size).await?);

		let tick_interval = Duration::from_secs_f64(1.0 / config.tick.rate_hz.max(1) as f64);
		let tick = Arc::new(TickScheduler::new(store.clone(), registry.clone(), migration.clone(), neighbor.clone(), accumulator.clone(), tick_interval, config.tick.workers));

		let neighbor_targets = config.neighbors.iter().map(|n| n.endpoint).collect();
		let broadcaster = Arc::new(StreamBroadcaster::new(config.server_id, store.clone(), registry.clone(), accumulator.clone(), tick.clone(), neighbor_targets, Duration::from_secs(1)));

		let server = Self {
			server_id: config.server_id,
			store,
			registry,
			navigator_profiler,
			transport,
			neighbor,
			migration,
			accumulator,
			broadcaster,
			tick,
			discovery_interval: Duration::from_secs(config.migration.discovery_interval_secs),
			transfer_retry: Duration::from_secs(config.migration.transfer_retry_secs),
			drain_batch: config.migration.drain_batch,
		};

		server.register_handlers();
		Ok(server)
	}

	fn register_handlers(&self) {
		let neighbor = self.neighbor.clone();
		let transport = self.transport.clone();
		self.transport.register(
			MessageType::NeighborHello,
			Arc::new(move |from, envelope| {
				let Ok(hello) = serde_json::from_value::<NeighborHello>(envelope.payload) else {
					warn!("malformed NeighborHello from {from}");
					return;
				};
				let neighbor = neighbor.clone();
				let transport = transport.clone();
				tokio::spawn(async move { neighbor.handle_hello(&transport, from, hello).await });
			}),
		);

		let neighbor = self.neighbor.clone();
		self.transport.register(
			MessageType::NeighborAck,
			Arc::new(move |from, envelope| {
				let Ok(ack) = serde_json::from_value::<NeighborAck>(envelope.payload) else {
					warn!("malformed NeighborAck from {from}");
					return;
				};
				neighbor.handle_ack(from, ack);
			}),
		);

		let migration = self.migration.clone();
		let transport = self.transport.clone();
		let registry = self.registry.clone();
		let region = self.store.region;
		self.transport.register(
			MessageType::TransferRequest,
			Arc::new(move |from, envelope| {
				let Ok(payload) = serde_json::from_value::<TransferRequestPayload>(envelope.payload) else {
					warn!("malformed TransferRequest from {from}");
					return;
				};
				let migration = migration.clone();
				let transport = transport.clone();
				let registry = registry.clone();
				tokio::spawn(async move { migration.handle_transfer_request(&transport, from, &registry, &region, payload).await });
			}),
		);

		let migration = self.migration.clone();
		let registry = self.registry.clone();
		self.transport.register(
			MessageType::TransferAck,
			Arc::new(move |from, envelope| {
				let Ok(ack) = serde_json::from_value::<TransferAckPayload>(envelope.payload) else {
					warn!("malformed TransferAck from {from}");
					return;
				};
				let migration = migration.clone();
				let registry = registry.clone();
				tokio::spawn(async move { migration.handle_transfer_ack(&registry, ack).await });
			}),
		);

		let store = self.store.clone();
		let transport = self.transport.clone();
		let profiler = self.navigator_profiler.clone();
		self.transport.register(
			MessageType::PathRequest,
			Arc::new(move |from, envelope| {
				let Ok(request) = serde_json::from_value::<PathRequest>(envelope.payload) else {
					warn!("malformed PathRequest from {from}");
					return;
				};
				let store = store.clone();
				let transport = transport.clone();
				let profiler = profiler.clone();
				tokio::spawn(async move { handle_path_request(&store, &transport, &profiler, from, request).await });
			}),
		);
	}

	/// Spawns every background task (transport receive loop, neighbor
	/// discovery, migration drain/retry, stream broadcaster) and then runs
	/// the tick scheduler on the calling thread until `shutdown` fires.
	/// Intended to be called from inside a tokio runtime context, on the
	/// thread that runtime owns, exactly like the teacher's `sector.run()`.
	pub fn run(&self, shutdown: CancellationToken) {
		tokio::spawn(self.transport.clone().run(shutdown.clone()));

		{
			let transport = self.transport.clone();
			let neighbor = self.neighbor.clone();
			let interval = self.discovery_interval;
			let shutdown = shutdown.clone();
			tokio::spawn(async move {
				let mut ticker = tokio::time::interval(interval);
				loop {
					tokio::select! {
						_ = ticker.tick() => neighbor.run_discovery(&transport, interval).await,
						_ = shutdown.cancelled() => return,
					}
				}
			});
		}

		{
			let transport = self.transport.clone();
			let migration = self.migration.clone();
			let retry = self.transfer_retry;
			let batch = self.drain_batch;
			let shutdown = shutdown.clone();
			tokio::spawn(async move {
				let mut ticker = tokio::time::interval(Duration::from_millis(200));
				loop {
					tokio::select! {
						_ = ticker.tick() => {
							migration.drain(&transport, batch).await;
							migration.retry_stale(retry);
						}
						_ = shutdown.cancelled() => return,
					}
				}
			});
		}

		{
			let broadcaster = self.broadcaster.clone();
			let transport = self.transport.clone();
			let shutdown = shutdown.clone();
			tokio::spawn(async move { broadcaster.run(&transport, shutdown).await });
		}

		self.tick.run(shutdown);
	}

	pub fn server_id(&self) -> u64 {
		self.server_id
	}
}

async fn handle_path_request(store: &ChunkStore, transport: &UdpTransport, profiler: &NavigatorProfiler, from: std::net::SocketAddr, request: PathRequest) {
	let profile = TraversalProfile {
		mode: to_nav_mode(request.mode),
		clearance: request.clearance.unwrap_or(2),
		max_climb: request.max_climb.unwrap_or(1) as i64,
		max_drop: request.max_drop.unwrap_or(1) as i64,
		can_dig: false,
	};

	let start = BlockCoord::new(request.from_x, request.from_y, request.from_z);
	let goal = BlockCoord::new(request.to_x, request.to_y, request.to_z);
	let cancel = CancellationToken::new();

	let route = navigator::find_path(store, start, goal, profile, &cancel, Some(profiler)).await;
	let response = PathResponse {
		entity_id: request.entity_id,
		route: route.into_iter().map(|coord| RouteNode { x: coord.x, y: coord.y, z: coord.z }).collect(),
	};

	let payload = serde_json::to_value(&response).unwrap_or_default();
	if let Err(error) = transport.send(from, MessageType::PathResponse, payload).await {
		error!("failed to send PathResponse to {from}: {error}");
	}
}

fn to_nav_mode(mode: WireTraversalMode) -> NavTraversalMode {
	match mode {
		WireTraversalMode::Ground => NavTraversalMode::Ground,
		WireTraversalMode::Flying => NavTraversalMode::Flying,
		WireTraversalMode::Underground => NavTraversalMode::Underground,
	}
}
