//! Delta-indexed table of adjacent region owners with a 2-way handshake
//! (spec §4.9).

use crate::transport::UdpTransport;
use dashmap::DashMap;
use log::{info, warn};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use voxelcluster_shared::entity::ServerId;
use voxelcluster_shared::envelope::{AckStatus, MessageType, NeighborAck, NeighborHello};
use voxelcluster_shared::neighbor::NeighborInfo;
use voxelcluster_shared::region::{ChunkCoord, ServerRegion};

pub struct NeighborConfig {
	pub endpoint: SocketAddr,
	pub delta_x: i64,
	pub delta_y: i64,
}

/// Coarse-grained lock around the delta→info map (spec §5, "Neighbor
/// manager: coarse-grained lock around the delta→info map").
pub struct NeighborManager {
	server_id: u64,
	region: ServerRegion,
	nonce: AtomicU64,
	neighbors: DashMap<(i64, i64), NeighborInfo>,
}

impl NeighborManager {
	pub fn new(server_id: u64, region: ServerRegion, configured: Vec<NeighborConfig>) -> Self {
		let neighbors = DashMap::new();
		for cfg in configured {
			neighbors.insert((cfg.delta_x, cfg.delta_y), NeighborInfo::new((cfg.delta_x, cfg.delta_y), cfg.endpoint));
		}
		Self { server_id, region, nonce: AtomicU64::new(0), neighbors }
	}

	/// Sends `NeighborHello` to every neighbor not connected, or last
	/// greeted longer than `discovery_interval` ago.
	pub async fn run_discovery(&self, transport: &UdpTransport, discovery_interval: Duration) {
		let now = Instant::now();
		let due: Vec<((i64, i64), SocketAddr)> = self
			.neighbors
			.iter()
			.filter(|entry| {
				!entry.connected && entry.last_hello_sent.map(|sent| now.duration_since(sent) >= discovery_interval).unwrap_or(true)
			})
			.map(|entry| (*entry.key(), entry.send_target()))
			.collect();

		for (delta, addr) in due {
			let nonce = self.nonce.fetch_add(1, Ordering::Relaxed) + 1;
			let origin = ChunkCoord::new(self.region.origin.x + delta.0, self.region.origin.y + delta.1);
			let hello = NeighborHello {
				server_id: self.server_id,
				listen: transport.local_addr().unwrap_or(addr),
				region_origin_x: origin.x,
				region_origin_y: origin.y,
				region_size: self.region.chunks_per_axis,
				delta_x: delta.0,
				delta_y: delta.1,
				timestamp: OffsetDateTime::now_utc(),
				nonce,
			};

			if let Some(mut entry) = self.neighbors.get_mut(&delta) {
				entry.pending_nonce = Some(nonce);
				entry.last_hello_sent = Some(now);
			}

			let payload = serde_json::to_value(&hello).unwrap_or_default();
			if let Err(error) = transport.send(addr, MessageType::NeighborHello, payload).await {
				warn!("failed to send NeighborHello to {addr}: {error}");
			}
		}
	}

	/// Handles an inbound `NeighborHello`: records the sender, marks
	/// connected, and replies with an echoed-nonce ack.
	pub async fn handle_hello(&self, transport: &UdpTransport, from: SocketAddr, hello: NeighborHello) {
		let delta = (hello.delta_x, hello.delta_y);
		let reverse_delta = (-hello.delta_x, -hello.delta_y);

		self.neighbors
			.entry(reverse_delta)
			.and_modify(|info| {
				info.last_observed_address = Some(from);
				info.remote_server_id = Some(ServerId(hello.server_id));
				info.remote_origin = Some(ChunkCoord::new(hello.region_origin_x, hello.region_origin_y));
				info.remote_chunks_per_axis = Some(hello.region_size);
				info.connected = true;
				info.last_heard = Some(Instant::now());
			})
			.or_insert_with(|| {
				let mut info = NeighborInfo::new(reverse_delta, from);
				info.last_observed_address = Some(from);
				info.remote_server_id = Some(ServerId(hello.server_id));
				info.connected = true;
				info
			});

		let origin = self.region.origin;
		let ack = NeighborAck {
			server_id: self.server_id,
			listen: transport.local_addr().unwrap_or(from),
			region_origin_x: origin.x,
			region_origin_y: origin.y,
			region_size: self.region.chunks_per_axis,
			delta_x: delta.0,
			delta_y: delta.1,
			timestamp: OffsetDateTime::now_utc(),
			nonce: hello.nonce,
			status: AckStatus::Ok,
		};

		let payload = serde_json::to_value(&ack).unwrap_or_default();
		if let Err(error) = transport.send(from, MessageType::NeighborAck, payload).await {
			warn!("failed to send NeighborAck to {from}: {error}");
		}
	}

	/// Handles an inbound `NeighborAck`: matches by nonce (preferred) or by
	/// delta (fallback), finalizing the connection.
	pub fn handle_ack(&self, from: SocketAddr, ack: NeighborAck) {
		let by_nonce = self.neighbors.iter().find(|entry| entry.pending_nonce == Some(ack.nonce)).map(|entry| *entry.key());
		let key = by_nonce.unwrap_or((ack.delta_x, ack.delta_y));

		if let Some(mut entry) = self.neighbors.get_mut(&key) {
			entry.last_observed_address = Some(from);
			entry.remote_server_id = Some(ServerId(ack.server_id));
			entry.remote_origin = Some(ChunkCoord::new(ack.region_origin_x, ack.region_origin_y));
			entry.remote_chunks_per_axis = Some(ack.region_size);
			entry.connected = ack.status == AckStatus::Ok;
			entry.pending_nonce = None;
			entry.last_heard = Some(Instant::now());
			info!("neighbor at delta {key:?} {}", if entry.connected { "connected" } else { "rejected handshake" });
		}
	}

	/// Looks up the neighbor whose region contains global chunk `target`,
	/// if any is known and connected.
	pub fn find_owner(&self, target: ChunkCoord) -> Option<(u64, SocketAddr)> {
		self.neighbors.iter().find_map(|entry| {
			if !entry.connected {
				return None;
			}
			let origin = entry.remote_origin?;
			let span = entry.remote_chunks_per_axis? as i64;
			let contains = target.x >= origin.x && target.x < origin.x + span && target.y >= origin.y && target.y < origin.y + span;
			if contains {
				Some((entry.remote_server_id?.0, entry.last_observed_address?))
			} else {
				None
			}
		})
	}
}

pub type SharedNeighborManager = Arc<NeighborManager>;

impl NeighborManager {
	/// Forces a neighbor into the connected state without running the
	/// handshake, for tests exercising the migration path in isolation.
	#[cfg(test)]
	pub(crate) fn mark_connected_for_test(&self, delta: (i64, i64), remote_origin: ChunkCoord, remote_server_id: u64) {
		self.neighbors.entry(delta).and_modify(|info| {
			info.connected = true;
			info.remote_origin = Some(remote_origin);
			info.remote_chunks_per_axis = Some(self.region.chunks_per_axis);
			info.remote_server_id = Some(ServerId(remote_server_id));
			info.last_observed_address = Some(info.configured_endpoint);
		});
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use voxelcluster_shared::region::Dimensions;

	fn region() -> ServerRegion {
		ServerRegion::new(ChunkCoord::new(0, 0), 4, Dimensions { w: 16, d: 16, h: 64 })
	}

	#[test]
	fn find_owner_requires_connected_neighbor() {
		let manager = NeighborManager::new(1, region(), vec![NeighborConfig { endpoint: "127.0.0.1:9000".parse().unwrap(), delta_x: 4, delta_y: 0 }]);
		assert!(manager.find_owner(ChunkCoord::new(5, 0)).is_none());

		manager.neighbors.entry((4, 0)).and_modify(|info| {
			info.connected = true;
			info.remote_origin = Some(ChunkCoord::new(4, 0));
			info.remote_chunks_per_axis = Some(4);
			info.remote_server_id = Some(ServerId(2));
			info.last_observed_address = Some("127.0.0.1:9000".parse().unwrap());
		});

		assert_eq!(manager.find_owner(ChunkCoord::new(5, 0)), Some((2, "127.0.0.1:9000".parse().unwrap())));
	}
}
