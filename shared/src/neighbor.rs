use crate::entity::ServerId;
use crate::region::ChunkCoord;
use std::net::SocketAddr;
use std::time::Instant;

/// Handshake state for one neighboring chunk server, keyed by the delta
/// between the two regions' origins. At most one [`NeighborInfo`] exists per
/// delta.
#[derive(Clone, Debug)]
pub struct NeighborInfo {
	pub delta: (i64, i64),

	pub configured_endpoint: SocketAddr,
	pub last_observed_address: Option<SocketAddr>,

	pub remote_server_id: Option<ServerId>,
	pub remote_origin: Option<ChunkCoord>,
	pub remote_chunks_per_axis: Option<u32>,

	pub last_hello_sent: Option<Instant>,
	pub last_heard: Option<Instant>,
	pub connected: bool,
	pub pending_nonce: Option<u64>,
}

impl NeighborInfo {
	pub fn new(delta: (i64, i64), configured_endpoint: SocketAddr) -> Self {
		Self {
			delta,
			configured_endpoint,
			last_observed_address: None,
			remote_server_id: None,
			remote_origin: None,
			remote_chunks_per_axis: None,
			last_hello_sent: None,
			last_heard: None,
			connected: false,
			pending_nonce: None,
		}
	}

	pub fn send_target(&self) -> SocketAddr {
		self.last_observed_address.unwrap_or(self.configured_endpoint)
	}
}
