//! UDP transport: one non-blocking socket, framed JSON envelopes, and a
//! handler registry dispatching by message type (spec §4.8).

use dashmap::DashMap;
use log::{debug, warn};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use voxelcluster_shared::envelope::{Envelope, MessageType};

#[derive(Debug, Error)]
pub enum TransportError {
	#[error("io error: {0}")]
	Io(#[from] std::io::Error),
	#[error("envelope serialization error: {0}")]
	Json(#[from] serde_json::Error),
}

pub type Handler = Arc<dyn Fn(SocketAddr, Envelope) + Send + Sync>;

/// Owns the socket, the per-sender sequence counter, and a registry of
/// handlers keyed by [`MessageType`]. Handlers run on independent workers
/// (spawned tasks) so a slow one never stalls reception.
pub struct UdpTransport {
	socket: Arc<UdpSocket>,
	seq: AtomicU64,
	max_datagram_size: usize,
	handlers: DashMap<MessageType, Vec<Handler>>,
}

impl UdpTransport {
	pub async fn bind(addr: SocketAddr, max_datagram_size: usize) -> Result<Self, TransportError> {
		let socket = UdpSocket::bind(addr).await?;
		Ok(Self { socket: Arc::new(socket), seq: AtomicU64::new(0), max_datagram_size, handlers: DashMap::new() })
	}

	pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
		self.socket.local_addr()
	}

	pub fn register(&self, message_type: MessageType, handler: Handler) {
		self.handlers.entry(message_type).or_default().push(handler);
	}

	/// Marshals `payload`, wraps it with a fresh monotonic sequence number
	/// and the current UTC timestamp, and writes it to `addr`.
	pub async fn send(&self, addr: SocketAddr, message_type: MessageType, payload: serde_json::Value) -> Result<(), TransportError> {
		let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
		let envelope = Envelope { message_type, timestamp: OffsetDateTime::now_utc(), seq, payload };
		let bytes = serde_json::to_vec(&envelope)?;
		self.socket.send_to(&bytes, addr).await?;
		Ok(())
	}

	/// Runs the receive loop until `shutdown` fires. Each datagram is
	/// decoded and dispatched to every handler registered for its type, on
	/// its own spawned task.
	pub async fn run(self: Arc<Self>, shutdown: tokio_util::sync::CancellationToken) {
		let mut buf = vec![0u8; self.max_datagram_size];
		loop {
			let recv = tokio::select! {
				recv = self.socket.recv_from(&mut buf) => recv,
				_ = shutdown.cancelled() => return,
			};

			let (len, addr) = match recv {
				Ok(pair) => pair,
				Err(error) => {
					warn!("udp recv error: {error}");
					continue;
				}
			};

			let envelope: Envelope = match serde_json::from_slice(&buf[..len]) {
				Ok(envelope) => envelope,
				Err(error) => {
					debug!("dropping malformed envelope from {addr}: {error}");
					continue;
				}
			};

			let Some(handlers) = self.handlers.get(&envelope.message_type) else { continue };
			for handler in handlers.iter().cloned() {
				let envelope = envelope.clone();
				tokio::spawn(async move { handler(addr, envelope) });
			}
		}
	}

	/// A channel-backed convenience for tests/callers that would rather
	/// `.recv()` handled messages than register closures.
	pub fn register_channel(&self, message_type: MessageType) -> mpsc::UnboundedReceiver<(SocketAddr, Envelope)> {
		let (tx, rx) = mpsc::unbounded_channel();
		self.register(message_type, Arc::new(move |addr, envelope| {
			let _ = tx.send((addr, envelope));
		}));
		rx
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn send_and_receive_round_trip() {
		let server = Arc::new(UdpTransport::bind("127.0.0.1:0".parse().unwrap(), 65536).await.expect("bind"));
		let client = UdpTransport::bind("127.0.0.1:0".parse().unwrap(), 65536).await.expect("bind");

		let mut rx = server.register_channel(MessageType::NeighborHello);
		let shutdown = tokio_util::sync::CancellationToken::new();
		let server_addr = server.local_addr().expect("addr");

		let run_handle = tokio::spawn(server.clone().run(shutdown.clone()));

		client.send(server_addr, MessageType::NeighborHello, serde_json::json!({"hello": true})).await.expect("send");

		let (_, envelope) = rx.recv().await.expect("received");
		assert_eq!(envelope.message_type, MessageType::NeighborHello);
		assert_eq!(envelope.seq, 1);

		shutdown.cancel();
		run_handle.await.expect("join");
	}
}
