use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// The outer UDP wire frame (spec §6): every datagram is one UTF-8 JSON
/// object shaped like this, regardless of `type`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
	#[serde(rename = "type")]
	pub message_type: MessageType,

	#[serde(with = "time::serde::rfc3339")]
	pub timestamp: OffsetDateTime,

	pub seq: u64,

	pub payload: serde_json::Value,
}

impl Envelope {
	pub fn new(message_type: MessageType, seq: u64, payload: serde_json::Value) -> Self {
		Self { message_type, timestamp: OffsetDateTime::now_utc(), seq, payload }
	}
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageType {
	Hello,
	KeepAlive,
	ChunkSummary,
	ChunkDelta,
	EntityUpdate,
	EntityQuery,
	EntityReply,
	PathRequest,
	PathResponse,
	TransferClaim,
	NeighborHello,
	NeighborAck,
	TransferRequest,
	TransferAck,
}

/// Default maximum UDP datagram size; larger datagrams are rejected on both
/// sides (spec §6).
pub const DEFAULT_MAX_DATAGRAM_SIZE: usize = 65536;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NeighborHello {
	pub server_id: u64,
	pub listen: std::net::SocketAddr,
	pub region_origin_x: i64,
	pub region_origin_y: i64,
	pub region_size: u32,
	pub delta_x: i64,
	pub delta_y: i64,
	#[serde(with = "time::serde::rfc3339")]
	pub timestamp: OffsetDateTime,
	pub nonce: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NeighborAck {
	pub server_id: u64,
	pub listen: std::net::SocketAddr,
	pub region_origin_x: i64,
	pub region_origin_y: i64,
	pub region_size: u32,
	pub delta_x: i64,
	pub delta_y: i64,
	#[serde(with = "time::serde::rfc3339")]
	pub timestamp: OffsetDateTime,
	pub nonce: u64,
	pub status: AckStatus,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AckStatus {
	Ok,
	Rejected,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraversalMode {
	Ground,
	Flying,
	Underground,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathRequest {
	pub entity_id: u64,
	pub from_x: i64,
	pub from_y: i64,
	pub from_z: i64,
	pub to_x: i64,
	pub to_y: i64,
	pub to_z: i64,
	pub mode: TraversalMode,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub clearance: Option<u32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub max_climb: Option<u32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub max_drop: Option<u32>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RouteNode {
	pub x: i64,
	pub y: i64,
	pub z: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathResponse {
	pub entity_id: u64,
	pub route: Vec<RouteNode>,
}

/// Numeric wire code for [`crate::block::BlockKind`] (§6: "numeric codes").
/// `Unknown = 0` is reserved for forward compatibility with block kinds
/// introduced after a receiver was built.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[repr(u8)]
pub enum BlockTypeCode {
	Unknown = 0,
	Air = 1,
	Solid = 2,
	Unstable = 3,
	Mineral = 4,
	Explosive = 5,
}

impl From<crate::block::BlockKind> for BlockTypeCode {
	fn from(kind: crate::block::BlockKind) -> Self {
		use crate::block::BlockKind::*;
		match kind {
			Air => BlockTypeCode::Air,
			Solid => BlockTypeCode::Solid,
			Unstable => BlockTypeCode::Unstable,
			Mineral => BlockTypeCode::Mineral,
			Explosive => BlockTypeCode::Explosive,
		}
	}
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ChangeReasonCode {
	Unknown = 0,
	Damage = 1,
	Destroy = 2,
	Collapse = 3,
}

impl From<crate::delta::ChangeReason> for ChangeReasonCode {
	fn from(reason: crate::delta::ChangeReason) -> Self {
		use crate::delta::ChangeReason::*;
		match reason {
			Damage => ChangeReasonCode::Damage,
			Destroy => ChangeReasonCode::Destroy,
			Collapse => ChangeReasonCode::Collapse,
		}
	}
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireBlockChange {
	pub x: i64,
	pub y: i64,
	pub z: i64,
	#[serde(rename = "type")]
	pub block_type: BlockTypeCode,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub material: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub color: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub texture: Option<String>,
	pub hp: f64,
	pub max_hp: f64,
	pub reason: ChangeReasonCode,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub light_emission: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkDeltaPayload {
	pub server_id: u64,
	pub chunk_x: i64,
	pub chunk_y: i64,
	pub seq: u64,
	#[serde(with = "time::serde::rfc3339")]
	pub timestamp: OffsetDateTime,
	pub blocks: Vec<WireBlockChange>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequestPayload {
	pub entity_id: u64,
	pub from_server: u64,
	pub to_server: u64,
	pub global_chunk_x: i64,
	pub global_chunk_y: i64,
	pub reason: String,
	pub state: serde_json::Value,
	pub nonce: u64,
	#[serde(with = "time::serde::rfc3339")]
	pub timestamp: OffsetDateTime,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferAckPayload {
	pub entity_id: u64,
	pub from_server: u64,
	pub to_server: u64,
	pub nonce: u64,
	pub accepted: bool,
	pub message: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkSummaryPayload {
	pub server_id: u64,
	pub chunk_x: i64,
	pub chunk_y: i64,
	pub stored_block_count: u64,
	pub checksum: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityUpdatePayload {
	pub server_id: u64,
	pub entities: Vec<serde_json::Value>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn envelope_round_trips_through_json() {
		let payload = serde_json::json!({"hello": "world"});
		let envelope = Envelope::new(MessageType::KeepAlive, 42, payload.clone());

		let encoded = serde_json::to_string(&envelope).expect("encode");
		let decoded: Envelope = serde_json::from_str(&encoded).expect("decode");

		assert_eq!(decoded.message_type, MessageType::KeepAlive);
		assert_eq!(decoded.seq, 42);
		assert_eq!(decoded.payload, payload);
	}
}
