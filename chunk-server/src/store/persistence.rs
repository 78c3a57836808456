//! Per-chunk on-disk persistence: an append-only base file plus numbered
//! parts, each capped at `maxChunkFileSize`, and an index sidecar that maps
//! column index to its most recent record. See spec §4.2 and §6.

use crate::store::codec::{decode_column, encode_column, CodecError};
use log::{error, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use voxelcluster_shared::block::Column;
use voxelcluster_shared::region::ChunkCoord;

#[derive(Debug, Error)]
pub enum PersistenceError {
	#[error("io error: {0}")]
	Io(#[from] std::io::Error),
	#[error("codec error: {0}")]
	Codec(#[from] CodecError),
	#[error("sidecar json error: {0}")]
	Json(#[from] serde_json::Error),
}

const OP_SET: u8 = 0;
const OP_DELETE: u8 = 1;

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
struct IndexEntry {
	index: u32,
	part: u32,
	offset: u64,
	size: u32,
}

#[derive(Serialize, Deserialize)]
struct IndexSidecar {
	version: u32,
	count: u32,
	entries: Vec<IndexEntry>,
}

/// Owns the part files and index sidecar for one chunk.
pub struct ChunkPersistence {
	dir: PathBuf,
	max_part_size: u64,
	current_part: u32,
	current_part_len: u64,
	index: HashMap<u32, IndexEntry>,
}

fn part_path(dir: &Path, part: u32) -> PathBuf {
	if part == 0 {
		dir.join("chunk00.bin")
	} else {
		dir.join(format!("chunk00.bin.part{part}"))
	}
}

fn idx_path(dir: &Path) -> PathBuf {
	dir.join("chunk00.bin.idx")
}

impl ChunkPersistence {
	/// Opens (or creates) the on-disk representation for `coord` under
	/// `data_root`. Does not itself load column contents — callers use
	/// [`Self::load_all`] for that.
	pub fn open(data_root: &Path, coord: ChunkCoord, max_part_size: u64) -> Result<Self, PersistenceError> {
		let dir = data_root.join(coord.x.to_string()).join(coord.y.to_string());
		std::fs::create_dir_all(&dir)?;

		let mut persistence = Self { dir, max_part_size, current_part: 0, current_part_len: 0, index: HashMap::new() };

		match persistence.read_sidecar() {
			Ok(Some(index)) if persistence.sidecar_matches_parts(&index) => {
				persistence.index = index.entries.into_iter().map(|entry| (entry.index, entry)).collect();
			}
			_ => persistence.rebuild_index_by_scan()?,
		}

		persistence.locate_current_part();
		Ok(persistence)
	}

	fn sidecar_matches_parts(&self, sidecar: &IndexSidecar) -> bool {
		sidecar.version == 1 && sidecar.count as usize == sidecar.entries.len()
	}

	fn read_sidecar(&self) -> Result<Option<IndexSidecar>, PersistenceError> {
		let path = idx_path(&self.dir);
		if !path.exists() {
			return Ok(None);
		}
		let text = std::fs::read_to_string(path)?;
		Ok(Some(serde_json::from_str(&text)?))
	}

	fn write_sidecar(&self) -> Result<(), PersistenceError> {
		let mut entries: Vec<IndexEntry> = self.index.values().copied().collect();
		entries.sort_by_key(|entry| entry.index);
		let sidecar = IndexSidecar { version: 1, count: entries.len() as u32, entries };

		let final_path = idx_path(&self.dir);
		let tmp_path = self.dir.join("chunk00.bin.idx.tmp");
		std::fs::write(&tmp_path, serde_json::to_vec(&sidecar)?)?;
		std::fs::rename(&tmp_path, &final_path)?;
		Ok(())
	}

	/// Scans every part file from scratch, rebuilding the index. A single
	/// corrupt record aborts the scan of that part; later parts still scan
	/// (spec §7, Persistence).
	fn rebuild_index_by_scan(&mut self) -> Result<(), PersistenceError> {
		self.index.clear();
		let mut part = 0u32;
		loop {
			let path = part_path(&self.dir, part);
			if !path.exists() {
				break;
			}

			if let Err(error) = self.scan_part(part, &path) {
				error!("aborting scan of part {part} at {path:?} due to corrupt record: {error}");
			}
			part += 1;
		}

		self.write_sidecar()
	}

	fn scan_part(&mut self, part: u32, path: &Path) -> Result<(), PersistenceError> {
		let mut file = File::open(path)?;
		let mut offset = 0u64;

		loop {
			let mut header = [0u8; 9];
			match file.read_exact(&mut header) {
				Ok(()) => {}
				Err(error) if error.kind() == std::io::ErrorKind::UnexpectedEof => break,
				Err(error) => return Err(error.into()),
			}

			let op = header[0];
			let index = u32::from_le_bytes(header[1..5].try_into().expect("4 bytes"));
			let size = u32::from_le_bytes(header[5..9].try_into().expect("4 bytes"));

			let record_offset = offset;
			file.seek(SeekFrom::Current(size as i64))?;
			offset += 9 + size as u64;

			match op {
				OP_SET => {
					self.index.insert(index, IndexEntry { index, part, offset: record_offset, size });
				}
				OP_DELETE => {
					self.index.remove(&index);
				}
				_ => return Err(PersistenceError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, "unknown opcode"))),
			}
		}

		Ok(())
	}

	fn locate_current_part(&mut self) {
		let mut part = 0u32;
		loop {
			let path = part_path(&self.dir, part);
			match std::fs::metadata(&path) {
				Ok(metadata) => {
					let next = part_path(&self.dir, part + 1);
					if next.exists() {
						part += 1;
						continue;
					}
					self.current_part = part;
					self.current_part_len = metadata.len();
					return;
				}
				Err(_) => {
					self.current_part = part;
					self.current_part_len = 0;
					return;
				}
			}
		}
	}

	/// Appends a `set` record for `index` with the encoded column payload,
	/// rotating to a new part if the current one would exceed
	/// `maxChunkFileSize`, then atomically replaces the index sidecar.
	pub fn save_column(&mut self, index: u32, column: &Column) -> Result<(), PersistenceError> {
		let payload = encode_column(column)?;
		self.append_record(OP_SET, index, &payload)
	}

	pub fn delete_column(&mut self, index: u32) -> Result<(), PersistenceError> {
		self.append_record(OP_DELETE, index, &[])
	}

	fn append_record(&mut self, op: u8, index: u32, payload: &[u8]) -> Result<(), PersistenceError> {
		let record_len = 9 + payload.len() as u64;
		if self.current_part_len > 0 && self.current_part_len + record_len > self.max_part_size {
			self.current_part += 1;
			self.current_part_len = 0;
		}

		let path = part_path(&self.dir, self.current_part);
		let mut file = OpenOptions::new().create(true).append(true).open(&path)?;

		let offset = self.current_part_len;
		file.write_all(&[op])?;
		file.write_all(&index.to_le_bytes())?;
		file.write_all(&(payload.len() as u32).to_le_bytes())?;
		file.write_all(payload)?;
		file.flush()?;

		self.current_part_len += record_len;

		match op {
			OP_SET => {
				self.index.insert(index, IndexEntry { index, part: self.current_part, offset, size: payload.len() as u32 });
			}
			OP_DELETE => {
				self.index.remove(&index);
			}
			_ => unreachable!("append_record is only called with OP_SET/OP_DELETE"),
		}

		self.write_sidecar()
	}

	/// Loads the most recent column payload for `index`, if any is on disk.
	pub fn load_column(&self, index: u32) -> Result<Option<Column>, PersistenceError> {
		let Some(entry) = self.index.get(&index) else { return Ok(None) };

		let path = part_path(&self.dir, entry.part);
		let mut file = File::open(&path)?;
		file.seek(SeekFrom::Start(entry.offset + 9))?;
		let mut payload = vec![0u8; entry.size as usize];
		file.read_exact(&mut payload)?;

		Ok(Some(decode_column(&payload)?))
	}

	/// Loads every column index present in this chunk's on-disk index.
	pub fn load_all(&self) -> Result<HashMap<u32, Column>, PersistenceError> {
		let mut columns = HashMap::with_capacity(self.index.len());
		for &index in self.index.keys() {
			if let Some(column) = self.load_column(index)? {
				columns.insert(index, column);
			} else {
				warn!("index entry for column {index} present but load returned nothing");
			}
		}
		Ok(columns)
	}

	pub fn has_any_data(&self) -> bool {
		!self.index.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use voxelcluster_shared::block::Block;

	fn sample_column(hp: f64) -> Column {
		let mut column = Column::new();
		column.set(0, Some(Block::solid(hp, 5.0, 1.0)));
		column.set(1, Some(Block::solid(hp, 5.0, 1.0)));
		column
	}

	#[test]
	fn save_then_load_round_trips() {
		let dir = tempfile::tempdir().expect("tempdir");
		let coord = ChunkCoord::new(3, -4);
		let mut persistence = ChunkPersistence::open(dir.path(), coord, 1024 * 1024).expect("open");

		persistence.save_column(0, &sample_column(10.0)).expect("save");
		persistence.save_column(1, &sample_column(20.0)).expect("save");

		let loaded = persistence.load_column(0).expect("load").expect("present");
		assert_eq!(loaded.get(0).expect("block").hp, 10.0);
	}

	#[test]
	fn reopen_without_sidecar_rebuilds_by_scan() {
		let dir = tempfile::tempdir().expect("tempdir");
		let coord = ChunkCoord::new(0, 0);

		{
			let mut persistence = ChunkPersistence::open(dir.path(), coord, 1024 * 1024).expect("open");
			persistence.save_column(0, &sample_column(5.0)).expect("save");
			persistence.save_column(1, &sample_column(6.0)).expect("save");
		}

		let region_dir = dir.path().join("0").join("0");
		std::fs::remove_file(idx_path(&region_dir)).expect("remove sidecar");

		let reopened = ChunkPersistence::open(dir.path(), coord, 1024 * 1024).expect("reopen");
		let all = reopened.load_all().expect("load all");
		assert_eq!(all.len(), 2);
	}

	#[test]
	fn delete_removes_from_index() {
		let dir = tempfile::tempdir().expect("tempdir");
		let coord = ChunkCoord::new(1, 1);
		let mut persistence = ChunkPersistence::open(dir.path(), coord, 1024 * 1024).expect("open");

		persistence.save_column(0, &sample_column(1.0)).expect("save");
		persistence.delete_column(0).expect("delete");

		assert!(persistence.load_column(0).expect("load").is_none());
	}

	#[test]
	fn rotates_part_files_past_size_limit() {
		let dir = tempfile::tempdir().expect("tempdir");
		let coord = ChunkCoord::new(9, 9);
		let mut persistence = ChunkPersistence::open(dir.path(), coord, 64).expect("open");

		for i in 0..20 {
			persistence.save_column(i, &sample_column(i as f64)).expect("save");
		}

		let region_dir = dir.path().join("9").join("9");
		assert!(region_dir.join("chunk00.bin.part1").exists(), "expected rotation to a second part file");
	}
}
