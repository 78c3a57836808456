use crate::block::Block;
use crate::region::{BlockCoord, ChunkCoord};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Why a block changed. Ordering is the coalescing priority:
/// `Collapse > Destroy > Damage`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChangeReason {
	Damage,
	Destroy,
	Collapse,
}

impl ChangeReason {
	pub fn priority(self) -> u8 {
		match self {
			ChangeReason::Damage => 1,
			ChangeReason::Destroy => 2,
			ChangeReason::Collapse => 3,
		}
	}
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockChange {
	pub coord: BlockCoord,
	pub before: Option<Block>,
	pub after: Option<Block>,
	pub reason: ChangeReason,
}

impl BlockChange {
	/// Merges `other` into `self` under the coalescing rule: the
	/// higher-priority reason wins; on a tie, the earliest `before` is kept
	/// (so `self` must be the earlier change).
	pub fn coalesce(self, other: BlockChange) -> BlockChange {
		if other.reason.priority() > self.reason.priority() {
			BlockChange { before: self.before, ..other }
		} else {
			BlockChange { after: other.after, ..self }
		}
	}
}

/// A set of [`BlockChange`]s keyed by coordinate (priority-merged) plus the
/// set of dirty chunks touched.
#[derive(Clone, Debug, Default)]
pub struct DamageSummary {
	changes: HashMap<BlockCoord, BlockChange>,
	dirty_chunks: HashSet<ChunkCoord>,
}

impl DamageSummary {
	pub fn new() -> Self {
		Self::default()
	}

	/// Records a change, touching `chunk` as dirty, and coalescing with any
	/// existing change at the same coordinate.
	pub fn record(&mut self, change: BlockChange, chunk: ChunkCoord) {
		self.dirty_chunks.insert(chunk);
		self.changes
			.entry(change.coord)
			.and_modify(|existing| {
				let taken = std::mem::replace(
					existing,
					BlockChange { coord: change.coord, before: None, after: None, reason: ChangeReason::Damage },
				);
				*existing = taken.coalesce(change.clone());
			})
			.or_insert(change);
	}

	/// Merges another summary's changes and dirty-chunk set into this one,
	/// applying the same coalescing rule per coordinate.
	pub fn merge(&mut self, other: DamageSummary) {
		self.dirty_chunks.extend(other.dirty_chunks);
		for (_, change) in other.changes {
			self.changes
				.entry(change.coord)
				.and_modify(|existing| {
					let taken = std::mem::replace(
						existing,
						BlockChange { coord: change.coord, before: None, after: None, reason: ChangeReason::Damage },
					);
					*existing = taken.coalesce(change.clone());
				})
				.or_insert(change);
		}
	}

	pub fn collapsed_blocks(&self) -> impl Iterator<Item = &BlockChange> {
		self.changes.values().filter(|change| change.reason == ChangeReason::Collapse)
	}

	pub fn dirty_chunks(&self) -> impl Iterator<Item = &ChunkCoord> {
		self.dirty_chunks.iter()
	}

	pub fn changes(&self) -> impl Iterator<Item = &BlockChange> {
		self.changes.values()
	}

	pub fn len(&self) -> usize {
		self.changes.len()
	}

	pub fn is_empty(&self) -> bool {
		self.changes.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::block::{Block, BlockKind};

	fn block(hp: f64) -> Block {
		Block { kind: BlockKind::Solid, ..Block::solid(hp, 1.0, 1.0) }
	}

	#[test]
	fn coalesce_keeps_higher_priority_and_earliest_before() {
		let coord = BlockCoord::new(5, 6, 7);
		let first_before = block(15.0);

		let a = BlockChange { coord, before: Some(first_before.clone()), after: None, reason: ChangeReason::Destroy };
		let b = BlockChange { coord, before: Some(block(10.0)), after: None, reason: ChangeReason::Damage };
		let c = BlockChange { coord, before: Some(block(9.0)), after: None, reason: ChangeReason::Destroy };

		let mut summary = DamageSummary::new();
		let chunk = ChunkCoord::new(0, 0);
		summary.record(a, chunk);
		summary.record(b, chunk);
		summary.record(c, chunk);

		assert_eq!(summary.len(), 1);
		let merged = summary.changes().next().expect("one change");
		assert_eq!(merged.reason, ChangeReason::Destroy);
		assert_eq!(merged.before.as_ref().expect("before").hp, first_before.hp);
	}

	#[test]
	fn distinct_coords_do_not_merge() {
		let mut summary = DamageSummary::new();
		let chunk = ChunkCoord::new(0, 0);
		summary.record(
			BlockChange { coord: BlockCoord::new(0, 0, 0), before: None, after: None, reason: ChangeReason::Damage },
			chunk,
		);
		summary.record(
			BlockChange { coord: BlockCoord::new(1, 0, 0), before: None, after: None, reason: ChangeReason::Damage },
			chunk,
		);
		assert_eq!(summary.len(), 2);
	}
}
