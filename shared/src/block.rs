use crate::metadata::MetadataValue;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The kind of a [`Block`]. `Air` is never actually stored: a column simply
/// omits the index (see [`Column`]).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum BlockKind {
	Air,
	Solid,
	Unstable,
	Mineral,
	Explosive,
}

impl BlockKind {
	pub fn is_solid_for_occlusion(self) -> bool {
		!matches!(self, BlockKind::Air)
	}

	/// `true` only for `Solid`. `Mineral`/`Unstable`/`Explosive` are present
	/// and occlude, but a digging unit can tunnel through them.
	pub fn is_solid(self) -> bool {
		matches!(self, BlockKind::Solid)
	}
}

/// A single block's attributes. `kind = Air` never appears as a value here;
/// an air block is represented by the absence of an entry in a [`Column`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Block {
	pub kind: BlockKind,

	pub hp: f64,
	pub max_hp: f64,
	pub connecting_force: f64,
	pub weight: f64,

	pub material: Option<String>,
	pub color: Option<String>,
	pub texture: Option<String>,

	pub light_emission: Option<f64>,
	pub resource_yield: Option<HashMap<String, f64>>,
	pub metadata: Option<HashMap<String, MetadataValue>>,
}

impl Block {
	/// A plain solid block with the given structural parameters.
	pub fn solid(hp: f64, connecting_force: f64, weight: f64) -> Self {
		Self {
			kind: BlockKind::Solid,
			hp,
			max_hp: hp,
			connecting_force,
			weight,
			material: None,
			color: None,
			texture: None,
			light_emission: None,
			resource_yield: None,
			metadata: None,
		}
	}

	/// `true` iff `0 <= hp <= max_hp`, the data-model invariant for a present block.
	pub fn hp_invariant_holds(&self) -> bool {
		self.hp >= 0.0 && self.hp <= self.max_hp
	}
}

/// The vertical stack of blocks at one `(localX, localY)` inside a chunk.
/// Indexed by local Z starting at 0; trailing air is never stored, so
/// `column.len()` is the height of the highest non-air block plus one.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Column {
	blocks: Vec<Option<Block>>,
}

impl Column {
	pub fn new() -> Self {
		Self { blocks: Vec::new() }
	}

	/// Height below which blocks may be present (trailing air trimmed).
	pub fn height(&self) -> usize {
		self.blocks.len()
	}

	pub fn get(&self, z: usize) -> Option<&Block> {
		self.blocks.get(z).and_then(|slot| slot.as_ref())
	}

	/// Sets the block at `z`, growing the column with air gaps if needed, and
	/// trims trailing air afterwards so the invariant always holds.
	pub fn set(&mut self, z: usize, block: Option<Block>) {
		if block.is_none() && z >= self.blocks.len() {
			return;
		}

		if z >= self.blocks.len() {
			self.blocks.resize_with(z + 1, || None);
		}

		self.blocks[z] = block;
		self.trim_trailing_air();
	}

	fn trim_trailing_air(&mut self) {
		while matches!(self.blocks.last(), Some(None)) {
			self.blocks.pop();
		}
	}

	pub fn iter(&self) -> impl Iterator<Item = (usize, &Block)> {
		self.blocks
			.iter()
			.enumerate()
			.filter_map(|(z, slot)| slot.as_ref().map(|block| (z, block)))
	}

	pub fn is_empty(&self) -> bool {
		self.blocks.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn trailing_air_is_never_stored() {
		let mut column = Column::new();
		column.set(0, Some(Block::solid(10.0, 5.0, 1.0)));
		column.set(3, Some(Block::solid(10.0, 5.0, 1.0)));
		assert_eq!(column.height(), 4);

		column.set(3, None);
		assert_eq!(column.height(), 1, "trailing air above the highest block must be trimmed");
	}

	#[test]
	fn get_on_gap_is_air() {
		let mut column = Column::new();
		column.set(2, Some(Block::solid(1.0, 1.0, 1.0)));
		assert!(column.get(0).is_none());
		assert!(column.get(1).is_none());
		assert!(column.get(2).is_some());
	}
}
