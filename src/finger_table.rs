use std::fmt;

use serde::{Serialize, Deserialize};

use crate::chord_id::{Identifier, RingSpace};

/// One row of a [FingerTable].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerEntry{
	pub start: Identifier,
	pub end: Identifier,
	pub successor: Option<Identifier>,
}

/// Routing table of m+1 entries. Index 0 holds the predecessor, index i in
/// 1..=m the first node at or after `node + 2^(i-1)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerTable{
	node: Identifier,
	space: RingSpace,
	entries: Vec<FingerEntry>,
}

impl FingerTable{

	/// A table with every successor unset.
	pub fn new(node: Identifier, space: RingSpace) -> Self {
		let bits = space.bits() as usize;
		let mut entries = Vec::with_capacity(bits + 1);
		entries.push(FingerEntry{ start: node, end: node, successor: None });
		for index in 1..=bits {
			entries.push(FingerEntry{
				start: space.finger_start(node, index),
				end: space.finger_end(node, index),
				successor: None,
			});
		}
		FingerTable{ node, space, entries }
	}

	/// A table for the only member of a ring, where every entry is the node itself.
	pub fn alone(node: Identifier, space: RingSpace) -> Self {
		let mut table = Self::new(node, space);
		for entry in table.entries.iter_mut() {
			entry.successor = Some(node);
		}
		table
	}

	/// Number of finger entries, m (the predecessor slot is not counted).
	pub fn bits(&self) -> usize {
		self.entries.len() - 1
	}

	pub fn get(&self, index: usize) -> Option<&FingerEntry> {
		self.entries.get(index)
	}

	pub fn start(&self, index: usize) -> Option<Identifier> {
		self.entries.get(index).map(|e| e.start)
	}

	pub fn finger(&self, index: usize) -> Option<Identifier> {
		self.entries.get(index).and_then(|e| e.successor)
	}

	pub fn set(&mut self, index: usize, successor: Option<Identifier>) {
		match self.entries.get_mut(index) {
			Some(entry) => {
				tracing::trace!("set finger {} of {} to {:?}", index, self.node, successor);
				entry.successor = successor;
			},
			None => tracing::error!("finger index {} out of range for {} bits", index, self.bits()),
		}
	}

	pub fn predecessor(&self) -> Option<Identifier> {
		self.finger(0)
	}

	pub fn set_predecessor(&mut self, predecessor: Option<Identifier>) {
		self.set(0, predecessor);
	}

	/// Finger 1, the immediate successor.
	pub fn successor(&self) -> Option<Identifier> {
		self.finger(1)
	}

	/// Scan fingers from m down to 1 for the first one strictly between this node and key.
	pub fn closest_preceding(&self, key: Identifier) -> Identifier {
		for entry in self.entries.iter().skip(1).rev() {
			if let Some(successor) = entry.successor {
				if self.space.in_open(successor, self.node, key) {
					return successor;
				}
			}
		}
		self.node
	}

	/// Whether every finger 1..=m is filled in.
	pub fn is_complete(&self) -> bool {
		self.entries.iter().skip(1).all(|e| e.successor.is_some())
	}

	/// Repoint every finger 1..=m that names `old` at `new`. Returns how many changed.
	pub fn replace(&mut self, old: Identifier, new: Identifier) -> usize {
		let mut changed = 0;
		for entry in self.entries.iter_mut().skip(1) {
			if entry.successor == Some(old) {
				entry.successor = Some(new);
				changed += 1;
			}
		}
		changed
	}

	/// Drop a node from fingers 2..=m. Each run of entries naming it takes the
	/// value of the entry right after the run, or none if the run ends the table.
	/// Finger 1 and the predecessor are left to the caller.
	pub fn remove(&mut self, dead: Identifier) {
		let mut index = self.entries.len();
		let mut next = None;
		while index > 2 {
			index -= 1;
			let entry = &mut self.entries[index];
			if entry.successor == Some(dead) {
				entry.successor = next;
			} else {
				next = entry.successor;
			}
		}
	}

	/// Distinct nodes named by fingers 1..=m.
	pub fn nodes(&self) -> Vec<Identifier> {
		let mut nodes: Vec<Identifier> = self.entries.iter().skip(1).filter_map(|e| e.successor).collect();
		nodes.sort_unstable();
		nodes.dedup();
		nodes
	}

	pub fn iter(&self) -> impl Iterator<Item = &FingerEntry> {
		self.entries.iter()
	}
}

impl fmt::Display for FingerTable{
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		for (index, entry) in self.entries.iter().enumerate() {
			let successor = match entry.successor {
				Some(id) => id.to_string(),
				None => "-".to_string(),
			};
			if index == 0 {
				writeln!(f, "pred          {}", successor)?;
			} else {
				writeln!(f, "{:>3} {:>4} - {:<4} {}", index, entry.start, entry.end, successor)?;
			}
		}
		Ok(())
	}
}


#[cfg(test)]
mod test {
	use super::*;

	fn space() -> RingSpace {
		RingSpace::new(3).unwrap()
	}

	#[test]
	fn starts_follow_powers_of_two() {
		let table = FingerTable::new(1, space());
		assert_eq!(table.bits(), 3);
		assert_eq!(table.start(1), Some(2));
		assert_eq!(table.start(2), Some(3));
		assert_eq!(table.start(3), Some(5));
		assert_eq!(table.get(3).map(|e| e.end), Some(1));
		assert!(!table.is_complete());
		assert!(FingerTable::alone(1, space()).is_complete());
	}

	#[test]
	fn closest_preceding_scans_from_the_top() {
		let mut table = FingerTable::new(0, space());
		table.set(1, Some(1));
		table.set(2, Some(3));
		table.set(3, Some(6));
		assert_eq!(table.closest_preceding(7), 6);
		assert_eq!(table.closest_preceding(5), 3);
		assert_eq!(table.closest_preceding(2), 1);
		assert_eq!(table.closest_preceding(1), 0);
	}

	#[test]
	fn alone_node_is_its_own_closest_finger() {
		let table = FingerTable::alone(4, space());
		for key in 0..8 {
			assert_eq!(table.closest_preceding(key), 4);
		}
	}

	#[test]
	fn remove_takes_next_finger() {
		let mut table = FingerTable::new(0, space());
		table.set(1, Some(1));
		table.set(2, Some(3));
		table.set(3, Some(6));
		table.remove(3);
		assert_eq!(table.finger(2), Some(6));
		table.remove(6);
		assert_eq!(table.finger(2), None);
		assert_eq!(table.finger(3), None);
		assert_eq!(table.successor(), Some(1));
	}

	#[test]
	fn replace_counts_changes() {
		let mut table = FingerTable::new(0, space());
		table.set(1, Some(3));
		table.set(2, Some(3));
		table.set(3, Some(6));
		assert_eq!(table.replace(3, 6), 2);
		assert_eq!(table.nodes(), vec![6]);
		assert_eq!(table.replace(3, 6), 0);
	}
}
