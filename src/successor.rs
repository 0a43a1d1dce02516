//! Successor list for a chord node
use serde::{Serialize, Deserialize};

use crate::chord_id::{Identifier, RingSpace};

/// A sequence of successors for a node on the ring, kept in clockwise order
/// from the node. It is the fallback chain used when the immediate successor
/// or a finger target stops answering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessorList{
	node: Identifier,
	space: RingSpace,
	max: usize,
	successors: Vec<Identifier>,
}

impl SuccessorList{

	/// A list holding at most m entries.
	pub fn new(node: Identifier, space: RingSpace) -> Self {
		Self::with_capacity(node, space, space.bits() as usize)
	}

	pub fn with_capacity(node: Identifier, space: RingSpace, max: usize) -> Self {
		SuccessorList{
			node,
			space,
			max,
			successors: Vec::new(),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.successors.is_empty()
	}

	pub fn len(&self) -> usize {
		self.successors.len()
	}

	pub fn first(&self) -> Option<Identifier> {
		self.successors.first().copied()
	}

	pub fn contains(&self, id: Identifier) -> bool {
		self.successors.contains(&id)
	}

	pub fn list(&self) -> &[Identifier] {
		&self.successors
	}

	/// Insert a successor, keeping the list sorted, deduplicated and truncated.
	/// The node itself is never listed. Returns whether the id is in the list afterwards.
	pub fn insert(&mut self, id: Identifier) -> bool {
		if id == self.node {
			return false;
		}
		if !self.successors.contains(&id) {
			self.successors.push(id);
			let (node, space) = (self.node, self.space);
			self.successors.sort_by_key(|s| (space.distance(node, *s), *s));
			self.successors.truncate(self.max);
		}
		self.successors.contains(&id)
	}

	pub fn extend<I: IntoIterator<Item = Identifier>>(&mut self, ids: I) {
		for id in ids {
			self.insert(id);
		}
	}

	/// Make `id` the head of the list, dropping anything closer to the node.
	pub fn promote(&mut self, id: Identifier) {
		let distance = self.space.distance(self.node, id);
		let (node, space) = (self.node, self.space);
		self.successors.retain(|s| space.distance(node, *s) > distance);
		self.insert(id);
	}

	pub fn remove(&mut self, id: Identifier) -> bool {
		let before = self.successors.len();
		self.successors.retain(|s| *s != id);
		before != self.successors.len()
	}

	/// Entries strictly between the node and `bound`, furthest first.
	pub fn preceding(&self, bound: Identifier) -> Vec<Identifier> {
		self.successors
			.iter()
			.rev()
			.filter(|s| self.space.in_open(**s, self.node, bound))
			.copied()
			.collect()
	}
}
