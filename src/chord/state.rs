use std::collections::BTreeMap;

use crate::{
	chord_id::{Identifier, RingSpace},
	finger_table::FingerTable,
	successor::SuccessorList,
	Value,
};


/// Everything about a node that changes while it is part of the ring.
/// A node keeps exactly one of these behind one lock so a multi-step update
/// is never observed half done.
#[derive(Debug)]
pub(crate) struct NodeState{
	pub node: Identifier,
	pub space: RingSpace,
	pub fingers: FingerTable,
	pub successors: SuccessorList,
	pub store: BTreeMap<Identifier, Value>,
}

impl NodeState {

	pub fn new(node: Identifier, space: RingSpace) -> Self {
		NodeState {
			node,
			space,
			fingers: FingerTable::new(node, space),
			successors: SuccessorList::new(node, space),
			store: BTreeMap::new(),
		}
	}

	pub fn successor(&self) -> Option<Identifier> {
		self.fingers.successor()
	}

	/// The successor, or this node if none is known yet.
	pub fn successor_or_self(&self) -> Identifier {
		self.successor().unwrap_or(self.node)
	}

	pub fn predecessor(&self) -> Option<Identifier> {
		self.fingers.predecessor()
	}

	/// Set finger 1 and keep the successor list headed by it.
	pub fn set_successor(&mut self, successor: Identifier) {
		self.fingers.set(1, Some(successor));
		if successor == self.node {
			self.successors = SuccessorList::new(self.node, self.space);
		} else {
			self.successors.promote(successor);
		}
	}

	/// Keep a node as a backup successor, unless it would sit in front of the current successor.
	pub fn remember(&mut self, id: Identifier) {
		let successor = match self.successor() {
			Some(successor) if successor != self.node => successor,
			_ => return,
		};
		if self.space.distance(self.node, id) > self.space.distance(self.node, successor) {
			self.successors.insert(id);
		}
	}

	/// Drop every reference to a node that stopped answering.
	/// A dead successor is replaced by the first backup, else the nearest
	/// other finger, else the predecessor, else the node itself.
	pub fn forget(&mut self, dead: Identifier) {
		let was_successor = self.successor() == Some(dead);
		self.successors.remove(dead);
		self.fingers.remove(dead);
		if self.predecessor() == Some(dead) {
			self.fingers.set_predecessor(None);
		}
		if !was_successor {
			return;
		}
		match self.successors.first() {
			Some(next) => self.fingers.set(1, Some(next)),
			None => {
				let node = self.node;
				let next = (2..=self.fingers.bits())
					.filter_map(|index| self.fingers.finger(index))
					.chain(self.predecessor())
					.find(|id| *id != node && *id != dead)
					.unwrap_or(node);
				self.set_successor(next);
			},
		}
	}

	/// Whether this node is responsible for key, i.e. key is in (predecessor, self].
	/// Without a predecessor a node only claims keys while it is alone.
	pub fn owns(&self, key: Identifier) -> bool {
		match self.predecessor() {
			Some(predecessor) => self.space.in_open_closed(key, predecessor, self.node),
			None => self.successor_or_self() == self.node,
		}
	}
}


#[cfg(test)]
mod tests {
	use super::*;

	fn state(node: Identifier) -> NodeState {
		NodeState::new(node, RingSpace::new(3).unwrap())
	}

	#[test]
	fn successor_list_follows_finger_one() {
		let mut state = state(0);
		state.set_successor(5);
		state.remember(6);
		state.remember(3);
		assert_eq!(state.successors.list(), &[5, 6]);
		state.set_successor(3);
		assert_eq!(state.successors.first(), state.successor());
		assert_eq!(state.successors.list(), &[3, 5, 6]);
	}

	#[test]
	fn forgetting_successor_promotes_backup() {
		let mut state = state(0);
		state.set_successor(2);
		state.remember(5);
		state.fingers.set(2, Some(2));
		state.fingers.set(3, Some(5));
		state.fingers.set_predecessor(Some(5));
		state.forget(2);
		assert_eq!(state.successor(), Some(5));
		assert_eq!(state.fingers.finger(2), Some(5));
		state.forget(5);
		assert_eq!(state.successor(), Some(0));
		assert_eq!(state.predecessor(), None);
		assert!(state.successors.is_empty());
	}

	#[test]
	fn without_backups_the_predecessor_takes_over() {
		let mut state = state(3);
		state.set_successor(5);
		state.fingers.set(2, Some(5));
		state.fingers.set(3, Some(3));
		state.fingers.set_predecessor(Some(6));
		state.forget(5);
		assert_eq!(state.successor(), Some(6));
		assert_eq!(state.successors.list(), &[6]);
		assert_eq!(state.predecessor(), Some(6));
	}

	#[test]
	fn ownership_is_predecessor_exclusive_self_inclusive() {
		let mut state = state(5);
		state.set_successor(1);
		assert!(!state.owns(3));
		state.fingers.set_predecessor(Some(1));
		assert!(state.owns(5));
		assert!(state.owns(2));
		assert!(!state.owns(1));
		assert!(!state.owns(6));
	}
}
