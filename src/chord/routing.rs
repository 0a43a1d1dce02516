use tracing::{debug, error, instrument, warn};

use super::ChordNode;
use crate::{
	chord_id::Identifier,
	error::{Error, Result},
	ChordAddress,
};


impl<A: ChordAddress> ChordNode<A>{

	/// Finger of this node that most closely precedes key, or this node.
	pub(crate) async fn closest_preceding_finger(&self, key: Identifier) -> Identifier {
		self.inner.state.lock().await.fingers.closest_preceding(key)
	}

	/// The node responsible for key.
	///
	/// Dead peers met on the way are routed around through the successor
	/// list. If the answer itself turns out unreachable, the best live
	/// guess is returned instead.
	#[instrument(skip(self), fields(node = self.id()))]
	pub async fn find_successor(&self, key: Identifier) -> Result<Identifier> {
		let (predecessor, successor) = self.walk(key).await?;
		if successor == self.id() {
			return Ok(successor);
		}
		match self.ping(successor).await {
			Ok(()) => Ok(successor),
			Err(e) if e.is_unreachable() => {
				if predecessor == self.id() {
					warn!("successor {} unreachable, promoting a backup", successor);
					self.forget_peer(successor).await;
					Ok(self.successor_or_self().await)
				} else {
					warn!("{} unreachable, looking past it from {}", successor, predecessor);
					self.successor_beyond(predecessor, successor, key).await
				}
			},
			Err(e) => Err(e),
		}
	}

	/// Best live answer for key when `predecessor` is alive but its successor
	/// `dead` is not: the first live entry of its successor list, or the node
	/// just before that if it also covers key. Falls back to `predecessor`.
	async fn successor_beyond(&self, predecessor: Identifier, dead: Identifier, key: Identifier) -> Result<Identifier> {
		let space = self.space();
		let mut list = match self.successor_list_of(predecessor).await {
			Ok(list) => list,
			Err(e) if e.is_unreachable() => return Ok(predecessor),
			Err(e) => return Err(e),
		};
		list.push(self.id());

		for candidate in list.into_iter().filter(|id| *id != dead) {
			if self.ping(candidate).await.is_err() {
				continue;
			}
			let before = match self.predecessor_of(candidate).await {
				Ok(before) => before,
				Err(_) => return Ok(candidate),
			};
			if let Some(before) = before {
				if before != dead
					&& space.in_open(before, predecessor, candidate)
					&& space.in_open_closed(key, predecessor, before)
					&& self.ping(before).await.is_ok()
				{
					return Ok(before);
				}
			}
			return Ok(candidate);
		}
		Ok(predecessor)
	}

	/// The live node whose (self, successor] interval contains key.
	#[instrument(skip(self), fields(node = self.id()))]
	pub async fn find_predecessor(&self, key: Identifier) -> Result<Identifier> {
		Ok(self.walk(key).await?.0)
	}

	/// Walk the ring towards key. Returns the predecessor of key along with
	/// the successor it reported.
	async fn walk(&self, key: Identifier) -> Result<(Identifier, Identifier)> {
		let id = self.id();
		let space = self.space();
		let mut current = id;
		let mut current_successor = self.successor_or_self().await;
		let mut dead = Vec::new();
		let mut hops = 0;

		while !space.in_open_closed(key, current, current_successor) {
			hops += 1;
			if hops > self.config().max_hops {
				error!("routing for key {} gave up after {} hops at {}", key, hops, current);
				return Err(Error::RoutingCycleDetected { key, hops });
			}

			let next = match self.closest_finger_of(current, key).await {
				Ok(next) => next,
				Err(e) if e.is_unreachable() => {
					// current died after answering; restart from here
					remember_dead(&mut dead, current);
					(current, current_successor) = self.detour_local(current, key, &mut dead).await?;
					continue;
				},
				Err(e) => return Err(e),
			};
			if next == current {
				warn!("no finger of {} precedes key {}, stopping early", current, key);
				break;
			}
			if dead.contains(&next) {
				(current, current_successor) = self.route_around(current, next, key, &mut dead).await?;
				continue;
			}

			match self.successor_of(next).await {
				Ok(successor) => {
					current = next;
					current_successor = successor;
				},
				Err(e) if e.is_unreachable() => {
					(current, current_successor) = self.route_around(current, next, key, &mut dead).await?;
				},
				Err(e) => return Err(e),
			}
		}
		debug!("predecessor of {} is {} after {} hops", key, current, hops);
		Ok((current, current_successor))
	}

	/// `unreachable` was the next hop from `current`. Pick another hop out of
	/// the successor list of `current`, or of this node if that fails.
	async fn route_around(&self, current: Identifier, unreachable: Identifier, key: Identifier, dead: &mut Vec<Identifier>) -> Result<(Identifier, Identifier)> {
		warn!("{} unreachable while routing key {}, falling back to successor lists", unreachable, key);
		remember_dead(dead, unreachable);
		if current != self.id() {
			if let Some(hop) = self.detour_via(current, key, dead).await? {
				return Ok(hop);
			}
		}
		self.detour_local(unreachable, key, dead).await
	}

	/// Skip over dead nodes using the successor list held by a remote node.
	async fn detour_via(&self, current: Identifier, key: Identifier, dead: &mut Vec<Identifier>) -> Result<Option<(Identifier, Identifier)>> {
		let space = self.space();
		let list = match self.successor_list_of(current).await {
			Ok(list) => list,
			Err(e) if e.is_unreachable() => {
				remember_dead(dead, current);
				return Ok(None);
			},
			Err(e) => return Err(e),
		};
		let mut live: Vec<Identifier> = list.into_iter().filter(|id| !dead.contains(id)).collect();
		// Past the end of any list the ring comes back around to us
		if !live.contains(&self.id()) {
			live.push(self.id());
		}

		// With the dead removed, current may already be the predecessor
		if let Some(&first) = live.first() {
			if space.in_open_closed(key, current, first) {
				return Ok(Some((current, first)));
			}
		}
		for &candidate in live.iter().rev() {
			if !space.in_open(candidate, current, key) {
				continue;
			}
			match self.successor_of(candidate).await {
				Ok(successor) => return Ok(Some((candidate, successor))),
				Err(e) if e.is_unreachable() => remember_dead(dead, candidate),
				Err(e) => return Err(e),
			}
		}
		Ok(None)
	}

	/// Forget the dead, then restart from the furthest live entry of our own
	/// successor list that lies between this node and `unreachable`. With
	/// none, restart from this node.
	async fn detour_local(&self, unreachable: Identifier, key: Identifier, dead: &mut Vec<Identifier>) -> Result<(Identifier, Identifier)> {
		let candidates = {
			let mut state = self.inner.state.lock().await;
			for peer in dead.iter() {
				state.forget(*peer);
			}
			state.successors.preceding(unreachable)
		};
		for candidate in candidates {
			match self.successor_of(candidate).await {
				Ok(successor) => return Ok((candidate, successor)),
				Err(e) if e.is_unreachable() => {
					remember_dead(dead, candidate);
					self.forget_peer(candidate).await;
				},
				Err(e) => return Err(e),
			}
		}

		let state = self.inner.state.lock().await;
		if state.successors.is_empty() {
			error!("successor list of {} exhausted while routing key {}", self.id(), key);
			return Err(Error::NoReachableSuccessor(key));
		}
		Ok((self.id(), state.successor_or_self()))
	}

	async fn closest_finger_of(&self, id: Identifier, key: Identifier) -> Result<Identifier> {
		if id == self.id() {
			return Ok(self.closest_preceding_finger(key).await);
		}
		self.peer(id).await?.closest_preceding_finger(key).await
	}

	/// Successor of a node; a node that knows none is its own.
	pub(crate) async fn successor_of(&self, id: Identifier) -> Result<Identifier> {
		if id == self.id() {
			return Ok(self.successor_or_self().await);
		}
		Ok(self.peer(id).await?.successor().await?.unwrap_or(id))
	}

	async fn predecessor_of(&self, id: Identifier) -> Result<Option<Identifier>> {
		if id == self.id() {
			return Ok(self.predecessor_id().await);
		}
		self.peer(id).await?.predecessor().await
	}

	async fn successor_list_of(&self, id: Identifier) -> Result<Vec<Identifier>> {
		if id == self.id() {
			return Ok(self.successors().await);
		}
		self.peer(id).await?.successor_list().await
	}

	/// Check that a node answers, and answers as itself.
	pub(crate) async fn ping(&self, id: Identifier) -> Result<()> {
		if id == self.id() {
			return Ok(());
		}
		let answered = self.peer(id).await?.id().await?;
		if answered != id {
			warn!("{} answered as {}", id, answered);
			return Err(Error::PeerUnreachable(id));
		}
		Ok(())
	}

	/// Drop a dead node from the successor list, fingers and predecessor.
	pub async fn forget_peer(&self, dead: Identifier) {
		if dead == self.id() {
			return;
		}
		debug!("{} forgetting {}", self.id(), dead);
		self.inner.state.lock().await.forget(dead);
	}
}

fn remember_dead(dead: &mut Vec<Identifier>, id: Identifier) {
	if !dead.contains(&id) {
		dead.push(id);
	}
}
