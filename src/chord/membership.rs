use rand::Rng;
use tracing::{debug, error, info, instrument, warn};

use super::ChordNode;
use crate::{
	adaptor::RemotePeer,
	chord_id::Identifier,
	config::JoinStrategy,
	error::{Error, Result},
	finger_table::FingerTable,
	ChordAddress,
};


impl<A: ChordAddress> ChordNode<A>{

	/// Enter the ring through `entry`, or create a new ring when there is none.
	#[instrument(skip(self), fields(node = self.id()))]
	pub(crate) async fn join(&self, entry: Option<Identifier>) -> Result<()> {
		let id = self.id();
		let entry = match entry {
			Some(entry) if entry != id => entry,
			_ => {
				info!("Node {} is the first member of the ring", id);
				let mut state = self.inner.state.lock().await;
				state.fingers = FingerTable::alone(id, self.space());
				state.set_successor(id);
				return Ok(());
			},
		};

		let entry = self.peer(entry).await?;
		match self.config().strategy {
			JoinStrategy::Eager => {
				self.init_finger_table(entry.as_ref()).await?;
				self.update_others().await?;
				self.transfer_keys().await?;
			},
			JoinStrategy::Lazy => {
				let successor = entry.find_successor(id).await?;
				self.inner.state.lock().await.set_successor(successor);
			},
		}
		info!("Node {} joined with successor {:?}", id, self.successor_id().await);
		Ok(())
	}

	/// Resolve every finger through the entry node and splice in between the
	/// successor and its old predecessor.
	async fn init_finger_table(&self, entry: &dyn RemotePeer) -> Result<()> {
		let id = self.id();
		let space = self.space();
		let bits = space.bits() as usize;

		let successor = entry.find_successor(space.finger_start(id, 1)).await?;
		let successor_peer = self.peer(successor).await?;
		let predecessor = successor_peer.predecessor().await?.filter(|p| *p != id);
		successor_peer.set_predecessor(Some(id)).await?;
		{
			let mut state = self.inner.state.lock().await;
			state.set_successor(successor);
			state.fingers.set_predecessor(predecessor.or(Some(successor)));
		}

		for index in 1..bits {
			let start = space.finger_start(id, index + 1);
			let (current, predecessor) = {
				let state = self.inner.state.lock().await;
				(state.fingers.finger(index).unwrap_or(successor), state.predecessor().unwrap_or(successor))
			};
			let resolved = if space.in_between(start, id, current) {
				current
			} else if space.in_open_closed(start, predecessor, id) {
				// Nobody else knows about us yet, so the entry node cannot answer this one
				id
			} else {
				entry.find_successor(start).await?
			};
			let mut state = self.inner.state.lock().await;
			state.fingers.set(index + 1, Some(resolved));
			state.remember(resolved);
		}
		debug!("Node {} initial fingers:\n{}", id, self.finger_table().await);
		Ok(())
	}

	/// Push this node into the finger tables of everyone that should now point to it.
	async fn update_others(&self) -> Result<()> {
		let id = self.id();
		let space = self.space();
		for index in 1..=space.bits() as usize {
			let target = space.add(space.sub(id, 1u64 << (index - 1)), 1);
			let predecessor = self.find_predecessor(target).await?;
			if predecessor == id {
				continue;
			}
			self.peer(predecessor).await?.update_finger_table(id, index).await?;
		}
		Ok(())
	}

	/// Take `candidate` as finger `index` if it is a closer fit than the
	/// current entry, then pass the update back to our predecessor.
	#[instrument(skip(self), fields(node = self.id()))]
	pub(crate) async fn update_finger_table(&self, candidate: Identifier, index: usize) -> Result<()> {
		let id = self.id();
		let space = self.space();
		if candidate == id {
			return Ok(());
		}
		if index == 0 || index > space.bits() as usize {
			return Err(Error::Protocol(format!("finger index {index} out of range")));
		}

		let forward = {
			let mut state = self.inner.state.lock().await;
			let start = space.finger_start(id, index);
			let accept = match state.fingers.finger(index) {
				None => true,
				Some(current) => space.in_open(candidate, id, current) && space.in_open_closed(start, id, candidate),
			};
			if !accept {
				return Ok(());
			}
			if index == 1 {
				state.set_successor(candidate);
			} else {
				state.fingers.set(index, Some(candidate));
				state.remember(candidate);
			}
			state.predecessor()
		};

		match forward {
			Some(predecessor) if predecessor != id && predecessor != candidate => {
				let result = match self.peer(predecessor).await {
					Ok(peer) => peer.update_finger_table(candidate, index).await,
					Err(e) => Err(e),
				};
				if let Err(e) = result {
					warn!("could not pass finger {} = {} on to {}: {}", index, candidate, predecessor, e);
				}
			},
			_ => {},
		}
		Ok(())
	}

	/// One round of lazy maintenance: drop a dead predecessor, confirm the
	/// successor, adopt anyone that joined in between, notify the successor,
	/// pull any keys we now own and pass on those we no longer do.
	#[instrument(skip(self), fields(node = self.id()))]
	pub async fn stabilize(&self) -> Result<()> {
		let id = self.id();
		let space = self.space();
		self.check_predecessor().await;

		let mut successor = self.find_successor(self.successor_or_self().await).await?;
		let between = if successor == id {
			self.predecessor_id().await
		} else {
			self.peer(successor).await?.predecessor().await?
		};
		if let Some(candidate) = between {
			if candidate != id && space.in_open(candidate, id, successor) && self.ping(candidate).await.is_ok() {
				debug!("Node {} adopting {} as successor", id, candidate);
				successor = candidate;
			}
		}
		self.inner.state.lock().await.set_successor(successor);
		if successor == id {
			return Ok(());
		}

		let peer = self.peer(successor).await?;
		let backups = peer.successor_list().await?;
		{
			let mut state = self.inner.state.lock().await;
			for backup in backups {
				state.remember(backup);
			}
		}
		peer.notify(id).await?;
		self.transfer_keys().await?;
		self.hand_on_misplaced().await
	}

	/// Clear the predecessor if it stopped answering.
	pub(crate) async fn check_predecessor(&self) {
		let predecessor = match self.predecessor_id().await {
			Some(predecessor) if predecessor != self.id() => predecessor,
			_ => return,
		};
		match self.ping(predecessor).await {
			Err(e) if e.is_unreachable() => {
				warn!("Node {} lost its predecessor {}", self.id(), predecessor);
				let mut state = self.inner.state.lock().await;
				if state.predecessor() == Some(predecessor) {
					state.fingers.set_predecessor(None);
				}
			},
			_ => {},
		}
	}

	/// `candidate` thinks it might be our predecessor.
	#[instrument(skip(self), fields(node = self.id()))]
	pub(crate) async fn notify(&self, candidate: Identifier) -> Result<()> {
		let id = self.id();
		let space = self.space();
		let adopted = {
			let mut state = self.inner.state.lock().await;
			let accept = match state.predecessor() {
				None => true,
				Some(predecessor) => space.in_open(candidate, predecessor, id),
			};
			if accept {
				state.fingers.set_predecessor(Some(candidate));
			}
			accept
		};

		if adopted && candidate != id {
			info!("Node {} adopted {} as predecessor", id, candidate);
			let result = match self.peer(candidate).await {
				Ok(peer) => peer.transfer_keys().await,
				Err(e) => Err(e),
			};
			if let Err(e) = result {
				warn!("new predecessor {} failed to pull its keys: {}", candidate, e);
			}
		}
		Ok(())
	}

	/// Refresh one random finger in 2..=m. Finger 1 belongs to stabilize.
	pub async fn fix_fingers(&self) -> Result<()> {
		let bits = self.space().bits() as usize;
		if bits < 2 {
			return Ok(());
		}
		let index = rand::thread_rng().gen_range(2..=bits);
		self.fix_finger(index).await
	}

	/// Refresh finger `index` by resolving its start.
	pub async fn fix_finger(&self, index: usize) -> Result<()> {
		let start = self.space().finger_start(self.id(), index);
		let successor = self.find_successor(start).await?;
		let mut state = self.inner.state.lock().await;
		state.fingers.set(index, Some(successor));
		state.remember(successor);
		Ok(())
	}

	/// Leave the ring. Every step is best effort: failures are logged and
	/// the node still deregisters and stops answering.
	#[instrument(skip(self), fields(node = self.id()))]
	pub async fn leave(&self) {
		let id = self.id();
		info!("Node {} leaving the ring", id);
		self.inner.running.send_replace(false);

		if let Err(e) = self.hand_over().await {
			let e = Error::LeaveFailure(e.to_string());
			error!("Node {}: {}", id, e);
		}
		if let Err(e) = self.inner.directory.unregister(id).await {
			let e = Error::LeaveFailure(e.to_string());
			error!("Node {}: {}", id, e);
		}
		self.inner.adaptor.shutdown().await;
		info!("Node {} left", id);
	}

	/// Splice our neighbours together and give the successor our keys.
	async fn hand_over(&self) -> Result<()> {
		let id = self.id();
		let (predecessor, successor, values) = {
			let state = self.inner.state.lock().await;
			(state.predecessor().filter(|p| *p != id), state.successor_or_self(), state.store.clone())
		};
		if successor == id {
			debug!("Node {} was alone, nothing to hand over", id);
			return Ok(());
		}

		let successor_peer = self.peer(successor).await?;
		// Unknown predecessor: let the successor cover our range until someone notifies it
		successor_peer.set_predecessor(Some(predecessor.unwrap_or(successor))).await?;
		if let Some(predecessor) = predecessor {
			self.peer(predecessor).await?.set_successor(successor).await?;
		}

		let count = values.len();
		successor_peer.update_values(values).await?;
		self.inner.state.lock().await.store.clear();
		info!("Node {} handed {} keys to {}", id, count, successor);

		if self.config().strategy == JoinStrategy::Eager {
			self.announce_departure(successor).await;
		}
		Ok(())
	}

	/// Tell every node that may hold us as a finger to point at `replacement` instead.
	async fn announce_departure(&self, replacement: Identifier) {
		let id = self.id();
		let space = self.space();
		let mut told = Vec::new();
		for index in 1..=space.bits() as usize {
			let target = space.add(space.sub(id, 1u64 << (index - 1)), 1);
			let holder = match self.find_predecessor(target).await {
				Ok(holder) if holder == id => match self.predecessor_id().await {
					Some(predecessor) => predecessor,
					None => continue,
				},
				Ok(holder) => holder,
				Err(e) => {
					warn!("could not find holders of finger {}: {}", index, e);
					continue;
				},
			};
			if holder == id || told.contains(&holder) {
				continue;
			}
			told.push(holder);
			let result = match self.peer(holder).await {
				Ok(peer) => peer.update_leaving_node(id, replacement).await,
				Err(e) => Err(e),
			};
			if let Err(e) = result {
				warn!("could not tell {} about departure: {}", holder, e);
			}
		}
	}

	/// `leaving` is gone and `replacement` took over its range. Repoint our
	/// fingers and pass the news back while it still changes something.
	#[instrument(skip(self), fields(node = self.id()))]
	pub(crate) async fn update_leaving_node(&self, leaving: Identifier, replacement: Identifier) -> Result<()> {
		let id = self.id();
		if leaving == id {
			return Ok(());
		}
		let forward = {
			let mut state = self.inner.state.lock().await;
			let was_successor = state.successor() == Some(leaving);
			let changed = state.fingers.replace(leaving, replacement);
			state.successors.remove(leaving);
			if was_successor {
				state.set_successor(replacement);
			}
			if state.predecessor() == Some(leaving) {
				state.fingers.set_predecessor(None);
			}
			if changed == 0 {
				return Ok(());
			}
			debug!("Node {} repointed {} fingers from {} to {}", id, changed, leaving, replacement);
			state.predecessor()
		};

		if let Some(predecessor) = forward.filter(|p| *p != id && *p != leaving) {
			let result = match self.peer(predecessor).await {
				Ok(peer) => peer.update_leaving_node(leaving, replacement).await,
				Err(e) => Err(e),
			};
			if let Err(e) = result {
				warn!("could not pass departure of {} on to {}: {}", leaving, predecessor, e);
			}
		}
		Ok(())
	}
}
