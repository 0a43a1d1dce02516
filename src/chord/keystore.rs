use tracing::{debug, error, info, instrument};

use super::ChordNode;
use crate::{
	adaptor::KeyRange,
	chord_id::Identifier,
	error::{Error, Result},
	ChordAddress, Value,
};


impl<A: ChordAddress> ChordNode<A>{

	/// Store a value in the ring. Without a key the value's hash is used.
	/// Returns the key the value was stored under.
	pub async fn insert(&self, value: Value, key: Option<Identifier>) -> Result<Identifier> {
		let key = match key {
			Some(key) => self.space().reduce(key),
			None => self.space().hash_bytes(&value),
		};
		self.store_routed(key, value, 0).await?;
		Ok(key)
	}

	/// Fetch the value stored under key.
	pub async fn lookup(&self, key: Identifier) -> Result<Value> {
		self.lookup_routed(self.space().reduce(key), 0).await
	}

	/// Fetch a value by hashing `data` the way [ChordNode::insert] hashes values.
	pub async fn lookup_value(&self, data: &[u8]) -> Result<Value> {
		self.lookup_routed(self.space().hash_bytes(data), 0).await
	}

	#[instrument(skip(self, value), fields(node = self.id()))]
	pub(crate) async fn store_routed(&self, key: Identifier, value: Value, hops: u32) -> Result<()> {
		self.check_hops(key, hops)?;
		let owner = self.find_successor(key).await.map_err(|e| unreachable_as_lost(e, key))?;
		if owner == self.id() {
			debug!("storing key {} locally", key);
			self.inner.state.lock().await.store.insert(key, value);
			return Ok(());
		}
		let peer = self.peer(owner).await.map_err(|e| unreachable_as_lost(e, key))?;
		peer.insert(key, value, hops + 1).await.map_err(|e| unreachable_as_lost(e, key))
	}

	#[instrument(skip(self), fields(node = self.id()))]
	pub(crate) async fn lookup_routed(&self, key: Identifier, hops: u32) -> Result<Value> {
		self.check_hops(key, hops)?;
		{
			let state = self.inner.state.lock().await;
			if state.owns(key) {
				return state.store.get(&key).cloned().ok_or(Error::KeyNotFound(key));
			}
		}
		let owner = self.find_successor(key).await.map_err(|e| unreachable_as_lost(e, key))?;
		if owner == self.id() {
			return self.inner.state.lock().await.store.get(&key).cloned().ok_or(Error::KeyNotFound(key));
		}
		let peer = self.peer(owner).await.map_err(|e| unreachable_as_lost(e, key))?;
		peer.lookup(key, hops + 1).await.map_err(|e| unreachable_as_lost(e, key))
	}

	fn check_hops(&self, key: Identifier, hops: u32) -> Result<()> {
		if hops > self.config().max_hops {
			error!("request for key {} forwarded {} times", key, hops);
			return Err(Error::RoutingCycleDetected { key, hops });
		}
		Ok(())
	}

	/// Pull the keys in (predecessor, self] from whoever holds them now.
	#[instrument(skip(self), fields(node = self.id()))]
	pub(crate) async fn transfer_keys(&self) -> Result<()> {
		let id = self.id();
		let (configured, predecessor) = {
			let state = self.inner.state.lock().await;
			(state.successor_or_self(), state.predecessor())
		};
		let predecessor = match predecessor {
			Some(predecessor) => predecessor,
			None => {
				debug!("no predecessor yet, nothing to pull");
				return Ok(());
			},
		};
		if configured == id {
			return Ok(());
		}

		// The configured pointer may be stale
		let successor = self.find_successor(configured).await?;
		if successor == id {
			return Ok(());
		}
		let moved = self.peer(successor).await?.pop_keys(self.space().add(predecessor, 1), id).await?;
		if moved.is_empty() {
			return Ok(());
		}

		info!("Node {} pulled {} keys from {}", id, moved.len(), successor);
		let keys: Vec<Identifier> = moved.keys().copied().collect();
		self.inner.state.lock().await.store.extend(moved);
		self.notify_listeners(keys);
		Ok(())
	}

	/// Route on every stored key outside (predecessor, self]. These are keys
	/// taken in while this node still saw a smaller ring. A key that cannot be
	/// placed yet stays here for the next round.
	#[instrument(skip(self), fields(node = self.id()))]
	pub(crate) async fn hand_on_misplaced(&self) -> Result<()> {
		let id = self.id();
		let misplaced: KeyRange = {
			let mut state = self.inner.state.lock().await;
			if state.predecessor().is_none() {
				return Ok(());
			}
			let keys: Vec<Identifier> = state.store
				.keys()
				.copied()
				.filter(|key| !state.owns(*key))
				.collect();
			keys.into_iter()
				.filter_map(|key| state.store.remove(&key).map(|value| (key, value)))
				.collect()
		};
		if misplaced.is_empty() {
			return Ok(());
		}

		let mut moved = Vec::new();
		let mut kept = KeyRange::new();
		let mut failure = None;
		for (key, value) in misplaced {
			match self.send_to_owner(key, value.clone()).await {
				Ok(true) => moved.push(key),
				Ok(false) => {
					kept.insert(key, value);
				},
				Err(e) => {
					debug!("could not hand on key {} yet: {}", key, e);
					kept.insert(key, value);
					failure = Some(e);
				},
			}
		}
		if !kept.is_empty() {
			self.inner.state.lock().await.store.extend(kept);
		}
		if !moved.is_empty() {
			info!("Node {} handed on {} misplaced keys", id, moved.len());
			self.notify_listeners(moved);
		}
		match failure {
			Some(e) => Err(e),
			None => Ok(()),
		}
	}

	/// Store a key at the node now responsible for it. False if that is still us.
	async fn send_to_owner(&self, key: Identifier, value: Value) -> Result<bool> {
		let owner = self.find_successor(key).await?;
		if owner == self.id() {
			return Ok(false);
		}
		self.peer(owner).await?.insert(key, value, 1).await?;
		Ok(true)
	}

	/// Remove and return every key in the closed interval [lower, upper].
	#[instrument(skip(self), fields(node = self.id()))]
	pub(crate) async fn pop_keys(&self, lower: Identifier, upper: Identifier) -> KeyRange {
		let space = self.space();
		let moved: KeyRange = {
			let mut state = self.inner.state.lock().await;
			let keys: Vec<Identifier> = state.store
				.keys()
				.filter(|key| space.in_between(**key, lower, space.add(upper, 1)))
				.copied()
				.collect();
			keys.into_iter()
				.filter_map(|key| state.store.remove(&key).map(|value| (key, value)))
				.collect()
		};
		if !moved.is_empty() {
			debug!("popped {} keys in [{}, {}]", moved.len(), lower, upper);
			self.notify_listeners(moved.keys().copied().collect());
		}
		moved
	}

	/// Merge pushed values, keeping only the keys this node is responsible for.
	pub(crate) async fn update_values(&self, values: KeyRange) {
		let accepted: Vec<Identifier> = {
			let mut state = self.inner.state.lock().await;
			let mut accepted = Vec::new();
			for (key, value) in values {
				if state.owns(key) {
					state.store.insert(key, value);
					accepted.push(key);
				} else {
					debug!("dropping pushed key {} outside our range", key);
				}
			}
			accepted
		};
		if !accepted.is_empty() {
			self.notify_listeners(accepted);
		}
	}

	/// Tell relocation listeners about moved keys from a separate task.
	fn notify_listeners(&self, keys: Vec<Identifier>) {
		let node = self.clone();
		tokio::spawn(async move {
			let listeners = node.inner.listeners.read().await.clone();
			for listener in listeners {
				listener.keys_relocated(keys.clone());
			}
		});
	}
}

/// Callers of insert and lookup never see a raw transport failure.
fn unreachable_as_lost(error: Error, key: Identifier) -> Error {
	if error.is_unreachable() {
		Error::NoReachableSuccessor(key)
	} else {
		error
	}
}
