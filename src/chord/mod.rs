use crate::{
	adaptor::{ChordAdaptor, KeyRange, RemotePeer},
	chord_id::{Identifier, RingSpace},
	config::{ChordConfig, JoinStrategy},
	directory::BootstrapDirectory,
	error::{Error, Result},
	finger_table::FingerTable,
	ChordAddress, Value,
};

use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant};
use tracing::{info, warn};


pub mod message;

mod state;
use state::NodeState;

mod routing;
mod membership;
mod keystore;


/// Observer of keys moving into or out of a node because of migration.
/// Called from a task of its own; it cannot hold up or fail the migration.
pub trait RelocationListener: Send + Sync + 'static {
	fn keys_relocated(&self, keys: Vec<Identifier>);
}


/// The Chord itself. This struct acts like a builder in that it is created
/// and modified before being consumed by the start method which then
/// returns another type, ChordHandle.
pub struct Chord<A: ChordAddress, ADAPTOR: ChordAdaptor<A>>{
	addr: A,
	id: Option<Identifier>,
	adaptor: ADAPTOR,
	directory: Arc<dyn BootstrapDirectory<A>>,
	config: ChordConfig,
	listeners: Vec<Arc<dyn RelocationListener>>,
}

impl<A: ChordAddress, ADAPTOR: ChordAdaptor<A>> Chord<A, ADAPTOR>{

	/// Creates a new Chord that will listen on `addr` and find its ring through `directory`.
	pub fn new(addr: A, adaptor: ADAPTOR, directory: Arc<dyn BootstrapDirectory<A>>) -> Self{
		Chord{
			addr,
			id: None,
			adaptor,
			directory,
			config: ChordConfig::default(),
			listeners: Vec::new(),
		}
	}

	/// Pin the node id instead of hashing the address. Only the first call
	/// has an effect; returns whether this one did.
	pub fn set_id(&mut self, id: Identifier) -> bool{
		if self.id.is_some() {
			return false;
		}
		self.id = Some(id);
		true
	}

	pub fn set_config(&mut self, config: ChordConfig){
		self.config = config;
	}

	/// Register a relocation listener before the node starts, so it also
	/// sees the keys pulled in while joining.
	pub fn add_listener(&mut self, listener: Arc<dyn RelocationListener>){
		self.listeners.push(listener);
	}

	/// Starts the node. This will take ownership of the Chord and return a ChordHandle.
	///
	/// The directory supplies the ring width and an entry node. With no entry
	/// node this node creates the ring, otherwise it joins through the entry
	/// node using the configured strategy.
	pub async fn start(self) -> Result<ChordHandle<A>> {
		self.config.validate()?;
		let space = RingSpace::new(self.directory.ring_bits().await?)?;
		let id = match self.id {
			Some(id) => space.reduce(id),
			None => space.hash(&self.addr)?,
		};
		if self.directory.address_of(id).await?.is_some() {
			return Err(Error::IdentifierTaken(id));
		}
		let entry = self.directory.entry_node().await?;

		let (running, _) = watch::channel(true);
		let node = ChordNode{
			inner: Arc::new(NodeInner{
				id,
				addr: self.addr.clone(),
				space,
				config: self.config,
				state: Mutex::new(NodeState::new(id, space)),
				listeners: RwLock::new(self.listeners),
				adaptor: Arc::new(self.adaptor),
				directory: self.directory,
				running,
			}),
		};

		// Start listener
		info!("Node {} listening on {:?}", id, self.addr);
		node.inner.adaptor.listen(self.addr.clone(), node.clone()).await?;
		if let Err(e) = node.inner.directory.register(id, self.addr).await {
			node.inner.adaptor.shutdown().await;
			return Err(e);
		}

		if let Err(e) = node.join(entry).await {
			warn!("Node {} failed to join through {:?}: {}", id, entry, e);
			node.halt().await;
			if let Err(e) = node.inner.directory.unregister(id).await {
				warn!("Node {} could not unregister after failed join: {}", id, e);
			}
			return Err(e);
		}

		// Start maintenance tasks
		let mut maintenance = Vec::new();
		if node.config().strategy == JoinStrategy::Lazy {
			let stabilizing = node.clone();
			maintenance.push(spawn_periodic(node.inner.running.subscribe(), node.config().stabilize_interval(), format!("Node {} stabilize", id), move || {
				let node = stabilizing.clone();
				async move { node.stabilize().await }
			}));
			let fixing = node.clone();
			maintenance.push(spawn_periodic(node.inner.running.subscribe(), node.config().fix_fingers_interval(), format!("Node {} fix_fingers", id), move || {
				let node = fixing.clone();
				async move { node.fix_fingers().await }
			}));
		}

		Ok(ChordHandle{
			node,
			maintenance,
		})
	}
}


/// Run `job` every `period` until `running` turns false. A failed round is
/// logged and the loop carries on with the next tick.
fn spawn_periodic<F, Fut>(mut running: watch::Receiver<bool>, period: Duration, name: String, mut job: F) -> JoinHandle<()>
where
	F: FnMut() -> Fut + Send + 'static,
	Fut: Future<Output = Result<()>> + Send,
{
	tokio::spawn(async move{
		let mut interval = interval_at(Instant::now() + period, period);
		loop{
			tokio::select! {
				_ = interval.tick() => {
					if !*running.borrow() {
						break;
					}
					if let Err(e) = job().await {
						warn!("{} round failed: {}", name, e);
					}
				},
				changed = running.changed() => {
					if changed.is_err() || !*running.borrow() {
						break;
					}
				},
			}
		}
		info!("{} loop terminating", name);
	})
}


struct NodeInner<A: ChordAddress>{
	// Core data
	id: Identifier,
	addr: A,
	space: RingSpace,
	config: ChordConfig,
	state: Mutex<NodeState>,
	listeners: RwLock<Vec<Arc<dyn RelocationListener>>>,

	// Connections
	adaptor: Arc<dyn ChordAdaptor<A>>,
	directory: Arc<dyn BootstrapDirectory<A>>,

	// Flips to false once, when the node leaves or is stopped
	running: watch::Sender<bool>,
}

/// A running ring member. Cheap to clone; every clone is the same node.
pub struct ChordNode<A: ChordAddress>{
	inner: Arc<NodeInner<A>>,
}

impl<A: ChordAddress> Clone for ChordNode<A> {
	fn clone(&self) -> Self {
		ChordNode { inner: self.inner.clone() }
	}
}

impl<A: ChordAddress> ChordNode<A>{

	pub fn id(&self) -> Identifier {
		self.inner.id
	}

	pub fn addr(&self) -> &A {
		&self.inner.addr
	}

	pub fn space(&self) -> RingSpace {
		self.inner.space
	}

	pub fn config(&self) -> &ChordConfig {
		&self.inner.config
	}

	pub fn is_running(&self) -> bool {
		*self.inner.running.borrow()
	}

	pub async fn finger_table(&self) -> FingerTable {
		self.inner.state.lock().await.fingers.clone()
	}

	pub async fn successor_id(&self) -> Option<Identifier> {
		self.inner.state.lock().await.successor()
	}

	pub async fn predecessor_id(&self) -> Option<Identifier> {
		self.inner.state.lock().await.predecessor()
	}

	pub async fn successors(&self) -> Vec<Identifier> {
		self.inner.state.lock().await.successors.list().to_vec()
	}

	/// Snapshot of the keys stored on this node.
	pub async fn local_keys(&self) -> KeyRange {
		self.inner.state.lock().await.store.clone()
	}

	/// Whether this node currently considers itself responsible for key.
	pub async fn owns(&self, key: Identifier) -> bool {
		self.inner.state.lock().await.owns(key)
	}

	pub async fn register_listener(&self, listener: Arc<dyn RelocationListener>) {
		self.inner.listeners.write().await.push(listener);
	}

	async fn successor_or_self(&self) -> Identifier {
		self.inner.state.lock().await.successor_or_self()
	}

	/// Resolve an id to something callable. Our own id never goes through the transport.
	pub(crate) async fn peer(&self, id: Identifier) -> Result<Arc<dyn RemotePeer>> {
		if id == self.id() {
			return Ok(Arc::new(self.clone()));
		}
		self.inner.adaptor.connect(id).await
	}

	/// Stop maintenance and stop answering, without handing anything over.
	pub(crate) async fn halt(&self) {
		self.inner.running.send_replace(false);
		self.inner.adaptor.shutdown().await;
	}
}


#[async_trait]
impl<A: ChordAddress> RemotePeer for ChordNode<A>{

	async fn id(&self) -> Result<Identifier> {
		Ok(self.inner.id)
	}

	async fn successor(&self) -> Result<Option<Identifier>> {
		Ok(self.successor_id().await)
	}

	async fn predecessor(&self) -> Result<Option<Identifier>> {
		Ok(self.predecessor_id().await)
	}

	async fn successor_list(&self) -> Result<Vec<Identifier>> {
		Ok(self.successors().await)
	}

	async fn set_successor(&self, successor: Identifier) -> Result<()> {
		info!("Node {} successor set to {}", self.id(), successor);
		self.inner.state.lock().await.set_successor(successor);
		Ok(())
	}

	async fn set_predecessor(&self, predecessor: Option<Identifier>) -> Result<()> {
		info!("Node {} predecessor set to {:?}", self.id(), predecessor);
		self.inner.state.lock().await.fingers.set_predecessor(predecessor);
		Ok(())
	}

	async fn find_successor(&self, key: Identifier) -> Result<Identifier> {
		ChordNode::find_successor(self, key).await
	}

	async fn find_predecessor(&self, key: Identifier) -> Result<Identifier> {
		ChordNode::find_predecessor(self, key).await
	}

	async fn closest_preceding_finger(&self, key: Identifier) -> Result<Identifier> {
		Ok(ChordNode::closest_preceding_finger(self, key).await)
	}

	async fn notify(&self, candidate: Identifier) -> Result<()> {
		ChordNode::notify(self, candidate).await
	}

	async fn update_finger_table(&self, candidate: Identifier, index: usize) -> Result<()> {
		ChordNode::update_finger_table(self, candidate, index).await
	}

	async fn update_leaving_node(&self, leaving: Identifier, replacement: Identifier) -> Result<()> {
		ChordNode::update_leaving_node(self, leaving, replacement).await
	}

	async fn transfer_keys(&self) -> Result<()> {
		ChordNode::transfer_keys(self).await
	}

	async fn pop_keys(&self, lower: Identifier, upper: Identifier) -> Result<KeyRange> {
		Ok(ChordNode::pop_keys(self, lower, upper).await)
	}

	async fn update_values(&self, values: KeyRange) -> Result<()> {
		ChordNode::update_values(self, values).await;
		Ok(())
	}

	async fn insert(&self, key: Identifier, value: Value, hops: u32) -> Result<()> {
		self.store_routed(key, value, hops).await
	}

	async fn lookup(&self, key: Identifier, hops: u32) -> Result<Value> {
		self.lookup_routed(key, hops).await
	}
}



/// A ChordHandle represents a started Chord and owns its maintenance tasks.
pub struct ChordHandle<A: ChordAddress>{
	node: ChordNode<A>,
	maintenance: Vec<JoinHandle<()>>,
}

impl<A: ChordAddress> ChordHandle<A> {

	pub fn node(&self) -> &ChordNode<A> {
		&self.node
	}

	/// Whether every maintenance loop has ended.
	pub fn maintenance_finished(&self) -> bool {
		self.maintenance.iter().all(|task| task.is_finished())
	}

	/// Leave the ring gracefully: stop maintenance, hand keys and pointers
	/// over, deregister and stop answering.
	pub async fn leave(self) {
		self.node.inner.running.send_replace(false);
		let limit = self.node.config().rpc_timeout();
		join_maintenance(self.maintenance, limit).await;
		self.node.leave().await;
	}

	/// Force the chord to stop, as if the process died. Nothing is handed
	/// over and the directory is not told.
	pub async fn stop(self) {
		self.node.halt().await;
		let limit = self.node.config().rpc_timeout();
		join_maintenance(self.maintenance, limit).await;
	}
}

/// Wait for loops to notice the node stopped. A loop stuck in a round longer
/// than `limit` is aborted.
async fn join_maintenance(tasks: Vec<JoinHandle<()>>, limit: Duration) {
	for mut task in tasks {
		if timeout(limit, &mut task).await.is_err() {
			warn!("maintenance loop did not stop within {:?}, aborting", limit);
			task.abort();
			let _ = task.await;
		}
	}
}


#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use tokio::time::sleep;

	#[tokio::test]
	async fn periodic_loop_outlives_failed_rounds_and_stops_when_told() {
		let (running, watched) = watch::channel(true);
		let rounds = Arc::new(AtomicUsize::new(0));
		let counter = rounds.clone();
		let task = spawn_periodic(watched, Duration::from_millis(10), "test".to_string(), move || {
			let round = counter.fetch_add(1, Ordering::SeqCst);
			async move {
				if round % 2 == 0 {
					Err(Error::PeerUnreachable(round as Identifier))
				} else {
					Ok(())
				}
			}
		});

		sleep(Duration::from_millis(150)).await;
		assert!(rounds.load(Ordering::SeqCst) >= 4, "failed rounds should not end the loop");
		assert!(!task.is_finished());

		running.send_replace(false);
		timeout(Duration::from_secs(1), task).await.expect("loop should stop on its own").unwrap();
		let stopped_at = rounds.load(Ordering::SeqCst);
		sleep(Duration::from_millis(50)).await;
		assert_eq!(rounds.load(Ordering::SeqCst), stopped_at);
	}
}
