#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use tokio::time::{sleep, Instant};

use chord_ring::{
	Chord, ChordConfig, ChordHandle, ChordNode, Identifier, LocalDirectory, MemoryNetwork, RingSpace,
};


pub type Node = ChordNode<String>;

/// Nodes sharing one in-memory network and directory.
pub struct Ring{
	pub space: RingSpace,
	pub network: MemoryNetwork<String>,
	pub directory: Arc<LocalDirectory<String>>,
	pub handles: Vec<ChordHandle<String>>,
}

impl Ring{

	pub fn new(bits: u32) -> Self{
		Ring{
			space: RingSpace::new(bits).unwrap(),
			network: MemoryNetwork::new(),
			directory: Arc::new(LocalDirectory::new(bits).unwrap()),
			handles: Vec::new(),
		}
	}

	pub fn chord(&self, id: Identifier, config: ChordConfig) -> Chord<String, chord_ring::MemoryAdaptor<String>>{
		let mut chord = Chord::new(format!("node-{id}"), self.network.adaptor(), self.directory.clone());
		chord.set_id(id);
		chord.set_config(config);
		chord
	}

	pub async fn join(&mut self, id: Identifier, config: ChordConfig) -> Node{
		let handle = self.chord(id, config).start().await.expect("Chords should be able to start");
		let node = handle.node().clone();
		self.handles.push(handle);
		node
	}

	pub fn node(&self, id: Identifier) -> Node{
		self.handles
			.iter()
			.map(|h| h.node().clone())
			.find(|n| n.id() == id)
			.unwrap_or_else(|| panic!("no node {id} in ring"))
	}

	/// Live nodes in id order.
	pub fn nodes(&self) -> Vec<Node>{
		let mut nodes: Vec<Node> = self.handles.iter().map(|h| h.node().clone()).collect();
		nodes.sort_by_key(|n| n.id());
		nodes
	}

	pub fn ids(&self) -> Vec<Identifier>{
		self.nodes().iter().map(|n| n.id()).collect()
	}

	pub fn take(&mut self, id: Identifier) -> ChordHandle<String>{
		let index = self.handles.iter().position(|h| h.node().id() == id).unwrap();
		self.handles.remove(index)
	}

	pub async fn leave(&mut self, id: Identifier){
		self.take(id).leave().await;
	}

	/// Stop a node without letting it leave.
	pub async fn crash(&mut self, id: Identifier){
		self.take(id).stop().await;
	}

	pub async fn shutdown(self){
		for handle in self.handles {
			handle.stop().await;
		}
	}
}


pub async fn make_ring(bits: u32, ids: &[Identifier], config: ChordConfig) -> Ring{
	let mut ring = Ring::new(bits);
	for id in ids {
		ring.join(*id, config.clone()).await;
	}
	ring
}

/// Lazy nodes whose background loops never fire, so tests drive maintenance.
pub fn manual_lazy() -> ChordConfig{
	ChordConfig{
		stabilize_interval_ms: 3_600_000,
		fix_fingers_interval_ms: 3_600_000,
		..ChordConfig::lazy()
	}
}

/// Run stabilize on every node, then refresh every finger, `rounds` times.
pub async fn settle(ring: &Ring, rounds: usize){
	for _ in 0..rounds {
		for node in ring.nodes() {
			node.stabilize().await.expect("stabilize should succeed");
		}
		for node in ring.nodes() {
			for index in 2..=ring.space.bits() as usize {
				node.fix_finger(index).await.expect("fix_finger should succeed");
			}
		}
	}
}

pub fn expected_successor(ids: &[Identifier], space: RingSpace, key: Identifier) -> Identifier{
	*ids.iter().min_by_key(|id| space.distance(key, **id)).unwrap()
}

pub fn expected_predecessor(ids: &[Identifier], space: RingSpace, node: Identifier) -> Identifier{
	*ids.iter()
		.filter(|id| **id != node || ids.len() == 1)
		.min_by_key(|id| space.distance(**id, node))
		.unwrap()
}

/// Fingers and predecessors that differ from the true ring.
pub async fn mismatches(ring: &Ring) -> Vec<String>{
	let ids = ring.ids();
	let mut wrong = Vec::new();
	for node in ring.nodes() {
		let table = node.finger_table().await;
		for index in 1..=ring.space.bits() as usize {
			let start = table.start(index).unwrap();
			let expected = expected_successor(&ids, ring.space, start);
			if table.finger(index) != Some(expected) {
				wrong.push(format!("node {} finger {} (start {}) is {:?}, expected {}", node.id(), index, start, table.finger(index), expected));
			}
		}
		let expected = expected_predecessor(&ids, ring.space, node.id());
		let predecessor = node.predecessor_id().await;
		if predecessor != Some(expected) {
			wrong.push(format!("node {} predecessor is {:?}, expected {}", node.id(), predecessor, expected));
		}
	}
	wrong
}

/// Every finger and predecessor in the ring is exactly right.
pub async fn assert_exact(ring: &Ring){
	let wrong = mismatches(ring).await;
	assert!(wrong.is_empty(), "{}", wrong.join("\n"));
}

/// Poll until the background loops have made the ring exact.
pub async fn wait_until_exact(ring: &Ring, limit: Duration){
	let deadline = Instant::now() + limit;
	loop{
		let wrong = mismatches(ring).await;
		if wrong.is_empty() {
			return;
		}
		if Instant::now() > deadline {
			panic!("ring not exact after {:?}:\n{}", limit, wrong.join("\n"));
		}
		sleep(Duration::from_millis(20)).await;
	}
}

/// Every key is held by exactly one node, and that node is its successor.
pub async fn assert_keys_placed(ring: &Ring){
	let ids = ring.ids();
	for key in 0..ring.space.size() {
		let mut holders = Vec::new();
		for node in ring.nodes() {
			if node.local_keys().await.contains_key(&key) {
				holders.push(node.id());
			}
		}
		assert_eq!(holders, vec![expected_successor(&ids, ring.space, key)], "holders of key {}", key);
	}
}
