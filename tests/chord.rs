mod common;

use std::{collections::BTreeSet, sync::Arc, time::Duration};

use tokio::{net::TcpListener, sync::mpsc, time::{sleep, timeout}};

use chord_ring::{
	associate::Associate,
	directory::{BootstrapDirectory, DirectoryServer, RemoteDirectory},
	ChordAdaptor, ChordConfig, Error, Identifier, LocalDirectory, RelocationListener, TcpAdaptor, TcpChord,
};
use common::{assert_exact, assert_keys_placed, expected_successor, make_ring, manual_lazy, settle, wait_until_exact, Ring};


fn value(key: Identifier) -> Vec<u8> {
	format!("value-{key}").into_bytes()
}

async fn fill(ring: &Ring, from: Identifier){
	let node = ring.node(from);
	for key in 0..ring.space.size() {
		assert_eq!(node.insert(value(key), Some(key)).await.unwrap(), key);
	}
}

/// Every node finds every key's value.
async fn assert_lookups(ring: &Ring){
	for node in ring.nodes() {
		for key in 0..ring.space.size() {
			assert_eq!(node.lookup(key).await.unwrap(), value(key), "node {} looking up {}", node.id(), key);
		}
	}
}

/// Lazy nodes running their own maintenance loops quickly.
fn looping_lazy() -> ChordConfig{
	ChordConfig{
		stabilize_interval_ms: 20,
		fix_fingers_interval_ms: 5,
		..ChordConfig::lazy()
	}
}

async fn keys_of(ring: &Ring, id: Identifier) -> Vec<Identifier> {
	ring.node(id).local_keys().await.keys().copied().collect()
}

struct ChannelListener(mpsc::UnboundedSender<Vec<Identifier>>);

impl RelocationListener for ChannelListener{
	fn keys_relocated(&self, keys: Vec<Identifier>) {
		let _ = self.0.send(keys);
	}
}

async fn next_relocation(rx: &mut mpsc::UnboundedReceiver<Vec<Identifier>>) -> BTreeSet<Identifier> {
	timeout(Duration::from_secs(1), rx.recv())
		.await
		.expect("listener should hear about relocated keys")
		.unwrap()
		.into_iter()
		.collect()
}


#[tokio::test]
async fn joining_node_takes_its_keys() {
	let mut ring = make_ring(3, &[1], ChordConfig::eager()).await;
	fill(&ring, 1).await;
	assert_eq!(keys_of(&ring, 1).await, (0..8).collect::<Vec<_>>());

	assert_lookups(&ring).await;

	ring.join(5, ChordConfig::eager()).await;
	assert_eq!(keys_of(&ring, 5).await, vec![2, 3, 4, 5]);
	assert_eq!(keys_of(&ring, 1).await, vec![0, 1, 6, 7]);
	assert_lookups(&ring).await;
	ring.shutdown().await;
}

#[tokio::test]
async fn lazy_joining_node_gets_its_keys_after_settling() {
	let mut ring = make_ring(3, &[1], manual_lazy()).await;
	fill(&ring, 1).await;
	assert_lookups(&ring).await;

	ring.join(5, manual_lazy()).await;
	settle(&ring, 20).await;
	assert_eq!(keys_of(&ring, 5).await, vec![2, 3, 4, 5]);
	assert_eq!(keys_of(&ring, 1).await, vec![0, 1, 6, 7]);
	assert_lookups(&ring).await;
	ring.shutdown().await;
}

#[tokio::test]
async fn keys_stored_before_lazy_ring_settles_reach_their_owners() {
	// Node 3 takes every key while no one has stabilized and it still believes it is alone
	let ring = make_ring(3, &[3, 2, 4, 7, 5], manual_lazy()).await;
	fill(&ring, 3).await;

	settle(&ring, 15).await;
	assert_exact(&ring).await;
	assert_keys_placed(&ring).await;
	assert_lookups(&ring).await;
	ring.shutdown().await;
}

#[tokio::test]
async fn eager_joins_keep_tables_exact() {
	let mut ring = Ring::new(5);
	for id in [3, 11, 17, 24, 30, 8] {
		ring.join(id, ChordConfig::eager()).await;
		assert_exact(&ring).await;
	}
	ring.shutdown().await;
}

#[tokio::test]
async fn lookups_agree_from_every_node() {
	let ring = make_ring(5, &[3, 11, 17, 24, 30, 8], ChordConfig::eager()).await;
	let ids = ring.ids();
	for node in ring.nodes() {
		for key in 0..ring.space.size() {
			assert_eq!(node.find_successor(key).await.unwrap(), expected_successor(&ids, ring.space, key));
		}
	}

	let key = ring.node(17).insert(b"hello".to_vec(), None).await.unwrap();
	assert_eq!(key, ring.space.hash_bytes(b"hello"));
	for node in ring.nodes() {
		assert_eq!(node.lookup(key).await.unwrap(), b"hello".to_vec());
		assert_eq!(node.lookup_value(b"hello").await.unwrap(), b"hello".to_vec());
	}
	let holder = expected_successor(&ids, ring.space, key);
	assert!(ring.node(holder).local_keys().await.contains_key(&key));
	ring.shutdown().await;
}

#[tokio::test]
async fn lazy_ring_converges_and_stays_put() {
	let ring = make_ring(5, &[4, 12, 19, 27, 31], manual_lazy()).await;
	settle(&ring, 20).await;
	assert_exact(&ring).await;

	let mut tables = Vec::new();
	for node in ring.nodes() {
		tables.push(node.finger_table().await);
	}
	settle(&ring, 1).await;
	for (node, before) in ring.nodes().into_iter().zip(tables) {
		assert_eq!(node.finger_table().await, before, "node {} changed after settling", node.id());
	}
	ring.shutdown().await;
}

#[tokio::test]
async fn lazy_ring_recovers_from_crash() {
	let mut ring = make_ring(5, &[2, 9, 14, 21, 27], manual_lazy()).await;
	settle(&ring, 20).await;
	assert_exact(&ring).await;

	ring.crash(14).await;
	settle(&ring, 20).await;
	assert_exact(&ring).await;
	ring.shutdown().await;
}

#[tokio::test]
async fn maintenance_loops_converge_and_stop_with_the_node() {
	let mut ring = make_ring(5, &[4, 12, 19, 27, 31], looping_lazy()).await;
	wait_until_exact(&ring, Duration::from_secs(10)).await;

	// Rounds touching 19 fail for a while; the loops have to carry on past that
	ring.crash(19).await;
	wait_until_exact(&ring, Duration::from_secs(10)).await;
	fill(&ring, 4).await;
	assert_keys_placed(&ring).await;
	assert_lookups(&ring).await;

	let left = ring.take(27);
	left.node().leave().await;
	timeout(Duration::from_secs(1), async {
		while !left.maintenance_finished() {
			sleep(Duration::from_millis(5)).await;
		}
	}).await.expect("maintenance loops should end once the node leaves");
	left.stop().await;

	let leaving = ring.take(12);
	timeout(Duration::from_secs(1), leaving.leave())
		.await
		.expect("leave should not wait on maintenance rounds");
	ring.shutdown().await;
}

#[tokio::test]
async fn crashed_successor_is_routed_around() {
	let mut ring = make_ring(3, &[1, 4, 6], ChordConfig::eager()).await;
	ring.crash(4).await;

	let node = ring.node(1);
	assert_eq!(node.find_successor(5).await.unwrap(), 6);
	assert_eq!(node.find_successor(3).await.unwrap(), 6);
	assert_eq!(node.successor_id().await, Some(6));
	assert_eq!(node.find_predecessor(3).await.unwrap(), 1);
	ring.shutdown().await;
}

#[tokio::test]
async fn eager_leave_hands_everything_over() {
	let mut ring = make_ring(4, &[0, 5, 9, 12], ChordConfig::eager()).await;
	fill(&ring, 0).await;

	ring.leave(9).await;
	assert_exact(&ring).await;
	for node in ring.nodes() {
		assert!(!node.finger_table().await.nodes().contains(&9), "node {} still points at 9", node.id());
	}
	assert_eq!(keys_of(&ring, 12).await, (6..=12).collect::<Vec<_>>());
	assert_keys_placed(&ring).await;
	assert!(!ring.directory.members().await.contains(&9));
	assert!(!ring.network.contains(9).await);

	for key in 0..ring.space.size() {
		assert_eq!(ring.node(5).lookup(key).await.unwrap(), value(key));
	}
	ring.shutdown().await;
}

#[tokio::test]
async fn lazy_leave_keeps_values() {
	let mut ring = make_ring(5, &[4, 12, 19, 27, 31], manual_lazy()).await;
	settle(&ring, 20).await;
	fill(&ring, 4).await;
	assert_keys_placed(&ring).await;

	ring.leave(19).await;
	settle(&ring, 20).await;
	assert_exact(&ring).await;
	assert_keys_placed(&ring).await;
	ring.shutdown().await;
}

#[tokio::test]
async fn listeners_hear_about_moved_keys() {
	let mut ring = Ring::new(3);
	let (a_tx, mut a_rx) = mpsc::unbounded_channel();
	let mut a = ring.chord(1, ChordConfig::eager());
	a.add_listener(Arc::new(ChannelListener(a_tx)));
	ring.handles.push(a.start().await.unwrap());
	fill(&ring, 1).await;

	let (b_tx, mut b_rx) = mpsc::unbounded_channel();
	let mut b = ring.chord(5, ChordConfig::eager());
	b.add_listener(Arc::new(ChannelListener(b_tx)));
	ring.handles.push(b.start().await.unwrap());

	let moved: BTreeSet<Identifier> = [2, 3, 4, 5].into_iter().collect();
	assert_eq!(next_relocation(&mut a_rx).await, moved);
	assert_eq!(next_relocation(&mut b_rx).await, moved);
	ring.shutdown().await;
}

#[tokio::test]
async fn missing_key_is_reported() {
	let ring = make_ring(4, &[2, 10], ChordConfig::eager()).await;
	ring.node(2).insert(value(7), Some(7)).await.unwrap();
	assert!(matches!(ring.node(2).lookup(6).await, Err(Error::KeyNotFound(6))));
	assert!(matches!(ring.node(10).lookup(1).await, Err(Error::KeyNotFound(1))));
	assert_eq!(ring.node(2).lookup(7).await.unwrap(), value(7));
	ring.shutdown().await;
}

#[tokio::test]
async fn hop_limit_stops_routing() {
	let mut ring = make_ring(3, &[2, 4, 6], ChordConfig::eager()).await;
	let config = ChordConfig{ max_hops: 0, ..manual_lazy() };
	let node = ring.join(0, config).await;

	assert!(matches!(node.find_successor(5).await, Err(Error::RoutingCycleDetected { key: 5, .. })));
	assert!(matches!(node.insert(value(5), Some(5)).await, Err(Error::RoutingCycleDetected { key: 5, .. })));
	ring.shutdown().await;
}

#[tokio::test]
async fn joins_conserve_key_ownership() {
	let mut ring = make_ring(4, &[1, 6, 10, 13], ChordConfig::eager()).await;
	fill(&ring, 6).await;
	assert_keys_placed(&ring).await;
	for id in [3, 8, 15] {
		ring.join(id, ChordConfig::eager()).await;
		assert_keys_placed(&ring).await;
	}
	assert_exact(&ring).await;
	ring.shutdown().await;
}

#[tokio::test]
async fn identifiers_are_unique() {
	let mut ring = make_ring(4, &[1, 5], ChordConfig::eager()).await;
	let taken = ring.chord(5, ChordConfig::eager()).start().await;
	assert!(matches!(taken, Err(Error::IdentifierTaken(5))));
	// 21 wraps around to 5 on a 4 bit ring
	let wrapped = ring.chord(21, ChordConfig::eager()).start().await;
	assert!(matches!(wrapped, Err(Error::IdentifierTaken(5))));

	let mut chord = ring.chord(2, ChordConfig::eager());
	assert!(!chord.set_id(3));
	let handle = chord.start().await.unwrap();
	assert_eq!(handle.node().id(), 2);
	ring.handles.push(handle);
	assert_eq!(ring.directory.members().await, vec![1, 2, 5]);
	ring.shutdown().await;
}

#[tokio::test]
async fn associate_reaches_the_ring() {
	let ring = make_ring(6, &[7, 30, 51], ChordConfig::eager()).await;
	let adaptor: Arc<dyn ChordAdaptor<String>> = Arc::new(ring.network.adaptor());
	let client = Associate::new(ring.directory.clone(), adaptor);

	let key = client.save(b"hello".to_vec(), None).await.unwrap();
	assert_eq!(key, client.key_of(b"hello").await.unwrap());
	assert_eq!(client.get(b"hello").await.unwrap(), b"hello".to_vec());
	assert_eq!(client.get_key(key).await.unwrap(), b"hello".to_vec());

	assert_eq!(client.save(b"pinned".to_vec(), Some(40)).await.unwrap(), 40);
	assert!(ring.node(51).local_keys().await.contains_key(&40));
	assert!(matches!(client.get_key(41).await, Err(Error::KeyNotFound(41))));
	ring.shutdown().await;
}

async fn free_addr() -> String {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	listener.local_addr().unwrap().to_string()
}

#[tokio::test]
async fn tcp_ring_stores_and_leaves() {
	let local: Arc<dyn BootstrapDirectory<String>> = Arc::new(LocalDirectory::<String>::new(8).unwrap());
	let server = DirectoryServer::start("127.0.0.1:0", local.clone()).await.unwrap();
	let config = ChordConfig::eager();

	let mut handles = Vec::new();
	for id in [10, 100, 200] {
		let directory: Arc<dyn BootstrapDirectory<String>> = Arc::new(RemoteDirectory::new(server.local_addr().to_string(), config.rpc_timeout()));
		let adaptor = TcpAdaptor::new(directory.clone(), config.rpc_timeout());
		let mut chord = TcpChord::new(free_addr().await, adaptor, directory);
		chord.set_id(id);
		chord.set_config(config.clone());
		handles.push(chord.start().await.unwrap());
	}

	let first = handles[0].node().clone();
	let last = handles[2].node().clone();
	assert_eq!(first.find_successor(150).await.unwrap(), 200);
	assert_eq!(first.insert(b"far".to_vec(), Some(150)).await.unwrap(), 150);
	assert_eq!(last.lookup(150).await.unwrap(), b"far".to_vec());
	assert!(last.local_keys().await.contains_key(&150));

	// 200 leaves, its key moves on to 10
	let leaving = handles.pop().unwrap();
	leaving.leave().await;
	assert_eq!(first.lookup(150).await.unwrap(), b"far".to_vec());
	assert!(first.local_keys().await.contains_key(&150));
	assert_eq!(local.entry_node().await.unwrap().map(|id| id == 200), Some(false));

	for handle in handles {
		handle.leave().await;
	}
	assert_eq!(local.entry_node().await.unwrap(), None);
	server.stop();
}
