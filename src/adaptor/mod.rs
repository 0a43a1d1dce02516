use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;

use crate::{chord::ChordNode, chord_id::Identifier, error::Result, ChordAddress, Value};


pub mod memory;
pub mod tcp_adaptor;


/// Keys and values moving between nodes.
pub type KeyRange = BTreeMap<Identifier, Value>;


/// Everything one ring member may ask of another.
///
/// A running [ChordNode] implements this directly, which is also the handle a
/// node gets when it resolves its own id. Transport adaptors implement it by
/// forwarding each call over the wire; a call that cannot be delivered or
/// times out comes back as [crate::Error::PeerUnreachable].
#[async_trait]
pub trait RemotePeer: Send + Sync {
	async fn id(&self) -> Result<Identifier>;

	// State
	async fn successor(&self) -> Result<Option<Identifier>>;
	async fn predecessor(&self) -> Result<Option<Identifier>>;
	async fn successor_list(&self) -> Result<Vec<Identifier>>;
	async fn set_successor(&self, successor: Identifier) -> Result<()>;
	async fn set_predecessor(&self, predecessor: Option<Identifier>) -> Result<()>;

	// Routing
	async fn find_successor(&self, key: Identifier) -> Result<Identifier>;
	async fn find_predecessor(&self, key: Identifier) -> Result<Identifier>;
	async fn closest_preceding_finger(&self, key: Identifier) -> Result<Identifier>;

	// Membership
	async fn notify(&self, candidate: Identifier) -> Result<()>;
	async fn update_finger_table(&self, candidate: Identifier, index: usize) -> Result<()>;
	async fn update_leaving_node(&self, leaving: Identifier, replacement: Identifier) -> Result<()>;

	// Keys
	async fn transfer_keys(&self) -> Result<()>;
	async fn pop_keys(&self, lower: Identifier, upper: Identifier) -> Result<KeyRange>;
	async fn update_values(&self, values: KeyRange) -> Result<()>;
	async fn insert(&self, key: Identifier, value: Value, hops: u32) -> Result<()>;
	async fn lookup(&self, key: Identifier, hops: u32) -> Result<Value>;
}


/// The seam between the ring and the transport. An adaptor turns ids into
/// callable peers and makes the local node callable by others.
#[async_trait]
pub trait ChordAdaptor<A: ChordAddress>: Send + Sync + 'static {

	/// Start accepting calls for `node` at `addr`.
	async fn listen(&self, addr: A, node: ChordNode<A>) -> Result<()>;

	/// Produce a handle for the peer with the given id.
	async fn connect(&self, id: Identifier) -> Result<Arc<dyn RemotePeer>>;

	/// Stop accepting calls. Peers resolving this node afterwards see it as unreachable.
	async fn shutdown(&self);
}
