use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::{ChordAdaptor, RemotePeer};
use crate::{chord::ChordNode, chord_id::Identifier, error::{Error, Result}, ChordAddress};


/// A set of nodes living in one process that call each other directly.
/// Cloning shares the same network.
pub struct MemoryNetwork<A: ChordAddress>{
	nodes: Arc<Mutex<HashMap<Identifier, ChordNode<A>>>>,
}

impl<A: ChordAddress> Clone for MemoryNetwork<A> {
	fn clone(&self) -> Self {
		MemoryNetwork { nodes: self.nodes.clone() }
	}
}

impl<A: ChordAddress> Default for MemoryNetwork<A> {
	fn default() -> Self {
		Self::new()
	}
}

impl<A: ChordAddress> MemoryNetwork<A>{

	pub fn new() -> Self {
		MemoryNetwork { nodes: Arc::new(Mutex::new(HashMap::new())) }
	}

	/// An adaptor for one more node on this network.
	pub fn adaptor(&self) -> MemoryAdaptor<A> {
		MemoryAdaptor { network: self.clone(), attached: Mutex::new(None) }
	}

	/// Cut a node off without letting it leave, as if it crashed.
	pub async fn disconnect(&self, id: Identifier) -> bool {
		debug!("disconnecting {} from memory network", id);
		self.nodes.lock().await.remove(&id).is_some()
	}

	pub async fn contains(&self, id: Identifier) -> bool {
		self.nodes.lock().await.contains_key(&id)
	}

	pub async fn node(&self, id: Identifier) -> Option<ChordNode<A>> {
		self.nodes.lock().await.get(&id).cloned()
	}

	pub async fn ids(&self) -> Vec<Identifier> {
		let mut ids: Vec<Identifier> = self.nodes.lock().await.keys().copied().collect();
		ids.sort_unstable();
		ids
	}
}


/// [ChordAdaptor] over a [MemoryNetwork].
pub struct MemoryAdaptor<A: ChordAddress>{
	network: MemoryNetwork<A>,
	attached: Mutex<Option<Identifier>>,
}

#[async_trait]
impl<A: ChordAddress> ChordAdaptor<A> for MemoryAdaptor<A>{

	async fn listen(&self, _addr: A, node: ChordNode<A>) -> Result<()> {
		let id = node.id();
		self.network.nodes.lock().await.insert(id, node);
		*self.attached.lock().await = Some(id);
		Ok(())
	}

	async fn connect(&self, id: Identifier) -> Result<Arc<dyn RemotePeer>> {
		match self.network.node(id).await {
			Some(node) => Ok(Arc::new(node)),
			None => Err(Error::PeerUnreachable(id)),
		}
	}

	async fn shutdown(&self) {
		if let Some(id) = self.attached.lock().await.take() {
			self.network.disconnect(id).await;
		}
	}
}
