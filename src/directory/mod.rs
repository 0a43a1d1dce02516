use std::collections::BTreeMap;

use async_trait::async_trait;
use rand::seq::IteratorRandom;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{
	chord_id::{Identifier, RingSpace},
	error::{Error, Result},
	ChordAddress,
};


mod tcp;
pub use tcp::{DirectoryServer, RemoteDirectory};


/// Where a node learns the ring width and an entry point, and where it is
/// listed while it is a member. Only consulted when joining and leaving.
#[async_trait]
pub trait BootstrapDirectory<A: ChordAddress>: Send + Sync {

	/// m, the number of bits in an identifier.
	async fn ring_bits(&self) -> Result<u32>;

	/// A random registered member, or none while the ring is empty.
	async fn entry_node(&self) -> Result<Option<Identifier>>;

	/// Fails with [Error::IdentifierTaken] if the id is already listed.
	async fn register(&self, id: Identifier, addr: A) -> Result<()>;

	async fn unregister(&self, id: Identifier) -> Result<()>;

	async fn address_of(&self, id: Identifier) -> Result<Option<A>>;
}

/// An in-process directory.
pub struct LocalDirectory<A: ChordAddress>{
	space: RingSpace,
	members: Mutex<BTreeMap<Identifier, A>>,
}

impl<A: ChordAddress> LocalDirectory<A>{

	pub fn new(bits: u32) -> Result<Self> {
		Ok(LocalDirectory{
			space: RingSpace::new(bits)?,
			members: Mutex::new(BTreeMap::new()),
		})
	}

	/// Registered ids in ascending order.
	pub async fn members(&self) -> Vec<Identifier> {
		self.members.lock().await.keys().copied().collect()
	}
}

#[async_trait]
impl<A: ChordAddress> BootstrapDirectory<A> for LocalDirectory<A>{

	async fn ring_bits(&self) -> Result<u32> {
		Ok(self.space.bits())
	}

	async fn entry_node(&self) -> Result<Option<Identifier>> {
		let members = self.members.lock().await;
		let entry = members.keys().copied().choose(&mut rand::thread_rng());
		debug!("handing out entry node {:?}", entry);
		Ok(entry)
	}

	async fn register(&self, id: Identifier, addr: A) -> Result<()> {
		if id >= self.space.size() {
			return Err(Error::Directory(format!("id {id} is outside a {} bit ring", self.space.bits())));
		}
		let mut members = self.members.lock().await;
		if members.contains_key(&id) {
			return Err(Error::IdentifierTaken(id));
		}
		info!("Register node {}: {:?}", id, addr);
		members.insert(id, addr);
		Ok(())
	}

	async fn unregister(&self, id: Identifier) -> Result<()> {
		if self.members.lock().await.remove(&id).is_some() {
			info!("Unregister node {}", id);
		}
		Ok(())
	}

	async fn address_of(&self, id: Identifier) -> Result<Option<A>> {
		Ok(self.members.lock().await.get(&id).cloned())
	}
}
