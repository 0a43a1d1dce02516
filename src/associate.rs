use std::{future::Future, pin::Pin, sync::Arc};

use tracing::{info, instrument, warn};

use crate::{
	adaptor::{ChordAdaptor, RemotePeer},
	chord_id::{Identifier, RingSpace},
	directory::BootstrapDirectory,
	error::{Error, Result},
	ChordAddress, Value,
};


/// Number of entry nodes tried before a request is given up.
const ENTRY_ATTEMPTS: usize = 3;

type PeerCall<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;


/// A client of the ring that is not a member itself. Every request enters
/// the ring through a random registered node.
pub struct Associate<A: ChordAddress>{
	directory: Arc<dyn BootstrapDirectory<A>>,
	adaptor: Arc<dyn ChordAdaptor<A>>,
}

impl<A: ChordAddress> Associate<A>{

	pub fn new(directory: Arc<dyn BootstrapDirectory<A>>, adaptor: Arc<dyn ChordAdaptor<A>>) -> Self{
		Associate{
			directory,
			adaptor,
		}
	}

	async fn space(&self) -> Result<RingSpace> {
		RingSpace::new(self.directory.ring_bits().await?)
	}

	async fn entry(&self) -> Result<Arc<dyn RemotePeer>> {
		match self.directory.entry_node().await? {
			Some(id) => self.adaptor.connect(id).await,
			None => Err(Error::Directory("the ring is empty".to_string())),
		}
	}

	/// Run a request against an entry node, moving on to another entry if
	/// the chosen one cannot be reached.
	async fn with_entry<T, F>(&self, request: F) -> Result<T>
	where
		F: for<'a> Fn(&'a dyn RemotePeer) -> PeerCall<'a, T>,
	{
		let mut last = None;
		for _ in 0..ENTRY_ATTEMPTS {
			let entry = match self.entry().await {
				Ok(entry) => entry,
				Err(e) if e.is_unreachable() => {
					last = Some(e);
					continue;
				},
				Err(e) => return Err(e),
			};
			match request(entry.as_ref()).await {
				Err(e) if e.is_unreachable() => {
					warn!("entry node unreachable, trying another: {}", e);
					last = Some(e);
				},
				result => return result,
			}
		}
		Err(last.unwrap_or_else(|| Error::Directory("no entry node answered".to_string())))
	}

	/// The key a value would be stored under when no key is given.
	pub async fn key_of(&self, value: &[u8]) -> Result<Identifier> {
		Ok(self.space().await?.hash_bytes(value))
	}

	/// Store a value, under `key` or else its hash. Returns the key used.
	#[instrument(skip(self, value))]
	pub async fn save(&self, value: Value, key: Option<Identifier>) -> Result<Identifier> {
		let space = self.space().await?;
		let key = match key {
			Some(key) => space.reduce(key),
			None => space.hash_bytes(&value),
		};
		self.with_entry(|entry| {
			let value = value.clone();
			Box::pin(async move { entry.insert(key, value, 0).await })
		}).await?;
		info!("saved value under key {}", key);
		Ok(key)
	}

	/// Fetch the value that was saved without a key, by hashing it again.
	pub async fn get(&self, value: &[u8]) -> Result<Value> {
		let key = self.key_of(value).await?;
		self.get_key(key).await
	}

	/// Fetch the value stored under a key.
	#[instrument(skip(self))]
	pub async fn get_key(&self, key: Identifier) -> Result<Value> {
		let key = self.space().await?.reduce(key);
		self.with_entry(|entry| Box::pin(async move { entry.lookup(key, 0).await })).await
	}
}
