use std::{collections::HashMap, io::ErrorKind, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{error::Category, Deserializer};
use tokio::{
	io::{AsyncReadExt, AsyncWriteExt},
	net::{TcpListener, TcpStream, ToSocketAddrs},
	sync::Mutex,
	task::JoinHandle,
	time::timeout,
};
use tracing::{debug, error, info, warn};

use super::{ChordAdaptor, KeyRange, RemotePeer};
use crate::{
	chord::{message::{dispatch, Request, Response}, ChordNode},
	chord_id::Identifier,
	directory::BootstrapDirectory,
	error::{Error, Result},
	ChordAddress, Value,
};


/// An implementation of ChordAdaptor that creates TCP connections from any address type that implements ToSocketAddrs.
///
/// Every remote call is one connection carrying one JSON request and one
/// JSON response. Ids are turned into addresses through the directory.
pub struct TcpAdaptor<A: ChordAddress>{
	directory: Arc<dyn BootstrapDirectory<A>>,
	timeout: Duration,
	addresses: Arc<Mutex<HashMap<Identifier, A>>>,
	listener: Mutex<Option<JoinHandle<()>>>,
}

impl<A: ChordAddress> TcpAdaptor<A>{

	pub fn new(directory: Arc<dyn BootstrapDirectory<A>>, timeout: Duration) -> Self{
		TcpAdaptor{
			directory,
			timeout,
			addresses: Arc::new(Mutex::new(HashMap::new())),
			listener: Mutex::new(None),
		}
	}

	async fn resolve(&self, id: Identifier) -> Result<A> {
		if let Some(addr) = self.addresses.lock().await.get(&id) {
			return Ok(addr.clone());
		}
		match self.directory.address_of(id).await? {
			Some(addr) => {
				self.addresses.lock().await.insert(id, addr.clone());
				Ok(addr)
			},
			None => Err(Error::PeerUnreachable(id)),
		}
	}
}

#[async_trait]
impl<A: ChordAddress + ToSocketAddrs> ChordAdaptor<A> for TcpAdaptor<A>{

	async fn listen(&self, addr: A, node: ChordNode<A>) -> Result<()> {
		let listener = TcpListener::bind(addr.clone()).await?;
		info!("Listening for ring members on {:?}", addr);
		let handle = tokio::spawn(async move{
			loop{
				match listener.accept().await {
					Ok((stream, remote)) => {
						debug!("accepted connection from {}", remote);
						tokio::spawn(serve(TcpChordStream::new(stream), node.clone()));
					},
					Err(e) => {
						error!("Encountered an error in accept: {}", e);
						break;
					},
				}
			}
		});
		if let Some(previous) = self.listener.lock().await.replace(handle) {
			previous.abort();
		}
		Ok(())
	}

	async fn connect(&self, id: Identifier) -> Result<Arc<dyn RemotePeer>> {
		let addr = self.resolve(id).await?;
		Ok(Arc::new(TcpPeer{
			id,
			addr,
			timeout: self.timeout,
			addresses: self.addresses.clone(),
		}))
	}

	async fn shutdown(&self) {
		if let Some(handle) = self.listener.lock().await.take() {
			handle.abort();
			let _ = handle.await;
		}
	}
}


/// Answer requests on one connection until the caller hangs up.
async fn serve<A: ChordAddress>(mut stream: TcpChordStream, node: ChordNode<A>){
	loop{
		let request: Request = match stream.read().await {
			Ok(request) => request,
			Err(Error::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => break,
			Err(e) => {
				warn!("dropping connection: {}", e);
				break;
			},
		};
		if !node.is_running() {
			debug!("node {} stopped, refusing {:?}", node.id(), request);
			break;
		}
		let response = dispatch(&node, request).await;
		if let Err(e) = stream.write(&response).await {
			warn!("could not answer: {}", e);
			break;
		}
	}
}


/// A remote ring member reached over TCP.
struct TcpPeer<A: ChordAddress>{
	id: Identifier,
	addr: A,
	timeout: Duration,
	addresses: Arc<Mutex<HashMap<Identifier, A>>>,
}

impl<A: ChordAddress + ToSocketAddrs> TcpPeer<A>{

	async fn call(&self, request: Request) -> Result<Response> {
		match exchange(self.addr.clone(), &request, self.timeout).await {
			Ok(response) => Ok(response),
			Err(e) if e.is_unreachable() || matches!(e, Error::Io(_)) => {
				debug!("peer {} at {:?} unreachable: {}", self.id, self.addr, e);
				self.addresses.lock().await.remove(&self.id);
				Err(Error::PeerUnreachable(self.id))
			},
			Err(e) => Err(e),
		}
	}
}

#[async_trait]
impl<A: ChordAddress + ToSocketAddrs> RemotePeer for TcpPeer<A>{

	async fn id(&self) -> Result<Identifier> {
		self.call(Request::Id).await?.into_id()
	}

	async fn successor(&self) -> Result<Option<Identifier>> {
		self.call(Request::Successor).await?.into_node()
	}

	async fn predecessor(&self) -> Result<Option<Identifier>> {
		self.call(Request::Predecessor).await?.into_node()
	}

	async fn successor_list(&self) -> Result<Vec<Identifier>> {
		self.call(Request::SuccessorList).await?.into_nodes()
	}

	async fn set_successor(&self, successor: Identifier) -> Result<()> {
		self.call(Request::SetSuccessor { id: successor }).await?.into_done()
	}

	async fn set_predecessor(&self, predecessor: Option<Identifier>) -> Result<()> {
		self.call(Request::SetPredecessor { id: predecessor }).await?.into_done()
	}

	async fn find_successor(&self, key: Identifier) -> Result<Identifier> {
		self.call(Request::FindSuccessor { key }).await?.into_id()
	}

	async fn find_predecessor(&self, key: Identifier) -> Result<Identifier> {
		self.call(Request::FindPredecessor { key }).await?.into_id()
	}

	async fn closest_preceding_finger(&self, key: Identifier) -> Result<Identifier> {
		self.call(Request::ClosestPrecedingFinger { key }).await?.into_id()
	}

	async fn notify(&self, candidate: Identifier) -> Result<()> {
		self.call(Request::Notify { candidate }).await?.into_done()
	}

	async fn update_finger_table(&self, candidate: Identifier, index: usize) -> Result<()> {
		self.call(Request::UpdateFingerTable { candidate, index }).await?.into_done()
	}

	async fn update_leaving_node(&self, leaving: Identifier, replacement: Identifier) -> Result<()> {
		self.call(Request::UpdateLeavingNode { leaving, replacement }).await?.into_done()
	}

	async fn transfer_keys(&self) -> Result<()> {
		self.call(Request::TransferKeys).await?.into_done()
	}

	async fn pop_keys(&self, lower: Identifier, upper: Identifier) -> Result<KeyRange> {
		self.call(Request::PopKeys { lower, upper }).await?.into_keys()
	}

	async fn update_values(&self, values: KeyRange) -> Result<()> {
		self.call(Request::UpdateValues { values }).await?.into_done()
	}

	async fn insert(&self, key: Identifier, value: Value, hops: u32) -> Result<()> {
		self.call(Request::Insert { key, value, hops }).await?.into_done()
	}

	async fn lookup(&self, key: Identifier, hops: u32) -> Result<Value> {
		self.call(Request::Lookup { key, hops }).await?.into_value()
	}
}


/// Open a connection, send one message and wait for one reply, all within `limit`.
/// A timeout is reported as an unreachable peer with id 0; callers that know
/// the id substitute their own.
pub(crate) async fn exchange<ADDR, Q, R>(addr: ADDR, request: &Q, limit: Duration) -> Result<R>
where
	ADDR: ToSocketAddrs,
	Q: Serialize + Sync,
	R: DeserializeOwned,
{
	let call = async {
		let mut stream = TcpChordStream::new(TcpStream::connect(addr).await?);
		stream.write(request).await?;
		stream.read().await
	};
	match timeout(limit, call).await {
		Ok(result) => result,
		Err(_) => Err(Error::PeerUnreachable(0)),
	}
}


/// A TCP stream carrying back to back JSON documents.
pub(crate) struct TcpChordStream{
	stream: TcpStream,
	buffer: Vec<u8>,
}

impl TcpChordStream{

	pub fn new(stream: TcpStream) -> Self{
		Self{
			stream,
			buffer: Vec::new(),
		}
	}

	pub async fn read<T: DeserializeOwned>(&mut self) -> Result<T>{
		loop{
			// attempt to deserialize buffer
			let parsed = {
				let mut deserializer = Deserializer::from_slice(self.buffer.as_slice()).into_iter::<T>();
				match deserializer.next() {
					Some(Ok(msg)) => Some(Ok((msg, deserializer.byte_offset()))),
					// more information may arrive later
					Some(Err(ref e)) if e.classify() == Category::Eof => None,
					Some(Err(e)) => Some(Err(e)),
					None => None,
				}
			};

			// if successful, truncate buffer, return deserialized struct
			match parsed {
				Some(Ok((msg, offset))) => {
					self.buffer.drain(..offset);
					return Ok(msg);
				},
				Some(Err(e)) => {
					warn!("Encountered deserialization error: {}", e);
					return Err(e.into());
				},
				None => {},
			}

			// else, read bytes into buffer
			let mut chunk = [0u8; 1024];
			match self.stream.read(&mut chunk).await {
				Ok(0) => {
					return Err(std::io::Error::from(ErrorKind::UnexpectedEof).into());
				},
				Ok(len) => {
					self.buffer.extend_from_slice(&chunk[..len]);
				},
				Err(ref e) if e.kind() == ErrorKind::WouldBlock => continue,
				Err(e) => return Err(e.into()),
			}
		}
	}

	pub async fn write<T: Serialize + ?Sized>(&mut self, msg: &T) -> Result<()>{
		let raw_data = serde_json::to_string(msg)?;
		self.stream.write_all(raw_data.as_bytes()).await?;
		self.stream.flush().await?;
		Ok(())
	}
}
