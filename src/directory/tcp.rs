use std::{io::ErrorKind, marker::PhantomData, net::SocketAddr, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Serialize, Deserialize};
use tokio::{net::{TcpListener, ToSocketAddrs}, task::JoinHandle};
use tracing::{debug, error, info, warn};

use super::BootstrapDirectory;
use crate::{
	adaptor::tcp_adaptor::{exchange, TcpChordStream},
	chord_id::Identifier,
	error::{Error, Result},
	ChordAddress,
};


#[derive(Debug, Clone, Serialize, Deserialize)]
enum DirectoryRequest<A>{
	RingBits,
	EntryNode,
	Register{id: Identifier, addr: A},
	Unregister{id: Identifier},
	AddressOf{id: Identifier},
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum DirectoryResponse<A>{
	RingBits(u32),
	Node(Option<Identifier>),
	Address(Option<A>),
	Done,
	Taken(Identifier),
	Failure(String),
}


/// Serves a directory to nodes in other processes.
pub struct DirectoryServer{
	local_addr: SocketAddr,
	handle: JoinHandle<()>,
}

impl DirectoryServer{

	pub async fn start<A: ChordAddress, L: ToSocketAddrs>(listen: L, directory: Arc<dyn BootstrapDirectory<A>>) -> Result<Self> {
		let listener = TcpListener::bind(listen).await?;
		let local_addr = listener.local_addr()?;
		info!("Directory listening on {}", local_addr);
		let handle = tokio::spawn(async move{
			loop{
				match listener.accept().await {
					Ok((stream, remote)) => {
						debug!("directory connection from {}", remote);
						let directory = directory.clone();
						tokio::spawn(async move{
							let mut stream = TcpChordStream::new(stream);
							loop{
								let request: DirectoryRequest<A> = match stream.read().await {
									Ok(request) => request,
									Err(Error::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => break,
									Err(e) => {
										warn!("dropping directory connection: {}", e);
										break;
									},
								};
								let response = answer(directory.as_ref(), request).await;
								if let Err(e) = stream.write(&response).await {
									warn!("could not answer directory request: {}", e);
									break;
								}
							}
						});
					},
					Err(e) => {
						error!("Encountered an error in accept: {}", e);
						break;
					},
				}
			}
		});
		Ok(DirectoryServer{ local_addr, handle })
	}

	pub fn local_addr(&self) -> SocketAddr {
		self.local_addr
	}

	pub fn stop(self) {
		self.handle.abort();
	}

	/// Serve until the accept loop ends.
	pub async fn wait(self) {
		let _ = self.handle.await;
	}
}

async fn answer<A: ChordAddress>(directory: &dyn BootstrapDirectory<A>, request: DirectoryRequest<A>) -> DirectoryResponse<A> {
	let result = match request {
		DirectoryRequest::RingBits => directory.ring_bits().await.map(DirectoryResponse::RingBits),
		DirectoryRequest::EntryNode => directory.entry_node().await.map(DirectoryResponse::Node),
		DirectoryRequest::Register { id, addr } => directory.register(id, addr).await.map(|_| DirectoryResponse::Done),
		DirectoryRequest::Unregister { id } => directory.unregister(id).await.map(|_| DirectoryResponse::Done),
		DirectoryRequest::AddressOf { id } => directory.address_of(id).await.map(DirectoryResponse::Address),
	};
	match result {
		Ok(response) => response,
		Err(Error::IdentifierTaken(id)) => DirectoryResponse::Taken(id),
		Err(e) => DirectoryResponse::Failure(e.to_string()),
	}
}


/// Client side of a [DirectoryServer].
pub struct RemoteDirectory<A>{
	server: String,
	timeout: Duration,
	_address: PhantomData<fn() -> A>,
}

impl<A: ChordAddress> RemoteDirectory<A>{

	pub fn new(server: impl Into<String>, timeout: Duration) -> Self {
		RemoteDirectory{
			server: server.into(),
			timeout,
			_address: PhantomData,
		}
	}

	async fn call(&self, request: DirectoryRequest<A>) -> Result<DirectoryResponse<A>> {
		let response = exchange(self.server.as_str(), &request, self.timeout).await.map_err(|e| {
			Error::Directory(format!("{} did not answer {:?}: {}", self.server, request, e))
		})?;
		match response {
			DirectoryResponse::Taken(id) => Err(Error::IdentifierTaken(id)),
			DirectoryResponse::Failure(msg) => Err(Error::Directory(msg)),
			other => Ok(other),
		}
	}
}

fn unexpected<A: std::fmt::Debug>(response: DirectoryResponse<A>) -> Error {
	Error::Directory(format!("unexpected directory response {:?}", response))
}

#[async_trait]
impl<A: ChordAddress> BootstrapDirectory<A> for RemoteDirectory<A>{

	async fn ring_bits(&self) -> Result<u32> {
		match self.call(DirectoryRequest::RingBits).await? {
			DirectoryResponse::RingBits(bits) => Ok(bits),
			other => Err(unexpected(other)),
		}
	}

	async fn entry_node(&self) -> Result<Option<Identifier>> {
		match self.call(DirectoryRequest::EntryNode).await? {
			DirectoryResponse::Node(node) => Ok(node),
			other => Err(unexpected(other)),
		}
	}

	async fn register(&self, id: Identifier, addr: A) -> Result<()> {
		match self.call(DirectoryRequest::Register { id, addr }).await? {
			DirectoryResponse::Done => Ok(()),
			other => Err(unexpected(other)),
		}
	}

	async fn unregister(&self, id: Identifier) -> Result<()> {
		match self.call(DirectoryRequest::Unregister { id }).await? {
			DirectoryResponse::Done => Ok(()),
			other => Err(unexpected(other)),
		}
	}

	async fn address_of(&self, id: Identifier) -> Result<Option<A>> {
		match self.call(DirectoryRequest::AddressOf { id }).await? {
			DirectoryResponse::Address(addr) => Ok(addr),
			other => Err(unexpected(other)),
		}
	}
}
