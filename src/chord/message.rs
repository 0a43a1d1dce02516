use serde::{Serialize, Deserialize};

use crate::{
	adaptor::{KeyRange, RemotePeer},
	chord_id::Identifier,
	error::{Error, Result},
	Value,
};


/// A call from one ring member to another, as it travels on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request{
	// State Operations
	Id,
	Successor,
	Predecessor,
	SuccessorList,
	SetSuccessor{id: Identifier},
	SetPredecessor{id: Option<Identifier>},

	// Routing Operations
	FindSuccessor{key: Identifier},
	FindPredecessor{key: Identifier},
	ClosestPrecedingFinger{key: Identifier},

	// Membership Operations
	Notify{candidate: Identifier},
	UpdateFingerTable{candidate: Identifier, index: usize},
	UpdateLeavingNode{leaving: Identifier, replacement: Identifier},

	// Key Operations
	TransferKeys,
	PopKeys{lower: Identifier, upper: Identifier},
	UpdateValues{values: KeyRange},
	Insert{key: Identifier, value: Value, hops: u32},
	Lookup{key: Identifier, hops: u32},
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response{
	Id(Identifier),
	Node(Option<Identifier>),
	Nodes(Vec<Identifier>),
	Keys(KeyRange),
	Value(Value),
	Done,
	Failure(Failure),
}

/// The part of [Error] that survives a trip across the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Failure{
	PeerUnreachable(Identifier),
	NoReachableSuccessor(Identifier),
	KeyNotFound(Identifier),
	RoutingCycleDetected{key: Identifier, hops: u32},
	Other(String),
}

impl From<&Error> for Failure {
	fn from(error: &Error) -> Self {
		match error {
			Error::PeerUnreachable(id) => Failure::PeerUnreachable(*id),
			Error::NoReachableSuccessor(key) => Failure::NoReachableSuccessor(*key),
			Error::KeyNotFound(key) => Failure::KeyNotFound(*key),
			Error::RoutingCycleDetected { key, hops } => Failure::RoutingCycleDetected { key: *key, hops: *hops },
			other => Failure::Other(other.to_string()),
		}
	}
}

impl From<Failure> for Error {
	fn from(failure: Failure) -> Self {
		match failure {
			Failure::PeerUnreachable(id) => Error::PeerUnreachable(id),
			Failure::NoReachableSuccessor(key) => Error::NoReachableSuccessor(key),
			Failure::KeyNotFound(key) => Error::KeyNotFound(key),
			Failure::RoutingCycleDetected { key, hops } => Error::RoutingCycleDetected { key, hops },
			Failure::Other(msg) => Error::Protocol(msg),
		}
	}
}


impl Response {

	fn unexpected(self, wanted: &str) -> Error {
		match self {
			Response::Failure(failure) => failure.into(),
			other => Error::Protocol(format!("expected {wanted}, got {other:?}")),
		}
	}

	pub fn into_id(self) -> Result<Identifier> {
		match self {
			Response::Id(id) => Ok(id),
			other => Err(other.unexpected("an id")),
		}
	}

	pub fn into_node(self) -> Result<Option<Identifier>> {
		match self {
			Response::Node(node) => Ok(node),
			other => Err(other.unexpected("a node")),
		}
	}

	pub fn into_nodes(self) -> Result<Vec<Identifier>> {
		match self {
			Response::Nodes(nodes) => Ok(nodes),
			other => Err(other.unexpected("a node list")),
		}
	}

	pub fn into_keys(self) -> Result<KeyRange> {
		match self {
			Response::Keys(keys) => Ok(keys),
			other => Err(other.unexpected("a key range")),
		}
	}

	pub fn into_value(self) -> Result<Value> {
		match self {
			Response::Value(value) => Ok(value),
			other => Err(other.unexpected("a value")),
		}
	}

	pub fn into_done(self) -> Result<()> {
		match self {
			Response::Done => Ok(()),
			other => Err(other.unexpected("an acknowledgement")),
		}
	}
}


/// Serve one request against a peer, folding any error into the response.
pub async fn dispatch(peer: &dyn RemotePeer, request: Request) -> Response {
	let result = match request {
		Request::Id => peer.id().await.map(Response::Id),
		Request::Successor => peer.successor().await.map(Response::Node),
		Request::Predecessor => peer.predecessor().await.map(Response::Node),
		Request::SuccessorList => peer.successor_list().await.map(Response::Nodes),
		Request::SetSuccessor { id } => peer.set_successor(id).await.map(|_| Response::Done),
		Request::SetPredecessor { id } => peer.set_predecessor(id).await.map(|_| Response::Done),

		Request::FindSuccessor { key } => peer.find_successor(key).await.map(Response::Id),
		Request::FindPredecessor { key } => peer.find_predecessor(key).await.map(Response::Id),
		Request::ClosestPrecedingFinger { key } => peer.closest_preceding_finger(key).await.map(Response::Id),

		Request::Notify { candidate } => peer.notify(candidate).await.map(|_| Response::Done),
		Request::UpdateFingerTable { candidate, index } => peer.update_finger_table(candidate, index).await.map(|_| Response::Done),
		Request::UpdateLeavingNode { leaving, replacement } => peer.update_leaving_node(leaving, replacement).await.map(|_| Response::Done),

		Request::TransferKeys => peer.transfer_keys().await.map(|_| Response::Done),
		Request::PopKeys { lower, upper } => peer.pop_keys(lower, upper).await.map(Response::Keys),
		Request::UpdateValues { values } => peer.update_values(values).await.map(|_| Response::Done),
		Request::Insert { key, value, hops } => peer.insert(key, value, hops).await.map(|_| Response::Done),
		Request::Lookup { key, hops } => peer.lookup(key, hops).await.map(Response::Value),
	};
	result.unwrap_or_else(|e| Response::Failure(Failure::from(&e)))
}
