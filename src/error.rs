//! Error of chord_ring

use crate::chord_id::Identifier;

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
	#[error("Peer {0} is unreachable")]
	PeerUnreachable(Identifier),

	#[error("No reachable successor while looking for key {0}")]
	NoReachableSuccessor(Identifier),

	#[error("Key {0} not found")]
	KeyNotFound(Identifier),

	#[error("Routing cycle detected after {hops} hops while looking for key {key}")]
	RoutingCycleDetected { key: Identifier, hops: u32 },

	#[error("Leave failed: {0}")]
	LeaveFailure(String),

	#[error("Identifier {0} is already registered")]
	IdentifierTaken(Identifier),

	#[error("Bootstrap directory error: {0}")]
	Directory(String),

	#[error("Invalid configuration: {0}")]
	Config(String),

	#[error("Unexpected response: {0}")]
	Protocol(String),

	#[error("IOError")]
	Io(#[from] std::io::Error),

	#[error("JSON error")]
	Json(#[from] serde_json::Error),
}

impl Error {
	/// Whether the error means the other side could not be talked to at all.
	/// Routing treats these as dead peers to be routed around.
	pub fn is_unreachable(&self) -> bool {
		matches!(self, Error::PeerUnreachable(_))
	}
}

pub type Result<T> = std::result::Result<T, Error>;
