use std::fmt::Debug;
use serde::{Serialize, de::DeserializeOwned};


pub mod chord;
pub use chord::{Chord, ChordHandle, ChordNode, RelocationListener};

pub mod adaptor;
pub use adaptor::{ChordAdaptor, RemotePeer};
pub use adaptor::memory::{MemoryAdaptor, MemoryNetwork};
pub use adaptor::tcp_adaptor::TcpAdaptor;

pub mod directory;
pub use directory::{BootstrapDirectory, LocalDirectory};

pub mod chord_id;
pub use chord_id::{Identifier, RingSpace};

pub mod finger_table;
pub mod successor;

pub mod associate;
pub mod config;
pub use config::{ChordConfig, JoinStrategy};

pub mod console;

pub mod error;
pub use error::{Error, Result};


/// A Chord over TCP, addressed by anything tokio can resolve to a socket.
pub type TcpChord<A> = Chord<A, TcpAdaptor<A>>;

/// Opaque payload stored in the ring.
pub type Value = Vec<u8>;


pub trait ChordAddress: Clone + Send + Sync + 'static + Debug + Serialize + DeserializeOwned{}
impl<T: Clone + Send + Sync + 'static + Debug + Serialize + DeserializeOwned> ChordAddress for T{}
