//! Line based consoles for a running node and for a ring client.

use std::{fmt::Write as _, str::FromStr};

use tokio::io::{self, AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::{
	associate::Associate,
	chord::{ChordHandle, ChordNode},
	chord_id::Identifier,
	ChordAddress,
};


#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ParseError{
	#[error("unknown command `{0}`, try `help`")]
	Unknown(String),

	#[error("usage: {0}")]
	Usage(&'static str),
}


/// Commands understood by a node's console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeCommand{
	FingerTable,
	Id,
	Keys,
	Successors,
	Predecessor,
	Help,
	Exit,
}

impl FromStr for NodeCommand{
	type Err = ParseError;

	fn from_str(line: &str) -> Result<Self, Self::Err> {
		match line.trim() {
			"ft" => Ok(NodeCommand::FingerTable),
			"id" => Ok(NodeCommand::Id),
			"keys" => Ok(NodeCommand::Keys),
			"succ" => Ok(NodeCommand::Successors),
			"pred" => Ok(NodeCommand::Predecessor),
			"help" | "" => Ok(NodeCommand::Help),
			"exit" => Ok(NodeCommand::Exit),
			other => Err(ParseError::Unknown(other.to_string())),
		}
	}
}

const NODE_HELP: &str = "commands:\n- ft\n- id\n- keys\n- succ\n- pred\n- exit";

/// What a console command prints for `node`.
pub async fn describe<A: ChordAddress>(node: &ChordNode<A>, command: NodeCommand) -> String {
	match command {
		NodeCommand::FingerTable => node.finger_table().await.to_string(),
		NodeCommand::Id => format!("{} at {:?}", node.id(), node.addr()),
		NodeCommand::Keys => {
			let mut out = String::new();
			for (key, value) in node.local_keys().await {
				let _ = writeln!(out, "{}: {}", key, String::from_utf8_lossy(&value));
			}
			out
		},
		NodeCommand::Successors => format!("{:?}", node.successors().await),
		NodeCommand::Predecessor => format!("{:?}", node.predecessor_id().await),
		NodeCommand::Help | NodeCommand::Exit => NODE_HELP.to_string(),
	}
}

/// Read commands from stdin until `exit` or end of input, then leave the ring.
pub async fn run_node<A: ChordAddress>(handle: ChordHandle<A>){
	let mut lines = BufReader::new(io::stdin()).lines();
	loop{
		if !handle.node().is_running() {
			break;
		}
		let line = match lines.next_line().await {
			Ok(Some(line)) => line,
			Ok(None) => break,
			Err(e) => {
				warn!("console read failed: {}", e);
				break;
			},
		};
		match line.parse::<NodeCommand>() {
			Ok(NodeCommand::Exit) => break,
			Ok(command) => println!("{}", describe(handle.node(), command).await),
			Err(e) => println!("{}", e),
		}
	}
	info!("console closed, leaving");
	handle.leave().await;
}


/// Commands understood by the client console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand{
	/// Store a value, optionally under an explicit key.
	Save{value: String, key: Option<Identifier>},
	/// Look a value up by hashing it.
	Get{value: String},
	/// Look a value up by key.
	Key{key: Identifier},
	Help,
	Exit,
}

impl FromStr for ClientCommand{
	type Err = ParseError;

	fn from_str(line: &str) -> Result<Self, Self::Err> {
		let words: Vec<&str> = line.split_whitespace().collect();
		match words.as_slice() {
			[] | ["help", ..] => Ok(ClientCommand::Help),
			["exit", ..] => Ok(ClientCommand::Exit),
			["save", value] => Ok(ClientCommand::Save{ value: value.to_string(), key: None }),
			["save", value, key] => {
				let key = key.parse().map_err(|_| ParseError::Usage("save value [key]"))?;
				Ok(ClientCommand::Save{ value: value.to_string(), key: Some(key) })
			},
			["save", ..] => Err(ParseError::Usage("save value [key]")),
			["get", value] => Ok(ClientCommand::Get{ value: value.to_string() }),
			["get", ..] => Err(ParseError::Usage("get value")),
			["key", key] => key.parse()
				.map(|key| ClientCommand::Key{ key })
				.map_err(|_| ParseError::Usage("key id")),
			["key", ..] => Err(ParseError::Usage("key id")),
			[other, ..] => Err(ParseError::Unknown(other.to_string())),
		}
	}
}

const CLIENT_HELP: &str = "commands:\n- save value [key]\n- get value\n- key id\n- exit";

/// Read client commands from stdin until `exit` or end of input.
pub async fn run_client<A: ChordAddress>(client: Associate<A>){
	let mut lines = BufReader::new(io::stdin()).lines();
	while let Ok(Some(line)) = lines.next_line().await {
		let command = match line.parse::<ClientCommand>() {
			Ok(command) => command,
			Err(e) => {
				println!("{}", e);
				continue;
			},
		};
		match command {
			ClientCommand::Save { value, key } => match client.save(value.into_bytes(), key).await {
				Ok(key) => println!("saved under {}", key),
				Err(e) => println!("{}", e),
			},
			ClientCommand::Get { value } => match client.get(value.as_bytes()).await {
				Ok(found) => println!("{}", String::from_utf8_lossy(&found)),
				Err(e) => println!("{}", e),
			},
			ClientCommand::Key { key } => match client.get_key(key).await {
				Ok(found) => println!("{}", String::from_utf8_lossy(&found)),
				Err(e) => println!("{}", e),
			},
			ClientCommand::Help => println!("{}", CLIENT_HELP),
			ClientCommand::Exit => break,
		}
	}
}


#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn node_commands() {
		assert_eq!("ft".parse::<NodeCommand>(), Ok(NodeCommand::FingerTable));
		assert_eq!(" succ ".parse::<NodeCommand>(), Ok(NodeCommand::Successors));
		assert_eq!("".parse::<NodeCommand>(), Ok(NodeCommand::Help));
		assert_eq!("exit".parse::<NodeCommand>(), Ok(NodeCommand::Exit));
		assert_eq!("fingers".parse::<NodeCommand>(), Err(ParseError::Unknown("fingers".to_string())));
	}

	#[test]
	fn client_commands() {
		assert_eq!("save hello".parse::<ClientCommand>(), Ok(ClientCommand::Save{ value: "hello".to_string(), key: None }));
		assert_eq!("save hello 5".parse::<ClientCommand>(), Ok(ClientCommand::Save{ value: "hello".to_string(), key: Some(5) }));
		assert_eq!("key 12".parse::<ClientCommand>(), Ok(ClientCommand::Key{ key: 12 }));
		assert_eq!("get".parse::<ClientCommand>(), Err(ParseError::Usage("get value")));
		assert_eq!("save hello five".parse::<ClientCommand>(), Err(ParseError::Usage("save value [key]")));
		assert_eq!("drop table".parse::<ClientCommand>(), Err(ParseError::Unknown("drop".to_string())));
	}
}
