use std::{path::Path, time::Duration};

use serde::{Serialize, Deserialize};
use tokio::fs;

use crate::error::{Error, Result};


/// How a node fills its tables when it joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinStrategy{
	/// Resolve every finger through the entry node and push this node into
	/// the tables of everyone that should point to it. No background loops.
	Eager,
	/// Seed only the immediate successor and let periodic stabilize and
	/// fix_fingers converge the tables.
	Lazy,
}

impl Default for JoinStrategy {
	fn default() -> Self {
		JoinStrategy::Lazy
	}
}


#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChordConfig{
	pub strategy: JoinStrategy,
	pub stabilize_interval_ms: u64,
	pub fix_fingers_interval_ms: u64,
	pub rpc_timeout_ms: u64,
	pub max_hops: u32,
}

impl Default for ChordConfig {
	fn default() -> Self {
		ChordConfig {
			strategy: JoinStrategy::default(),
			stabilize_interval_ms: 2000,
			fix_fingers_interval_ms: 2000,
			rpc_timeout_ms: 3000,
			max_hops: 128,
		}
	}
}

impl ChordConfig {

	pub fn eager() -> Self {
		ChordConfig { strategy: JoinStrategy::Eager, ..Default::default() }
	}

	pub fn lazy() -> Self {
		ChordConfig { strategy: JoinStrategy::Lazy, ..Default::default() }
	}

	/// Read a config from a JSON file. Missing fields take their defaults.
	pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
		let raw = fs::read_to_string(&path).await?;
		let config: ChordConfig = serde_json::from_str(&raw)?;
		config.validate()?;
		Ok(config)
	}

	pub fn validate(&self) -> Result<()> {
		if self.stabilize_interval_ms == 0 || self.fix_fingers_interval_ms == 0 {
			return Err(Error::Config("maintenance intervals must be positive".to_string()));
		}
		if self.rpc_timeout_ms == 0 {
			return Err(Error::Config("rpc timeout must be positive".to_string()));
		}
		Ok(())
	}

	pub fn stabilize_interval(&self) -> Duration {
		Duration::from_millis(self.stabilize_interval_ms)
	}

	pub fn fix_fingers_interval(&self) -> Duration {
		Duration::from_millis(self.fix_fingers_interval_ms)
	}

	pub fn rpc_timeout(&self) -> Duration {
		Duration::from_millis(self.rpc_timeout_ms)
	}
}
