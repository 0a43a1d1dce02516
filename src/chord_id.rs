use num_bigint::BigUint;
use serde::{Serialize, Deserialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// A point around the chord ring, always in `[0, 2^m)`.
pub type Identifier = u64;

/// The widest ring that still fits an [Identifier] with room for modular arithmetic.
pub const MAX_RING_BITS: u32 = 63;

/// The identifier space of a ring of size `2^m`.
///
/// Every ordering question in the ring goes through here: ids never compare
/// with a plain `<`, only by their clockwise distance from some origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingSpace{
	bits: u32,
}

impl RingSpace{

	pub fn new(bits: u32) -> Result<Self>{
		if bits == 0 || bits > MAX_RING_BITS {
			return Err(Error::Config(format!("ring width must be within 1..={MAX_RING_BITS} bits, got {bits}")));
		}
		Ok(RingSpace{ bits })
	}

	/// Number of bits, m.
	pub fn bits(&self) -> u32 {
		self.bits
	}

	/// Number of identifiers on the ring, 2^m.
	pub fn size(&self) -> u64 {
		1u64 << self.bits
	}

	pub fn reduce(&self, value: u64) -> Identifier {
		value & (self.size() - 1)
	}

	pub fn add(&self, id: Identifier, offset: u64) -> Identifier {
		self.reduce(id.wrapping_add(offset))
	}

	pub fn sub(&self, id: Identifier, offset: u64) -> Identifier {
		self.reduce(id.wrapping_sub(offset))
	}

	/// Clockwise distance travelled going from `from` to `to`.
	pub fn distance(&self, from: Identifier, to: Identifier) -> u64 {
		self.reduce(to.wrapping_sub(from))
	}

	/// Tests if key is in the half-open circular interval `[lower, upper)`.
	/// `lower == upper` is the whole ring, which is what a single member relies on.
	pub fn in_between(&self, key: Identifier, lower: Identifier, upper: Identifier) -> bool {
		if lower == upper {
			return true;
		}
		self.distance(lower, key) < self.distance(lower, upper)
	}

	/// Tests if key is in `(lower, upper]`. Same as `in_between(key, lower+1, upper+1)`.
	pub fn in_open_closed(&self, key: Identifier, lower: Identifier, upper: Identifier) -> bool {
		self.in_between(key, self.add(lower, 1), self.add(upper, 1))
	}

	/// Tests if key is strictly inside `(lower, upper)`.
	/// `lower == upper` covers every id except `lower` itself.
	pub fn in_open(&self, key: Identifier, lower: Identifier, upper: Identifier) -> bool {
		let offset = self.distance(lower, key);
		if lower == upper {
			return offset != 0;
		}
		offset != 0 && offset < self.distance(lower, upper)
	}

	/// Start of finger `index` (1-based) for `node`: `node + 2^(index-1)`.
	pub fn finger_start(&self, node: Identifier, index: usize) -> Identifier {
		self.add(node, 1u64 << (index - 1))
	}

	/// End of finger `index` (1-based) for `node`: `start + 2^(index-1)`.
	pub fn finger_end(&self, node: Identifier, index: usize) -> Identifier {
		self.add(self.finger_start(node, index), 1u64 << (index - 1))
	}

	/// Hash an arbitrary byte string onto the ring.
	pub fn hash_bytes(&self, data: &[u8]) -> Identifier {
		let digest = Sha256::digest(data);
		let modulus = BigUint::from(1u8) << self.bits;
		let reduced = BigUint::from_bytes_be(&digest) % modulus;
		reduced.to_u64_digits().first().copied().unwrap_or(0)
	}

	/// Hash anything serializable, e.g. a node's transport address.
	pub fn hash<T: Serialize + ?Sized>(&self, value: &T) -> Result<Identifier> {
		let data = serde_json::to_vec(value)?;
		Ok(self.hash_bytes(&data))
	}
}
