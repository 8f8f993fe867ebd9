//! Named, persistent sequence management.
//!
//! A sequence is a `(version, value)` pair advanced under
//! compare-and-set, parameterized by minimum, maximum, increment and
//! cycling. `next` bumps the in-memory state atomically and marks the
//! sequence as used by the calling transaction; used sequences are
//! flushed into the system storage when that transaction commits.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::cnf::SYSTEM_STORAGE_NAME;
use crate::err::Error;
use crate::kvs::api::{EngineTransaction, PutOperation};
use crate::kvs::tx::TransactionContext;

/// The definition of a sequence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SequenceDef {
	pub name: String,
	pub minimum: i64,
	pub maximum: i64,
	pub increment: i64,
	pub cycle: bool,
	pub start: i64,
}

impl SequenceDef {
	/// A conventional ascending sequence starting at one.
	pub fn ascending(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			minimum: 1,
			maximum: i64::MAX,
			increment: 1,
			cycle: false,
			start: 1,
		}
	}
}

/// The persisted image of a sequence: its definition plus the
/// versioned value.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SequenceImage {
	def: SequenceDef,
	version: u64,
	value: i64,
}

/// The in-memory state of one sequence. The `(version, value)` pair
/// only moves through `compare_and_set`.
struct SequenceEntry {
	def: SequenceDef,
	state: Mutex<(u64, i64)>,
	/// Whether `next` has been called at least once; the first call
	/// returns the start value unbumped
	primed: Mutex<bool>,
}

impl SequenceEntry {
	/// Advance from the expected version to a new value. Returns
	/// whether the swap happened.
	fn compare_and_set(&self, expected_version: u64, value: i64) -> bool {
		let mut state = self.state.lock();
		if state.0 != expected_version {
			return false;
		}
		*state = (expected_version + 1, value);
		true
	}

	fn snapshot(&self) -> (u64, i64) {
		*self.state.lock()
	}
}

/// Manager for every sequence known to the datastore.
pub struct Sequences {
	entries: DashMap<String, Arc<SequenceEntry>>,
}

impl Sequences {
	/// Create an empty manager.
	pub fn new() -> Self {
		Self {
			entries: DashMap::new(),
		}
	}

	/// Define a new sequence. Fails if the name is taken.
	pub fn define(&self, def: SequenceDef) -> Result<(), Error> {
		if self.entries.contains_key(&def.name) {
			return Err(Error::AlreadyExists);
		}
		let entry = Arc::new(SequenceEntry {
			state: Mutex::new((0, def.start)),
			primed: Mutex::new(false),
			def,
		});
		self.entries.insert(entry.def.name.clone(), entry);
		Ok(())
	}

	/// Whether a sequence with this name exists.
	pub fn exists(&self, name: &str) -> bool {
		self.entries.contains_key(name)
	}

	/// Fetch the next value of a sequence, marking it used by the
	/// given transaction so its state flushes at commit.
	pub fn next(&self, name: &str, tx: &TransactionContext) -> Result<i64, Error> {
		let entry = self
			.entries
			.get(name)
			.map(|e| e.value().clone())
			.ok_or(Error::NotFound)?;
		loop {
			// The first call hands out the start value itself
			{
				let mut primed = entry.primed.lock();
				if !*primed {
					*primed = true;
					tx.mark_sequence_used(name);
					return Ok(entry.snapshot().1);
				}
			}
			let (version, value) = entry.snapshot();
			let next = match advance(&entry.def, value) {
				Some(next) => next,
				None => {
					return Err(Error::SequenceOutOfBounds {
						name: name.to_owned(),
					})
				}
			};
			if entry.compare_and_set(version, next) {
				tx.mark_sequence_used(name);
				return Ok(next);
			}
			// Another caller advanced the sequence; retry
		}
	}

	/// Flush the sequences used by a transaction into the system
	/// storage through its own engine transaction.
	pub fn flush(
		&self,
		tx: &TransactionContext,
		engine_tx: &mut dyn EngineTransaction,
	) -> Result<(), Error> {
		for name in tx.take_used_sequences() {
			let Some(entry) = self.entries.get(&name).map(|e| e.value().clone()) else {
				continue;
			};
			let (version, value) = entry.snapshot();
			let image = SequenceImage {
				def: entry.def.clone(),
				version,
				value,
			};
			let payload = bincode::serialize(&image)?;
			engine_tx.put(
				SYSTEM_STORAGE_NAME,
				sequence_key(&name),
				payload,
				PutOperation::Upsert,
			)?;
		}
		Ok(())
	}

	/// Restore sequence state from the system storage on startup.
	pub fn load(&self, engine_tx: &mut dyn EngineTransaction) -> Result<(), Error> {
		let prefix = b"seq/".to_vec();
		let mut upper = prefix.clone();
		upper.push(0xFF);
		let entries = engine_tx.scan(
			SYSTEM_STORAGE_NAME,
			(std::ops::Bound::Included(prefix), std::ops::Bound::Excluded(upper)),
			None,
		)?;
		for (_, payload) in entries {
			let image: SequenceImage = bincode::deserialize(&payload)?;
			let entry = Arc::new(SequenceEntry {
				state: Mutex::new((image.version, image.value)),
				// A restored sequence continues from its stored value
				primed: Mutex::new(true),
				def: image.def,
			});
			self.entries.insert(entry.def.name.clone(), entry);
		}
		Ok(())
	}
}

impl Default for Sequences {
	fn default() -> Self {
		Self::new()
	}
}

/// The system storage key of a sequence.
fn sequence_key(name: &str) -> Vec<u8> {
	let mut key = b"seq/".to_vec();
	key.extend_from_slice(name.as_bytes());
	key
}

/// The successor of `value` under the sequence parameters, or `None`
/// when the sequence is exhausted.
fn advance(def: &SequenceDef, value: i64) -> Option<i64> {
	match value.checked_add(def.increment) {
		Some(next) if def.increment > 0 && next > def.maximum => {
			if def.cycle {
				// The successor of the maximum is the minimum
				Some(def.minimum)
			} else {
				None
			}
		}
		Some(next) if def.increment < 0 && next < def.minimum => {
			if def.cycle {
				Some(def.maximum)
			} else {
				None
			}
		}
		Some(next) => Some(next),
		None => {
			if def.cycle {
				Some(if def.increment > 0 {
					def.minimum
				} else {
					def.maximum
				})
			} else {
				None
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::kvs::api::TransactionType;
	use crate::kvs::tx::TransactionOptions;

	fn tx() -> TransactionContext {
		TransactionContext::new(1, TransactionType::Occ, &TransactionOptions::occ())
	}

	#[test]
	fn values_form_a_gapless_prefix() {
		let sequences = Sequences::new();
		sequences.define(SequenceDef::ascending("s")).unwrap();
		let tx = tx();
		let got: Vec<i64> = (0..5).map(|_| sequences.next("s", &tx).unwrap()).collect();
		assert_eq!(got, vec![1, 2, 3, 4, 5]);
	}

	#[test]
	fn concurrent_callers_never_see_duplicates() {
		let sequences = Arc::new(Sequences::new());
		sequences.define(SequenceDef::ascending("s")).unwrap();
		let mut handles = Vec::new();
		for _ in 0..4 {
			let sequences = sequences.clone();
			handles.push(std::thread::spawn(move || {
				let tx = tx();
				(0..100).map(|_| sequences.next("s", &tx).unwrap()).collect::<Vec<i64>>()
			}));
		}
		let mut all: Vec<i64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
		all.sort_unstable();
		let expected: Vec<i64> = (1..=400).collect();
		assert_eq!(all, expected);
	}

	#[test]
	fn cycling_wraps_max_to_min() {
		let sequences = Sequences::new();
		sequences
			.define(SequenceDef {
				name: "c".to_owned(),
				minimum: 1,
				maximum: 3,
				increment: 1,
				cycle: true,
				start: 1,
			})
			.unwrap();
		let tx = tx();
		let got: Vec<i64> = (0..5).map(|_| sequences.next("c", &tx).unwrap()).collect();
		assert_eq!(got, vec![1, 2, 3, 1, 2]);
	}

	#[test]
	fn exhaustion_without_cycle_is_an_error() {
		let sequences = Sequences::new();
		sequences
			.define(SequenceDef {
				name: "x".to_owned(),
				minimum: 1,
				maximum: 2,
				increment: 1,
				cycle: false,
				start: 1,
			})
			.unwrap();
		let tx = tx();
		assert_eq!(sequences.next("x", &tx).unwrap(), 1);
		assert_eq!(sequences.next("x", &tx).unwrap(), 2);
		assert!(matches!(
			sequences.next("x", &tx).unwrap_err(),
			Error::SequenceOutOfBounds { .. }
		));
	}
}
