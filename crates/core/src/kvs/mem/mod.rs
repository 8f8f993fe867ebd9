#![cfg(feature = "kv-mem")]

//! The in-memory reference storage backend.
//!
//! Storages are versioned ordered maps. A transaction reads the
//! latest committed state, records the version of everything it read,
//! and buffers its writes; commit validates the read set under a
//! single commit lock: the first committer wins and later conflicting
//! committers fail with a retryable error. Every commit appends to a
//! virtual log whose sequence number doubles as the durability
//! marker; by default the durability callback fires inline as each
//! commit "persists".

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::err::Error;
use crate::kvs::api::{
	DurabilityCallback, DurabilityMarker, EngineTransaction, Key, PutOperation, StorageEngine,
	TransactionType, Val,
};

/// A versioned entry in a storage map.
#[derive(Clone)]
struct Entry {
	value: Val,
	version: u64,
}

#[derive(Default)]
struct Storage {
	options: Val,
	entries: BTreeMap<Key, Entry>,
}

/// The in-memory storage engine.
pub struct Datastore {
	storages: RwLock<HashMap<String, Storage>>,
	/// The global version counter; bumped on every commit
	version: AtomicU64,
	/// Serializes commit validation and apply
	commit_lock: Mutex<()>,
	/// The virtual log sequence, used as the durability marker
	log_sequence: AtomicU64,
	callback: Mutex<Option<DurabilityCallback>>,
	/// When enabled, the durability callback fires inline on commit
	auto_durability: AtomicBool,
}

impl Datastore {
	/// Open a new in-memory datastore.
	pub fn new() -> Arc<Self> {
		Arc::new(Self {
			storages: RwLock::new(HashMap::new()),
			version: AtomicU64::new(0),
			commit_lock: Mutex::new(()),
			log_sequence: AtomicU64::new(0),
			callback: Mutex::new(None),
			auto_durability: AtomicBool::new(true),
		})
	}

	/// Control whether the durability callback fires inline on commit.
	/// Disabled by durability tests that drive markers by hand.
	pub fn set_auto_durability(&self, enabled: bool) {
		self.auto_durability.store(enabled, Ordering::Release);
	}

	/// Invoke the durability callback with the given marker, as the
	/// storage layer does when a log prefix persists.
	pub fn notify_durability(&self, marker: DurabilityMarker) {
		if let Some(callback) = self.callback.lock().as_ref() {
			callback(marker);
		}
	}

	/// The highest durability marker issued so far.
	pub fn current_marker(&self) -> DurabilityMarker {
		self.log_sequence.load(Ordering::Acquire)
	}
}

impl StorageEngine for Arc<Datastore> {
	fn create_storage(&self, name: &str, options: Val) -> Result<(), Error> {
		let mut storages = self.storages.write();
		if storages.contains_key(name) {
			return Err(Error::AlreadyExists);
		}
		trace!("creating storage {name}");
		storages.insert(
			name.to_owned(),
			Storage {
				options,
				entries: BTreeMap::new(),
			},
		);
		Ok(())
	}

	fn storage_options(&self, name: &str) -> Result<Option<Val>, Error> {
		Ok(self.storages.read().get(name).map(|s| s.options.clone()))
	}

	fn drop_storage(&self, name: &str) -> Result<(), Error> {
		match self.storages.write().remove(name) {
			Some(_) => Ok(()),
			None => Err(Error::NotFound),
		}
	}

	fn begin(&self, kind: TransactionType) -> Result<Box<dyn EngineTransaction>, Error> {
		Ok(Box::new(begin(self, kind)))
	}

	fn register_durability_callback(&self, callback: DurabilityCallback) {
		*self.callback.lock() = Some(callback);
	}
}

/// The write buffered by a transaction for one key.
enum Write {
	Put(Val, PutOperation),
	Remove,
}

/// An in-memory transaction.
pub struct Transaction {
	ds: Arc<Datastore>,
	write: bool,
	done: bool,
	/// Keys read, with the version observed, for commit validation
	reads: Vec<(String, Key, u64)>,
	/// Buffered writes in key order per storage
	writes: BTreeMap<(String, Key), Write>,
}

impl Transaction {
	fn ensure_open(&self) -> Result<(), Error> {
		if self.done {
			return Err(Error::TxFinished);
		}
		Ok(())
	}
}

impl Drop for Transaction {
	fn drop(&mut self) {
		if !self.done && self.write {
			warn!("a transaction was dropped without being committed or cancelled");
		}
	}
}

impl EngineTransaction for Transaction {
	fn writeable(&self) -> bool {
		self.write
	}

	fn get(&mut self, storage: &str, key: &[u8]) -> Result<Option<Val>, Error> {
		self.ensure_open()?;
		// Read through the write buffer first
		if let Some(write) = self.writes.get(&(storage.to_owned(), key.to_vec())) {
			return Ok(match write {
				Write::Put(val, _) => Some(val.clone()),
				Write::Remove => None,
			});
		}
		let storages = self.ds.storages.read();
		let map = storages.get(storage).ok_or(Error::NotFound)?;
		match map.entries.get(key) {
			Some(entry) => {
				self.reads.push((storage.to_owned(), key.to_vec(), entry.version));
				Ok(Some(entry.value.clone()))
			}
			None => {
				self.reads.push((storage.to_owned(), key.to_vec(), 0));
				Ok(None)
			}
		}
	}

	fn put(&mut self, storage: &str, key: Key, val: Val, op: PutOperation) -> Result<(), Error> {
		self.ensure_open()?;
		if !self.write {
			return Err(Error::TxReadonly);
		}
		if !self.ds.storages.read().contains_key(storage) {
			return Err(Error::NotFound);
		}
		self.writes.insert((storage.to_owned(), key), Write::Put(val, op));
		Ok(())
	}

	fn remove(&mut self, storage: &str, key: &[u8]) -> Result<bool, Error> {
		self.ensure_open()?;
		if !self.write {
			return Err(Error::TxReadonly);
		}
		let existed = self.get(storage, key)?.is_some();
		self.writes.insert((storage.to_owned(), key.to_vec()), Write::Remove);
		Ok(existed)
	}

	fn scan(
		&mut self,
		storage: &str,
		range: (Bound<Key>, Bound<Key>),
		limit: Option<u32>,
	) -> Result<Vec<(Key, Val)>, Error> {
		self.ensure_open()?;
		let storages = self.ds.storages.read();
		let map = storages.get(storage).ok_or(Error::NotFound)?;
		// Merge the committed range with our own buffered writes so
		// the scan sees the transaction's view in key order
		let mut merged: BTreeMap<Key, Option<Val>> = BTreeMap::new();
		for (key, entry) in map.entries.range((range.0.clone(), range.1.clone())) {
			self.reads.push((storage.to_owned(), key.clone(), entry.version));
			merged.insert(key.clone(), Some(entry.value.clone()));
		}
		let low = match &range.0 {
			Bound::Included(k) => Bound::Included((storage.to_owned(), k.clone())),
			Bound::Excluded(k) => Bound::Excluded((storage.to_owned(), k.clone())),
			Bound::Unbounded => Bound::Included((storage.to_owned(), Vec::new())),
		};
		let high = match &range.1 {
			Bound::Included(k) => Bound::Included((storage.to_owned(), k.clone())),
			Bound::Excluded(k) => Bound::Excluded((storage.to_owned(), k.clone())),
			Bound::Unbounded => Bound::Excluded((format!("{storage}\u{0}"), Vec::new())),
		};
		for ((_, key), write) in self.writes.range((low, high)) {
			match write {
				Write::Put(val, _) => merged.insert(key.clone(), Some(val.clone())),
				Write::Remove => merged.insert(key.clone(), None),
			};
		}
		let mut out = Vec::new();
		for (key, value) in merged {
			if let Some(value) = value {
				out.push((key, value));
				if let Some(limit) = limit {
					if out.len() >= limit as usize {
						break;
					}
				}
			}
		}
		Ok(out)
	}

	fn commit(&mut self) -> Result<DurabilityMarker, Error> {
		self.ensure_open()?;
		self.done = true;
		let guard = self.ds.commit_lock.lock();
		let mut storages = self.ds.storages.write();
		// Validate every read against the current committed state
		for (storage, key, seen) in &self.reads {
			let current = storages
				.get(storage)
				.and_then(|map| map.entries.get(key))
				.map(|entry| entry.version)
				.unwrap_or(0);
			if current != *seen {
				return Err(Error::TxRetryable);
			}
		}
		// Validate create-only and update-only puts
		for ((storage, key), write) in &self.writes {
			if let Write::Put(_, op) = write {
				let exists = storages
					.get(storage)
					.map(|map| map.entries.contains_key(key))
					.unwrap_or(false);
				match op {
					PutOperation::Create if exists => return Err(Error::TxKeyAlreadyExists),
					PutOperation::Update if !exists => return Err(Error::NotFound),
					_ => {}
				}
			}
		}
		// Apply the write set under a fresh version
		let version = self.ds.version.fetch_add(1, Ordering::AcqRel) + 1;
		for ((storage, key), write) in std::mem::take(&mut self.writes) {
			let Some(map) = storages.get_mut(&storage) else {
				continue;
			};
			match write {
				Write::Put(value, _) => {
					map.entries.insert(
						key,
						Entry {
							value,
							version,
						},
					);
				}
				Write::Remove => {
					map.entries.remove(&key);
				}
			}
		}
		drop(storages);
		drop(guard);
		// Append to the virtual log and report durability
		let marker = self.ds.log_sequence.fetch_add(1, Ordering::AcqRel) + 1;
		if self.ds.auto_durability.load(Ordering::Acquire) {
			self.ds.notify_durability(marker);
		}
		Ok(marker)
	}

	fn rollback(&mut self) -> Result<(), Error> {
		self.ensure_open()?;
		self.done = true;
		self.writes.clear();
		self.reads.clear();
		Ok(())
	}
}

/// Begin a transaction against an in-memory datastore.
pub fn begin(ds: &Arc<Datastore>, kind: TransactionType) -> Transaction {
	let write = !matches!(kind, TransactionType::ReadOnly);
	Transaction {
		ds: ds.clone(),
		write,
		done: false,
		reads: Vec::new(),
		writes: BTreeMap::new(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn committed_writes_become_visible() {
		let ds = Datastore::new();
		ds.create_storage("t", Vec::new()).unwrap();
		let mut setup = begin(&ds, TransactionType::Occ);
		setup.put("t", b"k".to_vec(), b"v1".to_vec(), PutOperation::Upsert).unwrap();
		setup.commit().unwrap();
		let mut reader = begin(&ds, TransactionType::ReadOnly);
		assert_eq!(reader.get("t", b"k").unwrap(), Some(b"v1".to_vec()));
		reader.rollback().unwrap();
	}

	#[test]
	fn conflicting_commit_is_retryable() {
		let ds = Datastore::new();
		ds.create_storage("t", Vec::new()).unwrap();
		let mut seed = begin(&ds, TransactionType::Occ);
		seed.put("t", b"k".to_vec(), b"v0".to_vec(), PutOperation::Upsert).unwrap();
		seed.commit().unwrap();
		// Two writers read the same version then both write
		let mut a = begin(&ds, TransactionType::Occ);
		let mut b = begin(&ds, TransactionType::Occ);
		a.get("t", b"k").unwrap();
		b.get("t", b"k").unwrap();
		a.put("t", b"k".to_vec(), b"va".to_vec(), PutOperation::Upsert).unwrap();
		b.put("t", b"k".to_vec(), b"vb".to_vec(), PutOperation::Upsert).unwrap();
		a.commit().unwrap();
		assert!(matches!(b.commit().unwrap_err(), Error::TxRetryable));
	}

	#[test]
	fn create_put_fails_on_existing_key() {
		let ds = Datastore::new();
		ds.create_storage("t", Vec::new()).unwrap();
		let mut a = begin(&ds, TransactionType::Occ);
		a.put("t", b"k".to_vec(), b"v".to_vec(), PutOperation::Create).unwrap();
		a.commit().unwrap();
		let mut b = begin(&ds, TransactionType::Occ);
		b.put("t", b"k".to_vec(), b"v2".to_vec(), PutOperation::Create).unwrap();
		assert!(matches!(b.commit().unwrap_err(), Error::TxKeyAlreadyExists));
	}

	#[test]
	fn scans_merge_buffered_writes_in_key_order() {
		let ds = Datastore::new();
		ds.create_storage("t", Vec::new()).unwrap();
		let mut seed = begin(&ds, TransactionType::Occ);
		for k in [b"b".to_vec(), b"d".to_vec()] {
			seed.put("t", k.clone(), k, PutOperation::Upsert).unwrap();
		}
		seed.commit().unwrap();
		let mut tx = begin(&ds, TransactionType::Occ);
		tx.put("t", b"c".to_vec(), b"c".to_vec(), PutOperation::Upsert).unwrap();
		tx.remove("t", b"d").unwrap();
		let keys: Vec<Key> = tx
			.scan("t", (Bound::Unbounded, Bound::Unbounded), None)
			.unwrap()
			.into_iter()
			.map(|(k, _)| k)
			.collect();
		assert_eq!(keys, vec![b"b".to_vec(), b"c".to_vec()]);
		tx.rollback().unwrap();
	}

	#[test]
	fn bounded_scans_respect_the_range() {
		let ds = Datastore::new();
		ds.create_storage("t", Vec::new()).unwrap();
		let mut seed = begin(&ds, TransactionType::Occ);
		for k in 0u8..10 {
			seed.put("t", vec![k], vec![k], PutOperation::Upsert).unwrap();
		}
		seed.commit().unwrap();
		let mut tx = begin(&ds, TransactionType::ReadOnly);
		let out = tx
			.scan("t", (Bound::Included(vec![2]), Bound::Excluded(vec![5])), Some(2))
			.unwrap();
		assert_eq!(out.len(), 2);
		assert_eq!(out[0].0, vec![2]);
		assert_eq!(out[1].0, vec![3]);
		tx.rollback().unwrap();
	}

	#[test]
	fn markers_increase_monotonically() {
		let ds = Datastore::new();
		ds.create_storage("t", Vec::new()).unwrap();
		let mut last = 0;
		for i in 0..5u8 {
			let mut tx = begin(&ds, TransactionType::Occ);
			tx.put("t", vec![i], vec![i], PutOperation::Upsert).unwrap();
			let marker = tx.commit().unwrap();
			assert!(marker > last);
			last = marker;
		}
		assert_eq!(ds.current_marker(), last);
	}
}
