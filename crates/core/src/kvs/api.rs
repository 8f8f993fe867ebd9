//! This module defines the boundary to the underlying key-value
//! storage engine.
//!
//! All keys and values are opaque byte strings; keys are ordered
//! lexicographically. Typed encoding is handled by [`crate::key`].

use std::ops::Bound;

use crate::err::Error;

/// A storage key.
pub type Key = Vec<u8>;

/// A storage value.
pub type Val = Vec<u8>;

/// The monotonic durability marker emitted by the storage layer when a
/// prefix of its log has been durably stored.
pub type DurabilityMarker = u64;

/// The kind of transaction to begin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionType {
	/// Optimistic short transaction
	Occ,
	/// Long transaction with declared write preserves
	Ltx,
	/// Read-only transaction over a stable snapshot
	ReadOnly,
}

/// How a put treats an existing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOperation {
	/// Insert or overwrite
	Upsert,
	/// Insert only; fails if the key exists
	Create,
	/// Overwrite only; fails if the key does not exist
	Update,
}

/// A callback invoked by the storage layer whenever its durability
/// marker advances.
pub type DurabilityCallback = Box<dyn Fn(DurabilityMarker) + Send + Sync>;

/// The API the engine consumes from a storage backend.
pub trait StorageEngine: Send + Sync + 'static {
	/// Create a storage with the given options payload. Fails if the
	/// storage already exists.
	fn create_storage(&self, name: &str, options: Val) -> Result<(), Error>;

	/// Whether a storage exists, returning its options payload.
	fn storage_options(&self, name: &str) -> Result<Option<Val>, Error>;

	/// Drop a storage and all its contents.
	fn drop_storage(&self, name: &str) -> Result<(), Error>;

	/// Begin a new transaction of the given type.
	fn begin(&self, kind: TransactionType) -> Result<Box<dyn EngineTransaction>, Error>;

	/// Register the durability callback. The storage layer invokes it
	/// with monotonically increasing markers as its log is persisted.
	fn register_durability_callback(&self, callback: DurabilityCallback);
}

/// A transaction over the storage backend. Reads observe the snapshot
/// taken at begin plus the transaction's own writes; commit validates
/// optimistically and fails with a retryable error on conflict.
pub trait EngineTransaction: Send {
	/// Whether the transaction can write.
	fn writeable(&self) -> bool;

	/// Fetch a key from a storage.
	fn get(&mut self, storage: &str, key: &[u8]) -> Result<Option<Val>, Error>;

	/// Insert or update a key in a storage.
	fn put(&mut self, storage: &str, key: Key, val: Val, op: PutOperation) -> Result<(), Error>;

	/// Delete a key from a storage. Returns whether the key existed.
	fn remove(&mut self, storage: &str, key: &[u8]) -> Result<bool, Error>;

	/// Retrieve an ordered range of entries from a storage. At most
	/// `limit` entries are returned when a limit is given.
	fn scan(
		&mut self,
		storage: &str,
		range: (Bound<Key>, Bound<Key>),
		limit: Option<u32>,
	) -> Result<Vec<(Key, Val)>, Error>;

	/// Commit the transaction, returning the durability marker of the
	/// commit record.
	fn commit(&mut self) -> Result<DurabilityMarker, Error>;

	/// Roll the transaction back.
	fn rollback(&mut self) -> Result<(), Error>;
}
