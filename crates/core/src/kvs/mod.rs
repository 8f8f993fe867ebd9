//! The transactional storage bridge.
//!
//! [`Datastore`] wraps a storage backend behind the [`api`] traits and
//! adds everything the engine layers on top: transaction contexts and
//! their state machine, write-preserve bookkeeping for long
//! transactions, sequence management, and the durability manager that
//! fans out `Stored` commit responses as the storage log persists.

pub mod api;
pub mod durability;
#[cfg(feature = "kv-mem")]
pub mod mem;
pub mod sequences;
pub mod tx;

pub use api::{
	DurabilityMarker, EngineTransaction, Key, PutOperation, StorageEngine, TransactionType, Val,
};
pub use durability::DurabilityManager;
pub use sequences::{SequenceDef, Sequences};
pub use tx::{
	CommitLevel, CommitTicket, StateCell, Transaction, TransactionContext, TransactionOptions,
	TxState,
};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::cnf::SYSTEM_STORAGE_NAME;
use crate::err::Error;

/// The shared internals of a datastore, held by every live
/// transaction.
pub struct DatastoreInner {
	engine: Box<dyn StorageEngine>,
	durability: Arc<DurabilityManager>,
	sequences: Sequences,
	/// Which transactions hold a write preserve on each table
	preserves: Mutex<HashMap<String, Vec<u64>>>,
	tx_counter: AtomicU64,
}

impl DatastoreInner {
	/// The transactions holding a write preserve on `table`.
	pub(crate) fn preserve_holders(&self, table: &str) -> Vec<u64> {
		self.preserves.lock().get(table).cloned().unwrap_or_default()
	}

	/// Register the write preserves of a beginning long transaction.
	/// Fails when another transaction already holds one of the tables.
	fn register_preserves(&self, ctx: &TransactionContext) -> Result<(), Error> {
		let mut preserves = self.preserves.lock();
		for table in ctx.write_preserves() {
			if preserves.get(table).map(|holders| !holders.is_empty()).unwrap_or(false) {
				return Err(Error::WaitingForOtherTransaction);
			}
		}
		for table in ctx.write_preserves() {
			preserves.entry(table.clone()).or_default().push(ctx.id());
		}
		Ok(())
	}

	/// Release every preserve held by a finishing transaction.
	pub(crate) fn release_preserves(&self, ctx: &Arc<TransactionContext>) {
		let mut preserves = self.preserves.lock();
		for holders in preserves.values_mut() {
			holders.retain(|id| *id != ctx.id());
		}
		preserves.retain(|_, holders| !holders.is_empty());
	}

	/// Flush the sequences used by a committing transaction.
	pub(crate) fn flush_sequences(
		&self,
		ctx: &TransactionContext,
		engine_tx: &mut dyn EngineTransaction,
	) -> Result<(), Error> {
		self.sequences.flush(ctx, engine_tx)
	}

	/// The durability manager of this datastore.
	pub(crate) fn durability(&self) -> &Arc<DurabilityManager> {
		&self.durability
	}
}

/// An engine-level datastore handle.
#[derive(Clone)]
pub struct Datastore {
	inner: Arc<DatastoreInner>,
}

impl Datastore {
	/// Open a datastore over an in-memory backend. The system storage
	/// is created on first start if absent and sequence state is
	/// restored from it.
	#[cfg(feature = "kv-mem")]
	pub fn new_memory() -> Result<Self, Error> {
		let backend = mem::Datastore::new();
		Self::new(Box::new(backend))
	}

	/// Open a datastore over an arbitrary backend.
	pub fn new(engine: Box<dyn StorageEngine>) -> Result<Self, Error> {
		let durability = DurabilityManager::new();
		{
			let durability = durability.clone();
			engine.register_durability_callback(Box::new(move |marker| {
				durability.notify(marker);
			}));
		}
		let ds = Self {
			inner: Arc::new(DatastoreInner {
				engine,
				durability,
				sequences: Sequences::new(),
				preserves: Mutex::new(HashMap::new()),
				tx_counter: AtomicU64::new(0),
			}),
		};
		ds.ensure_system_storage()?;
		Ok(ds)
	}

	/// Create the system storage if it does not exist yet and restore
	/// the persisted sequence state.
	fn ensure_system_storage(&self) -> Result<(), Error> {
		if self.inner.engine.storage_options(SYSTEM_STORAGE_NAME)?.is_none() {
			info!("creating the system storage on first start");
			self.inner.engine.create_storage(SYSTEM_STORAGE_NAME, Vec::new())?;
		}
		let mut tx = self.inner.engine.begin(TransactionType::ReadOnly)?;
		self.inner.sequences.load(&mut *tx)?;
		tx.rollback()?;
		Ok(())
	}

	/// Begin a transaction with the given options.
	pub fn transaction(&self, options: TransactionOptions) -> Result<Transaction, Error> {
		let id = self.inner.tx_counter.fetch_add(1, Ordering::AcqRel) + 1;
		let context = Arc::new(TransactionContext::new(id, options.kind, &options));
		if options.kind == TransactionType::Ltx {
			self.inner.register_preserves(&context)?;
		}
		let inner = self.inner.engine.begin(options.kind)?;
		trace!("beginning {:?} transaction {id}", options.kind);
		Ok(Transaction::new(inner, context, self.inner.clone()))
	}

	/// Create a storage for a table, embedding the serialized schema
	/// payload in the storage options.
	pub fn create_storage(&self, name: &str, options: Val) -> Result<(), Error> {
		self.inner.engine.create_storage(name, options)
	}

	/// The options payload a storage was created with.
	pub fn storage_options(&self, name: &str) -> Result<Option<Val>, Error> {
		self.inner.engine.storage_options(name)
	}

	/// Drop a storage and its contents.
	pub fn drop_storage(&self, name: &str) -> Result<(), Error> {
		self.inner.engine.drop_storage(name)
	}

	/// The sequence manager.
	pub fn sequences(&self) -> &Sequences {
		&self.inner.sequences
	}

	/// The durability manager.
	pub fn durability(&self) -> &Arc<DurabilityManager> {
		&self.inner.durability
	}
}

#[cfg(all(test, feature = "kv-mem"))]
mod tests {
	use super::*;

	#[test]
	fn system_storage_is_created_on_first_start() {
		let ds = Datastore::new_memory().unwrap();
		assert!(ds.storage_options(SYSTEM_STORAGE_NAME).unwrap().is_some());
	}

	#[test]
	fn ltx_preserves_block_other_ltx_begins() {
		let ds = Datastore::new_memory().unwrap();
		ds.create_storage("t", Vec::new()).unwrap();
		let a = ds.transaction(TransactionOptions::ltx(vec!["t".to_owned()])).unwrap();
		let blocked = ds.transaction(TransactionOptions::ltx(vec!["t".to_owned()]));
		assert!(matches!(blocked.unwrap_err(), Error::WaitingForOtherTransaction));
		a.abort().unwrap();
		// Once released, the preserve can be taken again
		let b = ds.transaction(TransactionOptions::ltx(vec!["t".to_owned()])).unwrap();
		b.abort().unwrap();
	}

	#[test]
	fn occ_write_into_preserved_table_conflicts() {
		let ds = Datastore::new_memory().unwrap();
		ds.create_storage("t", Vec::new()).unwrap();
		let ltx = ds.transaction(TransactionOptions::ltx(vec!["t".to_owned()])).unwrap();
		let occ = ds.transaction(TransactionOptions::occ()).unwrap();
		let err = occ
			.put("t", b"k".to_vec(), b"v".to_vec(), PutOperation::Upsert)
			.unwrap_err();
		assert!(matches!(err, Error::WritePreserveConflict { .. }));
		ltx.abort().unwrap();
		occ.abort().unwrap();
	}

	#[test]
	fn commit_walks_the_state_machine_and_stores() {
		let ds = Datastore::new_memory().unwrap();
		ds.create_storage("t", Vec::new()).unwrap();
		let tx = ds.transaction(TransactionOptions::occ()).unwrap();
		tx.put("t", b"k".to_vec(), b"v".to_vec(), PutOperation::Upsert).unwrap();
		let context = tx.context().clone();
		let ticket = tx.commit(CommitLevel::Stored).unwrap();
		ticket.wait().unwrap();
		assert_eq!(context.state().get(), TxState::CommittedStored);
		assert!(context.durability_marker().is_some());
	}

	#[test]
	fn sequences_persist_across_restart_of_the_same_backend() {
		let backend = mem::Datastore::new();
		{
			let ds = Datastore::new(Box::new(backend.clone())).unwrap();
			ds.sequences().define(SequenceDef::ascending("s")).unwrap();
			let tx = ds.transaction(TransactionOptions::occ()).unwrap();
			assert_eq!(ds.sequences().next("s", tx.context()).unwrap(), 1);
			assert_eq!(ds.sequences().next("s", tx.context()).unwrap(), 2);
			tx.commit(CommitLevel::Available).unwrap().wait().unwrap();
		}
		// A fresh engine handle over the same backend restores state
		let ds = Datastore::new(Box::new(backend)).unwrap();
		let tx = ds.transaction(TransactionOptions::occ()).unwrap();
		assert_eq!(ds.sequences().next("s", tx.context()).unwrap(), 3);
		tx.abort().unwrap();
	}
}
