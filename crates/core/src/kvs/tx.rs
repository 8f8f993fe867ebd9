use std::collections::HashSet;
use std::ops::Bound;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::err::{Error, ErrorInfo};
use crate::kvs::api::{
	DurabilityMarker, EngineTransaction, Key, PutOperation, TransactionType, Val,
};
use crate::kvs::durability::DurabilityManager;
use crate::kvs::DatastoreInner;
use crate::val::TimePoint;

/// The state of a transaction. Transitions are guarded: only the
/// enumerated edges are permitted, and an invalid transition leaves
/// the state unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TxState {
	Undefined = 0,
	Init = 1,
	Active = 2,
	GoingToCommit = 3,
	CcCommitting = 4,
	CommittedAvailable = 5,
	CommittedStored = 6,
	GoingToAbort = 7,
	Aborted = 8,
	/// Entered on cancellation, when the outcome is not known
	Unknown = 9,
}

impl TxState {
	fn from_u8(value: u8) -> TxState {
		match value {
			1 => Self::Init,
			2 => Self::Active,
			3 => Self::GoingToCommit,
			4 => Self::CcCommitting,
			5 => Self::CommittedAvailable,
			6 => Self::CommittedStored,
			7 => Self::GoingToAbort,
			8 => Self::Aborted,
			9 => Self::Unknown,
			_ => Self::Undefined,
		}
	}

	/// Whether the edge `self -> desired` is in the transition set.
	pub fn can_transition(self, desired: TxState) -> bool {
		use TxState::*;
		matches!(
			(self, desired),
			(Undefined, Init)
				| (Init, Active)
				| (Active, GoingToCommit)
				| (GoingToCommit, CcCommitting)
				| (CcCommitting, CommittedAvailable)
				| (CommittedAvailable, CommittedStored)
				| (Active, GoingToAbort)
				| (GoingToAbort, Aborted)
				| (Active, Unknown)
		)
	}

	/// Whether a transaction in this state can run statements.
	pub fn is_active(self) -> bool {
		self == TxState::Active
	}

	/// Whether the transaction reached a terminal state.
	pub fn is_terminal(self) -> bool {
		matches!(self, TxState::CommittedStored | TxState::Aborted | TxState::Unknown)
	}
}

impl std::fmt::Display for TxState {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let name = match self {
			Self::Undefined => "undefined",
			Self::Init => "init",
			Self::Active => "active",
			Self::GoingToCommit => "going_to_commit",
			Self::CcCommitting => "cc_committing",
			Self::CommittedAvailable => "committed_available",
			Self::CommittedStored => "committed_stored",
			Self::GoingToAbort => "going_to_abort",
			Self::Aborted => "aborted",
			Self::Unknown => "unknown",
		};
		write!(f, "{name}")
	}
}

/// A CAS cell holding a transaction state.
pub struct StateCell(AtomicU8);

impl StateCell {
	/// A cell starting in the undefined state.
	pub fn new() -> Self {
		Self(AtomicU8::new(TxState::Undefined as u8))
	}

	/// The current state.
	pub fn get(&self) -> TxState {
		TxState::from_u8(self.0.load(Ordering::Acquire))
	}

	/// Transition to `desired` only when the current state equals
	/// `expected` and the edge is permitted. Returns whether the
	/// transition happened.
	pub fn set_if(&self, expected: TxState, desired: TxState) -> bool {
		if !expected.can_transition(desired) {
			return false;
		}
		self.0
			.compare_exchange(
				expected as u8,
				desired as u8,
				Ordering::AcqRel,
				Ordering::Acquire,
			)
			.is_ok()
	}

	/// Transition from whatever the current state is, when permitted.
	pub fn transition(&self, desired: TxState) -> bool {
		loop {
			let current = self.get();
			if !current.can_transition(desired) {
				return false;
			}
			if self.set_if(current, desired) {
				return true;
			}
		}
	}
}

impl Default for StateCell {
	fn default() -> Self {
		Self::new()
	}
}

/// The level at which a caller wants to be notified that its commit
/// completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CommitLevel {
	/// The commit has been enqueued
	Accepted,
	/// The commit is visible to subsequent reads
	Available,
	/// Write-ahead log durability has been reached
	Stored,
	/// Replicas have acknowledged the commit
	Propagated,
}

/// A handle resolving when a commit reaches its requested level.
#[derive(Debug)]
pub struct CommitTicket {
	receiver: async_channel::Receiver<Result<(), Error>>,
	marker: Option<DurabilityMarker>,
}

impl CommitTicket {
	fn resolved(marker: Option<DurabilityMarker>) -> Self {
		let (sender, receiver) = async_channel::bounded(1);
		let _ = sender.send_blocking(Ok(()));
		Self {
			receiver,
			marker,
		}
	}

	pub(crate) fn pending(
		receiver: async_channel::Receiver<Result<(), Error>>,
		marker: DurabilityMarker,
	) -> Self {
		Self {
			receiver,
			marker: Some(marker),
		}
	}

	/// The durability marker of the commit record, once known.
	pub fn marker(&self) -> Option<DurabilityMarker> {
		self.marker
	}

	/// Block until the requested commit level is reached.
	pub fn wait(&self) -> Result<(), Error> {
		self.receiver
			.recv_blocking()
			.map_err(|_| Error::Tx("commit response channel closed".to_owned()))?
	}
}

/// The shared context of one transaction: identity, kind, state and
/// the declarations a long transaction carries.
pub struct TransactionContext {
	id: u64,
	kind: TransactionType,
	state: StateCell,
	/// The transaction start timestamp; LOCALTIME and LOCALTIMESTAMP
	/// evaluate against it so retries see a stable value
	started_at: TimePoint,
	session_id: Uuid,
	write_preserves: Vec<String>,
	read_areas_inclusive: Vec<String>,
	read_areas_exclusive: Vec<String>,
	/// The first error recorded against the transaction
	error: Mutex<Option<ErrorInfo>>,
	/// The durability marker of the commit record, once committed
	marker: Mutex<Option<DurabilityMarker>>,
	/// Names of sequences used by this transaction, flushed at commit
	used_sequences: Mutex<HashSet<String>>,
}

impl TransactionContext {
	pub(crate) fn new(id: u64, kind: TransactionType, options: &TransactionOptions) -> Self {
		let now = chrono::Utc::now();
		Self {
			id,
			kind,
			state: StateCell::new(),
			started_at: TimePoint::new(now.timestamp(), now.timestamp_subsec_nanos()),
			session_id: options.session_id,
			write_preserves: options.write_preserves.clone(),
			read_areas_inclusive: options.read_areas_inclusive.clone(),
			read_areas_exclusive: options.read_areas_exclusive.clone(),
			error: Mutex::new(None),
			marker: Mutex::new(None),
			used_sequences: Mutex::new(HashSet::new()),
		}
	}

	/// The engine-wide transaction id.
	pub fn id(&self) -> u64 {
		self.id
	}

	/// The transaction kind.
	pub fn kind(&self) -> TransactionType {
		self.kind
	}

	/// The state cell.
	pub fn state(&self) -> &StateCell {
		&self.state
	}

	/// The transaction start timestamp.
	pub fn started_at(&self) -> TimePoint {
		self.started_at
	}

	/// The session owning the transaction.
	pub fn session_id(&self) -> Uuid {
		self.session_id
	}

	/// The declared write preserves of a long transaction.
	pub fn write_preserves(&self) -> &[String] {
		&self.write_preserves
	}

	/// The durability marker of the commit record, once committed.
	pub fn durability_marker(&self) -> Option<DurabilityMarker> {
		*self.marker.lock()
	}

	pub(crate) fn set_durability_marker(&self, marker: DurabilityMarker) {
		*self.marker.lock() = Some(marker);
	}

	/// Record the first error against this transaction and drive the
	/// state to aborted when the error is a true abort.
	pub fn record_error(&self, info: ErrorInfo) {
		if info.error().aborts_transaction() {
			self.state.transition(TxState::GoingToAbort);
			self.state.transition(TxState::Aborted);
		}
		let mut slot = self.error.lock();
		if slot.is_none() {
			*slot = Some(info);
		}
	}

	/// Whether an error has been recorded.
	pub fn has_error(&self) -> bool {
		self.error.lock().is_some()
	}

	/// Mark a sequence as used by this transaction.
	pub(crate) fn mark_sequence_used(&self, name: &str) {
		self.used_sequences.lock().insert(name.to_owned());
	}

	pub(crate) fn take_used_sequences(&self) -> Vec<String> {
		self.used_sequences.lock().drain().collect()
	}

	/// Guard a write to `table` against the transaction kind and the
	/// preserve declarations of other long transactions.
	pub(crate) fn check_write(&self, table: &str, holders: &[u64]) -> Result<(), Error> {
		match self.kind {
			TransactionType::ReadOnly => {
				return Err(Error::IllegalOperation(
					"a read only transaction cannot write".to_owned(),
				))
			}
			TransactionType::Ltx => {
				if !self.write_preserves.iter().any(|t| t == table) {
					return Err(Error::WriteWithoutPreserve {
						table: table.to_owned(),
					});
				}
			}
			TransactionType::Occ => {}
		}
		// A write into an area preserved by another long transaction
		// is rejected with a distinct code
		if holders.iter().any(|id| *id != self.id) {
			return Err(Error::WritePreserveConflict {
				table: table.to_owned(),
			});
		}
		Ok(())
	}

	/// Guard a read of `table` against the declared read areas.
	pub(crate) fn check_read(&self, table: &str) -> Result<(), Error> {
		if self.read_areas_exclusive.iter().any(|t| t == table) {
			return Err(Error::ReadAreaViolation {
				table: table.to_owned(),
			});
		}
		if !self.read_areas_inclusive.is_empty()
			&& !self.read_areas_inclusive.iter().any(|t| t == table)
		{
			return Err(Error::ReadAreaViolation {
				table: table.to_owned(),
			});
		}
		Ok(())
	}
}

/// The options a transaction is begun with.
#[derive(Debug, Clone)]
pub struct TransactionOptions {
	pub kind: TransactionType,
	pub session_id: Uuid,
	pub write_preserves: Vec<String>,
	pub read_areas_inclusive: Vec<String>,
	pub read_areas_exclusive: Vec<String>,
}

impl TransactionOptions {
	/// Options for an optimistic short transaction.
	pub fn occ() -> Self {
		Self {
			kind: TransactionType::Occ,
			session_id: Uuid::new_v4(),
			write_preserves: Vec::new(),
			read_areas_inclusive: Vec::new(),
			read_areas_exclusive: Vec::new(),
		}
	}

	/// Options for a long transaction preserving the given tables.
	pub fn ltx(write_preserves: Vec<String>) -> Self {
		Self {
			kind: TransactionType::Ltx,
			write_preserves,
			..Self::occ()
		}
	}

	/// Options for a read-only transaction.
	pub fn read_only() -> Self {
		Self {
			kind: TransactionType::ReadOnly,
			..Self::occ()
		}
	}

	/// Narrow the readable tables.
	pub fn with_read_areas(mut self, inclusive: Vec<String>, exclusive: Vec<String>) -> Self {
		self.read_areas_inclusive = inclusive;
		self.read_areas_exclusive = exclusive;
		self
	}
}

/// An engine-level transaction: the backend transaction plus the
/// transaction context, preserve bookkeeping and the durability
/// bridge.
pub struct Transaction {
	inner: Mutex<Box<dyn EngineTransaction>>,
	context: Arc<TransactionContext>,
	ds: Arc<DatastoreInner>,
}

impl std::fmt::Debug for Transaction {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Transaction").finish_non_exhaustive()
	}
}

impl Transaction {
	pub(crate) fn new(
		inner: Box<dyn EngineTransaction>,
		context: Arc<TransactionContext>,
		ds: Arc<DatastoreInner>,
	) -> Self {
		let cell = context.state();
		cell.set_if(TxState::Undefined, TxState::Init);
		cell.set_if(TxState::Init, TxState::Active);
		Self {
			inner: Mutex::new(inner),
			context,
			ds,
		}
	}

	/// The shared transaction context.
	pub fn context(&self) -> &Arc<TransactionContext> {
		&self.context
	}

	fn ensure_active(&self) -> Result<(), Error> {
		if !self.context.state().get().is_active() {
			return Err(Error::InactiveTransaction);
		}
		Ok(())
	}

	/// Fetch a key from a table's storage.
	pub fn get(&self, table: &str, key: &[u8]) -> Result<Option<Val>, Error> {
		self.ensure_active()?;
		self.context.check_read(table)?;
		self.inner.lock().get(table, key)
	}

	/// Insert or update a key in a table's storage.
	pub fn put(&self, table: &str, key: Key, val: Val, op: PutOperation) -> Result<(), Error> {
		self.ensure_active()?;
		self.context.check_write(table, &self.ds.preserve_holders(table))?;
		self.inner.lock().put(table, key, val, op)
	}

	/// Delete a key from a table's storage.
	pub fn remove(&self, table: &str, key: &[u8]) -> Result<bool, Error> {
		self.ensure_active()?;
		self.context.check_write(table, &self.ds.preserve_holders(table))?;
		self.inner.lock().remove(table, key)
	}

	/// Scan an ordered key range of a table's storage.
	pub fn scan(
		&self,
		table: &str,
		range: (Bound<Key>, Bound<Key>),
		limit: Option<u32>,
	) -> Result<Vec<(Key, Val)>, Error> {
		self.ensure_active()?;
		self.context.check_read(table)?;
		self.inner.lock().scan(table, range, limit)
	}

	/// Commit the transaction, resolving the returned ticket at the
	/// requested response level.
	pub fn commit(&self, level: CommitLevel) -> Result<CommitTicket, Error> {
		self.ensure_active()?;
		// Flush sequence state into the system storage first, so used
		// sequences persist with the transaction
		self.ds.flush_sequences(&self.context, &mut **self.inner.lock())?;
		let marker = {
			let mut inner = self.inner.lock();
			match inner.commit() {
				Ok(marker) => marker,
				Err(error) => {
					// Commit validation failed; the transaction aborts
					let cell = self.context.state();
					cell.transition(TxState::GoingToAbort);
					cell.transition(TxState::Aborted);
					self.ds.release_preserves(&self.context);
					return Err(error);
				}
			}
		};
		// Walk the commit states now the write set is applied
		let cell = self.context.state();
		cell.transition(TxState::GoingToCommit);
		cell.transition(TxState::CcCommitting);
		cell.transition(TxState::CommittedAvailable);
		self.context.set_durability_marker(marker);
		self.ds.release_preserves(&self.context);
		trace!("transaction {} committed with marker {marker}", self.context.id());
		match level {
			CommitLevel::Accepted | CommitLevel::Available => Ok(CommitTicket::resolved(Some(marker))),
			CommitLevel::Stored | CommitLevel::Propagated => {
				Ok(self.ds.durability().register(self.context.clone(), marker))
			}
		}
	}

	/// Abort the transaction and roll back its writes. Safe to call
	/// after the context already reached a terminal state: the backend
	/// write buffer is still discarded.
	pub fn abort(&self) -> Result<(), Error> {
		let cell = self.context.state();
		cell.transition(TxState::GoingToAbort);
		cell.transition(TxState::Aborted);
		self.ds.release_preserves(&self.context);
		match self.inner.lock().rollback() {
			Ok(()) => Ok(()),
			// The backend transaction was already finished
			Err(Error::TxFinished) => Ok(()),
			Err(error) => Err(error),
		}
	}

	/// Mark the transaction outcome unknown, as cancellation does when
	/// the engine can no longer tell whether the commit landed.
	pub fn mark_unknown(&self) {
		self.context.state().transition(TxState::Unknown);
		self.ds.release_preserves(&self.context);
	}

	/// The durability manager backing this transaction's store.
	pub fn durability(&self) -> &Arc<DurabilityManager> {
		self.ds.durability()
	}
}
