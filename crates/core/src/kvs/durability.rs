//! The durability bridge between the storage layer's log and the
//! transactions waiting for a `Stored` commit response.
//!
//! The storage layer invokes the durability callback with a
//! monotonically increasing marker as a prefix of its log persists.
//! The manager keeps a wait-list keyed by each transaction's commit
//! marker; on every callback it fans completion notifications out to
//! all waiters whose marker is covered. The fan-out runs as a
//! scheduled task when a submitter is installed, keeping the callback
//! itself cheap and re-entrant.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::cnf::DURABILITY_IDLE_INLINE;
use crate::err::{CancelReason, Error};
use crate::kvs::api::DurabilityMarker;
use crate::kvs::tx::{CommitTicket, TransactionContext, TxState};

/// A function which schedules the fan-out body onto the scheduler as
/// an `AsyncCommon` task.
pub type Submitter = Arc<dyn Fn(Box<dyn FnOnce() + Send>) + Send + Sync>;

struct Waiter {
	marker: DurabilityMarker,
	tx: Arc<TransactionContext>,
	sender: async_channel::Sender<Result<(), Error>>,
	cancelled: Arc<AtomicBool>,
}

/// The durability manager: the current marker plus the wait-list.
pub struct DurabilityManager {
	/// The highest marker reported by the storage layer
	current: AtomicU64,
	waiters: Mutex<Vec<Waiter>>,
	submitter: Mutex<Option<Submitter>>,
	/// Transactions whose stored response has fired, in firing order,
	/// recorded under the originating session
	stored_log: Mutex<Vec<(Uuid, u64)>>,
}

impl DurabilityManager {
	/// Create a manager with no marker reported yet.
	pub fn new() -> Arc<Self> {
		Arc::new(Self {
			current: AtomicU64::new(0),
			waiters: Mutex::new(Vec::new()),
			submitter: Mutex::new(None),
			stored_log: Mutex::new(Vec::new()),
		})
	}

	/// Install the task submitter used to run fan-outs off the
	/// storage callback thread.
	pub fn set_submitter(&self, submitter: Submitter) {
		*self.submitter.lock() = Some(submitter);
	}

	/// The highest marker reported so far.
	pub fn current_marker(&self) -> DurabilityMarker {
		self.current.load(Ordering::Acquire)
	}

	/// Register a committed transaction waiting for its marker to
	/// persist. Resolves immediately when the marker is already
	/// covered.
	pub fn register(
		self: &Arc<Self>,
		tx: Arc<TransactionContext>,
		marker: DurabilityMarker,
	) -> CommitTicket {
		let (sender, receiver) = async_channel::bounded(1);
		if marker <= self.current_marker() {
			self.fire_stored(&tx);
			let _ = sender.send_blocking(Ok(()));
			return CommitTicket::pending(receiver, marker);
		}
		self.waiters.lock().push(Waiter {
			marker,
			tx,
			sender,
			cancelled: Arc::new(AtomicBool::new(false)),
		});
		CommitTicket::pending(receiver, marker)
	}

	/// Flag the waiter of a transaction for cancellation; its stored
	/// response fires cancelled on the next callback.
	pub fn cancel_waiter(&self, tx_id: u64) {
		for waiter in self.waiters.lock().iter() {
			if waiter.tx.id() == tx_id {
				waiter.cancelled.store(true, Ordering::Release);
			}
		}
	}

	/// The storage layer durability callback entry point.
	pub fn notify(self: &Arc<Self>, marker: DurabilityMarker) {
		// With no waiter registered and idle optimization on, advance
		// the marker inline without scheduling anything
		if *DURABILITY_IDLE_INLINE && self.waiters.lock().is_empty() {
			self.advance_marker(marker);
			return;
		}
		let manager = self.clone();
		let body: Box<dyn FnOnce() + Send> = Box::new(move || manager.fan_out(marker));
		let submitter = self.submitter.lock().clone();
		match submitter {
			Some(submit) => submit(body),
			None => body(),
		}
	}

	/// CAS-advance the current marker; concurrent callbacks may race
	/// and the highest marker wins.
	fn advance_marker(&self, marker: DurabilityMarker) {
		let mut current = self.current.load(Ordering::Acquire);
		while marker > current {
			match self.current.compare_exchange(
				current,
				marker,
				Ordering::AcqRel,
				Ordering::Acquire,
			) {
				Ok(_) => break,
				Err(observed) => current = observed,
			}
		}
	}

	/// The fan-out body, run as an `AsyncCommon` task.
	fn fan_out(&self, marker: DurabilityMarker) {
		// First cancel any waiter marked for cancellation
		let mut waiters = self.waiters.lock();
		waiters.retain(|waiter| {
			if waiter.cancelled.load(Ordering::Acquire) {
				let _ = waiter.sender.send_blocking(Err(Error::Cancelled {
					reason: CancelReason::User,
				}));
				false
			} else {
				true
			}
		});
		// Advance the marker, then fire every covered waiter in
		// marker order
		self.advance_marker(marker);
		let covered = self.current_marker();
		let mut due: Vec<Waiter> = Vec::new();
		waiters.retain_mut(|waiter| {
			if waiter.marker <= covered {
				due.push(Waiter {
					marker: waiter.marker,
					tx: waiter.tx.clone(),
					sender: waiter.sender.clone(),
					cancelled: waiter.cancelled.clone(),
				});
				false
			} else {
				true
			}
		});
		drop(waiters);
		due.sort_by_key(|waiter| waiter.marker);
		for waiter in due {
			trace!("firing stored response for transaction {}", waiter.tx.id());
			self.fire_stored(&waiter.tx);
			let _ = waiter.sender.send_blocking(Ok(()));
		}
	}

	fn fire_stored(&self, tx: &Arc<TransactionContext>) {
		tx.state().set_if(TxState::CommittedAvailable, TxState::CommittedStored);
		self.stored_log.lock().push((tx.session_id(), tx.id()));
	}

	/// The transactions whose stored response has fired, in order.
	pub fn stored_log(&self) -> Vec<(Uuid, u64)> {
		self.stored_log.lock().clone()
	}

	/// The number of registered waiters.
	pub fn waiter_count(&self) -> usize {
		self.waiters.lock().len()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::kvs::api::TransactionType;
	use crate::kvs::tx::TransactionOptions;

	fn context(id: u64) -> Arc<TransactionContext> {
		let ctx = Arc::new(TransactionContext::new(
			id,
			TransactionType::Occ,
			&TransactionOptions::occ(),
		));
		let cell = ctx.state();
		cell.set_if(TxState::Undefined, TxState::Init);
		cell.set_if(TxState::Init, TxState::Active);
		cell.set_if(TxState::Active, TxState::GoingToCommit);
		cell.set_if(TxState::GoingToCommit, TxState::CcCommitting);
		cell.set_if(TxState::CcCommitting, TxState::CommittedAvailable);
		ctx
	}

	#[test]
	fn one_callback_covers_all_lower_markers() {
		let manager = DurabilityManager::new();
		let tx1 = context(1);
		let tx2 = context(2);
		let t1 = manager.register(tx1.clone(), 1);
		let t2 = manager.register(tx2.clone(), 2);
		manager.notify(2);
		t1.wait().unwrap();
		t2.wait().unwrap();
		assert_eq!(tx1.state().get(), TxState::CommittedStored);
		assert_eq!(tx2.state().get(), TxState::CommittedStored);
		assert_eq!(manager.waiter_count(), 0);
	}

	#[test]
	fn markers_fire_in_order() {
		let manager = DurabilityManager::new();
		let tx1 = context(1);
		let tx2 = context(2);
		let t1 = manager.register(tx1.clone(), 1);
		let t2 = manager.register(tx2.clone(), 2);
		manager.notify(1);
		t1.wait().unwrap();
		assert_eq!(tx1.state().get(), TxState::CommittedStored);
		assert_eq!(tx2.state().get(), TxState::CommittedAvailable);
		manager.notify(2);
		t2.wait().unwrap();
		let log = manager.stored_log();
		assert_eq!(log[0].1, 1);
		assert_eq!(log[1].1, 2);
	}

	#[test]
	fn already_covered_markers_resolve_immediately() {
		let manager = DurabilityManager::new();
		manager.notify(10);
		assert_eq!(manager.current_marker(), 10);
		let tx = context(3);
		let ticket = manager.register(tx.clone(), 5);
		ticket.wait().unwrap();
		assert_eq!(tx.state().get(), TxState::CommittedStored);
	}

	#[test]
	fn cancelled_waiters_fire_cancelled() {
		let manager = DurabilityManager::new();
		let tx = context(4);
		let ticket = manager.register(tx.clone(), 7);
		manager.cancel_waiter(4);
		manager.notify(1);
		assert!(matches!(ticket.wait(), Err(Error::Cancelled { .. })));
		assert_eq!(manager.waiter_count(), 0);
	}

	#[test]
	fn fan_out_runs_through_the_submitter() {
		let manager = DurabilityManager::new();
		let ran = Arc::new(AtomicBool::new(false));
		let observed = ran.clone();
		manager.set_submitter(Arc::new(move |body| {
			observed.store(true, Ordering::Release);
			body();
		}));
		let tx = context(5);
		let ticket = manager.register(tx, 1);
		manager.notify(1);
		ticket.wait().unwrap();
		assert!(ran.load(Ordering::Acquire));
	}
}
