use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use uuid::Uuid;

use crate::ctx::Reason;
use crate::err::{CancelReason, Error, ErrorInfo};

/// A shared request context.
pub type Context = Arc<RequestContext>;

/// The per-request execution context. One context exists per job; the
/// scheduler, every operator task and the transaction bridge observe
/// cancellation and record failures through it.
pub struct RequestContext {
	/// When the request started
	started: Instant,
	/// An optional deadline
	deadline: Option<Instant>,
	/// Whether this request is cancelled
	cancelled: AtomicBool,
	/// Why this request was cancelled, once it is
	cancel_reason: Mutex<Option<CancelReason>>,
	/// The first error recorded against the request
	error: Mutex<Option<ErrorInfo>>,
	/// The session that issued the request
	session_id: Uuid,
	/// The global zone offset applied to zoneless temporal casts
	zone_offset_minutes: i16,
	/// Whether the request was flagged lightweight by the caller
	lightweight: bool,
}

impl RequestContext {
	/// Create a background context with no deadline.
	pub fn background() -> Self {
		Self {
			started: Instant::now(),
			deadline: None,
			cancelled: AtomicBool::new(false),
			cancel_reason: Mutex::new(None),
			error: Mutex::new(None),
			session_id: Uuid::new_v4(),
			zone_offset_minutes: 0,
			lightweight: false,
		}
	}

	/// Create a context for a session with an optional timeout.
	pub fn new(session_id: Uuid, timeout: Option<Duration>) -> Self {
		let started = Instant::now();
		Self {
			started,
			deadline: timeout.map(|t| started + t),
			session_id,
			..Self::background()
		}
	}

	/// Flag the request as lightweight, routing it to the serial
	/// scheduler under the hybrid policy.
	pub fn with_lightweight(mut self, lightweight: bool) -> Self {
		self.lightweight = lightweight;
		self
	}

	/// Set the global zone offset snapshot for this request.
	pub fn with_zone_offset(mut self, minutes: i16) -> Self {
		self.zone_offset_minutes = minutes;
		self
	}

	/// When the request started.
	pub fn started(&self) -> Instant {
		self.started
	}

	/// The session that issued the request.
	pub fn session_id(&self) -> Uuid {
		self.session_id
	}

	/// The global zone offset applied to zoneless temporal casts.
	pub fn zone_offset_minutes(&self) -> i16 {
		self.zone_offset_minutes
	}

	/// Whether the request was flagged lightweight.
	pub fn is_lightweight(&self) -> bool {
		self.lightweight
	}

	/// Cancel the request. The first reason wins; tasks observe the
	/// flag on entry and short-circuit to completion.
	pub fn cancel(&self, reason: CancelReason) {
		let mut slot = self.cancel_reason.lock();
		if slot.is_none() {
			*slot = Some(reason);
		}
		self.cancelled.store(true, Ordering::Release);
	}

	/// Whether the request is cancelled.
	pub fn is_cancelled(&self) -> bool {
		self.cancelled.load(Ordering::Acquire)
	}

	/// Check the deadline against the current time, raising the cancel
	/// flag on expiry. Returns the done reason, if any.
	pub fn check_deadline(&self) -> Option<Reason> {
		if self.is_cancelled() {
			return self.done_reason();
		}
		if let Some(deadline) = self.deadline {
			if Instant::now() >= deadline {
				trace!("request deadline elapsed after {:?}", self.started.elapsed());
				self.cancel(CancelReason::Deadline);
				return Some(Reason::Timedout);
			}
		}
		None
	}

	/// The reason the context is done, if it is.
	pub fn done_reason(&self) -> Option<Reason> {
		if !self.is_cancelled() {
			return None;
		}
		match *self.cancel_reason.lock() {
			Some(CancelReason::Deadline) => Some(Reason::Timedout),
			Some(reason) => Some(Reason::Canceled(reason)),
			None => Some(Reason::Canceled(CancelReason::User)),
		}
	}

	/// Return an error if the context is no longer ok to continue.
	pub fn ensure_ok(&self) -> Result<(), Error> {
		match self.done_reason() {
			None => Ok(()),
			Some(Reason::Timedout) => Err(Error::Cancelled {
				reason: CancelReason::Deadline,
			}),
			Some(Reason::Canceled(reason)) => Err(Error::Cancelled {
				reason,
			}),
		}
	}

	/// Record an error against the request. The first error wins;
	/// later errors are logged and dropped.
	pub fn record_error(&self, info: ErrorInfo) {
		let mut slot = self.error.lock();
		if slot.is_none() {
			*slot = Some(info);
		} else {
			debug!("dropping secondary request error: {info}");
		}
	}

	/// Whether an error has been recorded.
	pub fn has_error(&self) -> bool {
		self.error.lock().is_some()
	}

	/// Take the recorded error out of the context.
	pub fn take_error(&self) -> Option<ErrorInfo> {
		self.error.lock().take()
	}

	/// Run a closure against the recorded error, if any.
	pub fn with_error<T>(&self, f: impl FnOnce(&ErrorInfo) -> T) -> Option<T> {
		self.error.lock().as_ref().map(f)
	}
}

impl Default for RequestContext {
	fn default() -> Self {
		Self::background()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn first_cancel_reason_wins() {
		let ctx = RequestContext::background();
		ctx.cancel(CancelReason::User);
		ctx.cancel(CancelReason::Deadline);
		assert_eq!(ctx.done_reason(), Some(Reason::Canceled(CancelReason::User)));
	}

	#[test]
	fn expired_deadline_raises_cancel() {
		let ctx = RequestContext::new(Uuid::new_v4(), Some(Duration::from_millis(0)));
		std::thread::sleep(Duration::from_millis(2));
		assert_eq!(ctx.check_deadline(), Some(Reason::Timedout));
		assert!(ctx.is_cancelled());
		assert!(matches!(
			ctx.ensure_ok(),
			Err(Error::Cancelled {
				reason: CancelReason::Deadline
			})
		));
	}

	#[test]
	fn first_error_wins() {
		let ctx = RequestContext::background();
		ctx.record_error(error_info!(Error::NotFound));
		ctx.record_error(error_info!(Error::Timeout));
		let taken = ctx.take_error().unwrap();
		assert!(matches!(taken.error(), Error::NotFound));
		assert!(ctx.take_error().is_none());
	}
}
