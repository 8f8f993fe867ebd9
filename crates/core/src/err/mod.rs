use std::io::Error as IoError;

use bincode::Error as BincodeError;
use thiserror::Error;

use crate::kvs::TxState;
use crate::rpc::StatusCode;

/// An error originating from the trellis execution engine.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
	/// The engine encountered unreachable logic
	#[error("The engine encountered unreachable logic: {0}")]
	Unreachable(String),

	/// There was a problem with the underlying datastore
	#[error("There was a problem with the underlying datastore: {0}")]
	Ds(String),

	/// There was a problem with a datastore transaction
	#[error("There was a problem with a datastore transaction: {0}")]
	Tx(String),

	/// There was an error when starting a new datastore transaction
	#[error("There was an error when starting a new datastore transaction")]
	TxFailure,

	/// The transaction was already cancelled or committed
	#[error("Couldn't update a finished transaction")]
	TxFinished,

	/// The current transaction was created as read-only
	#[error("Couldn't write to a read only transaction")]
	TxReadonly,

	/// The key being inserted in the transaction already exists
	#[error("The key being inserted already exists")]
	TxKeyAlreadyExists,

	/// There was a transaction error that can be retried
	#[error("Failed to commit transaction due to a read or write conflict. This transaction can be retried")]
	TxRetryable,

	/// The requested row or storage entry was not found
	#[error("The requested resource was not found")]
	NotFound,

	/// The resource being created already exists
	#[error("The resource being created already exists")]
	AlreadyExists,

	/// The transaction was rolled back at the user's request
	#[error("The transaction was rolled back by the user")]
	UserRollback,

	/// The operation is waiting on another transaction to release a
	/// resource. This is a transient condition, not a failure.
	#[error("The operation is waiting for another transaction")]
	WaitingForOtherTransaction,

	/// There was a problem with an IO operation
	#[error("There was a problem with an IO operation: {0}")]
	Io(#[from] IoError),

	/// An argument to an operation was invalid
	#[error("Invalid argument: {0}")]
	InvalidArgument(String),

	/// The engine was in an invalid state for the requested operation
	#[error("Invalid state: {0}")]
	InvalidState(String),

	/// The requested functionality is not supported by this engine
	#[error("Unsupported operation: {0}")]
	Unsupported(String),

	/// The request deadline elapsed before the job completed
	#[error("The request timed out")]
	Timeout,

	/// The requested functionality is recognised but not implemented
	#[error("Not implemented: {0}")]
	NotImplemented(String),

	/// The operation is not legal in the current execution phase
	#[error("Illegal operation: {0}")]
	IllegalOperation(String),

	/// A long transaction wrote to a table it did not declare
	#[error("Table '{table}' was written without a write preserve declaration")]
	WriteWithoutPreserve {
		table: String,
	},

	/// A write landed inside an area preserved by another transaction
	#[error("Write into table '{table}' conflicts with a write preserve held by another transaction")]
	WritePreserveConflict {
		table: String,
	},

	/// A read landed outside the transaction's declared read areas
	#[error("Read from table '{table}' violates the declared read areas")]
	ReadAreaViolation {
		table: String,
	},

	/// The transaction is no longer active and cannot run statements
	#[error("The transaction is not active")]
	InactiveTransaction,

	/// The operation is blocked by a concurrent operation
	#[error("The operation was blocked by a concurrent operation")]
	BlockedByConcurrentOperation,

	/// A resource limit was reached
	#[error("Resource limit reached: {0}")]
	ResourceLimit(String),

	/// The result set exceeds the configured maximum size
	#[error("The result set is too large")]
	ResultTooLarge,

	/// The session is not authorized to perform the operation
	#[error("The session is not authorized to perform this operation")]
	NotAuthorized,

	/// The named table does not exist in the catalog
	#[error("The table '{name}' does not exist")]
	TableNotFound {
		name: String,
	},

	/// The named column does not exist on the target table
	#[error("The column '{name}' does not exist")]
	ColumnNotFound {
		name: String,
	},

	/// A value did not match the expected runtime type
	#[error("Type mismatch: expected {expected}, found {actual}")]
	TypeMismatch {
		expected: String,
		actual: String,
	},

	/// The supplied key does not match the target index key shape
	#[error("The supplied key does not match the index definition")]
	MismatchKey,

	/// A write supplied fewer columns than the table requires
	#[error("The statement does not supply all required columns")]
	IncompleteColumns,

	/// A uniqueness constraint was violated by a write
	#[error("Unique constraint violation on table '{table}'")]
	UniqueConstraintViolation {
		table: String,
	},

	/// A NOT NULL constraint was violated by a write
	#[error("Null was assigned to non-nullable column '{column}'")]
	NotNullViolation {
		column: String,
	},

	/// Evaluating an expression failed
	#[error("Expression evaluation failed: {kind} in '{expression}'")]
	ExpressionEvaluation {
		kind: EvalErrorKind,
		expression: String,
	},

	/// The job was cancelled before it completed
	#[error("The request was cancelled: {reason}")]
	Cancelled {
		reason: CancelReason,
	},

	/// The client protocol major version is incompatible
	#[error("Invalid request: client version {client_major}.{client_minor} is incompatible with server version {server_major}.{server_minor}")]
	InvalidRequest {
		client_major: u32,
		client_minor: u32,
		server_major: u32,
		server_minor: u32,
	},

	/// A sequence reached its bound and does not cycle
	#[error("The sequence '{name}' is exhausted")]
	SequenceOutOfBounds {
		name: String,
	},

	/// A persisted payload could not be encoded or decoded
	#[error("There was a serialization error: {0}")]
	Serialization(#[from] BincodeError),

	/// A statement referenced a prepared handle that does not exist
	#[error("The prepared statement handle is unknown")]
	UnknownPreparedStatement,

	/// A parameter placeholder was not bound before execution
	#[error("The placeholder '{name}' was not bound")]
	UnboundPlaceholder {
		name: String,
	},
}

/// The failure classes an expression evaluation can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalErrorKind {
	/// Overflow, division by zero, or remainder by zero
	Arithmetic,
	/// A value could not be parsed from its literal form
	Format,
	/// A cast pair is not present in the conversion matrix
	UnsupportedCast,
	/// A value lost significant data under the error loss policy
	LossOfPrecision,
	/// A value exceeded the target length under the strict policy
	Truncation,
}

impl std::fmt::Display for EvalErrorKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Arithmetic => write!(f, "arithmetic error"),
			Self::Format => write!(f, "format error"),
			Self::UnsupportedCast => write!(f, "unsupported cast"),
			Self::LossOfPrecision => write!(f, "loss of precision"),
			Self::Truncation => write!(f, "truncation"),
		}
	}
}

/// The origin of a job cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
	/// The user asked for the request to be cancelled
	User,
	/// The request deadline elapsed
	Deadline,
	/// A fatal error elsewhere in the job forced the cancellation
	Fatal,
}

impl std::fmt::Display for CancelReason {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::User => write!(f, "cancelled by the user"),
			Self::Deadline => write!(f, "the request deadline elapsed"),
			Self::Fatal => write!(f, "a fatal error occurred"),
		}
	}
}

impl Error {
	/// Map this error onto the externally visible status taxonomy.
	pub fn status_code(&self) -> StatusCode {
		match self {
			Self::NotFound => StatusCode::NotFound,
			Self::AlreadyExists | Self::TxKeyAlreadyExists => StatusCode::AlreadyExists,
			Self::UserRollback => StatusCode::UserRollback,
			Self::WaitingForOtherTransaction => StatusCode::WaitingForOtherTransaction,
			Self::Io(_) => StatusCode::IoError,
			Self::InvalidArgument(_) | Self::UnboundPlaceholder {
				..
			} => StatusCode::InvalidArgument,
			Self::InvalidState(_) | Self::TxFinished | Self::UnknownPreparedStatement => {
				StatusCode::InvalidState
			}
			Self::Unsupported(_) => StatusCode::Unsupported,
			Self::Timeout => StatusCode::Timeout,
			Self::NotImplemented(_) => StatusCode::NotImplemented,
			Self::IllegalOperation(_) | Self::TxReadonly => StatusCode::IllegalOperation,
			Self::WriteWithoutPreserve {
				..
			}
			| Self::WritePreserveConflict {
				..
			} => StatusCode::WritePreserveConflict,
			Self::ReadAreaViolation {
				..
			} => StatusCode::ReadAreaViolation,
			Self::InactiveTransaction => StatusCode::InactiveTransaction,
			Self::BlockedByConcurrentOperation | Self::TxRetryable => {
				StatusCode::BlockedByConcurrentOperation
			}
			Self::ResourceLimit(_) => StatusCode::ResourceLimit,
			Self::ResultTooLarge => StatusCode::ResultTooLarge,
			Self::NotAuthorized => StatusCode::NotAuthorized,
			Self::TableNotFound {
				..
			} => StatusCode::TableNotFound,
			Self::ColumnNotFound {
				..
			} => StatusCode::ColumnNotFound,
			Self::TypeMismatch {
				..
			} => StatusCode::TypeMismatch,
			Self::MismatchKey => StatusCode::MismatchKey,
			Self::IncompleteColumns => StatusCode::IncompleteColumns,
			Self::UniqueConstraintViolation {
				..
			}
			| Self::NotNullViolation {
				..
			} => StatusCode::IntegrityConstraintViolation,
			Self::ExpressionEvaluation {
				..
			} => StatusCode::ExpressionEvaluationFailure,
			Self::Cancelled {
				..
			} => StatusCode::Cancelled,
			Self::InvalidRequest {
				..
			} => StatusCode::InvalidRequest,
			Self::SequenceOutOfBounds {
				..
			} => StatusCode::SequenceOutOfBounds,
			_ => StatusCode::InternalError,
		}
	}

	/// Statement errors complete the current statement in error without
	/// aborting the enclosing transaction.
	pub fn is_statement_error(&self) -> bool {
		matches!(
			self,
			Self::InactiveTransaction
				| Self::UnknownPreparedStatement
				| Self::UnboundPlaceholder {
					..
				} | Self::InvalidRequest {
				..
			}
		)
	}

	/// Warnings and transient waits never abort the transaction.
	pub fn is_warning(&self) -> bool {
		matches!(self, Self::WaitingForOtherTransaction)
	}

	/// Whether this error propagates to the transaction context and
	/// transitions it to the aborted state.
	pub fn aborts_transaction(&self) -> bool {
		!self.is_statement_error() && !self.is_warning()
	}
}

/// The full description of a failure as recorded on a request context:
/// the error itself, the source location that raised it, optional
/// supplemental text, and the state of the enclosing transaction at
/// the time it was recorded.
#[derive(Debug)]
pub struct ErrorInfo {
	/// The underlying error
	error: Error,
	/// The source file which raised the error
	file: &'static str,
	/// The source line which raised the error
	line: u32,
	/// Optional supplemental diagnostic text
	supplemental: Option<String>,
	/// The transaction state observed when the error was recorded
	tx_status: Option<TxState>,
}

impl ErrorInfo {
	/// Create a new error description for the given source location.
	pub fn new(error: Error, file: &'static str, line: u32) -> Self {
		Self {
			error,
			file,
			line,
			supplemental: None,
			tx_status: None,
		}
	}

	/// Attach supplemental diagnostic text.
	pub fn with_supplemental(mut self, supplemental: impl Into<String>) -> Self {
		self.supplemental = Some(supplemental.into());
		self
	}

	/// Record the transaction state observed at failure time.
	pub fn with_tx_status(mut self, status: TxState) -> Self {
		self.tx_status = Some(status);
		self
	}

	/// The underlying error.
	pub fn error(&self) -> &Error {
		&self.error
	}

	/// The externally visible status code of the underlying error.
	pub fn status_code(&self) -> StatusCode {
		self.error.status_code()
	}

	/// The source file which raised the error.
	pub fn file(&self) -> &'static str {
		self.file
	}

	/// The source line which raised the error.
	pub fn line(&self) -> u32 {
		self.line
	}

	/// Optional supplemental diagnostic text.
	pub fn supplemental(&self) -> Option<&str> {
		self.supplemental.as_deref()
	}

	/// The transaction state observed when the error was recorded.
	pub fn tx_status(&self) -> Option<TxState> {
		self.tx_status
	}

	/// Consume the description and return the underlying error.
	pub fn into_error(self) -> Error {
		self.error
	}
}

impl std::fmt::Display for ErrorInfo {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{} ({}:{})", self.error, self.file, self.line)?;
		if let Some(text) = &self.supplemental {
			write!(f, ": {text}")?;
		}
		Ok(())
	}
}

impl From<Error> for ErrorInfo {
	fn from(error: Error) -> Self {
		Self::new(error, "", 0)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn status_codes_are_stable() {
		assert_eq!(Error::NotFound.status_code(), StatusCode::NotFound);
		assert_eq!(Error::Timeout.status_code(), StatusCode::Timeout);
		assert_eq!(
			Error::UniqueConstraintViolation {
				table: "t".to_owned()
			}
			.status_code(),
			StatusCode::IntegrityConstraintViolation
		);
	}

	#[test]
	fn statement_errors_do_not_abort() {
		assert!(Error::InactiveTransaction.is_statement_error());
		assert!(!Error::InactiveTransaction.aborts_transaction());
		assert!(Error::WaitingForOtherTransaction.is_warning());
		assert!(!Error::WaitingForOtherTransaction.aborts_transaction());
		assert!(Error::TxRetryable.aborts_transaction());
	}

	#[test]
	fn error_info_captures_location() {
		let info = error_info!(Error::NotFound, "during point lookup");
		assert!(info.file().ends_with("err/mod.rs"));
		assert!(info.line() > 0);
		assert_eq!(info.supplemental(), Some("during point lookup"));
	}
}
