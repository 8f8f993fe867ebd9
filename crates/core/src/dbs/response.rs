use crate::err::ErrorInfo;
use crate::rpc::StatusCode;

/// The outcome of one executed statement.
#[derive(Debug)]
pub struct Response {
	/// The externally visible status
	pub status: StatusCode,
	/// Rows affected by write operators
	pub rows_affected: u64,
	/// The failure description, when the statement did not succeed
	pub error: Option<ErrorInfo>,
}

impl Response {
	/// A successful response.
	pub fn ok(rows_affected: u64) -> Self {
		Self {
			status: StatusCode::Ok,
			rows_affected,
			error: None,
		}
	}

	/// A failed response carrying its error description.
	pub fn error(error: ErrorInfo) -> Self {
		Self {
			status: error.status_code(),
			rows_affected: 0,
			error: Some(error),
		}
	}

	/// Whether the statement succeeded.
	pub fn is_ok(&self) -> bool {
		self.status == StatusCode::Ok
	}
}
