use crate::cnf::{PROTOCOL_VERSION_MAJOR, PROTOCOL_VERSION_MINOR};
use crate::err::Error;

/// A `(major, minor)` protocol version pair as carried on every
/// service request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolVersion {
	pub major: u32,
	pub minor: u32,
}

impl ProtocolVersion {
	/// The version implemented by this engine.
	pub fn current() -> Self {
		Self {
			major: PROTOCOL_VERSION_MAJOR,
			minor: PROTOCOL_VERSION_MINOR,
		}
	}
}

impl std::fmt::Display for ProtocolVersion {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}.{}", self.major, self.minor)
	}
}

/// Gate an incoming request on its protocol version. A mismatched
/// major is rejected with a client/server diagnostic; a newer or older
/// minor is accepted as-is.
pub fn check_version(client: ProtocolVersion) -> Result<(), Error> {
	let server = ProtocolVersion::current();
	if client.major != server.major {
		return Err(Error::InvalidRequest {
			client_major: client.major,
			client_minor: client.minor,
			server_major: server.major,
			server_minor: server.minor,
		});
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn minor_mismatch_is_accepted() {
		let mut v = ProtocolVersion::current();
		v.minor += 10;
		assert!(check_version(v).is_ok());
	}

	#[test]
	fn major_mismatch_is_rejected() {
		let mut v = ProtocolVersion::current();
		v.major += 1;
		let err = check_version(v).unwrap_err();
		assert!(matches!(err, Error::InvalidRequest { .. }));
	}
}
