/// The resolution state of a large-object reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LobKind {
	/// No object is referenced
	Undefined = 0,
	/// The object is referenced through a caller-provided locator
	Provided = 1,
	/// The object has been fetched and is identified by a datastore id
	Fetched = 2,
	/// The object is fully resolved: id, provider and tag are known
	Resolved = 3,
}

/// A 40-byte trivially-copyable reference to a large object. The
/// payload itself lives in the datastore or behind a relay-service
/// session; records only ever carry the reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LobReference {
	kind: LobKind,
	/// The datastore object id, when fetched or resolved
	id: u64,
	/// The provider id, when resolved
	provider: u64,
	/// The caller-provided locator, when provided
	locator: u64,
	/// The resolution tag, when resolved
	tag: u64,
}

impl LobReference {
	/// The undefined reference.
	pub const UNDEFINED: LobReference = LobReference {
		kind: LobKind::Undefined,
		id: 0,
		provider: 0,
		locator: 0,
		tag: 0,
	};

	/// A reference through a caller-provided locator.
	pub fn provided(locator: u64) -> Self {
		Self {
			kind: LobKind::Provided,
			locator,
			..Self::UNDEFINED
		}
	}

	/// A reference to an object fetched from the datastore.
	pub fn fetched(id: u64) -> Self {
		Self {
			kind: LobKind::Fetched,
			id,
			..Self::UNDEFINED
		}
	}

	/// A fully resolved reference.
	pub fn resolved(id: u64, provider: u64, tag: u64) -> Self {
		Self {
			kind: LobKind::Resolved,
			id,
			provider,
			tag,
			..Self::UNDEFINED
		}
	}

	/// The resolution state of this reference.
	pub fn kind(&self) -> LobKind {
		self.kind
	}

	/// The datastore object id.
	pub fn id(&self) -> u64 {
		self.id
	}

	/// The provider id.
	pub fn provider(&self) -> u64 {
		self.provider
	}

	/// The caller-provided locator.
	pub fn locator(&self) -> u64 {
		self.locator
	}

	/// The resolution tag.
	pub fn tag(&self) -> u64 {
		self.tag
	}

	/// Serialise into the 40-byte record image.
	pub fn to_image(&self) -> [u8; 40] {
		let mut out = [0u8; 40];
		out[0] = self.kind as u8;
		out[8..16].copy_from_slice(&self.id.to_le_bytes());
		out[16..24].copy_from_slice(&self.provider.to_le_bytes());
		out[24..32].copy_from_slice(&self.locator.to_le_bytes());
		out[32..40].copy_from_slice(&self.tag.to_le_bytes());
		out
	}

	/// Deserialise from the 40-byte record image.
	pub fn from_image(image: &[u8; 40]) -> Self {
		let kind = match image[0] {
			1 => LobKind::Provided,
			2 => LobKind::Fetched,
			3 => LobKind::Resolved,
			_ => LobKind::Undefined,
		};
		Self {
			kind,
			id: u64::from_le_bytes(image[8..16].try_into().unwrap()),
			provider: u64::from_le_bytes(image[16..24].try_into().unwrap()),
			locator: u64::from_le_bytes(image[24..32].try_into().unwrap()),
			tag: u64::from_le_bytes(image[32..40].try_into().unwrap()),
		}
	}
}

impl std::fmt::Display for LobReference {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self.kind {
			LobKind::Undefined => write!(f, "<lob undefined>"),
			LobKind::Provided => write!(f, "<lob locator {}>", self.locator),
			LobKind::Fetched => write!(f, "<lob id {}>", self.id),
			LobKind::Resolved => {
				write!(f, "<lob id {} provider {} tag {}>", self.id, self.provider, self.tag)
			}
		}
	}
}

/// A relay-service session used to resolve provided locators when the
/// object does not live in the datastore. The session disposes itself
/// on drop.
pub struct RelaySession {
	provider: u64,
	/// Invoked once when the session is disposed
	dispose: Option<Box<dyn FnOnce() + Send>>,
}

impl RelaySession {
	/// Open a session against the given provider. The dispose hook
	/// runs exactly once when the session drops.
	pub fn open(provider: u64, dispose: impl FnOnce() + Send + 'static) -> Self {
		Self {
			provider,
			dispose: Some(Box::new(dispose)),
		}
	}

	/// The provider this session talks to.
	pub fn provider(&self) -> u64 {
		self.provider
	}

	/// Resolve a reference through this session. Provided locators and
	/// fetched ids upgrade to resolved references carrying the session
	/// provider; resolved references pass through unchanged.
	pub fn resolve(&self, reference: LobReference, tag: u64) -> LobReference {
		match reference.kind() {
			LobKind::Provided => LobReference::resolved(reference.locator(), self.provider, tag),
			LobKind::Fetched => LobReference::resolved(reference.id(), self.provider, tag),
			_ => reference,
		}
	}
}

impl Drop for RelaySession {
	fn drop(&mut self) {
		if let Some(dispose) = self.dispose.take() {
			dispose();
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::sync::Arc;

	use super::*;

	#[test]
	fn image_round_trips() {
		for v in [
			LobReference::UNDEFINED,
			LobReference::provided(42),
			LobReference::fetched(7),
			LobReference::resolved(1, 2, 3),
		] {
			assert_eq!(LobReference::from_image(&v.to_image()), v);
		}
	}

	#[test]
	fn relay_sessions_resolve_and_dispose_on_drop() {
		let disposed = Arc::new(AtomicUsize::new(0));
		let observed = disposed.clone();
		{
			let session = RelaySession::open(9, move || {
				observed.fetch_add(1, Ordering::AcqRel);
			});
			let resolved = session.resolve(LobReference::provided(42), 5);
			assert_eq!(resolved.kind(), LobKind::Resolved);
			assert_eq!(resolved.provider(), 9);
			assert_eq!(resolved.id(), 42);
			// Already resolved references pass through unchanged
			assert_eq!(session.resolve(resolved, 6), resolved);
			assert_eq!(disposed.load(Ordering::Acquire), 0);
		}
		assert_eq!(disposed.load(Ordering::Acquire), 1);
	}
}
