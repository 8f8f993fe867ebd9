use std::hash::{Hash, Hasher};

use crate::mem::{copy_varlen, Arena};

/// The number of payload bytes a varlen value can hold inline before
/// it spills into an arena.
pub const INLINE_CAPACITY: usize = 15;

/// The storage form of a variable-length payload: short payloads are
/// kept inline, longer ones point into an arena owned by the record
/// store the value came from.
#[derive(Debug, Clone, Copy)]
enum Repr {
	Inline {
		len: u8,
		buf: [u8; INLINE_CAPACITY],
	},
	Heap {
		ptr: *const u8,
		len: u32,
	},
}

impl Repr {
	fn from_bytes(bytes: &[u8], arena: Option<&Arena>) -> Self {
		if bytes.len() <= INLINE_CAPACITY {
			let mut buf = [0u8; INLINE_CAPACITY];
			buf[..bytes.len()].copy_from_slice(bytes);
			Self::Inline {
				len: bytes.len() as u8,
				buf,
			}
		} else {
			let arena = arena.expect("payload exceeds the inline capacity and no arena was given");
			let copy = copy_varlen(arena, bytes);
			Self::Heap {
				ptr: copy.as_ptr(),
				len: copy.len() as u32,
			}
		}
	}

	fn as_bytes(&self) -> &[u8] {
		match self {
			Self::Inline {
				len,
				buf,
			} => &buf[..*len as usize],
			Self::Heap {
				ptr,
				len,
			} => {
				// SAFETY: the pointer was produced by an arena copy and
				// the owning store keeps the arena alive for as long as
				// this value is reachable.
				unsafe { std::slice::from_raw_parts(*ptr, *len as usize) }
			}
		}
	}
}

// SAFETY: heap payloads point into completed arena pages which are
// immutable and outlive the values referencing them.
unsafe impl Send for Repr {}
unsafe impl Sync for Repr {}

/// A character value in SSO form.
#[derive(Debug, Clone, Copy)]
pub struct Text(Repr);

impl Text {
	/// Create a text value, spilling into `arena` when the payload
	/// exceeds the inline capacity.
	pub fn new(s: &str, arena: &Arena) -> Self {
		Self(Repr::from_bytes(s.as_bytes(), Some(arena)))
	}

	/// Create a text value that must fit inline. Panics when the
	/// payload exceeds the inline capacity; use [`Text::new`] with an
	/// arena for unbounded payloads.
	pub fn inline(s: &str) -> Self {
		assert!(s.len() <= INLINE_CAPACITY, "payload exceeds the inline capacity");
		Self(Repr::from_bytes(s.as_bytes(), None))
	}

	/// Reconstruct a heap text value from a raw pointer and length.
	///
	/// # Safety
	/// The region must point into an arena page that stays alive and
	/// immutable for the lifetime of the returned value, and must hold
	/// valid UTF-8.
	pub unsafe fn from_raw_parts(ptr: *const u8, len: u32) -> Self {
		Self(Repr::Heap {
			ptr,
			len,
		})
	}

	/// The payload as bytes.
	pub fn as_bytes(&self) -> &[u8] {
		self.0.as_bytes()
	}

	/// The payload as a string slice.
	pub fn as_str(&self) -> &str {
		// SAFETY: every constructor takes a &str or documents the
		// UTF-8 requirement.
		unsafe { std::str::from_utf8_unchecked(self.0.as_bytes()) }
	}

	/// The payload length in bytes.
	pub fn len(&self) -> usize {
		self.as_bytes().len()
	}

	/// Whether the payload is empty.
	pub fn is_empty(&self) -> bool {
		self.as_bytes().is_empty()
	}

	/// Whether the payload is stored inline.
	pub fn is_inline(&self) -> bool {
		matches!(self.0, Repr::Inline { .. })
	}
}

impl PartialEq for Text {
	fn eq(&self, other: &Self) -> bool {
		self.as_bytes() == other.as_bytes()
	}
}

impl Eq for Text {}

impl PartialOrd for Text {
	fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for Text {
	fn cmp(&self, other: &Self) -> std::cmp::Ordering {
		self.as_bytes().cmp(other.as_bytes())
	}
}

impl Hash for Text {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.as_bytes().hash(state)
	}
}

/// An octet (binary) value in SSO form.
#[derive(Debug, Clone, Copy)]
pub struct Octet(Repr);

impl Octet {
	/// Create an octet value, spilling into `arena` when the payload
	/// exceeds the inline capacity.
	pub fn new(bytes: &[u8], arena: &Arena) -> Self {
		Self(Repr::from_bytes(bytes, Some(arena)))
	}

	/// Create an octet value that must fit inline.
	pub fn inline(bytes: &[u8]) -> Self {
		assert!(bytes.len() <= INLINE_CAPACITY, "payload exceeds the inline capacity");
		Self(Repr::from_bytes(bytes, None))
	}

	/// Reconstruct a heap octet value from a raw pointer and length.
	///
	/// # Safety
	/// The region must point into an arena page that stays alive and
	/// immutable for the lifetime of the returned value.
	pub unsafe fn from_raw_parts(ptr: *const u8, len: u32) -> Self {
		Self(Repr::Heap {
			ptr,
			len,
		})
	}

	/// The payload as bytes.
	pub fn as_bytes(&self) -> &[u8] {
		self.0.as_bytes()
	}

	/// The payload length in bytes.
	pub fn len(&self) -> usize {
		self.as_bytes().len()
	}

	/// Whether the payload is empty.
	pub fn is_empty(&self) -> bool {
		self.as_bytes().is_empty()
	}

	/// Whether the payload is stored inline.
	pub fn is_inline(&self) -> bool {
		matches!(self.0, Repr::Inline { .. })
	}
}

impl PartialEq for Octet {
	fn eq(&self, other: &Self) -> bool {
		self.as_bytes() == other.as_bytes()
	}
}

impl Eq for Octet {}

impl PartialOrd for Octet {
	fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for Octet {
	fn cmp(&self, other: &Self) -> std::cmp::Ordering {
		self.as_bytes().cmp(other.as_bytes())
	}
}

impl Hash for Octet {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.as_bytes().hash(state)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::mem::Discipline;

	#[test]
	fn short_payloads_stay_inline() {
		let arena = Arena::new(Discipline::Monotonic);
		let t = Text::new("short", &arena);
		assert!(t.is_inline());
		assert_eq!(t.as_str(), "short");
		assert_eq!(arena.allocated(), 0);
	}

	#[test]
	fn long_payloads_spill_into_the_arena() {
		let arena = Arena::new(Discipline::Monotonic);
		let s = "a string well beyond fifteen bytes";
		let t = Text::new(s, &arena);
		assert!(!t.is_inline());
		assert_eq!(t.as_str(), s);
		assert_eq!(arena.allocated(), s.len());
	}

	#[test]
	fn comparison_is_bytewise() {
		let arena = Arena::new(Discipline::Monotonic);
		let a = Text::new("aaaaaaaaaaaaaaaaaaaa", &arena);
		let b = Text::inline("b");
		assert!(a < b);
		assert_eq!(a, Text::new("aaaaaaaaaaaaaaaaaaaa", &arena));
	}

	#[test]
	fn boundary_length_is_inline() {
		let t = Text::inline("123456789012345");
		assert!(t.is_inline());
		assert_eq!(t.len(), INLINE_CAPACITY);
	}
}
