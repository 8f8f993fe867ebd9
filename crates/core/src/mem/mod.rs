//! Paged memory resources backing record stores and variable-length
//! payloads.
//!
//! An arena hands out stable pointers into fixed-size pages. Pages
//! never move or shrink while the arena is alive, so records and
//! varlen payloads can be referenced by raw pointer for the lifetime
//! of the owning store. Arenas are thread-confined while a task is
//! producing into them; completed pages are only ever read.

mod arena;

pub use arena::{Arena, ArenaCheckpoint, Discipline};

/// Copy a byte slice into the arena and return the stable copy.
///
/// This backs the heap form of character and octet values: the
/// returned slice points into an arena page and stays valid until the
/// arena is reset or dropped.
pub fn copy_varlen<'a>(arena: &'a Arena, bytes: &[u8]) -> &'a [u8] {
	if bytes.is_empty() {
		return &[];
	}
	let dst = arena.alloc(bytes.len(), 1);
	// SAFETY: alloc returns a fresh, non-overlapping region of at
	// least `bytes.len()` bytes.
	unsafe {
		std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len());
		std::slice::from_raw_parts(dst, bytes.len())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn varlen_copies_are_stable() {
		let arena = Arena::new(Discipline::Monotonic);
		let a = copy_varlen(&arena, b"hello");
		let b = copy_varlen(&arena, b"world");
		assert_eq!(a, b"hello");
		assert_eq!(b, b"world");
		assert_ne!(a.as_ptr(), b.as_ptr());
	}
}
