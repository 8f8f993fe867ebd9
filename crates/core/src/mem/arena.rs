use std::cell::UnsafeCell;

use parking_lot::Mutex;

use crate::cnf::ARENA_PAGE_SIZE;

/// The reclamation discipline of an arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discipline {
	/// Allocations live until the arena is reset or dropped.
	Monotonic,
	/// Allocations can be rolled back to a checkpoint in stack order.
	Lifo,
	/// Whole pages can be released from the front once consumed.
	Fifo,
}

/// A position inside an arena, used to roll back LIFO scopes and to
/// release consumed FIFO pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaCheckpoint {
	page: usize,
	offset: usize,
}

struct Page {
	buf: Box<[u8]>,
	used: usize,
}

impl Page {
	fn new(size: usize) -> Self {
		Self {
			buf: vec![0u8; size].into_boxed_slice(),
			used: 0,
		}
	}
}

struct Inner {
	pages: Vec<Page>,
	/// Index of the first live page; pages below it were released by
	/// the FIFO discipline and only keep their slot.
	head: usize,
}

/// A paged bump allocator with stable addresses.
///
/// Pages are boxed slices: growing the page vector never moves page
/// contents, so every pointer handed out stays valid until the pages
/// holding it are reset, rolled back or released.
pub struct Arena {
	inner: Mutex<UnsafeCell<Inner>>,
	discipline: Discipline,
	page_size: usize,
}

// SAFETY: all mutation of the page table happens under the mutex, and
// handed-out regions are disjoint by construction.
unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl Arena {
	/// Create a new arena with the configured default page size.
	pub fn new(discipline: Discipline) -> Self {
		Self::with_page_size(discipline, *ARENA_PAGE_SIZE)
	}

	/// Create a new arena with an explicit page size.
	pub fn with_page_size(discipline: Discipline, page_size: usize) -> Self {
		Self {
			inner: Mutex::new(UnsafeCell::new(Inner {
				pages: Vec::new(),
				head: 0,
			})),
			discipline,
			page_size,
		}
	}

	/// The reclamation discipline of this arena.
	pub fn discipline(&self) -> Discipline {
		self.discipline
	}

	/// Allocate `size` bytes aligned to `align` and return a stable
	/// pointer to the region. Oversized requests get a dedicated page.
	pub fn alloc(&self, size: usize, align: usize) -> *mut u8 {
		debug_assert!(align.is_power_of_two());
		let guard = self.inner.lock();
		let inner = unsafe { &mut *guard.get() };
		// Requests larger than a page get their own page
		if size > self.page_size {
			let mut page = Page::new(size);
			page.used = size;
			let ptr = page.buf.as_mut_ptr();
			inner.pages.push(page);
			return ptr;
		}
		// Try the current page first
		if let Some(page) = inner.pages.last_mut() {
			let base = page.buf.as_ptr() as usize;
			let aligned = (base + page.used + align - 1) & !(align - 1);
			let offset = aligned - base;
			if offset + size <= page.buf.len() {
				page.used = offset + size;
				return unsafe { page.buf.as_mut_ptr().add(offset) };
			}
		}
		// Open a fresh page
		let mut page = Page::new(self.page_size);
		page.used = size;
		let ptr = page.buf.as_mut_ptr();
		inner.pages.push(page);
		ptr
	}

	/// Take a checkpoint of the current allocation position.
	pub fn checkpoint(&self) -> ArenaCheckpoint {
		let guard = self.inner.lock();
		let inner = unsafe { &*guard.get() };
		match inner.pages.last() {
			Some(page) => ArenaCheckpoint {
				page: inner.pages.len() - 1,
				offset: page.used,
			},
			None => ArenaCheckpoint {
				page: 0,
				offset: 0,
			},
		}
	}

	/// Roll allocations back to a previously taken checkpoint. Only
	/// meaningful under the LIFO discipline; pages opened after the
	/// checkpoint are dropped and the checkpoint page is truncated.
	pub fn rollback_to(&self, cp: ArenaCheckpoint) {
		debug_assert_eq!(self.discipline, Discipline::Lifo);
		let guard = self.inner.lock();
		let inner = unsafe { &mut *guard.get() };
		if inner.pages.is_empty() {
			return;
		}
		inner.pages.truncate(cp.page + 1);
		if let Some(page) = inner.pages.get_mut(cp.page) {
			page.used = cp.offset;
		}
	}

	/// Release every full page before the checkpoint page. Only
	/// meaningful under the FIFO discipline, once every record on the
	/// released pages has been consumed.
	pub fn release_before(&self, cp: ArenaCheckpoint) {
		debug_assert_eq!(self.discipline, Discipline::Fifo);
		let guard = self.inner.lock();
		let inner = unsafe { &mut *guard.get() };
		for idx in inner.head..cp.page {
			inner.pages[idx].buf = Vec::new().into_boxed_slice();
		}
		inner.head = inner.head.max(cp.page);
	}

	/// Drop every page and start afresh. Callers must ensure no record
	/// still references the arena.
	pub fn reset(&self) {
		let guard = self.inner.lock();
		let inner = unsafe { &mut *guard.get() };
		inner.pages.clear();
		inner.head = 0;
	}

	/// The total number of bytes currently allocated.
	pub fn allocated(&self) -> usize {
		let guard = self.inner.lock();
		let inner = unsafe { &*guard.get() };
		inner.pages.iter().skip(inner.head).map(|p| p.used).sum()
	}
}
