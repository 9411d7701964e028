//! Slab page pool backing polymorphic reference lists.
//!
//! Reference lists with more than one entry are stored in small contiguous
//! word arrays laid out as `[size | capacity | record…]`. This module owns
//! the memory for those arrays: it hands out fixed-shape slot groups from
//! large pages, grouped by element count, and recycles freed groups through
//! an in-place free list.
//!
//! ## Design
//! - One pool per thread. The registry is a single-threaded structure, so a
//!   `thread_local!` pool gives every registry on a thread a shared slab
//!   without any locking, and keeps the pool alive for the thread's lifetime.
//! - Pages are keyed by *element count*: a page for `n`-capacity arrays holds
//!   [`PAGE_GROUPS`] groups of `n * 2 + 2` words each.
//! - Allocation linearly scans for a page with matching element count that
//!   has spare capacity or a non-empty free list, allocating a fresh page
//!   otherwise.
//! - A freed group records the previous free-list head in its first word, so
//!   the free list costs no side storage.
//!
//! ## Failure
//! Page allocation delegates to the global allocator; exhaustion aborts via
//! [`std::alloc::handle_alloc_error`]. Freeing a pointer that no page
//! contains, or whose recorded capacity disagrees with its page, is a
//! programmer error and is asserted.

use std::alloc::{self, Layout};
use std::cell::RefCell;
use std::mem::size_of;
use std::ptr::NonNull;

use log::trace;

use crate::engine::ref_list::PolyRef;

/// Slot groups per page.
pub const PAGE_GROUPS: usize = 1024;

/// Machine words per reference record.
pub const WORDS_PER_REF: usize = size_of::<PolyRef>() / size_of::<usize>();

const _: [(); 1] = [(); (WORDS_PER_REF == 2) as usize];

/// Words per slot group for arrays of `elem_size` records: the records plus
/// the two-word `[size, capacity]` header.
#[inline]
const fn stride(elem_size: usize) -> usize {
    elem_size * WORDS_PER_REF + 2
}

struct Page {
    base: NonNull<usize>,
    elem_size: u32,
    /// Slot groups handed out so far (high-water mark).
    elem_count: u32,
    /// Head of the in-place free list, -1 when empty.
    free_list: i32,
}

impl Page {
    fn layout(elem_size: usize) -> Layout {
        Layout::array::<usize>(PAGE_GROUPS * stride(elem_size))
            .expect("reference list page layout overflow")
    }

    fn allocate(elem_size: usize) -> Self {
        let layout = Self::layout(elem_size);
        let raw = unsafe { alloc::alloc(layout) };
        let Some(base) = NonNull::new(raw.cast::<usize>()) else {
            alloc::handle_alloc_error(layout);
        };
        Self {
            base,
            elem_size: elem_size as u32,
            elem_count: 0,
            free_list: -1,
        }
    }

    #[inline]
    fn contains(&self, ptr: *mut usize) -> bool {
        let start = self.base.as_ptr() as usize;
        let end = start + PAGE_GROUPS * stride(self.elem_size as usize) * size_of::<usize>();
        let addr = ptr as usize;
        start <= addr && addr < end
    }
}

#[derive(Default)]
struct PagePool {
    pages: Vec<Page>,
}

impl PagePool {
    fn allocate_array(&mut self, count: usize) -> NonNull<usize> {
        let found = self.pages.iter().position(|p| {
            p.elem_size as usize == count
                && ((p.elem_count as usize) < PAGE_GROUPS || p.free_list != -1)
        });
        let index = match found {
            Some(index) => index,
            None => {
                trace!("allocating reference list page for element count {count}");
                self.pages.push(Page::allocate(count));
                self.pages.len() - 1
            }
        };
        let page = &mut self.pages[index];
        let stride = stride(count);

        let group = if page.free_list != -1 {
            let group = page.free_list as usize;
            page.free_list = unsafe { *page.base.as_ptr().add(group * stride) as i32 };
            group
        } else {
            let group = page.elem_count as usize;
            page.elem_count += 1;
            group
        };

        unsafe {
            let start = page.base.as_ptr().add(group * stride);
            start.write(0); // size
            start.add(1).write(count); // capacity
            NonNull::new_unchecked(start)
        }
    }

    fn free_array(&mut self, array: NonNull<usize>) {
        let ptr = array.as_ptr();
        let page = self
            .pages
            .iter_mut()
            .find(|p| p.contains(ptr))
            .expect("free_array received an address that does not belong to any page");

        let capacity = unsafe { *ptr.add(1) };
        assert_eq!(
            capacity, page.elem_size as usize,
            "array capacity does not match the capacity of its page"
        );

        let stride = stride(page.elem_size as usize);
        let offset_words = (ptr as usize - page.base.as_ptr() as usize) / size_of::<usize>();
        let group = offset_words / stride;

        // The first word of a free group links to the previous head.
        unsafe { ptr.write(page.free_list as usize) };
        page.free_list = group as i32;
    }
}

impl Drop for PagePool {
    fn drop(&mut self) {
        for page in &self.pages {
            unsafe {
                alloc::dealloc(
                    page.base.as_ptr().cast::<u8>(),
                    Page::layout(page.elem_size as usize),
                );
            }
        }
    }
}

thread_local! {
    static POOL: RefCell<PagePool> = RefCell::new(PagePool::default());
}

/// Allocates an array for `count` reference records.
///
/// The returned base points at a `[size = 0 | capacity = count | record…]`
/// group suitable for the reference-list view. The group stays owned by the
/// pool; return it with [`free_array`] using the same capacity it was
/// allocated for.
pub fn allocate_array(count: usize) -> NonNull<usize> {
    POOL.with(|pool| pool.borrow_mut().allocate_array(count))
}

/// Returns an array previously obtained from [`allocate_array`] to its page.
///
/// ## Panics
/// Panics if the pointer is not contained in any page, or if the capacity
/// recorded in the array header does not match the owning page's element
/// size.
pub fn free_array(array: NonNull<usize>) {
    POOL.with(|pool| pool.borrow_mut().free_array(array));
}
