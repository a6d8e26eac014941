//! A lock-free list that can be closed exactly once.
//!
//! Only whole-list removal is supported, so the classic ABA hazard of a
//! Treiber stack never arises: a node is freed solely by the thread that
//! swapped the entire chain out of `head`.

use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

/// Tag stored in `head` once the list has been closed. Nodes are at least
/// word aligned, so no real node ever lives at this address.
const CLOSED: usize = 1;

struct Node<T> {
    item: T,
    next: *mut Node<T>,
}

pub(crate) struct ClosableStack<T> {
    head: AtomicPtr<Node<T>>,
    data: PhantomData<Box<Node<T>>>,
}

// SAFETY: every node is owned by the chain hanging off `head`. A node is
// linked in by a single successful CAS and unlinked only by swapping out the
// whole chain, after which the swapping thread owns it alone. No `&T` is ever
// handed out through a shared reference, so items need `Send` but not `Sync`.
unsafe impl<T: Send> Send for ClosableStack<T> {}
// SAFETY: as above; `&ClosableStack` only allows pushing owned items and
// taking whole chains, both through atomic operations on `head`.
unsafe impl<T: Send> Sync for ClosableStack<T> {}

fn is_closed<T>(ptr: *mut Node<T>) -> bool {
    ptr as usize == CLOSED
}

impl<T> ClosableStack<T> {
    pub fn new() -> Self {
        Self { head: AtomicPtr::new(ptr::null_mut()), data: PhantomData }
    }

    /// Pushes `item` unless the list is closed, in which case it is handed back.
    pub fn push(&self, item: T) -> Result<(), T> {
        let node = Box::into_raw(Box::new(Node { item, next: ptr::null_mut() }));
        let mut head = self.head.load(Ordering::Acquire);
        loop {
            if is_closed(head) {
                // SAFETY: `node` was never published.
                let node = unsafe { Box::from_raw(node) };
                return Err(node.item);
            }
            // SAFETY: `node` is still exclusively ours.
            unsafe { (*node).next = head };
            match self.head.compare_exchange_weak(head, node, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return Ok(()),
                Err(actual) => head = actual,
            }
        }
    }

    /// Atomically closes the list and returns its contents in push order.
    /// Closing an already closed list returns nothing.
    pub fn close_and_take(&self) -> Vec<T> {
        let head = self.head.swap(CLOSED as *mut Node<T>, Ordering::AcqRel);
        if is_closed(head) {
            return Vec::new();
        }
        // SAFETY: the swap gave us sole ownership of the chain.
        unsafe { Self::collect(head) }
    }

    /// Removes everything pushed so far, in push order, leaving the list open.
    pub fn take_all(&self) -> Vec<T> {
        let mut head = self.head.load(Ordering::Acquire);
        loop {
            if is_closed(head) || head.is_null() {
                return Vec::new();
            }
            match self.head.compare_exchange_weak(head, ptr::null_mut(), Ordering::AcqRel, Ordering::Acquire) {
                // SAFETY: the exchange gave us sole ownership of the chain.
                Ok(_) => return unsafe { Self::collect(head) },
                Err(actual) => head = actual,
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire).is_null()
    }

    pub fn is_closed(&self) -> bool {
        is_closed(self.head.load(Ordering::Acquire))
    }

    /// Walks a detached chain. Pops come out newest first, so the result is
    /// reversed to restore push order.
    unsafe fn collect(mut head: *mut Node<T>) -> Vec<T> {
        let mut items = Vec::new();
        while !head.is_null() {
            let node = Box::from_raw(head);
            head = node.next;
            items.push(node.item);
        }
        items.reverse();
        items
    }
}

impl<T> Default for ClosableStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for ClosableStack<T> {
    fn drop(&mut self) {
        let head = *self.head.get_mut();
        if !is_closed(head) {
            // SAFETY: `&mut self` means no other thread can observe the chain.
            drop(unsafe { Self::collect(head) });
        }
    }
}
