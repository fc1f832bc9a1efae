// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Fixed-capacity ring buffer shared between an interrupt handler and the
//! foreground loop.
//!
//! All operations take `&self`. The buffer does not mask interrupts itself:
//! callers that produce from interrupt context and consume from the
//! foreground wrap `enqueue`/`dequeue` in a critical section (see
//! `platform::chip::InterruptControl::atomic`). `len` and `has_elements` may
//! be read without one to poll for data.
//!
//! Occupancy is tracked with an explicit count, so every slot of the backing
//! storage is usable. The cursors and the count are volatile: a foreground
//! loop polling `has_elements` must see the count an interrupt handler
//! bumped.

use core::cell::Cell;
use core::sync::atomic::{compiler_fence, Ordering};

use crate::utilities::cells::VolatileCell;

pub struct RingBuffer<'a, T: Copy> {
    ring: &'a [Cell<T>],
    read: VolatileCell<usize>,
    write: VolatileCell<usize>,
    count: VolatileCell<usize>,
}

impl<'a, T: Copy> RingBuffer<'a, T> {
    pub fn new(ring: &'a [Cell<T>]) -> RingBuffer<'a, T> {
        RingBuffer {
            ring,
            read: VolatileCell::new(0),
            write: VolatileCell::new(0),
            count: VolatileCell::new(0),
        }
    }

    /// Returns how many elements are in the buffer.
    pub fn len(&self) -> usize {
        self.count.get()
    }

    pub fn has_elements(&self) -> bool {
        self.count.get() != 0
    }

    pub fn is_full(&self) -> bool {
        self.count.get() >= self.ring.len()
    }

    /// If the buffer isn't full, add a new element at the back. Returns
    /// whether the element was added; a full buffer leaves its contents
    /// untouched.
    pub fn enqueue(&self, val: T) -> bool {
        if self.is_full() {
            false
        } else {
            let write = self.write.get();
            self.ring[write].set(val);
            // The slot must be filled before the count publishes it.
            compiler_fence(Ordering::Release);
            self.write.set((write + 1) % self.ring.len());
            self.count.set(self.count.get() + 1);
            true
        }
    }

    /// Remove the element at the front of the buffer.
    pub fn dequeue(&self) -> Option<T> {
        if self.has_elements() {
            compiler_fence(Ordering::Acquire);
            let read = self.read.get();
            let val = self.ring[read].get();
            self.read.set((read + 1) % self.ring.len());
            self.count.set(self.count.get() - 1);
            Some(val)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod test {
    use super::RingBuffer;
    use core::cell::Cell;

    fn storage<const N: usize>() -> [Cell<usize>; N] {
        core::array::from_fn(|_| Cell::new(0))
    }

    #[test]
    fn test_enqueue_dequeue() {
        const LEN: usize = 10;
        let ring = storage::<LEN>();
        let buf = RingBuffer::new(&ring);

        for _ in 0..2 * LEN {
            assert!(buf.enqueue(42));
            assert_eq!(buf.len(), 1);
            assert!(buf.has_elements());

            assert_eq!(buf.dequeue(), Some(42));
            assert_eq!(buf.len(), 0);
            assert!(!buf.has_elements());
        }
    }

    // Enqueue integers 1 <= n <= len, checking that it succeeds and that the
    // buffer is full at the end.
    fn enqueue_iota(buf: &RingBuffer<usize>, len: usize) {
        for i in 1..=len {
            assert!(!buf.is_full());
            assert!(buf.enqueue(i));
            assert!(buf.has_elements());
            assert_eq!(buf.len(), i);
        }

        assert!(buf.is_full());
        assert!(!buf.enqueue(0));
        assert_eq!(buf.len(), len);
    }

    // Dequeue all elements, expecting integers 1 <= n <= len, checking that
    // the buffer is empty at the end.
    fn dequeue_iota(buf: &RingBuffer<usize>, len: usize) {
        for i in 1..=len {
            assert!(buf.has_elements());
            assert_eq!(buf.len(), len + 1 - i);
            assert_eq!(buf.dequeue(), Some(i));
            assert!(!buf.is_full());
        }

        assert!(!buf.has_elements());
        assert_eq!(buf.dequeue(), None);
    }

    // Move the cursors by `count` slots. Assumes and yields an empty buffer.
    fn move_head(buf: &RingBuffer<usize>, count: usize) {
        assert!(!buf.has_elements());

        for _ in 0..count {
            assert!(buf.enqueue(0));
            assert_eq!(buf.dequeue(), Some(0));
        }

        assert!(!buf.has_elements());
    }

    #[test]
    fn test_fill_once() {
        const LEN: usize = 10;
        let ring = storage::<LEN>();
        let buf = RingBuffer::new(&ring);

        enqueue_iota(&buf, LEN);
        dequeue_iota(&buf, LEN);
    }

    #[test]
    fn test_refill_across_wraparound() {
        const LEN: usize = 10;
        let ring = storage::<LEN>();
        let buf = RingBuffer::new(&ring);

        for offset in 0..LEN {
            move_head(&buf, offset);
            enqueue_iota(&buf, LEN);
            dequeue_iota(&buf, LEN);
        }
    }

    #[test]
    fn test_overflow_keeps_oldest() {
        const LEN: usize = 8;
        let ring = storage::<LEN>();
        let buf = RingBuffer::new(&ring);

        for i in 0..LEN + 5 {
            buf.enqueue(i);
            assert!(buf.len() <= LEN);
        }
        for i in 0..LEN {
            assert_eq!(buf.dequeue(), Some(i));
        }
        assert_eq!(buf.dequeue(), None);
    }
}
