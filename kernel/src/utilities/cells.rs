// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Tock `Cell` types.

use core::cell::{Cell, UnsafeCell};
use core::ptr;

/// A `Cell` holding an `Option`, for state that is filled in after
/// construction (clients, latched values).
pub struct OptionalCell<T: Copy> {
    value: Cell<Option<T>>,
}

impl<T: Copy> OptionalCell<T> {
    pub const fn new(val: T) -> OptionalCell<T> {
        OptionalCell {
            value: Cell::new(Some(val)),
        }
    }

    pub const fn empty() -> OptionalCell<T> {
        OptionalCell {
            value: Cell::new(None),
        }
    }

    pub fn set(&self, val: T) {
        self.value.set(Some(val));
    }

    pub fn clear(&self) {
        self.value.set(None);
    }

    /// Empty the cell, returning what it held.
    pub fn take(&self) -> Option<T> {
        self.value.take()
    }

    pub fn is_some(&self) -> bool {
        self.value.get().is_some()
    }

    pub fn is_none(&self) -> bool {
        self.value.get().is_none()
    }

    /// Call `closure` with the contents, if any.
    pub fn map<F, R>(&self, closure: F) -> Option<R>
    where
        F: FnOnce(T) -> R,
    {
        self.value.get().map(closure)
    }

    pub fn and_then<F, U>(&self, closure: F) -> Option<U>
    where
        F: FnOnce(T) -> Option<U>,
    {
        self.value.get().and_then(closure)
    }
}

/// A cell whose every `get` and `set` is a volatile memory access. Used for
/// memory shared with a peripheral.
#[repr(transparent)]
pub struct VolatileCell<T> {
    value: UnsafeCell<T>,
}

impl<T> VolatileCell<T> {
    pub const fn new(value: T) -> Self {
        VolatileCell {
            value: UnsafeCell::new(value),
        }
    }

    #[inline(always)]
    pub fn get(&self) -> T
    where
        T: Copy,
    {
        // SAFETY: the pointer comes from a live `UnsafeCell` and the cell is
        // not `Sync`, so no other thread holds a reference into it.
        unsafe { ptr::read_volatile(self.value.get()) }
    }

    #[inline(always)]
    pub fn set(&self, value: T)
    where
        T: Copy,
    {
        // SAFETY: as for `get`.
        unsafe { ptr::write_volatile(self.value.get(), value) }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn optional_cell_take_empties() {
        let cell = OptionalCell::new(7u8);
        assert_eq!(cell.map(|v| v + 1), Some(8));
        assert_eq!(cell.take(), Some(7));
        assert!(cell.is_none());
        assert_eq!(cell.and_then(|v| v.checked_add(1)), None);

        cell.set(3);
        assert!(cell.is_some());
        cell.clear();
        assert_eq!(cell.take(), None);
    }

    #[test]
    fn volatile_cell_reads_back_writes() {
        let cell = VolatileCell::new(0u8);
        cell.set(0xa5);
        assert_eq!(cell.get(), 0xa5);
    }
}
