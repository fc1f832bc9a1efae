// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Interfaces for individual MCUs.

/// Interrupt masking provided by the chip.
///
/// Used to build short critical sections around state shared between an
/// interrupt handler and the foreground loop. Implementations typically
/// clear and set the global interrupt enable bit; masking only the peripheral
/// interrupt that shares the state is also sufficient.
pub trait InterruptControl {
    /// Prevent the interrupt handler from running.
    fn disable_interrupts(&self);

    /// Allow the interrupt handler to run again.
    fn enable_interrupts(&self);

    /// Run `f` with interrupts disabled.
    ///
    /// Interrupts are unconditionally enabled afterwards, so this must not
    /// be nested.
    fn atomic<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
        Self: Sized,
    {
        self.disable_interrupts();
        let res = f();
        self.enable_interrupts();
        res
    }
}
