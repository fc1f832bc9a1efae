// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Data structure for storing compile-time configuration options.
//!
//! Configuration is a typed `const` object rather than scattered `cfg`
//! attributes: every code path stays type-checked, and the compiler folds the
//! constants so a disabled trace costs nothing in the final binary.
//!
//! The values are set through the cargo features of the kernel crate (see
//! `kernel/Cargo.toml`).

/// Data structure holding compile-time configuration options.
pub struct Config {
    /// Whether the USB device core should trace every SIE interrupt to the
    /// debug output.
    ///
    /// If enabled, the dispatcher prints the pending interrupt flags, the
    /// endpoint and direction of the last transaction, the received packet
    /// identifier and packet contents, and every decoded control request.
    pub trace_usb: bool,

    /// Whether USB class drivers should trace class-specific requests and
    /// data-stage processing to the debug output.
    pub trace_usb_class: bool,
}

/// A unique instance of `Config` where compile-time configuration options are
/// defined. These options are available in the kernel crate and to chips and
/// capsules through `kernel::config::CONFIG`.
pub const CONFIG: Config = Config {
    trace_usb: cfg!(feature = "trace_usb"),
    trace_usb_class: cfg!(feature = "trace_usb_class"),
};
