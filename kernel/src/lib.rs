// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Core Tock Kernel
//!
//! The kernel crate holds the code that chips, capsules, and boards share:
//! the Hardware Interface Layer (HIL) definitions, the standard error type,
//! compile-time configuration, debug output, and common data structures.

#![warn(unreachable_pub)]
#![no_std]

pub mod collections;
pub mod config;
pub mod debug;
pub mod errorcode;
pub mod hil;
pub mod platform;
pub mod utilities;

pub use crate::errorcode::ErrorCode;
