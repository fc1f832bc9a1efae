// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Peripheral drivers for PIC18 microcontrollers with a full-speed USB
//! Serial Interface Engine.

#![no_std]

pub mod usb;
