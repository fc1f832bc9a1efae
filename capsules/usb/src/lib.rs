// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! USB device-side capsules: the control endpoint client, the descriptor
//! catalog it serves, and a CDC-ACM byte stream built on top of them.

#![forbid(unsafe_code)]
#![no_std]

pub mod cdc;
pub mod descriptors;
pub mod usbc_client_ctrl;
