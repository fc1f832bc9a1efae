// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Interface to full-speed USB device controller hardware.
//!
//! The controller owns the hand-off of packet buffers to the Serial Interface
//! Engine (SIE). Clients never touch hardware buffers directly: they arm an
//! endpoint direction for the next transaction and are called back, from the
//! controller's interrupt handler, when a transaction completes.
//!
//! Every arming operation busy-waits until the previous transaction on the
//! same endpoint direction has been released by the SIE. There is no timeout:
//! an unresponsive host stalls the caller indefinitely.

use crate::ErrorCode;

/// Packet buffer size of every endpoint.
pub const MAX_PACKET_SIZE: usize = 64;

/// DATA0/DATA1 synchronization value of a data packet.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DataToggle {
    Data0,
    Data1,
}

impl DataToggle {
    /// The value expected for the packet following this one.
    pub fn next(self) -> DataToggle {
        match self {
            DataToggle::Data0 => DataToggle::Data1,
            DataToggle::Data1 => DataToggle::Data0,
        }
    }

    pub fn is_data1(self) -> bool {
        self == DataToggle::Data1
    }
}

/// Directions enabled on a hardware endpoint.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EndpointDirections {
    Out,
    In,
    OutIn,
}

impl EndpointDirections {
    pub fn has_out(self) -> bool {
        self != EndpointDirections::In
    }

    pub fn has_in(self) -> bool {
        self != EndpointDirections::Out
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransferType {
    Control = 0,
    Isochronous,
    Bulk,
    Interrupt,
}

/// USB device controller interface.
pub trait UsbController {
    /// Give the OUT buffer of `endpoint` to the SIE so it can receive one
    /// packet of up to `MAX_PACKET_SIZE` bytes carrying `toggle`.
    ///
    /// Returns `INVAL` if the endpoint is not configured for OUT.
    fn arm_out(&self, endpoint: usize, toggle: DataToggle) -> Result<(), ErrorCode>;

    /// Copy `packet` into the IN buffer of `endpoint` and give it to the SIE
    /// for transmission with `toggle`. An empty `packet` sends a zero-length
    /// packet.
    ///
    /// Returns `INVAL` if the endpoint is not configured for IN and `SIZE`
    /// if `packet` is longer than `MAX_PACKET_SIZE`; callers chunk larger
    /// payloads.
    fn arm_in(&self, endpoint: usize, packet: &[u8], toggle: DataToggle)
        -> Result<(), ErrorCode>;

    /// Answer the next IN token on `endpoint` with a STALL handshake.
    ///
    /// Takes the IN buffer immediately, without waiting for the SIE to
    /// release it.
    fn stall_in(&self, endpoint: usize) -> Result<(), ErrorCode>;

    /// Remember `address` and apply it once the next IN transaction (the
    /// status stage of SET_ADDRESS) has completed.
    fn latch_address(&self, address: u8);

    /// Called on every iteration of a busy-wait loop.
    fn relax(&self) {
        core::hint::spin_loop();
    }
}

/// Receives SETUP packets on the default control endpoint.
pub trait CtrlClient {
    /// `setup` holds the raw bytes of the SETUP data stage.
    fn ctrl_setup(&self, setup: &[u8]);
}

/// Receives completed OUT transactions.
pub trait OutClient {
    fn packet_out(&self, endpoint: usize, packet: &[u8]);
}

/// Notified when an armed IN transaction has been transmitted.
pub trait InClient {
    fn packet_in(&self, endpoint: usize);
}

/// Static description of one hardware endpoint, indexed by endpoint number.
///
/// Endpoint 0 is the default control endpoint and must enable both
/// directions.
#[derive(Copy, Clone)]
pub struct EndpointConfiguration<'a> {
    pub directions: EndpointDirections,
    pub out_client: Option<&'a dyn OutClient>,
    pub in_client: Option<&'a dyn InClient>,
}

impl<'a> EndpointConfiguration<'a> {
    pub const fn new(directions: EndpointDirections) -> Self {
        EndpointConfiguration {
            directions,
            out_client: None,
            in_client: None,
        }
    }

    pub const fn with_out_client(self, client: &'a dyn OutClient) -> Self {
        EndpointConfiguration {
            out_client: Some(client),
            ..self
        }
    }

    pub const fn with_in_client(self, client: &'a dyn InClient) -> Self {
        EndpointConfiguration {
            in_client: Some(client),
            ..self
        }
    }
}

#[cfg(test)]
mod test {
    use super::{DataToggle, EndpointDirections};

    #[test]
    fn toggle_alternates() {
        assert_eq!(DataToggle::Data0.next(), DataToggle::Data1);
        assert_eq!(DataToggle::Data1.next(), DataToggle::Data0);
        assert!(!DataToggle::Data0.is_data1());
    }

    #[test]
    fn directions() {
        assert!(EndpointDirections::OutIn.has_out());
        assert!(EndpointDirections::OutIn.has_in());
        assert!(!EndpointDirections::In.has_out());
        assert!(!EndpointDirections::Out.has_in());
    }
}
