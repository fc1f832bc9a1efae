// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Full-speed USB device driver for the PIC18 Serial Interface Engine.
//!
//! The driver owns the Buffer Descriptor Table and is the only code that
//! writes to it. Clients arm endpoints through `hil::usb::UsbController` and
//! are called back from `handle_interrupt`:
//!
//! - SETUP packets on endpoint 0 go to the `CtrlClient`.
//! - token OUT packets go to the endpoint's `OutClient`.
//! - IN completions go to the endpoint's `InClient`, except the status stage
//!   of SET_ADDRESS, which applies the latched device address instead.
//!
//! No ping-pong buffering is used: each endpoint direction has exactly one
//! descriptor and one 64-byte packet buffer.

use core::cell::Cell;
use core::cmp::min;

use kernel::config::CONFIG;
use kernel::debug;
use kernel::hil::usb::{
    CtrlClient, DataToggle, EndpointConfiguration, EndpointDirections, UsbController,
    MAX_PACKET_SIZE,
};
use kernel::utilities::cells::OptionalCell;
use kernel::utilities::registers::LocalRegisterCopy;
use kernel::ErrorCode;

pub mod bdt;
pub mod registers;

use self::bdt::{sie_address, BufferDescriptor, EndpointBuffers, EndpointDescriptors, BD_STAT_SIE};
use self::registers::{bits, snapshot, Register, SieRegisters, UCFG, UCON, UEIR, UEP, UIR, USTAT};

/// Number of endpoints implemented by the SIE.
pub const NUM_ENDPOINTS: usize = 16;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    Out,
    In,
}

struct DirectionState {
    armed: Cell<DataToggle>,
    completed: Cell<Option<DataToggle>>,
}

impl DirectionState {
    fn new() -> DirectionState {
        DirectionState {
            armed: Cell::new(DataToggle::Data0),
            completed: Cell::new(None),
        }
    }

    fn reset(&self) {
        self.armed.set(DataToggle::Data0);
        self.completed.set(None);
    }
}

struct EndpointState {
    out: DirectionState,
    in_: DirectionState,
}

pub struct Usb<'a, R: SieRegisters> {
    registers: &'a R,
    bdt: &'a [EndpointDescriptors],
    buffers: &'a [EndpointBuffers],
    endpoints: OptionalCell<&'a [EndpointConfiguration<'a>]>,
    state: [EndpointState; NUM_ENDPOINTS],
    ctrl_client: OptionalCell<&'a dyn CtrlClient>,
    pending_address: OptionalCell<u8>,
}

impl<'a, R: SieRegisters> Usb<'a, R> {
    /// `bdt` and `buffers` must be the descriptor table and packet memory the
    /// SIE is wired to, with at least one entry per endpoint that will be
    /// configured.
    pub fn new(
        registers: &'a R,
        bdt: &'a [EndpointDescriptors],
        buffers: &'a [EndpointBuffers],
    ) -> Usb<'a, R> {
        Usb {
            registers,
            bdt,
            buffers,
            endpoints: OptionalCell::empty(),
            state: core::array::from_fn(|_| EndpointState {
                out: DirectionState::new(),
                in_: DirectionState::new(),
            }),
            ctrl_client: OptionalCell::empty(),
            pending_address: OptionalCell::empty(),
        }
    }

    pub fn set_ctrl_client(&self, client: &'a dyn CtrlClient) {
        self.ctrl_client.set(client);
    }

    /// Configure the SIE for the endpoint table and attach to the bus.
    ///
    /// Every OUT direction is armed with DATA0, ready for the first packet
    /// from the host.
    pub fn initialize(&self, endpoints: &'a [EndpointConfiguration<'a>]) -> Result<(), ErrorCode> {
        let available = min(NUM_ENDPOINTS, min(self.bdt.len(), self.buffers.len()));
        if endpoints.is_empty() || endpoints.len() > available {
            debug!(
                "USB: {} endpoints configured, only {} available",
                endpoints.len(),
                available
            );
            return Err(ErrorCode::SIZE);
        }
        if endpoints[0].directions != EndpointDirections::OutIn {
            debug!("USB: endpoint 0 must enable both directions");
            return Err(ErrorCode::INVAL);
        }

        if CONFIG.trace_usb {
            debug!("USB: configuring {} hardware endpoints", endpoints.len());
        }

        // Pull-up on, full speed, no ping-pong buffers.
        self.registers.write(
            Register::Ucfg,
            bits(UCFG::UPUEN::SET + UCFG::FSEN::SET + UCFG::PPB::Disabled),
        );
        self.registers.write(Register::Ucon, 0);
        self.pending_address.clear();
        self.endpoints.set(endpoints);

        for (endpoint, config) in endpoints.iter().enumerate() {
            let descriptors = &self.bdt[endpoint];
            let buffers = &self.buffers[endpoint];
            descriptors.out.set_buffer_address(sie_address(&buffers.out));
            descriptors.in_.set_buffer_address(sie_address(&buffers.in_));
            descriptors.out.release();
            descriptors.in_.release();
            self.state[endpoint].out.reset();
            self.state[endpoint].in_.reset();

            self.registers.write(
                Register::Uep(endpoint),
                bits(UEP::EPHSHK::SET + UEP::EPCONDIS::SET) | direction_bits(config.directions),
            );

            if config.directions.has_out() {
                self.arm_out(endpoint, DataToggle::Data0)?;
            }
        }

        // The default control endpoint accepts SETUP tokens.
        self.registers.write(
            Register::Uep(0),
            bits(UEP::EPHSHK::SET + UEP::EPOUTEN::SET + UEP::EPINEN::SET),
        );

        self.registers.write(
            Register::Uie,
            bits(UIR::STALLIF::SET + UIR::TRNIF::SET + UIR::URSTIF::SET),
        );
        self.registers.set_bits(Register::Ucon, bits(UCON::USBEN::SET));
        Ok(())
    }

    /// Data toggle of the last completed transaction on an endpoint
    /// direction, if any completed since initialization.
    pub fn last_toggle(&self, endpoint: usize, direction: Direction) -> Option<DataToggle> {
        let state = self.state.get(endpoint)?;
        match direction {
            Direction::Out => state.out.completed.get(),
            Direction::In => state.in_.completed.get(),
        }
    }

    fn configuration(&self, endpoint: usize) -> Option<EndpointConfiguration<'a>> {
        self.endpoints
            .and_then(|endpoints| endpoints.get(endpoint).copied())
    }

    fn out_descriptor(&self, endpoint: usize) -> Result<&'a BufferDescriptor, ErrorCode> {
        match self.configuration(endpoint) {
            Some(config) if config.directions.has_out() => Ok(&self.bdt[endpoint].out),
            _ => Err(ErrorCode::INVAL),
        }
    }

    fn in_descriptor(&self, endpoint: usize) -> Result<&'a BufferDescriptor, ErrorCode> {
        match self.configuration(endpoint) {
            Some(config) if config.directions.has_in() => Ok(&self.bdt[endpoint].in_),
            _ => Err(ErrorCode::INVAL),
        }
    }

    /// Spin until the SIE gives `descriptor` back. Unbounded.
    fn wait_released(&self, descriptor: &BufferDescriptor) {
        while descriptor.owned_by_sie() {
            self.registers.relax();
        }
    }

    /// Entry point of the SIE interrupt. Must not be re-entered.
    pub fn handle_interrupt(&self) {
        let uir: LocalRegisterCopy<u8, UIR::Register> = snapshot(self.registers, Register::Uir);
        let ustat: LocalRegisterCopy<u8, USTAT::Register> =
            snapshot(self.registers, Register::Ustat);
        let endpoint = ustat.read(USTAT::ENDP) as usize;
        let direction = if ustat.is_set(USTAT::DIR) {
            Direction::In
        } else {
            Direction::Out
        };

        if CONFIG.trace_usb {
            self.trace_interrupt(uir, endpoint, direction);
        }

        // Stale error flags would hide the next error.
        let errors: LocalRegisterCopy<u8, UEIR::Register> =
            snapshot(self.registers, Register::Ueir);
        if errors.get() != 0 {
            debug!("USB: SIE error flags {:#04x}{}", errors.get(), ErrorNames(errors));
            self.registers.write(Register::Ueir, 0);
        }

        if uir.is_set(UIR::URSTIF) {
            // Everything else is stale until the host enumerates again.
            if CONFIG.trace_usb {
                debug!("USB: bus reset");
            }
            self.registers.clear_bits(Register::Uir, bits(UIR::URSTIF::SET));
            return;
        }

        if uir.is_set(UIR::STALLIF) {
            if CONFIG.trace_usb {
                debug!(
                    "USB: STALL handshake on endpoint {} {:?}, clearing stall",
                    endpoint, direction
                );
            }
            if self.configuration(endpoint).is_some() {
                self.registers
                    .clear_bits(Register::Uep(endpoint), bits(UEP::EPSTALL::SET));
                // Otherwise the SIE keeps the stalled IN descriptor forever.
                self.bdt[endpoint].in_.release();
            }
            self.registers.clear_bits(Register::Uir, bits(UIR::STALLIF::SET));
            return;
        }

        if uir.is_set(UIR::TRNIF) {
            if self.configuration(endpoint).is_none() {
                debug!("USB: transaction on unconfigured endpoint {}", endpoint);
            } else {
                match direction {
                    Direction::In => self.in_complete(endpoint),
                    Direction::Out => self.out_complete(endpoint),
                }
            }
            self.registers.clear_bits(Register::Uir, bits(UIR::TRNIF::SET));
        }
    }

    fn in_complete(&self, endpoint: usize) {
        let state = &self.state[endpoint].in_;
        state.completed.set(Some(state.armed.get()));

        if CONFIG.trace_usb {
            debug!(
                "USB: sent {} bytes from endpoint {}",
                self.bdt[endpoint].in_.byte_count(),
                endpoint
            );
        }

        // The address only changes after the status stage of SET_ADDRESS
        // completed on the old address.
        match self.pending_address.take() {
            Some(address) => {
                if CONFIG.trace_usb {
                    debug!("USB: device address is now {}", address);
                }
                self.registers.write(Register::Uaddr, address);
            }
            None => {
                if let Some(client) = self.configuration(endpoint).and_then(|c| c.in_client) {
                    client.packet_in(endpoint);
                }
            }
        }
    }

    fn out_complete(&self, endpoint: usize) {
        let descriptor = &self.bdt[endpoint].out;
        let state = &self.state[endpoint].out;
        state.completed.set(Some(state.armed.get()));

        let mut packet = [0; MAX_PACKET_SIZE];
        let length = min(descriptor.byte_count(), MAX_PACKET_SIZE);
        for (dst, src) in packet.iter_mut().zip(self.buffers[endpoint].out.iter()) {
            *dst = src.get();
        }
        let packet = &packet[..length];

        if CONFIG.trace_usb {
            debug!(
                "USB: received {} bytes on endpoint {}: {:02x?}",
                length, endpoint, packet
            );
        }

        let status = descriptor.sie_status();
        match status.read_as_enum(BD_STAT_SIE::PID) {
            Some(BD_STAT_SIE::PID::Value::TokenOut) => {
                if let Some(client) = self.configuration(endpoint).and_then(|c| c.out_client) {
                    client.packet_out(endpoint, packet);
                }
            }
            Some(BD_STAT_SIE::PID::Value::HandshakeAck) => {
                if CONFIG.trace_usb {
                    debug!("USB: handshake ACK on endpoint {}", endpoint);
                }
            }
            Some(BD_STAT_SIE::PID::Value::TokenSetup) => {
                if endpoint == 0 {
                    self.ctrl_client.map(|client| client.ctrl_setup(packet));
                } else {
                    debug!("USB: SETUP on non-control endpoint {}", endpoint);
                }
                // The SIE stops processing packets on every SETUP.
                self.registers
                    .clear_bits(Register::Ucon, bits(UCON::PKTDIS::SET));
            }
            None => {
                debug!(
                    "USB: unknown PID {:#x} on endpoint {}",
                    status.read(BD_STAT_SIE::PID),
                    endpoint
                );
            }
        }
    }

    fn trace_interrupt(
        &self,
        uir: LocalRegisterCopy<u8, UIR::Register>,
        endpoint: usize,
        direction: Direction,
    ) {
        debug!("USB: interrupt, UIR {:#04x}{}", uir.get(), FlagNames(uir));

        let ucon: LocalRegisterCopy<u8, UCON::Register> = snapshot(self.registers, Register::Ucon);
        if ucon.is_set(UCON::PKTDIS) {
            debug!("USB: packet processing is disabled (PKTDIS)");
        }

        debug!("USB: last transaction on endpoint {} {:?}", endpoint, direction);
        if endpoint < self.bdt.len() && direction == Direction::Out {
            let pid = self.bdt[endpoint].out.sie_status().read(BD_STAT_SIE::PID);
            debug!("USB: received PID {}", pid_name(pid));
        }

        let uep: LocalRegisterCopy<u8, UEP::Register> =
            snapshot(self.registers, Register::Uep(endpoint));
        if uep.is_set(UEP::EPSTALL) {
            debug!("USB: endpoint {} is stalled", endpoint);
        }
    }
}

impl<R: SieRegisters> UsbController for Usb<'_, R> {
    fn arm_out(&self, endpoint: usize, toggle: DataToggle) -> Result<(), ErrorCode> {
        let descriptor = self.out_descriptor(endpoint)?;
        self.wait_released(descriptor);
        self.state[endpoint].out.armed.set(toggle);
        descriptor.hand_to_sie(MAX_PACKET_SIZE, toggle);
        Ok(())
    }

    fn arm_in(&self, endpoint: usize, packet: &[u8], toggle: DataToggle) -> Result<(), ErrorCode> {
        let descriptor = self.in_descriptor(endpoint)?;
        if packet.len() > MAX_PACKET_SIZE {
            return Err(ErrorCode::SIZE);
        }
        self.wait_released(descriptor);
        for (dst, src) in self.buffers[endpoint].in_.iter().zip(packet.iter()) {
            dst.set(*src);
        }
        self.state[endpoint].in_.armed.set(toggle);
        descriptor.hand_to_sie(packet.len(), toggle);
        Ok(())
    }

    fn stall_in(&self, endpoint: usize) -> Result<(), ErrorCode> {
        let descriptor = self.in_descriptor(endpoint)?;
        descriptor.stall();
        Ok(())
    }

    fn latch_address(&self, address: u8) {
        self.pending_address.set(address & 0x7f);
    }

    fn relax(&self) {
        self.registers.relax();
    }
}

fn direction_bits(directions: EndpointDirections) -> u8 {
    match directions {
        EndpointDirections::Out => bits(UEP::EPOUTEN::SET),
        EndpointDirections::In => bits(UEP::EPINEN::SET),
        EndpointDirections::OutIn => bits(UEP::EPOUTEN::SET + UEP::EPINEN::SET),
    }
}

fn pid_name(pid: u8) -> &'static str {
    match pid {
        0x1 => "token OUT",
        0x2 => "handshake ACK",
        0xD => "token SETUP",
        _ => "unknown",
    }
}

/// Formats the names of the flags set in UIR.
struct FlagNames(LocalRegisterCopy<u8, UIR::Register>);

impl core::fmt::Display for FlagNames {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        let flags = [
            (UIR::SOFIF, "SOF"),
            (UIR::STALLIF, "STALL"),
            (UIR::IDLEIF, "IDLE"),
            (UIR::TRNIF, "TRANSCOMP"),
            (UIR::ACTVIF, "BUSACT"),
            (UIR::UERRIF, "USBERR"),
            (UIR::URSTIF, "RESET"),
        ];
        for (field, name) in flags {
            if self.0.is_set(field) {
                write!(f, " {}", name)?;
            }
        }
        Ok(())
    }
}

/// Formats the names of the error flags set in UEIR.
struct ErrorNames(LocalRegisterCopy<u8, UEIR::Register>);

impl core::fmt::Display for ErrorNames {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        let flags = [
            (UEIR::BTSEF, "bit stuff"),
            (UEIR::BTOEF, "bus turnaround"),
            (UEIR::DFN8EF, "data field size"),
            (UEIR::CRC16EF, "CRC16"),
            (UEIR::CRC5EF, "CRC5"),
            (UEIR::PIDEF, "PID check"),
        ];
        for (field, name) in flags {
            if self.0.is_set(field) {
                write!(f, " [{}]", name)?;
            }
        }
        Ok(())
    }
}
