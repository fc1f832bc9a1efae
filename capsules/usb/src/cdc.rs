// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! CDC-ACM byte stream.
//!
//! Exposes the bulk endpoint pair of a CDC-ACM function as a blocking
//! character stream, and answers the PSTN class requests the host sends
//! while opening the port. Line settings are recorded but never applied:
//! there is no UART behind this stream.
//!
//! Usage
//! -----
//!
//! All objects live for the whole program; `USB`, `CHIP` and `RX_STORAGE`
//! are provided by the board.
//!
//! ```rust,ignore
//! let ctrl = ClientCtrl::new(&USB, &cdc::DEVICE_TREE);
//! let cdc = CdcAcm::new(&USB, &CHIP, &RX_STORAGE);
//! ctrl.set_class_client(&cdc);
//! USB.set_ctrl_client(&ctrl);
//! let endpoints = cdc.endpoint_configuration();
//! USB.initialize(&endpoints)?;
//! ```

use core::cell::Cell;
use core::cmp::min;

use kernel::collections::ring_buffer::RingBuffer;
use kernel::config::CONFIG;
use kernel::debug;
use kernel::hil::usb::{
    DataToggle, EndpointConfiguration, EndpointDirections, InClient, OutClient, TransferType,
    UsbController, MAX_PACKET_SIZE,
};
use kernel::platform::chip::InterruptControl;
use kernel::utilities::cells::VolatileCell;
use kernel::ErrorCode;

use crate::descriptors::{
    Configuration, ConfigurationAttributes, ConfigurationDescriptor, CsInterfaceDescriptor,
    CsInterfaceDescriptorSubType, DeviceDescriptor, DeviceTree, EndpointAddress,
    EndpointDescriptor, Interface, InterfaceDescriptor, RequestType, SetupData,
    TransferDirection,
};
use crate::usbc_client_ctrl::ClassClient;

/// Interrupt IN endpoint for serial state notifications. Never used.
pub const NOTIFICATION_ENDPOINT: usize = 1;
pub const DATA_OUT_ENDPOINT: usize = 2;
pub const DATA_IN_ENDPOINT: usize = 3;

const VENDOR_ID: u16 = 0x1240;
const PRODUCT_ID: u16 = 0xFADA;

// PSTN request codes
const SET_LINE_CODING: u8 = 0x20;
const GET_LINE_CODING: u8 = 0x21;
const SET_CONTROL_LINE_STATE: u8 = 0x22;

static LANGUAGES: &[u16; 1] = &[
    0x040C, // French (Standard)
];

static STRINGS: &[&str] = &[
    "RICCIARDI DATA SYSTEM",  // Manufacturer
    "Logic Signal Generator", // Product
    "0.1",                    // Serial number
];

static COMMUNICATION_FUNCTIONAL: [CsInterfaceDescriptor; 3] = [
    CsInterfaceDescriptor {
        subtype: CsInterfaceDescriptorSubType::Header,
        // bcdCDC 1.20
        field1: 0x20,
        field2: 0x01,
    },
    CsInterfaceDescriptor {
        subtype: CsInterfaceDescriptorSubType::AbstractControlManagement,
        field1: 0x00,
        field2: 0x00,
    },
    CsInterfaceDescriptor {
        subtype: CsInterfaceDescriptorSubType::Union,
        field1: 0, // control interface
        field2: 1, // subordinate interface
    },
];

static COMMUNICATION_ENDPOINTS: [EndpointDescriptor; 1] = [EndpointDescriptor {
    endpoint_address: EndpointAddress::new_const(
        NOTIFICATION_ENDPOINT,
        TransferDirection::DeviceToHost,
    ),
    transfer_type: TransferType::Interrupt,
    max_packet_size: 8,
    interval: 255,
}];

static DATA_ENDPOINTS: [EndpointDescriptor; 2] = [
    EndpointDescriptor {
        endpoint_address: EndpointAddress::new_const(
            DATA_OUT_ENDPOINT,
            TransferDirection::HostToDevice,
        ),
        transfer_type: TransferType::Bulk,
        max_packet_size: MAX_PACKET_SIZE as u16,
        interval: 1,
    },
    EndpointDescriptor {
        endpoint_address: EndpointAddress::new_const(
            DATA_IN_ENDPOINT,
            TransferDirection::DeviceToHost,
        ),
        transfer_type: TransferType::Bulk,
        max_packet_size: MAX_PACKET_SIZE as u16,
        interval: 1,
    },
];

static INTERFACES: [Interface; 2] = [
    Interface {
        descriptor: InterfaceDescriptor {
            interface_number: 0,
            alternate_setting: 0,
            interface_class: 0x02,    // CDC communication
            interface_subclass: 0x02, // abstract control model (ACM)
            interface_protocol: 0x01, // ITU-T V.250 (AT commands)
            string_index: 0,
        },
        functional: &COMMUNICATION_FUNCTIONAL,
        endpoints: &COMMUNICATION_ENDPOINTS,
    },
    Interface {
        descriptor: InterfaceDescriptor {
            interface_number: 1,
            alternate_setting: 0,
            interface_class: 0x0a,    // CDC data
            interface_subclass: 0x00, // none
            interface_protocol: 0x00, // none
            string_index: 0,
        },
        functional: &[],
        endpoints: &DATA_ENDPOINTS,
    },
];

static CONFIGURATIONS: [Configuration; 1] = [Configuration {
    descriptor: ConfigurationDescriptor {
        configuration_value: 1,
        string_index: 0,
        // Bus powered, no remote wakeup
        attributes: ConfigurationAttributes::new(false, false),
        max_power: 250, // 500 mA, for boards powered from the instrument
    },
    interfaces: &INTERFACES,
}];

/// Descriptors of the logic signal generator.
pub static DEVICE_TREE: DeviceTree<'static> = DeviceTree {
    device: DeviceDescriptor {
        usb_release: 0x0200,
        class: 0x02, // CDC, interfaces tell the rest
        subclass: 0x00,
        protocol: 0x00,
        max_packet_size_ep0: MAX_PACKET_SIZE as u8,
        vendor_id: VENDOR_ID,
        product_id: PRODUCT_ID,
        device_release: 0x0001,
        manufacturer_string: 1,
        product_string: 2,
        serial_number_string: 3,
        num_configurations: 1,
    },
    configurations: &CONFIGURATIONS,
    languages: LANGUAGES,
    strings: STRINGS,
};

/// PSTN line coding record (SET_LINE_CODING / GET_LINE_CODING payload).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LineCoding {
    pub baud_rate: u32,
    /// 0: 1 stop bit, 1: 1.5 stop bits, 2: 2 stop bits
    pub stop_bits: u8,
    pub parity: u8,
    pub data_bits: u8,
}

impl LineCoding {
    const SIZE: usize = 7;

    pub fn parse(payload: &[u8]) -> Option<LineCoding> {
        if payload.len() != Self::SIZE {
            return None;
        }
        Some(LineCoding {
            baud_rate: u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]),
            stop_bits: payload[4],
            parity: payload[5],
            data_bits: payload[6],
        })
    }

    pub fn to_bytes(&self) -> [u8; 7] {
        let [b0, b1, b2, b3] = self.baud_rate.to_le_bytes();
        [b0, b1, b2, b3, self.stop_bits, self.parity, self.data_bits]
    }

    pub fn parity_name(&self) -> &'static str {
        match self.parity {
            0 => "none",
            1 => "odd",
            2 => "even",
            3 => "mark",
            4 => "space",
            _ => "unknown",
        }
    }
}

impl Default for LineCoding {
    fn default() -> Self {
        LineCoding {
            baud_rate: 115200,
            stop_bits: 0,
            parity: 0,
            data_bits: 8,
        }
    }
}

/// Progress of a class-specific control transfer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ControlTransferState {
    AwaitingRequest,
    /// The SETUP announced a host-to-device data stage, which arrives as the
    /// next OUT packet on endpoint 0.
    AwaitingPayload(SetupData),
}

pub struct CdcAcm<'a, C: UsbController, I: InterruptControl> {
    controller: &'a C,
    chip: &'a I,

    state: Cell<ControlTransferState>,
    line_coding: Cell<LineCoding>,
    control_line_state: Cell<u16>,

    /// Filled by the data OUT endpoint, drained by `read_character`.
    rx: RingBuffer<'a, u8>,
    /// Toggle for the next re-arm of the data OUT endpoint. Initialization
    /// armed it with DATA0.
    rx_toggle: Cell<DataToggle>,

    /// Whether the data IN endpoint can take another packet. Set from the
    /// interrupt handler while `write_string` polls it.
    tx_ready: VolatileCell<bool>,
    tx_toggle: Cell<DataToggle>,
}

impl<'a, C: UsbController, I: InterruptControl> CdcAcm<'a, C, I> {
    /// `rx_storage` sets the receive buffer capacity.
    pub fn new(controller: &'a C, chip: &'a I, rx_storage: &'a [Cell<u8>]) -> Self {
        CdcAcm {
            controller,
            chip,
            state: Cell::new(ControlTransferState::AwaitingRequest),
            line_coding: Cell::new(LineCoding::default()),
            control_line_state: Cell::new(0),
            rx: RingBuffer::new(rx_storage),
            rx_toggle: Cell::new(DataToggle::Data1),
            tx_ready: VolatileCell::new(true),
            tx_toggle: Cell::new(DataToggle::Data0),
        }
    }

    /// Hardware endpoint table for `Usb::initialize`, indexed by endpoint.
    pub fn endpoint_configuration(&'a self) -> [EndpointConfiguration<'a>; 4] {
        [
            EndpointConfiguration::new(EndpointDirections::OutIn).with_out_client(self),
            EndpointConfiguration::new(EndpointDirections::In),
            EndpointConfiguration::new(EndpointDirections::Out).with_out_client(self),
            EndpointConfiguration::new(EndpointDirections::OutIn).with_in_client(self),
        ]
    }

    pub fn control_transfer_state(&self) -> ControlTransferState {
        self.state.get()
    }

    pub fn line_coding(&self) -> LineCoding {
        self.line_coding.get()
    }

    /// Last SET_CONTROL_LINE_STATE bitmap (bit 0 DTR, bit 1 RTS).
    pub fn control_line_state(&self) -> u16 {
        self.control_line_state.get()
    }

    /// Block until a byte has been received and return it.
    pub fn read_character(&self) -> u8 {
        loop {
            if self.rx.has_elements() {
                if let Some(byte) = self.chip.atomic(|| self.rx.dequeue()) {
                    return byte;
                }
            }
            self.controller.relax();
        }
    }

    /// Read bytes into `buf` until CR or LF, which is consumed but not
    /// stored, or until `buf` is full. Returns the number of bytes stored.
    pub fn read_line(&self, buf: &mut [u8]) -> usize {
        let mut len = 0;
        while len < buf.len() {
            match self.read_character() {
                b'\r' | b'\n' => break,
                byte => {
                    buf[len] = byte;
                    len += 1;
                }
            }
        }
        len
    }

    pub fn write_character(&self, byte: u8) -> Result<(), ErrorCode> {
        self.write_string(&[byte])
    }

    /// Send `bytes` as a sequence of packets, one at a time. Blocks until
    /// every packet has been handed to the controller.
    pub fn write_string(&self, bytes: &[u8]) -> Result<(), ErrorCode> {
        for chunk in bytes.chunks(MAX_PACKET_SIZE) {
            while !self.tx_ready.get() {
                self.controller.relax();
            }
            self.tx_ready.set(false);
            let toggle = self.tx_toggle.get();
            if let Err(e) = self.controller.arm_in(DATA_IN_ENDPOINT, chunk, toggle) {
                self.tx_ready.set(true);
                return Err(e);
            }
            self.tx_toggle.set(toggle.next());
        }
        Ok(())
    }

    /// Finish the control transfer with a zero-length status packet.
    fn acknowledge(&self) {
        self.send_control(&[]);
    }

    fn send_control(&self, data: &[u8]) {
        let result = self
            .controller
            .arm_in(0, data, DataToggle::Data1)
            .and_then(|()| self.controller.arm_out(0, DataToggle::Data0));
        if let Err(e) = result {
            debug!("CDC: cannot complete control transfer: {:?}", e);
        }
    }

    fn process_payload(&self, setup: SetupData, payload: &[u8]) {
        if payload.len() != setup.length as usize {
            debug!(
                "CDC: request {:#04x} announced {} bytes, got {}, ignored",
                setup.request_code,
                setup.length,
                payload.len()
            );
            return;
        }
        match setup.request_code {
            SET_LINE_CODING if is_pstn(&setup) => match LineCoding::parse(payload) {
                Some(coding) => {
                    if CONFIG.trace_usb_class {
                        debug!(
                            "CDC: line coding {} baud, stop bits {}, parity {}, {} data bits",
                            coding.baud_rate,
                            coding.stop_bits,
                            coding.parity_name(),
                            coding.data_bits
                        );
                    }
                    self.line_coding.set(coding);
                }
                None => debug!("CDC: malformed line coding ({} bytes)", payload.len()),
            },
            code => {
                if CONFIG.trace_usb_class {
                    debug!("CDC: unsupported request {:#04x}, payload ignored", code);
                }
            }
        }
    }

    fn receive(&self, packet: &[u8]) {
        let mut dropped = 0;
        for byte in packet {
            if !self.rx.enqueue(*byte) {
                dropped += 1;
            }
        }
        if dropped > 0 {
            debug!("CDC: receive buffer full, {} bytes dropped", dropped);
        }

        // Even when bytes were dropped, or the host waits forever.
        let toggle = self.rx_toggle.get();
        if let Err(e) = self.controller.arm_out(DATA_OUT_ENDPOINT, toggle) {
            debug!("CDC: cannot re-arm data OUT endpoint: {:?}", e);
        }
        self.rx_toggle.set(toggle.next());
    }

    /// Drop a class request still waiting for its data stage.
    fn abandon_pending(&self) {
        if let ControlTransferState::AwaitingPayload(pending) = self.state.get() {
            debug!(
                "CDC: request {:#04x} abandoned before its data stage",
                pending.request_code
            );
        }
        self.state.set(ControlTransferState::AwaitingRequest);
    }
}

/// PSTN request codes only mean something in class requests.
fn is_pstn(setup: &SetupData) -> bool {
    setup.request_type.request_type() == RequestType::Class
}

impl<C: UsbController, I: InterruptControl> ClassClient for CdcAcm<'_, C, I> {
    fn standard_setup(&self) {
        self.abandon_pending();
    }

    fn class_setup(&self, setup: SetupData) {
        if CONFIG.trace_usb_class {
            debug!("CDC: request {:#04x} {:?}", setup.request_code, setup);
        }
        self.abandon_pending();

        let to_device = setup.request_type.transfer_direction() == TransferDirection::HostToDevice;
        if to_device && setup.length > 0 {
            // The data stage comes with DATA1; acknowledge once it arrived.
            self.state.set(ControlTransferState::AwaitingPayload(setup));
            if let Err(e) = self.controller.arm_out(0, DataToggle::Data1) {
                debug!("CDC: cannot arm data stage: {:?}", e);
            }
            return;
        }

        match setup.request_code {
            GET_LINE_CODING if is_pstn(&setup) && !to_device => {
                let coding = self.line_coding.get().to_bytes();
                self.send_control(&coding[..min(coding.len(), setup.length as usize)]);
            }
            SET_CONTROL_LINE_STATE if is_pstn(&setup) && to_device => {
                if CONFIG.trace_usb_class {
                    debug!(
                        "CDC: control line state DTR {} RTS {}",
                        setup.value & 1,
                        (setup.value >> 1) & 1
                    );
                }
                self.control_line_state.set(setup.value);
                self.acknowledge();
            }
            code => {
                if CONFIG.trace_usb_class {
                    debug!("CDC: unsupported request {:#04x}", code);
                }
                // Keeps the transfer well formed, whichever its direction.
                self.acknowledge();
            }
        }
    }
}

impl<C: UsbController, I: InterruptControl> OutClient for CdcAcm<'_, C, I> {
    fn packet_out(&self, endpoint: usize, packet: &[u8]) {
        match endpoint {
            0 => match self.state.get() {
                ControlTransferState::AwaitingPayload(setup) => {
                    self.process_payload(setup, packet);
                    self.state.set(ControlTransferState::AwaitingRequest);
                    self.acknowledge();
                }
                ControlTransferState::AwaitingRequest => {
                    if !packet.is_empty() {
                        debug!("CDC: unexpected {} byte OUT on endpoint 0", packet.len());
                    } else if CONFIG.trace_usb_class {
                        debug!("CDC: status stage complete");
                    }
                    if let Err(e) = self.controller.arm_out(0, DataToggle::Data0) {
                        debug!("CDC: cannot re-arm endpoint 0: {:?}", e);
                    }
                }
            },
            DATA_OUT_ENDPOINT => self.receive(packet),
            _ => debug!("CDC: OUT packet on endpoint {} ignored", endpoint),
        }
    }
}

impl<C: UsbController, I: InterruptControl> InClient for CdcAcm<'_, C, I> {
    fn packet_in(&self, endpoint: usize) {
        if endpoint == DATA_IN_ENDPOINT {
            self.tx_ready.set(true);
        }
    }
}

#[cfg(test)]
mod test {
    extern crate std;

    use super::*;
    use crate::usbc_client_ctrl::ClientCtrl;
    use core::cell::RefCell;
    use kernel::hil::usb::CtrlClient;
    use kernel::utilities::cells::OptionalCell;
    use std::vec::Vec;

    #[derive(Debug, PartialEq, Eq)]
    enum Call {
        Out(usize, DataToggle),
        In(usize, Vec<u8>, DataToggle),
        Stall(usize),
        Latch(u8),
        Relax,
    }

    /// Records every request. Each busy-wait iteration completes the
    /// pending data IN transmission and delivers any bytes queued in
    /// `incoming`, as the interrupt handler would.
    struct Controller<'a> {
        calls: RefCell<Vec<Call>>,
        in_client: OptionalCell<&'a dyn InClient>,
        out_client: OptionalCell<&'a dyn OutClient>,
        incoming: RefCell<Vec<u8>>,
        masked: Cell<bool>,
        critical_sections: Cell<usize>,
    }

    impl<'a> Controller<'a> {
        fn new() -> Controller<'a> {
            Controller {
                calls: RefCell::new(Vec::new()),
                in_client: OptionalCell::empty(),
                out_client: OptionalCell::empty(),
                incoming: RefCell::new(Vec::new()),
                masked: Cell::new(false),
                critical_sections: Cell::new(0),
            }
        }

        fn take(&self) -> Vec<Call> {
            self.calls.take()
        }
    }

    impl UsbController for Controller<'_> {
        fn arm_out(&self, endpoint: usize, toggle: DataToggle) -> Result<(), ErrorCode> {
            self.calls.borrow_mut().push(Call::Out(endpoint, toggle));
            Ok(())
        }

        fn arm_in(
            &self,
            endpoint: usize,
            packet: &[u8],
            toggle: DataToggle,
        ) -> Result<(), ErrorCode> {
            self.calls
                .borrow_mut()
                .push(Call::In(endpoint, packet.to_vec(), toggle));
            Ok(())
        }

        fn stall_in(&self, endpoint: usize) -> Result<(), ErrorCode> {
            self.calls.borrow_mut().push(Call::Stall(endpoint));
            Ok(())
        }

        fn latch_address(&self, address: u8) {
            self.calls.borrow_mut().push(Call::Latch(address));
        }

        fn relax(&self) {
            self.calls.borrow_mut().push(Call::Relax);
            self.in_client
                .map(|client| client.packet_in(DATA_IN_ENDPOINT));
            let incoming = self.incoming.take();
            if !incoming.is_empty() {
                self.out_client
                    .map(|client| client.packet_out(DATA_OUT_ENDPOINT, &incoming));
            }
        }
    }

    impl InterruptControl for Controller<'_> {
        fn disable_interrupts(&self) {
            assert!(!self.masked.get());
            self.masked.set(true);
            self.critical_sections.set(self.critical_sections.get() + 1);
        }

        fn enable_interrupts(&self) {
            self.masked.set(false);
        }
    }

    fn storage<const N: usize>() -> [Cell<u8>; N] {
        core::array::from_fn(|_| Cell::new(0))
    }

    fn setup(bytes: [u8; 8]) -> SetupData {
        SetupData::get(&bytes).unwrap()
    }

    const SET_LINE_CODING_7: [u8; 8] = [0x21, 0x20, 0, 0, 0, 0, 7, 0];

    #[test]
    fn line_coding_waits_for_payload() {
        let controller = Controller::new();
        let rx = storage::<8>();
        let cdc = CdcAcm::new(&controller, &controller, &rx);

        cdc.class_setup(setup(SET_LINE_CODING_7));
        assert_eq!(
            cdc.control_transfer_state(),
            ControlTransferState::AwaitingPayload(setup(SET_LINE_CODING_7))
        );
        assert_eq!(controller.take(), [Call::Out(0, DataToggle::Data1)]);

        // 9600 baud, 2 stop bits, even parity, 7 data bits
        cdc.packet_out(0, &[0x80, 0x25, 0x00, 0x00, 2, 2, 7]);
        assert_eq!(
            controller.take(),
            [
                Call::In(0, Vec::new(), DataToggle::Data1),
                Call::Out(0, DataToggle::Data0)
            ]
        );
        assert_eq!(
            cdc.control_transfer_state(),
            ControlTransferState::AwaitingRequest
        );
        let coding = cdc.line_coding();
        assert_eq!(coding.baud_rate, 9600);
        assert_eq!(coding.stop_bits, 2);
        assert_eq!(coding.parity_name(), "even");
        assert_eq!(coding.data_bits, 7);
    }

    #[test]
    fn short_payload_is_acknowledged_but_ignored() {
        let controller = Controller::new();
        let rx = storage::<8>();
        let cdc = CdcAcm::new(&controller, &controller, &rx);

        cdc.class_setup(setup(SET_LINE_CODING_7));
        controller.take();
        cdc.packet_out(0, &[0x80, 0x25, 0x00, 0x00, 2, 2]);

        assert_eq!(cdc.line_coding(), LineCoding::default());
        assert_eq!(
            controller.take(),
            [
                Call::In(0, Vec::new(), DataToggle::Data1),
                Call::Out(0, DataToggle::Data0)
            ]
        );
        assert_eq!(
            cdc.control_transfer_state(),
            ControlTransferState::AwaitingRequest
        );
    }

    #[test]
    fn requests_without_payload_complete_immediately() {
        let controller = Controller::new();
        let rx = storage::<8>();
        let cdc = CdcAcm::new(&controller, &controller, &rx);

        cdc.class_setup(setup([0x21, 0x22, 0x03, 0, 0, 0, 0, 0]));
        assert_eq!(cdc.control_line_state(), 3);
        assert_eq!(
            controller.take(),
            [
                Call::In(0, Vec::new(), DataToggle::Data1),
                Call::Out(0, DataToggle::Data0)
            ]
        );

        // Unknown device-to-host request: zero-length answer.
        cdc.class_setup(setup([0xa1, 0x7f, 0, 0, 0, 0, 4, 0]));
        assert_eq!(
            controller.take(),
            [
                Call::In(0, Vec::new(), DataToggle::Data1),
                Call::Out(0, DataToggle::Data0)
            ]
        );
        assert_eq!(
            cdc.control_transfer_state(),
            ControlTransferState::AwaitingRequest
        );
    }

    #[test]
    fn get_line_coding_reports_current_settings() {
        let controller = Controller::new();
        let rx = storage::<8>();
        let cdc = CdcAcm::new(&controller, &controller, &rx);

        cdc.class_setup(setup([0xa1, 0x21, 0, 0, 0, 0, 7, 0]));
        assert_eq!(
            controller.take(),
            [
                Call::In(0, std::vec![0x00, 0xc2, 0x01, 0x00, 0, 0, 8], DataToggle::Data1),
                Call::Out(0, DataToggle::Data0)
            ]
        );

        cdc.class_setup(setup([0xa1, 0x21, 0, 0, 0, 0, 4, 0]));
        assert_eq!(
            controller.take()[0],
            Call::In(0, std::vec![0x00, 0xc2, 0x01, 0x00], DataToggle::Data1)
        );
    }

    #[test]
    fn new_setup_restarts_pending_transfer() {
        let controller = Controller::new();
        let rx = storage::<8>();
        let cdc = CdcAcm::new(&controller, &controller, &rx);

        cdc.class_setup(setup(SET_LINE_CODING_7));
        let other = setup([0x21, 0x7e, 0, 0, 0, 0, 2, 0]);
        cdc.class_setup(other);
        assert_eq!(
            cdc.control_transfer_state(),
            ControlTransferState::AwaitingPayload(other)
        );

        // Processed against the newer request, so not parsed as line coding.
        cdc.packet_out(0, &[1, 2]);
        assert_eq!(cdc.line_coding(), LineCoding::default());
        assert_eq!(
            cdc.control_transfer_state(),
            ControlTransferState::AwaitingRequest
        );
    }

    #[test]
    fn standard_request_ends_pending_class_transfer() {
        let controller = Controller::new();
        let rx = storage::<8>();
        let cdc = CdcAcm::new(&controller, &controller, &rx);
        let ctrl = ClientCtrl::new(&controller, &DEVICE_TREE);
        ctrl.set_class_client(&cdc);

        // The host gives up on SET_LINE_CODING and starts enumeration again.
        ctrl.ctrl_setup(&SET_LINE_CODING_7);
        ctrl.ctrl_setup(&[0x80, 0x06, 0, 1, 0, 0, 18, 0]);
        assert_eq!(
            cdc.control_transfer_state(),
            ControlTransferState::AwaitingRequest
        );
        controller.take();

        // Status stage of GET_DESCRIPTOR: only endpoint 0 OUT is re-armed.
        cdc.packet_out(0, &[]);
        assert_eq!(controller.take(), [Call::Out(0, DataToggle::Data0)]);
        assert_eq!(cdc.line_coding(), LineCoding::default());
    }

    #[test]
    fn vendor_requests_leave_line_settings_alone() {
        let controller = Controller::new();
        let rx = storage::<8>();
        let cdc = CdcAcm::new(&controller, &controller, &rx);

        // Vendor request reusing the SET_LINE_CODING code.
        let vendor = setup([0x41, 0x20, 0, 0, 0, 0, 7, 0]);
        cdc.class_setup(vendor);
        assert_eq!(
            cdc.control_transfer_state(),
            ControlTransferState::AwaitingPayload(vendor)
        );
        controller.take();
        cdc.packet_out(0, &[0x80, 0x25, 0x00, 0x00, 2, 2, 7]);
        assert_eq!(cdc.line_coding(), LineCoding::default());
        assert_eq!(
            controller.take(),
            [
                Call::In(0, Vec::new(), DataToggle::Data1),
                Call::Out(0, DataToggle::Data0)
            ]
        );

        // Vendor reads and SET_CONTROL_LINE_STATE lookalikes get a ZLP.
        cdc.class_setup(setup([0xc1, 0x21, 0, 0, 0, 0, 7, 0]));
        assert_eq!(controller.take()[0], Call::In(0, Vec::new(), DataToggle::Data1));
        cdc.class_setup(setup([0x41, 0x22, 0x03, 0, 0, 0, 0, 0]));
        assert_eq!(cdc.control_line_state(), 0);
    }

    #[test]
    fn status_stage_rearms_control_endpoint() {
        let controller = Controller::new();
        let rx = storage::<8>();
        let cdc = CdcAcm::new(&controller, &controller, &rx);

        cdc.packet_out(0, &[]);
        assert_eq!(controller.take(), [Call::Out(0, DataToggle::Data0)]);
        assert_eq!(
            cdc.control_transfer_state(),
            ControlTransferState::AwaitingRequest
        );
    }

    #[test]
    fn received_bytes_come_out_in_order() {
        let controller = Controller::new();
        let rx = storage::<8>();
        let cdc = CdcAcm::new(&controller, &controller, &rx);

        cdc.packet_out(DATA_OUT_ENDPOINT, b"abc");
        cdc.packet_out(DATA_OUT_ENDPOINT, b"de");
        assert_eq!(
            controller.take(),
            [
                Call::Out(DATA_OUT_ENDPOINT, DataToggle::Data1),
                Call::Out(DATA_OUT_ENDPOINT, DataToggle::Data0)
            ]
        );

        let read: Vec<u8> = (0..5).map(|_| cdc.read_character()).collect();
        assert_eq!(read, b"abcde");
        assert_eq!(controller.critical_sections.get(), 5);
        assert!(!controller.masked.get());
    }

    #[test]
    fn read_waits_for_bytes_delivered_while_relaxing() {
        let controller = Controller::new();
        let rx = storage::<8>();
        let cdc = CdcAcm::new(&controller, &controller, &rx);
        controller.out_client.set(&cdc);
        controller.incoming.borrow_mut().extend_from_slice(b"k");

        assert_eq!(cdc.read_character(), b'k');
        assert_eq!(
            controller.take(),
            [Call::Relax, Call::Out(DATA_OUT_ENDPOINT, DataToggle::Data1)]
        );
    }

    #[test]
    fn write_waits_for_completion_delivered_while_relaxing() {
        let controller = Controller::new();
        let rx = storage::<8>();
        let cdc = CdcAcm::new(&controller, &controller, &rx);

        cdc.write_character(b'a').unwrap();
        assert_eq!(
            controller.take(),
            [Call::In(DATA_IN_ENDPOINT, std::vec![b'a'], DataToggle::Data0)]
        );

        // Only the completion reported from inside `relax` frees the endpoint.
        controller.in_client.set(&cdc);
        cdc.write_character(b'b').unwrap();
        assert_eq!(
            controller.take(),
            [
                Call::Relax,
                Call::In(DATA_IN_ENDPOINT, std::vec![b'b'], DataToggle::Data1)
            ]
        );
    }

    #[test]
    fn overflow_keeps_first_bytes_and_rearms() {
        let controller = Controller::new();
        let rx = storage::<8>();
        let cdc = CdcAcm::new(&controller, &controller, &rx);

        cdc.packet_out(DATA_OUT_ENDPOINT, b"0123456789");
        cdc.packet_out(DATA_OUT_ENDPOINT, b"xy");
        assert_eq!(
            controller.take(),
            [
                Call::Out(DATA_OUT_ENDPOINT, DataToggle::Data1),
                Call::Out(DATA_OUT_ENDPOINT, DataToggle::Data0)
            ]
        );

        let read: Vec<u8> = (0..8).map(|_| cdc.read_character()).collect();
        assert_eq!(read, b"01234567");

        cdc.packet_out(DATA_OUT_ENDPOINT, b"z");
        assert_eq!(cdc.read_character(), b'z');
    }

    #[test]
    fn read_line_stops_at_terminator_or_full_buffer() {
        let controller = Controller::new();
        let rx = storage::<16>();
        let cdc = CdcAcm::new(&controller, &controller, &rx);

        cdc.packet_out(DATA_OUT_ENDPOINT, b"help\rabcdef\n");
        let mut line = [0; 8];
        assert_eq!(cdc.read_line(&mut line), 4);
        assert_eq!(&line[..4], b"help");

        let mut short = [0; 3];
        assert_eq!(cdc.read_line(&mut short), 3);
        assert_eq!(&short, b"abc");
        assert_eq!(cdc.read_line(&mut line), 3);
        assert_eq!(&line[..3], b"def");
    }

    #[test]
    fn long_writes_are_split_into_packets() {
        let controller = Controller::new();
        let rx = storage::<8>();
        let cdc = CdcAcm::new(&controller, &controller, &rx);
        controller.in_client.set(&cdc);

        let data: Vec<u8> = (0..130u8).collect();
        cdc.write_string(&data).unwrap();

        assert_eq!(
            controller.take(),
            [
                Call::In(DATA_IN_ENDPOINT, data[..64].to_vec(), DataToggle::Data0),
                Call::Relax,
                Call::In(DATA_IN_ENDPOINT, data[64..128].to_vec(), DataToggle::Data1),
                Call::Relax,
                Call::In(DATA_IN_ENDPOINT, data[128..].to_vec(), DataToggle::Data0),
            ]
        );

        // The last packet is still in flight.
        cdc.write_character(b'!').unwrap();
        assert_eq!(
            controller.take(),
            [
                Call::Relax,
                Call::In(DATA_IN_ENDPOINT, std::vec![b'!'], DataToggle::Data1),
            ]
        );

        cdc.packet_in(DATA_IN_ENDPOINT);
        cdc.write_string(&[]).unwrap();
        assert!(controller.take().is_empty());
    }

    #[test]
    fn endpoint_table_matches_descriptors() {
        let controller = Controller::new();
        let rx = storage::<8>();
        let cdc = CdcAcm::new(&controller, &controller, &rx);
        let table = cdc.endpoint_configuration();

        assert_eq!(table[0].directions, EndpointDirections::OutIn);
        assert!(table[0].out_client.is_some());
        assert_eq!(table[NOTIFICATION_ENDPOINT].directions, EndpointDirections::In);
        assert_eq!(table[DATA_OUT_ENDPOINT].directions, EndpointDirections::Out);
        assert!(table[DATA_OUT_ENDPOINT].out_client.is_some());
        assert!(table[DATA_IN_ENDPOINT].directions.has_in());
        assert!(table[DATA_IN_ENDPOINT].in_client.is_some());

        for interface in DEVICE_TREE.configurations[0].interfaces {
            for endpoint in interface.endpoints {
                assert!(endpoint.endpoint_address.endpoint() < table.len());
            }
        }
    }

    #[test]
    fn control_requests_through_the_control_client() {
        let controller = Controller::new();
        let rx = storage::<8>();
        let cdc = CdcAcm::new(&controller, &controller, &rx);
        let ctrl = ClientCtrl::new(&controller, &DEVICE_TREE);
        ctrl.set_class_client(&cdc);

        // GET_DESCRIPTOR for an interface power descriptor is not served.
        ctrl.ctrl_setup(&[0x80, 0x06, 0, 8, 0, 0, 64, 0]);
        assert!(controller.take().is_empty());
        assert_eq!(
            cdc.control_transfer_state(),
            ControlTransferState::AwaitingRequest
        );

        ctrl.ctrl_setup(&SET_LINE_CODING_7);
        assert_eq!(controller.take(), [Call::Out(0, DataToggle::Data1)]);
        assert!(matches!(
            cdc.control_transfer_state(),
            ControlTransferState::AwaitingPayload(SetupData {
                request_code: SET_LINE_CODING,
                length: 7,
                ..
            })
        ));
    }
}
