// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! A generic USB client layer managing control requests
//!
//! It answers the standard requests needed for enumeration from a
//! `DeviceTree` and forwards class and vendor requests to a `ClassClient`.
//!
//! Every response is a single packet sent with DATA1, after which endpoint 0
//! OUT is armed with DATA0 for the host's status stage. Requests that cannot
//! be answered are dropped without a response, except DEVICE_QUALIFIER,
//! which is stalled to tell the host the device is full-speed only.

use core::cell::Cell;
use core::cmp::min;

use kernel::config::CONFIG;
use kernel::debug;
use kernel::hil::usb::{CtrlClient, DataToggle, UsbController, MAX_PACKET_SIZE};
use kernel::utilities::cells::OptionalCell;

use crate::descriptors::{
    Descriptor, DescriptorType, DeviceTree, RequestType, SetupData, StandardRequest,
};

/// Handles class- and vendor-specific control requests.
pub trait ClassClient {
    /// A standard or reserved SETUP packet arrived on endpoint 0. It ends
    /// any class transfer the client still has in progress.
    fn standard_setup(&self);

    /// Called for every class or vendor SETUP packet on endpoint 0. The
    /// client owns the rest of the control transfer.
    fn class_setup(&self, setup: SetupData);
}

pub struct ClientCtrl<'a, C: UsbController> {
    /// The hardware controller
    controller: &'a C,

    /// Descriptors served to the host
    tree: &'a DeviceTree<'a>,

    class_client: OptionalCell<&'a dyn ClassClient>,

    /// Value of the last SET_CONFIGURATION, 0 while unconfigured
    configuration: Cell<u8>,
}

impl<'a, C: UsbController> ClientCtrl<'a, C> {
    pub fn new(controller: &'a C, tree: &'a DeviceTree<'a>) -> Self {
        ClientCtrl {
            controller,
            tree,
            class_client: OptionalCell::empty(),
            configuration: Cell::new(0),
        }
    }

    pub fn set_class_client(&self, client: &'a dyn ClassClient) {
        self.class_client.set(client);
    }

    pub fn configuration(&self) -> u8 {
        self.configuration.get()
    }

    /// Send `data` as the data (or status) stage, then accept the host's
    /// status stage.
    fn respond(&self, data: &[u8]) {
        if let Err(e) = self.controller.arm_in(0, data, DataToggle::Data1) {
            debug!("USB: cannot answer control request: {:?}", e);
            return;
        }
        if let Err(e) = self.controller.arm_out(0, DataToggle::Data0) {
            debug!("USB: cannot arm status stage: {:?}", e);
        }
    }

    fn handle_standard_request(&self, request: StandardRequest) {
        match request {
            StandardRequest::GetDescriptor {
                descriptor_type,
                descriptor_index,
                requested_length,
                ..
            } => {
                let requested = requested_length as usize;
                let mut buf = [0; MAX_PACKET_SIZE];
                match descriptor_type {
                    DescriptorType::Device => {
                        let len = self.tree.device.write_to(&mut buf);
                        self.respond(&buf[..min(len, requested)]);
                    }
                    DescriptorType::Configuration => {
                        match self.tree.configuration(descriptor_index) {
                            Some(configuration) => {
                                let len = configuration.write_to(&mut buf);
                                self.respond(&buf[..min(len, requested)]);
                            }
                            None => debug!(
                                "USB: no configuration {}, request dropped",
                                descriptor_index
                            ),
                        }
                    }
                    DescriptorType::String => {
                        match self.tree.write_string(descriptor_index, &mut buf) {
                            Some(len) => self.respond(&buf[..min(len, requested)]),
                            None => {
                                debug!("USB: no string {}, request dropped", descriptor_index)
                            }
                        }
                    }
                    DescriptorType::DeviceQualifier => {
                        if CONFIG.trace_usb {
                            debug!("USB: device qualifier requested, stalling");
                        }
                        if let Err(e) = self.controller.stall_in(0) {
                            debug!("USB: cannot stall endpoint 0: {:?}", e);
                        }
                        if let Err(e) = self.controller.arm_out(0, DataToggle::Data0) {
                            debug!("USB: cannot arm status stage: {:?}", e);
                        }
                    }
                    _ => debug!(
                        "USB: unsupported descriptor {:?}, request dropped",
                        descriptor_type
                    ),
                }
            }
            StandardRequest::SetAddress { device_address } => {
                if CONFIG.trace_usb {
                    debug!("USB: SET_ADDRESS {}", device_address);
                }
                // Applied by the controller once the acknowledgement is sent.
                self.controller.latch_address((device_address & 0x7f) as u8);
                self.respond(&[]);
            }
            StandardRequest::SetConfiguration {
                configuration_value,
            } => {
                if CONFIG.trace_usb {
                    debug!("USB: SET_CONFIGURATION {}", configuration_value);
                }
                self.configuration.set(configuration_value);
                self.respond(&[]);
            }
            _ => debug!("USB: unsupported request {:?} dropped", request),
        }
    }
}

impl<C: UsbController> CtrlClient for ClientCtrl<'_, C> {
    fn ctrl_setup(&self, setup: &[u8]) {
        let setup_data = match SetupData::get(setup) {
            Some(setup_data) => setup_data,
            None => {
                debug!("USB: short SETUP packet ({} bytes) dropped", setup.len());
                return;
            }
        };
        if CONFIG.trace_usb {
            debug!("USB: SETUP {:?}", setup_data);
        }

        let request_type = setup_data.request_type.request_type();
        if let RequestType::Standard | RequestType::Reserved = request_type {
            self.class_client.map(|client| client.standard_setup());
        }

        match request_type {
            RequestType::Standard => match setup_data.get_standard_request() {
                Some(request) => self.handle_standard_request(request),
                None => debug!(
                    "USB: unknown standard request {:#04x} (value {:#06x}) dropped",
                    setup_data.request_code, setup_data.value
                ),
            },
            RequestType::Class | RequestType::Vendor => {
                if self
                    .class_client
                    .map(|client| client.class_setup(setup_data))
                    .is_none()
                {
                    debug!("USB: no class handler, request dropped");
                }
            }
            RequestType::Reserved => debug!("USB: reserved request type dropped"),
        }
    }
}
