// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Platform-independent USB 2.0 protocol library.
//!
//! Mostly data types for USB descriptors, plus the `DeviceTree` catalog that
//! ties a device descriptor to its configurations and strings. Everything
//! here is plain data that can live in a `static`.

use core::fmt;
use kernel::hil::usb::TransferType;

/// The data structure sent in a SETUP handshake.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SetupData {
    pub request_type: DeviceRequestType,
    pub request_code: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl SetupData {
    /// Create a `SetupData` structure from a packet received from the wire
    pub fn get(p: &[u8]) -> Option<Self> {
        if p.len() < 8 {
            return None;
        }
        Some(SetupData {
            request_type: DeviceRequestType(p[0]),
            request_code: p[1],
            value: get_u16(p[2], p[3]),
            index: get_u16(p[4], p[5]),
            length: get_u16(p[6], p[7]),
        })
    }

    /// If the `SetupData` represents a standard device request, return it
    pub fn get_standard_request(&self) -> Option<StandardRequest> {
        match self.request_type.request_type() {
            RequestType::Standard => match self.request_code {
                0 => Some(StandardRequest::GetStatus {
                    recipient_index: self.index,
                }),
                1 => Some(StandardRequest::ClearFeature {
                    feature: FeatureSelector::get(self.value),
                    recipient_index: self.index,
                }),
                3 => Some(StandardRequest::SetFeature {
                    feature: FeatureSelector::get(self.value),
                    test_mode: (self.index >> 8) as u8,
                    recipient_index: self.index & 0xff,
                }),
                5 => Some(StandardRequest::SetAddress {
                    device_address: self.value,
                }),
                6 => get_descriptor_type((self.value >> 8) as u8).map(|dt| {
                    StandardRequest::GetDescriptor {
                        descriptor_type: dt,
                        descriptor_index: (self.value & 0xff) as u8,
                        lang_id: self.index,
                        requested_length: self.length,
                    }
                }),
                8 => Some(StandardRequest::GetConfiguration),
                9 => Some(StandardRequest::SetConfiguration {
                    configuration_value: (self.value & 0xff) as u8,
                }),
                10 => Some(StandardRequest::GetInterface {
                    interface: self.index,
                }),
                11 => Some(StandardRequest::SetInterface),
                12 => Some(StandardRequest::SynchFrame),
                _ => None,
            },
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum StandardRequest {
    GetStatus {
        recipient_index: u16,
    },
    ClearFeature {
        feature: FeatureSelector,
        recipient_index: u16,
    },
    SetFeature {
        feature: FeatureSelector,
        test_mode: u8,
        recipient_index: u16,
    },
    SetAddress {
        device_address: u16,
    },
    GetDescriptor {
        descriptor_type: DescriptorType,
        descriptor_index: u8,
        lang_id: u16,
        requested_length: u16,
    },
    GetConfiguration,
    SetConfiguration {
        configuration_value: u8,
    },
    GetInterface {
        interface: u16,
    },
    SetInterface,
    SynchFrame,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DescriptorType {
    Device = 1,
    Configuration,
    String,
    Interface,
    Endpoint,
    DeviceQualifier,
    OtherSpeedConfiguration,
    InterfacePower,
    CsInterface = 0x24,
}

fn get_descriptor_type(byte: u8) -> Option<DescriptorType> {
    match byte {
        1 => Some(DescriptorType::Device),
        2 => Some(DescriptorType::Configuration),
        3 => Some(DescriptorType::String),
        4 => Some(DescriptorType::Interface),
        5 => Some(DescriptorType::Endpoint),
        6 => Some(DescriptorType::DeviceQualifier),
        7 => Some(DescriptorType::OtherSpeedConfiguration),
        8 => Some(DescriptorType::InterfacePower),
        0x24 => Some(DescriptorType::CsInterface),
        _ => None,
    }
}

#[derive(Copy, Clone, PartialEq, Eq)]
pub struct DeviceRequestType(u8);

impl DeviceRequestType {
    pub fn transfer_direction(self) -> TransferDirection {
        match self.0 & (1 << 7) {
            0 => TransferDirection::HostToDevice,
            _ => TransferDirection::DeviceToHost,
        }
    }

    pub fn request_type(self) -> RequestType {
        match (self.0 & (0b11 << 5)) >> 5 {
            0 => RequestType::Standard,
            1 => RequestType::Class,
            2 => RequestType::Vendor,
            _ => RequestType::Reserved,
        }
    }

    pub fn recipient(self) -> Recipient {
        match self.0 & 0b11111 {
            0 => Recipient::Device,
            1 => Recipient::Interface,
            2 => Recipient::Endpoint,
            3 => Recipient::Other,
            _ => Recipient::Reserved,
        }
    }
}

impl fmt::Debug for DeviceRequestType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{{{:?}, {:?}, {:?}}}",
            self.transfer_direction(),
            self.request_type(),
            self.recipient()
        )
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransferDirection {
    HostToDevice = 0,
    DeviceToHost = 1,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RequestType {
    Standard,
    Class,
    Vendor,
    Reserved,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Recipient {
    Device,
    Interface,
    Endpoint,
    Other,
    Reserved,
}

#[derive(Debug)]
pub enum FeatureSelector {
    DeviceRemoteWakeup,
    EndpointHalt,
    TestMode,
    Unknown,
}

impl FeatureSelector {
    fn get(value: u16) -> Self {
        match value {
            1 => FeatureSelector::DeviceRemoteWakeup,
            0 => FeatureSelector::EndpointHalt,
            2 => FeatureSelector::TestMode,
            _ => FeatureSelector::Unknown,
        }
    }
}

/// Cursor over an output buffer.
///
/// Bytes past the end of the buffer are counted but not stored, so a
/// descriptor tree larger than one packet is cut at the packet boundary.
pub struct DescriptorWriter<'b> {
    buf: &'b mut [u8],
    pos: usize,
}

impl<'b> DescriptorWriter<'b> {
    pub fn new(buf: &'b mut [u8]) -> DescriptorWriter<'b> {
        DescriptorWriter { buf, pos: 0 }
    }

    pub fn put_u8(&mut self, byte: u8) {
        if let Some(slot) = self.buf.get_mut(self.pos) {
            *slot = byte;
        }
        self.pos += 1;
    }

    /// Little-endian, as sent on the bus.
    pub fn put_u16(&mut self, n: u16) {
        let [low, high] = n.to_le_bytes();
        self.put_u8(low);
        self.put_u8(high);
    }

    /// Number of bytes actually stored.
    pub fn written(&self) -> usize {
        self.pos.min(self.buf.len())
    }
}

pub trait Descriptor {
    /// Serialized size of Descriptor, including everything it owns.
    fn size(&self) -> usize;

    /// Emit the wire representation.
    fn serialize(&self, w: &mut DescriptorWriter);

    /// Serialize the descriptor to a buffer for transmission on the bus.
    ///
    /// Returns how many bytes were stored, at most `buf.len()`.
    fn write_to(&self, buf: &mut [u8]) -> usize {
        let mut w = DescriptorWriter::new(buf);
        self.serialize(&mut w);
        w.written()
    }
}

pub struct DeviceDescriptor {
    /// Valid values include 0x0100 (USB1.0), 0x0110 (USB1.1) and 0x0200 (USB2.0)
    pub usb_release: u16,

    /// 0x00 means each interface defines its own class.
    /// 0xFF means the class behavior is defined by the vendor.
    /// All other values have meaning assigned by USB-IF
    pub class: u8,

    pub subclass: u8,

    pub protocol: u8,

    /// Max packet size for endpoint 0.  Must be 8, 16, 32 or 64
    pub max_packet_size_ep0: u8,

    pub vendor_id: u16,

    /// Together with `vendor_id`, this must be unique to the product
    pub product_id: u16,

    /// Device release number in binary coded decimal (BCD)
    pub device_release: u16,

    /// Index of the string descriptor describing manufacturer, or 0 if none
    pub manufacturer_string: u8,

    /// Index of the string descriptor describing product, or 0 if none
    pub product_string: u8,

    /// Index of the string descriptor giving device serial number, or 0 if none
    pub serial_number_string: u8,

    /// Number of configurations the device supports.  Must be at least one
    pub num_configurations: u8,
}

impl Descriptor for DeviceDescriptor {
    fn size(&self) -> usize {
        18
    }

    fn serialize(&self, w: &mut DescriptorWriter) {
        w.put_u8(18);
        w.put_u8(DescriptorType::Device as u8);
        w.put_u16(self.usb_release);
        w.put_u8(self.class);
        w.put_u8(self.subclass);
        w.put_u8(self.protocol);
        w.put_u8(self.max_packet_size_ep0);
        w.put_u16(self.vendor_id);
        w.put_u16(self.product_id);
        w.put_u16(self.device_release);
        w.put_u8(self.manufacturer_string);
        w.put_u8(self.product_string);
        w.put_u8(self.serial_number_string);
        w.put_u8(self.num_configurations);
    }
}

/// Header of a configuration. The interface count and total length are
/// derived from the `Configuration` it belongs to.
pub struct ConfigurationDescriptor {
    pub configuration_value: u8,
    pub string_index: u8,
    pub attributes: ConfigurationAttributes,
    pub max_power: u8, // in 2mA units
}

#[derive(Copy, Clone)]
pub struct ConfigurationAttributes(u8);

impl ConfigurationAttributes {
    pub const fn new(is_self_powered: bool, supports_remote_wakeup: bool) -> Self {
        ConfigurationAttributes(
            (1 << 7)
                | if is_self_powered { 1 << 6 } else { 0 }
                | if supports_remote_wakeup { 1 << 5 } else { 0 },
        )
    }
}

impl From<ConfigurationAttributes> for u8 {
    fn from(ca: ConfigurationAttributes) -> u8 {
        ca.0
    }
}

/// Interface header. The endpoint count is derived from the owning
/// `Interface`.
pub struct InterfaceDescriptor {
    pub interface_number: u8,
    pub alternate_setting: u8,
    pub interface_class: u8,
    pub interface_subclass: u8,
    pub interface_protocol: u8,
    pub string_index: u8,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EndpointAddress(u8);

impl EndpointAddress {
    pub const fn new_const(endpoint: usize, direction: TransferDirection) -> Self {
        EndpointAddress(endpoint as u8 & 0xf | (direction as u8) << 7)
    }

    pub fn endpoint(self) -> usize {
        (self.0 & 0xf) as usize
    }
}

pub struct EndpointDescriptor {
    pub endpoint_address: EndpointAddress,
    pub transfer_type: TransferType,
    pub max_packet_size: u16,
    // Poll for device data every `interval` frames
    pub interval: u8,
}

impl Descriptor for EndpointDescriptor {
    fn size(&self) -> usize {
        7
    }

    fn serialize(&self, w: &mut DescriptorWriter) {
        w.put_u8(7);
        w.put_u8(DescriptorType::Endpoint as u8);
        w.put_u8(self.endpoint_address.0);
        // No synchronization, data endpoint
        w.put_u8(self.transfer_type as u8);
        w.put_u16(self.max_packet_size & 0x7ff);
        w.put_u8(self.interval);
    }
}

//
// For CDC
//

#[derive(Copy, Clone, Debug)]
pub enum CsInterfaceDescriptorSubType {
    Header = 0x00,
    AbstractControlManagement = 0x02,
    Union = 0x06,
}

/// Class-specific (functional) interface descriptor.
///
/// `field1` and `field2` hold the subtype's payload: `bcdCDC` (low, high)
/// for a header, `bmCapabilities` for ACM, control and subordinate
/// interface for a union.
pub struct CsInterfaceDescriptor {
    pub subtype: CsInterfaceDescriptorSubType,
    pub field1: u8,
    pub field2: u8,
}

impl Descriptor for CsInterfaceDescriptor {
    fn size(&self) -> usize {
        3 + match self.subtype {
            CsInterfaceDescriptorSubType::Header => 2,
            CsInterfaceDescriptorSubType::AbstractControlManagement => 1,
            CsInterfaceDescriptorSubType::Union => 2,
        }
    }

    fn serialize(&self, w: &mut DescriptorWriter) {
        let len = self.size();
        w.put_u8(len as u8);
        w.put_u8(DescriptorType::CsInterface as u8);
        w.put_u8(self.subtype as u8);
        if len >= 4 {
            w.put_u8(self.field1);
        }
        if len >= 5 {
            w.put_u8(self.field2);
        }
    }
}

pub struct LanguagesDescriptor<'a> {
    pub langs: &'a [u16],
}

impl Descriptor for LanguagesDescriptor<'_> {
    fn size(&self) -> usize {
        2 + (2 * self.langs.len())
    }

    fn serialize(&self, w: &mut DescriptorWriter) {
        w.put_u8(self.size() as u8);
        w.put_u8(DescriptorType::String as u8);
        for lang in self.langs {
            w.put_u16(*lang);
        }
    }
}

pub struct StringDescriptor<'a> {
    pub string: &'a str,
}

impl Descriptor for StringDescriptor<'_> {
    fn size(&self) -> usize {
        2 + 2 * self.string.encode_utf16().count()
    }

    // Encode as utf16-le
    fn serialize(&self, w: &mut DescriptorWriter) {
        w.put_u8(self.size() as u8);
        w.put_u8(DescriptorType::String as u8);
        for unit in self.string.encode_utf16() {
            w.put_u16(unit);
        }
    }
}

/// An interface with its functional descriptors and endpoints, serialized in
/// that order.
pub struct Interface<'a> {
    pub descriptor: InterfaceDescriptor,
    pub functional: &'a [CsInterfaceDescriptor],
    pub endpoints: &'a [EndpointDescriptor],
}

impl Descriptor for Interface<'_> {
    fn size(&self) -> usize {
        9 + self.functional.iter().map(|d| d.size()).sum::<usize>()
            + self.endpoints.iter().map(|d| d.size()).sum::<usize>()
    }

    fn serialize(&self, w: &mut DescriptorWriter) {
        let d = &self.descriptor;
        w.put_u8(9);
        w.put_u8(DescriptorType::Interface as u8);
        w.put_u8(d.interface_number);
        w.put_u8(d.alternate_setting);
        w.put_u8(self.endpoints.len() as u8);
        w.put_u8(d.interface_class);
        w.put_u8(d.interface_subclass);
        w.put_u8(d.interface_protocol);
        w.put_u8(d.string_index);
        for f in self.functional {
            f.serialize(w);
        }
        for e in self.endpoints {
            e.serialize(w);
        }
    }
}

/// A configuration and the whole descriptor tree below it, as returned by
/// GET_DESCRIPTOR(CONFIGURATION).
pub struct Configuration<'a> {
    pub descriptor: ConfigurationDescriptor,
    pub interfaces: &'a [Interface<'a>],
}

impl Descriptor for Configuration<'_> {
    fn size(&self) -> usize {
        9 + self.interfaces.iter().map(|i| i.size()).sum::<usize>()
    }

    fn serialize(&self, w: &mut DescriptorWriter) {
        let d = &self.descriptor;
        w.put_u8(9);
        w.put_u8(DescriptorType::Configuration as u8);
        w.put_u16(self.size() as u16);
        w.put_u8(self.interfaces.len() as u8);
        w.put_u8(d.configuration_value);
        w.put_u8(d.string_index);
        w.put_u8(From::from(d.attributes));
        w.put_u8(d.max_power);
        for i in self.interfaces {
            i.serialize(w);
        }
    }
}

/// Everything a device reports during enumeration.
///
/// String descriptor 0 is the language list; string descriptor `n` is
/// `strings[n - 1]`.
pub struct DeviceTree<'a> {
    pub device: DeviceDescriptor,
    pub configurations: &'a [Configuration<'a>],
    pub languages: &'a [u16],
    pub strings: &'a [&'a str],
}

impl<'a> DeviceTree<'a> {
    pub fn configuration(&self, index: u8) -> Option<&Configuration<'a>> {
        self.configurations.get(index as usize)
    }

    /// Serialize string descriptor `index` into `buf`. Returns `None` for an
    /// index with no string.
    pub fn write_string(&self, index: u8, buf: &mut [u8]) -> Option<usize> {
        match index {
            0 => Some(
                LanguagesDescriptor {
                    langs: self.languages,
                }
                .write_to(buf),
            ),
            n => self
                .strings
                .get(n as usize - 1)
                .map(|string| StringDescriptor { string }.write_to(buf)),
        }
    }
}

/// Parse a `u16` from two bytes as received on the bus
fn get_u16(b0: u8, b1: u8) -> u16 {
    (b0 as u16) | ((b1 as u16) << 8)
}
