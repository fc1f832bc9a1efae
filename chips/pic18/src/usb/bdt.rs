// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Buffer Descriptor Table.
//!
//! Each endpoint direction owns one 4-byte buffer descriptor in USB RAM. The
//! `UOWN` bit of the status byte decides who may touch the descriptor and its
//! packet buffer: firmware while clear, the SIE while set. The status byte has
//! two layouts. Firmware writes `BD_STAT_CPU` (stall, toggle enable, toggle)
//! before setting `UOWN`, and the SIE writes back `BD_STAT_SIE` (the packet
//! identifier of the completed transaction) when it clears `UOWN`. Both are
//! exposed as separate views of the same byte.

use kernel::hil::usb::{DataToggle, MAX_PACKET_SIZE};
use kernel::utilities::cells::VolatileCell;
use kernel::utilities::registers::{register_bitfields, LocalRegisterCopy};

use super::registers::bits;

register_bitfields![u8,
    pub BD_STAT_CPU [
        BC_HIGH OFFSET(0) NUMBITS(2) [],
        BSTALL OFFSET(2) NUMBITS(1) [],
        DTSEN OFFSET(3) NUMBITS(1) [],
        DTS OFFSET(6) NUMBITS(1) [],
        UOWN OFFSET(7) NUMBITS(1) []
    ],
    pub BD_STAT_SIE [
        BC_HIGH OFFSET(0) NUMBITS(2) [],
        PID OFFSET(2) NUMBITS(4) [
            TokenOut = 0x1,
            HandshakeAck = 0x2,
            TokenSetup = 0xD
        ],
        UOWN OFFSET(7) NUMBITS(1) []
    ]
];

#[repr(C)]
pub struct BufferDescriptor {
    stat: VolatileCell<u8>,
    cnt: VolatileCell<u8>,
    adrl: VolatileCell<u8>,
    adrh: VolatileCell<u8>,
}

impl BufferDescriptor {
    pub const fn new() -> BufferDescriptor {
        BufferDescriptor {
            stat: VolatileCell::new(0),
            cnt: VolatileCell::new(0),
            adrl: VolatileCell::new(0),
            adrh: VolatileCell::new(0),
        }
    }

    /// Status byte as laid out when written by firmware.
    pub fn cpu_status(&self) -> LocalRegisterCopy<u8, BD_STAT_CPU::Register> {
        LocalRegisterCopy::new(self.stat.get())
    }

    /// Status byte as laid out when written back by the SIE.
    pub fn sie_status(&self) -> LocalRegisterCopy<u8, BD_STAT_SIE::Register> {
        LocalRegisterCopy::new(self.stat.get())
    }

    pub fn owned_by_sie(&self) -> bool {
        self.sie_status().is_set(BD_STAT_SIE::UOWN)
    }

    /// Byte count: bytes to send for IN, bytes received once an OUT
    /// transaction completes.
    pub fn byte_count(&self) -> usize {
        ((self.sie_status().read(BD_STAT_SIE::BC_HIGH) as usize) << 8) | self.cnt.get() as usize
    }

    pub fn buffer_address(&self) -> u16 {
        u16::from_le_bytes([self.adrl.get(), self.adrh.get()])
    }

    pub(crate) fn set_buffer_address(&self, address: u16) {
        let [low, high] = address.to_le_bytes();
        self.adrl.set(low);
        self.adrh.set(high);
    }

    /// Take the descriptor back from the SIE unconditionally.
    pub(crate) fn release(&self) {
        self.stat.set(0);
    }

    /// Give the descriptor to the SIE for a transaction of `count` bytes
    /// carrying `toggle`. The caller must own the descriptor.
    pub(crate) fn hand_to_sie(&self, count: usize, toggle: DataToggle) {
        let mut stat = LocalRegisterCopy::<u8, BD_STAT_CPU::Register>::new(0);
        stat.modify(BD_STAT_CPU::BC_HIGH.val((count >> 8) as u8) + BD_STAT_CPU::DTSEN::SET);
        if toggle.is_data1() {
            stat.modify(BD_STAT_CPU::DTS::SET);
        }
        self.cnt.set(count as u8);
        // UOWN must be set by a separate write, after the rest of the
        // descriptor is in place.
        self.stat.set(stat.get());
        self.stat.set(stat.get() | bits(BD_STAT_CPU::UOWN::SET));
    }

    /// Answer the next token with STALL. Does not wait for ownership.
    pub(crate) fn stall(&self) {
        self.stat.set(0);
        self.stat.set(bits(BD_STAT_CPU::BSTALL::SET));
        self.stat.set(bits(BD_STAT_CPU::BSTALL::SET + BD_STAT_CPU::UOWN::SET));
    }

    /// What the SIE does when it finishes a transaction on this descriptor.
    #[cfg(test)]
    pub(crate) fn complete_by_sie(&self, pid: u8, count: usize) {
        self.cnt.set(count as u8);
        let mut stat = LocalRegisterCopy::<u8, BD_STAT_SIE::Register>::new(0);
        stat.modify(BD_STAT_SIE::PID.val(pid) + BD_STAT_SIE::BC_HIGH.val((count >> 8) as u8));
        self.stat.set(stat.get());
    }
}

/// OUT and IN descriptors of one endpoint, in the order the SIE expects.
#[repr(C)]
pub struct EndpointDescriptors {
    pub out: BufferDescriptor,
    pub in_: BufferDescriptor,
}

impl EndpointDescriptors {
    pub const fn new() -> EndpointDescriptors {
        EndpointDescriptors {
            out: BufferDescriptor::new(),
            in_: BufferDescriptor::new(),
        }
    }
}

pub type PacketBuffer = [VolatileCell<u8>; MAX_PACKET_SIZE];

/// Packet memory of one endpoint. Must be placed in USB RAM.
pub struct EndpointBuffers {
    pub out: PacketBuffer,
    pub in_: PacketBuffer,
}

impl EndpointBuffers {
    pub const fn new() -> EndpointBuffers {
        #[allow(clippy::declare_interior_mutable_const)]
        const EMPTY: VolatileCell<u8> = VolatileCell::new(0);
        EndpointBuffers {
            out: [EMPTY; MAX_PACKET_SIZE],
            in_: [EMPTY; MAX_PACKET_SIZE],
        }
    }
}

/// Address of `buffer` as seen by the SIE.
pub(crate) fn sie_address(buffer: &PacketBuffer) -> u16 {
    buffer.as_ptr() as usize as u16
}
