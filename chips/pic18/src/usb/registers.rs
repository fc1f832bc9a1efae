// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! SIE special function registers.
//!
//! The registers are 8 bits wide and live in the special function register
//! space, which is not necessarily memory mapped in a way Rust can address.
//! Access therefore goes through the `SieRegisters` trait, implemented by the
//! board.

use kernel::utilities::registers::{register_bitfields, FieldValue, LocalRegisterCopy};
use kernel::utilities::registers::RegisterLongName;

register_bitfields![u8,
    pub UCON [
        PPBRST OFFSET(6) NUMBITS(1) [],
        SE0 OFFSET(5) NUMBITS(1) [],
        // Set by the SIE whenever a SETUP token is received
        PKTDIS OFFSET(4) NUMBITS(1) [],
        USBEN OFFSET(3) NUMBITS(1) [],
        RESUME OFFSET(2) NUMBITS(1) [],
        SUSPND OFFSET(1) NUMBITS(1) []
    ],
    pub UCFG [
        UTEYE OFFSET(7) NUMBITS(1) [],
        UOEMON OFFSET(6) NUMBITS(1) [],
        UPUEN OFFSET(4) NUMBITS(1) [],
        UTRDIS OFFSET(3) NUMBITS(1) [],
        FSEN OFFSET(2) NUMBITS(1) [],
        PPB OFFSET(0) NUMBITS(2) [
            Disabled = 0
        ]
    ],
    pub USTAT [
        ENDP OFFSET(3) NUMBITS(4) [],
        DIR OFFSET(2) NUMBITS(1) [
            Out = 0,
            In = 1
        ],
        PPBI OFFSET(1) NUMBITS(1) []
    ],
    // Shared by UIR (flags) and UIE (enables)
    pub UIR [
        SOFIF OFFSET(6) NUMBITS(1) [],
        STALLIF OFFSET(5) NUMBITS(1) [],
        IDLEIF OFFSET(4) NUMBITS(1) [],
        TRNIF OFFSET(3) NUMBITS(1) [],
        ACTVIF OFFSET(2) NUMBITS(1) [],
        UERRIF OFFSET(1) NUMBITS(1) [],
        URSTIF OFFSET(0) NUMBITS(1) []
    ],
    pub UEIR [
        BTSEF OFFSET(7) NUMBITS(1) [],
        BTOEF OFFSET(4) NUMBITS(1) [],
        DFN8EF OFFSET(3) NUMBITS(1) [],
        CRC16EF OFFSET(2) NUMBITS(1) [],
        CRC5EF OFFSET(1) NUMBITS(1) [],
        PIDEF OFFSET(0) NUMBITS(1) []
    ],
    pub UEP [
        EPHSHK OFFSET(4) NUMBITS(1) [],
        EPCONDIS OFFSET(3) NUMBITS(1) [],
        EPOUTEN OFFSET(2) NUMBITS(1) [],
        EPINEN OFFSET(1) NUMBITS(1) [],
        EPSTALL OFFSET(0) NUMBITS(1) []
    ],
    pub UADDR [
        ADDR OFFSET(0) NUMBITS(7) []
    ]
];

/// One SIE register.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Register {
    Ucon,
    Ucfg,
    Ustat,
    Uir,
    Uie,
    Ueir,
    Uaddr,
    /// Endpoint control register `UEPn`.
    Uep(usize),
}

/// Byte-wide access to the SIE registers.
pub trait SieRegisters {
    fn read(&self, register: Register) -> u8;

    fn write(&self, register: Register, value: u8);

    /// Clear the bits of `mask` in `register`.
    ///
    /// The default is a read-modify-write; boards with a single-instruction
    /// bit clear should override it so flags raised by the SIE in between
    /// are not lost.
    fn clear_bits(&self, register: Register, mask: u8) {
        let value = self.read(register);
        self.write(register, value & !mask);
    }

    /// Set the bits of `mask` in `register`.
    fn set_bits(&self, register: Register, mask: u8) {
        let value = self.read(register);
        self.write(register, value | mask);
    }

    /// Called on every iteration of a busy-wait on a buffer descriptor.
    fn relax(&self) {
        core::hint::spin_loop();
    }
}

/// Raw byte of a field value, for use with `SieRegisters`.
pub fn bits<R: RegisterLongName>(field: FieldValue<u8, R>) -> u8 {
    let mut register = LocalRegisterCopy::<u8, R>::new(0);
    register.modify(field);
    register.get()
}

/// Snapshot of a register, decoded with the bitfields above.
pub fn snapshot<R: RegisterLongName>(
    registers: &dyn SieRegisters,
    register: Register,
) -> LocalRegisterCopy<u8, R> {
    LocalRegisterCopy::new(registers.read(register))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn configuration_values() {
        assert_eq!(bits(UCFG::UPUEN::SET + UCFG::FSEN::SET + UCFG::PPB::Disabled), 0x14);
        assert_eq!(bits(UEP::EPHSHK::SET + UEP::EPOUTEN::SET + UEP::EPINEN::SET), 0x16);
        assert_eq!(bits(UEP::EPHSHK::SET + UEP::EPCONDIS::SET), 0x18);
        assert_eq!(bits(UIR::STALLIF::SET + UIR::TRNIF::SET + UIR::URSTIF::SET), 0x29);
    }

    #[test]
    fn ustat_decoding() {
        let ustat: LocalRegisterCopy<u8, USTAT::Register> = LocalRegisterCopy::new((3 << 3) | (1 << 2));
        assert_eq!(ustat.read(USTAT::ENDP), 3);
        assert!(ustat.is_set(USTAT::DIR));
    }
}
