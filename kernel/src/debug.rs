// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Support for in-kernel debugging.
//!
//! For printing, this module uses an `IoWrite` sink registered by the board.
//! Until a sink is registered, `debug!` output is discarded, so drivers can
//! log unconditionally from both the foreground loop and interrupt handlers.
//!
//! Usage
//! -----
//!
//! ```rust,ignore
//! // In the board's main function, before interrupts are enabled:
//! unsafe { kernel::debug::set_debug_writer(&UART_WRITER) };
//!
//! debug!("Yes the code gets here with value {}", i);
//! debug!("got here");
//! ```
//!
//! Each message is prefixed with the file and line that produced it and is
//! terminated with `\r\n`.

use core::cell::Cell;
use core::fmt::{write, Arguments, Result, Write};

/// Sink for debug output, implemented by board-level writers (typically a
/// polled UART).
pub trait IoWrite {
    /// Write `buf` synchronously, returning the number of bytes written.
    fn write(&self, buf: &[u8]) -> usize;
}

struct WriterSlot {
    writer: Cell<Option<&'static dyn IoWrite>>,
}

// The kernel runs on a single core and the slot is only written once, from
// the board setup, before interrupts are enabled.
unsafe impl Sync for WriterSlot {}

static DEBUG_WRITER: WriterSlot = WriterSlot {
    writer: Cell::new(None),
};

/// Register the sink that receives `debug!` output.
///
/// # Safety
///
/// Must be called before any interrupt that may print is enabled.
pub unsafe fn set_debug_writer(writer: &'static dyn IoWrite) {
    DEBUG_WRITER.writer.set(Some(writer));
}

/// Adapter that lets `core::fmt` drive an `IoWrite` sink.
struct DebugWriter<'w> {
    sink: &'w dyn IoWrite,
}

impl Write for DebugWriter<'_> {
    fn write_str(&mut self, s: &str) -> Result {
        let mut bytes = s.as_bytes();
        while !bytes.is_empty() {
            let written = self.sink.write(bytes);
            if written == 0 {
                // A sink that makes no progress would otherwise hang us.
                return Err(core::fmt::Error);
            }
            bytes = &bytes[written.min(bytes.len())..];
        }
        Ok(())
    }
}

pub fn begin_debug_fmt(args: Arguments, file_line: &(&'static str, u32)) {
    if let Some(sink) = DEBUG_WRITER.writer.get() {
        let mut writer = DebugWriter { sink };
        let (file, line) = *file_line;
        let _ = writer.write_fmt(format_args!("{}:{}: ", file, line));
        let _ = write(&mut writer, args);
        let _ = writer.write_str("\r\n");
    }
}

/// In-kernel `println()` debugging.
#[macro_export]
macro_rules! debug {
    () => ({
        // Allow an empty debug!() to print the location when hit
        $crate::debug!("")
    });
    ($msg:expr $(,)?) => ({
        $crate::debug::begin_debug_fmt(format_args!($msg), {
            static _FILE_LINE: (&'static str, u32) = (file!(), line!());
            &_FILE_LINE
        })
    });
    ($fmt:expr, $($arg:tt)+) => ({
        $crate::debug::begin_debug_fmt(format_args!($fmt, $($arg)+), {
            static _FILE_LINE: (&'static str, u32) = (file!(), line!());
            &_FILE_LINE
        })
    });
}

#[cfg(test)]
mod test {
    extern crate std;

    use super::{set_debug_writer, IoWrite};
    use std::sync::Mutex;
    use std::vec::Vec;

    struct Capture {
        out: Mutex<Vec<u8>>,
    }

    impl IoWrite for Capture {
        fn write(&self, buf: &[u8]) -> usize {
            self.out.lock().unwrap().extend_from_slice(buf);
            buf.len()
        }
    }

    static CAPTURE: Capture = Capture {
        out: Mutex::new(Vec::new()),
    };

    #[test]
    fn messages_carry_location_and_line_ending() {
        unsafe { set_debug_writer(&CAPTURE) };
        debug!("endpoint {} armed", 3);

        let out = CAPTURE.out.lock().unwrap();
        let text = core::str::from_utf8(&out).unwrap();
        assert!(text.contains("debug.rs:"));
        assert!(text.ends_with(": endpoint 3 armed\r\n"));
    }
}
