// SPDX-License-Identifier: MIT OR Apache-2.0
//! Hexdump tracing for the transport write half.

use hexdump::hexdump_iter;
use log::{debug, log_enabled, Level::Debug};
use std::io::{Result, Write};

/// Wraps the transport writer and hexdumps everything the engine sends,
/// at debug level.  Incoming bytes are dumped by `Session::feed` itself,
/// so wrapping the write half covers both directions of the exchange.
pub struct WriteLog<W> {
    inner: W,
}

impl<W: Write> WriteLog<W> {
    pub fn new(inner: W) -> WriteLog<W> {
        WriteLog { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for WriteLog<W> {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if log_enabled!(Debug) {
            for x in hexdump_iter(buf) {
                debug!("Out: {x}");
            }
        }

        self.inner.write(buf)
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.flush()
    }
}
