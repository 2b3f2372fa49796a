// SPDX-License-Identifier: MIT OR Apache-2.0
//! ZDLE escape codec.
//!
//! ZMODEM reserves 0x18 (ZDLE) as an escape prefix.  The encoder escapes
//! every byte the protocol forbids on the wire and tracks the one piece of
//! cross-byte state the rules need: whether the previously emitted byte
//! was `@`, which forces the following CR to be escaped (Telenet would
//! otherwise eat `@-CR` as a command).

use crate::consts::*;

/// Outbound escape state.  One per session; the `@`-tracking must see
/// every byte emitted toward the remote peer in order.
#[derive(Debug, Default)]
pub struct Escaper {
    atsign: bool,
    escctrl: bool,
}

impl Escaper {
    pub fn new() -> Escaper {
        Escaper::default()
    }

    /// Escape all control characters, as requested by the sender's
    /// ZSINIT capability byte.
    pub fn escape_control(&mut self, enable: bool) {
        self.escctrl = enable;
    }

    /// Append `ch` to `out`, ZDLE-escaped if the protocol requires it.
    ///
    /// CAN (ZDLE), DLE, XON, XOFF and GS must always be escaped in both
    /// parities, DEL and 0xFF map to the ZRUB codes, and a CR following
    /// `@` is escaped as well.
    pub fn push<B: Extend<u8>>(&mut self, out: &mut B, ch: u8) {
        let ch7 = ch & 0x7f;

        let escape = ch == ZDLE
            || ch7 == DLE
            || ch7 == XON
            || ch7 == XOFF
            || ch7 == GS
            || ch7 == DEL
            || ch == 0xff
            || (ch7 == b'\r' && self.atsign)
            || (ch7 < 0x20 && self.escctrl);

        if escape {
            let enc = match ch {
                DEL => ZRUB0,
                0xff => ZRUB1,
                _ => ch ^ 0x40,
            };
            out.extend([ZDLE, enc]);
        } else {
            out.extend([ch]);
        }

        self.atsign = ch7 == b'@';
    }

    /// Escape a whole buffer into `out`.
    pub fn extend<B: Extend<u8>>(&mut self, out: &mut B, data: &[u8]) {
        for ch in data {
            self.push(out, *ch);
        }
    }
}

/// Decode the byte following a ZDLE.  The four sub-packet terminators are
/// not fed here; the data parser recognizes them before unescaping.
pub fn unescape(ch: u8) -> u8 {
    match ch {
        ZRUB0 => 0x7f,
        ZRUB1 => 0xff,
        _ => ch ^ 0x40,
    }
}
