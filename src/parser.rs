// SPDX-License-Identifier: MIT OR Apache-2.0
//! Incremental frame parser.
//!
//! Consumes the raw byte stream one octet at a time and turns it into
//! parse events: accepted headers, completed data sub-packets, the cancel
//! burst and the "OO" batch trailer.  Input may be fragmented arbitrarily;
//! the parser holds whatever state it needs between calls and never reads
//! on its own.

use crate::consts::{CAN, PKT_BUF_SIZE, XOFF, XON, ZPAD};
use crate::crc::{CRC16, CRC32};
use crate::error::Error;
use crate::escape::unescape;
use crate::header::Encoding;
use crate::subpacket;
use core::convert::TryFrom;

// ZDLE doubles as CAN; spell both meanings.
use crate::consts::ZDLE;

/// Terminator byte plus a 32-bit CRC ride along in the packet buffer.
const PKT_CAPACITY: usize = PKT_BUF_SIZE + 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum IdleSub {
    /// Hunting for ZPAD.
    Zpad,
    /// ZPAD seen, ZDLE expected.
    Zdle,
    /// First 'O' of "OO" seen.
    Oo,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum HeaderSub {
    /// Waiting for the format byte {ZBIN, ZBIN32, ZHEX}.
    Format,
    /// Collecting type, payload and CRC (MS nibble for ZHEX).
    Payload,
    /// Collecting the LS nibble (ZHEX only).
    LsPayload,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PState {
    Idle(IdleSub),
    Header(HeaderSub),
    Data,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ParseEvent {
    /// A header arrived intact.
    Header { typ: u8, flags: [u8; 4] },
    /// A header failed its CRC or arrived malformed; the caller NAKs it.
    BadHeader,
    /// A data sub-packet completed; the payload is in [`Parser::packet`].
    Data { term: subpacket::Type, crc_ok: bool },
    /// Five consecutive CANs.
    Cancel,
    /// The "OO" batch trailer.
    OverAndOut,
}

pub(crate) struct Parser {
    state: PState,
    /// The previous byte was ZDLE; the next one decodes as escaped.
    esc: bool,
    /// An "OO" trailer is currently acceptable.
    pub(crate) oo: bool,
    /// Format of the most recent header; selects the data CRC width.
    hdrfmt: Encoding,
    /// Type byte, 4 payload bytes and up to 4 CRC bytes.
    hdrdata: [u8; 9],
    hdrndx: usize,
    pktbuf: Box<[u8; PKT_CAPACITY]>,
    pktlen: usize,
    pkttype: subpacket::Type,
    /// Bytes of the CRC trailer still expected; 0 outside the trailer.
    ncrc: usize,
    /// Consecutive CANs seen.
    ncan: u8,
}

impl Parser {
    pub fn new() -> Parser {
        Parser {
            state: PState::Idle(IdleSub::Zpad),
            esc: false,
            oo: false,
            hdrfmt: Encoding::ZBIN,
            hdrdata: [0; 9],
            hdrndx: 0,
            pktbuf: Box::new([0; PKT_CAPACITY]),
            pktlen: 0,
            pkttype: subpacket::Type::ZCRCE,
            ncrc: 0,
            ncan: 0,
        }
    }

    /// Payload of the most recently completed sub-packet, terminator and
    /// CRC already stripped.  Valid until the parser re-enters data mode.
    pub fn packet(&self) -> &[u8] {
        &self.pktbuf[..self.pktlen]
    }

    /// The last accepted header used the 32-bit CRC format.
    pub fn crc32(&self) -> bool {
        self.hdrfmt == Encoding::ZBIN32
    }

    /// Start collecting a data sub-packet.
    pub fn enter_data(&mut self) {
        self.state = PState::Data;
        self.esc = false;
        self.pktlen = 0;
        self.ncrc = 0;
    }

    /// Abandon whatever is in flight and hunt for the next frame.
    pub fn reset(&mut self) {
        self.state = PState::Idle(IdleSub::Zpad);
        self.esc = false;
    }

    /// Consume one byte from the remote peer.
    pub fn step(&mut self, ch: u8) -> Result<Option<ParseEvent>, Error> {
        // Five CANs in a row cancel the session no matter what state the
        // parser is in.
        if ch == CAN {
            self.ncan += 1;
            if self.ncan >= 5 {
                self.ncan = 0;
                return Ok(Some(ParseEvent::Cancel));
            }
        } else {
            self.ncan = 0;
        }

        // Software flow control is never data.
        if ch == XON || ch == XOFF {
            return Ok(None);
        }

        match self.state {
            PState::Idle(sub) => Ok(self.idle(sub, ch)),
            PState::Header(sub) => Ok(self.header(sub, ch)),
            PState::Data => self.data(ch),
        }
    }

    fn idle(&mut self, sub: IdleSub, ch: u8) -> Option<ParseEvent> {
        match ch {
            // One or more ZPADs precede the ZDLE of any frame.
            ZPAD => {
                self.state = PState::Idle(IdleSub::Zdle);
                None
            }

            ZDLE if sub == IdleSub::Zdle => {
                self.oo = false;
                self.esc = false;
                self.state = PState::Header(HeaderSub::Format);
                None
            }

            // ZDLE without a preceding ZPAD; back to hunting.
            ZDLE => {
                self.state = PState::Idle(IdleSub::Zpad);
                None
            }

            // After ZFIN the sender closes the batch with "OO".
            b'O' if self.oo => {
                if sub == IdleSub::Oo {
                    self.oo = false;
                    self.state = PState::Idle(IdleSub::Zpad);
                    Some(ParseEvent::OverAndOut)
                } else {
                    self.state = PState::Idle(IdleSub::Oo);
                    None
                }
            }

            _ => {
                self.state = PState::Idle(IdleSub::Zpad);
                None
            }
        }
    }

    fn header(&mut self, sub: HeaderSub, ch: u8) -> Option<ParseEvent> {
        if ch == ZDLE && !self.esc {
            self.esc = true;
            return None;
        }

        let ch = if self.esc {
            self.esc = false;
            unescape(ch)
        } else {
            ch
        };

        match sub {
            HeaderSub::Format => match Encoding::try_from(ch) {
                Ok(fmt) => {
                    self.hdrfmt = fmt;
                    self.hdrndx = 0;
                    self.state = PState::Header(HeaderSub::Payload);
                    None
                }
                Err(_) => self.bad_header(),
            },

            HeaderSub::Payload => match self.hdrfmt {
                Encoding::ZHEX => match decode_nibble(ch) {
                    Some(nibble) => {
                        self.hdrdata[self.hdrndx] = nibble << 4;
                        self.state = PState::Header(HeaderSub::LsPayload);
                        None
                    }
                    None => self.bad_header(),
                },
                _ => {
                    self.hdrdata[self.hdrndx] = ch;
                    self.hdrndx += 1;

                    // Type and payload plus a 2-byte (ZBIN) or 4-byte
                    // (ZBIN32) CRC.
                    let len = if self.hdrfmt == Encoding::ZBIN32 { 9 } else { 7 };
                    if self.hdrndx >= len {
                        self.complete_header()
                    } else {
                        None
                    }
                }
            },

            HeaderSub::LsPayload => match decode_nibble(ch) {
                Some(nibble) => {
                    self.hdrdata[self.hdrndx] |= nibble;
                    self.hdrndx += 1;

                    if self.hdrndx >= 7 {
                        self.complete_header()
                    } else {
                        self.state = PState::Header(HeaderSub::Payload);
                        None
                    }
                }
                None => self.bad_header(),
            },
        }
    }

    fn bad_header(&mut self) -> Option<ParseEvent> {
        self.state = PState::Idle(IdleSub::Zpad);
        Some(ParseEvent::BadHeader)
    }

    fn complete_header(&mut self) -> Option<ParseEvent> {
        self.state = PState::Idle(IdleSub::Zpad);

        let ok = if self.hdrfmt == Encoding::ZBIN32 {
            self.hdrdata[5..9] == CRC32.checksum(&self.hdrdata[..5]).to_le_bytes()
        } else {
            self.hdrdata[5..7] == CRC16.checksum(&self.hdrdata[..5]).to_be_bytes()
        };

        if !ok {
            log::error!("header CRC mismatch");
            return Some(ParseEvent::BadHeader);
        }

        let mut flags = [0; 4];
        flags.copy_from_slice(&self.hdrdata[1..5]);
        Some(ParseEvent::Header {
            typ: self.hdrdata[0],
            flags,
        })
    }

    fn data(&mut self, ch: u8) -> Result<Option<ParseEvent>, Error> {
        if ch == ZDLE && !self.esc {
            self.esc = true;
            return Ok(None);
        }

        if self.pktlen >= self.pktbuf.len() {
            log::error!("sub-packet overflows the packet buffer");
            return Err(Error::Overflow);
        }

        let mut ch = ch;
        if self.esc {
            self.esc = false;
            match subpacket::Type::try_from(ch) {
                Ok(term) => {
                    // The terminator is covered by the CRC; it rides
                    // along in the buffer until verification.
                    self.pkttype = term;
                    self.ncrc = if self.hdrfmt == Encoding::ZBIN32 { 5 } else { 3 };
                }
                Err(_) => ch = unescape(ch),
            }
        }

        self.pktbuf[self.pktlen] = ch;
        self.pktlen += 1;

        match self.ncrc {
            1 => {
                let event = self.complete_data();
                self.state = PState::Idle(IdleSub::Zpad);
                self.ncrc = 0;
                Ok(Some(event))
            }
            n if n > 1 => {
                self.ncrc = n - 1;
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    fn complete_data(&mut self) -> ParseEvent {
        let width = if self.hdrfmt == Encoding::ZBIN32 { 4 } else { 2 };
        let covered = self.pktlen - width;

        let ok = if self.hdrfmt == Encoding::ZBIN32 {
            self.pktbuf[covered..self.pktlen] == CRC32.checksum(&self.pktbuf[..covered]).to_le_bytes()
        } else {
            self.pktbuf[covered..self.pktlen] == CRC16.checksum(&self.pktbuf[..covered]).to_be_bytes()
        };

        if !ok {
            log::error!("sub-packet CRC mismatch");
        }

        // Strip the terminator and the CRC; what remains is payload.
        self.pktlen = covered - 1;
        log::debug!(
            "sub-packet {} length {} crc_ok {}",
            self.pkttype,
            self.pktlen,
            ok
        );
        ParseEvent::Data {
            term: self.pkttype,
            crc_ok: ok,
        }
    }
}

fn decode_nibble(ch: u8) -> Option<u8> {
    match ch {
        b'0'..=b'9' => Some(ch - b'0'),
        b'a'..=b'f' => Some(ch - b'a' + 10),
        b'A'..=b'F' => Some(ch - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escape::Escaper;
    use crate::header::{Header, Type};

    fn feed(parser: &mut Parser, bytes: &[u8]) -> Vec<ParseEvent> {
        bytes
            .iter()
            .filter_map(|b| parser.step(*b).unwrap())
            .collect()
    }

    fn encoded(encoding: Encoding, frame_type: Type, flags: &[u8; 4]) -> Vec<u8> {
        let mut out = vec![];
        Header::new(encoding, frame_type)
            .with_flags(flags)
            .write(&mut out, &mut Escaper::new())
            .unwrap();
        out
    }

    #[rstest::rstest]
    #[case(Encoding::ZBIN)]
    #[case(Encoding::ZBIN32)]
    #[case(Encoding::ZHEX)]
    pub fn test_header_roundtrip(#[case] encoding: Encoding) {
        let mut parser = Parser::new();
        let wire = encoded(encoding, Type::ZRINIT, &[0x0a, 0x7f, 0x0d, 0xff]);

        let events = feed(&mut parser, &wire);
        assert_eq!(
            events,
            vec![ParseEvent::Header {
                typ: 1,
                flags: [0x0a, 0x7f, 0x0d, 0xff]
            }]
        );
    }

    #[test]
    fn test_all_types_roundtrip() {
        for typ in 0u8..20 {
            for encoding in [Encoding::ZBIN, Encoding::ZBIN32, Encoding::ZHEX] {
                let mut parser = Parser::new();
                let wire = encoded(encoding, Type::try_from(typ).unwrap(), &[9, 8, 7, 6]);
                let events = feed(&mut parser, &wire);
                assert_eq!(
                    events,
                    vec![ParseEvent::Header {
                        typ,
                        flags: [9, 8, 7, 6]
                    }],
                    "type {typ} encoding {encoding:?}"
                );
            }
        }
    }

    #[test]
    fn test_fragmentation_independence() {
        let wire = encoded(Encoding::ZBIN32, Type::ZDATA, &[0x78, 0x56, 0x34, 0x12]);
        let whole = feed(&mut Parser::new(), &wire);

        for split in 1..wire.len() {
            let mut parser = Parser::new();
            let mut events = feed(&mut parser, &wire[..split]);
            events.extend(feed(&mut parser, &wire[split..]));
            assert_eq!(events, whole, "split at {split}");
        }
    }

    #[test]
    fn test_header_crc_flip() {
        let wire = encoded(Encoding::ZHEX, Type::ZRINIT, &[0, 0, 0, 0x23]);

        for ndx in 4..18 {
            let mut corrupt = wire.clone();
            corrupt[ndx] ^= 0x01;
            let events = feed(&mut Parser::new(), &corrupt);
            assert_eq!(events, vec![ParseEvent::BadHeader], "byte {ndx}");
        }
    }

    #[test]
    fn test_bad_format_byte() {
        let events = feed(&mut Parser::new(), &[ZPAD, ZDLE, b'D']);
        assert_eq!(events, vec![ParseEvent::BadHeader]);
    }

    #[test]
    fn test_hex_junk() {
        let events = feed(&mut Parser::new(), &[ZPAD, ZPAD, ZDLE, b'B', b'0', b'z']);
        assert_eq!(events, vec![ParseEvent::BadHeader]);
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let mut parser = Parser::new();
        let events = feed(&mut parser, &[CAN; 8]);
        assert_eq!(events, vec![ParseEvent::Cancel]);
    }

    #[test]
    fn test_zdle_without_zpad_ignored() {
        let events = feed(&mut Parser::new(), &[ZDLE, b'B', b'0', b'1']);
        assert_eq!(events, vec![]);
    }

    #[test]
    fn test_data_subpacket() {
        let mut parser = Parser::new();

        // A ZBIN32 header selects the 32-bit CRC for the data that follows.
        feed(&mut parser, &encoded(Encoding::ZBIN32, Type::ZDATA, &[0; 4]));
        parser.enter_data();

        let mut wire = vec![];
        subpacket::encode(
            &mut wire,
            &mut Escaper::new(),
            Encoding::ZBIN32,
            subpacket::Type::ZCRCQ,
            &[0, 1, 2, 3, 4, 0x20, 0x20],
        )
        .unwrap();

        let events = feed(&mut parser, &wire);
        assert_eq!(
            events,
            vec![ParseEvent::Data {
                term: subpacket::Type::ZCRCQ,
                crc_ok: true
            }]
        );
        assert_eq!(parser.packet(), &[0, 1, 2, 3, 4, 0x20, 0x20]);
    }

    #[test]
    fn test_data_crc_flip() {
        let mut parser = Parser::new();
        feed(&mut parser, &encoded(Encoding::ZBIN32, Type::ZDATA, &[0; 4]));
        parser.enter_data();

        let mut wire = vec![];
        subpacket::encode(
            &mut wire,
            &mut Escaper::new(),
            Encoding::ZBIN32,
            subpacket::Type::ZCRCE,
            b"hello",
        )
        .unwrap();
        let last = wire.len() - 1;
        wire[last] ^= 0x01;

        let events = feed(&mut parser, &wire);
        assert_eq!(
            events,
            vec![ParseEvent::Data {
                term: subpacket::Type::ZCRCE,
                crc_ok: false
            }]
        );
    }

    #[test]
    fn test_oo_only_when_armed() {
        let mut parser = Parser::new();
        assert_eq!(feed(&mut parser, b"OO"), vec![]);

        parser.oo = true;
        assert_eq!(feed(&mut parser, b"OO"), vec![ParseEvent::OverAndOut]);

        // Disarmed after firing once.
        assert_eq!(feed(&mut parser, b"OO"), vec![]);
    }

    #[test]
    fn test_overflow_aborts() {
        let mut parser = Parser::new();
        feed(&mut parser, &encoded(Encoding::ZBIN32, Type::ZDATA, &[0; 4]));
        parser.enter_data();

        let mut result = Ok(None);
        for _ in 0..=PKT_CAPACITY {
            result = parser.step(b'x');
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(Error::Overflow)));
    }
}
