// SPDX-License-Identifier: MIT OR Apache-2.0
//! ZMODEM transfer protocol headers.
//!
//! Every frame starts with a 5-byte header: a type byte and four bytes of
//! payload, carried in one of three encodings.  Binary headers are
//! ZDLE-escaped with a trailing CRC-16 or CRC-32; hex headers spell the
//! same bytes as lowercase hex digits, which keeps them safe on 7-bit
//! links and visible to a human watching the line.

use crate::consts::{XON, ZDLE, ZPAD};
use crate::crc::{crc16_wire, crc32_wire};
use crate::escape::Escaper;
use bitflags::bitflags;
use core::convert::TryFrom;
use std::fmt::{self, Display};
use std::io::{self, Write};
use tinyvec::array_vec;
use zerocopy::AsBytes;

#[repr(u8)]
#[allow(clippy::upper_case_acronyms)]
#[derive(AsBytes, Clone, Copy, Debug, PartialEq, Eq)]
/// The header encoding
pub enum Encoding {
    ZBIN = 0x41,
    ZHEX = 0x42,
    ZBIN32 = 0x43,
}

const ENCODINGS: &[Encoding] = &[Encoding::ZBIN, Encoding::ZHEX, Encoding::ZBIN32];

#[derive(Clone, Copy, Debug)]
pub struct InvalidEncoding;

impl TryFrom<u8> for Encoding {
    type Error = InvalidEncoding;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        ENCODINGS
            .iter()
            .find(|e| value == **e as u8)
            .map_or(Err(InvalidEncoding), |e| Ok(*e))
    }
}

impl Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#02x}", *self as u8)
    }
}

#[repr(u8)]
#[allow(clippy::upper_case_acronyms)]
#[derive(AsBytes, Clone, Copy, Debug, PartialEq, Eq)]
/// The ZMODEM frame type
pub enum Type {
    /// Request receive init
    ZRQINIT = 0,
    /// Receive init
    ZRINIT = 1,
    /// Send init sequence (optional)
    ZSINIT = 2,
    /// ACK to above
    ZACK = 3,
    /// File name from sender
    ZFILE = 4,
    /// To sender: skip this file
    ZSKIP = 5,
    /// Last packet was garbled
    ZNAK = 6,
    /// Abort batch transfers
    ZABORT = 7,
    /// Finish session
    ZFIN = 8,
    /// Resume data trans at this position
    ZRPOS = 9,
    /// Data packet(s) follow
    ZDATA = 10,
    /// End of file
    ZEOF = 11,
    /// Fatal Read or Write error Detected
    ZFERR = 12,
    /// Request for file CRC and response
    ZCRC = 13,
    /// Receiver's Challenge
    ZCHALLENGE = 14,
    /// Request is complete
    ZCOMPL = 15,
    /// Other end canned session with CAN*5
    ZCAN = 16,
    /// Request for free bytes on filesystem
    ZFREECNT = 17,
    /// Command from sending program
    ZCOMMAND = 18,
    /// Output to standard error, data follows
    ZSTDERR = 19,
}

const TYPES: &[Type] = &[
    Type::ZRQINIT,
    Type::ZRINIT,
    Type::ZSINIT,
    Type::ZACK,
    Type::ZFILE,
    Type::ZSKIP,
    Type::ZNAK,
    Type::ZABORT,
    Type::ZFIN,
    Type::ZRPOS,
    Type::ZDATA,
    Type::ZEOF,
    Type::ZFERR,
    Type::ZCRC,
    Type::ZCHALLENGE,
    Type::ZCOMPL,
    Type::ZCAN,
    Type::ZFREECNT,
    Type::ZCOMMAND,
    Type::ZSTDERR,
];

#[derive(Clone, Copy, Debug)]
pub struct InvalidType;

impl TryFrom<u8> for Type {
    type Error = InvalidType;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        TYPES
            .iter()
            .find(|t| value == **t as u8)
            .map_or(Err(InvalidType), |t| Ok(*t))
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#02x}", *self as u8)
    }
}

#[repr(C)]
#[derive(AsBytes, Clone, Copy, Debug, PartialEq)]
pub struct Header {
    encoding: Encoding,
    frame_type: Type,
    flags: [u8; 4],
}

impl Header {
    pub const fn new(encoding: Encoding, frame_type: Type) -> Header {
        Header {
            encoding,
            frame_type,
            flags: [0; 4],
        }
    }

    /// Carry a 32-bit position or count.  ZMODEM orders payload integers
    /// least-significant byte first.
    pub const fn with_count(&self, count: u32) -> Self {
        Header {
            encoding: self.encoding,
            frame_type: self.frame_type,
            flags: count.to_le_bytes(),
        }
    }

    pub const fn with_flags(&self, flags: &[u8; 4]) -> Self {
        Header {
            encoding: self.encoding,
            frame_type: self.frame_type,
            flags: *flags,
        }
    }

    pub const fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub const fn frame_type(&self) -> Type {
        self.frame_type
    }

    pub const fn flags(&self) -> &[u8; 4] {
        &self.flags
    }

    pub const fn count(&self) -> u32 {
        u32::from_le_bytes(self.flags)
    }

    /// Stream the encoded header to `port`.
    ///
    /// Binary headers run the type, payload and CRC through the session
    /// escaper.  Hex headers need no escaping (hex digits are all in the
    /// safe set) and end with CR LF, plus an XON for every type except
    /// ZACK and ZFIN.
    pub fn write<P>(&self, port: &mut P, esc: &mut Escaper) -> io::Result<()>
    where
        P: Write,
    {
        let mut out = array_vec!([u8; 64]);

        out.push(ZPAD);
        if self.encoding == Encoding::ZHEX {
            out.push(ZPAD);
        }
        out.push(ZDLE);
        out.push(self.encoding as u8);

        // Skips the encoding byte; the CRC covers type and payload only.
        let raw = self.as_bytes();
        let mut body = array_vec!([u8; 9]);
        body.extend_from_slice(&raw[1..]);

        match self.encoding {
            Encoding::ZBIN32 => {
                let crc = crc32_wire(&body, None);
                body.extend_from_slice(&crc);
                esc.extend(&mut out, &body);
            }
            Encoding::ZBIN => {
                let crc = crc16_wire(&body, None);
                body.extend_from_slice(&crc);
                esc.extend(&mut out, &body);
            }
            Encoding::ZHEX => {
                let crc = crc16_wire(&body, None);
                body.extend_from_slice(&crc);
                out.extend(hex::encode(&body[..]).bytes());

                out.extend_from_slice(b"\r\n");
                if self.frame_type != Type::ZACK && self.frame_type != Type::ZFIN {
                    out.push(XON);
                }
            }
        }

        log::trace!("FRAME {}", self);
        port.write_all(&out)
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:8} {}", self.encoding, self.frame_type)
    }
}

bitflags! {
    /// Flags used as part of ZRINIT to notify the sender about receivers
    /// capabilities.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ReceiverFlags: u8 {
        /// Can send and receive in full-duplex
        const CANFDX = 0x01;
        /// Can receive data in parallel with disk I/O
        const CANOVIO = 0x02;
        /// Can send a break signal
        const CANBRK = 0x04;
        /// Can decrypt
        const CANCRY = 0x08;
        /// Can uncompress
        const CANLZW = 0x10;
        /// Can use 32-bit frame check
        const CANFC32 = 0x20;
        /// Expects control characters to be escaped
        const ESCALL = 0x40;
        /// Expects 8th bit to be escaped
        const ESC8 = 0x80;
    }
}

bitflags! {
    /// Flags carried in ZSINIT describing what the sender needs.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct SenderFlags: u8 {
        /// Sender needs control characters escaped
        const TESCCTL = 0x40;
        /// Sender needs the 8th bit escaped
        const TESC8 = 0x80;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::{XON, ZDLE, ZPAD};

    #[rstest::rstest]
    #[case(Encoding::ZBIN, Type::ZRQINIT, &[0; 4], &[ZPAD, ZDLE, 0x41, 0, 0, 0, 0, 0, 0, 0])]
    // The first CRC byte is GS (0x1d), which goes out escaped.
    #[case(Encoding::ZBIN32, Type::ZRQINIT, &[0; 4], &[ZPAD, ZDLE, 0x43, 0, 0, 0, 0, 0, ZDLE, 0x5d, 247, 34, 198])]
    #[case(Encoding::ZBIN, Type::ZRQINIT, &[1, 1, 1, 1], &[ZPAD, ZDLE, 0x41, 0, 1, 1, 1, 1, 98, 148])]
    #[case(Encoding::ZHEX, Type::ZRQINIT, &[1, 1, 1, 1], &[ZPAD, ZPAD, ZDLE, 0x42, b'0', b'0', b'0', b'1', b'0', b'1', b'0', b'1', b'0', b'1', 54, 50, 57, 52, b'\r', b'\n', XON])]
    #[case(Encoding::ZBIN, Type::ZRINIT, &[0xa, 0x7f, 0xd, 0xff], &[ZPAD, ZDLE, 0x41, 0x01, 0x0a, ZDLE, b'l', 0x0d, ZDLE, b'm', 0x5e, 0x6f])]
    #[case(Encoding::ZHEX, Type::ZRINIT, &[0x00, 0x02, 0x00, 0x23], b"**\x18B0100020023d030\r\n\x11")]
    pub fn test_write(
        #[case] encoding: Encoding,
        #[case] frame_type: Type,
        #[case] flags: &[u8; 4],
        #[case] expected: &[u8],
    ) {
        let mut esc = Escaper::new();
        let mut out = vec![];
        Header::new(encoding, frame_type)
            .with_flags(flags)
            .write(&mut out, &mut esc)
            .unwrap();
        assert_eq!(&out[..], expected);
    }

    #[rstest::rstest]
    #[case(Type::ZACK)]
    #[case(Type::ZFIN)]
    pub fn test_hex_without_xon(#[case] frame_type: Type) {
        let mut esc = Escaper::new();
        let mut out = vec![];
        Header::new(Encoding::ZHEX, frame_type)
            .write(&mut out, &mut esc)
            .unwrap();
        assert!(out.ends_with(b"\r\n"));
    }

    #[test]
    fn test_count_order() {
        let header = Header::new(Encoding::ZHEX, Type::ZRPOS).with_count(0x0102_0304);
        assert_eq!(header.flags(), &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(header.count(), 0x0102_0304);
    }

    #[test]
    fn test_try_from() {
        assert_eq!(Encoding::try_from(0x43).unwrap(), Encoding::ZBIN32);
        assert!(Encoding::try_from(0x44).is_err());
        assert_eq!(Type::try_from(9).unwrap(), Type::ZRPOS);
        assert!(Type::try_from(20).is_err());
    }
}
