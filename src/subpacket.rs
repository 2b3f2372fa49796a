// SPDX-License-Identifier: MIT OR Apache-2.0
//! ZMODEM data sub-packets.
//!
//! File content and frame metadata travel in CRC-terminated sub-packets:
//! escaped payload, then `ZDLE` plus one of four terminator codes, then
//! the CRC over payload-and-terminator.  The terminator tells the peer
//! whether the frame continues and whether an acknowledgement is owed.

use crate::consts::ZDLE;
use crate::crc::{crc16_wire, crc32_wire};
use crate::escape::Escaper;
use crate::header::Encoding;
use core::convert::TryFrom;
use std::fmt::{self, Display};
use std::io::{self, Write};
use zerocopy::AsBytes;

#[repr(u8)]
#[allow(clippy::upper_case_acronyms)]
#[derive(AsBytes, Clone, Copy, Debug, PartialEq, Eq)]
/// The ZMODEM sub-packet terminator
pub enum Type {
    /// CRC next, frame ends, header packet follows
    ZCRCE = b'h',
    /// CRC next, frame continues nonstop
    ZCRCG = b'i',
    /// CRC next, frame continues, ZACK expected
    ZCRCQ = b'j',
    /// CRC next, ZACK expected, end of frame
    ZCRCW = b'k',
}

const TYPES: &[Type] = &[Type::ZCRCE, Type::ZCRCG, Type::ZCRCQ, Type::ZCRCW];

#[derive(Clone, Copy, Debug)]
pub struct InvalidType;

impl TryFrom<u8> for Type {
    type Error = InvalidType;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        TYPES
            .iter()
            .find(|e| value == **e as u8)
            .map_or(Err(InvalidType), |e| Ok(*e))
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#02x}", *self as u8)
    }
}

/// Encode one data sub-packet to `port`.
///
/// The terminator pair `ZDLE <type>` goes out unescaped; payload and CRC
/// run through the session escaper.
pub fn encode<P>(
    port: &mut P,
    esc: &mut Escaper,
    encoding: Encoding,
    term: Type,
    data: &[u8],
) -> io::Result<()>
where
    P: Write,
{
    log::debug!(
        "  ZCRC{} subpacket, size = {}",
        match term {
            Type::ZCRCE => "E",
            Type::ZCRCG => "G",
            Type::ZCRCQ => "Q",
            Type::ZCRCW => "W",
        },
        data.len()
    );

    let mut out = Vec::with_capacity(data.len() + data.len() / 10 + 12);
    esc.extend(&mut out, data);
    out.extend_from_slice(&[ZDLE, term as u8]);

    if encoding == Encoding::ZBIN32 {
        let crc = crc32_wire(data, Some(term as u8));
        esc.extend(&mut out, &crc);
    } else {
        let crc = crc16_wire(data, Some(term as u8));
        esc.extend(&mut out, &crc);
    }

    port.write_all(&out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[rstest::rstest]
    #[case(Encoding::ZBIN32, Type::ZCRCE, b"a\n", &[0x61, 0x0a, 0x18, 0x68, 0xe5, 0x79, 0xd2, 0x0f])]
    #[case(Encoding::ZBIN, Type::ZCRCW, b"hello", &[b'h', b'e', b'l', b'l', b'o', 0x18, 0x6b, 86, 226])]
    // The final CRC byte 0x91 is XON with the parity bit set; it goes out escaped.
    #[case(Encoding::ZBIN32, Type::ZCRCE, b"", &[0x18, 0x68, 231, 6, 107, 0x18, 0xd1])]
    pub fn test_encode(
        #[case] encoding: Encoding,
        #[case] term: Type,
        #[case] data: &[u8],
        #[case] expected: &[u8],
    ) {
        let mut esc = Escaper::new();
        let mut out = vec![];
        encode(&mut out, &mut esc, encoding, term, data).unwrap();
        assert_eq!(&out[..], expected);
    }

    #[test]
    fn test_try_from() {
        assert_eq!(Type::try_from(b'j').unwrap(), Type::ZCRCQ);
        assert!(Type::try_from(b'g').is_err());
    }
}
