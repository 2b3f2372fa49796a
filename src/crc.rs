// SPDX-License-Identifier: MIT OR Apache-2.0

use crc::{Crc, CRC_16_XMODEM, CRC_32_ISO_HDLC};

pub const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);
pub const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// CRC-32 over a buffer plus an optional trailing sub-packet terminator,
/// in the little-endian byte order ZMODEM puts on the wire.
pub fn crc32_wire(buf: &[u8], maybe_term: Option<u8>) -> [u8; 4] {
    let mut digest = CRC32.digest();

    digest.update(buf);

    if let Some(term) = maybe_term {
        digest.update(&[term]);
    }

    // Assuming little-endian byte order, given that ZMODEM used to work on
    // VAX, which was a little-endian computer architecture:
    digest.finalize().to_le_bytes()
}

/// CRC-16 over a buffer plus an optional trailing sub-packet terminator.
/// Unlike the CRC-32, the 16-bit value goes out big-endian.
pub fn crc16_wire(buf: &[u8], maybe_term: Option<u8>) -> [u8; 2] {
    let mut digest = CRC16.digest();

    digest.update(buf);

    if let Some(term) = maybe_term {
        digest.update(&[term]);
    }

    digest.finalize().to_be_bytes()
}
