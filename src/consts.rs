// SPDX-License-Identifier: MIT OR Apache-2.0
//! ZMODEM wire constants and engine tunables.

/// Padding character that begins every frame.
pub const ZPAD: u8 = b'*';
/// ZMODEM data link escape (CAN).
pub const ZDLE: u8 = 0x18;
/// Escaped ZDLE as it appears on the wire.
pub const ZDLEE: u8 = 0x58;

/// Escape that decodes to 0x7F.
pub const ZRUB0: u8 = b'l';
/// Escape that decodes to 0xFF.
pub const ZRUB1: u8 = b'm';

pub const XON: u8 = 0x11;
pub const XOFF: u8 = 0x13;
pub const CAN: u8 = 0x18;
pub const BS: u8 = 0x08;
pub const DLE: u8 = 0x10;
pub const GS: u8 = 0x1d;
pub const DEL: u8 = 0x7f;

/// ZFILE conversion flag F0: binary transfer.
pub const ZCBIN: u8 = 1;
/// ZFILE conversion flag F0: convert NL to the local end-of-line convention.
pub const ZCNL: u8 = 2;
/// ZFILE conversion flag F0: resume an interrupted transfer.
pub const ZCRESUM: u8 = 3;

/// ZFILE management flag F1: transfer if source newer or longer.
pub const ZMNEWL: u8 = 1;
/// ZFILE management flag F1: transfer if different CRC or length.
pub const ZMCRC: u8 = 2;
/// ZFILE management flag F1: append to an existing file.
pub const ZMAPND: u8 = 3;
/// ZFILE management flag F1: replace an existing file.
pub const ZMCLOB: u8 = 4;
/// ZFILE management flag F1: transfer if source is newer.
pub const ZMNEW: u8 = 5;
/// ZFILE management flag F1: transfer if dates or lengths differ.
pub const ZMDIFF: u8 = 6;
/// ZFILE management flag F1: transfer only if the destination is absent.
pub const ZMPROT: u8 = 7;
/// ZFILE management flag F1: rename if the destination exists.
pub const ZMCHNG: u8 = 8;
/// Mask selecting the management choice out of F1.
pub const ZMMASK: u8 = 0x1f;

/// Attention string control byte: send a break signal.
pub const ATTNBRK: u8 = 0xdd;
/// Attention string control byte: pause for one second.
pub const ATTNPSE: u8 = 0xde;

/// Paragraph 8.4, session abort sequence: eight CANs tear the session
/// down, ten backspaces erase them from a command interpreter's line.
pub const CANISTR: [u8; 18] = [
    CAN, CAN, CAN, CAN, CAN, CAN, CAN, CAN,
    BS, BS, BS, BS, BS, BS, BS, BS, BS, BS,
];

/// Largest unescaped sub-packet payload accepted from the sender.
pub const PKT_BUF_SIZE: usize = 1024;

/// Buffer size advertised to the sender in ZRINIT.
pub const PKT_SIZE: usize = 512;

/// Seconds the sender is expected to take answering a response header.
pub const RESP_TIMEOUT: u8 = 10;

/// Seconds to wait for the initial ZRQINIT from the sender.
pub const CONNECT_TIMEOUT: u8 = 30;

/// Serial number reported in the ZACK answering ZSINIT.
pub const SERIALNO: u32 = 1;

/// Data errors tolerated within one file before the session is canceled.
pub const MAX_ERRORS: u16 = 20;
