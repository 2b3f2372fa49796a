// SPDX-License-Identifier: MIT OR Apache-2.0
//! Receive side of the ZMODEM file transfer protocol, as a byte-driven
//! state machine with no I/O of its own.
//!
//! The embedder owns the transport (serial line, TCP socket, pty) and the
//! storage.  Bytes read from the remote sender are pushed into a
//! [`Session`] with [`Session::feed`]; response headers are written out
//! through the transport write half the session was built around, and
//! verified file payload is handed to a [`Sink`].  The engine never
//! blocks, polls or sleeps, so it drops into an event loop as easily as
//! into a blocking read loop.
//!
//! ```
//! use zmrx::{Session, Status};
//!
//! let mut wire_out = Vec::new();
//! let mut file = Vec::new();
//! let mut session = Session::new(&mut wire_out, &mut file);
//!
//! // Bytes from the remote sender go in as they arrive, in any
//! // fragmentation the transport produces:
//! let status = session.feed(b"line noise between frames is ignored").unwrap();
//! assert_eq!(status, Status::Continue);
//! ```
//!
//! Timeouts belong to the embedder as well: when the window reported by
//! [`Session::response_window`] passes without progress, call
//! [`Session::timeout`] and the engine retries or gives up according to
//! protocol rules.

pub mod consts;
mod crc;
pub mod escape;
pub mod header;
pub mod rwlog;
pub mod subpacket;

mod error;
mod parser;
pub mod recv;

pub use crate::crc::{CRC16, CRC32};
pub use crate::error::{Error, Status};
pub use crate::recv::{Session, Sink, State};
