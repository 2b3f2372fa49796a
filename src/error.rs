// SPDX-License-Identifier: MIT OR Apache-2.0
//! Failure taxonomy of the receive engine.

use std::fmt;
use std::io;

const EPERM: i32 = 1;
const EIO: i32 = 5;
const ENOBUFS: i32 = 105;
const ESHUTDOWN: i32 = 108;
const ETIMEDOUT: i32 = 110;
const ECANCELED: i32 = 125;

/// Fatal session failures.  Transient protocol anomalies (bad CRCs,
/// position mismatches, unexpected events) are recovered internally and
/// never reach the embedder.
#[derive(Debug)]
pub enum Error {
    /// The remote peer canceled the session with a burst of CANs.
    Cancelled,
    /// The per-file data error budget was exhausted.
    TooManyErrors,
    /// The retry budget for the current state was exhausted after
    /// repeated timeouts.
    RetriesExhausted,
    /// A sub-packet overflowed the packet buffer.
    Overflow,
    /// Input was fed to a session that has already failed.
    Terminated,
    /// The transport write half failed or came up short.
    Io(io::Error),
    /// The file sink rejected payload.
    Sink(io::Error),
}

impl Error {
    /// The classic negated-errno rendition of this error, for embedders
    /// that surface the engine through a C-shaped boundary.
    pub fn errno(&self) -> i32 {
        match self {
            Error::Cancelled => -ECANCELED,
            Error::TooManyErrors => -EIO,
            Error::RetriesExhausted => -ETIMEDOUT,
            Error::Overflow => -ENOBUFS,
            Error::Terminated => -ESHUTDOWN,
            Error::Io(err) | Error::Sink(err) => -err.raw_os_error().unwrap_or(EPERM),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Cancelled => write!(f, "session canceled by remote peer"),
            Error::TooManyErrors => write!(f, "too many data errors"),
            Error::RetriesExhausted => write!(f, "timed out waiting for the remote peer"),
            Error::Overflow => write!(f, "sub-packet overflows the packet buffer"),
            Error::Terminated => write!(f, "session already terminated"),
            Error::Io(err) => write!(f, "transport write failed: {err}"),
            Error::Sink(err) => write!(f, "sink rejected data: {err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) | Error::Sink(err) => Some(err),
            _ => None,
        }
    }
}

/// Outcome of feeding bytes into a live session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    /// Mid-transfer; keep feeding input.
    Continue,
    /// The batch is complete ("OO" received); the session can be dropped.
    Done,
}
