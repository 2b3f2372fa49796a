// SPDX-License-Identifier: MIT OR Apache-2.0
//! Receive-side session state machine.
//!
//! A simple transaction, one file, no errors, no CRC challenge:
//!
//! ```text
//!   Sender               Receiver    State
//!   --------------     ------------  --------
//!   ZRQINIT      ---->
//!                <---- ZRINIT        Start
//!   ZFILE        ---->
//!                <---- ZRPOS         FileInfo
//!   ZDATA        ---->               Reading
//!   Data packets ---->
//!   ZEOF         ---->
//!                <---- ZRINIT        Start
//!   ZFIN         ---->
//!                <---- ZFIN          Finish
//!   OO           ---->               Done
//! ```
//!
//! The engine is reactive: it opens with silence and answers the sender's
//! ZRQINIT.  It owns no descriptors and no timers; the embedder pushes
//! received bytes through [`Session::feed`] and reports elapsed response
//! windows through [`Session::timeout`].

use crate::consts::*;
use crate::error::{Error, Status};
use crate::escape::Escaper;
use crate::header::{Encoding, Header, ReceiverFlags, SenderFlags, Type};
use crate::parser::{ParseEvent, Parser};
use crate::subpacket;
use bitflags::bitflags;
use std::io::{self, Write};

/// Consumer of decoded file payload.
///
/// The engine hands over each verified sub-packet exactly once, in file
/// order.  File creation, seeking, durability and the local line
/// convention all belong to the implementation.
pub trait Sink {
    /// Accept `data` at the current file offset.  `zcnl` is true when the
    /// sender asked for newline conversion (ZFILE conversion flag ZCNL).
    fn receive(&mut self, data: &[u8], zcnl: bool) -> io::Result<()>;
}

/// Any writer is a sink that stores the payload verbatim.
impl<W: Write> Sink for W {
    fn receive(&mut self, data: &[u8], _zcnl: bool) -> io::Result<()> {
        self.write_all(data)
    }
}

/// High-level receive state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    /// Sent ZRINIT, waiting for ZFILE or ZSINIT.
    Start,
    /// Received ZSINIT, sent ZACK, waiting for its data sub-packet.
    InitWait,
    /// Received ZFILE, waiting for the file-info sub-packet.
    FileInfo,
    /// Sent ZCRC, waiting for the sender's file CRC.
    CrcWait,
    /// Ready for data sub-packets; ZRPOS has been sent.
    ReadReady,
    /// Streaming data sub-packets.
    Reading,
    /// Sent ZFIN, waiting for "OO" or a new ZRQINIT.
    Finish,
    /// Waiting for command data.
    Command,
    /// Waiting for a ZSTDERR payload.
    Message,
    /// Transfer complete.
    Done,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Event {
    RqInit,
    RInit,
    SInit,
    Ack,
    File,
    Skip,
    Nak,
    Abort,
    Fin,
    RPos,
    Data,
    Eof,
    FErr,
    Crc,
    Challenge,
    Compl,
    Can,
    FreeCnt,
    Command,
    Stderr,
    DataReceived,
    OverAndOut,
    Timeout,
    Error,
}

/// Map an incoming header type byte onto a state machine event.  Types
/// this receiver never expects fall through to the error catch-all.
fn event_for(typ: u8) -> Event {
    match typ {
        0 => Event::RqInit,
        1 => Event::RInit,
        2 => Event::SInit,
        3 => Event::Ack,
        4 => Event::File,
        5 => Event::Skip,
        6 => Event::Nak,
        7 => Event::Abort,
        8 => Event::Fin,
        9 => Event::RPos,
        10 => Event::Data,
        11 => Event::Eof,
        12 => Event::FErr,
        13 => Event::Crc,
        14 => Event::Challenge,
        15 => Event::Compl,
        16 => Event::Can,
        17 => Event::FreeCnt,
        18 => Event::Command,
        19 => Event::Stderr,
        _ => Event::Error,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Action {
    SendRinit,
    SenderInit,
    SenderInitData,
    InitTimeout,
    FreeCount,
    CrcReply,
    ResendCrcReq,
    FileHeader,
    DataHeader,
    ResendPos,
    FileInfo,
    FileData,
    FileTimeout,
    CommandData,
    Eof,
    Fin,
    FinishTimeout,
    Complete,
    Message,
    StderrData,
    CommandTimeout,
    DoneTimeout,
    Unexpected,
}

struct Transition {
    event: Event,
    discard: bool,
    next: State,
    action: Action,
}

const fn t(event: Event, discard: bool, next: State, action: Action) -> Transition {
    Transition {
        event,
        discard,
        next,
        action,
    }
}

/// Sent ZRINIT, waiting for ZFILE or ZSINIT.
static START: [Transition; 10] = [
    t(Event::SInit, false, State::InitWait, Action::SenderInit),
    t(Event::File, false, State::FileInfo, Action::FileHeader),
    t(Event::RqInit, false, State::Start, Action::SendRinit),
    t(Event::Fin, true, State::Finish, Action::Fin),
    t(Event::Nak, true, State::Start, Action::SendRinit),
    t(Event::FreeCnt, false, State::Start, Action::FreeCount),
    t(Event::Command, false, State::Command, Action::CommandData),
    t(Event::Stderr, false, State::Message, Action::Message),
    t(Event::Timeout, false, State::Start, Action::InitTimeout),
    t(Event::Error, false, State::Start, Action::Unexpected),
];

/// Received ZSINIT, sent ZACK, waiting for its data sub-packet.
static INITWAIT: [Transition; 3] = [
    t(Event::DataReceived, false, State::Start, Action::SenderInitData),
    t(Event::Timeout, false, State::InitWait, Action::InitTimeout),
    t(Event::Error, false, State::InitWait, Action::Unexpected),
];

/// Received ZFILE, waiting for the file-info sub-packet.
static FILEINFO: [Transition; 3] = [
    t(Event::DataReceived, false, State::ReadReady, Action::FileInfo),
    t(Event::Timeout, false, State::FileInfo, Action::InitTimeout),
    t(Event::Error, false, State::FileInfo, Action::Unexpected),
];

/// Sent ZCRC, waiting for the sender's file CRC.
static CRCWAIT: [Transition; 6] = [
    t(Event::Crc, false, State::ReadReady, Action::CrcReply),
    t(Event::Nak, false, State::CrcWait, Action::ResendCrcReq),
    t(Event::RqInit, true, State::Start, Action::SendRinit),
    t(Event::Fin, true, State::Finish, Action::Fin),
    t(Event::Timeout, false, State::CrcWait, Action::FileTimeout),
    t(Event::Error, false, State::CrcWait, Action::Unexpected),
];

/// Ready for data sub-packets; ZRPOS has been sent.
static READREADY: [Transition; 8] = [
    t(Event::Data, false, State::Reading, Action::DataHeader),
    t(Event::Nak, false, State::ReadReady, Action::ResendPos),
    t(Event::Eof, false, State::Start, Action::Eof),
    t(Event::RqInit, true, State::Start, Action::SendRinit),
    t(Event::File, false, State::ReadReady, Action::ResendPos),
    t(Event::Fin, true, State::Finish, Action::Fin),
    t(Event::Timeout, false, State::ReadReady, Action::FileTimeout),
    t(Event::Error, false, State::ReadReady, Action::Unexpected),
];

/// Streaming data sub-packets.
static READING: [Transition; 9] = [
    t(Event::RqInit, true, State::Start, Action::SendRinit),
    t(Event::File, false, State::FileInfo, Action::FileHeader),
    t(Event::Nak, true, State::ReadReady, Action::ResendPos),
    t(Event::Fin, true, State::Finish, Action::Fin),
    t(Event::Data, false, State::Reading, Action::DataHeader),
    t(Event::Eof, true, State::Start, Action::Eof),
    t(Event::DataReceived, false, State::Reading, Action::FileData),
    t(Event::Timeout, false, State::Reading, Action::FileTimeout),
    t(Event::Error, false, State::Reading, Action::Unexpected),
];

/// Sent ZFIN, waiting for "OO" or a new ZRQINIT.
static FINISH: [Transition; 7] = [
    t(Event::RqInit, true, State::Start, Action::SendRinit),
    t(Event::File, true, State::FileInfo, Action::FileHeader),
    t(Event::Nak, true, State::Finish, Action::Fin),
    t(Event::Fin, true, State::Finish, Action::Fin),
    t(Event::Timeout, false, State::Done, Action::FinishTimeout),
    t(Event::OverAndOut, false, State::Done, Action::Complete),
    t(Event::Error, false, State::Finish, Action::Unexpected),
];

/// Waiting for command data.
static COMMAND: [Transition; 3] = [
    t(Event::DataReceived, false, State::Command, Action::CommandData),
    t(Event::Timeout, false, State::Command, Action::CommandTimeout),
    t(Event::Error, false, State::Command, Action::Unexpected),
];

/// Waiting for a ZSTDERR payload.
static MESSAGE: [Transition; 3] = [
    t(Event::DataReceived, false, State::Message, Action::StderrData),
    t(Event::Timeout, false, State::Message, Action::CommandTimeout),
    t(Event::Error, false, State::Message, Action::Unexpected),
];

/// Transfer complete.
static DONE: [Transition; 2] = [
    t(Event::Timeout, false, State::Done, Action::DoneTimeout),
    t(Event::Error, false, State::Done, Action::Unexpected),
];

fn transitions(state: State) -> &'static [Transition] {
    match state {
        State::Start => &START,
        State::InitWait => &INITWAIT,
        State::FileInfo => &FILEINFO,
        State::CrcWait => &CRCWAIT,
        State::ReadReady => &READREADY,
        State::Reading => &READING,
        State::Finish => &FINISH,
        State::Command => &COMMAND,
        State::Message => &MESSAGE,
        State::Done => &DONE,
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    struct Flags: u8 {
        /// The current exchange uses 32-bit CRCs.
        const CRC32 = 1 << 0;
        /// The last sub-packet CRC verified.
        const CRKOK = 1 << 1;
        /// A recoverable protocol anomaly was observed.
        const WAIT = 1 << 2;
    }
}

/// One ZMODEM receive session.
///
/// `P` is the transport write half and `S` consumes decoded file bytes.
/// Input is pushed in with [`Session::feed`]; the session never reads or
/// blocks on its own, which makes it at home in an event loop as much as
/// in a plain read loop.
pub struct Session<P: Write, S: Sink> {
    port: P,
    sink: S,
    state: State,
    parser: Parser,
    escaper: Escaper,
    flags: Flags,
    /// Payload of the most recently accepted header.
    rxflags: [u8; 4],
    /// Terminator of the most recently completed sub-packet.
    pkttype: subpacket::Type,
    rcaps: ReceiverFlags,
    scaps: SenderFlags,
    /// ZFILE conversion flag.
    f0: u8,
    /// ZFILE management flag.
    f1: u8,
    filename: Option<String>,
    attn: Option<Vec<u8>>,
    offset: u32,
    filesize: u64,
    timestamp: u32,
    /// File CRC reported by the sender during the CRC challenge.
    file_crc: u32,
    nerrors: u16,
    ntimeouts: u8,
    /// Expected response window for the current state, in seconds.
    timeout: u8,
    poisoned: bool,
}

impl<P: Write, S: Sink> Session<P, S> {
    /// Create a session around the transport write half and a file sink.
    ///
    /// Nothing is emitted yet: the receiver waits for the sender's
    /// ZRQINIT and answers it with ZRINIT.
    pub fn new(port: P, sink: S) -> Session<P, S> {
        Session {
            port,
            sink,
            state: State::Start,
            parser: Parser::new(),
            escaper: Escaper::new(),
            flags: Flags::empty(),
            rxflags: [0; 4],
            pkttype: subpacket::Type::ZCRCE,
            rcaps: ReceiverFlags::CANFDX
                .union(ReceiverFlags::CANOVIO)
                .union(ReceiverFlags::CANFC32),
            scaps: SenderFlags::empty(),
            f0: 0,
            f1: 0,
            filename: None,
            attn: None,
            offset: 0,
            filesize: 0,
            timestamp: 0,
            file_crc: 0,
            nerrors: 0,
            ntimeouts: 0,
            timeout: CONNECT_TIMEOUT,
            poisoned: false,
        }
    }

    /// Push a chunk of bytes received from the remote peer.
    ///
    /// Every response header the chunk provokes is written out before the
    /// next byte is looked at.  Returns [`Status::Done`] once the batch
    /// trailer has been seen; a fatal error poisons the session and any
    /// further input is rejected.
    pub fn feed(&mut self, data: &[u8]) -> Result<Status, Error> {
        if self.poisoned {
            return Err(Error::Terminated);
        }

        if log::log_enabled!(log::Level::Debug) {
            for line in hexdump::hexdump_iter(data) {
                log::debug!("In: {line}");
            }
        }

        for ch in data {
            let event = match self.parser.step(*ch) {
                Ok(Some(event)) => event,
                Ok(None) => continue,
                Err(err) => {
                    // A local protocol violation; tear the session down.
                    let _ = self.port.write_all(&CANISTR);
                    self.poisoned = true;
                    return Err(err);
                }
            };

            let outcome = match event {
                ParseEvent::Cancel => {
                    log::error!("remote end has canceled");
                    self.poisoned = true;
                    return Err(Error::Cancelled);
                }
                ParseEvent::BadHeader => {
                    // NAK and keep hunting; this never touches the
                    // session state.
                    self.send_hex(Type::ZNAK, [0; 4]).map(|()| (Status::Continue, false))
                }
                ParseEvent::Header { typ, flags } => {
                    self.rxflags = flags;
                    self.flags.set(Flags::CRC32, self.parser.crc32());
                    self.dispatch(event_for(typ))
                }
                ParseEvent::Data { term, crc_ok } => {
                    self.pkttype = term;
                    self.flags.set(Flags::CRKOK, crc_ok);
                    self.dispatch(Event::DataReceived)
                }
                ParseEvent::OverAndOut => self.dispatch(Event::OverAndOut),
            };

            match outcome {
                Ok((Status::Done, _)) => return Ok(Status::Done),
                Ok((Status::Continue, discard)) => {
                    if discard {
                        // The transition asked for buffered input to be
                        // dropped; the rest of this chunk is it.
                        break;
                    }
                }
                Err(err) => {
                    self.poisoned = true;
                    return Err(err);
                }
            }
        }

        Ok(Status::Continue)
    }

    /// Report that the response window for the current state has elapsed.
    ///
    /// The engine keeps no clocks; the embedder decides when the window
    /// ([`Session::response_window`]) has passed without progress.
    pub fn timeout(&mut self) -> Result<Status, Error> {
        if self.poisoned {
            return Err(Error::Terminated);
        }

        match self.dispatch(Event::Timeout) {
            Ok((status, _)) => Ok(status),
            Err(err) => {
                self.poisoned = true;
                Err(err)
            }
        }
    }

    /// Decline the file currently being offered or received: send ZSKIP
    /// and wait for the sender's next move.
    ///
    /// Whether a pathname is acceptable is the embedder's policy; the
    /// engine records the name ([`Session::filename`]) and leaves the
    /// decision to the caller.
    pub fn skip(&mut self) -> Result<Status, Error> {
        if self.poisoned {
            return Err(Error::Terminated);
        }

        self.parser.reset();
        self.state = State::Start;
        match self.send_hex(Type::ZSKIP, [0; 4]) {
            Ok(()) => Ok(Status::Continue),
            Err(err) => {
                self.poisoned = true;
                Err(err)
            }
        }
    }

    /// Name of the file currently being received, from ZFILE.
    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// Size of the file currently being received, as reported in ZFILE.
    pub fn file_size(&self) -> u64 {
        self.filesize
    }

    /// Modification time reported in ZFILE (seconds since the epoch).
    pub fn file_timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Bytes of the current file delivered to the sink so far.
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// How long the sender should reasonably take to answer, in seconds.
    pub fn response_window(&self) -> u8 {
        self.timeout
    }

    /// Current high-level state.
    pub fn state(&self) -> State {
        self.state
    }

    /// The transport write half.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// The transport write half, mutably.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// The file sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Tear the session apart, returning the transport and the sink.
    pub fn into_inner(self) -> (P, S) {
        (self.port, self.sink)
    }

    fn dispatch(&mut self, event: Event) -> Result<(Status, bool), Error> {
        let table = transitions(self.state);
        let row = table
            .iter()
            .find(|row| row.event == event)
            .unwrap_or(&table[table.len() - 1]);

        log::trace!(
            "state {:?} event {:?} -> {:?} discard {}",
            self.state,
            event,
            row.next,
            row.discard
        );

        self.state = row.next;
        let status = self.run(row.action)?;
        Ok((status, row.discard))
    }

    fn run(&mut self, action: Action) -> Result<Status, Error> {
        match action {
            Action::SendRinit => self.send_rinit(),
            Action::SenderInit => self.sender_init(),
            Action::SenderInitData => self.sender_init_data(),
            Action::InitTimeout => self.init_timeout(),
            Action::FreeCount => self.free_count(),
            Action::CrcReply => self.crc_reply(),
            Action::ResendCrcReq => self.resend_crc_req(),
            Action::FileHeader => self.file_header(),
            Action::DataHeader => self.data_header(),
            Action::ResendPos => self.resend_pos(),
            Action::FileInfo => self.file_info(),
            Action::FileData => self.file_data(),
            Action::FileTimeout => self.file_timeout(),
            Action::CommandData => self.command_data(),
            Action::Eof => self.eof(),
            Action::Fin => self.fin(),
            Action::FinishTimeout => self.finish_timeout(),
            Action::Complete => self.complete(),
            Action::Message => self.message(),
            Action::StderrData => self.stderr_data(),
            Action::CommandTimeout => self.command_timeout(),
            Action::DoneTimeout => self.done_timeout(),
            Action::Unexpected => self.unexpected(),
        }
    }

    /// Answer ZRQINIT (or a NAK of our greeting) with ZRINIT: the buffer
    /// size we can take without overlap, and our capability byte.
    fn send_rinit(&mut self) -> Result<Status, Error> {
        self.state = State::Start;
        self.parser.oo = false;
        self.timeout = RESP_TIMEOUT;

        let flags = [
            (PKT_SIZE & 0xff) as u8,
            ((PKT_SIZE >> 8) & 0xff) as u8,
            0,
            self.rcaps.bits(),
        ];
        self.send_hex(Type::ZRINIT, flags)?;
        Ok(Status::Continue)
    }

    /// ZSINIT header: latch the sender's capabilities and collect the
    /// attention string that follows as a data sub-packet.
    fn sender_init(&mut self) -> Result<Status, Error> {
        self.scaps = SenderFlags::from_bits_truncate(self.rxflags[3]);
        self.escaper
            .escape_control(self.scaps.contains(SenderFlags::TESCCTL));
        self.parser.enter_data();
        Ok(Status::Continue)
    }

    /// The rest of the ZSINIT packet.
    fn sender_init_data(&mut self) -> Result<Status, Error> {
        self.parser.reset();

        if !self.flags.contains(Flags::CRKOK) {
            self.send_hex(Type::ZNAK, [0; 4])?;
            return Ok(Status::Continue);
        }

        self.attn = {
            let packet = self.parser.packet();
            let end = packet.iter().position(|b| *b == 0).unwrap_or(packet.len());
            (end > 0).then(|| packet[..end].to_vec())
        };

        self.send_hex(Type::ZACK, SERIALNO.to_le_bytes())?;
        Ok(Status::Continue)
    }

    fn init_timeout(&mut self) -> Result<Status, Error> {
        self.ntimeouts += 1;
        log::debug!("{} timeouts waiting for ZSINIT or ZFILE", self.ntimeouts);

        if self.ntimeouts > 4 {
            return Err(Error::RetriesExhausted);
        }

        self.send_rinit()
    }

    /// ZFREECNT asks for free space on the medium; the sink owns storage,
    /// so report unlimited.
    fn free_count(&mut self) -> Result<Status, Error> {
        self.send_hex(Type::ZACK, 0xffff_ffffu32.to_le_bytes())?;
        Ok(Status::Continue)
    }

    /// The sender answered our ZCRC request with the file CRC.
    fn crc_reply(&mut self) -> Result<Status, Error> {
        self.file_crc = u32::from_le_bytes(self.rxflags);
        log::debug!("remote file CRC {:#010x}", self.file_crc);
        self.open_file()
    }

    /// The sender NAKed our ZCRC request; repeat it.
    fn resend_crc_req(&mut self) -> Result<Status, Error> {
        self.send_hex(Type::ZCRC, [0; 4])?;
        Ok(Status::Continue)
    }

    /// ZFILE header: cache the transfer flags and collect the file-info
    /// sub-packet.
    fn file_header(&mut self) -> Result<Status, Error> {
        self.nerrors = 0;
        self.parser.oo = false;
        self.f0 = self.rxflags[3];
        self.f1 = self.rxflags[2];
        self.parser.enter_data();
        Ok(Status::Continue)
    }

    /// ZDATA header: the sender's position must match ours exactly, or we
    /// interrupt it and force a seek with ZRPOS.
    fn data_header(&mut self) -> Result<Status, Error> {
        let offset = u32::from_le_bytes(self.rxflags);

        if offset != self.offset {
            log::debug!("bad position {offset}, want {}", self.offset);
            return self.file_error(Type::ZRPOS, self.offset);
        }

        self.parser.enter_data();
        Ok(Status::Continue)
    }

    /// Our last ZRPOS was garbled; repeat it.
    fn resend_pos(&mut self) -> Result<Status, Error> {
        self.send_hex(Type::ZRPOS, self.offset.to_le_bytes())?;
        Ok(Status::Continue)
    }

    /// The file-info sub-packet: NUL-terminated name, then a line of
    /// ASCII metadata ("length mtime mode serial files-remaining
    /// bytes-remaining type", mtime/mode/serial in octal).
    fn file_info(&mut self) -> Result<Status, Error> {
        self.parser.reset();

        if !self.flags.contains(Flags::CRKOK) {
            self.state = State::Start;
            self.send_hex(Type::ZNAK, [0; 4])?;
            return Ok(Status::Continue);
        }

        let (name, filesize, timestamp) = {
            let packet = self.parser.packet();
            let end = packet.iter().position(|b| *b == 0).unwrap_or(packet.len());
            let name = String::from_utf8_lossy(&packet[..end]).into_owned();

            let meta = packet.get(end + 1..).unwrap_or(&[]);
            let meta = std::str::from_utf8(meta).unwrap_or("");
            let mut fields = meta.split_ascii_whitespace();
            let filesize = fields
                .next()
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(0);
            let timestamp = fields
                .next()
                .and_then(|s| u32::from_str_radix(s, 8).ok())
                .unwrap_or(0);

            (name, filesize, timestamp)
        };

        log::debug!(
            "file '{}' length {} f0 {:#04x} f1 {:#04x}",
            name,
            filesize,
            self.f0,
            self.f1
        );

        self.filename = Some(name);
        self.filesize = filesize;
        self.timestamp = timestamp;

        // The sender may want its file CRC matched against an existing
        // copy before we commit to the transfer.
        if self.f1 & ZMMASK == ZMCRC {
            self.state = State::CrcWait;
            self.send_hex(Type::ZCRC, [0; 4])?;
            return Ok(Status::Continue);
        }

        self.state = State::ReadReady;
        self.open_file()
    }

    /// Position the transfer and invite data with ZRPOS.
    fn open_file(&mut self) -> Result<Status, Error> {
        if self.f0 != ZCRESUM {
            self.offset = 0;
        }

        self.state = State::ReadReady;
        self.send_hex(Type::ZRPOS, self.offset.to_le_bytes())?;
        Ok(Status::Continue)
    }

    /// A file data sub-packet completed.
    fn file_data(&mut self) -> Result<Status, Error> {
        if !self.flags.contains(Flags::CRKOK) {
            self.nerrors += 1;
            log::debug!("{} data errors", self.nerrors);

            if self.nerrors > MAX_ERRORS {
                let _ = self.port.write_all(&CANISTR);
                return Err(Error::TooManyErrors);
            }

            // Fall back to the ready state and get the sender in sync.
            self.state = State::ReadReady;
            return self.file_error(Type::ZRPOS, self.offset);
        }

        let zcnl = self.f0 == ZCNL;
        let result = self.sink.receive(self.parser.packet(), zcnl);
        if let Err(err) = result {
            log::error!("sink failed: {err}");
            let errno = err.raw_os_error().unwrap_or(1) as u32;
            self.state = State::Finish;
            self.file_error(Type::ZFERR, errno).ok();
            return Err(Error::Sink(err));
        }

        self.offset += self.parser.packet().len() as u32;
        log::debug!("offset {} after {} sub-packet", self.offset, self.pkttype);

        // ZCRCE and ZCRCW close the frame; a header follows.
        if self.pkttype == subpacket::Type::ZCRCE || self.pkttype == subpacket::Type::ZCRCW {
            self.state = State::ReadReady;
            self.parser.reset();
        } else {
            self.parser.enter_data();
        }

        // ZCRCQ and ZCRCW expect an acknowledgement at this offset.
        if self.pkttype == subpacket::Type::ZCRCQ || self.pkttype == subpacket::Type::ZCRCW {
            self.send_hex(Type::ZACK, self.offset.to_le_bytes())?;
        }

        Ok(Status::Continue)
    }

    fn file_timeout(&mut self) -> Result<Status, Error> {
        self.ntimeouts += 1;
        log::debug!("{} timeouts waiting for file data", self.ntimeouts);

        if self.ntimeouts > 2 {
            // Start the whole transfer over.
            self.ntimeouts = 0;
            return self.send_rinit();
        }

        if self.state == State::CrcWait {
            self.resend_crc_req()
        } else {
            self.resend_pos()
        }
    }

    /// ZEOF: the file is complete if the position agrees; greet the next
    /// file with a fresh ZRINIT.
    fn eof(&mut self) -> Result<Status, Error> {
        let offset = u32::from_le_bytes(self.rxflags);

        if offset != self.offset {
            log::debug!("spurious ZEOF at {offset}, expected {}", self.offset);
            self.state = State::ReadReady;
            return Ok(Status::Continue);
        }

        self.send_rinit()
    }

    /// ZFIN: answer in kind, then watch for "OO" or another ZRQINIT.
    fn fin(&mut self) -> Result<Status, Error> {
        self.state = State::Finish;
        self.parser.reset();
        self.file_cleanup();
        self.parser.oo = true;
        self.send_hex(Type::ZFIN, [0; 4])?;
        Ok(Status::Continue)
    }

    fn finish_timeout(&mut self) -> Result<Status, Error> {
        self.ntimeouts += 1;
        self.parser.oo = false;
        Err(Error::RetriesExhausted)
    }

    /// "OO" received; the batch is over.
    fn complete(&mut self) -> Result<Status, Error> {
        log::debug!("transfer done");
        Ok(Status::Done)
    }

    /// ZSTDERR header; the message follows as a data sub-packet.
    fn message(&mut self) -> Result<Status, Error> {
        self.parser.enter_data();
        Ok(Status::Continue)
    }

    fn stderr_data(&mut self) -> Result<Status, Error> {
        log::info!(
            "sender says: {}",
            String::from_utf8_lossy(self.parser.packet())
        );
        Ok(Status::Continue)
    }

    /// ZCOMMAND wiring; command execution is not implemented.
    fn command_data(&mut self) -> Result<Status, Error> {
        Ok(Status::Continue)
    }

    fn command_timeout(&mut self) -> Result<Status, Error> {
        Err(Error::RetriesExhausted)
    }

    fn done_timeout(&mut self) -> Result<Status, Error> {
        Err(Error::RetriesExhausted)
    }

    /// An event this state has no row for.  Note it and wait for the
    /// remote peer to continue.
    fn unexpected(&mut self) -> Result<Status, Error> {
        log::debug!("unexpected event in state {:?}", self.state);
        self.flags.insert(Flags::WAIT);
        self.parser.oo = false;
        Ok(Status::Continue)
    }

    /// A receiver-detected file error: execute the attention sequence to
    /// interrupt a streaming sender, then send the position header.
    fn file_error(&mut self, typ: Type, data: u32) -> Result<Status, Error> {
        self.parser.reset();

        let seq: Vec<u8> = match &self.attn {
            Some(attn) => attn
                .iter()
                .copied()
                // Break and pause are transport services this engine
                // does not own; both are stripped.
                .filter(|ch| *ch != ATTNBRK && *ch != ATTNPSE)
                .collect(),
            None => Vec::new(),
        };
        if !seq.is_empty() {
            self.port.write_all(&seq).map_err(Error::Io)?;
        }

        self.send_hex(typ, data.to_le_bytes())?;
        Ok(Status::Continue)
    }

    fn file_cleanup(&mut self) {
        self.filename = None;
        self.attn = None;
    }

    fn send_hex(&mut self, typ: Type, flags: [u8; 4]) -> Result<(), Error> {
        Header::new(Encoding::ZHEX, typ)
            .with_flags(&flags)
            .write(&mut self.port, &mut self.escaper)
            .map_err(Error::Io)
    }
}
