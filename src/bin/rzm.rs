// SPDX-License-Identifier: MIT OR Apache-2.0
//! `rz` lookalike: receive one ZMODEM batch on stdin/stdout.

use clap::Parser;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use std::process::exit;

use zmrx::{rwlog::WriteLog, Session, Sink, Status};

#[derive(Parser, Debug)]
#[command(about = "Receive a ZMODEM file transfer on stdin/stdout")]
struct Arguments {
    /// Where to store the received data; defaults to "rz-out"
    file: Option<String>,
}

/// Stdout with a flush after every write, so response headers reach the
/// sender before we wait for its next frame.
struct StdoutPort;

impl Write for StdoutPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let out = io::stdout().write(buf)?;
        io::stdout().flush()?;
        Ok(out)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stdout().flush()
    }
}

/// File sink applying the ZCNL newline conversion when the sender asks
/// for it: CR, LF, CR-LF and LF-CR all become a single '\n'.
struct FileSink {
    file: File,
    last: u8,
}

impl Sink for FileSink {
    fn receive(&mut self, data: &[u8], zcnl: bool) -> io::Result<()> {
        if !zcnl {
            return self.file.write_all(data);
        }

        for ch in data {
            let ch = *ch;
            let paired = (ch == b'\n' && self.last == b'\r')
                || (ch == b'\r' && self.last == b'\n');
            if !paired {
                if ch == b'\r' || ch == b'\n' {
                    self.file.write_all(b"\n")?;
                } else {
                    self.file.write_all(&[ch])?;
                }
            }
            self.last = ch;
        }

        Ok(())
    }
}

fn main() {
    env_logger::init();

    let args = Arguments::parse();
    let fileopt = args.file.as_deref().unwrap_or("rz-out");
    let filename = Path::new(fileopt).file_name().unwrap_or_else(|| {
        eprintln!("invalid file name {fileopt:?}");
        exit(1);
    });
    let file = File::create(filename).unwrap_or_else(|err| {
        eprintln!("cannot create file {filename:?}: {err}");
        exit(1);
    });

    let sink = FileSink { file, last: 0 };
    let mut session = Session::new(WriteLog::new(StdoutPort), sink);

    let mut stdin = io::stdin().lock();
    let mut buf = [0u8; 512];
    loop {
        let nread = match stdin.read(&mut buf) {
            Ok(0) => {
                eprintln!("sender closed the line");
                exit(1);
            }
            Ok(n) => n,
            Err(err) => {
                eprintln!("read error: {err}");
                exit(1);
            }
        };

        match session.feed(&buf[..nread]) {
            Ok(Status::Continue) => {}
            Ok(Status::Done) => break,
            Err(err) => {
                eprintln!("transfer failed: {err}");
                exit(-err.errno());
            }
        }
    }
}
