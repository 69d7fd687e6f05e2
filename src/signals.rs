//! Self-pipe signal handling
//!
//! Converts asynchronous signal delivery into synchronously readable data:
//! each handled signal writes its number as a newline-terminated decimal
//! string into the write end of a dedicated pipe, and the service's run loop
//! blocks reading lines from the read end. If the pipe buffer is full the
//! signal is dropped rather than risking a blocking write inside handler
//! context; liveness wins over lossless delivery.

use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::atomic::{AtomicI32, Ordering};

use nix::fcntl::{FcntlArg, OFlag, fcntl};
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use nix::unistd::{pipe, read};
use tokio::io::Interest;
use tokio::io::unix::AsyncFd;
use tracing::{debug, warn};

/// Signals the scheduler service reacts to.
pub const HANDLED_SIGNALS: [Signal; 3] = [Signal::SIGHUP, Signal::SIGTERM, Signal::SIGINT];

/// Write end of the live self-pipe; -1 while no service instance exists.
static SIGNAL_PIPE_WR: AtomicI32 = AtomicI32::new(-1);

extern "C" fn on_signal(signum: nix::libc::c_int) {
    let fd = SIGNAL_PIPE_WR.load(Ordering::Relaxed);
    if fd < 0 {
        return;
    }

    // Only stack formatting and a single write(2) below; both are
    // async-signal-safe. EAGAIN (pipe full) silently drops the signal.
    let mut buf = [0u8; 12];
    let mut pos = buf.len() - 1;
    buf[pos] = b'\n';
    let mut value = signum as u32;
    loop {
        pos -= 1;
        buf[pos] = b'0' + (value % 10) as u8;
        value /= 10;
        if value == 0 {
            break;
        }
    }

    unsafe {
        nix::libc::write(fd, buf[pos..].as_ptr().cast(), (buf.len() - pos) as _);
    }
}

/// Owns the self-pipe and the handler registrations for one scheduler
/// service instance. Dropping restores the default dispositions and closes
/// both pipe ends, so a hangup-triggered restart never leaks descriptors.
pub struct SignalPipe {
    reader: AsyncFd<OwnedFd>,
    _writer: OwnedFd,
    buf: Vec<u8>,
}

impl SignalPipe {
    pub fn new() -> anyhow::Result<Self> {
        let (read_end, write_end) = pipe()?;
        set_nonblocking(&read_end)?;
        set_nonblocking(&write_end)?;

        let previous = SIGNAL_PIPE_WR.swap(write_end.as_raw_fd(), Ordering::SeqCst);
        assert_eq!(
            previous, -1,
            "only one scheduler service may own the signal pipe at a time"
        );

        let action = SigAction::new(
            SigHandler::Handler(on_signal),
            SaFlags::SA_RESTART,
            SigSet::empty(),
        );
        for signal in HANDLED_SIGNALS {
            unsafe { sigaction(signal, &action) }?;
        }
        debug!("signal handlers registered, self-pipe open");

        Ok(Self {
            reader: AsyncFd::with_interest(read_end, Interest::READABLE)?,
            _writer: write_end,
            buf: Vec::new(),
        })
    }

    /// Block until a handled signal arrives; returns its number.
    pub async fn next_signal(&mut self) -> io::Result<i32> {
        loop {
            if let Some(signum) = self.take_line()? {
                return Ok(signum);
            }

            let mut guard = self.reader.readable().await?;
            let mut chunk = [0u8; 64];
            match guard.try_io(|fd| {
                read(fd.get_ref().as_raw_fd(), &mut chunk).map_err(io::Error::from)
            }) {
                Ok(Ok(0)) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "signal pipe closed",
                    ));
                }
                Ok(Ok(n)) => self.buf.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) => return Err(e),
                Err(_would_block) => continue,
            }
        }
    }

    fn take_line(&mut self) -> io::Result<Option<i32>> {
        let Some(pos) = self.buf.iter().position(|&b| b == b'\n') else {
            return Ok(None);
        };
        let line: Vec<u8> = self.buf.drain(..=pos).collect();
        let text = std::str::from_utf8(&line[..line.len() - 1])
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let signum = text
            .parse::<i32>()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(Some(signum))
    }
}

impl Drop for SignalPipe {
    fn drop(&mut self) {
        let action = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
        for signal in HANDLED_SIGNALS {
            if let Err(e) = unsafe { sigaction(signal, &action) } {
                warn!(%signal, error = %e, "failed to restore default signal disposition");
            }
        }
        SIGNAL_PIPE_WR.store(-1, Ordering::SeqCst);
        debug!("signal handlers restored, self-pipe closed");
    }
}

fn set_nonblocking(fd: &OwnedFd) -> nix::Result<()> {
    let flags = fcntl(fd.as_raw_fd(), FcntlArg::F_GETFL)?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFL(flags))?;
    Ok(())
}
