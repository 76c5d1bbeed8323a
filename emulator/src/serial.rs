//! Serial links for the emulated board: a PTY that host tooling can open
//! like a real serial port, or plain stdio for piping.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::os::unix::io::RawFd;
use std::path::PathBuf;
use std::sync::mpsc;

use capstan::Transport;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum SerialError {
    #[error("pty setup failed: {0}")]
    Pty(#[from] nix::Error),
}

pub enum Link {
    Pty(PtyLink),
    Stdio(StdioLink),
}

impl Transport for Link {
    fn available(&mut self) -> bool {
        match self {
            Link::Pty(l) => l.available(),
            Link::Stdio(l) => l.available(),
        }
    }

    fn read(&mut self) -> u8 {
        match self {
            Link::Pty(l) => l.read(),
            Link::Stdio(l) => l.read(),
        }
    }

    fn write(&mut self, buf: &[u8]) -> usize {
        match self {
            Link::Pty(l) => l.write(buf),
            Link::Stdio(l) => l.write(buf),
        }
    }

    fn connected(&mut self) -> bool {
        match self {
            Link::Pty(l) => l.connected(),
            Link::Stdio(l) => l.connected(),
        }
    }
}

/// Pseudo-terminal link. The emulator owns both ends; the slave path is
/// advertised for host tooling to open.
pub struct PtyLink {
    master: RawFd,
    slave: RawFd,
    buf: VecDeque<u8>,
}

impl PtyLink {
    pub fn open() -> Result<(Self, PathBuf), SerialError> {
        use nix::fcntl::{fcntl, FcntlArg, OFlag};

        let termios: nix::sys::termios::Termios = unsafe { std::mem::zeroed() };
        let ptys = nix::pty::openpty(None, &Some(termios))?;
        fcntl(ptys.master, FcntlArg::F_SETFL(OFlag::O_NONBLOCK))?;
        let path = nix::unistd::ttyname(ptys.slave)?;
        Ok((
            PtyLink {
                master: ptys.master,
                slave: ptys.slave,
                buf: VecDeque::new(),
            },
            path,
        ))
    }

    fn fill(&mut self) {
        let mut chunk = [0u8; 256];
        loop {
            match nix::unistd::read(self.master, &mut chunk) {
                Ok(0) => break,
                Ok(n) => self.buf.extend(&chunk[..n]),
                Err(nix::errno::Errno::EWOULDBLOCK) => break,
                Err(e) => {
                    warn!("pty read failed: {e}");
                    break;
                }
            }
        }
    }

    fn available(&mut self) -> bool {
        if self.buf.is_empty() {
            self.fill();
        }
        !self.buf.is_empty()
    }

    fn read(&mut self) -> u8 {
        self.buf.pop_front().unwrap_or(0)
    }

    fn write(&mut self, buf: &[u8]) -> usize {
        let mut written = 0;
        while written < buf.len() {
            match nix::unistd::write(self.master, &buf[written..]) {
                Ok(n) => written += n,
                Err(nix::errno::Errno::EWOULDBLOCK) => std::thread::yield_now(),
                Err(e) => {
                    warn!("pty write failed: {e}");
                    break;
                }
            }
        }
        written
    }

    fn connected(&mut self) -> bool {
        true
    }
}

impl Drop for PtyLink {
    fn drop(&mut self) {
        let _ = nix::unistd::close(self.master);
        let _ = nix::unistd::close(self.slave);
    }
}

/// Stdin/stdout link, the shape the original firmware used for piped
/// sessions. A helper thread turns blocking stdin into a polled queue.
pub struct StdioLink {
    inbound: mpsc::Receiver<Vec<u8>>,
    buf: VecDeque<u8>,
    eof: bool,
}

impl StdioLink {
    pub fn open() -> Self {
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let mut stdin = io::stdin().lock();
            let mut chunk = [0u8; 256];
            loop {
                match stdin.read(&mut chunk) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if tx.send(chunk[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                }
            }
        });
        StdioLink {
            inbound: rx,
            buf: VecDeque::new(),
            eof: false,
        }
    }

    fn pump(&mut self) {
        loop {
            match self.inbound.try_recv() {
                Ok(chunk) => self.buf.extend(chunk),
                Err(mpsc::TryRecvError::Empty) => break,
                Err(mpsc::TryRecvError::Disconnected) => {
                    self.eof = true;
                    break;
                }
            }
        }
    }

    fn available(&mut self) -> bool {
        self.pump();
        !self.buf.is_empty()
    }

    fn read(&mut self) -> u8 {
        self.buf.pop_front().unwrap_or(0)
    }

    fn write(&mut self, buf: &[u8]) -> usize {
        let mut stdout = io::stdout().lock();
        match stdout.write_all(buf).and_then(|_| stdout.flush()) {
            Ok(_) => buf.len(),
            Err(e) => {
                warn!("stdout write failed: {e}");
                0
            }
        }
    }

    fn connected(&mut self) -> bool {
        self.pump();
        !self.eof || !self.buf.is_empty()
    }
}
