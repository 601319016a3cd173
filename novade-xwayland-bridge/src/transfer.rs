//! Pipe-based data transfers between the bridge and Wayland clients.
//!
//! Wayland moves selection data through file descriptors: the receiving side
//! creates a pipe, hands the write end to the source and reads until EOF.
//! Reading must not stall the dispatcher, so the read end is drained on a
//! short-lived thread and the result comes back through a [`TransferFuture`].
//! Helper threads never outlive their deadline: they poll the non-blocking
//! fd and close it once the transfer times out or is abandoned.
//! The dispatcher polls it with [`TransferFuture::try_take`]; async callers
//! can simply `.await` it.

use std::fs::File;
use std::future::Future;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use futures::channel::oneshot;
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tracing::{debug, warn};

/// The eventual contents of a pipe.
///
/// Resolves exactly once. A transfer whose producer went away (dropped
/// sender, failed read) resolves to empty bytes rather than an error.
#[derive(Debug)]
pub struct TransferFuture {
    rx: oneshot::Receiver<Vec<u8>>,
    taken: bool,
}

impl TransferFuture {
    /// A future fed by hand; used by in-process producers.
    pub fn channel() -> (oneshot::Sender<Vec<u8>>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx, taken: false })
    }

    /// An already resolved future.
    pub fn ready(bytes: Vec<u8>) -> Self {
        let (tx, future) = Self::channel();
        let _ = tx.send(bytes);
        future
    }

    /// Returns the bytes once, as soon as they are available.
    pub fn try_take(&mut self) -> Option<Vec<u8>> {
        if self.taken {
            return None;
        }
        let result = match self.rx.try_recv() {
            Ok(Some(bytes)) => Some(bytes),
            Ok(None) => None,
            Err(oneshot::Canceled) => Some(Vec::new()),
        };
        self.taken = result.is_some();
        result
    }

    pub fn is_taken(&self) -> bool {
        self.taken
    }
}

impl Future for TransferFuture {
    type Output = Vec<u8>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.taken {
            return Poll::Ready(Vec::new());
        }
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(result) => {
                self.taken = true;
                Poll::Ready(result.unwrap_or_default())
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// How long a transfer thread sleeps in `poll` before rechecking its
/// deadline and whether anyone still waits for it.
const POLL_SLICE: Duration = Duration::from_millis(50);

const READ_BUFFER: usize = 64 * 1024;

/// Creates a close-on-exec pipe: `(read end, write end)`.
pub fn pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    nix::unistd::pipe2(OFlag::O_CLOEXEC).map_err(io::Error::from)
}

fn set_nonblocking(fd: &OwnedFd) -> io::Result<()> {
    let flags = OFlag::from_bits_truncate(fcntl(fd.as_raw_fd(), FcntlArg::F_GETFL)?);
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

/// Blocks until `fd` is ready for `events`, the deadline passes or
/// `abandoned` reports that nobody waits for the transfer any more.
fn wait_ready(fd: BorrowedFd<'_>, events: PollFlags, deadline: Instant, abandoned: &dyn Fn() -> bool) -> io::Result<()> {
    loop {
        if abandoned() {
            return Err(io::Error::new(io::ErrorKind::ConnectionAborted, "transfer abandoned"));
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "transfer timed out"));
        }
        let slice = (deadline - now).min(POLL_SLICE);
        let millis = u16::try_from(slice.as_millis()).unwrap_or(u16::MAX);
        let mut fds = [PollFd::new(fd, events)];
        match poll(&mut fds, PollTimeout::from(millis)) {
            Ok(0) | Err(Errno::EINTR) => continue,
            // Readiness, hangup and errors all resolve on the next read or write.
            Ok(_) => return Ok(()),
            Err(e) => return Err(e.into()),
        }
    }
}

fn read_to_eof(file: &mut File, deadline: Instant, abandoned: &dyn Fn() -> bool) -> io::Result<Vec<u8>> {
    let mut bytes = Vec::new();
    let mut buf = vec![0u8; READ_BUFFER];
    loop {
        wait_ready(file.as_fd(), PollFlags::POLLIN, deadline, abandoned)?;
        match file.read(&mut buf) {
            Ok(0) => return Ok(bytes),
            Ok(n) => bytes.extend_from_slice(&buf[..n]),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {}
            Err(e) => return Err(e),
        }
    }
}

/// Drains `fd` to EOF on a background thread.
///
/// The read end is closed, and the future resolves to empty bytes, when
/// `timeout` passes without EOF. Dropping the future stops the thread the
/// same way.
pub fn spawn_pipe_reader(fd: OwnedFd, timeout: Duration) -> io::Result<TransferFuture> {
    set_nonblocking(&fd)?;
    let (tx, future) = TransferFuture::channel();
    let deadline = Instant::now() + timeout;
    thread::Builder::new().name("xwl-pipe-reader".into()).spawn(move || {
        let mut file = File::from(fd);
        let bytes = match read_to_eof(&mut file, deadline, &|| tx.is_canceled()) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::ConnectionAborted => {
                debug!("Transfer pipe reader abandoned");
                return;
            }
            Err(e) => {
                warn!(error = %e, "Reading transfer pipe failed");
                Vec::new()
            }
        };
        drop(file);
        debug!(bytes = bytes.len(), "Transfer pipe drained");
        let _ = tx.send(bytes);
    })?;
    Ok(future)
}

/// Opens a pipe and returns the write end for the producer together with
/// the future for what it writes.
pub fn receive_via_pipe(timeout: Duration) -> io::Result<(OwnedFd, TransferFuture)> {
    let (read, write) = pipe()?;
    let future = spawn_pipe_reader(read, timeout)?;
    Ok((write, future))
}

fn write_until_done(file: &mut File, bytes: &[u8], deadline: Instant) -> io::Result<()> {
    let mut written = 0;
    while written < bytes.len() {
        wait_ready(file.as_fd(), PollFlags::POLLOUT, deadline, &|| false)?;
        match file.write(&bytes[written..]) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => written += n,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Writes `bytes` into a client's fd off the event thread and closes it.
/// A reader that stops reading for `timeout` loses the rest of the data.
pub fn write_all_async(fd: OwnedFd, bytes: Vec<u8>, timeout: Duration) -> io::Result<JoinHandle<io::Result<()>>> {
    set_nonblocking(&fd)?;
    let deadline = Instant::now() + timeout;
    thread::Builder::new().name("xwl-pipe-writer".into()).spawn(move || {
        let mut file = File::from(fd);
        let result = write_until_done(&mut file, &bytes, deadline);
        if let Err(e) = &result {
            // EPIPE here just means the reader lost interest.
            debug!(error = %e, bytes = bytes.len(), "Writing transfer pipe failed");
        }
        result
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn wait(future: &mut TransferFuture) -> Vec<u8> {
        let deadline = Instant::now() + TIMEOUT;
        loop {
            if let Some(bytes) = future.try_take() {
                return bytes;
            }
            assert!(Instant::now() < deadline, "transfer did not complete");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_pipe_round_trip() {
        let (write, mut future) = receive_via_pipe(TIMEOUT).unwrap();
        let payload: Vec<u8> = (0..200_000u32).map(|i| i as u8).collect();
        write_all_async(write, payload.clone(), TIMEOUT).unwrap().join().unwrap().unwrap();
        assert_eq!(wait(&mut future), payload);
        assert_eq!(future.try_take(), None);
    }

    #[test]
    fn test_closed_write_end_yields_empty() {
        let (write, mut future) = receive_via_pipe(TIMEOUT).unwrap();
        drop(write);
        assert!(wait(&mut future).is_empty());
    }

    #[test]
    fn test_silent_writer_times_out_empty() {
        let (write, mut future) = receive_via_pipe(Duration::from_millis(100)).unwrap();
        let mut writer = File::from(write);
        writer.write_all(b"partial").unwrap();
        // The write end stays open; only the deadline ends the read.
        assert!(wait(&mut future).is_empty());
        drop(writer);
    }

    #[test]
    fn test_dropped_future_closes_read_end() {
        let (write, future) = receive_via_pipe(Duration::from_secs(60)).unwrap();
        let mut writer = File::from(write);
        drop(future);
        let deadline = Instant::now() + Duration::from_secs(2);
        let error = loop {
            if let Err(e) = writer.write_all(b"x") {
                break e;
            }
            assert!(Instant::now() < deadline, "reader thread still holds the pipe open");
            thread::sleep(Duration::from_millis(10));
        };
        assert_eq!(error.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_writer_gives_up_on_stalled_reader() {
        let (read, write) = pipe().unwrap();
        // Far more than a pipe buffer holds, and nobody reads.
        let payload = vec![0u8; 4 * 1024 * 1024];
        let result = write_all_async(write, payload, Duration::from_millis(100)).unwrap().join().unwrap();
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::TimedOut);
        drop(read);
    }

    #[test]
    fn test_dropped_sender_resolves_empty() {
        let (tx, mut future) = TransferFuture::channel();
        assert_eq!(future.try_take(), None);
        drop(tx);
        assert_eq!(future.try_take(), Some(Vec::new()));
        assert!(future.is_taken());
    }

    #[test]
    fn test_future_can_be_awaited() {
        let future = TransferFuture::ready(b"foo".to_vec());
        assert_eq!(futures::executor::block_on(future), b"foo");
    }
}
