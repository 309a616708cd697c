//! Growable byte buffer with socket I/O
//!
//! The write cursor is the end of the data; the read cursor marks how much
//! of it has already been sent. A request buffer is filled by the caller and
//! drained to the socket with [`VmBuf::write_to`]; a response buffer is
//! filled from the socket with [`VmBuf::read_from`] and read by the caller.

use std::io;
use std::os::fd::RawFd;

/// Minimum free space before each read(2)
const MIN_READ_SPACE: usize = 4096;

/// Result of draining a socket into the buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
    /// Socket would block; the peer may still send more.
    Drained,
    /// Zero-length read: the peer closed its side.
    Closed,
}

/// Result of flushing the buffer to a socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flush {
    /// Everything up to the write cursor has been sent.
    Done,
    /// Socket would block with bytes still unsent.
    Pending,
}

#[derive(Debug, Default)]
pub struct VmBuf {
    data: Vec<u8>,
    rpos: usize,
}

impl VmBuf {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            rpos: 0,
        }
    }

    #[inline]
    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// All bytes written so far
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Bytes not yet sent
    #[inline]
    pub fn unread(&self) -> &[u8] {
        &self.data[self.rpos..]
    }

    /// Write cursor (length of the data)
    #[inline]
    pub fn wpos(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn rpos(&self) -> usize {
        self.rpos
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// Drop all data, keeping the allocation.
    pub fn reset(&mut self) {
        self.data.clear();
        self.rpos = 0;
    }

    /// Read from a non-blocking `fd` until it would block or reports EOF.
    pub fn read_from(&mut self, fd: RawFd) -> io::Result<Fill> {
        loop {
            if self.data.capacity() - self.data.len() < MIN_READ_SPACE {
                let grow = self.data.capacity().max(MIN_READ_SPACE);
                self.data.reserve(grow);
            }

            let spare = self.data.spare_capacity_mut();
            let n = unsafe { libc::read(fd, spare.as_mut_ptr() as *mut libc::c_void, spare.len()) };

            if n > 0 {
                // read(2) initialized exactly n bytes of the spare capacity
                unsafe { self.data.set_len(self.data.len() + n as usize) };
                continue;
            }
            if n == 0 {
                return Ok(Fill::Closed);
            }

            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::WouldBlock => return Ok(Fill::Drained),
                io::ErrorKind::Interrupted => continue,
                _ => return Err(err),
            }
        }
    }

    /// Send unsent bytes to a non-blocking socket `fd`.
    ///
    /// Uses `MSG_NOSIGNAL`: a reset peer is an `EPIPE` error, not a signal.
    pub fn write_to(&mut self, fd: RawFd) -> io::Result<Flush> {
        while self.rpos < self.data.len() {
            let pending = &self.data[self.rpos..];
            let n = unsafe {
                libc::send(
                    fd,
                    pending.as_ptr() as *const libc::c_void,
                    pending.len(),
                    libc::MSG_NOSIGNAL,
                )
            };

            if n > 0 {
                self.rpos += n as usize;
                continue;
            }
            if n == 0 {
                return Ok(Flush::Pending);
            }

            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::WouldBlock => return Ok(Flush::Pending),
                io::ErrorKind::Interrupted => continue,
                _ => return Err(err),
            }
        }
        Ok(Flush::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;

    fn pair() -> (UnixStream, UnixStream) {
        let (a, b) = UnixStream::pair().unwrap();
        a.set_nonblocking(true).unwrap();
        (a, b)
    }

    #[test]
    fn test_read_drained_then_closed() {
        let (local, mut peer) = pair();
        let mut buf = VmBuf::with_capacity(8);

        assert_eq!(buf.read_from(local.as_raw_fd()).unwrap(), Fill::Drained);
        assert!(buf.is_empty());

        peer.write_all(b"hello ").unwrap();
        assert_eq!(buf.read_from(local.as_raw_fd()).unwrap(), Fill::Drained);
        peer.write_all(b"world").unwrap();
        drop(peer);
        assert_eq!(buf.read_from(local.as_raw_fd()).unwrap(), Fill::Closed);
        assert_eq!(buf.data(), b"hello world");
        assert_eq!(buf.wpos(), 11);
    }

    #[test]
    fn test_read_grows_past_capacity() {
        let (local, mut peer) = pair();
        let payload = vec![7u8; 3 * MIN_READ_SPACE + 5];
        peer.write_all(&payload).unwrap();
        drop(peer);

        let mut buf = VmBuf::with_capacity(16);
        assert_eq!(buf.read_from(local.as_raw_fd()).unwrap(), Fill::Closed);
        assert_eq!(buf.data(), &payload[..]);
    }

    #[test]
    fn test_write_all_then_done() {
        let (local, mut peer) = pair();
        let mut buf = VmBuf::with_capacity(64);
        buf.append(b"GET / HTTP/1.1\r\n\r\n");

        assert_eq!(buf.write_to(local.as_raw_fd()).unwrap(), Flush::Done);
        assert!(buf.unread().is_empty());
        assert_eq!(buf.rpos(), buf.wpos());

        let mut got = [0u8; 18];
        peer.read_exact(&mut got).unwrap();
        assert_eq!(&got, b"GET / HTTP/1.1\r\n\r\n");
    }

    #[test]
    fn test_write_pending_when_peer_full() {
        let (local, peer) = pair();
        let mut buf = VmBuf::with_capacity(0);
        buf.append(&vec![0u8; 8 * 1024 * 1024]);

        assert_eq!(buf.write_to(local.as_raw_fd()).unwrap(), Flush::Pending);
        assert!(buf.rpos() > 0);
        assert!(!buf.unread().is_empty());
        drop(peer);
    }

    #[test]
    fn test_write_to_closed_peer_is_error() {
        let (local, peer) = pair();
        drop(peer);
        let mut buf = VmBuf::default();
        buf.append(b"x");
        let err = buf.write_to(local.as_raw_fd()).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EPIPE));
    }
}
