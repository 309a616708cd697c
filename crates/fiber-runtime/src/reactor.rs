//! # Reactor - the epoll readiness poller
//!
//! A thin wrapper over one epoll instance. Registration is always
//! edge-triggered; the scheduler copies each batch of events out before
//! dispatching, so no borrow of the reactor is held while a fiber runs.
//!
//! The `u64` payload of every registration is the descriptor itself, which
//! the scheduler maps back to the fiber currently servicing it.

use std::io;
use std::ops::BitOr;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

/// Readiness interest for a registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest(u32);

impl Interest {
    pub const READABLE: Interest = Interest(libc::EPOLLIN as u32 | libc::EPOLLRDHUP as u32);
    /// Both directions, as used for client sockets
    pub const BOTH: Interest = Interest(Self::READABLE.0 | libc::EPOLLOUT as u32);

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Interest) -> Interest {
        Interest(self.0 | rhs.0)
    }
}

/// One readiness event: descriptor plus raw epoll mask
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub fd: RawFd,
    pub mask: u32,
}

impl Event {
    /// Delivered when a fiber runs for a reason other than readiness
    pub const NONE: Event = Event { fd: -1, mask: 0 };

    #[inline]
    pub fn is_none(&self) -> bool {
        self.mask == 0
    }

    #[inline]
    pub fn is_readable(&self) -> bool {
        self.mask & libc::EPOLLIN as u32 != 0
    }

    #[inline]
    pub fn is_writable(&self) -> bool {
        self.mask & libc::EPOLLOUT as u32 != 0
    }

    /// Hangup, peer half-close or error
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.mask & (libc::EPOLLHUP | libc::EPOLLRDHUP | libc::EPOLLERR) as u32 != 0
    }

    /// Exactly "became writable" and nothing else.
    ///
    /// On an idle, connected socket this is benign; anything else means
    /// the peer sent data nobody asked for, closed, or reset.
    #[inline]
    pub fn is_write_only(&self) -> bool {
        self.mask == libc::EPOLLOUT as u32
    }
}

/// epoll instance plus its event buffer
pub struct Reactor {
    epfd: OwnedFd,
    events: Vec<libc::epoll_event>,
}

impl Reactor {
    /// Create an epoll instance returning at most `capacity` events per wait.
    pub fn new(capacity: usize) -> io::Result<Self> {
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        let epfd = unsafe { OwnedFd::from_raw_fd(fd) };
        let capacity = capacity.max(1);
        Ok(Self {
            epfd,
            events: vec![libc::epoll_event { events: 0, u64: 0 }; capacity],
        })
    }

    /// Register `fd` edge-triggered for `interest`.
    pub fn register(&self, fd: RawFd, interest: Interest) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, interest)
    }

    pub fn deregister(&self, fd: RawFd) -> io::Result<()> {
        let ret = unsafe {
            libc::epoll_ctl(self.epfd.as_raw_fd(), libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut())
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Wait for readiness and append the events to `out`.
    ///
    /// `None` blocks indefinitely. An interrupted wait returns zero events.
    pub fn poll(&mut self, timeout: Option<Duration>, out: &mut Vec<Event>) -> io::Result<usize> {
        let timeout_ms = match timeout {
            None => -1,
            Some(d) => i32::try_from(d.as_millis()).unwrap_or(i32::MAX),
        };

        let n = unsafe {
            libc::epoll_wait(
                self.epfd.as_raw_fd(),
                self.events.as_mut_ptr(),
                self.events.len() as i32,
                timeout_ms,
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(err);
        }

        let n = n as usize;
        out.extend(self.events[..n].iter().map(|ev| Event {
            fd: ev.u64 as RawFd,
            mask: ev.events,
        }));
        Ok(n)
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, interest: Interest) -> io::Result<()> {
        let mut ev = libc::epoll_event {
            events: interest.bits() | libc::EPOLLET as u32,
            u64: fd as u64,
        };
        let ret = unsafe { libc::epoll_ctl(self.epfd.as_raw_fd(), op, fd, &mut ev) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl AsRawFd for Reactor {
    fn as_raw_fd(&self) -> RawFd {
        self.epfd.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_write_only_mask() {
        let ev = Event { fd: 3, mask: libc::EPOLLOUT as u32 };
        assert!(ev.is_write_only());
        assert!(!ev.is_closed());

        let ev = Event { fd: 3, mask: (libc::EPOLLOUT | libc::EPOLLIN) as u32 };
        assert!(!ev.is_write_only());
        assert!(ev.is_readable());

        assert!(Event::NONE.is_none());
        assert!(!Event::NONE.is_write_only());
    }

    #[test]
    fn test_poll_reports_readable() {
        let (mut a, b) = UnixStream::pair().unwrap();
        b.set_nonblocking(true).unwrap();

        let mut reactor = Reactor::new(8).unwrap();
        reactor.register(b.as_raw_fd(), Interest::READABLE).unwrap();

        let mut out = Vec::new();
        reactor.poll(Some(Duration::ZERO), &mut out).unwrap();
        assert!(out.is_empty());

        a.write_all(b"x").unwrap();
        reactor.poll(Some(Duration::from_secs(1)), &mut out).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].fd, b.as_raw_fd());
        assert!(out[0].is_readable());
    }

    #[test]
    fn test_edge_triggered_reports_once() {
        let (mut a, b) = UnixStream::pair().unwrap();
        let mut reactor = Reactor::new(8).unwrap();
        reactor.register(b.as_raw_fd(), Interest::READABLE).unwrap();

        a.write_all(b"x").unwrap();
        let mut out = Vec::new();
        reactor.poll(Some(Duration::from_secs(1)), &mut out).unwrap();
        assert_eq!(out.len(), 1);

        // Nothing drained, no new edge
        out.clear();
        reactor.poll(Some(Duration::ZERO), &mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_deregister_stops_events() {
        let (mut a, b) = UnixStream::pair().unwrap();
        let mut reactor = Reactor::new(8).unwrap();
        reactor.register(b.as_raw_fd(), Interest::READABLE).unwrap();
        reactor.deregister(b.as_raw_fd()).unwrap();

        a.write_all(b"x").unwrap();
        let mut out = Vec::new();
        reactor.poll(Some(Duration::from_millis(50)), &mut out).unwrap();
        assert!(out.is_empty());
        assert!(reactor.deregister(b.as_raw_fd()).is_err());
    }

    #[test]
    fn test_peer_close_is_closed_event() {
        let (a, b) = UnixStream::pair().unwrap();
        let mut reactor = Reactor::new(8).unwrap();
        reactor.register(b.as_raw_fd(), Interest::BOTH).unwrap();

        // Initial writable edge
        let mut out = Vec::new();
        reactor.poll(Some(Duration::from_secs(1)), &mut out).unwrap();
        assert!(out[0].is_write_only());

        drop(a);
        out.clear();
        reactor.poll(Some(Duration::from_secs(1)), &mut out).unwrap();
        assert_eq!(out.len(), 1);
        assert!(out[0].is_closed());
        assert!(!out[0].is_write_only());
    }
}
