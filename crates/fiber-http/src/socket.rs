//! Non-blocking client sockets

use crate::error::{HttpError, HttpResult};
use crate::key::EndpointKey;

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use tracing::trace;

/// Open a non-blocking TCP socket to `key` and start connecting.
///
/// A failing connect(2) is not an error here: the connection error
/// surfaces as an I/O error on the first write or read.
pub fn dial(key: &EndpointKey) -> HttpResult<OwnedFd> {
    let raw = unsafe {
        libc::socket(
            libc::AF_INET,
            libc::SOCK_STREAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            0,
        )
    };
    if raw < 0 {
        return Err(HttpError::Socket(io::Error::last_os_error()));
    }
    let sock = unsafe { OwnedFd::from_raw_fd(raw) };
    let fd = sock.as_raw_fd();

    set_flag(fd, libc::SOL_SOCKET, libc::SO_REUSEADDR, "SO_REUSEADDR")?;
    set_flag(fd, libc::IPPROTO_TCP, libc::TCP_NODELAY, "TCP_NODELAY")?;

    let addr = key.to_sockaddr();
    let ret = unsafe {
        libc::connect(
            fd,
            &addr as *const libc::sockaddr_in as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EINPROGRESS) {
            trace!(fd, endpoint = %key, error = %err, "connect failed");
        }
    }

    Ok(sock)
}

/// Close a descriptor owned by the pool.
pub fn close(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}

fn set_flag(fd: RawFd, level: libc::c_int, name: libc::c_int, option: &'static str) -> HttpResult<()> {
    let on: libc::c_int = 1;
    let ret = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            &on as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(HttpError::SocketOption {
            option,
            source: io::Error::last_os_error(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, TcpListener};

    #[test]
    fn test_dial_connects_to_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let sock = dial(&EndpointKey::new(Ipv4Addr::LOCALHOST, port)).unwrap();
        let (_peer, _) = listener.accept().unwrap();

        let flags = unsafe { libc::fcntl(sock.as_raw_fd(), libc::F_GETFL) };
        assert!(flags & libc::O_NONBLOCK != 0);
    }

    #[test]
    fn test_dial_to_closed_port_still_returns_socket() {
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        assert!(dial(&EndpointKey::new(Ipv4Addr::LOCALHOST, port)).is_ok());
    }
}
