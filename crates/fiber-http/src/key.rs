//! Endpoint key

use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};

/// Remote IPv4 address and port identifying one set of reusable
/// connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointKey {
    pub addr: Ipv4Addr,
    pub port: u16,
}

impl EndpointKey {
    #[inline]
    pub const fn new(addr: Ipv4Addr, port: u16) -> Self {
        Self { addr, port }
    }

    /// `sockaddr_in` for connect(2)
    pub fn to_sockaddr(&self) -> libc::sockaddr_in {
        libc::sockaddr_in {
            sin_family: libc::AF_INET as libc::sa_family_t,
            sin_port: self.port.to_be(),
            sin_addr: libc::in_addr {
                s_addr: u32::from(self.addr).to_be(),
            },
            sin_zero: [0; 8],
        }
    }
}

impl From<SocketAddrV4> for EndpointKey {
    fn from(sa: SocketAddrV4) -> Self {
        Self::new(*sa.ip(), sa.port())
    }
}

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}
