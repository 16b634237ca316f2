use std::{
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket},
    sync::Arc,
};

use tracing::debug;

use crate::Transmit;

/// A caller-owned UDP socket attached to individual packets, overriding the default sockets
/// of [`UdpSockets`]. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct ExplicitSocket(Arc<UdpSocket>);

impl ExplicitSocket {
    /// Wraps a bound socket.
    pub fn new(socket: UdpSocket) -> Self {
        Self(Arc::new(socket))
    }

    /// Returns the underlying socket.
    #[inline]
    pub fn socket(&self) -> &UdpSocket {
        &self.0
    }

    /// Sends `buf` to `addr` from this socket.
    #[inline]
    pub fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        self.0.send_to(buf, addr)
    }
}

impl From<UdpSocket> for ExplicitSocket {
    fn from(socket: UdpSocket) -> Self {
        Self::new(socket)
    }
}

impl From<Arc<UdpSocket>> for ExplicitSocket {
    fn from(socket: Arc<UdpSocket>) -> Self {
        Self(socket)
    }
}

/// The default transport: one IPv4 socket and, if the host supports it, one IPv6 socket.
/// Packets are routed by the address family of their destination.
#[derive(Debug)]
pub struct UdpSockets {
    v4: UdpSocket,
    v6: Option<UdpSocket>,
}

impl UdpSockets {
    /// Binds an IPv4 socket and tries to bind an IPv6 socket, both on ephemeral ports.
    ///
    /// IPv4 is required. IPv6 is optional: if it can't be bound, packets to IPv6 destinations
    /// fail with [`io::ErrorKind::NotConnected`].
    pub fn bind() -> io::Result<Self> {
        let v4 = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;

        let v6 = match UdpSocket::bind((Ipv6Addr::UNSPECIFIED, 0)) {
            Ok(socket) => Some(socket),
            Err(e) => {
                debug!(err = ?e, "IPv6 socket unavailable, sending over IPv4 only");
                None
            }
        };

        Ok(Self { v4, v6 })
    }

    /// Creates the transport from already bound sockets.
    pub fn from_sockets(v4: UdpSocket, v6: Option<UdpSocket>) -> Self {
        Self { v4, v6 }
    }

    /// Returns `true` if an IPv6 socket is available.
    #[inline]
    pub fn has_v6(&self) -> bool {
        self.v6.is_some()
    }

    /// Returns the local address of the IPv4 socket.
    pub fn local_addr_v4(&self) -> io::Result<SocketAddr> {
        self.v4.local_addr()
    }

    /// Returns the local address of the IPv6 socket, if one is bound.
    pub fn local_addr_v6(&self) -> Option<io::Result<SocketAddr>> {
        self.v6.as_ref().map(UdpSocket::local_addr)
    }

    /// Sends `buf` to `addr` on the socket matching its address family.
    #[inline]
    pub fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        match (addr, &self.v6) {
            (SocketAddr::V4(addr), _) => self.v4.send_to(buf, addr),
            (SocketAddr::V6(addr), Some(v6)) => v6.send_to(buf, addr),
            (SocketAddr::V6(_), None) => {
                Err(io::Error::new(io::ErrorKind::NotConnected, "socket for IPv6 not bound"))
            }
        }
    }
}

impl Transmit for UdpSockets {
    type Handle = ExplicitSocket;

    #[inline]
    fn transmit(
        &self,
        payload: &[u8],
        destination: SocketAddr,
        explicit: Option<&ExplicitSocket>,
    ) -> io::Result<usize> {
        match explicit {
            Some(socket) => socket.send_to(payload, destination),
            None => self.send_to(payload, destination),
        }
    }
}
