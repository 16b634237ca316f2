//! The transmit boundary of the pacer.
//!
//! The pacer never touches sockets itself: once per tick it hands the next packet of every
//! ready queue to a [`Transmit`] implementation. [`UdpSockets`] is the default one, sending
//! from an IPv4 socket and an optional IPv6 socket, or from an [`ExplicitSocket`] attached to
//! the packet.

use std::{io, net::SocketAddr, sync::Arc};

mod udp;
pub use udp::{ExplicitSocket, UdpSockets};

/// A hook that sends one fully-formed datagram.
///
/// Implementations are called from the dispatch thread only, once per packet. An error is
/// isolated to that packet: the pacer counts it and moves on to the next queue.
pub trait Transmit: Send + Sync {
    /// The explicit transport handle a packet can carry to override the default route.
    type Handle: Send + Sync;

    /// Sends `payload` to `destination`, using `explicit` instead of the default transport
    /// when present. Returns the number of bytes sent.
    fn transmit(
        &self,
        payload: &[u8],
        destination: SocketAddr,
        explicit: Option<&Self::Handle>,
    ) -> io::Result<usize>;
}

impl<T: Transmit + ?Sized> Transmit for &T {
    type Handle = T::Handle;

    #[inline]
    fn transmit(
        &self,
        payload: &[u8],
        destination: SocketAddr,
        explicit: Option<&Self::Handle>,
    ) -> io::Result<usize> {
        (**self).transmit(payload, destination, explicit)
    }
}

impl<T: Transmit + ?Sized> Transmit for Arc<T> {
    type Handle = T::Handle;

    #[inline]
    fn transmit(
        &self,
        payload: &[u8],
        destination: SocketAddr,
        explicit: Option<&Self::Handle>,
    ) -> io::Result<usize> {
        (**self).transmit(payload, destination, explicit)
    }
}
