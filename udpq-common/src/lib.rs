//! Common types shared by the udpq crates.

mod pool;
pub use pool::{BufferPool, PacketBuffer};

#[allow(non_upper_case_globals)]
pub mod constants {
    pub const KiB: usize = 1024;

    /// The largest payload a single UDP datagram can carry over IPv4.
    pub const MAX_UDP_PAYLOAD: usize = 65_507;
}
