//! Transports for exercising the pacer without a network.
//!
//! [`Recorder`] captures every datagram with the instant it was handed over. The wrappers in
//! this crate inject faults in front of any other [`Transmit`](udpq_transport::Transmit)
//! implementation:
//!
//! - [`Stall`] blocks the next transmission for a given duration.
//! - [`Jitter`] delays every transmission by a random amount.
//! - [`Failing`] fails every n-th transmission.

mod faults;
pub use faults::{Failing, Jitter, Stall};

mod recorder;
pub use recorder::{Recorder, Transmission};
