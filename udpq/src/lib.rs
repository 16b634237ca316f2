//! Paced UDP fan-out: per-destination queues drained one packet per interval.

#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

pub use udpq_common::{constants, BufferPool, PacketBuffer};
pub use udpq_pacer::*;
pub use udpq_transport::*;
