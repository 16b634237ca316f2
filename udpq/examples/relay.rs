//! Fans bursty frames out to a few local "peers" and prints when each one arrives.
//!
//! Producers push ten 20ms frames per peer at once; the pacer spreads them out again.

use std::{
    net::{Ipv4Addr, UdpSocket},
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use tracing::info;
use udpq::Manager;

const PEERS: u64 = 3;
const FRAMES: u8 = 10;

fn main() {
    let _ = tracing_subscriber::fmt::try_init();

    let manager = Arc::new(Manager::new(20, Duration::from_millis(20), 4096).unwrap());

    let dispatcher = {
        let manager = Arc::clone(&manager);
        thread::spawn(move || manager.process())
    };

    let start = Instant::now();
    let peers: Vec<_> = (0..PEERS)
        .map(|key| {
            let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
            socket.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

            // Every frame goes out in one burst.
            let peer = socket.local_addr().unwrap();
            for frame in 0..FRAMES {
                assert!(manager.enqueue(key, &[frame; 160], peer));
            }

            thread::spawn(move || {
                let mut buf = [0u8; 4096];
                while let Ok(n) = socket.recv(&mut buf) {
                    info!(peer = key, frame = buf[0], bytes = n, elapsed = ?start.elapsed(), "received");
                }
            })
        })
        .collect();

    for peer in peers {
        peer.join().unwrap();
    }

    info!(
        sent = manager.stats().packets_tx(),
        ticks = manager.stats().ticks(),
        "all peers idle, releasing"
    );

    manager.release();
    dispatcher.join().unwrap().unwrap();
}
