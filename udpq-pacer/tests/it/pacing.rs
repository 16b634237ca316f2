use std::{
    collections::HashSet,
    sync::Arc,
    time::{Duration, Instant},
};

use udpq_pacer::{Manager, PacerOptions};
use udpq_sim::{Failing, Jitter, Recorder, Stall};

use crate::helpers::{addr, eventually, gaps};

const TIMEOUT: Duration = Duration::from_secs(5);
const INTERVAL: Duration = Duration::from_millis(20);
/// Slack for timer granularity.
const TOLERANCE: Duration = Duration::from_millis(5);

fn send_times(recorder: &Recorder, port: u16) -> Vec<Instant> {
    recorder.sent_to(addr(port)).iter().map(|t| t.at).collect()
}

/// Deadlines are drift-corrected, so a single gap may come out a little short after a late
/// wakeup. The span has to cover every interval, and no gap may look like a burst.
fn assert_paced(times: &[Instant]) {
    let span = times[times.len() - 1].duration_since(times[0]);
    let intervals = INTERVAL * (times.len() as u32 - 1);
    assert!(span + TOLERANCE >= intervals, "{} packets sent within {span:?}", times.len());

    for gap in gaps(times) {
        assert!(gap >= INTERVAL / 2, "gap of {gap:?} is a burst");
    }
}

#[test]
fn one_packet_per_queue_per_interval() {
    let _ = tracing_subscriber::fmt::try_init();

    let manager = Arc::new(Manager::new(10, INTERVAL, 64).unwrap());
    let recorder = Arc::new(Recorder::new());

    for i in 0..5u8 {
        assert!(manager.enqueue(1, &[i], addr(7001)));
    }

    let dispatcher = manager.spawn_dispatcher(Arc::clone(&recorder)).unwrap();
    assert!(recorder.wait_for(5, TIMEOUT));

    assert_paced(&send_times(&recorder, 7001));

    manager.release();
    dispatcher.join().unwrap();
}

#[test]
fn every_queue_is_served_each_tick() {
    let _ = tracing_subscriber::fmt::try_init();

    let manager = Arc::new(Manager::new(10, INTERVAL, 64).unwrap());
    let recorder = Arc::new(Recorder::new());

    for key in 0..3u64 {
        for i in 0..3u8 {
            assert!(manager.enqueue(key, &[i], addr(7100 + key as u16)));
        }
    }

    let dispatcher = manager.spawn_dispatcher(Arc::clone(&recorder)).unwrap();
    assert!(recorder.wait_for(9, TIMEOUT));

    // Each tick sends exactly one packet from each of the three queues.
    let sent = recorder.transmissions();
    for tick in sent.chunks(3) {
        let destinations: HashSet<_> = tick.iter().map(|t| t.destination).collect();
        assert_eq!(destinations.len(), 3);
        assert!(tick.iter().all(|t| t.payload[0] == tick[0].payload[0]));
    }

    manager.release();
    dispatcher.join().unwrap();
}

#[test]
fn stalled_tick_is_not_followed_by_a_burst() {
    let _ = tracing_subscriber::fmt::try_init();

    let manager = Arc::new(Manager::new(10, INTERVAL, 64).unwrap());
    let transport = Arc::new(Stall::new(Recorder::new()));

    for i in 0..6u8 {
        assert!(manager.enqueue(1, &[i], addr(7002)));
    }

    transport.pause_next(INTERVAL * 5);
    let dispatcher = manager.spawn_dispatcher(Arc::clone(&transport)).unwrap();
    assert!(transport.inner().wait_for(6, TIMEOUT));

    assert!(manager.stats().overruns() >= 1);

    // The tick right after the stall runs immediately; the ones after it are paced again
    // instead of replaying the missed ticks.
    let times = send_times(transport.inner(), 7002);
    assert_paced(&times[1..]);

    manager.release();
    dispatcher.join().unwrap();
}

#[test]
fn failures_are_counted_and_skipped() {
    let _ = tracing_subscriber::fmt::try_init();

    let manager = Arc::new(
        Manager::with_options(
            PacerOptions::default().interval(Duration::from_millis(2)).log_errors(false),
        )
        .unwrap(),
    );
    let transport = Arc::new(Failing::new(Recorder::new(), 2));

    for i in 0..6u8 {
        assert!(manager.enqueue(1, &[i], addr(7003)));
    }

    let dispatcher = manager.spawn_dispatcher(Arc::clone(&transport)).unwrap();
    assert!(eventually(TIMEOUT, || transport.attempts() == 6));
    assert!(eventually(TIMEOUT, || manager.stats().transmit_failures() == 3));

    let payloads: Vec<u8> =
        transport.inner().transmissions().iter().map(|t| t.payload[0]).collect();
    assert_eq!(payloads, vec![0, 2, 4]);
    assert_eq!(manager.stats().packets_tx(), 3);
    assert_eq!(manager.stats().bytes_tx(), 3);

    manager.release();
    dispatcher.join().unwrap();
}

#[test]
fn jitter_delays_but_keeps_order() {
    let _ = tracing_subscriber::fmt::try_init();

    let manager = Arc::new(Manager::new(20, Duration::from_millis(5), 64).unwrap());
    let transport = Arc::new(Jitter::new(Recorder::new(), Duration::from_millis(3)));

    for i in 0..10u8 {
        assert!(manager.enqueue(1, &[i], addr(7004)));
    }

    let dispatcher = manager.spawn_dispatcher(Arc::clone(&transport)).unwrap();
    assert!(transport.inner().wait_for(10, TIMEOUT));

    let payloads: Vec<u8> =
        transport.inner().transmissions().iter().map(|t| t.payload[0]).collect();
    assert_eq!(payloads, (0..10).collect::<Vec<_>>());

    manager.release();
    dispatcher.join().unwrap();
}
