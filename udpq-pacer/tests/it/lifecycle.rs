use std::{
    io,
    net::SocketAddr,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use udpq_pacer::{ExplicitSocket, Manager, PacerError, Rejected, Transmit};
use udpq_sim::Recorder;

use crate::helpers::{addr, eventually};

const TIMEOUT: Duration = Duration::from_secs(5);

#[test]
fn drained_queues_are_reclaimed_and_recreated() {
    let _ = tracing_subscriber::fmt::try_init();

    let manager = Arc::new(Manager::new(4, Duration::from_millis(10), 64).unwrap());
    let recorder = Arc::new(Recorder::new());
    let dispatcher = manager.spawn_dispatcher(Arc::clone(&recorder)).unwrap();

    assert!(manager.enqueue(11, b"first", addr(7200)));
    assert!(recorder.wait_for(1, TIMEOUT));
    assert!(eventually(TIMEOUT, || manager.queue_count() == 0));
    assert_eq!(manager.stats().queues_removed(), 1);

    // With no queues left the dispatch thread parks instead of ticking.
    thread::sleep(Duration::from_millis(30));
    let ticks = manager.stats().ticks();
    thread::sleep(Duration::from_millis(100));
    assert_eq!(manager.stats().ticks(), ticks);

    let enqueued_at = Instant::now();
    assert!(manager.enqueue(11, b"second", addr(7200)));
    assert!(recorder.wait_for(2, TIMEOUT));
    assert!(recorder.transmissions()[1].at.duration_since(enqueued_at) < Duration::from_secs(1));
    assert_eq!(manager.stats().queues_created(), 2);

    manager.release();
    dispatcher.join().unwrap();
}

#[test]
fn release_stops_transmission_and_drops_packets() {
    let _ = tracing_subscriber::fmt::try_init();

    let manager = Arc::new(Manager::new(100, Duration::from_millis(10), 64).unwrap());
    let recorder = Arc::new(Recorder::new());

    for i in 0..50u8 {
        assert!(manager.enqueue(1, &[i], addr(7201)));
    }

    let dispatcher = manager.spawn_dispatcher(Arc::clone(&recorder)).unwrap();
    assert!(recorder.wait_for(1, TIMEOUT));

    manager.release();
    assert!(!manager.is_running());
    assert_eq!(manager.queue_count(), 0);

    let sent = recorder.len();
    assert!(sent < 50);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(recorder.len(), sent);

    assert_eq!(manager.try_enqueue(1, b"late", addr(7201)), Err(Rejected::Released));
    assert_eq!(manager.remaining_capacity(1), 0);
    dispatcher.join().unwrap();
}

#[test]
fn interval_beyond_the_clock_range_sends_one_tick_and_waits() {
    let _ = tracing_subscriber::fmt::try_init();

    let manager = Arc::new(Manager::new(4, Duration::MAX, 64).unwrap());
    let recorder = Arc::new(Recorder::new());

    assert!(manager.enqueue(1, b"first", addr(7207)));
    assert!(manager.enqueue(1, b"second", addr(7207)));

    let dispatcher = manager.spawn_dispatcher(Arc::clone(&recorder)).unwrap();
    assert!(recorder.wait_for(1, TIMEOUT));

    // The next tick is never due, so the loop keeps waiting instead of failing.
    thread::sleep(Duration::from_millis(50));
    assert_eq!(recorder.len(), 1);
    assert!(manager.is_running());
    assert!(!manager.is_released());
    assert!(manager.enqueue(2, b"third", addr(7208)));
    assert!(!dispatcher.is_finished());

    manager.release();
    dispatcher.join().unwrap();
    assert_eq!(recorder.len(), 1);
}

#[test]
fn release_wakes_a_parked_dispatcher() {
    let _ = tracing_subscriber::fmt::try_init();

    let manager = Arc::new(Manager::new(4, Duration::from_secs(60), 64).unwrap());
    let dispatcher = manager.spawn_dispatcher(Arc::new(Recorder::new())).unwrap();
    assert!(eventually(TIMEOUT, || manager.is_running()));

    let start = Instant::now();
    manager.release();
    dispatcher.join().unwrap();

    assert!(start.elapsed() < Duration::from_secs(5));
}

#[test]
fn second_dispatch_loop_is_refused() {
    let _ = tracing_subscriber::fmt::try_init();

    let manager = Arc::new(Manager::new(4, Duration::from_millis(10), 64).unwrap());
    let recorder = Arc::new(Recorder::new());
    let dispatcher = manager.spawn_dispatcher(Arc::clone(&recorder)).unwrap();
    assert!(eventually(TIMEOUT, || manager.is_running()));

    assert!(matches!(manager.run_dispatch_loop(&*recorder), Err(PacerError::AlreadyRunning)));

    manager.release();
    dispatcher.join().unwrap();

    assert!(matches!(manager.run_dispatch_loop(&*recorder), Err(PacerError::Released)));
}

/// Releases the manager from inside the dispatch loop on its first transmission.
struct ReleaseOnSend {
    manager: Mutex<Option<Arc<Manager>>>,
}

impl Transmit for ReleaseOnSend {
    type Handle = ExplicitSocket;

    fn transmit(
        &self,
        payload: &[u8],
        _destination: SocketAddr,
        _explicit: Option<&ExplicitSocket>,
    ) -> io::Result<usize> {
        let manager = self.manager.lock().take();
        if let Some(manager) = manager {
            manager.release();
        }

        Ok(payload.len())
    }
}

#[test]
fn release_from_the_dispatch_thread_does_not_deadlock() {
    let _ = tracing_subscriber::fmt::try_init();

    let manager = Arc::new(Manager::new(4, Duration::from_millis(10), 64).unwrap());
    let transport = ReleaseOnSend { manager: Mutex::new(Some(Arc::clone(&manager))) };

    assert!(manager.enqueue(1, b"a", addr(7202)));
    assert!(manager.enqueue(2, b"b", addr(7203)));

    let dispatcher = manager.spawn_dispatcher(transport).unwrap();
    dispatcher.join().unwrap();

    assert!(manager.is_released());
    assert!(!manager.is_running());
    assert_eq!(manager.queue_count(), 0);
    assert_eq!(manager.stats().packets_tx(), 1);
}

/// Panics on every packet for one destination and records the rest.
struct PanicsFor {
    poisoned: SocketAddr,
    inner: Recorder,
}

impl Transmit for PanicsFor {
    type Handle = ExplicitSocket;

    fn transmit(
        &self,
        payload: &[u8],
        destination: SocketAddr,
        explicit: Option<&ExplicitSocket>,
    ) -> io::Result<usize> {
        if destination == self.poisoned {
            panic!("transport failure for {destination}");
        }

        self.inner.transmit(payload, destination, explicit)
    }
}

#[test]
fn panicking_transport_does_not_starve_other_queues() {
    let _ = tracing_subscriber::fmt::try_init();

    let manager = Arc::new(Manager::new(4, Duration::from_millis(5), 64).unwrap());
    let transport = Arc::new(PanicsFor { poisoned: addr(7204), inner: Recorder::new() });

    for i in 0..3u8 {
        assert!(manager.enqueue(1, &[i], addr(7204)));
        assert!(manager.enqueue(2, &[i], addr(7205)));
    }

    let dispatcher = manager.spawn_dispatcher(Arc::clone(&transport)).unwrap();

    assert!(transport.inner.wait_for(3, TIMEOUT));
    assert!(eventually(TIMEOUT, || manager.stats().transmit_failures() == 3));
    assert!(transport.inner.sent_to(addr(7204)).is_empty());
    assert!(manager.is_running());

    manager.release();
    dispatcher.join().unwrap();
}
