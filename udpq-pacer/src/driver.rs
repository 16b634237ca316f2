use std::{
    panic::{self, AssertUnwindSafe},
    sync::atomic::{AtomicBool, Ordering},
    thread::{self, JoinHandle, ThreadId},
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, trace, warn};
use udpq_transport::Transmit;

use crate::{
    manager::Manager,
    queue::{PendingPacket, QueueRef},
    PacerError, QueueKey,
};

/// Tracks tick deadlines. Each deadline is derived from the previous one, not from the time
/// the tick finished, so per-tick processing cost doesn't accumulate as drift.
///
/// An interval too long to be added to an [`Instant`] leaves no next deadline: the next tick
/// is never due.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Schedule {
    interval: Duration,
    deadline: Option<Instant>,
}

impl Schedule {
    /// Creates a schedule whose first tick is due at `start`.
    pub(crate) const fn new(interval: Duration, start: Instant) -> Self {
        Self { interval, deadline: Some(start) }
    }

    /// Returns when the next tick is due, or `None` if it never is.
    #[inline]
    pub(crate) const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Moves to the next deadline. If that deadline has already passed, the schedule restarts
    /// from `now` instead of running missed ticks back to back. Returns `true` in that case.
    pub(crate) fn advance(&mut self, now: Instant) -> bool {
        self.deadline = self.deadline.and_then(|deadline| deadline.checked_add(self.interval));

        match self.deadline {
            Some(deadline) if deadline < now => {
                self.deadline = Some(now);
                true
            }
            _ => false,
        }
    }

    /// Restarts the schedule from `now`.
    pub(crate) fn rebase(&mut self, now: Instant) {
        self.deadline = Some(now);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Stopped,
    Running(ThreadId),
}

/// The state of the dispatch loop, and the condition variable the dispatch thread sleeps on.
///
/// The dispatch thread waits on `wakeup` between ticks and while there are no queues.
/// Producers signal it when they create a queue, [`Manager::release`] signals it to stop, and
/// the loop signals it on exit for anyone waiting in [`Lifecycle::wait_stopped`].
#[derive(Debug)]
pub(crate) struct Lifecycle {
    state: Mutex<LoopState>,
    wakeup: Condvar,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self { state: Mutex::new(LoopState::Stopped), wakeup: Condvar::new() }
    }

    /// Marks the loop as running on the current thread.
    fn enter(&self, released: &AtomicBool) -> Result<(), PacerError> {
        let mut state = self.state.lock();

        if released.load(Ordering::Acquire) {
            return Err(PacerError::Released);
        }

        if let LoopState::Running(_) = *state {
            return Err(PacerError::AlreadyRunning);
        }

        *state = LoopState::Running(thread::current().id());
        Ok(())
    }

    fn exit(&self) {
        *self.state.lock() = LoopState::Stopped;
        self.wakeup.notify_all();
    }

    pub(crate) fn is_running(&self) -> bool {
        matches!(*self.state.lock(), LoopState::Running(_))
    }

    /// Wakes the dispatch thread.
    pub(crate) fn notify(&self) {
        let _state = self.state.lock();
        self.wakeup.notify_all();
    }

    /// Blocks until the loop has stopped. Returns immediately when called from the dispatch
    /// thread itself.
    pub(crate) fn wait_stopped(&self) {
        let mut state = self.state.lock();

        while let LoopState::Running(id) = *state {
            if id == thread::current().id() {
                return;
            }

            self.wakeup.wait(&mut state);
        }
    }
}

/// Resets the loop state when the dispatch loop ends, however it ends. If the loop unwinds,
/// the manager is released so producers stop feeding queues nobody drains.
struct RunGuard<'a, H> {
    manager: &'a Manager<H>,
}

impl<H> Drop for RunGuard<'_, H> {
    fn drop(&mut self) {
        let panicked = thread::panicking();
        if panicked {
            error!("dispatch loop panicked, releasing manager");
            self.manager.released.store(true, Ordering::Release);
        }

        self.manager.lifecycle.exit();

        if panicked {
            self.manager.discard();
        }
    }
}

/// The dispatch loop. Once per tick it visits every live queue, sends at most one packet from
/// each and unlinks the queues it left empty.
pub(crate) struct Dispatcher<'a, H, T> {
    manager: &'a Manager<H>,
    transport: &'a T,
    schedule: Schedule,
    /// The queues visited in the current tick.
    batch: Vec<(QueueKey, QueueRef<H>)>,
    /// Queues found empty in the current tick.
    drained: Vec<QueueKey>,
}

impl<'a, H, T> Dispatcher<'a, H, T>
where
    T: Transmit<Handle = H>,
{
    pub(crate) fn new(manager: &'a Manager<H>, transport: &'a T) -> Self {
        Self {
            manager,
            transport,
            schedule: Schedule::new(manager.options.interval, Instant::now()),
            batch: Vec::new(),
            drained: Vec::new(),
        }
    }

    /// Runs the loop on the current thread until the manager is released.
    pub(crate) fn run(mut self) -> Result<(), PacerError> {
        self.manager.lifecycle.enter(&self.manager.released)?;
        let _guard = RunGuard { manager: self.manager };

        let _span = tracing::info_span!("dispatch").entered();
        info!(interval = ?self.manager.options.interval, "dispatch loop started");

        while self.wait_for_work() {
            self.tick();

            if self.schedule.advance(Instant::now()) {
                self.manager.stats.increment_overruns();
                debug!(queues = self.manager.table.len(), "tick overran its interval");
            }

            if !self.sleep_until_deadline() {
                break;
            }
        }

        info!(ticks = self.manager.stats.ticks(), "dispatch loop exiting");
        Ok(())
    }

    /// Parks the thread while there are no queues. Returns `false` once the manager is
    /// released.
    fn wait_for_work(&mut self) -> bool {
        let lifecycle = &self.manager.lifecycle;
        let mut state = lifecycle.state.lock();
        let mut parked = false;

        loop {
            if self.manager.is_released() {
                return false;
            }

            if !self.manager.table.is_empty() {
                break;
            }

            if !parked {
                trace!("no queues, parking dispatch thread");
                parked = true;
            }

            lifecycle.wakeup.wait(&mut state);
        }

        if parked {
            self.schedule.rebase(Instant::now());
        }

        true
    }

    /// Sleeps until the next tick is due. Returns `false` once the manager is released, which is
    /// also the only way out when there is no next deadline.
    fn sleep_until_deadline(&self) -> bool {
        let lifecycle = &self.manager.lifecycle;
        let deadline = self.schedule.deadline();
        let mut state = lifecycle.state.lock();

        loop {
            if self.manager.is_released() {
                return false;
            }

            match deadline {
                Some(deadline) if Instant::now() >= deadline => return true,
                Some(deadline) => {
                    lifecycle.wakeup.wait_until(&mut state, deadline);
                }
                None => lifecycle.wakeup.wait(&mut state),
            }
        }
    }

    /// Runs one tick.
    fn tick(&mut self) {
        self.manager.stats.increment_ticks();
        self.manager.table.snapshot_keys(&mut self.batch);

        for (key, queue) in &self.batch {
            if self.manager.is_released() {
                break;
            }

            let (packet, now_empty) = {
                let mut queue = queue.lock();
                let packet = queue.pop_front();
                (packet, queue.is_empty())
            };

            if let Some(packet) = packet {
                self.send(*key, packet);
            }

            if now_empty {
                self.drained.push(*key);
            }
        }

        self.batch.clear();

        for key in self.drained.drain(..) {
            if self.manager.table.remove_if_empty(key) {
                self.manager.stats.increment_queues_removed();
                trace!(key, "removed drained queue");
            }
        }
    }

    /// Hands one packet to the transport. Failures, including a panicking transport, only
    /// cost this packet.
    fn send(&self, key: QueueKey, packet: PendingPacket<H>) {
        let PendingPacket { payload, destination, explicit } = packet;

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.transport.transmit(&payload, destination, explicit.as_ref())
        }));

        match result {
            Ok(Ok(n)) => {
                self.manager.stats.increment_tx(n);
                trace!(key, %destination, bytes = n, "sent packet");
            }
            Ok(Err(e)) => {
                self.manager.stats.increment_transmit_failures();
                if self.manager.options.log_errors {
                    warn!(key, %destination, err = ?e, "failed to send packet");
                }
            }
            Err(_) => {
                self.manager.stats.increment_transmit_failures();
                error!(key, %destination, "transport panicked, packet dropped");
            }
        }
    }
}

/// A dispatch loop running on its own thread, as spawned by [`Manager::spawn_dispatcher`].
///
/// Dropping the handle detaches the thread. The loop still ends when the manager is released.
#[derive(Debug)]
pub struct DispatchThread {
    handle: JoinHandle<Result<(), PacerError>>,
}

impl DispatchThread {
    pub(crate) const fn new(handle: JoinHandle<Result<(), PacerError>>) -> Self {
        Self { handle }
    }

    /// Returns `true` once the loop has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the loop to exit and returns its result.
    pub fn join(self) -> Result<(), PacerError> {
        self.handle.join().map_err(|_| PacerError::DispatchPanicked)?
    }
}
