//! Per-context timer service.
//!
//! A single worker thread sleeps on a deadline heap and fires timer
//! callbacks with no engine lock held. Every arm operation stamps the
//! timer with a fresh generation; the callback receives the generation it
//! was armed with, and expiry handlers compare it against the timer under
//! the context lock. A fire that lost a race with `stop` or a re-arm sees
//! a stale generation and becomes a no-op.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::io;
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::RlcError;

type TimerFn = Box<dyn Fn(u64) + Send + Sync>;

pub(crate) struct TimerService {
    inner: Arc<ServiceInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct ServiceInner {
    state: Mutex<ServiceState>,
    cond: Condvar,
}

struct ServiceState {
    queue: BinaryHeap<Entry>,
    shutdown: bool,
}

struct Entry {
    deadline: Instant,
    timer: Weak<TimerShared>,
    generation: u64,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Earliest deadline at the top of the max-heap.
        other.deadline.cmp(&self.deadline)
    }
}

/// A restartable one-shot timer handle.
pub(crate) struct Timer {
    shared: Arc<TimerShared>,
    service: Arc<ServiceInner>,
}

struct TimerShared {
    state: Mutex<TimerState>,
    callback: TimerFn,
}

struct TimerState {
    generation: u64,
    armed: bool,
}

impl TimerService {
    pub fn new() -> io::Result<Self> {
        let inner = Arc::new(ServiceInner {
            state: Mutex::new(ServiceState {
                queue: BinaryHeap::new(),
                shutdown: false,
            }),
            cond: Condvar::new(),
        });

        let worker_inner = inner.clone();
        let worker = std::thread::Builder::new()
            .name("nr-rlc-timer".into())
            .spawn(move || worker_inner.run())?;

        Ok(Self {
            inner,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Create a timer whose expiry invokes `callback` with the generation
    /// the timer was armed with.
    pub fn timer(&self, callback: impl Fn(u64) + Send + Sync + 'static) -> Timer {
        Timer {
            shared: Arc::new(TimerShared {
                state: Mutex::new(TimerState {
                    generation: 0,
                    armed: false,
                }),
                callback: Box::new(callback),
            }),
            service: self.inner.clone(),
        }
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        self.inner.state.lock().shutdown = true;
        self.inner.cond.notify_all();
        if let Some(worker) = self.worker.lock().take() {
            // The last context reference may be dropped from inside a timer
            // callback, in which case this drop runs on the worker itself.
            if worker.thread().id() != std::thread::current().id() {
                let _ = worker.join();
            }
        }
    }
}

impl ServiceInner {
    fn run(&self) {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                break;
            }

            let now = Instant::now();
            match state.queue.peek() {
                None => {
                    self.cond.wait(&mut state);
                    continue;
                }
                Some(top) if top.deadline > now => {
                    let deadline = top.deadline;
                    let _ = self.cond.wait_until(&mut state, deadline);
                    continue;
                }
                Some(_) => {}
            }

            let entry = match state.queue.pop() {
                Some(entry) => entry,
                None => continue,
            };

            drop(state);
            if let Some(timer) = entry.timer.upgrade() {
                let fire = {
                    let mut ts = timer.state.lock();
                    if ts.armed && ts.generation == entry.generation {
                        ts.armed = false;
                        true
                    } else {
                        false
                    }
                };
                if fire {
                    (timer.callback)(entry.generation);
                }
            }
            state = self.state.lock();
        }
    }
}

impl Timer {
    fn schedule(&self, delay: Duration, generation: u64) {
        let mut state = self.service.state.lock();
        state.queue.push(Entry {
            deadline: Instant::now() + delay,
            timer: Arc::downgrade(&self.shared),
            generation,
        });
        self.service.cond.notify_all();
    }

    /// Arm the timer. Fails with [`RlcError::Busy`] if already armed.
    pub fn start(&self, delay: Duration) -> Result<u64, RlcError> {
        let generation = {
            let mut ts = self.shared.state.lock();
            if ts.armed {
                return Err(RlcError::Busy);
            }
            ts.generation += 1;
            ts.armed = true;
            ts.generation
        };
        self.schedule(delay, generation);
        Ok(generation)
    }

    /// Arm the timer, superseding any earlier arming.
    pub fn restart(&self, delay: Duration) -> u64 {
        let generation = {
            let mut ts = self.shared.state.lock();
            ts.generation += 1;
            ts.armed = true;
            ts.generation
        };
        self.schedule(delay, generation);
        generation
    }

    /// Disarm the timer. A fire already in flight sees a stale generation
    /// and does nothing.
    pub fn stop(&self) {
        let mut ts = self.shared.state.lock();
        ts.generation += 1;
        ts.armed = false;
    }

    pub fn is_active(&self) -> bool {
        self.shared.state.lock().armed
    }

    /// Current generation, for stale-fire checks in expiry handlers.
    pub fn generation(&self) -> u64 {
        self.shared.state.lock().generation
    }
}
