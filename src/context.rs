use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use crate::buf::FragBuf;
use crate::error::RlcError;
use crate::sched::{Action, Sched};
use crate::sdu::{SduHandle, SduStore, TxOutcome, TxSdu};
use crate::timer::{Timer, TimerService};
use crate::window::{Sn, SnWindow};
use crate::{RlcBackend, RlcConfig, RlcMode};

/// One RLC bearer.
///
/// A context is safe to drive from any number of threads: upper-layer
/// threads call [`send`], the lower layer calls [`tx_avail`] and
/// [`rx_submit`], and timer expiries arrive on the context's timer thread.
/// All mutable state lives behind a single lock; user callbacks are queued
/// while it is held and invoked only after it is released.
///
/// [`send`]: RlcContext::send
/// [`tx_avail`]: RlcContext::tx_avail
/// [`rx_submit`]: RlcContext::rx_submit
pub struct RlcContext {
    shared: Arc<Shared>,
}

pub(crate) struct Shared {
    pub(crate) mode: RlcMode,
    pub(crate) config: RlcConfig,
    pub(crate) backend: Arc<dyn RlcBackend>,
    pub(crate) inner: Mutex<Inner>,
    pub(crate) sched: Sched,
    pub(crate) t_reassembly: Option<Timer>,
    pub(crate) t_poll_retransmit: Option<Timer>,
    pub(crate) t_status_prohibit: Option<Timer>,
    _timers: TimerService,
}

pub(crate) struct TxState {
    pub next_sn: Sn,
    pub win: SnWindow,
    pub pdu_without_poll: u32,
    pub byte_without_poll: usize,
}

pub(crate) struct RxState {
    pub win: SnWindow,
    /// One past the highest SN seen so far.
    pub next_highest: Sn,
    /// Highest status anchor: SDUs below it have been resolved or
    /// reported missing.
    pub highest_ack: Sn,
    /// Reassembly target set when the timer was started.
    pub next_status_trigger: Sn,
}

pub(crate) struct Inner {
    pub tx: TxState,
    pub rx: RxState,
    pub poll_sn: Sn,
    pub force_poll: bool,
    pub gen_status: bool,
    pub store: SduStore,
}

impl Inner {
    fn new(config: &RlcConfig) -> Self {
        let modulus = config.sn_width.modulus();
        let width = config.window_size as u64;
        Self {
            tx: TxState {
                next_sn: Sn(0),
                win: SnWindow::new(Sn(0), width, modulus),
                pdu_without_poll: 0,
                byte_without_poll: 0,
            },
            rx: RxState {
                win: SnWindow::new(Sn(0), width, modulus),
                next_highest: Sn(0),
                highest_ack: Sn(0),
                next_status_trigger: Sn(0),
            },
            poll_sn: Sn(0),
            force_poll: false,
            gen_status: false,
            store: SduStore::new(),
        }
    }
}

impl RlcContext {
    pub fn new(
        mode: RlcMode,
        config: RlcConfig,
        backend: Arc<dyn RlcBackend>,
    ) -> Result<Self, RlcError> {
        if config.window_size == 0 || config.window_size as u64 > config.sn_width.modulus() / 2 {
            return Err(RlcError::InvalidArgument);
        }

        let timers = TimerService::new().map_err(|_| RlcError::Unsupported)?;

        let shared = Arc::new_cyclic(|weak: &Weak<Shared>| {
            let t_reassembly = (mode != RlcMode::Tm).then(|| {
                let weak = weak.clone();
                timers.timer(move |generation| {
                    if let Some(shared) = weak.upgrade() {
                        shared.on_reassembly_expired(generation);
                    }
                })
            });
            let t_poll_retransmit = (mode == RlcMode::Am).then(|| {
                let weak = weak.clone();
                timers.timer(move |generation| {
                    if let Some(shared) = weak.upgrade() {
                        shared.on_poll_retransmit_expired(generation);
                    }
                })
            });
            let t_status_prohibit = (mode == RlcMode::Am).then(|| {
                let weak = weak.clone();
                timers.timer(move |generation| {
                    if let Some(shared) = weak.upgrade() {
                        shared.on_status_prohibit_expired(generation);
                    }
                })
            });

            Shared {
                mode,
                inner: Mutex::new(Inner::new(&config)),
                config,
                backend,
                sched: Sched::default(),
                t_reassembly,
                t_poll_retransmit,
                t_status_prohibit,
                _timers: timers,
            }
        });

        Ok(Self { shared })
    }

    pub fn mode(&self) -> RlcMode {
        self.shared.mode
    }

    pub fn config(&self) -> &RlcConfig {
        &self.shared.config
    }

    /// Queue an SDU for transmission.
    ///
    /// Fails with [`RlcError::WindowFull`] when the TX window has no room;
    /// the caller retries after TX progress. The returned handle resolves
    /// when the SDU reaches a terminal state.
    pub fn send(&self, buf: FragBuf) -> Result<SduHandle, RlcError> {
        if buf.is_empty() || buf.len() > u16::MAX as usize {
            return Err(RlcError::InvalidArgument);
        }

        let handle = {
            let mut inner = self.shared.inner.lock();
            if !inner.tx.win.contains(inner.tx.next_sn) {
                return Err(RlcError::WindowFull);
            }
            let sn = inner.tx.next_sn;
            inner.tx.next_sn = sn.next();

            let sdu = TxSdu::new(sn, buf);
            debug!("TX; Queueing SDU {}, range: 0..{}", sn, sdu.len());
            let handle = SduHandle {
                sn,
                completion: sdu.completion.clone(),
            };
            inner.store.tx.insert(sn, sdu);
            handle
        };

        self.shared.sched.put(Action::TxRequest);
        self.shared.sched.drain(&*self.shared.backend);
        Ok(handle)
    }

    /// Grant `budget` bytes of transmission capacity. A pending status PDU
    /// is served first, then data PDUs. Returns the bytes used.
    pub fn tx_avail(&self, budget: usize) -> usize {
        let used = {
            let mut inner = self.shared.inner.lock();
            debug!("TX opportunity: {budget}B");
            let mut remaining = budget;
            remaining -= self.shared.arq_tx_yield(&mut inner, remaining);
            if remaining > 0 {
                remaining -= self.shared.tx_yield(&mut inner, remaining);
            }
            budget - remaining
        };
        self.shared.sched.drain(&*self.shared.backend);
        used
    }

    /// Hand a received PDU to the engine. Malformed PDUs are logged and
    /// dropped; they never surface to the upper layer.
    pub fn rx_submit(&self, buf: FragBuf) {
        {
            let mut inner = self.shared.inner.lock();
            self.shared.rx_process(&mut inner, buf);
            // The lower layer may want to grant capacity for a status PDU.
            self.shared.sched.put(Action::TxRequest);
        }
        self.shared.sched.drain(&*self.shared.backend);
    }

    /// Drop all SDUs and restore the initial protocol state, keeping the
    /// configuration and backend. Pending [`SduHandle`] waiters are
    /// released with the failed outcome.
    pub fn reset(&self) {
        {
            let mut inner = self.shared.inner.lock();
            for sdu in inner.store.tx.values() {
                sdu.completion.signal(TxOutcome::Failed);
            }
            *inner = Inner::new(&self.shared.config);
            for timer in [
                &self.shared.t_reassembly,
                &self.shared.t_poll_retransmit,
                &self.shared.t_status_prohibit,
            ]
            .into_iter()
            .filter_map(Option::as_ref)
            {
                timer.stop();
            }
        }
        self.shared.sched.reset();
    }
}

impl Shared {
    fn fired_current(&self, timer: &Option<Timer>, generation: u64) -> bool {
        timer.as_ref().is_some_and(|t| t.generation() == generation)
    }

    fn on_reassembly_expired(&self, generation: u64) {
        {
            let mut inner = self.inner.lock();
            if !self.fired_current(&self.t_reassembly, generation) {
                return;
            }
            self.reassembly_alarm(&mut inner);
        }
        self.sched.drain(&*self.backend);
    }

    fn on_poll_retransmit_expired(&self, generation: u64) {
        {
            let mut inner = self.inner.lock();
            if !self.fired_current(&self.t_poll_retransmit, generation) {
                return;
            }
            self.poll_retransmit_alarm(&mut inner);
        }
        self.sched.drain(&*self.backend);
    }

    fn on_status_prohibit_expired(&self, generation: u64) {
        {
            let inner = self.inner.lock();
            if !self.fired_current(&self.t_status_prohibit, generation) {
                return;
            }
            debug!("Status prohibit expired");
            if inner.gen_status {
                self.sched.put(Action::TxRequest);
            }
        }
        self.sched.drain(&*self.backend);
    }
}
