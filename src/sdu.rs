use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::buf::FragBuf;
use crate::error::RlcError;
use crate::seglist::SegList;
use crate::window::Sn;

/// Lifecycle state of an SDU record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SduState {
    /// TX: has bytes to transmit. RX: still accepting segments.
    Ready,
    /// TX only: fully submitted, awaiting acknowledgment.
    Wait,
    /// RX only: fully received, awaiting in-order delivery.
    Done,
}

/// Terminal outcome of a transmitted SDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    /// Acknowledged (AM) or fully emitted (UM/TM).
    Done,
    /// Retransmission limit exceeded, or the context was reset.
    Failed,
}

pub(crate) struct TxCompletion {
    outcome: Mutex<Option<TxOutcome>>,
    cond: Condvar,
}

impl TxCompletion {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            outcome: Mutex::new(None),
            cond: Condvar::new(),
        })
    }

    /// Record the terminal outcome. The first signal wins.
    pub fn signal(&self, outcome: TxOutcome) {
        let mut slot = self.outcome.lock();
        if slot.is_none() {
            *slot = Some(outcome);
            self.cond.notify_all();
        }
    }

    pub fn peek(&self) -> Option<TxOutcome> {
        *self.outcome.lock()
    }

    pub fn wait(&self, timeout: Option<Duration>) -> Result<TxOutcome, RlcError> {
        let mut slot = self.outcome.lock();
        match timeout {
            None => loop {
                if let Some(outcome) = *slot {
                    return Ok(outcome);
                }
                self.cond.wait(&mut slot);
            },
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                loop {
                    if let Some(outcome) = *slot {
                        return Ok(outcome);
                    }
                    if self.cond.wait_until(&mut slot, deadline).timed_out() {
                        return (*slot).ok_or(RlcError::Timeout);
                    }
                }
            }
        }
    }
}

/// Handle for a queued TX SDU, returned by [`crate::RlcContext::send`].
///
/// Resolves exactly once, when the SDU reaches a terminal state. Waiting
/// is optional; the timeout variant leaves the SDU untouched.
pub struct SduHandle {
    pub(crate) sn: Sn,
    pub(crate) completion: Arc<TxCompletion>,
}

impl SduHandle {
    pub fn sn(&self) -> Sn {
        self.sn
    }

    /// Block until the SDU completes or fails. `None` waits indefinitely.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<TxOutcome, RlcError> {
        self.completion.wait(timeout)
    }

    /// The terminal outcome, if already reached.
    pub fn try_outcome(&self) -> Option<TxOutcome> {
        self.completion.peek()
    }
}

pub(crate) struct TxSdu {
    pub sn: Sn,
    pub state: SduState,
    pub buffer: FragBuf,
    /// Byte ranges still to be transmitted; retransmission requests are
    /// merged back in.
    pub unsent: SegList,
    pub retx_count: u32,
    /// Whether any PDU of this SDU has been handed to the lower layer.
    pub submitted: bool,
    pub completion: Arc<TxCompletion>,
}

impl TxSdu {
    pub fn new(sn: Sn, buffer: FragBuf) -> Self {
        let len = buffer.len() as u32;
        let mut unsent = SegList::new();
        unsent.insert_all(crate::seglist::Segment::new(0, len));
        Self {
            sn,
            state: SduState::Ready,
            buffer,
            unsent,
            retx_count: 0,
            submitted: false,
            completion: TxCompletion::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }
}

pub(crate) struct RxSdu {
    pub sn: Sn,
    pub state: SduState,
    /// Received bytes, in SDU order, densely packed.
    pub buffer: FragBuf,
    /// Which SDU byte ranges `buffer` holds.
    pub received: SegList,
    /// The PDU carrying the last byte of the SDU has arrived.
    pub last_received: bool,
}

impl RxSdu {
    pub fn new(sn: Sn) -> Self {
        Self {
            sn,
            state: SduState::Ready,
            buffer: FragBuf::new(),
            received: SegList::new(),
            last_received: false,
        }
    }

    /// Received in full: the last byte arrived and the segment list is a
    /// single interval starting at zero.
    pub fn is_done(&self) -> bool {
        self.last_received
            && self.received.len() == 1
            && self.received.first().is_some_and(|seg| seg.start == 0)
    }

    /// A byte below the highest received byte is missing: more than one
    /// segment, or the first segment does not start at zero.
    pub fn has_gap(&self) -> bool {
        self.received.len() > 1 || self.received.first().is_some_and(|seg| seg.start != 0)
    }
}

/// Per-context collection of SDU records, one map per direction, iterated
/// in (unwrapped) SN order.
#[derive(Default)]
pub(crate) struct SduStore {
    pub tx: BTreeMap<Sn, TxSdu>,
    pub rx: BTreeMap<Sn, RxSdu>,
}

impl SduStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.tx.clear();
        self.rx.clear();
    }
}
