use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::buf::FragBuf;
use crate::{RlcBackend, RlcEvent};

/// A deferred piece of user-visible work.
pub(crate) enum Action {
    TxSubmit(FragBuf),
    TxRequest,
    Event(RlcEvent),
}

/// FIFO of deferred work, drained strictly outside the context lock.
///
/// Everything the engine wants to tell the user (PDU submissions, TX
/// opportunity requests, events) is queued here while the context lock is
/// held and executed after it is released. User callbacks therefore never
/// run under the lock, so a callback is free to call straight back into
/// the context without deadlocking and without growing the call stack.
#[derive(Default)]
pub(crate) struct Sched {
    queue: Mutex<VecDeque<Action>>,
}

impl Sched {
    pub fn put(&self, action: Action) {
        self.queue.lock().push_back(action);
    }

    pub fn reset(&self) {
        self.queue.lock().clear();
    }

    /// Pop and run queued actions until the queue is empty. Items queued
    /// by a callback during the drain are executed in the same pass.
    pub fn drain(&self, backend: &dyn RlcBackend) {
        loop {
            let action = self.queue.lock().pop_front();
            match action {
                None => break,
                Some(Action::TxSubmit(buf)) => backend.tx_submit(buf),
                Some(Action::TxRequest) => backend.tx_request(),
                Some(Action::Event(event)) => backend.event(event),
            }
        }
    }
}
