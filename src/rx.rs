use tracing::{debug, error, info, warn};

use crate::buf::FragBuf;
use crate::context::{Inner, Shared};
use crate::sched::Action;
use crate::sdu::{RxSdu, SduState};
use crate::seglist::Segment;
use crate::window::Sn;
use crate::wire::{self, Pdu};
use crate::{RlcEvent, RlcMode};

/// Deposit the payload into the SDU, segment by novel segment.
///
/// Each unique sub-interval reported by the segment list is spliced into
/// the SDU buffer at the byte offset where the preceding listed bytes end.
fn insert_segments(sdu: &mut RxSdu, payload: &FragBuf, seg: Segment) {
    let origin = seg.start;
    let mut cur = Some(seg);
    while let Some(piece) = cur {
        let (unique, remaining) = sdu.received.insert(piece);
        let Some(unique) = unique else { break };

        let view = payload.view((unique.start - origin) as usize, unique.len() as usize);
        let offset = sdu.received.byte_offset(unique.start);
        sdu.buffer.chain_at(view, offset);
        cur = remaining;
    }
}

impl Shared {
    pub(crate) fn rx_process(&self, inner: &mut Inner, mut buf: FragBuf) {
        if self.mode == RlcMode::Tm {
            info!("RX; Full SDU delivered ({}B)", buf.len());
            self.sched.put(Action::Event(RlcEvent::RxDone {
                sn: None,
                payload: buf,
            }));
            return;
        }

        let pdu = match wire::decode(self.mode, self.config.sn_width, &mut buf) {
            Ok(pdu) => pdu,
            Err(err) => {
                error!("Decode failed: {err}");
                return;
            }
        };

        let pdu = match pdu {
            Pdu::Status(status) => {
                if self.mode == RlcMode::Am {
                    self.arq_rx_status(inner, &status);
                } else {
                    warn!("Status PDU in non-AM context, dropping");
                }
                return;
            }
            Pdu::Data(pdu) => pdu,
        };

        // A complete UM SDU travels without an SN; deliver it directly,
        // with no SDU record at all.
        if self.mode == RlcMode::Um && pdu.is_first && pdu.is_last {
            info!("RX; Full SDU delivered ({}B)", buf.len());
            self.sched.put(Action::Event(RlcEvent::RxDone {
                sn: None,
                payload: buf,
            }));
            return;
        }

        if self.mode == RlcMode::Am && pdu.polled {
            inner.gen_status = true;
        }

        let sn = inner.rx.win.unwrap_wire(pdu.sn);
        if !inner.store.rx.contains_key(&sn) {
            if !inner.rx.win.contains(sn) {
                warn!(
                    "RX; SN {} outside RX window ({}..{}), dropping",
                    sn,
                    inner.rx.win.base(),
                    inner.rx.win.end()
                );
                return;
            }
            inner.store.rx.insert(sn, RxSdu::new(sn));
        }

        {
            let Some(sdu) = inner.store.rx.get_mut(&sn) else {
                return;
            };
            if sdu.state != SduState::Ready {
                warn!("RX; Received SN={} when not ready, discarding", sn);
                return;
            }

            let seg = Segment::new(
                pdu.seg_offset as u32,
                pdu.seg_offset as u32 + buf.len() as u32,
            );
            debug!("RX; SN: {}, range: {}", sn, seg);
            insert_segments(sdu, &buf, seg);
            if pdu.is_last {
                sdu.last_received = true;
            }
        }

        if sn >= inner.rx.next_highest {
            inner.rx.next_highest = sn.next();
        }

        if inner.store.rx.get(&sn).is_some_and(RxSdu::is_done) {
            info!("RX; SN: {} completed", sn);
            self.rx_completed(inner, sn);
        }

        self.update_reassembly_timer(inner);
    }

    fn rx_completed(&self, inner: &mut Inner, sn: Sn) {
        if let Some(sdu) = inner.store.rx.get_mut(&sn) {
            sdu.state = SduState::Done;
        }

        if self.mode != RlcMode::Am {
            // UM delivers upon completion; the record stays behind as a
            // tombstone so the window still sees the SN as received.
            if let Some(sdu) = inner.store.rx.get(&sn) {
                self.sched.put(Action::Event(RlcEvent::RxDone {
                    sn: Some(sn),
                    payload: sdu.buffer.clone(),
                }));
            }
        }

        let lowest = self.lowest_not_received(inner, inner.rx.win.base());
        debug!("Shifting RX window to {}", lowest);
        if sn == inner.rx.win.base() {
            inner.rx.win.move_to(lowest);
        }
        if sn == inner.rx.highest_ack {
            inner.rx.highest_ack = lowest;
        }

        if self.mode == RlcMode::Am {
            self.deliver_ready(inner);
        } else {
            let base = inner.rx.win.base();
            let swept: Vec<Sn> = inner
                .store
                .rx
                .range(..base)
                .filter(|(_, sdu)| sdu.state == SduState::Done)
                .map(|(&sn, _)| sn)
                .collect();
            for sn in swept {
                inner.store.rx.remove(&sn);
            }
        }
    }

    /// First SN at or above `from` not yet fully received, bounded by
    /// `next_highest`. Missing records count as not received.
    pub(crate) fn lowest_not_received(&self, inner: &Inner, from: Sn) -> Sn {
        let mut v = from;
        while v < inner.rx.next_highest {
            match inner.store.rx.get(&v) {
                Some(sdu) if sdu.state == SduState::Done => v = v.next(),
                _ => break,
            }
        }
        v
    }

    /// Deliver the in-order run of completed SDUs below the window base.
    pub(crate) fn deliver_ready(&self, inner: &mut Inner) {
        loop {
            let deliverable = match inner.store.rx.iter().next() {
                Some((&sn, sdu)) if sn < inner.rx.win.base() && sdu.state == SduState::Done => {
                    Some(sn)
                }
                _ => None,
            };
            let Some(sn) = deliverable else { break };
            let Some(sdu) = inner.store.rx.remove(&sn) else {
                break;
            };
            info!("Delivering SDU {}", sn);
            self.sched.put(Action::Event(RlcEvent::RxDone {
                sn: Some(sn),
                payload: sdu.buffer,
            }));
        }
    }

    fn update_reassembly_timer(&self, inner: &mut Inner) {
        let Some(timer) = &self.t_reassembly else {
            return;
        };
        if timer.is_active() && self.should_stop_reassembly(inner) {
            debug!("Stopping t-Reassembly");
            timer.stop();
        }
        if !timer.is_active() && self.should_start_reassembly(inner) {
            debug!("Starting t-Reassembly");
            inner.rx.next_status_trigger = inner.rx.next_highest;
            let _ = timer.start(self.config.t_reassembly);
        }
    }

    fn should_start_reassembly(&self, inner: &Inner) -> bool {
        let pending = inner.rx.win.index_of(inner.rx.next_highest);
        if pending > 1 {
            return true;
        }
        // A single pending SN counts once bytes for it have arrived.
        pending == 1 && inner.store.rx.contains_key(&inner.rx.win.base())
    }

    fn should_stop_reassembly(&self, inner: &Inner) -> bool {
        let trigger = inner.rx.next_status_trigger;
        if trigger <= inner.rx.win.base() {
            return true;
        }
        // One SN short of the trigger with the head received contiguously
        // from zero: stop here, and let the start check that follows
        // re-anchor the wait while the head stays incomplete.
        inner.rx.win.index_of(trigger) == 1
            && inner
                .store
                .rx
                .get(&inner.rx.win.base())
                .is_some_and(|sdu| !sdu.has_gap())
    }

    pub(crate) fn reassembly_alarm(&self, inner: &mut Inner) {
        debug!("Reassembly alarm");

        // First SN at or after the trigger not fully received.
        let trigger = inner.rx.next_status_trigger;
        let lowest = self.lowest_not_received(inner, trigger.max(inner.rx.win.base()));

        if self.mode == RlcMode::Am {
            // Abandon what the previous round already reported missing,
            // then report the current state. An SDU thus survives one full
            // reassembly period after being reported before it is dropped.
            let prev = inner.rx.highest_ack;
            let stale: Vec<Sn> = inner
                .store
                .rx
                .range(..prev)
                .filter(|(_, sdu)| sdu.state != SduState::Done)
                .map(|(&sn, _)| sn)
                .collect();
            for sn in stale {
                inner.store.rx.remove(&sn);
                warn!("Dropping SDU {}", sn);
                self.sched.put(Action::Event(RlcEvent::RxFail { sn }));
            }

            let from = prev.max(inner.rx.win.base());
            let new_base = self.lowest_not_received(inner, from);
            inner.rx.win.move_to(new_base);
            self.deliver_ready(inner);

            inner.rx.highest_ack = inner.rx.highest_ack.max(lowest);
            inner.gen_status = true;
            self.sched.put(Action::TxRequest);
        } else {
            // UM advances past the loss and abandons incomplete SDUs.
            let dropped: Vec<(Sn, SduState)> = inner
                .store
                .rx
                .range(..lowest)
                .map(|(&sn, sdu)| (sn, sdu.state))
                .collect();
            for (sn, state) in dropped {
                inner.store.rx.remove(&sn);
                if state != SduState::Done {
                    warn!("Dropping SDU {}", sn);
                    self.sched.put(Action::Event(RlcEvent::RxFail { sn }));
                }
            }
            inner.rx.highest_ack = inner.rx.highest_ack.max(lowest);
            inner.rx.win.move_to(lowest);
        }

        // Restart while loss remains in the window.
        if self.should_start_reassembly(inner) {
            inner.rx.next_status_trigger = inner.rx.next_highest;
            if let Some(timer) = &self.t_reassembly {
                timer.restart(self.config.t_reassembly);
            }
        }
    }
}
