use smallvec::SmallVec;
use tracing::{debug, error, info, warn};

use crate::buf::FragBuf;
use crate::context::{Inner, Shared};
use crate::sched::Action;
use crate::sdu::{SduState, TxOutcome};
use crate::seglist::Segment;
use crate::window::Sn;
use crate::wire::{self, Nack, SO_MAX, StatusPdu};
use crate::{RlcEvent, RlcMode};

/// Append `nack` if it fits the remaining budget.
fn push_nack(
    nacks: &mut SmallVec<[Nack; 8]>,
    bytes: &mut usize,
    budget: usize,
    width: crate::SnWidth,
    nack: Nack,
) -> bool {
    let size = wire::nack_size(width, &nack);
    if *bytes + size > budget {
        return false;
    }
    *bytes += size;
    nacks.push(nack);
    true
}

impl Shared {
    /// Serve a pending status PDU out of the TX budget. Returns the bytes
    /// used.
    pub(crate) fn arq_tx_yield(&self, inner: &mut Inner, budget: usize) -> usize {
        if self.mode != RlcMode::Am || !inner.gen_status {
            return 0;
        }
        if self
            .t_status_prohibit
            .as_ref()
            .is_some_and(|timer| timer.is_active())
        {
            return 0;
        }
        self.tx_status(inner, budget)
    }

    /// Build and submit a status PDU describing the RX state: a NACK for
    /// every missing SN run and every missing byte range, in ascending SN
    /// order, truncated to `budget`.
    fn tx_status(&self, inner: &mut Inner, budget: usize) -> usize {
        let width = self.config.sn_width;
        let mut bytes = wire::status_header_size(width);
        if budget < bytes {
            return 0;
        }

        let mut nacks: SmallVec<[Nack; 8]> = SmallVec::new();
        let mut next_sn = inner.rx.win.base();
        let mut truncated = false;

        'walk: for (&sn, sdu) in inner.store.rx.iter() {
            if sn < next_sn {
                continue;
            }

            // SNs missing entirely between next_sn and sn.
            let mut gap = next_sn;
            while gap < sn {
                let run = (sn.0 - gap.0).min(u8::MAX as u64);
                let nack = Nack {
                    sn: width.wire(gap),
                    offset: None,
                    range: (run > 1).then_some(run as u8),
                };
                if !push_nack(&mut nacks, &mut bytes, budget, width, nack) {
                    truncated = true;
                    break 'walk;
                }
                gap = Sn(gap.0 + run);
            }

            if sdu.state != SduState::Done {
                let segs = sdu.received.items();
                let mut gaps: SmallVec<[(u16, u16); 4]> = SmallVec::new();
                match segs.first() {
                    None => gaps.push((0, SO_MAX)),
                    Some(first) => {
                        if first.start > 0 {
                            gaps.push((0, first.start as u16));
                        }
                        for pair in segs.windows(2) {
                            gaps.push((pair[0].end as u16, pair[1].start as u16));
                        }
                        if !sdu.last_received
                            && let Some(last) = segs.last()
                        {
                            gaps.push((last.end as u16, SO_MAX));
                        }
                    }
                }
                for (start, end) in gaps {
                    let nack = Nack {
                        sn: width.wire(sn),
                        offset: Some((start, end)),
                        range: None,
                    };
                    if !push_nack(&mut nacks, &mut bytes, budget, width, nack) {
                        truncated = true;
                        break 'walk;
                    }
                }
            }

            next_sn = sn.next();
        }

        if truncated {
            warn!("Unable to transmit full status: MTU too low");
        }

        let status = StatusPdu {
            ack_sn: width.wire(next_sn),
            nacks,
        };
        inner.gen_status = false;

        if !self.config.t_status_prohibit.is_zero()
            && let Some(timer) = &self.t_status_prohibit
            && let Err(err) = timer.start(self.config.t_status_prohibit)
        {
            error!("Unable to start t-StatusProhibit: {err}");
        }

        debug!("Submitting status PDU: ACK_SN={}", next_sn);
        let mut out = Vec::with_capacity(bytes);
        wire::encode_status(width, &status, &mut out);
        debug_assert_eq!(out.len(), bytes);
        self.sched.put(Action::TxSubmit(FragBuf::from_vec(out)));

        bytes
    }

    /// Whether the PDU being emitted should carry the poll bit.
    pub(crate) fn tx_pollable(&self, inner: &Inner) -> bool {
        if self.mode != RlcMode::Am {
            return false;
        }
        if inner.force_poll {
            return true;
        }
        if inner.tx.pdu_without_poll >= self.config.pdu_without_poll_max
            || inner.tx.byte_without_poll >= self.config.byte_without_poll_max
        {
            return true;
        }
        // Poll when the transmission buffer runs empty.
        inner.store.tx.values().all(|sdu| sdu.unsent.is_empty())
    }

    /// Apply a received status PDU to the TX state. NACKs are processed
    /// before the ACK pass so that an SDU marked for retransmission is
    /// never treated as delivered by the same status.
    pub(crate) fn arq_rx_status(&self, inner: &mut Inner, status: &StatusPdu) {
        let ack_sn = inner.tx.win.unwrap_wire(status.ack_sn);
        debug!(
            "RX AM STATUS; ACK_SN: {}, POLL_SN: {}, {} NACKs",
            ack_sn,
            inner.poll_sn,
            status.nacks.len()
        );

        if ack_sn > inner.poll_sn {
            self.stop_poll_retransmit();
        }

        for nack in &status.nacks {
            let sn = inner.tx.win.unwrap_wire(nack.sn);
            debug!(
                "TX AM STATUS; NACK_SN: {}, OFFSET: {:?}, RANGE: {:?}",
                sn, nack.offset, nack.range
            );

            // The status answering an outstanding poll has arrived.
            let covers_poll = match nack.range {
                Some(range) => sn <= inner.poll_sn && inner.poll_sn.0 < sn.0 + range as u64,
                None => sn == inner.poll_sn,
            };
            if covers_poll {
                self.stop_poll_retransmit();
            }

            if let Some(range) = nack.range {
                self.process_nack_range(inner, sn, range);
            } else if let Some((start, end)) = nack.offset {
                self.process_nack_offset(inner, sn, start, end);
            } else {
                self.retransmit_sdu(inner, sn, None);
            }
        }

        self.tx_ack(inner, ack_sn);
    }

    fn process_nack_range(&self, inner: &mut Inner, start: Sn, range: u8) {
        let end = Sn(start.0 + range.max(1) as u64);
        let sns: Vec<Sn> = inner.store.tx.range(start..end).map(|(&sn, _)| sn).collect();
        for sn in sns {
            // An SDU whose whole range is still pending reports no new
            // bytes and is not counted as a retransmission.
            self.retransmit_sdu(inner, sn, None);
        }
    }

    fn process_nack_offset(&self, inner: &mut Inner, sn: Sn, start: u16, end: u16) {
        let Some(sdu) = inner.store.tx.get(&sn) else {
            warn!("Unrecognized SN: {}", sn);
            return;
        };
        let len = sdu.buffer.len() as u32;
        let end = if end == SO_MAX { len } else { (end as u32).min(len) };
        let start = (start as u32).min(end);
        self.retransmit_sdu(inner, sn, Some(Segment::new(start, end)));
    }

    /// Mark a byte range (whole SDU when `None`) for retransmission,
    /// failing the SDU once the retransmission limit is exceeded.
    pub(crate) fn retransmit_sdu(&self, inner: &mut Inner, sn: Sn, seg: Option<Segment>) {
        let Some(sdu) = inner.store.tx.get_mut(&sn) else {
            warn!("Unrecognized SN: {}", sn);
            return;
        };

        let len = sdu.buffer.len() as u32;
        let seg = seg.unwrap_or(Segment::new(0, len));
        let any_new = sdu.unsent.insert_all(seg);
        sdu.state = SduState::Ready;
        if !any_new {
            // The range was already pending; not a retransmission.
            return;
        }

        debug!("Marking SDU SN={} for retransmission", sn);
        sdu.retx_count += 1;
        if sdu.retx_count >= self.config.max_retx_threshold {
            error!("Transmit failed; exceeded retry limit for SN={}", sn);
            if let Some(sdu) = inner.store.tx.remove(&sn) {
                sdu.completion.signal(TxOutcome::Failed);
                self.sched.put(Action::Event(RlcEvent::TxFail { sn }));
            }
            self.tx_win_shift(inner);
        }
    }

    /// Acknowledge every waiting SDU below `ack_sn` and advance the TX
    /// window to the lowest outstanding SN.
    fn tx_ack(&self, inner: &mut Inner, ack_sn: Sn) {
        debug!("TX AM STATUS ACK; ACK_SN: {}", ack_sn);

        let acked: Vec<Sn> = inner
            .store
            .tx
            .range(..ack_sn)
            .filter(|(_, sdu)| sdu.state == SduState::Wait)
            .map(|(&sn, _)| sn)
            .collect();
        for sn in acked {
            if let Some(sdu) = inner.store.tx.remove(&sn) {
                sdu.completion.signal(TxOutcome::Done);
                info!("TX; SDU {} transmitted ({}B)", sn, sdu.len());
                self.sched.put(Action::Event(RlcEvent::TxDone { sn }));
            }
        }
        self.tx_win_shift(inner);
    }

    pub(crate) fn tx_win_shift(&self, inner: &mut Inner) {
        let lowest = inner
            .store
            .tx
            .keys()
            .next()
            .copied()
            .unwrap_or(inner.tx.next_sn);
        if lowest > inner.tx.win.base() {
            inner.tx.win.move_to(lowest);
            debug!("TX AM: window base advanced to {}", lowest);
        }
    }

    fn stop_poll_retransmit(&self) {
        if let Some(timer) = &self.t_poll_retransmit {
            timer.stop();
        }
    }

    /// No status arrived for an outstanding poll: force a poll on the next
    /// outgoing PDU, re-queueing the newest in-flight SDU if nothing else
    /// is waiting to carry it.
    pub(crate) fn poll_retransmit_alarm(&self, inner: &mut Inner) {
        debug!("Retransmitting poll");
        inner.force_poll = true;

        let buffer_empty = inner.store.tx.values().all(|sdu| sdu.unsent.is_empty());
        if buffer_empty {
            let target = inner
                .store
                .tx
                .iter()
                .rev()
                .find(|(_, sdu)| sdu.submitted && sdu.state == SduState::Wait)
                .map(|(&sn, _)| sn);
            if let Some(sn) = target {
                self.retransmit_sdu(inner, sn, None);
            }
        }

        self.sched.put(Action::TxRequest);
    }
}
