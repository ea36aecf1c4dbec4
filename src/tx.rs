use tracing::{debug, info};

use crate::buf::FragBuf;
use crate::context::{Inner, Shared};
use crate::sched::Action;
use crate::sdu::{SduState, TxOutcome};
use crate::window::Sn;
use crate::wire::{self, DataPdu};
use crate::{RlcEvent, RlcMode};

impl Shared {
    /// Produce data PDUs for ready SDUs, in SN order, within `budget`
    /// bytes. Returns the bytes used (headers included).
    pub(crate) fn tx_yield(&self, inner: &mut Inner, budget: usize) -> usize {
        let mut used = 0;
        while used < budget {
            let next = inner
                .store
                .tx
                .iter()
                .find(|(_, sdu)| sdu.state == SduState::Ready)
                .map(|(sn, _)| *sn);
            let Some(sn) = next else { break };

            let bytes = self.serve_sdu(inner, sn, budget - used);
            if bytes == 0 {
                break;
            }
            used += bytes;
        }
        used
    }

    /// Emit one PDU for the head of the SDU's unsent list. Returns the
    /// total bytes submitted, or zero when the budget cannot fit a header
    /// plus at least one payload byte.
    fn serve_sdu(&self, inner: &mut Inner, sn: Sn, budget: usize) -> usize {
        let width = self.config.sn_width;

        let (head, sdu_len) = {
            let Some(sdu) = inner.store.tx.get(&sn) else {
                return 0;
            };
            let Some(head) = sdu.unsent.first() else {
                debug_assert!(false, "ready SDU with empty unsent list");
                return 0;
            };
            (head, sdu.buffer.len())
        };

        let is_first = head.start == 0;
        let mut size = head.len() as usize;
        let is_last;
        let header_size;

        match self.mode {
            RlcMode::Tm => {
                // Transparent mode carries no header and cannot segment.
                if budget < size {
                    return 0;
                }
                header_size = 0;
                is_last = true;
            }
            RlcMode::Um if is_first && budget >= size + 1 => {
                // Complete SDU in a single PDU; SN and SO are omitted.
                debug_assert_eq!(head.end as usize, sdu_len);
                header_size = 1;
                is_last = true;
            }
            RlcMode::Um | RlcMode::Am => {
                let probe = DataPdu {
                    is_first,
                    is_last: false,
                    ..Default::default()
                };
                header_size = wire::data_header_size(self.mode, width, &probe);
                if budget <= header_size {
                    return 0;
                }
                if size + header_size > budget {
                    size = budget - header_size;
                }
                is_last = head.start as usize + size == sdu_len;
            }
        }

        if let Some(sdu) = inner.store.tx.get_mut(&sn) {
            sdu.unsent.advance_first(size as u32);
            sdu.submitted = true;
            if sdu.unsent.is_empty() && self.mode == RlcMode::Am {
                sdu.state = SduState::Wait;
            }
        }

        inner.tx.pdu_without_poll += 1;
        inner.tx.byte_without_poll += size;

        let polled = self.tx_pollable(inner);
        if polled {
            inner.tx.pdu_without_poll = 0;
            inner.tx.byte_without_poll = 0;
            inner.force_poll = false;

            // POLL_SN tracks the highest SN handed to the lower layer.
            let highest = inner
                .store
                .tx
                .iter()
                .rev()
                .find(|(_, sdu)| sdu.submitted)
                .map(|(sn, _)| *sn);
            if let Some(highest) = highest
                && highest > inner.poll_sn
            {
                inner.poll_sn = highest;
            }

            if let Some(sdu) = inner.store.tx.get_mut(&sn) {
                sdu.state = SduState::Wait;
            }

            if let Some(timer) = &self.t_poll_retransmit {
                timer.restart(self.config.t_poll_retransmit);
                debug!("Started t-PollRetransmit");
            }
            debug!("TX; Polling {} for status", sn);
        }

        let pdu = DataPdu {
            sn: width.wire(sn),
            seg_offset: head.start as u16,
            is_first,
            is_last,
            polled,
        };

        let mut header = Vec::new();
        wire::encode_data_header(self.mode, width, &pdu, &mut header);
        debug_assert_eq!(header.len(), header_size);

        let payload = {
            let Some(sdu) = inner.store.tx.get(&sn) else {
                return 0;
            };
            sdu.buffer.view(head.start as usize, size)
        };
        let mut out = FragBuf::from_vec(header);
        out.chain_back(payload);

        debug!(
            "TX PDU; SN: {}, range: {}..{}",
            sn,
            head.start,
            head.start as usize + size
        );
        self.sched.put(Action::TxSubmit(out));

        if self.mode != RlcMode::Am
            && is_last
            && let Some(sdu) = inner.store.tx.remove(&sn)
        {
            sdu.completion.signal(TxOutcome::Done);
            info!("TX; SDU {} transmitted ({}B)", sn, sdu_len);
            self.sched.put(Action::Event(RlcEvent::TxDone { sn }));
            self.tx_win_shift(inner);
        }

        header_size + size
    }
}
