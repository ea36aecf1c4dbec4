//! # NR RLC
//!
//! A 5G NR Radio Link Control data-plane engine: sliding-window
//! segmentation, reassembly and selective-repeat ARQ between an upper SDU
//! producer (e.g. PDCP) and a lower PDU transport (e.g. MAC), with wire
//! formats per 3GPP TS 38.322 §6.2.
//!
//! ## Architecture
//!
//! - **Service modes**: Transparent (TM), Unacknowledged (UM) and
//!   Acknowledged (AM).
//! - **Reliability** (AM): per-segment NACK status reports, poll-driven
//!   retransmission, ACK-driven window advance, poll-retransmit and
//!   status-prohibit timers.
//! - **Reassembly**: per-SDU segment lists with out-of-order deposit and a
//!   reassembly timer bounding the wait for missing segments.
//! - **Deferred callbacks**: all user callbacks fire outside the context
//!   lock through a per-context work queue, so callbacks may re-enter the
//!   engine freely.
//!
//! The lower layer drives transmission: the engine asks for an opportunity
//! via [`RlcBackend::tx_request`] and produces PDUs when granted a byte
//! budget through [`RlcContext::tx_avail`].

use std::time::Duration;

pub mod buf;
pub mod error;
pub mod seglist;
pub mod window;
pub mod wire;

mod arq;
mod context;
mod rx;
mod sched;
mod sdu;
mod timer;
mod tx;

pub use buf::FragBuf;
pub use context::RlcContext;
pub use error::RlcError;
pub use sdu::{SduHandle, TxOutcome};
pub use window::Sn;
pub use wire::{DataPdu, Nack, Pdu, StatusPdu};

/// RLC service mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RlcMode {
    /// Acknowledged: reliable, in-order, ARQ-driven.
    Am,
    /// Unacknowledged: segmentation and reassembly, no retransmission.
    Um,
    /// Transparent: PDUs pass through without a header.
    Tm,
}

/// Sequence number width on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnWidth {
    Sn6,
    Sn12,
    Sn18,
}

impl SnWidth {
    pub fn bits(self) -> usize {
        match self {
            SnWidth::Sn6 => 6,
            SnWidth::Sn12 => 12,
            SnWidth::Sn18 => 18,
        }
    }

    /// Size of the SN space.
    pub fn modulus(self) -> u64 {
        1 << self.bits()
    }

    /// Reduce an unwrapped SN to its wire form.
    pub fn wire(self, sn: Sn) -> u32 {
        (sn.0 % self.modulus()) as u32
    }
}

/// Immutable per-context configuration.
#[derive(Debug, Clone)]
pub struct RlcConfig {
    pub sn_width: SnWidth,
    /// TX and RX window width in SNs; at most half the SN space.
    pub window_size: u32,
    /// AM: poll after this many data PDUs without a poll.
    pub pdu_without_poll_max: u32,
    /// AM: poll after this many payload bytes without a poll.
    pub byte_without_poll_max: usize,
    /// UM/AM: how long to wait for missing segments before declaring loss.
    pub t_reassembly: Duration,
    /// AM: re-poll if no status arrives within this interval.
    pub t_poll_retransmit: Duration,
    /// AM: minimum spacing between status PDUs. Zero disables the
    /// prohibit; status PDUs may then be emitted back-to-back.
    pub t_status_prohibit: Duration,
    /// AM: retransmissions allowed before an SDU fails. Zero means the
    /// first retransmission attempt fails the SDU.
    pub max_retx_threshold: u32,
}

/// Upper-layer notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RlcEvent {
    /// An SDU was received in full. `sn` is `None` for TM delivery and for
    /// UM SDUs carried whole in a single SN-less PDU.
    RxDone { sn: Option<Sn>, payload: FragBuf },
    /// An incomplete SDU was abandoned after reassembly expiry.
    RxFail { sn: Sn },
    /// A transmitted SDU was acknowledged (AM) or fully emitted (UM/TM).
    TxDone { sn: Sn },
    /// A transmitted SDU exceeded the retransmission limit.
    TxFail { sn: Sn },
}

/// User-provided methods, invoked with no engine lock held.
///
/// `tx_submit` hands over a complete PDU (header plus payload view) and
/// transfers ownership of the buffer reference. `tx_request` asks the
/// lower layer for a future [`RlcContext::tx_avail`] call. `event`
/// delivers upper-layer notifications.
pub trait RlcBackend: Send + Sync {
    fn tx_submit(&self, pdu: FragBuf);
    fn tx_request(&self);
    fn event(&self, event: RlcEvent);
}
