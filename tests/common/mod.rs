#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use nr_rlc::{
    DataPdu, FragBuf, Pdu, RlcBackend, RlcConfig, RlcContext, RlcEvent, RlcMode, Sn, SnWidth,
};
use rand::Rng;
use rand::rngs::StdRng;

pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

/// Backend that records everything and delivers nothing.
pub struct CollectBackend {
    pub pdus: Mutex<Vec<FragBuf>>,
    pub events: Mutex<Vec<RlcEvent>>,
    pub tx_requests: AtomicUsize,
}

impl CollectBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            pdus: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
            tx_requests: AtomicUsize::new(0),
        })
    }

    pub fn pdu_bytes(&self) -> Vec<Vec<u8>> {
        self.pdus.lock().unwrap().iter().map(|p| p.to_vec()).collect()
    }

    pub fn events(&self) -> Vec<RlcEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl RlcBackend for CollectBackend {
    fn tx_submit(&self, pdu: FragBuf) {
        self.pdus.lock().unwrap().push(pdu);
    }

    fn tx_request(&self) {
        self.tx_requests.fetch_add(1, Ordering::SeqCst);
    }

    fn event(&self, event: RlcEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub enum LossPolicy {
    None,
    /// Drop PDUs by submission index.
    DropIndices(HashSet<usize>),
    /// Drop this percentage of data PDUs (statuses always get through).
    DropDataPercent { rng: StdRng, percent: u32 },
}

/// Backend wired to a peer context, with optional loss.
pub struct LinkBackend {
    peer: Mutex<Option<Arc<RlcContext>>>,
    pub events: Mutex<Vec<RlcEvent>>,
    pub log: Mutex<Vec<Vec<u8>>>,
    policy: Mutex<LossPolicy>,
    count: AtomicUsize,
}

impl LinkBackend {
    pub fn new() -> Arc<Self> {
        Self::with_policy(LossPolicy::None)
    }

    pub fn with_policy(policy: LossPolicy) -> Arc<Self> {
        Arc::new(Self {
            peer: Mutex::new(None),
            events: Mutex::new(Vec::new()),
            log: Mutex::new(Vec::new()),
            policy: Mutex::new(policy),
            count: AtomicUsize::new(0),
        })
    }

    pub fn connect(&self, peer: &Arc<RlcContext>) {
        *self.peer.lock().unwrap() = Some(peer.clone());
    }

    pub fn events(&self) -> Vec<RlcEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn pdu_log(&self) -> Vec<Vec<u8>> {
        self.log.lock().unwrap().clone()
    }
}

impl RlcBackend for LinkBackend {
    fn tx_submit(&self, pdu: FragBuf) {
        let bytes = pdu.to_vec();
        let idx = self.count.fetch_add(1, Ordering::SeqCst);
        self.log.lock().unwrap().push(bytes.clone());

        let dropped = {
            let mut policy = self.policy.lock().unwrap();
            match &mut *policy {
                LossPolicy::None => false,
                LossPolicy::DropIndices(set) => set.contains(&idx),
                LossPolicy::DropDataPercent { rng, percent } => {
                    let is_data = bytes.first().is_some_and(|b| b >> 7 == 1);
                    is_data && rng.gen_range(0..100) < *percent
                }
            }
        };
        if dropped {
            return;
        }

        let peer = self.peer.lock().unwrap().clone();
        if let Some(peer) = peer {
            peer.rx_submit(pdu);
        }
    }

    fn tx_request(&self) {}

    fn event(&self, event: RlcEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub fn um_config(width: SnWidth) -> RlcConfig {
    RlcConfig {
        sn_width: width,
        window_size: (width.modulus() / 2) as u32,
        pdu_without_poll_max: 4,
        byte_without_poll_max: 1 << 20,
        t_reassembly: Duration::from_secs(1),
        t_poll_retransmit: Duration::from_secs(1),
        t_status_prohibit: Duration::ZERO,
        max_retx_threshold: 4,
    }
}

pub fn am_config(width: SnWidth) -> RlcConfig {
    RlcConfig {
        sn_width: width,
        window_size: (width.modulus() / 2).min(256) as u32,
        pdu_without_poll_max: 1,
        byte_without_poll_max: 1 << 20,
        t_reassembly: Duration::from_secs(1),
        t_poll_retransmit: Duration::from_secs(1),
        t_status_prohibit: Duration::ZERO,
        max_retx_threshold: 8,
    }
}

/// Alternate TX grants between two linked contexts.
pub fn pump(a: &RlcContext, b: &RlcContext, mtu: usize, rounds: usize) {
    for _ in 0..rounds {
        a.tx_avail(mtu);
        b.tx_avail(mtu);
    }
}

pub fn decode_bytes(mode: RlcMode, width: SnWidth, bytes: &[u8]) -> (Pdu, Vec<u8>) {
    let mut buf = FragBuf::from_slice(bytes);
    let pdu = nr_rlc::wire::decode(mode, width, &mut buf).expect("decode failed");
    (pdu, buf.to_vec())
}

pub fn data_pdu_bytes(
    mode: RlcMode,
    width: SnWidth,
    sn: u32,
    so: u16,
    first: bool,
    last: bool,
    polled: bool,
    payload: &[u8],
) -> Vec<u8> {
    let pdu = DataPdu {
        sn,
        seg_offset: so,
        is_first: first,
        is_last: last,
        polled,
    };
    let mut out = Vec::new();
    nr_rlc::wire::encode_data_header(mode, width, &pdu, &mut out);
    out.extend_from_slice(payload);
    out
}

pub fn rx_done(events: &[RlcEvent]) -> Vec<(Option<Sn>, Vec<u8>)> {
    events
        .iter()
        .filter_map(|e| match e {
            RlcEvent::RxDone { sn, payload } => Some((*sn, payload.to_vec())),
            _ => None,
        })
        .collect()
}

pub fn tx_done(events: &[RlcEvent]) -> Vec<Sn> {
    events
        .iter()
        .filter_map(|e| match e {
            RlcEvent::TxDone { sn } => Some(*sn),
            _ => None,
        })
        .collect()
}

pub fn rx_fail(events: &[RlcEvent]) -> Vec<Sn> {
    events
        .iter()
        .filter_map(|e| match e {
            RlcEvent::RxFail { sn } => Some(*sn),
            _ => None,
        })
        .collect()
}

pub fn tx_fail(events: &[RlcEvent]) -> Vec<Sn> {
    events
        .iter()
        .filter_map(|e| match e {
            RlcEvent::TxFail { sn } => Some(*sn),
            _ => None,
        })
        .collect()
}
