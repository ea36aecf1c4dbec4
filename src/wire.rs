//! Bit-exact RLC PDU header codec (TS 38.322 §6.2).
//!
//! Headers are packed MSB-first. The same field layout drives both
//! directions, so `decode(encode(pdu)) == pdu` holds by construction for
//! every mode and SN width.

use smallvec::SmallVec;
use tracing::warn;

use crate::buf::FragBuf;
use crate::error::RlcError;
use crate::{RlcMode, SnWidth};

/// NACK segment-offset end marker meaning "to the end of the SDU".
pub const SO_MAX: u16 = u16::MAX;

/// A decoded PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pdu {
    Data(DataPdu),
    Status(StatusPdu),
}

/// Header of a UM or AM data PDU. The payload travels separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DataPdu {
    /// Wire sequence number.
    pub sn: u32,
    /// Byte offset of the payload within the SDU.
    pub seg_offset: u16,
    pub is_first: bool,
    pub is_last: bool,
    /// AM poll bit: the receiver is asked for a status report.
    pub polled: bool,
}

/// One status element: a negative acknowledgment for an SDU, optionally
/// narrowed to a byte range and/or widened to a run of SNs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nack {
    /// Wire sequence number of the first NACKed SDU.
    pub sn: u32,
    /// Missing byte range `[start, end)`; `end == SO_MAX` means "to the
    /// end of the SDU".
    pub offset: Option<(u16, u16)>,
    /// Number of consecutive SNs NACKed, starting at `sn`.
    pub range: Option<u8>,
}

/// An AM status PDU.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatusPdu {
    /// The wire SN immediately after the last SN the status accounts for.
    pub ack_sn: u32,
    /// Elements in ascending SN order.
    pub nacks: SmallVec<[Nack; 8]>,
}

fn put_bits(out: &mut [u8], value: u32, offset: usize, width: usize) {
    for i in 0..width {
        let bit = (value >> (width - 1 - i)) & 1;
        let pos = offset + i;
        out[pos / 8] |= (bit as u8) << (7 - pos % 8);
    }
}

fn get_bits(data: &[u8], offset: usize, width: usize) -> u32 {
    let mut value = 0u32;
    for i in 0..width {
        let pos = offset + i;
        value = (value << 1) | ((data[pos / 8] >> (7 - pos % 8)) & 1) as u32;
    }
    value
}

fn has_reserved_pad(mode: RlcMode, width: SnWidth) -> bool {
    // Reserved bits keeping the SN end byte-aligned.
    matches!(
        (mode, width),
        (RlcMode::Um, SnWidth::Sn12) | (RlcMode::Am, SnWidth::Sn18)
    )
}

fn has_sn(mode: RlcMode, is_first: bool, is_last: bool) -> bool {
    mode != RlcMode::Um || !(is_first && is_last)
}

fn data_header_bits(mode: RlcMode, width: SnWidth, is_first: bool, is_last: bool) -> usize {
    let mut bits = 2; // SI
    if mode == RlcMode::Am {
        bits += 2; // D/C + P
    }
    if has_reserved_pad(mode, width) {
        bits += 2;
    }
    if has_sn(mode, is_first, is_last) {
        bits += width.bits();
        if !is_first {
            bits += 16; // SO
        }
    }
    bits
}

/// Encoded size of the header of `pdu`.
pub fn data_header_size(mode: RlcMode, width: SnWidth, pdu: &DataPdu) -> usize {
    match mode {
        RlcMode::Tm => 0,
        _ => data_header_bits(mode, width, pdu.is_first, pdu.is_last).div_ceil(8),
    }
}

/// Append the header of `pdu` to `out`.
pub fn encode_data_header(mode: RlcMode, width: SnWidth, pdu: &DataPdu, out: &mut Vec<u8>) {
    if mode == RlcMode::Tm {
        return;
    }

    let nbits = data_header_bits(mode, width, pdu.is_first, pdu.is_last);
    let mut hdr = [0u8; 8];
    let mut off = 0;

    if mode == RlcMode::Am {
        put_bits(&mut hdr, 1, off, 1); // D/C = data
        off += 1;
        put_bits(&mut hdr, pdu.polled as u32, off, 1);
        off += 1;
    }

    let si = match (pdu.is_first, pdu.is_last) {
        (true, true) => 0b00,
        (true, false) => 0b01,
        (false, true) => 0b10,
        (false, false) => 0b11,
    };
    put_bits(&mut hdr, si, off, 2);
    off += 2;

    if has_reserved_pad(mode, width) {
        off += 2;
    }

    if has_sn(mode, pdu.is_first, pdu.is_last) {
        put_bits(&mut hdr, pdu.sn, off, width.bits());
        off += width.bits();
        if !pdu.is_first {
            put_bits(&mut hdr, pdu.seg_offset as u32, off, 16);
        }
    }

    out.extend_from_slice(&hdr[..nbits.div_ceil(8)]);
}

/// Encoded size of the status PDU header (D/C + CPT + ACK_SN + E1).
pub fn status_header_size(width: SnWidth) -> usize {
    (4 + width.bits() + 1).div_ceil(8)
}

/// Encoded size of one status element.
pub fn nack_size(width: SnWidth, nack: &Nack) -> usize {
    let mut size = (width.bits() + 3).div_ceil(8);
    if nack.offset.is_some() {
        size += 4;
    }
    if nack.range.is_some() {
        size += 1;
    }
    size
}

/// Total encoded size of `status`.
pub fn status_size(width: SnWidth, status: &StatusPdu) -> usize {
    status_header_size(width)
        + status
            .nacks
            .iter()
            .map(|n| nack_size(width, n))
            .sum::<usize>()
}

/// Append the full encoding of `status` (header plus elements) to `out`.
pub fn encode_status(width: SnWidth, status: &StatusPdu, out: &mut Vec<u8>) {
    let mut hdr = [0u8; 3];
    // D/C = 0 and CPT = 000 occupy the first four bits and stay zero.
    put_bits(&mut hdr, status.ack_sn, 4, width.bits());
    put_bits(
        &mut hdr,
        !status.nacks.is_empty() as u32,
        4 + width.bits(),
        1,
    );
    out.extend_from_slice(&hdr[..status_header_size(width)]);

    let count = status.nacks.len();
    for (i, nack) in status.nacks.iter().enumerate() {
        encode_nack(width, nack, i + 1 < count, out);
    }
}

fn encode_nack(width: SnWidth, nack: &Nack, has_more: bool, out: &mut Vec<u8>) {
    let base = (width.bits() + 3).div_ceil(8);
    let mut hdr = [0u8; 3];
    put_bits(&mut hdr, nack.sn, 0, width.bits());
    let ext = ((has_more as u32) << 2)
        | ((nack.offset.is_some() as u32) << 1)
        | nack.range.is_some() as u32;
    put_bits(&mut hdr, ext, width.bits(), 3);
    out.extend_from_slice(&hdr[..base]);

    if let Some((start, end)) = nack.offset {
        out.extend_from_slice(&start.to_be_bytes());
        out.extend_from_slice(&end.to_be_bytes());
    }
    if let Some(range) = nack.range {
        out.push(range);
    }
}

/// Decode and strip one PDU header from the front of `buf`.
///
/// For a data PDU the payload is left in `buf`; for a status PDU the
/// elements are consumed as well. On [`RlcError::NeedMoreData`] nothing is
/// consumed.
pub fn decode(mode: RlcMode, width: SnWidth, buf: &mut FragBuf) -> Result<Pdu, RlcError> {
    debug_assert!(mode != RlcMode::Tm);

    let mut hdr = [0u8; 8];
    let got = buf.copy_to(&mut hdr, 0);
    if got == 0 {
        return Err(RlcError::NeedMoreData);
    }

    if mode == RlcMode::Am && hdr[0] >> 7 == 0 {
        return decode_status(width, buf, &hdr, got);
    }

    let mut pdu = DataPdu::default();
    let mut off = 0;
    if mode == RlcMode::Am {
        off += 1; // D/C already inspected
        pdu.polled = get_bits(&hdr, off, 1) == 1;
        off += 1;
    }
    let si = get_bits(&hdr, off, 2);
    off += 2;
    pdu.is_first = si == 0b00 || si == 0b01;
    pdu.is_last = si == 0b00 || si == 0b10;

    let total = data_header_bits(mode, width, pdu.is_first, pdu.is_last).div_ceil(8);
    if got < total {
        return Err(RlcError::NeedMoreData);
    }

    if has_reserved_pad(mode, width) {
        off += 2;
    }
    if has_sn(mode, pdu.is_first, pdu.is_last) {
        pdu.sn = get_bits(&hdr, off, width.bits());
        off += width.bits();
        if !pdu.is_first {
            pdu.seg_offset = get_bits(&hdr, off, 16) as u16;
        }
    }

    buf.strip_front(total);
    Ok(Pdu::Data(pdu))
}

fn decode_status(
    width: SnWidth,
    buf: &mut FragBuf,
    hdr: &[u8; 8],
    got: usize,
) -> Result<Pdu, RlcError> {
    let header_size = status_header_size(width);
    if got < header_size {
        return Err(RlcError::NeedMoreData);
    }

    let cpt = get_bits(hdr, 1, 3);
    if cpt != 0 {
        warn!("CPT is non-zero: {cpt}");
        return Err(RlcError::Unsupported);
    }

    let ack_sn = get_bits(hdr, 4, width.bits());
    let mut more = get_bits(hdr, 4 + width.bits(), 1) == 1;

    // Nothing is stripped until the whole element chain is known to be
    // present; a truncated element fails the decode without consuming.
    let mut pos = header_size;
    let mut nacks = SmallVec::new();
    while more {
        let mut elem = [0u8; 8];
        let got = buf.copy_to(&mut elem, pos);
        let base = (width.bits() + 3).div_ceil(8);
        if got < base {
            return Err(RlcError::NeedMoreData);
        }

        let sn = get_bits(&elem, 0, width.bits());
        let ext = get_bits(&elem, width.bits(), 3);
        more = ext & 0b100 != 0;
        let has_offset = ext & 0b010 != 0;
        let has_range = ext & 0b001 != 0;

        let need = base + if has_offset { 4 } else { 0 } + if has_range { 1 } else { 0 };
        if got < need {
            return Err(RlcError::NeedMoreData);
        }

        let mut idx = base;
        let offset = if has_offset {
            let start = u16::from_be_bytes([elem[idx], elem[idx + 1]]);
            let end = u16::from_be_bytes([elem[idx + 2], elem[idx + 3]]);
            idx += 4;
            Some((start, end))
        } else {
            None
        };
        let range = has_range.then(|| elem[idx]);

        pos += need;
        nacks.push(Nack { sn, offset, range });
    }

    buf.strip_front(pos);
    Ok(Pdu::Status(StatusPdu { ack_sn, nacks }))
}
