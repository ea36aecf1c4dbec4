use std::fmt;

/// Half-open byte interval `[start, end)` within an SDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub start: u32,
    pub end: u32,
}

impl Segment {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// An ordered list of disjoint, maximally coalesced intervals.
///
/// On the RX side it records which byte ranges of an SDU have been
/// deposited into the buffer; on the TX side it holds the ranges still to
/// be transmitted (retransmission requests are merged back in).
///
/// Insertion returns the *novel* sub-interval so the caller can act on
/// exactly the bytes that were new; an input spanning several existing
/// intervals is consumed across repeated calls via the returned remainder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegList {
    items: Vec<Segment>,
}

impl SegList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[Segment] {
        &self.items
    }

    pub fn first(&self) -> Option<Segment> {
        self.items.first().copied()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Insert the leading novel portion of `seg`.
    ///
    /// Returns `(unique, remaining)`: `unique` is the first sub-interval of
    /// `seg` that was not already present (now inserted and coalesced with
    /// its neighbours), `remaining` is the portion of `seg` beyond the
    /// bytes settled by this call. A fully subsumed input yields
    /// `(None, None)`.
    pub fn insert(&mut self, seg: Segment) -> (Option<Segment>, Option<Segment>) {
        if seg.is_empty() {
            return (None, None);
        }
        let (s, e) = (seg.start, seg.end);

        // First interval that ends at or after the new start; everything
        // before it is strictly disjoint from `seg`.
        let idx = self.items.partition_point(|it| it.end < s);
        if idx == self.items.len() {
            self.items.push(Segment::new(s, e));
            return (Some(Segment::new(s, e)), None);
        }

        let it = self.items[idx];
        if it.start <= s {
            // `seg` begins inside (or touching the end of) `it`.
            if e <= it.end {
                return (None, None);
            }
            let ns = it.end;
            let bound = self
                .items
                .get(idx + 1)
                .map(|n| n.start)
                .unwrap_or(u32::MAX);
            let ne = e.min(bound);
            let unique = Segment::new(ns, ne);
            self.items[idx].end = ne;
            let mut settled = ne;
            if let Some(next) = self.items.get(idx + 1).copied()
                && next.start <= ne
            {
                settled = next.end.max(ne);
                self.items[idx].end = settled;
                self.items.remove(idx + 1);
            }
            let remaining = (e > settled).then(|| Segment::new(settled, e));
            (Some(unique), remaining)
        } else {
            // `seg` begins strictly before `it`.
            let ne = e.min(it.start);
            let unique = Segment::new(s, ne);
            if e >= it.start {
                self.items[idx].start = s;
                let settled = self.items[idx].end;
                let remaining = (e > settled).then(|| Segment::new(settled, e));
                (Some(unique), remaining)
            } else {
                self.items.insert(idx, Segment::new(s, e));
                (Some(unique), None)
            }
        }
    }

    /// Insert `seg` in full, looping over [`insert`] as many times as it
    /// takes. Returns whether any new bytes were inserted.
    ///
    /// [`insert`]: SegList::insert
    pub fn insert_all(&mut self, seg: Segment) -> bool {
        let mut any = false;
        let mut cur = Some(seg);
        while let Some(seg) = cur {
            let (unique, remaining) = self.insert(seg);
            if unique.is_none() {
                break;
            }
            any = true;
            cur = remaining;
        }
        any
    }

    /// Advance the start of the first interval by `n` bytes, dropping it
    /// once exhausted.
    pub fn advance_first(&mut self, n: u32) {
        if let Some(first) = self.items.first_mut() {
            first.start = first.start.saturating_add(n).min(first.end);
            if first.is_empty() {
                self.items.remove(0);
            }
        }
    }

    /// Number of listed bytes strictly below `pos`.
    ///
    /// Translates an SDU-space offset into a buffer-space offset: the
    /// buffer holds only the bytes present in the list, in order.
    pub fn byte_offset(&self, pos: u32) -> usize {
        self.items
            .iter()
            .take_while(|it| it.start < pos)
            .map(|it| (it.end.min(pos) - it.start) as usize)
            .sum()
    }
}
