use std::fmt;

/// An unwrapped sequence number.
///
/// Wire sequence numbers wrap at `2^sn_width`; inside the engine every SN
/// is kept unwrapped so that ordering and arithmetic stay linear, and is
/// reduced to its wire form only at the codec boundary. Incoming wire SNs
/// are unwrapped against the relevant window base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Sn(pub u64);

impl Sn {
    pub fn next(self) -> Sn {
        Sn(self.0 + 1)
    }
}

impl fmt::Display for Sn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A sliding window over sequence numbers.
///
/// Membership and ordering are decided by distance from the window base
/// modulo the SN space, which keeps every decision correct across wire SN
/// wraparound. The base only moves forward.
#[derive(Debug, Clone)]
pub struct SnWindow {
    base: u64,
    width: u64,
    modulus: u64,
}

impl SnWindow {
    pub fn new(base: Sn, width: u64, modulus: u64) -> Self {
        debug_assert!(width <= modulus);
        Self {
            base: base.0,
            width,
            modulus,
        }
    }

    pub fn base(&self) -> Sn {
        Sn(self.base)
    }

    /// First SN past the window.
    pub fn end(&self) -> Sn {
        Sn(self.base + self.width)
    }

    pub fn width(&self) -> u64 {
        self.width
    }

    pub fn modulus(&self) -> u64 {
        self.modulus
    }

    pub fn contains(&self, sn: Sn) -> bool {
        sn.0 >= self.base && sn.0 < self.base + self.width
    }

    /// Distance of `sn` from the base. Only meaningful for `sn >= base`.
    pub fn index_of(&self, sn: Sn) -> u64 {
        sn.0.saturating_sub(self.base)
    }

    /// Move the base forward to `sn`.
    pub fn move_to(&mut self, sn: Sn) {
        debug_assert!(sn.0 >= self.base);
        self.base = self.base.max(sn.0);
    }

    /// Unwrap a wire SN relative to the window base.
    ///
    /// The result is the unique unwrapped SN in `[base, base + modulus)`
    /// whose wire form equals `wire`; window membership of the result then
    /// decides whether the SN is current or stale-aliased.
    pub fn unwrap_wire(&self, wire: u32) -> Sn {
        let wire = wire as u64 % self.modulus;
        let base_wire = self.base % self.modulus;
        let distance = (wire + self.modulus - base_wire) % self.modulus;
        Sn(self.base + distance)
    }
}
