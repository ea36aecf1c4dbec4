use thiserror::Error;

/// Errors surfaced by the RLC engine.
///
/// Terminal per-SDU outcomes (transmit failure after exhausting
/// retransmissions, receive failure after reassembly expiry) are reported
/// through [`crate::RlcEvent`], not through this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RlcError {
    /// Decode input is shorter than the header it announces. Nothing was
    /// consumed; the caller may retry with more data.
    #[error("need more data")]
    NeedMoreData,
    /// Reserved wire bits in use (non-zero CPT), or a mode/width
    /// combination the engine does not speak.
    #[error("unsupported PDU format")]
    Unsupported,
    /// `tx_next` is outside the TX window; retry after TX progress.
    #[error("transmit window full")]
    WindowFull,
    #[error("timer already running")]
    Busy,
    #[error("wait timed out")]
    Timeout,
    #[error("invalid argument")]
    InvalidArgument,
}
