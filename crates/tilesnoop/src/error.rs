//! Error types for the tilesnoop pipeline

/// Errors raised at the load, configuration and handoff boundaries.
///
/// The per-tick hot path never fails; every lookup outcome (discarded
/// capture, filter false positive, chain overflow) is data, not an error.
#[derive(Debug, thiserror::Error)]
pub enum SnoopError {
    /// Configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    /// Filter load targeted a bit beyond the filter size
    #[error("Filter load address {index} out of range (filter has {bits} bits)")]
    FilterAddressOutOfRange {
        /// Requested bit index
        index: usize,
        /// Filter size in bits
        bits: usize,
    },
    /// Dictionary load targeted a slot beyond the slot array
    #[error("Dictionary load address {address} out of range ({slots} slots)")]
    SlotAddressOutOfRange {
        /// Requested slot address
        address: usize,
        /// Total slots in the index
        slots: usize,
    },
    /// Packed dictionary record has bits set above the 41-bit layout
    #[error("Malformed packed entry {0:#x}: bits above bit 40 are set")]
    MalformedEntry(u64),
    /// Same fingerprint listed twice in a dictionary image
    #[error("Duplicate fingerprint {0:#06x} in dictionary image")]
    DuplicateFingerprint(u16),
    /// Dictionary image or trace could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),
    /// The consumer side of the result handoff has gone away
    #[error("Result handoff closed")]
    HandoffClosed,
    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, SnoopError>;
