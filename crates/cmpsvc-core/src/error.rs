//! Error types for the comparator service

use std::io;

/// Result type for comparator operations
pub type Result<T> = std::result::Result<T, CmpError>;

/// Errors that can occur anywhere between the wire and the slot table
#[derive(Debug, thiserror::Error)]
pub enum CmpError {
    /// Declared and delivered lengths disagree, or a length is out of bounds
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// MAC verification failed (tampered data, truncation or wrong key)
    #[error("authentication failed")]
    Authentication,

    /// Every slot is currently acquired
    #[error("slot pool exhausted ({capacity} slots in use)")]
    PoolExhausted { capacity: usize },

    /// A spinlock exceeded its bounded wait
    #[error("stuck spinlock detected at {site} after {delays} delays")]
    LockStuck { site: &'static str, delays: u32 },

    /// Send or receive failed on a socket or channel
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// The comparator answered with something other than an ordering
    #[error("comparator returned out-of-band response {0:#04x}")]
    OutOfBand(u8),

    /// Slot index outside the pool
    #[error("invalid slot index {index} (pool holds {capacity})")]
    InvalidSlot { index: usize, capacity: usize },

    /// Shared segment could not be created, attached or validated
    #[error("shared segment {op} failed: {source}")]
    Segment {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// Invalid configuration value
    #[error("configuration: {0}")]
    Config(String),
}

/// Length and layout violations in a request frame
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FramingError {
    /// Fewer than four bytes where a length prefix was expected
    #[error("short header: {got} of 4 bytes")]
    ShortHeader { got: usize },

    /// `total_len` does not match the bytes actually delivered
    #[error("declared length {declared} but {actual} bytes delivered")]
    LengthMismatch { declared: usize, actual: usize },

    /// A length exceeds its buffer capacity
    #[error("length {len} exceeds capacity {max}")]
    Oversized { len: usize, max: usize },

    /// A field cannot even hold a nonce and a MAC
    #[error("field length {len} below minimum {min}")]
    FieldTooShort { len: usize, min: usize },

    /// A field length runs past the end of the payload
    #[error("field of {len} bytes overruns payload ({remaining} remaining)")]
    FieldOverrun { len: usize, remaining: usize },

    /// Bytes left over after the second field
    #[error("{extra} trailing bytes after second value")]
    TrailingBytes { extra: usize },

    /// Decrypted length would exceed the plaintext capacity
    #[error("plaintext of {len} bytes exceeds capacity {max}")]
    PlaintextTooLarge { len: usize, max: usize },

    /// Peer closed the stream part-way through a frame
    #[error("short read: {got} of {expected} bytes")]
    ShortRead { got: usize, expected: usize },
}

/// Coarse classification used by the dispatch layer's propagation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Framing,
    Authentication,
    PoolExhausted,
    LockStuck,
    Transport,
    Other,
}

impl CmpError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            CmpError::Framing(_) => ErrorKind::Framing,
            CmpError::Authentication => ErrorKind::Authentication,
            CmpError::PoolExhausted { .. } => ErrorKind::PoolExhausted,
            CmpError::LockStuck { .. } => ErrorKind::LockStuck,
            CmpError::Transport(_) => ErrorKind::Transport,
            CmpError::OutOfBand(_)
            | CmpError::InvalidSlot { .. }
            | CmpError::Segment { .. }
            | CmpError::Config(_) => ErrorKind::Other,
        }
    }

    /// True for errors a slot worker answers with the out-of-band byte
    /// and then keeps serving.
    pub fn is_request_local(&self) -> bool {
        matches!(self.kind(), ErrorKind::Framing | ErrorKind::Authentication)
    }

    /// Wrap an I/O failure from shared segment setup
    pub fn segment(op: &'static str, source: io::Error) -> Self {
        CmpError::Segment { op, source }
    }
}
