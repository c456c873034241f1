//! # cmpsvc-core
//!
//! Core types and traits for the trusted comparator service.
//!
//! This crate is platform-agnostic and contains no OS-specific code.
//! Shared memory, message queues, the spinlock and the AEAD codec live in
//! `cmpsvc-module`; the worker loops live in `cmpsvc-executor`.
//!
//! ## Modules
//!
//! - `wire` - Request frame codec (length-prefixed, two sealed values)
//! - `outcome` - Ternary comparison result and the response byte
//! - `compare` - Byte-wise lexicographic ordering of plaintexts
//! - `key` - Process-wide secret key
//! - `slot` - Slot index, in-use bitmap, `SlotPool` trait
//! - `channel` - `ChannelPair` trait for slot transports
//! - `error` - Error types
//! - `env` - Environment variable utilities
//! - `config` - Service configuration with env overrides

pub mod wire;
pub mod outcome;
pub mod compare;
pub mod key;
pub mod slot;
pub mod channel;
pub mod error;
pub mod env;
pub mod config;

// Re-exports for convenience
pub use channel::ChannelPair;
pub use compare::compare;
pub use config::{ReporterConfig, ServiceConfig};
pub use error::{CmpError, ErrorKind, FramingError, Result};
pub use key::SecretKey;
pub use outcome::{Outcome, Response};
pub use slot::{SlotBitmap, SlotIndex, SlotPool};
pub use wire::{ComparisonRequest, EncryptedValue};

/// Protocol and layout constants
pub mod constants {
    /// Secret key size (256 bits)
    pub const KEY_SIZE: usize = 32;

    /// Nonce size carried in front of every sealed value
    pub const NONCE_SIZE: usize = 24;

    /// Authentication tag trailing every ciphertext
    pub const MAC_SIZE: usize = 16;

    /// Largest plaintext a single value may decrypt to
    pub const PLAINTEXT_CAPACITY: usize = 256;

    /// Largest `nonce || sealed` field
    pub const MAX_FIELD_LEN: usize = NONCE_SIZE + MAC_SIZE + PLAINTEXT_CAPACITY;

    /// Smallest `nonce || sealed` field (empty plaintext)
    pub const MIN_FIELD_LEN: usize = NONCE_SIZE + MAC_SIZE;

    /// Size of every length prefix on the wire
    pub const LEN_PREFIX: usize = 4;

    /// Largest payload following the `total_len` header
    pub const MAX_PAYLOAD_LEN: usize = 2 * (LEN_PREFIX + MAX_FIELD_LEN);

    /// Largest complete request frame, header included
    pub const MAX_FRAME_LEN: usize = LEN_PREFIX + MAX_PAYLOAD_LEN;

    /// Slots in the reference deployment
    pub const DEFAULT_POOL_SIZE: usize = 32;

    /// Upper bound on slots (the in-use bitmap is a single u64)
    pub const MAX_POOL_SIZE: usize = 64;

    /// Default TCP port of the connection-oriented transport
    pub const DEFAULT_PORT: u16 = 9999;
}
