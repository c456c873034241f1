//! Channel pair abstraction (server side of one slot).
//!
//! A `ChannelPair` is a request channel the worker reads whole frames
//! from, and a response channel it writes single bytes to.
//!
//! # Implementors
//!
//! - `MqChannelPair` (default): POSIX message queues created by the
//!   coordinator. Bounded depth, blocking send/receive.
//!
//! - In-memory pairs (testing): bounded std channels, same semantics
//!   without kernel objects.

use crate::error::Result;

/// Server end of one slot's channels.
///
/// **Contract:**
/// - `recv_request()` blocks until one complete message arrives and
///   returns its length. Messages are never split or merged.
/// - A zero-length message is how `wake()` unblocks the receiver.
/// - `send_response()` writes exactly one byte; a full channel blocks
///   the sender (the only backpressure in the system).
pub trait ChannelPair: Send {
    /// Receive one request message into `buf`.
    fn recv_request(&self, buf: &mut [u8]) -> Result<usize>;

    /// Send one response byte.
    fn send_response(&self, byte: u8) -> Result<()>;

    /// Post an empty message to the request side so a blocked
    /// `recv_request()` returns.
    fn wake(&self) -> Result<()>;
}
