//! # cmpsvc-executor — Dispatch layer
//!
//! Delivers framed comparison requests to a per-worker `Comparator` over
//! one of two interchangeable transports:
//!
//! ```text
//! TcpServer          accept → thread per connection → serve_connection()
//! ChannelPoolService N slots → thread per slot      → serve_slot()
//! ```
//!
//! Both share one `ServiceContext` (key, reporter, config, shutdown flag)
//! built once at startup. Downstream semantics are identical; only error
//! propagation differs. A connection worker drops its connection on any
//! failure, while a slot worker answers a bad request with the out-of-band
//! byte and keeps serving.

pub mod context;
pub mod comparator;
pub mod conn;
pub mod pool;
pub mod client;

pub use client::{PoolClient, SlotLease, TcpClient};
pub use comparator::Comparator;
pub use conn::{serve_connection, TcpServer, TcpStopper};
pub use context::{ServiceContext, ShutdownHandle};
pub use pool::{serve_slot, spawn_slot_worker, ChannelPoolService, SlotStats};
