//! # cmpsvc-module — Default implementations
//!
//! Concrete pieces behind the `cmpsvc-core` traits and types.
//!
//! | Concern            | Impl                 | Notes                                  |
//! |--------------------|----------------------|----------------------------------------|
//! | Mutual exclusion   | `SpinLock`           | `#[repr(C)]`, safe in shared mappings  |
//! | AEAD open/seal     | `Secretbox`          | XChaCha20-Poly1305, detached tag       |
//! | SlotPool           | `ShmSlotPool`        | bitmap in a POSIX shm segment          |
//! | ChannelPair        | `MqChannelPair`      | two POSIX message queues per slot      |
//! | Throughput lines   | `ThroughputReporter` | batched under a `SpinLock`             |

pub mod spinlock;
pub mod secretbox;
pub mod reporter;
pub mod shm_pool;
pub mod mq_channel;

pub use mq_channel::{MqChannelPair, MqClientEnd};
pub use reporter::{ThroughputLine, ThroughputReporter, WorkerCounter};
pub use secretbox::{PlainBuf, SealedValue, Secretbox};
pub use shm_pool::{channel_names, ShmSlotPool, SlotRecord};
pub use spinlock::{fatal_lock_stuck, SpinLock, SpinLockGuard, SpinPolicy};
