//! Client side of both transports.
//!
//! Both clients send one framed request and read exactly one byte back.
//! A byte that is not an ordering (the out-of-band marker included) is a
//! hard `OutOfBand` error, never a comparison result.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use cmpsvc_core::error::Result;
use cmpsvc_core::outcome::Outcome;
use cmpsvc_core::slot::{SlotIndex, SlotPool};
use cmpsvc_core::wire::{encode_request, EncryptedValue};
use cmpsvc_module::mq_channel::MqClientEnd;
use cmpsvc_module::shm_pool::ShmSlotPool;
use cmpsvc_module::spinlock::SpinPolicy;

/// How long a dropped lease waits for the answer to its unread request
pub const ABANDONED_RESPONSE_WAIT: Duration = Duration::from_secs(1);

/// Lazily connected TCP client
///
/// The connection is dropped after any failure; the next call reconnects.
pub struct TcpClient {
    addr: SocketAddr,
    stream: Option<TcpStream>,
    frame: Vec<u8>,
}

impl TcpClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr, stream: None, frame: Vec::new() }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Order two sealed values
    pub fn compare(&mut self, a: &EncryptedValue<'_>, b: &EncryptedValue<'_>) -> Result<Outcome> {
        encode_request(a, b, &mut self.frame)?;
        let frame = std::mem::take(&mut self.frame);
        let byte = self.exchange(&frame);
        self.frame = frame;
        let outcome = Outcome::from_byte(byte?);
        if outcome.is_err() {
            self.stream = None;
        }
        outcome
    }

    /// Send raw bytes and read one response byte
    pub fn exchange(&mut self, frame: &[u8]) -> Result<u8> {
        // Taken out so that any early return leaves us disconnected
        let mut stream = match self.stream.take() {
            Some(s) => s,
            None => self.connect()?,
        };
        stream.write_all(frame)?;
        let mut byte = [0u8; 1];
        stream.read_exact(&mut byte)?;
        self.stream = Some(stream);
        Ok(byte[0])
    }

    fn connect(&self) -> Result<TcpStream> {
        let stream = TcpStream::connect(self.addr)?;
        stream.set_nodelay(true)?;
        tracing::debug!(addr = %self.addr, "connected to comparator");
        Ok(stream)
    }
}

/// A process's view of the channel pool
pub struct PoolClient {
    pool: ShmSlotPool,
}

impl PoolClient {
    /// Attach to the coordinator's segment
    pub fn attach(segment: &str, policy: SpinPolicy) -> Result<Self> {
        Ok(Self { pool: ShmSlotPool::open(segment, policy)? })
    }

    pub fn pool(&self) -> &ShmSlotPool {
        &self.pool
    }

    /// Acquire a slot and open its channels
    ///
    /// Fails immediately with `PoolExhausted` when every slot is taken.
    pub fn lease(&self) -> Result<SlotLease<'_>> {
        let slot = self.pool.acquire()?;
        match self.open_end(slot) {
            Ok(end) => {
                tracing::debug!(slot = slot.as_u32(), "slot acquired");
                Ok(SlotLease { pool: &self.pool, slot, end, frame: Vec::new(), pending: false })
            }
            Err(e) => {
                if let Err(re) = self.pool.release(slot) {
                    tracing::warn!(slot = slot.as_u32(), error = %re, "slot release failed");
                }
                Err(e)
            }
        }
    }

    fn open_end(&self, slot: SlotIndex) -> Result<MqClientEnd> {
        let record = self.pool.slot(slot)?;
        let end = MqClientEnd::open(record.request.as_str()?, record.response.as_str()?)?;
        let stale = end.discard_stale()?;
        if stale > 0 {
            tracing::warn!(slot = slot.as_u32(), stale, "discarded responses left by previous holder");
        }
        Ok(end)
    }
}

/// Exclusive use of one slot; released on drop
pub struct SlotLease<'p> {
    pool: &'p ShmSlotPool,
    slot: SlotIndex,
    end: MqClientEnd,
    frame: Vec<u8>,
    /// A request was sent and its response not yet read
    pending: bool,
}

impl SlotLease<'_> {
    pub fn slot(&self) -> SlotIndex {
        self.slot
    }

    /// Order two sealed values
    pub fn compare(&mut self, a: &EncryptedValue<'_>, b: &EncryptedValue<'_>) -> Result<Outcome> {
        encode_request(a, b, &mut self.frame)?;
        let frame = std::mem::take(&mut self.frame);
        let byte = self.exchange(&frame);
        self.frame = frame;
        Outcome::from_byte(byte?)
    }

    /// Send a raw frame and return the response byte
    pub fn exchange(&mut self, frame: &[u8]) -> Result<u8> {
        self.submit(frame)?;
        self.response()
    }

    /// Send a raw frame without waiting for the answer
    ///
    /// At most one request is outstanding; a second submit first reads
    /// and discards the pending response.
    pub fn submit(&mut self, frame: &[u8]) -> Result<()> {
        if self.pending {
            self.response()?;
        }
        self.end.send_request(frame)?;
        self.pending = true;
        Ok(())
    }

    /// Block for the answer to the last submitted frame
    pub fn response(&mut self) -> Result<u8> {
        let byte = self.end.recv_response()?;
        self.pending = false;
        Ok(byte)
    }
}

impl Drop for SlotLease<'_> {
    fn drop(&mut self) {
        if self.pending {
            match self.end.discard_response(ABANDONED_RESPONSE_WAIT) {
                Ok(true) => tracing::debug!(slot = self.slot.as_u32(), "discarded unread response"),
                Ok(false) => tracing::warn!(slot = self.slot.as_u32(), "no response to abandoned request"),
                Err(e) => tracing::warn!(slot = self.slot.as_u32(), error = %e, "draining response failed"),
            }
        }
        match self.pool.release(self.slot) {
            Ok(()) => tracing::debug!(slot = self.slot.as_u32(), "slot released"),
            Err(e) => tracing::warn!(slot = self.slot.as_u32(), error = %e, "slot release failed"),
        }
    }
}
