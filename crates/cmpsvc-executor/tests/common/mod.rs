#![allow(dead_code)]

use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Mutex};

use cmpsvc_core::channel::ChannelPair;
use cmpsvc_core::config::{ReporterConfig, ServiceConfig};
use cmpsvc_core::error::{CmpError, Result};
use cmpsvc_core::key::SecretKey;
use cmpsvc_core::wire::encode_request;
use cmpsvc_executor::ServiceContext;
use cmpsvc_module::secretbox::{SealedValue, Secretbox};

pub const KEY_HEX: &str = "6fd0c2e5e0f41d0b7c0dbd4e4b5b9a3f6f3a4c2d1e0f9a8b7c6d5e4f3a2b1c0d";

pub fn key() -> SecretKey {
    SecretKey::from_hex(KEY_HEX).unwrap()
}

pub fn context(config: ServiceConfig) -> Arc<ServiceContext> {
    ServiceContext::new(key(), config).unwrap()
}

pub fn quiet_config() -> ServiceConfig {
    ServiceConfig::new().reporter(ReporterConfig::disabled())
}

pub fn seal(plain: &[u8]) -> SealedValue {
    Secretbox::new(&key()).seal_random(plain).unwrap()
}

pub fn seal_with(key: &SecretKey, plain: &[u8]) -> SealedValue {
    Secretbox::new(key).seal_random(plain).unwrap()
}

pub fn frame_of(a: &SealedValue, b: &SealedValue) -> Vec<u8> {
    let mut out = Vec::new();
    encode_request(&a.as_value().unwrap(), &b.as_value().unwrap(), &mut out).unwrap();
    out
}

pub fn frame(a: &[u8], b: &[u8]) -> Vec<u8> {
    frame_of(&seal(a), &seal(b))
}

/// In-memory channel pair with the same message semantics as the queues
pub struct MemChannelPair {
    requests: Mutex<Receiver<Vec<u8>>>,
    responses: SyncSender<u8>,
    waker: SyncSender<Vec<u8>>,
    fail_sends: bool,
}

/// Test side of a `MemChannelPair`
pub struct MemClient {
    pub requests: SyncSender<Vec<u8>>,
    pub responses: Receiver<u8>,
}

pub fn mem_pair(depth: usize) -> (MemChannelPair, MemClient) {
    let (req_tx, req_rx) = sync_channel(depth);
    let (rsp_tx, rsp_rx) = sync_channel(depth);
    (
        MemChannelPair { requests: Mutex::new(req_rx), responses: rsp_tx, waker: req_tx.clone(), fail_sends: false },
        MemClient { requests: req_tx, responses: rsp_rx },
    )
}

impl MemChannelPair {
    pub fn failing_sends(mut self) -> Self {
        self.fail_sends = true;
        self
    }
}

fn closed() -> CmpError {
    CmpError::Transport(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "channel closed"))
}

impl ChannelPair for MemChannelPair {
    fn recv_request(&self, buf: &mut [u8]) -> Result<usize> {
        let msg = self.requests.lock().map_err(|_| closed())?.recv().map_err(|_| closed())?;
        if msg.len() > buf.len() {
            return Err(CmpError::Transport(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "message too long",
            )));
        }
        buf[..msg.len()].copy_from_slice(&msg);
        Ok(msg.len())
    }

    fn send_response(&self, byte: u8) -> Result<()> {
        if self.fail_sends {
            return Err(closed());
        }
        self.responses.send(byte).map_err(|_| closed())
    }

    fn wake(&self) -> Result<()> {
        self.waker.send(Vec::new()).map_err(|_| closed())
    }
}

impl MemClient {
    pub fn call(&self, frame: &[u8]) -> u8 {
        self.requests.send(frame.to_vec()).unwrap();
        self.responses.recv().unwrap()
    }
}

/// Unique shared-memory name for this test process
pub fn segment(tag: &str) -> String {
    format!("/cmpsvc-it-{}-{}", tag, std::process::id())
}
