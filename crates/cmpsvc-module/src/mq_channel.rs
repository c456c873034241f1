//! `MqChannelPair` — default `ChannelPair` implementation.
//!
//! Each slot owns two POSIX message queues: requests flow client → worker
//! on `{segment}-req-{i}`, one-byte responses flow worker → client on
//! `{segment}-rsp-{i}`. A request message carries a whole frame,
//! header included. A zero-length request message is the shutdown wake.

use std::ffi::CString;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::mqueue::{
    mq_close, mq_open, mq_receive, mq_remove_nonblock, mq_send, mq_set_nonblock, mq_unlink, MqAttr,
    MqdT, MQ_OFlag,
};
use nix::sys::stat::Mode;

use cmpsvc_core::channel::ChannelPair;
use cmpsvc_core::constants::MAX_FRAME_LEN;
use cmpsvc_core::error::{CmpError, Result};

/// Largest message the request queue accepts
pub const REQUEST_MSG_SIZE: usize = MAX_FRAME_LEN;

/// Response messages are a single byte
pub const RESPONSE_MSG_SIZE: usize = 1;

const DISCARD_POLL: Duration = Duration::from_millis(1);

fn queue_name(name: &str) -> Result<CString> {
    CString::new(name).map_err(|_| CmpError::Config(format!("queue name {:?} contains NUL", name)))
}

fn open_queue(name: &CString, flags: MQ_OFlag, attr: Option<&MqAttr>) -> Result<MqdT> {
    mq_open(name.as_c_str(), flags, Mode::from_bits_truncate(0o600), attr)
        .map_err(|e| CmpError::Transport(e.into()))
}

fn unlink_stale(name: &CString) -> Result<()> {
    match mq_unlink(name.as_c_str()) {
        Ok(()) => {
            tracing::warn!(queue = ?name, "removed stale message queue");
            Ok(())
        }
        Err(Errno::ENOENT) => Ok(()),
        Err(e) => Err(CmpError::Transport(e.into())),
    }
}

fn close_queue(mq: MqdT) {
    if let Err(e) = mq_close(mq) {
        tracing::warn!(error = %e, "mq_close failed");
    }
}

/// One message without blocking, `None` when the queue is empty
fn try_receive(mq: &MqdT, buf: &mut [u8]) -> Result<Option<usize>> {
    let mut prio = 0u32;
    loop {
        match mq_receive(mq, buf, &mut prio) {
            Ok(n) => return Ok(Some(n)),
            Err(Errno::EAGAIN) => return Ok(None),
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(CmpError::Transport(e.into())),
        }
    }
}

fn send_retry(mq: &MqdT, msg: &[u8]) -> Result<()> {
    loop {
        match mq_send(mq, msg, 0) {
            Ok(()) => return Ok(()),
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(CmpError::Transport(e.into())),
        }
    }
}

fn receive_retry(mq: &MqdT, buf: &mut [u8]) -> Result<usize> {
    let mut prio = 0u32;
    loop {
        match mq_receive(mq, buf, &mut prio) {
            Ok(n) => return Ok(n),
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(CmpError::Transport(e.into())),
        }
    }
}

/// Worker end of one slot's queues, owned by the coordinator
///
/// Creates both queues (replacing stale ones) and unlinks them on drop.
pub struct MqChannelPair {
    request: Option<MqdT>,
    response: Option<MqdT>,
    request_name: CString,
    response_name: CString,
}

impl MqChannelPair {
    pub fn create(request: &str, response: &str, depth: usize) -> Result<Self> {
        let request_name = queue_name(request)?;
        let response_name = queue_name(response)?;
        unlink_stale(&request_name)?;
        unlink_stale(&response_name)?;

        let flags = MQ_OFlag::O_CREAT | MQ_OFlag::O_EXCL | MQ_OFlag::O_RDWR;
        let req_attr = MqAttr::new(0, depth as _, REQUEST_MSG_SIZE as _, 0);
        let rsp_attr = MqAttr::new(0, depth as _, RESPONSE_MSG_SIZE as _, 0);

        let req = open_queue(&request_name, flags, Some(&req_attr))?;
        let rsp = match open_queue(&response_name, flags, Some(&rsp_attr)) {
            Ok(q) => q,
            Err(e) => {
                close_queue(req);
                if let Err(ue) = mq_unlink(request_name.as_c_str()) {
                    tracing::warn!(queue = ?request_name, error = %ue, "mq_unlink failed");
                }
                return Err(e);
            }
        };

        tracing::debug!(request, response, depth, "created channel pair");
        Ok(Self {
            request: Some(req),
            response: Some(rsp),
            request_name,
            response_name,
        })
    }

    fn request(&self) -> Result<&MqdT> {
        self.request.as_ref().ok_or_else(closed)
    }

    fn response(&self) -> Result<&MqdT> {
        self.response.as_ref().ok_or_else(closed)
    }
}

impl ChannelPair for MqChannelPair {
    fn recv_request(&self, buf: &mut [u8]) -> Result<usize> {
        receive_retry(self.request()?, buf)
    }

    fn send_response(&self, byte: u8) -> Result<()> {
        send_retry(self.response()?, &[byte])
    }

    fn wake(&self) -> Result<()> {
        send_retry(self.request()?, &[])
    }
}

impl Drop for MqChannelPair {
    fn drop(&mut self) {
        for mq in [self.request.take(), self.response.take()].into_iter().flatten() {
            close_queue(mq);
        }
        for name in [&self.request_name, &self.response_name] {
            if let Err(e) = mq_unlink(name.as_c_str()) {
                tracing::warn!(queue = ?name, error = %e, "mq_unlink failed");
            }
        }
    }
}

/// Client end of one slot's queues
pub struct MqClientEnd {
    request: Option<MqdT>,
    response: Option<MqdT>,
}

impl MqClientEnd {
    /// Attach to queues created by the coordinator
    pub fn open(request: &str, response: &str) -> Result<Self> {
        let req = open_queue(&queue_name(request)?, MQ_OFlag::O_WRONLY, None)?;
        let rsp = match open_queue(&queue_name(response)?, MQ_OFlag::O_RDONLY, None) {
            Ok(q) => q,
            Err(e) => {
                close_queue(req);
                return Err(e);
            }
        };
        Ok(Self { request: Some(req), response: Some(rsp) })
    }

    /// Send one complete frame
    pub fn send_request(&self, frame: &[u8]) -> Result<()> {
        send_retry(self.request.as_ref().ok_or_else(closed)?, frame)
    }

    /// Block for the response byte
    pub fn recv_response(&self) -> Result<u8> {
        let mut buf = [0u8; RESPONSE_MSG_SIZE];
        let n = receive_retry(self.response.as_ref().ok_or_else(closed)?, &mut buf)?;
        if n != RESPONSE_MSG_SIZE {
            return Err(CmpError::Transport(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "empty response message",
            )));
        }
        Ok(buf[0])
    }

    /// Throw away responses already queued, returning how many there were
    ///
    /// Run when a slot changes hands, so a byte meant for the previous
    /// holder is never read as an answer.
    pub fn discard_stale(&self) -> Result<usize> {
        self.nonblocking(|mq| {
            let mut buf = [0u8; RESPONSE_MSG_SIZE];
            let mut n = 0;
            while try_receive(mq, &mut buf)?.is_some() {
                n += 1;
            }
            Ok(n)
        })
    }

    /// Wait up to `wait` for the answer to a request nobody will read
    ///
    /// Returns whether a response arrived and was dropped.
    pub fn discard_response(&self, wait: Duration) -> Result<bool> {
        let deadline = Instant::now() + wait;
        self.nonblocking(|mq| {
            let mut buf = [0u8; RESPONSE_MSG_SIZE];
            loop {
                if try_receive(mq, &mut buf)?.is_some() {
                    return Ok(true);
                }
                if Instant::now() >= deadline {
                    return Ok(false);
                }
                std::thread::sleep(DISCARD_POLL);
            }
        })
    }

    fn nonblocking<T>(&self, f: impl FnOnce(&MqdT) -> Result<T>) -> Result<T> {
        let mq = self.response.as_ref().ok_or_else(closed)?;
        mq_set_nonblock(mq).map_err(|e| CmpError::Transport(e.into()))?;
        let out = f(mq);
        mq_remove_nonblock(mq).map_err(|e| CmpError::Transport(e.into()))?;
        out
    }
}

impl Drop for MqClientEnd {
    fn drop(&mut self) {
        for mq in [self.request.take(), self.response.take()].into_iter().flatten() {
            close_queue(mq);
        }
    }
}

fn closed() -> CmpError {
    CmpError::Transport(std::io::Error::new(std::io::ErrorKind::NotConnected, "queue closed"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(tag: &str) -> (String, String) {
        let base = format!("/cmpsvc-mqtest-{}-{}", tag, std::process::id());
        (format!("{}-req", base), format!("{}-rsp", base))
    }

    #[test]
    fn test_request_response() {
        let (req, rsp) = names("rr");
        let server = MqChannelPair::create(&req, &rsp, 4).unwrap();
        let client = MqClientEnd::open(&req, &rsp).unwrap();

        client.send_request(&[1, 2, 3, 0]).unwrap();
        let mut buf = [0u8; REQUEST_MSG_SIZE];
        let n = server.recv_request(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[1, 2, 3, 0]);

        server.send_response(0xFF).unwrap();
        assert_eq!(client.recv_response().unwrap(), 0xFF);
    }

    #[test]
    fn test_wake_is_empty_message() {
        let (req, rsp) = names("wake");
        let server = MqChannelPair::create(&req, &rsp, 2).unwrap();
        server.wake().unwrap();
        let mut buf = [0u8; REQUEST_MSG_SIZE];
        assert_eq!(server.recv_request(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_oversized_request_rejected() {
        let (req, rsp) = names("big");
        let _server = MqChannelPair::create(&req, &rsp, 2).unwrap();
        let client = MqClientEnd::open(&req, &rsp).unwrap();
        let frame = vec![0u8; REQUEST_MSG_SIZE + 1];
        assert!(matches!(client.send_request(&frame), Err(CmpError::Transport(_))));
    }

    #[test]
    fn test_discard_stale_responses() {
        let (req, rsp) = names("stale");
        let server = MqChannelPair::create(&req, &rsp, 4).unwrap();
        let client = MqClientEnd::open(&req, &rsp).unwrap();

        assert_eq!(client.discard_stale().unwrap(), 0);
        server.send_response(0x01).unwrap();
        server.send_response(0xFF).unwrap();
        assert_eq!(client.discard_stale().unwrap(), 2);

        // Back in blocking mode afterwards
        server.send_response(0x00).unwrap();
        assert_eq!(client.recv_response().unwrap(), 0x00);
    }

    #[test]
    fn test_discard_response_waits_for_late_answer() {
        let (req, rsp) = names("late");
        let server = MqChannelPair::create(&req, &rsp, 2).unwrap();
        let client = MqClientEnd::open(&req, &rsp).unwrap();

        assert!(!client.discard_response(Duration::from_millis(5)).unwrap());

        std::thread::scope(|s| {
            s.spawn(|| {
                std::thread::sleep(Duration::from_millis(20));
                server.send_response(0x01).unwrap();
            });
            assert!(client.discard_response(Duration::from_secs(5)).unwrap());
        });
        assert_eq!(client.discard_stale().unwrap(), 0);
    }

    #[test]
    fn test_queues_unlinked_on_drop() {
        let (req, rsp) = names("drop");
        drop(MqChannelPair::create(&req, &rsp, 1).unwrap());
        assert!(MqClientEnd::open(&req, &rsp).is_err());
    }
}
