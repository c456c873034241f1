//! Connection-oriented transport: one thread per accepted TCP connection.
//!
//! ```text
//! loop {
//!     read 4-byte header   (0 bytes → peer closed, done)
//!     read total_len bytes (short → framing error)
//!     decode, open, compare
//!     write 1 byte
//! }
//! ```
//!
//! Any error ends the connection without writing anything further; the
//! client reconnects.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use cmpsvc_core::constants::{LEN_PREFIX, MAX_PAYLOAD_LEN};
use cmpsvc_core::error::{CmpError, FramingError, Result};
use cmpsvc_core::wire::{check_total_len, read_len};

use crate::comparator::Comparator;
use crate::context::{ServiceContext, ShutdownHandle};

/// Read until `buf` is full or the peer closes; returns bytes read
fn read_full<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut got = 0;
    while got < buf.len() {
        match r.read(&mut buf[got..]) {
            Ok(0) => break,
            Ok(n) => got += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(got)
}

/// Serve one connection until the peer closes (`Ok`) or a request fails
///
/// Returns the number of requests answered on a clean close.
pub fn serve_connection<S: Read + Write>(stream: &mut S, cmp: &mut Comparator) -> Result<u64> {
    let mut header = [0u8; LEN_PREFIX];
    let mut payload = [0u8; MAX_PAYLOAD_LEN];
    let mut served = 0u64;

    loop {
        let got = read_full(stream, &mut header)?;
        if got == 0 {
            return Ok(served);
        }
        if got < LEN_PREFIX {
            return Err(FramingError::ShortRead { got, expected: LEN_PREFIX }.into());
        }

        let total = check_total_len(read_len(&header)?)?;
        let got = read_full(stream, &mut payload[..total])?;
        if got < total {
            return Err(FramingError::ShortRead { got, expected: total }.into());
        }

        let outcome = cmp.compare_payload(&payload[..total])?;
        stream.write_all(&[outcome.to_byte()])?;
        served += 1;
    }
}

type LiveConns = Arc<Mutex<HashMap<u64, TcpStream>>>;

/// TCP listener plus its connection threads
pub struct TcpServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    ctx: Arc<ServiceContext>,
    live: LiveConns,
    next_id: AtomicU64,
}

impl TcpServer {
    /// Bind to `bind_addr:port` from the context's config
    pub fn bind(ctx: Arc<ServiceContext>) -> Result<Self> {
        let cfg = ctx.config();
        let listener = TcpListener::bind((cfg.bind_addr.as_str(), cfg.port))?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, "comparator listening");
        Ok(Self {
            listener,
            local_addr,
            ctx,
            live: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Handle that stops `run()` from another thread
    pub fn stopper(&self) -> TcpStopper {
        TcpStopper {
            shutdown: self.ctx.shutdown().clone(),
            wake_addr: wake_addr(self.local_addr),
        }
    }

    /// Accept until shut down, then close live connections and join them
    pub fn run(&self) -> Result<()> {
        let mut workers: Vec<JoinHandle<()>> = Vec::new();

        for incoming in self.listener.incoming() {
            if self.ctx.shutdown().is_shutdown() {
                break;
            }
            let stream = match incoming {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    continue;
                }
            };
            workers.retain(|h| !h.is_finished());
            match self.spawn_connection(stream) {
                Ok(h) => workers.push(h),
                Err(e) => tracing::warn!(error = %e, "could not start connection worker"),
            }
        }

        self.close_live();
        for h in workers {
            if h.join().is_err() {
                tracing::error!("connection worker panicked");
            }
        }
        tracing::info!(addr = %self.local_addr, "comparator stopped");
        Ok(())
    }

    fn spawn_connection(&self, stream: TcpStream) -> Result<JoinHandle<()>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let peer = stream.peer_addr()?;
        if self.ctx.config().tcp_nodelay {
            stream.set_nodelay(true)?;
        }
        if let Ok(mut live) = self.live.lock() {
            live.insert(id, stream.try_clone()?);
        }
        tracing::info!(conn = id, %peer, "connection accepted");

        let ctx = Arc::clone(&self.ctx);
        let live = Arc::clone(&self.live);
        let handle = thread::Builder::new()
            .name(format!("cmp-conn-{}", id))
            .spawn(move || {
                let mut stream = stream;
                let mut cmp = ctx.comparator();
                match serve_connection(&mut stream, &mut cmp) {
                    Ok(served) => tracing::debug!(conn = id, %peer, served, "peer closed"),
                    Err(e) if ctx.shutdown().is_shutdown() => {
                        tracing::debug!(conn = id, %peer, error = %e, "closed by shutdown")
                    }
                    Err(e) => tracing::warn!(
                        conn = id,
                        %peer,
                        kind = ?e.kind(),
                        error = %e,
                        "connection dropped"
                    ),
                }
                cmp.flush();
                if let Ok(mut live) = live.lock() {
                    live.remove(&id);
                }
            })?;
        Ok(handle)
    }

    fn close_live(&self) {
        if let Ok(mut live) = self.live.lock() {
            for (id, stream) in live.drain() {
                // NotConnected just means the peer already went away
                if let Err(e) = stream.shutdown(Shutdown::Both) {
                    tracing::debug!(conn = id, error = %e, "shutdown of live connection failed");
                }
            }
        }
    }
}

/// Stops a running `TcpServer`
#[derive(Debug, Clone)]
pub struct TcpStopper {
    shutdown: ShutdownHandle,
    wake_addr: SocketAddr,
}

impl TcpStopper {
    /// Set the shutdown flag and unblock `accept` with a self-connect
    pub fn stop(&self) -> Result<()> {
        if !self.shutdown.trigger() {
            return Ok(());
        }
        match TcpStream::connect(self.wake_addr) {
            Ok(_) => Ok(()),
            Err(e) => Err(CmpError::Transport(e)),
        }
    }
}

fn wake_addr(local: SocketAddr) -> SocketAddr {
    match local {
        SocketAddr::V4(a) if a.ip().is_unspecified() => SocketAddr::from((Ipv4Addr::LOCALHOST, a.port())),
        SocketAddr::V6(a) if a.ip().is_unspecified() => SocketAddr::from((Ipv6Addr::LOCALHOST, a.port())),
        other => other,
    }
}
