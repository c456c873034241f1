//! Comparator End-to-End Smoke Test
//!
//! Starts both transports in-process under a throwaway key and drives
//! them through their client helpers:
//!   Part A — TCP: orderings, pipelining, dropped connections
//!   Part B — Channel pool: leases, out-of-band replies, exhaustion
//!
//! Run: ./target/release/cmpsvc-smoke [--segment /cmpsvc-smoke] [-n 4]

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::thread;

use clap::Parser;

use cmpsvc_core::config::{ReporterConfig, ServiceConfig};
use cmpsvc_core::error::CmpError;
use cmpsvc_core::outcome::{Outcome, BYTE_OUT_OF_BAND};
use cmpsvc_core::wire::encode_request;
use cmpsvc_core::SecretKey;
use cmpsvc_executor::{ChannelPoolService, PoolClient, ServiceContext, TcpClient, TcpServer};
use cmpsvc_module::secretbox::{random_key, SealedValue, Secretbox};
use cmpsvc_module::SpinPolicy;

#[derive(Parser)]
#[command(name = "cmpsvc-smoke")]
#[command(about = "End-to-end smoke test for both comparator transports")]
struct Cli {
    /// Segment name for the channel-pool part
    #[arg(long, default_value = "/cmpsvc-smoke")]
    segment: String,

    /// Slots in the channel-pool part
    #[arg(short = 'n', long, default_value_t = 4)]
    pool_size: usize,

    /// Show service logs
    #[arg(short, long)]
    verbose: bool,
}

// ── Test harness ──

struct TestRunner {
    total: usize,
    passed: usize,
    failed: usize,
}

const LINE: &str = "────────────────────────────────────────────────────────────";

impl TestRunner {
    fn new() -> Self {
        Self { total: 0, passed: 0, failed: 0 }
    }

    fn section(&self, name: &str) {
        println!("\n{}", LINE);
        println!("  {}", name);
        println!("{}", LINE);
    }

    fn pass(&mut self, name: &str) {
        self.total += 1;
        self.passed += 1;
        println!("  [{:2}] {:<52} PASS", self.total, name);
    }

    fn fail(&mut self, name: &str, reason: &str) {
        self.total += 1;
        self.failed += 1;
        println!("  [{:2}] {:<52} FAIL: {}", self.total, name, reason);
    }

    fn check(&mut self, name: &str, ok: bool, reason: &str) {
        if ok { self.pass(name); } else { self.fail(name, reason); }
    }

    fn summary(&self) {
        println!("\n{}", LINE);
        println!(
            "  Total: {}  Passed: {}  Failed: {}",
            self.total, self.passed, self.failed
        );
        println!("{}", LINE);
    }
}

struct Sealer {
    sb: Secretbox,
}

impl Sealer {
    /// An unsealable value comes back empty and fails the check using it
    fn seal(&self, plain: &[u8]) -> SealedValue {
        self.sb
            .seal_random(plain)
            .unwrap_or(SealedValue { nonce: [0; 24], sealed: Vec::new() })
    }

    fn frame(&self, a: &[u8], b: &[u8]) -> Vec<u8> {
        let (a, b) = (self.seal(a), self.seal(b));
        let mut out = Vec::new();
        if let (Ok(a), Ok(b)) = (a.as_value(), b.as_value()) {
            if let Err(e) = encode_request(&a, &b, &mut out) {
                eprintln!("  encode failed: {}", e);
            }
        }
        out
    }
}

const ORDER_CASES: [(&[u8], &[u8], Outcome); 6] = [
    (b"abc", b"ab", Outcome::Greater),
    (b"ab", b"abc", Outcome::Less),
    (b"abc", b"abd", Outcome::Less),
    (b"abc", b"abc", Outcome::Equal),
    (b"\x00\x00\x01", b"\x00\x00", Outcome::Greater),
    (b"\xff", b"\x7f", Outcome::Greater),
];

// ════════════════════════════════════════════════════════════
// Part A: TCP
// ════════════════════════════════════════════════════════════

fn test_tcp(t: &mut TestRunner, key: &SecretKey, sealer: &Sealer) {
    t.section("Part A: Connection-oriented transport (TCP)");

    let config = ServiceConfig::new()
        .bind_addr("127.0.0.1")
        .port(0)
        .reporter(ReporterConfig::disabled());
    let ctx = match ServiceContext::new(SecretKey::from_bytes(*key.as_bytes()), config) {
        Ok(c) => c,
        Err(e) => return t.fail("service context", &e.to_string()),
    };
    let server = match TcpServer::bind(ctx) {
        Ok(s) => Arc::new(s),
        Err(e) => return t.fail("bind loopback listener", &e.to_string()),
    };
    t.pass("bind loopback listener");
    let addr = server.local_addr();
    let runner = {
        let s = Arc::clone(&server);
        thread::spawn(move || s.run())
    };

    let mut client = TcpClient::new(addr);
    for (a, b, want) in ORDER_CASES {
        let (sa, sb) = (sealer.seal(a), sealer.seal(b));
        let got = match (sa.as_value(), sb.as_value()) {
            (Ok(va), Ok(vb)) => client.compare(&va, &vb),
            (Err(e), _) | (_, Err(e)) => Err(e),
        };
        let name = format!("compare({:?}, {:?}) == {:?}", a, b, want);
        match got {
            Ok(o) => t.check(&name, o == want, &format!("got {:?}", o)),
            Err(e) => t.fail(&name, &e.to_string()),
        }
    }
    t.check("connection reused across requests", client.is_connected(), "client disconnected");

    // Three frames in one write, three bytes back in order
    match TcpStream::connect(addr) {
        Ok(mut s) => {
            let mut batch = sealer.frame(b"1", b"2");
            batch.extend(sealer.frame(b"2", b"1"));
            batch.extend(sealer.frame(b"3", b"3"));
            let mut out = [0u8; 3];
            let ok = s.write_all(&batch).is_ok() && s.read_exact(&mut out).is_ok();
            t.check("pipelined frames", ok && out == [0xFF, 0x01, 0x00], &format!("{:?}", out));
        }
        Err(e) => t.fail("pipelined frames", &e.to_string()),
    }

    // Tampered MAC: connection closed, nothing written
    match TcpStream::connect(addr) {
        Ok(mut s) => {
            let mut f = sealer.frame(b"x", b"y");
            if let Some(last) = f.last_mut() {
                *last ^= 1;
            }
            let mut rest = Vec::new();
            let sent = s.write_all(&f).is_ok();
            // A reset instead of a clean close is also a drop
            let closed = match s.read_to_end(&mut rest) {
                Ok(_) => true,
                Err(e) => e.kind() == std::io::ErrorKind::ConnectionReset,
            };
            t.check(
                "tampered frame drops connection",
                sent && closed && rest.is_empty(),
                &format!("sent={} {} bytes", sent, rest.len()),
            );
        }
        Err(e) => t.fail("tampered frame drops connection", &e.to_string()),
    }

    match server.stopper().stop() {
        Ok(()) => {
            let joined = runner.join().map(|r| r.is_ok()).unwrap_or(false);
            t.check("graceful stop", joined, "accept loop failed");
        }
        Err(e) => t.fail("graceful stop", &e.to_string()),
    }
}

// ════════════════════════════════════════════════════════════
// Part B: Channel pool
// ════════════════════════════════════════════════════════════

fn test_pool(t: &mut TestRunner, key: &SecretKey, sealer: &Sealer, segment: &str, slots: usize) {
    t.section("Part B: Channel-pool transport (shm + mqueue)");

    let config = ServiceConfig::new()
        .segment(segment)
        .pool_size(slots)
        .queue_depth(2)
        .reporter(ReporterConfig::disabled());
    let service = match ServiceContext::new(SecretKey::from_bytes(*key.as_bytes()), config)
        .and_then(ChannelPoolService::start)
    {
        Ok(s) => s,
        Err(e) => return t.fail("start coordinator", &e.to_string()),
    };
    t.pass("start coordinator");

    let client = match PoolClient::attach(segment, SpinPolicy::default()) {
        Ok(c) => c,
        Err(e) => return t.fail("attach to segment", &e.to_string()),
    };
    t.pass("attach to segment");

    {
        let mut lease = match client.lease() {
            Ok(l) => l,
            Err(e) => return t.fail("acquire slot", &e.to_string()),
        };
        t.check("acquire lowest slot", lease.slot().as_u32() == 0, &format!("{:?}", lease.slot()));

        for (a, b, want) in ORDER_CASES {
            let (sa, sb) = (sealer.seal(a), sealer.seal(b));
            let got = match (sa.as_value(), sb.as_value()) {
                (Ok(va), Ok(vb)) => lease.compare(&va, &vb),
                (Err(e), _) | (_, Err(e)) => Err(e),
            };
            let name = format!("slot compare({:?}, {:?})", a, b);
            match got {
                Ok(o) => t.check(&name, o == want, &format!("got {:?}", o)),
                Err(e) => t.fail(&name, &e.to_string()),
            }
        }

        let mut f = sealer.frame(b"x", b"y");
        f.push(0);
        match lease.exchange(&f) {
            Ok(b) => t.check("length mismatch answered out-of-band", b == BYTE_OUT_OF_BAND, &format!("{:#04x}", b)),
            Err(e) => t.fail("length mismatch answered out-of-band", &e.to_string()),
        }
        let (sa, sb) = (sealer.seal(b"after"), sealer.seal(b"after"));
        let still = match (sa.as_value(), sb.as_value()) {
            (Ok(va), Ok(vb)) => lease.compare(&va, &vb).ok(),
            _ => None,
        };
        t.check("slot keeps serving after bad frame", still == Some(Outcome::Equal), &format!("{:?}", still));
    }

    let leases: Vec<_> = (0..slots).filter_map(|_| client.lease().ok()).collect();
    t.check("all slots acquirable", leases.len() == slots, &format!("{} of {}", leases.len(), slots));
    let extra = client.lease().err();
    t.check(
        "acquire on full pool fails fast",
        matches!(extra, Some(CmpError::PoolExhausted { .. })),
        &format!("{:?}", extra.map(|e| e.to_string())),
    );
    drop(leases);
    t.check("release frees slots", client.lease().is_ok(), "still exhausted");

    let stats = service.shutdown();
    t.check("all workers joined", stats.len() == slots, &format!("{} joined", stats.len()));
    t.check(
        "segment unlinked on shutdown",
        PoolClient::attach(segment, SpinPolicy::default()).is_err(),
        "segment still present",
    );
}

fn main() {
    let cli = Cli::parse();
    if cli.verbose {
        tracing_subscriber::fmt().with_writer(std::io::stderr).init();
    }

    println!("cmpsvc smoke test");
    let key = random_key();
    let sealer = Sealer { sb: Secretbox::new(&key) };

    let mut t = TestRunner::new();
    test_tcp(&mut t, &key, &sealer);
    test_pool(&mut t, &key, &sealer, &cli.segment, cli.pool_size);
    t.summary();

    if t.failed > 0 {
        std::process::exit(1);
    }
}
