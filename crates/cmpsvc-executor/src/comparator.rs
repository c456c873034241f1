//! Per-worker comparison pipeline: decode, open both values, compare, count.

use std::sync::Arc;

use cmpsvc_core::compare::compare;
use cmpsvc_core::constants::PLAINTEXT_CAPACITY;
use cmpsvc_core::error::Result;
use cmpsvc_core::key::SecretKey;
use cmpsvc_core::outcome::Outcome;
use cmpsvc_core::wire::{decode_frame, decode_payload, ComparisonRequest};
use cmpsvc_module::reporter::{ThroughputReporter, WorkerCounter};
use cmpsvc_module::secretbox::{PlainBuf, Secretbox};
use cmpsvc_module::spinlock::fatal_lock_stuck;

/// Owned by exactly one worker thread
pub struct Comparator {
    secretbox: Secretbox,
    a_buf: PlainBuf,
    b_buf: PlainBuf,
    counter: WorkerCounter,
    reporter: Arc<ThroughputReporter>,
}

impl Comparator {
    pub fn new(key: &SecretKey, reporter: Arc<ThroughputReporter>) -> Self {
        Self {
            secretbox: Secretbox::new(key),
            a_buf: [0u8; PLAINTEXT_CAPACITY],
            b_buf: [0u8; PLAINTEXT_CAPACITY],
            counter: WorkerCounter::new(),
            reporter,
        }
    }

    /// Decrypt both sides and order them
    ///
    /// Fails with `Framing` or `Authentication`; nothing is counted then.
    pub fn compare_request(&mut self, req: &ComparisonRequest<'_>) -> Result<Outcome> {
        let opened = self.open_both(req);
        // Wiped whether or not the second value authenticated
        self.a_buf[..req.a.plaintext_len()].fill(0);
        self.b_buf[..req.b.plaintext_len()].fill(0);
        let outcome = opened?;

        if let Err(e) = self.reporter.record(&mut self.counter) {
            fatal_lock_stuck(&e);
        }
        Ok(outcome)
    }

    fn open_both(&mut self, req: &ComparisonRequest<'_>) -> Result<Outcome> {
        let a = self.secretbox.open(&req.a, &mut self.a_buf)?;
        let b = self.secretbox.open(&req.b, &mut self.b_buf)?;
        Ok(compare(a, b))
    }

    /// Compare a payload (the bytes after `total_len`)
    pub fn compare_payload(&mut self, payload: &[u8]) -> Result<Outcome> {
        let req = decode_payload(payload)?;
        self.compare_request(&req)
    }

    /// Compare a complete frame, header included
    pub fn compare_frame(&mut self, frame: &[u8]) -> Result<Outcome> {
        let req = decode_frame(frame)?;
        self.compare_request(&req)
    }

    /// Fold the local count into the shared sample (worker exit)
    pub fn flush(&mut self) {
        if let Err(e) = self.reporter.flush(&mut self.counter) {
            fatal_lock_stuck(&e);
        }
    }
}

impl Drop for Comparator {
    fn drop(&mut self) {
        self.a_buf.fill(0);
        self.b_buf.fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmpsvc_core::config::ReporterConfig;
    use cmpsvc_core::error::{CmpError, FramingError};
    use cmpsvc_core::wire::encode_request;
    use cmpsvc_module::secretbox::SealedValue;
    use cmpsvc_module::spinlock::SpinPolicy;

    fn setup() -> (SecretKey, Comparator) {
        let key = SecretKey::from_bytes([0x42; 32]);
        let reporter = Arc::new(ThroughputReporter::new(ReporterConfig::disabled(), SpinPolicy::default()));
        let cmp = Comparator::new(&key, reporter);
        (key, cmp)
    }

    fn frame(key: &SecretKey, a: &[u8], b: &[u8]) -> Vec<u8> {
        let sb = Secretbox::new(key);
        let (a, b): (SealedValue, SealedValue) = (sb.seal_random(a).unwrap(), sb.seal_random(b).unwrap());
        let mut out = Vec::new();
        encode_request(&a.as_value().unwrap(), &b.as_value().unwrap(), &mut out).unwrap();
        out
    }

    #[test]
    fn test_compare_frame() {
        let (key, mut cmp) = setup();
        assert_eq!(cmp.compare_frame(&frame(&key, b"abc", b"ab")).unwrap(), Outcome::Greater);
        assert_eq!(cmp.compare_frame(&frame(&key, b"ab", b"abc")).unwrap(), Outcome::Less);
        assert_eq!(cmp.compare_frame(&frame(&key, b"abc", b"abd")).unwrap(), Outcome::Less);
        assert_eq!(cmp.compare_frame(&frame(&key, b"abc", b"abc")).unwrap(), Outcome::Equal);
    }

    #[test]
    fn test_compare_payload_skips_header() {
        let (key, mut cmp) = setup();
        let f = frame(&key, b"\x00\x01", b"\x00\x02");
        assert_eq!(cmp.compare_payload(&f[4..]).unwrap(), Outcome::Less);
    }

    #[test]
    fn test_length_mismatch_rejected_before_decrypt() {
        let (key, mut cmp) = setup();
        let mut f = frame(&key, b"x", b"y");
        f.push(0);
        assert!(matches!(
            cmp.compare_frame(&f),
            Err(CmpError::Framing(FramingError::LengthMismatch { .. }))
        ));
    }

    #[test]
    fn test_wrong_key_is_authentication_error() {
        let (_, mut cmp) = setup();
        let other = SecretKey::from_bytes([7; 32]);
        assert!(matches!(cmp.compare_frame(&frame(&other, b"x", b"y")), Err(CmpError::Authentication)));
    }

    #[test]
    fn test_first_plaintext_wiped_when_second_fails() {
        let (key, mut cmp) = setup();
        let other = SecretKey::from_bytes([7; 32]);
        let a = Secretbox::new(&key).seal_random(b"4539123412341234").unwrap();
        let b = Secretbox::new(&other).seal_random(b"4539123412341235").unwrap();
        let mut f = Vec::new();
        encode_request(&a.as_value().unwrap(), &b.as_value().unwrap(), &mut f).unwrap();

        assert!(matches!(cmp.compare_frame(&f), Err(CmpError::Authentication)));
        assert!(cmp.a_buf.iter().all(|&x| x == 0));
        assert!(cmp.b_buf.iter().all(|&x| x == 0));
    }
}
