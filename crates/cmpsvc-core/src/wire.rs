//! Request frame codec
//!
//! ```text
//! [u32 total_len] [u32 a_len] [a_nonce || a_sealed] [u32 b_len] [b_nonce || b_sealed]
//! ```
//!
//! All lengths are little-endian and explicit. `total_len` counts every
//! byte after itself and must equal the bytes actually delivered. Each
//! field length covers nonce plus sealed bytes; the sealed part is
//! ciphertext followed by the MAC. Every length is checked against its
//! capacity before any slice is taken.

use crate::constants::{
    LEN_PREFIX, MAC_SIZE, MAX_FIELD_LEN, MAX_PAYLOAD_LEN, MIN_FIELD_LEN, NONCE_SIZE,
    PLAINTEXT_CAPACITY,
};
use crate::error::FramingError;

type FrameResult<T> = core::result::Result<T, FramingError>;

/// One sealed value as carried on the wire (borrowed from the frame)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptedValue<'a> {
    pub nonce: &'a [u8; NONCE_SIZE],
    /// Ciphertext followed by the MAC
    pub sealed: &'a [u8],
}

impl<'a> EncryptedValue<'a> {
    /// Pair a nonce with sealed bytes, enforcing the length invariants
    pub fn new(nonce: &'a [u8; NONCE_SIZE], sealed: &'a [u8]) -> FrameResult<Self> {
        let value = Self { nonce, sealed };
        value.validate()?;
        Ok(value)
    }

    /// Split a `nonce || sealed` field
    pub fn from_field(field: &'a [u8]) -> FrameResult<Self> {
        if field.len() < MIN_FIELD_LEN {
            return Err(FramingError::FieldTooShort { len: field.len(), min: MIN_FIELD_LEN });
        }
        if field.len() > MAX_FIELD_LEN {
            return Err(FramingError::PlaintextTooLarge {
                len: field.len() - MIN_FIELD_LEN,
                max: PLAINTEXT_CAPACITY,
            });
        }

        let (nonce, sealed) = field.split_at(NONCE_SIZE);
        let nonce: &[u8; NONCE_SIZE] = nonce
            .try_into()
            .map_err(|_| FramingError::FieldTooShort { len: field.len(), min: MIN_FIELD_LEN })?;
        Ok(Self { nonce, sealed })
    }

    fn validate(&self) -> FrameResult<()> {
        if self.sealed.len() < MAC_SIZE {
            return Err(FramingError::FieldTooShort {
                len: NONCE_SIZE + self.sealed.len(),
                min: MIN_FIELD_LEN,
            });
        }
        let plain = self.sealed.len() - MAC_SIZE;
        if plain > PLAINTEXT_CAPACITY {
            return Err(FramingError::PlaintextTooLarge { len: plain, max: PLAINTEXT_CAPACITY });
        }
        Ok(())
    }

    /// Length of the `nonce || sealed` field
    #[inline]
    pub fn field_len(&self) -> usize {
        NONCE_SIZE + self.sealed.len()
    }

    /// Length the value decrypts to
    #[inline]
    pub fn plaintext_len(&self) -> usize {
        self.sealed.len() - MAC_SIZE
    }

    /// Ciphertext without the trailing MAC
    #[inline]
    pub fn ciphertext(&self) -> &'a [u8] {
        &self.sealed[..self.plaintext_len()]
    }

    /// The trailing MAC
    #[inline]
    pub fn mac(&self) -> &'a [u8] {
        &self.sealed[self.plaintext_len()..]
    }
}

/// Ordered pair of sealed values parsed from one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComparisonRequest<'a> {
    pub a: EncryptedValue<'a>,
    pub b: EncryptedValue<'a>,
}

/// Read a little-endian length prefix
#[inline]
pub fn read_len(bytes: &[u8]) -> FrameResult<usize> {
    let prefix: [u8; LEN_PREFIX] = bytes
        .get(..LEN_PREFIX)
        .and_then(|b| b.try_into().ok())
        .ok_or(FramingError::ShortHeader { got: bytes.len().min(LEN_PREFIX) })?;
    Ok(u32::from_le_bytes(prefix) as usize)
}

/// Validate a declared `total_len` before reading that many bytes
#[inline]
pub fn check_total_len(declared: usize) -> FrameResult<usize> {
    if declared > MAX_PAYLOAD_LEN {
        return Err(FramingError::Oversized { len: declared, max: MAX_PAYLOAD_LEN });
    }
    Ok(declared)
}

/// Decode a complete frame (header included)
///
/// Used by transports that deliver whole messages: the declared
/// `total_len` must equal exactly the bytes that follow it.
pub fn decode_frame(frame: &[u8]) -> FrameResult<ComparisonRequest<'_>> {
    let declared = read_len(frame)?;
    let payload = &frame[LEN_PREFIX..];
    if declared != payload.len() {
        return Err(FramingError::LengthMismatch { declared, actual: payload.len() });
    }
    decode_payload(payload)
}

/// Decode the bytes following `total_len`
pub fn decode_payload(payload: &[u8]) -> FrameResult<ComparisonRequest<'_>> {
    check_total_len(payload.len())?;

    let (a, rest) = split_field(payload)?;
    let (b, rest) = split_field(rest)?;
    if !rest.is_empty() {
        return Err(FramingError::TrailingBytes { extra: rest.len() });
    }

    Ok(ComparisonRequest {
        a: EncryptedValue::from_field(a)?,
        b: EncryptedValue::from_field(b)?,
    })
}

fn split_field(buf: &[u8]) -> FrameResult<(&[u8], &[u8])> {
    let len = read_len(buf)?;
    let rest = &buf[LEN_PREFIX..];
    if len > rest.len() {
        return Err(FramingError::FieldOverrun { len, remaining: rest.len() });
    }
    Ok(rest.split_at(len))
}

/// Serialize a request frame into `out` (cleared first)
pub fn encode_request(
    a: &EncryptedValue<'_>,
    b: &EncryptedValue<'_>,
    out: &mut Vec<u8>,
) -> FrameResult<()> {
    a.validate()?;
    b.validate()?;

    let total = 2 * LEN_PREFIX + a.field_len() + b.field_len();
    check_total_len(total)?;

    out.clear();
    out.reserve(LEN_PREFIX + total);
    out.extend_from_slice(&(total as u32).to_le_bytes());
    for v in [a, b] {
        out.extend_from_slice(&(v.field_len() as u32).to_le_bytes());
        out.extend_from_slice(v.nonce);
        out.extend_from_slice(v.sealed);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::MAX_FRAME_LEN;

    const NONCE_A: [u8; NONCE_SIZE] = [1u8; NONCE_SIZE];
    const NONCE_B: [u8; NONCE_SIZE] = [2u8; NONCE_SIZE];

    fn frame(a_plain: usize, b_plain: usize) -> Vec<u8> {
        let sa = vec![0xAAu8; a_plain + MAC_SIZE];
        let sb = vec![0xBBu8; b_plain + MAC_SIZE];
        let a = EncryptedValue::new(&NONCE_A, &sa).unwrap();
        let b = EncryptedValue::new(&NONCE_B, &sb).unwrap();
        let mut out = Vec::new();
        encode_request(&a, &b, &mut out).unwrap();
        out
    }

    #[test]
    fn test_decode_layout() {
        let f = frame(3, 0);
        assert_eq!(f.len(), 4 + 4 + (24 + 3 + 16) + 4 + (24 + 16));
        assert_eq!(read_len(&f).unwrap(), f.len() - 4);

        let req = decode_frame(&f).unwrap();
        assert_eq!(req.a.nonce, &NONCE_A);
        assert_eq!(req.b.nonce, &NONCE_B);
        assert_eq!(req.a.plaintext_len(), 3);
        assert_eq!(req.b.plaintext_len(), 0);
        assert_eq!(req.a.mac().len(), MAC_SIZE);
        assert_eq!(req.a.ciphertext(), &[0xAA, 0xAA, 0xAA]);
    }

    #[test]
    fn test_zero_bytes_in_payload() {
        let sa = vec![0u8; 5 + MAC_SIZE];
        let a = EncryptedValue::new(&[0u8; NONCE_SIZE], &sa).unwrap();
        let mut out = Vec::new();
        encode_request(&a, &a, &mut out).unwrap();
        let req = decode_frame(&out).unwrap();
        assert_eq!(req.a.sealed.len(), 5 + MAC_SIZE);
    }

    #[test]
    fn test_total_len_strict_equality() {
        let mut f = frame(4, 4);

        // Declared larger than delivered
        let declared = (f.len() - 4 + 1) as u32;
        f[..4].copy_from_slice(&declared.to_le_bytes());
        assert!(matches!(decode_frame(&f), Err(FramingError::LengthMismatch { .. })));

        // Declared smaller than delivered ("at least" is not enough)
        let declared = (f.len() - 4 - 1) as u32;
        f[..4].copy_from_slice(&declared.to_le_bytes());
        assert!(matches!(decode_frame(&f), Err(FramingError::LengthMismatch { .. })));
    }

    #[test]
    fn test_short_header() {
        assert_eq!(decode_frame(&[1, 2]), Err(FramingError::ShortHeader { got: 2 }));
        assert_eq!(decode_frame(&[]), Err(FramingError::ShortHeader { got: 0 }));
    }

    #[test]
    fn test_field_overrun() {
        let mut f = frame(2, 2);
        // Inflate a_len so it runs past the payload
        f[4..8].copy_from_slice(&10_000u32.to_le_bytes());
        assert!(matches!(decode_frame(&f), Err(FramingError::FieldOverrun { .. })));
    }

    #[test]
    fn test_field_too_short() {
        let mut payload = Vec::new();
        for _ in 0..2 {
            payload.extend_from_slice(&((NONCE_SIZE + MAC_SIZE - 1) as u32).to_le_bytes());
            payload.extend_from_slice(&[0u8; NONCE_SIZE + MAC_SIZE - 1]);
        }
        assert!(matches!(decode_payload(&payload), Err(FramingError::FieldTooShort { .. })));
    }

    #[test]
    fn test_trailing_bytes() {
        let mut f = frame(1, 1);
        f.push(0);
        let declared = (f.len() - 4) as u32;
        f[..4].copy_from_slice(&declared.to_le_bytes());
        assert_eq!(decode_frame(&f), Err(FramingError::TrailingBytes { extra: 1 }));
    }

    #[test]
    fn test_capacity_enforced() {
        // Largest legal frame decodes
        let f = frame(PLAINTEXT_CAPACITY, PLAINTEXT_CAPACITY);
        assert_eq!(f.len(), MAX_FRAME_LEN);
        assert!(decode_frame(&f).is_ok());

        // One byte over is rejected rather than truncated
        let sealed = vec![0u8; PLAINTEXT_CAPACITY + 1 + MAC_SIZE];
        assert!(matches!(
            EncryptedValue::new(&NONCE_A, &sealed),
            Err(FramingError::PlaintextTooLarge { len, .. }) if len == PLAINTEXT_CAPACITY + 1
        ));

        let mut field = NONCE_A.to_vec();
        field.extend_from_slice(&sealed);
        assert!(matches!(
            EncryptedValue::from_field(&field),
            Err(FramingError::PlaintextTooLarge { .. })
        ));
    }

    #[test]
    fn test_oversized_total_len() {
        assert!(check_total_len(MAX_PAYLOAD_LEN).is_ok());
        assert!(matches!(
            check_total_len(MAX_PAYLOAD_LEN + 1),
            Err(FramingError::Oversized { .. })
        ));
        assert!(check_total_len(u32::MAX as usize).is_err());
    }
}
