//! Process-wide secret key
//!
//! Loaded once at startup from an injected source and shared read-only
//! by every worker.

use core::fmt;

use crate::constants::KEY_SIZE;
use crate::error::{CmpError, Result};

/// 256-bit symmetric key
pub struct SecretKey {
    bytes: [u8; KEY_SIZE],
}

impl SecretKey {
    /// Wrap raw key bytes
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Decode a 64-digit hex string (surrounding whitespace ignored)
    pub fn from_hex(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.len() != KEY_SIZE * 2 {
            return Err(CmpError::Config(format!(
                "secret key must be {} hex digits, got {}",
                KEY_SIZE * 2,
                s.len()
            )));
        }

        let mut bytes = [0u8; KEY_SIZE];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|e| CmpError::Config(format!("secret key is not valid hex: {}", e)))?;
        Ok(Self { bytes })
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        for b in self.bytes.iter_mut() {
            // Safety: `b` is a valid, aligned &mut u8
            unsafe { core::ptr::write_volatile(b, 0) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX: &str = "3f91942d47091eac32203d75188125fba55231ca78dc133f8dff6504bef51e2c";

    #[test]
    fn test_from_hex() {
        let key = SecretKey::from_hex(HEX).unwrap();
        assert_eq!(key.as_bytes()[0], 0x3f);
        assert_eq!(key.as_bytes()[31], 0x2c);

        let padded = format!("  {}\n", HEX);
        assert_eq!(SecretKey::from_hex(&padded).unwrap().as_bytes(), key.as_bytes());
    }

    #[test]
    fn test_from_hex_rejects_bad_input() {
        assert!(matches!(SecretKey::from_hex("abcd"), Err(CmpError::Config(_))));
        let odd = HEX.replace('3', "g");
        assert!(matches!(SecretKey::from_hex(&odd), Err(CmpError::Config(_))));
    }

    #[test]
    fn test_debug_redacted() {
        let key = SecretKey::from_bytes([7u8; KEY_SIZE]);
        assert_eq!(format!("{:?}", key), "SecretKey(<redacted>)");
    }
}
