//! Secretbox-style authenticated decryption
//!
//! XChaCha20-Poly1305 with a 24-byte caller-supplied nonce and the
//! 16-byte Poly1305 tag trailing the ciphertext. The tag is verified
//! before a single plaintext byte is released; on failure the output
//! buffer is wiped and `Authentication` is returned.
//!
//! The service only ever opens boxes. `seal` exists for clients and tests.

use chacha20poly1305::aead::{AeadInPlace, KeyInit};
use chacha20poly1305::{Key, Tag, XChaCha20Poly1305, XNonce};
use rand::RngCore;

use cmpsvc_core::constants::{KEY_SIZE, MAC_SIZE, NONCE_SIZE, PLAINTEXT_CAPACITY};
use cmpsvc_core::error::{CmpError, FramingError, Result};
use cmpsvc_core::wire::EncryptedValue;
use cmpsvc_core::SecretKey;

/// Fixed-size plaintext buffer, one per value per worker
pub type PlainBuf = [u8; PLAINTEXT_CAPACITY];

/// Keyed cipher instance
pub struct Secretbox {
    cipher: XChaCha20Poly1305,
}

impl Secretbox {
    pub fn new(key: &SecretKey) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(Key::from_slice(key.as_bytes())),
        }
    }

    /// Verify and decrypt `value` into `buf`, returning the plaintext
    pub fn open<'b>(&self, value: &EncryptedValue<'_>, buf: &'b mut PlainBuf) -> Result<&'b [u8]> {
        if value.sealed.len() < MAC_SIZE {
            return Err(FramingError::FieldTooShort {
                len: NONCE_SIZE + value.sealed.len(),
                min: NONCE_SIZE + MAC_SIZE,
            }
            .into());
        }
        let len = value.plaintext_len();
        if len > PLAINTEXT_CAPACITY {
            return Err(FramingError::PlaintextTooLarge { len, max: PLAINTEXT_CAPACITY }.into());
        }

        let out = &mut buf[..len];
        out.copy_from_slice(value.ciphertext());

        let verified = self.cipher.decrypt_in_place_detached(
            XNonce::from_slice(value.nonce),
            b"",
            out,
            Tag::from_slice(value.mac()),
        );
        if verified.is_err() {
            out.fill(0);
            return Err(CmpError::Authentication);
        }

        Ok(&buf[..len])
    }

    /// Encrypt `plaintext`, returning `ciphertext || tag`
    pub fn seal(&self, nonce: &[u8; NONCE_SIZE], plaintext: &[u8]) -> Result<Vec<u8>> {
        if plaintext.len() > PLAINTEXT_CAPACITY {
            return Err(FramingError::PlaintextTooLarge {
                len: plaintext.len(),
                max: PLAINTEXT_CAPACITY,
            }
            .into());
        }

        let mut sealed = Vec::with_capacity(plaintext.len() + MAC_SIZE);
        sealed.extend_from_slice(plaintext);
        let tag = self
            .cipher
            .encrypt_in_place_detached(XNonce::from_slice(nonce), b"", &mut sealed)
            .map_err(|_| FramingError::PlaintextTooLarge {
                len: plaintext.len(),
                max: PLAINTEXT_CAPACITY,
            })?;
        sealed.extend_from_slice(&tag);
        Ok(sealed)
    }

    /// Seal under a fresh random nonce
    pub fn seal_random(&self, plaintext: &[u8]) -> Result<SealedValue> {
        let nonce = random_nonce();
        let sealed = self.seal(&nonce, plaintext)?;
        Ok(SealedValue { nonce, sealed })
    }
}

/// Decrypt one value with `key` (convenience over `Secretbox::open`)
pub fn decrypt<'b>(key: &SecretKey, value: &EncryptedValue<'_>, buf: &'b mut PlainBuf) -> Result<&'b [u8]> {
    Secretbox::new(key).open(value, buf)
}

/// Fresh nonce from the thread-local CSPRNG
pub fn random_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

/// Throwaway key from the thread-local CSPRNG (tests and smoke runs)
pub fn random_key() -> SecretKey {
    let mut bytes = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut bytes);
    SecretKey::from_bytes(bytes)
}

/// An owned sealed value, as a client stores it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedValue {
    pub nonce: [u8; NONCE_SIZE],
    pub sealed: Vec<u8>,
}

impl SealedValue {
    /// Borrow as a wire value
    pub fn as_value(&self) -> Result<EncryptedValue<'_>> {
        Ok(EncryptedValue::new(&self.nonce, &self.sealed)?)
    }
}
