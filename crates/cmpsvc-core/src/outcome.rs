//! Comparison outcome and the single-byte response frame

use core::cmp::Ordering;

use crate::error::{CmpError, Result};

/// Response byte for LESS (i8 -1)
pub const BYTE_LESS: u8 = -1i8 as u8;
/// Response byte for EQUAL
pub const BYTE_EQUAL: u8 = 0;
/// Response byte for GREATER
pub const BYTE_GREATER: u8 = 1;
/// Reserved byte meaning "request could not be processed" (i8::MIN)
pub const BYTE_OUT_OF_BAND: u8 = i8::MIN as u8;

/// Ternary result of comparing two decrypted values
#[repr(i8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Less = -1,
    Equal = 0,
    Greater = 1,
}

impl Outcome {
    /// Signed value (-1, 0, 1)
    #[inline]
    pub fn as_i8(self) -> i8 {
        self as i8
    }

    /// Mirror image (a vs b becomes b vs a)
    #[inline]
    pub fn reverse(self) -> Self {
        match self {
            Outcome::Less => Outcome::Greater,
            Outcome::Equal => Outcome::Equal,
            Outcome::Greater => Outcome::Less,
        }
    }

    /// Byte sent back to the client
    #[inline]
    pub fn to_byte(self) -> u8 {
        self.as_i8() as u8
    }

    /// Decode a response byte, treating anything else as a hard failure
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            BYTE_LESS => Ok(Outcome::Less),
            BYTE_EQUAL => Ok(Outcome::Equal),
            BYTE_GREATER => Ok(Outcome::Greater),
            other => Err(CmpError::OutOfBand(other)),
        }
    }
}

impl From<Ordering> for Outcome {
    fn from(ord: Ordering) -> Self {
        match ord {
            Ordering::Less => Outcome::Less,
            Ordering::Equal => Outcome::Equal,
            Ordering::Greater => Outcome::Greater,
        }
    }
}

impl From<Outcome> for Ordering {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Less => Ordering::Less,
            Outcome::Equal => Ordering::Equal,
            Outcome::Greater => Ordering::Greater,
        }
    }
}

/// What a worker writes back for one request
///
/// `OutOfBand` is only ever produced by the channel-pool transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    Outcome(Outcome),
    OutOfBand,
}

impl Response {
    #[inline]
    pub fn to_byte(self) -> u8 {
        match self {
            Response::Outcome(o) => o.to_byte(),
            Response::OutOfBand => BYTE_OUT_OF_BAND,
        }
    }
}

impl From<Outcome> for Response {
    fn from(outcome: Outcome) -> Self {
        Response::Outcome(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_values() {
        assert_eq!(Outcome::Less.to_byte(), 0xFF);
        assert_eq!(Outcome::Equal.to_byte(), 0x00);
        assert_eq!(Outcome::Greater.to_byte(), 0x01);
        assert_eq!(Response::OutOfBand.to_byte(), 0x80);
    }

    #[test]
    fn test_from_byte() {
        assert_eq!(Outcome::from_byte(0xFF).unwrap(), Outcome::Less);
        assert_eq!(Outcome::from_byte(0).unwrap(), Outcome::Equal);
        assert_eq!(Outcome::from_byte(1).unwrap(), Outcome::Greater);
    }

    #[test]
    fn test_out_of_band_is_never_an_outcome() {
        assert!(matches!(
            Outcome::from_byte(BYTE_OUT_OF_BAND),
            Err(CmpError::OutOfBand(0x80))
        ));
        // Anything outside {-1, 0, 1} is a failure, not only the reserved byte
        assert!(Outcome::from_byte(2).is_err());
        assert!(Outcome::from_byte(0xFE).is_err());
    }

    #[test]
    fn test_reverse() {
        assert_eq!(Outcome::Less.reverse(), Outcome::Greater);
        assert_eq!(Outcome::Equal.reverse(), Outcome::Equal);
        assert_eq!(Ordering::from(Outcome::Greater), Ordering::Greater);
    }
}
