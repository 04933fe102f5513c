//! LSN (Log Sequence Number) type and its textual `X/Y` encoding.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// A position in the write-ahead log.
///
/// `Lsn::INVALID` (`0/0`) marks a slot that has never been replicated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Lsn(pub u64);

impl Lsn {
    pub const INVALID: Lsn = Lsn(0);

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl From<u64> for Lsn {
    fn from(value: u64) -> Self {
        Lsn(value)
    }
}

impl From<Lsn> for u64 {
    fn from(lsn: Lsn) -> Self {
        lsn.0
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_lsn(self.0))
    }
}

impl FromStr for Lsn {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_lsn(s).map(Lsn)
    }
}

/// Parse LSN from "X/Y" format to u64.
pub fn parse_lsn(lsn: &str) -> Result<u64> {
    let (high, low) = lsn
        .trim()
        .split_once('/')
        .ok_or_else(|| Error::InvalidLsn(lsn.to_string()))?;

    let high = u64::from_str_radix(high, 16).map_err(|_| Error::InvalidLsn(lsn.to_string()))?;
    let low = u64::from_str_radix(low, 16).map_err(|_| Error::InvalidLsn(lsn.to_string()))?;

    if high > u64::from(u32::MAX) || low > u64::from(u32::MAX) {
        return Err(Error::InvalidLsn(lsn.to_string()));
    }

    Ok((high << 32) | low)
}

/// Format u64 LSN to "X/Y" format.
pub fn format_lsn(lsn: u64) -> String {
    let high = lsn >> 32;
    let low = lsn & 0xFFFFFFFF;
    format!("{:X}/{:X}", high, low)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lsn() {
        assert_eq!(parse_lsn("0/16B3748").unwrap(), 0x16B3748);
        assert_eq!(parse_lsn("1/16B3748").unwrap(), 0x100000000 + 0x16B3748);
        assert!(parse_lsn("invalid").is_err());
        assert!(parse_lsn("1/2/3").is_err());
        assert!(parse_lsn("100000000/0").is_err());
    }

    #[test]
    fn test_format_lsn() {
        assert_eq!(format_lsn(0x16B3748), "0/16B3748");
        assert_eq!(format_lsn(0x100000000 + 0x16B3748), "1/16B3748");
    }

    #[test]
    fn test_invalid_sentinel() {
        assert_eq!(Lsn::INVALID.to_string(), "0/0");
        assert_eq!("0/0".parse::<Lsn>().unwrap(), Lsn::INVALID);
        assert!(!Lsn::INVALID.is_valid());
        assert!(Lsn(1).is_valid());
    }

    #[test]
    fn test_ordering_follows_log_position() {
        let earlier: Lsn = "0/FFFFFFFF".parse().unwrap();
        let later: Lsn = "1/0".parse().unwrap();
        assert!(earlier < later);
    }
}
