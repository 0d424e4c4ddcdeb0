//! Stored record format.
//!
//! # Format
//! ```text
//! magic:   "QS"            (2 bytes)
//! version: u16 big-endian  (2 bytes)
//! body:    bincode(UnitRecord)
//!            results, domains, blocked_domains, clients, total, avg_time_us
//! ```
//!
//! Any change to `UnitRecord`'s fields needs a new version number and a
//! decoder arm for the old one.

use crate::error::{Result, StatsError};
use crate::unit::UnitRecord;

const MAGIC: [u8; 2] = *b"QS";
pub const RECORD_VERSION: u16 = 1;
const HEADER_LEN: usize = 4;

/// Encodes a record with its header.
pub fn encode(record: &UnitRecord) -> Result<Vec<u8>> {
    let body = bincode::serialize(record)?;

    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&RECORD_VERSION.to_be_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decodes a record, checking magic and version.
pub fn decode(bytes: &[u8]) -> Result<UnitRecord> {
    if bytes.len() < HEADER_LEN {
        return Err(StatsError::Codec(format!(
            "record too short: {} bytes",
            bytes.len()
        )));
    }

    if bytes[..2] != MAGIC {
        return Err(StatsError::Codec(format!(
            "invalid magic: {:?}",
            &bytes[..2]
        )));
    }

    let version = u16::from_be_bytes([bytes[2], bytes[3]]);
    match version {
        RECORD_VERSION => Ok(bincode::deserialize(&bytes[HEADER_LEN..])?),
        other => Err(StatsError::UnsupportedVersion(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::NameCount;

    #[test]
    fn test_header_layout() {
        let bytes = encode(&UnitRecord::default()).unwrap();
        assert_eq!(&bytes[..2], b"QS");
        assert_eq!(u16::from_be_bytes([bytes[2], bytes[3]]), RECORD_VERSION);
    }

    #[test]
    fn test_decode_preserves_fields() {
        let record = UnitRecord {
            results: vec![0, 5, 2, 0, 1, 0],
            domains: vec![NameCount::new("example.org", 5)],
            blocked_domains: vec![NameCount::new("ads.example", 3)],
            clients: vec![NameCount::new("192.168.1.2", 8)],
            total: 8,
            avg_time_us: 1_250,
        };

        let decoded = decode(&encode(&record).unwrap()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_decode_rejects_bad_header() {
        assert!(matches!(decode(b"QS"), Err(StatsError::Codec(_))));
        assert!(matches!(decode(b"XX\x00\x01"), Err(StatsError::Codec(_))));

        let mut bytes = encode(&UnitRecord::default()).unwrap();
        bytes[3] = 9;
        assert!(matches!(decode(&bytes), Err(StatsError::UnsupportedVersion(9))));
    }
}
