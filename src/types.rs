//! Core ingestion types shared across the engine.
//!
//! An [`Entry`] is produced by the DNS pipeline once per answered query and
//! handed to [`Engine::update`](crate::Engine::update).

use crate::error::{Result, StatsError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Number of slots in a result histogram. Slot 0 is reserved and never
/// incremented, so the slot index equals the [`FilterResult`] code.
pub const RESULT_SLOTS: usize = 6;

/// Outcome of filtering a single DNS query.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterResult {
    /// The query was answered normally.
    NotFiltered = 1,
    /// Blocked by a filtering rule.
    Filtered = 2,
    /// Replaced by the safe browsing service.
    SafeBrowsing = 3,
    /// Rewritten by safe search enforcement.
    SafeSearch = 4,
    /// Replaced by the parental control service.
    Parental = 5,
}

impl FilterResult {
    /// All results in histogram order.
    pub const ALL: [FilterResult; 5] = [
        FilterResult::NotFiltered,
        FilterResult::Filtered,
        FilterResult::SafeBrowsing,
        FilterResult::SafeSearch,
        FilterResult::Parental,
    ];

    /// Histogram slot of this result.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

impl TryFrom<u8> for FilterResult {
    type Error = StatsError;

    /// Converts a raw result code. Zero and codes past the last result are
    /// rejected.
    fn try_from(code: u8) -> Result<Self> {
        match code {
            1 => Ok(FilterResult::NotFiltered),
            2 => Ok(FilterResult::Filtered),
            3 => Ok(FilterResult::SafeBrowsing),
            4 => Ok(FilterResult::SafeSearch),
            5 => Ok(FilterResult::Parental),
            other => Err(StatsError::InvalidEntry(format!(
                "unknown result code {}",
                other
            ))),
        }
    }
}

/// One ingestion event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    /// Client IP address or opaque client id.
    pub client: String,
    /// Queried host name.
    pub domain: String,
    /// Filtering outcome.
    pub result: FilterResult,
    /// Time spent processing the query.
    pub processing_time: Duration,
}

impl Entry {
    /// Creates an entry.
    pub fn new(
        client: impl Into<String>,
        domain: impl Into<String>,
        result: FilterResult,
        processing_time: Duration,
    ) -> Self {
        Self {
            client: client.into(),
            domain: domain.into(),
            result,
            processing_time,
        }
    }

    /// Returns an error if the entry must not be counted.
    pub fn validate(&self) -> Result<()> {
        if self.domain.is_empty() {
            return Err(StatsError::InvalidEntry("empty domain".to_string()));
        }

        if self.client.is_empty() {
            return Err(StatsError::InvalidEntry("empty client".to_string()));
        }

        Ok(())
    }
}

/// Client identifier as returned by top-client queries.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum ClientId {
    /// The stored name parsed as an IP address.
    Ip(IpAddr),
    /// Any other client id, kept verbatim.
    Name(String),
}

impl ClientId {
    /// Parses a stored client name.
    pub fn parse(name: &str) -> Self {
        match name.parse::<IpAddr>() {
            Ok(ip) => ClientId::Ip(ip),
            Err(_) => ClientId::Name(name.to_string()),
        }
    }

    /// Returns the address if this client is an IP.
    pub fn ip(&self) -> Option<IpAddr> {
        match self {
            ClientId::Ip(ip) => Some(*ip),
            ClientId::Name(_) => None,
        }
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientId::Ip(ip) => write!(f, "{}", ip),
            ClientId::Name(name) => f.write_str(name),
        }
    }
}

const ANONYMIZE_V4_PREFIX: u32 = 16;
const ANONYMIZE_V6_PREFIX: u32 = 112;

/// Normalizes a client id for counting.
///
/// IP addresses are re-rendered in canonical form; with `anonymize` set,
/// IPv4 is masked to /16 and IPv6 to /112. Other ids pass through.
pub fn normalize_client(client: &str, anonymize: bool) -> String {
    let ip = match client.parse::<IpAddr>() {
        Ok(ip) => ip,
        Err(_) => return client.to_string(),
    };

    if !anonymize {
        return ip.to_string();
    }

    match ip {
        IpAddr::V4(v4) => {
            let mask = u32::MAX << (32 - ANONYMIZE_V4_PREFIX);
            Ipv4Addr::from(u32::from(v4) & mask).to_string()
        }
        IpAddr::V6(v6) => {
            let mask = u128::MAX << (128 - ANONYMIZE_V6_PREFIX);
            Ipv6Addr::from(u128::from(v6) & mask).to_string()
        }
    }
}

/// Seconds since the UNIX epoch.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_codes() {
        assert!(FilterResult::try_from(0).is_err());
        assert!(FilterResult::try_from(6).is_err());
        assert_eq!(FilterResult::try_from(2).unwrap(), FilterResult::Filtered);
        assert_eq!(FilterResult::Parental.index(), RESULT_SLOTS - 1);
    }

    #[test]
    fn test_entry_validation() {
        let ok = Entry::new("127.0.0.1", "example.org", FilterResult::Filtered, Duration::ZERO);
        assert!(ok.validate().is_ok());

        let no_domain = Entry::new("127.0.0.1", "", FilterResult::Filtered, Duration::ZERO);
        assert!(matches!(no_domain.validate(), Err(StatsError::InvalidEntry(_))));

        let no_client = Entry::new("", "example.org", FilterResult::Filtered, Duration::ZERO);
        assert!(no_client.validate().is_err());
    }

    #[test]
    fn test_normalize_client() {
        assert_eq!(normalize_client("192.168.10.20", false), "192.168.10.20");
        assert_eq!(normalize_client("192.168.10.20", true), "192.168.0.0");
        assert_eq!(normalize_client("2001:db8::1:2:3", true), "2001:db8::1:2:0");
        assert_eq!(normalize_client("laptop", true), "laptop");
    }

    #[test]
    fn test_client_id_parse() {
        assert_eq!(
            ClientId::parse("127.0.0.1"),
            ClientId::Ip(IpAddr::V4(Ipv4Addr::LOCALHOST))
        );
        assert_eq!(ClientId::parse("laptop"), ClientId::Name("laptop".to_string()));
        assert_eq!(ClientId::parse("laptop").to_string(), "laptop");
    }
}
