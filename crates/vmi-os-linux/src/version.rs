//! Kernel version parsing and comparison.

use std::cmp::Ordering;
use std::fmt;

/// A dotted kernel version, e.g. `5.15.0`.
///
/// Ordered lexicographically component-by-component; this is a total order
/// and a monotone embedding of the dotted text form: for any
/// two versions `a`, `b`, exactly one of `a < b`, `a == b`, `a > b` holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelVersion(Vec<u64>);

impl KernelVersion {
    /// Parses a banner string of the form `Linux version 5.15.0 (...)`,
    /// taking the dotted run of digits immediately following `"Linux
    /// version "`.
    pub fn parse_from_banner(banner: &str) -> Option<Self> {
        let rest = banner.strip_prefix("Linux version ")?;
        let end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        Self::parse(&rest[..end])
    }

    /// Parses a bare dotted version string, e.g. `"5.15.0"`.
    pub fn parse(text: &str) -> Option<Self> {
        if text.is_empty() {
            return None;
        }

        let parts = text
            .split('.')
            .map(|p| p.parse::<u64>().ok())
            .collect::<Option<Vec<_>>>()?;

        if parts.is_empty() {
            return None;
        }

        Some(Self(parts))
    }

    fn component(&self, index: usize) -> u64 {
        self.0.get(index).copied().unwrap_or(0)
    }

    /// Returns `true` if `self >= major.minor`.
    pub fn at_least(&self, major: u64, minor: u64) -> bool {
        (self.component(0), self.component(1)) >= (major, minor)
    }
}

impl fmt::Display for KernelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(u64::to_string).collect();
        write!(f, "{}", parts.join("."))
    }
}

impl PartialOrd for KernelVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for KernelVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.0.len().max(other.0.len());
        for i in 0..len {
            match self.component(i).cmp(&other.component(i)) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        Ordering::Equal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dotted_version_from_banner() {
        let banner = "Linux version 5.15.0-generic (buildd@host) #1 SMP";
        let v = KernelVersion::parse_from_banner(banner).unwrap();
        assert_eq!(v.to_string(), "5.15.0");
    }

    #[test]
    fn total_order_is_consistent() {
        let a = KernelVersion::parse("3.14.9").unwrap();
        let b = KernelVersion::parse("3.15.0").unwrap();
        let c = KernelVersion::parse("3.15.0").unwrap();

        assert!(a < b);
        assert!(b == c);
        assert!(!(a > b));
    }

    #[test]
    fn missing_trailing_components_compare_as_zero() {
        let a = KernelVersion::parse("4").unwrap();
        let b = KernelVersion::parse("4.0.0").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn at_least_checks_major_minor_pair() {
        let v = KernelVersion::parse("4.0.0").unwrap();
        assert!(v.at_least(4, 0));
        assert!(v.at_least(3, 15));
        assert!(!v.at_least(4, 1));
    }
}
