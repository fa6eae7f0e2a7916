use serde::{Deserialize, Serialize};
use std::fmt;

/// The fifteen chart intervals the store keeps, from base 1m up to 1M.
///
/// The 1M width is a fixed 43200 minutes (30 days), not a calendar month,
/// so every interval shares the same epoch-aligned bucket rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Interval {
    M1,
    M3,
    M5,
    M15,
    M30,
    H1,
    H2,
    H4,
    H6,
    H8,
    H12,
    D1,
    D3,
    W1,
    Mo1,
}

impl Interval {
    pub const ALL: [Interval; 15] = [
        Interval::M1,
        Interval::M3,
        Interval::M5,
        Interval::M15,
        Interval::M30,
        Interval::H1,
        Interval::H2,
        Interval::H4,
        Interval::H6,
        Interval::H8,
        Interval::H12,
        Interval::D1,
        Interval::D3,
        Interval::W1,
        Interval::Mo1,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::M1 => "1m",
            Interval::M3 => "3m",
            Interval::M5 => "5m",
            Interval::M15 => "15m",
            Interval::M30 => "30m",
            Interval::H1 => "1h",
            Interval::H2 => "2h",
            Interval::H4 => "4h",
            Interval::H6 => "6h",
            Interval::H8 => "8h",
            Interval::H12 => "12h",
            Interval::D1 => "1D",
            Interval::D3 => "3D",
            Interval::W1 => "1W",
            Interval::Mo1 => "1M",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "1m" => Some(Interval::M1),
            "3m" => Some(Interval::M3),
            "5m" => Some(Interval::M5),
            "15m" => Some(Interval::M15),
            "30m" => Some(Interval::M30),
            "1h" => Some(Interval::H1),
            "2h" => Some(Interval::H2),
            "4h" => Some(Interval::H4),
            "6h" => Some(Interval::H6),
            "8h" => Some(Interval::H8),
            "12h" => Some(Interval::H12),
            "1D" => Some(Interval::D1),
            "3D" => Some(Interval::D3),
            "1W" => Some(Interval::W1),
            "1M" => Some(Interval::Mo1),
            _ => None,
        }
    }

    pub fn minutes(&self) -> i64 {
        match self {
            Interval::M1 => 1,
            Interval::M3 => 3,
            Interval::M5 => 5,
            Interval::M15 => 15,
            Interval::M30 => 30,
            Interval::H1 => 60,
            Interval::H2 => 120,
            Interval::H4 => 240,
            Interval::H6 => 360,
            Interval::H8 => 480,
            Interval::H12 => 720,
            Interval::D1 => 1440,
            Interval::D3 => 4320,
            Interval::W1 => 10080,
            Interval::Mo1 => 43200,
        }
    }

    pub fn width_ms(&self) -> i64 {
        self.minutes() * 60 * 1000
    }

    /// Start of the bucket containing `timestamp_ms`, aligned to the UNIX epoch.
    pub fn bucket_start(&self, timestamp_ms: i64) -> i64 {
        bucket_start(timestamp_ms, self.minutes())
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Epoch-aligned bucket start for a timestamp and an interval width in minutes.
///
/// Integer division truncates toward zero, which is exact for the
/// non-negative timestamps the exchange produces. Every coarser boundary
/// coincides with a one-minute boundary because all widths are whole minutes.
pub fn bucket_start(timestamp_ms: i64, interval_minutes: i64) -> i64 {
    let interval_sec = interval_minutes * 60;
    (timestamp_ms / 1000 / interval_sec) * interval_sec * 1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_start_alignment() {
        // 00:07 falls in the 00:05 bucket at 5m width
        assert_eq!(bucket_start(7 * 60_000, 5), 5 * 60_000);
        // Exact boundary maps to itself
        assert_eq!(bucket_start(300_000, 5), 300_000);
        assert_eq!(bucket_start(0, 5), 0);
        // One ms before the boundary stays in the previous bucket
        assert_eq!(bucket_start(299_999, 5), 0);
    }

    #[test]
    fn test_bucket_start_is_fixed_point() {
        for interval in Interval::ALL {
            let t = 1_700_000_000_000i64;
            let start = interval.bucket_start(t);
            assert_eq!(interval.bucket_start(start), start);
            assert!(start <= t);
            assert!(t - start < interval.width_ms());
        }
    }

    #[test]
    fn test_coarse_boundaries_are_minute_boundaries() {
        for interval in Interval::ALL {
            let start = interval.bucket_start(1_699_999_987_123);
            assert_eq!(start % 60_000, 0);
        }
    }

    #[test]
    fn test_interval_round_trip() {
        for interval in Interval::ALL {
            assert_eq!(Interval::from_str(interval.as_str()), Some(interval));
        }
        assert_eq!(Interval::from_str("7m"), None);
    }

    #[test]
    fn test_monthly_width_is_nominal() {
        assert_eq!(Interval::Mo1.minutes(), 43200);
        assert_eq!(Interval::Mo1.width_ms(), 43200 * 60 * 1000);
    }
}
