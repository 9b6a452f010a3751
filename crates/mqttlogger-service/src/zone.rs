//! Time zone for device wall-clock times and the daily compaction.
//!
//! Meters report times without an offset, and the compaction time is a
//! wall-clock `HH:MM`. Both are read in the zone named by `[time] timezone`,
//! or in the host's local zone when none is configured.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDateTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use time::{OffsetDateTime, UtcOffset};

use crate::scheduler::Schedule;

/// The zone wall-clock times are interpreted in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Zone {
    /// The host's local zone.
    #[default]
    Local,
    /// An IANA zone such as `Europe/Berlin`.
    Named(Tz),
}

impl Zone {
    /// Parse an IANA zone name.
    pub fn parse(name: &str) -> Result<Self, String> {
        name.trim()
            .parse::<Tz>()
            .map(Zone::Named)
            .map_err(|_| format!("unknown time zone '{}'", name))
    }

    /// Resolve a wall-clock time in this zone.
    ///
    /// Ambiguous times (the repeated hour at the end of DST) resolve to the
    /// earlier instant. Times inside a DST gap do not exist and return `None`.
    pub fn from_local(&self, naive: &NaiveDateTime) -> Option<OffsetDateTime> {
        match self {
            Zone::Local => to_offset_date_time(&Local.from_local_datetime(naive).earliest()?),
            Zone::Named(tz) => to_offset_date_time(&tz.from_local_datetime(naive).earliest()?),
        }
    }

    /// The same instant, carrying this zone's offset at that instant.
    pub fn to_local(&self, at: OffsetDateTime) -> OffsetDateTime {
        let Some(utc) = DateTime::<Utc>::from_timestamp(at.unix_timestamp(), at.nanosecond())
        else {
            return at;
        };
        let seconds = match self {
            Zone::Local => utc.with_timezone(&Local).offset().fix().local_minus_utc(),
            Zone::Named(tz) => utc.with_timezone(tz).offset().fix().local_minus_utc(),
        };
        UtcOffset::from_whole_seconds(seconds)
            .map(|offset| at.to_offset(offset))
            .unwrap_or(at)
    }

    /// How long to sleep from now until `schedule` is next due in this zone.
    pub fn delay_until(&self, schedule: &Schedule) -> Duration {
        match self {
            Zone::Local => schedule.delay_from(Local::now()),
            Zone::Named(tz) => schedule.delay_from(Utc::now().with_timezone(tz)),
        }
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Zone::Local => f.write_str("local"),
            Zone::Named(tz) => f.write_str(tz.name()),
        }
    }
}

fn to_offset_date_time<Z: TimeZone>(at: &DateTime<Z>) -> Option<OffsetDateTime> {
    let offset = UtcOffset::from_whole_seconds(at.offset().fix().local_minus_utc()).ok()?;
    OffsetDateTime::from_unix_timestamp(at.timestamp())
        .ok()
        .map(|t| t.to_offset(offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use time::macros::datetime;

    fn naive(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    #[test]
    fn test_parse_zone() {
        assert_eq!(
            Zone::parse("Europe/Berlin"),
            Ok(Zone::Named(chrono_tz::Europe::Berlin))
        );
        assert_eq!(Zone::parse(" UTC "), Ok(Zone::Named(chrono_tz::UTC)));
        assert!(Zone::parse("Mars/Olympus").is_err());
        assert!(Zone::parse("").is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(Zone::Local.to_string(), "local");
        assert_eq!(Zone::Named(chrono_tz::Europe::Berlin).to_string(), "Europe/Berlin");
    }

    #[test]
    fn test_from_local_follows_dst() {
        let berlin = Zone::Named(chrono_tz::Europe::Berlin);

        let winter = berlin.from_local(&naive(2025, 11, 1, 9, 0)).unwrap();
        assert_eq!(winter.unix_timestamp(), 1_761_984_000);
        assert_eq!(winter.offset(), UtcOffset::from_hms(1, 0, 0).unwrap());

        let summer = berlin.from_local(&naive(2025, 7, 1, 12, 0)).unwrap();
        assert_eq!(summer, datetime!(2025-07-01 10:00 UTC));
        assert_eq!(summer.offset(), UtcOffset::from_hms(2, 0, 0).unwrap());
    }

    #[test]
    fn test_from_local_gap_and_overlap() {
        let berlin = Zone::Named(chrono_tz::Europe::Berlin);

        // 02:30 does not exist on the spring-forward day
        assert!(berlin.from_local(&naive(2025, 3, 30, 2, 30)).is_none());

        // 02:30 happens twice on the fall-back day; the first one wins
        let repeated = berlin.from_local(&naive(2025, 10, 26, 2, 30)).unwrap();
        assert_eq!(repeated, datetime!(2025-10-26 00:30 UTC));
    }

    #[test]
    fn test_to_local_keeps_instant() {
        let berlin = Zone::Named(chrono_tz::Europe::Berlin);
        let at = berlin.to_local(datetime!(2025-11-01 12:00 UTC));
        assert_eq!(at, datetime!(2025-11-01 12:00 UTC));
        assert_eq!(at.offset(), UtcOffset::from_hms(1, 0, 0).unwrap());

        let utc = Zone::Named(chrono_tz::UTC).to_local(datetime!(2025-11-01 12:00 +01:00));
        assert_eq!(utc.offset(), UtcOffset::UTC);
    }

    #[test]
    fn test_delay_until_interval_ignores_zone() {
        let schedule = Schedule::Interval(Duration::from_secs(600));
        assert_eq!(Zone::Local.delay_until(&schedule), Duration::from_secs(600));
        assert_eq!(
            Zone::Named(chrono_tz::Asia::Tokyo).delay_until(&schedule),
            Duration::from_secs(600)
        );
    }

    #[test]
    fn test_delay_until_daily_is_within_a_day() {
        let schedule = Schedule::Daily { hour: 3, minute: 0 };
        let delay = Zone::Named(chrono_tz::America::New_York).delay_until(&schedule);
        assert!(delay <= Duration::from_secs(25 * 3600));
    }
}
