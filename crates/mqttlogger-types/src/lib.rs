//! Shared types for mqttlogger.
//!
//! This crate holds the pieces both the store and the service need to agree
//! on: how a measurement instant is represented, which calendar periods
//! rollups are computed for, and how sensor payloads are decoded.
//!
//! # Example
//!
//! ```
//! use mqttlogger_types::{Granularity, MeasurementTime};
//!
//! let t = MeasurementTime::from_unix(1_761_984_000)?;
//! assert_eq!(t.rfc3339(), "2025-11-01T08:00:00Z");
//! assert_eq!("month".parse::<Granularity>()?, Granularity::Month);
//! # Ok::<(), mqttlogger_types::ParseError>(())
//! ```

pub mod error;
pub mod messages;
pub mod types;

pub use error::{ParseError, ParseResult};
pub use messages::{
    SolarChannel, SolarPayload, TasmotaMessage, WattwaechterMessage, parse_solar_topic,
    tasmota_device_id,
};
pub use types::{
    EnergyReading, Granularity, MeasurementTime, PlugReading, SolarMeta, SolarReading,
};

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use time::OffsetDateTime;

    proptest! {
        #[test]
        fn measurement_time_string_matches_epoch(secs in 1i64..4_102_444_800i64) {
            let t = MeasurementTime::from_unix(secs).unwrap();
            let parsed = OffsetDateTime::parse(
                t.rfc3339(),
                &time::format_description::well_known::Rfc3339,
            )
            .unwrap();
            prop_assert_eq!(parsed.unix_timestamp(), t.unix());
        }

        #[test]
        fn day_key_is_prefix_of_month_key(secs in 1i64..4_102_444_800i64) {
            let at = OffsetDateTime::from_unix_timestamp(secs).unwrap();
            let day = Granularity::Day.period_key(at);
            let month = Granularity::Month.period_key(at);
            let year = Granularity::Year.period_key(at);
            prop_assert!(day.starts_with(&month));
            prop_assert!(month.starts_with(&year));
        }

        #[test]
        fn solar_topic_parsing_never_panics(topic in "solar(/[a-z0-9_]{0,8}){0,5}") {
            let _ = parse_solar_topic(&topic);
        }
    }
}
