//! MQTT payloads published by the supported sensor families.
//!
//! - Wattwächter energy meters publish JSON with an `E320` object.
//! - Tasmota smart plugs publish their `SENSOR` telemetry with an `ENERGY` object.
//! - OpenDTU-style solar gateways publish one plain value per topic below `solar/`.
//!
//! Timestamps in the JSON payloads are passed through as strings; turning them
//! into instants depends on the local time zone and is left to the caller.

use serde::Deserialize;

use crate::error::{ParseError, ParseResult};

/// Energy meter telemetry.
///
/// ```
/// use mqttlogger_types::WattwaechterMessage;
///
/// let msg = WattwaechterMessage::from_json(
///     br#"{"Time":"2025-11-01T08:00:00","E320":{"E_in":100.5,"E_out":2.0,"Power":420}}"#,
/// )?;
/// assert_eq!(msg.e320.e_in, 100.5);
/// # Ok::<(), mqttlogger_types::ParseError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WattwaechterMessage {
    /// Time as reported by the device.
    #[serde(rename = "Time")]
    pub time: String,
    /// Meter values.
    #[serde(rename = "E320")]
    pub e320: E320,
}

/// Counter and power values of an E320 meter.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct E320 {
    #[serde(rename = "E_in", default)]
    pub e_in: f64,
    #[serde(rename = "E_out", default)]
    pub e_out: f64,
    #[serde(rename = "Power", default)]
    pub power: f64,
    #[serde(rename = "Meter_Number", default)]
    pub meter_number: Option<String>,
}

impl WattwaechterMessage {
    /// Decode a JSON payload.
    pub fn from_json(payload: &[u8]) -> ParseResult<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// Tasmota `SENSOR` telemetry, reduced to the fields we store.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TasmotaMessage {
    #[serde(rename = "Time")]
    pub time: String,
    #[serde(rename = "ENERGY")]
    pub energy: TasmotaEnergy,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TasmotaEnergy {
    #[serde(rename = "Power", default)]
    pub power: f64,
}

impl TasmotaMessage {
    /// Decode a JSON payload.
    pub fn from_json(payload: &[u8]) -> ParseResult<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// Extract the device id from a Tasmota topic such as `tele/plug-1/SENSOR`.
///
/// Tasmota's default full topic is `%prefix%/%topic%/`, so the device is the
/// second segment.
pub fn tasmota_device_id(topic: &str) -> ParseResult<&str> {
    topic
        .split('/')
        .nth(1)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ParseError::InvalidTopic(topic.to_string()))
}

/// Where a solar topic's value belongs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolarChannel {
    pub device_id: String,
    pub channel: i64,
    pub metric: String,
}

/// Map a topic below `solar/` to device, channel and metric.
///
/// Returns `Ok(None)` for gateway (`solar/dtu/...`) topics, which are not stored.
///
/// ```
/// use mqttlogger_types::parse_solar_topic;
///
/// let ch = parse_solar_topic("solar/116180214587/1/power")?.unwrap();
/// assert_eq!(ch.device_id, "116180214587");
/// assert_eq!(ch.channel, 1);
/// assert_eq!(ch.metric, "power");
/// assert!(parse_solar_topic("solar/dtu/uptime")?.is_none());
/// # Ok::<(), mqttlogger_types::ParseError>(())
/// ```
pub fn parse_solar_topic(topic: &str) -> ParseResult<Option<SolarChannel>> {
    let segments: Vec<&str> = topic.split('/').collect();
    if segments.len() < 2 || segments[1].is_empty() {
        return Err(ParseError::InvalidTopic(topic.to_string()));
    }

    let channel = match segments[1] {
        "dtu" => return Ok(None),
        "ac" | "dc" => SolarChannel {
            device_id: segments[1].to_string(),
            channel: -1,
            metric: segments[2..].join("/"),
        },
        "today_energy_sum" => SolarChannel {
            device_id: "summary".to_string(),
            channel: -1,
            metric: "today_energy_sum".to_string(),
        },
        device => {
            if segments.len() < 4 {
                return Err(ParseError::InvalidTopic(topic.to_string()));
            }
            let channel = segments[2]
                .parse::<i64>()
                .map_err(|_| ParseError::InvalidChannel(segments[2].to_string()))?;
            SolarChannel {
                device_id: device.to_string(),
                channel,
                metric: segments[3..].join("/"),
            }
        }
    };

    Ok(Some(channel))
}

/// A solar payload is either a number (stored as a reading) or free text
/// (stored as metadata).
#[derive(Debug, Clone, PartialEq)]
pub enum SolarPayload {
    Value(f64),
    Text(String),
}

impl SolarPayload {
    pub fn parse(payload: &str) -> Self {
        let trimmed = payload.trim();
        match trimmed.parse::<f64>() {
            Ok(v) if v.is_finite() => SolarPayload::Value(v),
            _ => SolarPayload::Text(trimmed.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wattwaechter_missing_fields_default_to_zero() {
        let msg = WattwaechterMessage::from_json(br#"{"Time":"x","E320":{"Power":12}}"#).unwrap();
        assert_eq!(msg.e320.e_in, 0.0);
        assert_eq!(msg.e320.power, 12.0);
        assert_eq!(msg.e320.meter_number, None);
    }

    #[test]
    fn test_wattwaechter_rejects_invalid_json() {
        assert!(WattwaechterMessage::from_json(b"not json").is_err());
        assert!(WattwaechterMessage::from_json(br#"{"Time":"x"}"#).is_err());
    }

    #[test]
    fn test_tasmota_message() {
        let msg = TasmotaMessage::from_json(
            br#"{"Time":"2025-11-01T08:00:00","ENERGY":{"Total":1.2,"Power":37}}"#,
        )
        .unwrap();
        assert_eq!(msg.time, "2025-11-01T08:00:00");
        assert_eq!(msg.energy.power, 37.0);
    }

    #[test]
    fn test_tasmota_device_id() {
        assert_eq!(tasmota_device_id("tele/plug-1/SENSOR").unwrap(), "plug-1");
        assert!(tasmota_device_id("tele").is_err());
        assert!(tasmota_device_id("tele//SENSOR").is_err());
    }

    #[test]
    fn test_solar_topic_ac_dc() {
        let ch = parse_solar_topic("solar/ac/power").unwrap().unwrap();
        assert_eq!(ch.device_id, "ac");
        assert_eq!(ch.channel, -1);
        assert_eq!(ch.metric, "power");

        let ch = parse_solar_topic("solar/dc/irradiation/total").unwrap().unwrap();
        assert_eq!(ch.device_id, "dc");
        assert_eq!(ch.metric, "irradiation/total");
    }

    #[test]
    fn test_solar_topic_summary() {
        let ch = parse_solar_topic("solar/today_energy_sum").unwrap().unwrap();
        assert_eq!(ch.device_id, "summary");
        assert_eq!(ch.channel, -1);
        assert_eq!(ch.metric, "today_energy_sum");
    }

    #[test]
    fn test_solar_topic_invalid() {
        assert!(parse_solar_topic("solar").is_err());
        assert!(parse_solar_topic("solar/1161/power").is_err());
        assert!(matches!(
            parse_solar_topic("solar/1161/x/power"),
            Err(ParseError::InvalidChannel(_))
        ));
    }

    #[test]
    fn test_solar_payload() {
        assert_eq!(SolarPayload::parse(" 12.5 "), SolarPayload::Value(12.5));
        assert_eq!(
            SolarPayload::parse("HM-800"),
            SolarPayload::Text("HM-800".to_string())
        );
        assert_eq!(SolarPayload::parse("NaN"), SolarPayload::Text("NaN".to_string()));
    }
}

/// Decoders must reject arbitrary input without panicking.
#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn wattwaechter_never_panics(data: Vec<u8>) {
            let _ = WattwaechterMessage::from_json(&data);
        }

        #[test]
        fn tasmota_never_panics(data: Vec<u8>) {
            let _ = TasmotaMessage::from_json(&data);
        }

        /// Parsed device channels are always numeric segments.
        #[test]
        fn solar_device_channel_is_parsed(device in "[0-9]{6,12}", channel in 0i64..16, metric in "[a-z]{1,10}") {
            let topic = format!("solar/{}/{}/{}", device, channel, metric);
            let parsed = parse_solar_topic(&topic).unwrap().unwrap();
            prop_assert_eq!(parsed.device_id, device);
            prop_assert_eq!(parsed.channel, channel);
            prop_assert_eq!(parsed.metric, metric);
        }

        /// Finite numbers parse as values.
        #[test]
        fn solar_payload_numbers_are_values(v in -1.0e9f64..1.0e9) {
            prop_assert_eq!(SolarPayload::parse(&v.to_string()), SolarPayload::Value(v));
        }
    }
}
