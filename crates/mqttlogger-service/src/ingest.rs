//! MQTT ingestion of sensor telemetry.
//!
//! The subscriber connects to the configured broker, subscribes to the
//! topics of every enabled sensor family and hands each publish to a writer
//! task that decodes it and inserts the raw row.
//!
//! # Topics
//!
//! - `[topics] wattwaechter` - energy meter JSON with an `E320` object
//! - `[topics] tasmota` - smart plug JSON with an `ENERGY` object, when
//!   `features.tasmota_power` is set; the device is the second topic segment
//! - `solar/#` - one plain value per topic, when `features.solar` is set
//!
//! # Reconnection
//!
//! The client reconnects on its own after a connection error. Subscriptions
//! are issued again on every ConnAck, so a broker restart without persistent
//! sessions does not silently stop ingestion.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use mqttlogger_store::Store;
use mqttlogger_types::{
    EnergyReading, MeasurementTime, ParseError, PlugReading, SolarMeta, SolarPayload,
    SolarReading, TasmotaMessage, WattwaechterMessage, parse_solar_topic, tasmota_device_id,
};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::config::{BrokerConfig, Config};
use crate::state::AppState;
use crate::zone::Zone;

/// Topic filter for solar gateway values.
pub const SOLAR_FILTER: &str = "solar/#";

/// Publishes buffered between the MQTT event loop and the writer.
const QUEUE_CAPACITY: usize = 1024;

/// Delay before polling again after a connection error.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Sensor family a topic belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    Energy,
    Plug,
    Solar,
}

/// The topic filters of the enabled sensor families, in routing order.
#[derive(Debug, Clone)]
pub struct Subscriptions {
    filters: Vec<(String, SensorKind)>,
}

impl Subscriptions {
    /// Build the subscription list from configuration.
    pub fn from_config(config: &Config) -> Self {
        let mut filters = vec![(config.topics.wattwaechter.clone(), SensorKind::Energy)];
        if config.features.tasmota_power {
            filters.push((config.topics.tasmota.clone(), SensorKind::Plug));
        }
        if config.features.solar {
            filters.push((SOLAR_FILTER.to_string(), SensorKind::Solar));
        }
        Self { filters }
    }

    /// The filters to subscribe to.
    pub fn filters(&self) -> impl Iterator<Item = &str> {
        self.filters.iter().map(|(filter, _)| filter.as_str())
    }

    /// The sensor family of a received topic. The first matching filter wins.
    pub fn route(&self, topic: &str) -> Option<SensorKind> {
        self.filters
            .iter()
            .find(|(filter, _)| topic_matches(filter, topic))
            .map(|(_, kind)| *kind)
    }
}

/// What a message turned into.
#[derive(Debug, Clone, PartialEq)]
pub enum Ingested {
    Energy,
    Plug { device_id: String },
    SolarValue,
    SolarMeta,
    /// Topic intentionally not stored (solar gateway status).
    Ignored,
}

/// Errors while turning a publish into a row.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Failed to decode message: {0}")]
    Parse(#[from] ParseError),
    #[error("Failed to store message: {0}")]
    Store(#[from] mqttlogger_store::Error),
}

/// Parse an MQTT broker URL into (host, port, use_tls).
pub fn parse_broker_url(url: &str) -> Result<(String, u16, bool), String> {
    let (scheme, rest) = if let Some(stripped) = url.strip_prefix("mqtt://") {
        ("mqtt", stripped)
    } else if let Some(stripped) = url.strip_prefix("mqtts://") {
        ("mqtts", stripped)
    } else if let Some(stripped) = url.strip_prefix("tcp://") {
        ("mqtt", stripped)
    } else if let Some(stripped) = url.strip_prefix("ssl://") {
        ("mqtts", stripped)
    } else {
        return Err("Invalid scheme: URL must start with mqtt:// or mqtts://".to_string());
    };

    let use_tls = scheme == "mqtts";
    let default_port = if use_tls { 8883 } else { 1883 };

    let (host, port) = if let Some((h, p)) = rest.rsplit_once(':') {
        let port = p
            .parse::<u16>()
            .map_err(|_| format!("Invalid port: {}", p))?;
        (h.to_string(), port)
    } else {
        (rest.to_string(), default_port)
    };

    if host.is_empty() {
        return Err("Host cannot be empty".to_string());
    }

    Ok((host, port, use_tls))
}

/// Check that a subscription filter is well formed.
pub fn validate_filter(filter: &str) -> Result<(), String> {
    if filter.is_empty() {
        return Err("filter cannot be empty".to_string());
    }

    let levels: Vec<&str> = filter.split('/').collect();
    for (i, level) in levels.iter().enumerate() {
        if level.contains('#') && (*level != "#" || i != levels.len() - 1) {
            return Err("'#' must be the last level on its own".to_string());
        }
        if level.contains('+') && *level != "+" {
            return Err("'+' must occupy a whole level".to_string());
        }
    }

    Ok(())
}

/// Whether `topic` matches the subscription `filter` (`+` and `#` wildcards).
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Interpret a device-reported time.
///
/// RFC 3339 strings carry their own offset. Naive `YYYY-MM-DDTHH:MM:SS`
/// strings are wall-clock times in `zone`. Returns `None` when neither form
/// parses.
pub fn parse_message_time(raw: &str, zone: &Zone) -> Option<OffsetDateTime> {
    let raw = raw.trim();

    if let Ok(at) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Some(at);
    }

    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S").ok()?;
    zone.from_local(&naive)
}

/// Measurement time for a message, falling back to `now` with a warning.
fn message_time(raw: &str, now: OffsetDateTime, zone: &Zone) -> Result<MeasurementTime, ParseError> {
    match parse_message_time(raw, zone) {
        Some(at) => MeasurementTime::new(at),
        None => {
            warn!("Unparseable message time '{}', using receive time", raw);
            MeasurementTime::new(zone.to_local(now))
        }
    }
}

/// Decode one publish and insert it.
///
/// `now` is the receive time: solar values are stamped with it, and it
/// replaces unparseable device times. Both are rendered in `zone`.
pub fn ingest_message(
    store: &Store,
    kind: SensorKind,
    topic: &str,
    payload: &[u8],
    now: OffsetDateTime,
    zone: &Zone,
) -> Result<Ingested, IngestError> {
    match kind {
        SensorKind::Energy => {
            let msg = WattwaechterMessage::from_json(payload)?;
            store.insert_energy(&EnergyReading {
                time: message_time(&msg.time, now, zone)?,
                e_in: msg.e320.e_in,
                e_out: msg.e320.e_out,
                power: msg.e320.power.round() as i64,
            })?;
            Ok(Ingested::Energy)
        }
        SensorKind::Plug => {
            let device_id = tasmota_device_id(topic)?.to_string();
            let msg = TasmotaMessage::from_json(payload)?;
            store.insert_plug(&PlugReading {
                device_id: device_id.clone(),
                time: message_time(&msg.time, now, zone)?,
                power: msg.energy.power.round() as i64,
            })?;
            Ok(Ingested::Plug { device_id })
        }
        SensorKind::Solar => {
            let Some(channel) = parse_solar_topic(topic)? else {
                return Ok(Ingested::Ignored);
            };
            let text = String::from_utf8_lossy(payload);
            match SolarPayload::parse(&text) {
                SolarPayload::Value(value) => {
                    store.insert_solar(&SolarReading {
                        device_id: channel.device_id,
                        channel: channel.channel,
                        metric: channel.metric,
                        time: MeasurementTime::new(zone.to_local(now))?,
                        value,
                    })?;
                    Ok(Ingested::SolarValue)
                }
                SolarPayload::Text(value) => {
                    store.upsert_solar_meta(&SolarMeta {
                        device_id: channel.device_id,
                        channel: channel.channel,
                        key: channel.metric,
                        value,
                    })?;
                    Ok(Ingested::SolarMeta)
                }
            }
        }
    }
}

fn qos_from(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    }
}

fn mqtt_options(config: &BrokerConfig) -> Result<MqttOptions, String> {
    let (host, port, use_tls) = parse_broker_url(&config.host)?;

    let mut options = MqttOptions::new(&config.client_id, host, port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive.max(5)));

    if let Some(username) = &config.username {
        options.set_credentials(username, config.password.as_deref().unwrap_or_default());
    }

    if use_tls {
        options.set_transport(rumqttc::Transport::Tls(rumqttc::TlsConfiguration::Native));
    }

    Ok(options)
}

/// MQTT subscriber that writes sensor telemetry into the store.
pub struct Ingestor {
    state: Arc<AppState>,
}

impl Ingestor {
    /// Create a new ingestor.
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Start the subscriber and the writer as tracked background tasks.
    ///
    /// Returns immediately; ingestion happens in the background until
    /// shutdown.
    pub fn start(&self) {
        let subscriptions = Subscriptions::from_config(&self.state.config);
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);

        let state = Arc::clone(&self.state);
        let routes = subscriptions.clone();
        self.state.tasks.spawn(async move {
            run_writer(state, routes, rx).await;
        });

        let state = Arc::clone(&self.state);
        let stop_rx = self.state.shutdown.subscribe_stop();
        self.state.tasks.spawn(async move {
            run_subscriber(state, subscriptions, tx, stop_rx).await;
        });
    }
}

/// Poll the MQTT event loop and forward publishes to the writer.
async fn run_subscriber(
    state: Arc<AppState>,
    subscriptions: Subscriptions,
    tx: mpsc::Sender<(String, Vec<u8>)>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let broker = &state.config.broker;
    let options = match mqtt_options(broker) {
        Ok(options) => options,
        Err(e) => {
            error!("Invalid MQTT broker URL: {}", e);
            return;
        }
    };
    let qos = qos_from(broker.qos);

    info!("Connecting to MQTT broker {}", broker.host);
    let (client, mut eventloop) = AsyncClient::new(options, 100);

    loop {
        tokio::select! {
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    info!("MQTT connected: {:?}", ack.code);
                    for filter in subscriptions.filters() {
                        match client.try_subscribe(filter, qos) {
                            Ok(()) => info!("Subscribed to {}", filter),
                            Err(e) => warn!("Failed to subscribe to {}: {}", filter, e),
                        }
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    debug!("Received {} ({} bytes)", publish.topic, publish.payload.len());
                    if let Err(e) = tx.try_send((publish.topic.clone(), publish.payload.to_vec())) {
                        warn!("Dropping message on {}: {}", publish.topic, e);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("MQTT connection error: {}. Reconnecting...", e);
                    tokio::select! {
                        _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                        _ = stop_rx.changed() => {}
                    }
                }
            },
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
        }

        if *stop_rx.borrow() {
            break;
        }
    }

    if let Err(e) = client.try_disconnect() {
        debug!("Error disconnecting MQTT client: {}", e);
    }

    info!("MQTT subscriber stopped");
}

/// Decode and store publishes until the subscriber goes away.
async fn run_writer(
    state: Arc<AppState>,
    subscriptions: Subscriptions,
    mut rx: mpsc::Receiver<(String, Vec<u8>)>,
) {
    let verbose = state.config.broker.debug;
    let zone = state.config.time.zone();

    while let Some((topic, payload)) = rx.recv().await {
        let Some(kind) = subscriptions.route(&topic) else {
            debug!("No handler for topic {}", topic);
            continue;
        };

        let now = OffsetDateTime::now_utc();
        let now = now.replace_nanosecond(0).unwrap_or(now);
        let result = {
            let store = state.store.lock().await;
            ingest_message(&store, kind, &topic, &payload, now, &zone)
        };

        match result {
            Ok(ingested) if verbose => info!("Stored {:?} from {}", ingested, topic),
            Ok(ingested) => debug!("Stored {:?} from {}", ingested, topic),
            Err(e) => warn!("Failed to ingest message on {}: {}", topic, e),
        }
    }

    info!("MQTT writer stopped");
}
