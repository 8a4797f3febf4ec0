//! Command-line and environment configuration.

use crate::publisher::{BrokerTarget, Credentials, DEFAULT_PORT, DEFAULT_TOPIC_PREFIX};
use crate::scanner::DEFAULT_DEVICE_PREFIX;
use clap::Parser;
use std::time::Duration;
use uuid::Uuid;

/// Prefix of generated MQTT client identifiers.
pub const CLIENT_ID_PREFIX: &str = "govee-ble-mqtt";

/// Bridge configuration. Every option can also be set from the environment.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// MQTT broker host name or address
    #[arg(long, env = "MQTT_HOST", default_value = "localhost")]
    pub mqtt_host: String,

    /// MQTT broker port
    #[arg(long, env = "MQTT_PORT", default_value_t = DEFAULT_PORT)]
    pub mqtt_port: u16,

    /// MQTT username
    #[arg(long, env = "MQTT_USERNAME")]
    pub mqtt_username: Option<String>,

    /// MQTT password, used together with the username
    #[arg(long, env = "MQTT_PASSWORD", hide_env_values = true)]
    pub mqtt_password: Option<String>,

    /// Readings are published to <TOPIC_PREFIX>/<device name>
    #[arg(long, env = "MQTT_TOPIC_PREFIX", default_value = DEFAULT_TOPIC_PREFIX)]
    pub topic_prefix: String,

    /// MQTT client identifier [default: govee-ble-mqtt-<random>]
    #[arg(long, env = "MQTT_CLIENT_ID")]
    pub client_id: Option<String>,

    /// Only advertisements whose name starts with this prefix are decoded
    #[arg(long, env = "DEVICE_PREFIX", default_value = DEFAULT_DEVICE_PREFIX)]
    pub device_prefix: String,

    /// MQTT keep-alive interval.
    /// Accepts duration with suffix: 30s, 1m, 1500ms.
    /// Without suffix, value is interpreted as seconds.
    #[arg(long, env = "MQTT_KEEP_ALIVE", default_value = "30s", value_parser = parse_keep_alive)]
    pub keep_alive: Duration,

    /// Verbose output, log filtered and undecodable advertisements
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

impl Options {
    /// Broker settings for the publisher.
    ///
    /// A password without a username is ignored.
    pub fn broker_target(&self) -> BrokerTarget {
        let credentials = self.mqtt_username.as_ref().map(|username| Credentials {
            username: username.clone(),
            password: self.mqtt_password.clone().unwrap_or_default(),
        });

        BrokerTarget {
            host: self.mqtt_host.clone(),
            port: self.mqtt_port,
            credentials,
            topic_prefix: self.topic_prefix.trim_end_matches('/').to_string(),
            client_id: self.client_id.clone().unwrap_or_else(generate_client_id),
            keep_alive: self.keep_alive,
        }
    }
}

/// `govee-ble-mqtt-` followed by eight random hex digits.
pub fn generate_client_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{CLIENT_ID_PREFIX}-{}", &suffix[..8])
}

/// Parse a duration such as `30`, `30s`, `2m`, `1h` or `500ms`.
pub fn parse_duration(src: &str) -> Result<Duration, String> {
    let src = src.trim();
    if src.is_empty() {
        return Err("empty duration string".to_string());
    }

    // "ms" must be tried before "m" and "s"
    const UNITS: [(&str, u64); 4] = [("ms", 1), ("h", 3_600_000), ("m", 60_000), ("s", 1_000)];
    let (number, millis_per_unit) = UNITS
        .iter()
        .find_map(|(suffix, scale)| src.strip_suffix(suffix).map(|n| (n.trim(), *scale)))
        .unwrap_or((src, 1_000));

    let value: u64 = number
        .parse()
        .map_err(|_| format!("invalid duration: {src}"))?;
    value
        .checked_mul(millis_per_unit)
        .map(Duration::from_millis)
        .ok_or_else(|| format!("duration out of range: {src}"))
}

/// Keep-alive must be at least one second for the MQTT client.
fn parse_keep_alive(src: &str) -> Result<Duration, String> {
    let keep_alive = parse_duration(src)?;
    if keep_alive < Duration::from_secs(1) {
        return Err(format!("keep-alive must be at least 1s, got {src}"));
    }
    Ok(keep_alive)
}
