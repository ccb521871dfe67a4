use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::Parser;

const DEFAULT_MQTT_PORT: u16 = 1883;

/// Runtime configuration, read from flags or the environment.
#[derive(Parser, Debug, Clone)]
#[command(name = "wuliu-dashboard")]
#[command(about = "Live station dashboard for the Huaheng logistics line")]
pub struct Config {
    /// MQTT broker, as `mqtt://host[:port]` or `host[:port]`
    #[arg(long, env = "MQTT_BROKER", default_value = "mqtt://Mqtt.dxiot.liju.cc")]
    pub mqtt_broker: BrokerAddress,

    /// Topic the station telemetry is published on
    #[arg(long, env = "MQTT_TOPIC", default_value = "/dxiot/4q/pub/huaheng/wuliu")]
    pub mqtt_topic: String,

    #[arg(long, env = "MQTT_CLIENT_ID", default_value = "wuliu-dashboard")]
    pub mqtt_client_id: String,

    #[arg(long, env = "MQTT_KEEP_ALIVE_SECS", default_value_t = 30)]
    pub mqtt_keep_alive_secs: u64,

    /// First delay before reconnecting to the broker
    #[arg(long, env = "MQTT_RECONNECT_MIN_MS", default_value_t = 500)]
    pub mqtt_reconnect_min_ms: u64,

    /// Upper bound of the doubling reconnect delay
    #[arg(long, env = "MQTT_RECONNECT_MAX_MS", default_value_t = 30_000)]
    pub mqtt_reconnect_max_ms: u64,

    /// SQLite database file
    #[arg(long, env = "DB_PATH", default_value = "wuliu.db")]
    pub db_path: PathBuf,

    #[arg(long, env = "DB_POOL_SIZE", default_value_t = 10)]
    pub db_pool_size: usize,

    /// Timeout for acquiring a connection and for each persistence call
    #[arg(long, env = "DB_TIMEOUT_MS", default_value_t = 5_000)]
    pub db_timeout_ms: u64,

    /// Port to bind the HTTP and WebSocket server to
    #[arg(short, long, env = "PORT", default_value_t = 5000)]
    pub port: u16,

    /// Payloads buffered between the broker loop and the pipeline
    #[arg(long, env = "INGRESS_QUEUE", default_value_t = 256)]
    pub ingress_queue: usize,

    /// Updates buffered per viewer before it is considered lagging
    #[arg(long, env = "BROADCAST_CAPACITY", default_value_t = 64)]
    pub broadcast_capacity: usize,

    /// Directory of dashboard assets served at `/`
    #[arg(long, env = "STATIC_DIR")]
    pub static_dir: Option<PathBuf>,
}

impl Config {
    pub fn db_timeout(&self) -> Duration {
        Duration::from_millis(self.db_timeout_ms)
    }

    pub fn mqtt_keep_alive(&self) -> Duration {
        Duration::from_secs(self.mqtt_keep_alive_secs)
    }

    pub fn mqtt_reconnect_bounds(&self) -> (Duration, Duration) {
        let min = Duration::from_millis(self.mqtt_reconnect_min_ms.max(1));
        let max = Duration::from_millis(self.mqtt_reconnect_max_ms).max(min);
        (min, max)
    }
}

/// Host and port of the MQTT broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
}

impl FromStr for BrokerAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix("mqtt://")
            .or_else(|| s.strip_prefix("tcp://"))
            .unwrap_or(s)
            .trim_end_matches('/');
        if rest.contains("://") {
            return Err(format!("unsupported broker scheme in '{s}'"));
        }

        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse()
                    .map_err(|e| format!("invalid broker port in '{s}': {e}"))?;
                (host, port)
            }
            None => (rest, DEFAULT_MQTT_PORT),
        };
        if host.is_empty() {
            return Err(format!("missing broker host in '{s}'"));
        }
        Ok(BrokerAddress {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mqtt://{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_address_forms() {
        let addr: BrokerAddress = "mqtt://Mqtt.dxiot.liju.cc".parse().unwrap();
        assert_eq!(addr.host, "Mqtt.dxiot.liju.cc");
        assert_eq!(addr.port, 1883);

        let addr: BrokerAddress = "mqtt://10.0.0.4:1884/".parse().unwrap();
        assert_eq!(addr, BrokerAddress { host: "10.0.0.4".into(), port: 1884 });

        let addr: BrokerAddress = "localhost:2000".parse().unwrap();
        assert_eq!(addr.port, 2000);
        assert_eq!(addr.to_string(), "mqtt://localhost:2000");
    }

    #[test]
    fn test_broker_address_errors() {
        assert!("mqtt://".parse::<BrokerAddress>().is_err());
        assert!("mqtt://host:notaport".parse::<BrokerAddress>().is_err());
        assert!("ws://host:80".parse::<BrokerAddress>().is_err());
    }

    #[test]
    fn test_flags_override_defaults() {
        let config = Config::try_parse_from([
            "wuliu-dashboard",
            "--mqtt-broker",
            "broker.local:1999",
            "--db-path",
            "/tmp/test.db",
            "--port",
            "8080",
            "--db-timeout-ms",
            "250",
            "--mqtt-reconnect-min-ms",
            "100",
            "--mqtt-reconnect-max-ms",
            "50",
        ])
        .unwrap();

        assert_eq!(config.mqtt_broker.host, "broker.local");
        assert_eq!(config.port, 8080);
        assert_eq!(config.db_path, PathBuf::from("/tmp/test.db"));
        assert_eq!(config.db_timeout(), Duration::from_millis(250));
        // The upper bound is never below the lower one.
        assert_eq!(
            config.mqtt_reconnect_bounds(),
            (Duration::from_millis(100), Duration::from_millis(100))
        );
    }
}
