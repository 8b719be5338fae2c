// Configuration module for kafka_core
//
// Clients are configured through a string property map using the librdkafka
// property names (`ClientConfig`). The producer and consumer each parse the
// properties they understand into a typed, range-checked struct.
//
// Every numeric property is validated against the DEFAULT_* / MIN_* / MAX_*
// constants in `kafka::constants`. Unknown property names are rejected so a
// typo never silently falls back to a default.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use crate::kafka::constants::{
    DEFAULT_ASSIGNMENT_STRATEGIES, DEFAULT_AUTO_COMMIT_INTERVAL_MS, DEFAULT_BATCH_NUM_MESSAGES,
    DEFAULT_CLIENT_ID, DEFAULT_FETCH_MAX_BYTES, DEFAULT_FETCH_WAIT_MAX_MS,
    DEFAULT_HEARTBEAT_INTERVAL_MS, DEFAULT_LINGER_MS, DEFAULT_MESSAGE_MAX_BYTES,
    DEFAULT_MESSAGE_TIMEOUT_MS, DEFAULT_METADATA_REFRESH_INTERVAL_MS, DEFAULT_QUEUE_MAX_KBYTES,
    DEFAULT_QUEUE_MAX_MESSAGES, DEFAULT_RETRY_BACKOFF_MS, DEFAULT_SESSION_TIMEOUT_MS,
    MAX_AUTO_COMMIT_INTERVAL_MS, MAX_BATCH_NUM_MESSAGES, MAX_FETCH_MAX_BYTES,
    MAX_FETCH_WAIT_MAX_MS, MAX_HEARTBEAT_INTERVAL_MS, MAX_LINGER_MS, MAX_MESSAGE_MAX_BYTES,
    MAX_MESSAGE_TIMEOUT_MS, MAX_METADATA_REFRESH_INTERVAL_MS, MAX_QUEUE_MAX_KBYTES,
    MAX_QUEUE_MAX_MESSAGES, MAX_RETRY_BACKOFF_MS, MAX_SESSION_TIMEOUT_MS, MIN_BATCH_NUM_MESSAGES,
    MIN_FETCH_MAX_BYTES, MIN_HEARTBEAT_INTERVAL_MS, MIN_MESSAGE_MAX_BYTES,
    MIN_MESSAGE_TIMEOUT_MS, MIN_QUEUE_MAX_KBYTES, MIN_QUEUE_MAX_MESSAGES,
    MIN_SESSION_TIMEOUT_MS, STRATEGY_RANGE, STRATEGY_ROUNDROBIN,
};
use crate::kafka::error::{KafkaError, Result};

/// Every property name `ClientConfig` accepts
const KNOWN_PROPERTIES: &[&str] = &[
    "bootstrap.servers",
    "client.id",
    // Producer
    "queue.buffering.max.messages",
    "queue.buffering.max.kbytes",
    "linger.ms",
    "batch.num.messages",
    "message.max.bytes",
    "message.timeout.ms",
    // Consumer
    "group.id",
    "auto.offset.reset",
    "enable.auto.commit",
    "auto.commit.interval.ms",
    "session.timeout.ms",
    "heartbeat.interval.ms",
    "fetch.wait.max.ms",
    "fetch.max.bytes",
    "retry.backoff.ms",
    "partition.assignment.strategy",
    // Shared
    "topic.metadata.refresh.interval.ms",
];

/// String property map in librdkafka naming
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientConfig {
    properties: BTreeMap<String, String>,
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a property, replacing any previous value
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.properties.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Reject property names no client understands
    fn check_known(&self) -> Result<()> {
        match self
            .properties
            .keys()
            .find(|key| !KNOWN_PROPERTIES.contains(&key.as_str()))
        {
            Some(key) => Err(KafkaError::InvalidConfig(format!(
                "unknown property \"{}\"",
                key
            ))),
            None => Ok(()),
        }
    }

    fn parse_bounded<T>(&self, key: &str, default: T, min: T, max: T) -> Result<T>
    where
        T: FromStr + PartialOrd + Display + Copy,
    {
        let Some(raw) = self.get(key) else {
            return Ok(default);
        };
        let value: T = raw.trim().parse().map_err(|_| {
            KafkaError::InvalidConfig(format!("{}: \"{}\" is not a valid number", key, raw))
        })?;
        if value < min || value > max {
            return Err(KafkaError::InvalidConfig(format!(
                "{}: {} is outside the range {}..={}",
                key, value, min, max
            )));
        }
        Ok(value)
    }

    fn parse_millis(&self, key: &str, default: u64, min: u64, max: u64) -> Result<Duration> {
        self.parse_bounded(key, default, min, max)
            .map(Duration::from_millis)
    }

    fn parse_bool(&self, key: &str, default: bool) -> Result<bool> {
        match self.get(key).map(|v| v.trim().to_lowercase()) {
            None => Ok(default),
            Some(v) if v == "true" || v == "1" => Ok(true),
            Some(v) if v == "false" || v == "0" => Ok(false),
            Some(v) => Err(KafkaError::InvalidConfig(format!(
                "{}: \"{}\" is not a boolean",
                key, v
            ))),
        }
    }

    fn client_id(&self) -> String {
        self.get("client.id")
            .filter(|id| !id.is_empty())
            .unwrap_or(DEFAULT_CLIENT_ID)
            .to_string()
    }

    fn bootstrap_servers(&self) -> Vec<String> {
        self.get("bootstrap.servers")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ClientConfig {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut config = ClientConfig::new();
        for (key, value) in iter {
            config.set(key, value);
        }
        config
    }
}

/// Where a consumer starts when a partition has no committed offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OffsetReset {
    /// Start from the oldest retained message
    Earliest,
    /// Start from the next message produced
    #[default]
    Latest,
}

impl OffsetReset {
    /// Parse an auto.offset.reset value (librdkafka aliases included)
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "earliest" | "smallest" | "beginning" => Some(OffsetReset::Earliest),
            "latest" | "largest" | "end" => Some(OffsetReset::Latest),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OffsetReset::Earliest => "earliest",
            OffsetReset::Latest => "latest",
        }
    }
}

/// Typed producer settings
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    pub bootstrap_servers: Vec<String>,
    pub client_id: String,
    /// Bound on messages queued, in flight, or awaiting their report
    pub queue_max_messages: usize,
    /// Bound on the total size of those messages, in bytes
    pub queue_max_bytes: usize,
    /// How long the oldest queued message may wait for a fuller batch
    pub linger: Duration,
    /// Messages taken from the queue per delivery round
    pub batch_num_messages: usize,
    /// Largest value accepted by `enqueue`
    pub message_max_bytes: usize,
    /// Delivery deadline, measured from enqueue
    pub message_timeout: Duration,
    /// How long cached topic metadata stays valid
    pub metadata_max_age: Duration,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: Vec::new(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            queue_max_messages: DEFAULT_QUEUE_MAX_MESSAGES,
            queue_max_bytes: DEFAULT_QUEUE_MAX_KBYTES * 1024,
            linger: Duration::from_millis(DEFAULT_LINGER_MS),
            batch_num_messages: DEFAULT_BATCH_NUM_MESSAGES,
            message_max_bytes: DEFAULT_MESSAGE_MAX_BYTES,
            message_timeout: Duration::from_millis(DEFAULT_MESSAGE_TIMEOUT_MS),
            metadata_max_age: Duration::from_millis(DEFAULT_METADATA_REFRESH_INTERVAL_MS),
        }
    }
}

impl ProducerConfig {
    /// Parse and validate producer properties; consumer-only properties are ignored
    pub fn from_client_config(config: &ClientConfig) -> Result<Self> {
        config.check_known()?;
        Ok(Self {
            bootstrap_servers: config.bootstrap_servers(),
            client_id: config.client_id(),
            queue_max_messages: config.parse_bounded(
                "queue.buffering.max.messages",
                DEFAULT_QUEUE_MAX_MESSAGES,
                MIN_QUEUE_MAX_MESSAGES,
                MAX_QUEUE_MAX_MESSAGES,
            )?,
            queue_max_bytes: config
                .parse_bounded(
                    "queue.buffering.max.kbytes",
                    DEFAULT_QUEUE_MAX_KBYTES,
                    MIN_QUEUE_MAX_KBYTES,
                    MAX_QUEUE_MAX_KBYTES,
                )?
                .saturating_mul(1024),
            linger: config.parse_millis("linger.ms", DEFAULT_LINGER_MS, 0, MAX_LINGER_MS)?,
            batch_num_messages: config.parse_bounded(
                "batch.num.messages",
                DEFAULT_BATCH_NUM_MESSAGES,
                MIN_BATCH_NUM_MESSAGES,
                MAX_BATCH_NUM_MESSAGES,
            )?,
            message_max_bytes: config.parse_bounded(
                "message.max.bytes",
                DEFAULT_MESSAGE_MAX_BYTES,
                MIN_MESSAGE_MAX_BYTES,
                MAX_MESSAGE_MAX_BYTES,
            )?,
            message_timeout: config.parse_millis(
                "message.timeout.ms",
                DEFAULT_MESSAGE_TIMEOUT_MS,
                MIN_MESSAGE_TIMEOUT_MS,
                MAX_MESSAGE_TIMEOUT_MS,
            )?,
            metadata_max_age: config.parse_millis(
                "topic.metadata.refresh.interval.ms",
                DEFAULT_METADATA_REFRESH_INTERVAL_MS,
                0,
                MAX_METADATA_REFRESH_INTERVAL_MS,
            )?,
        })
    }
}

/// Typed consumer settings
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub bootstrap_servers: Vec<String>,
    pub client_id: String,
    pub group_id: String,
    pub auto_offset_reset: OffsetReset,
    pub enable_auto_commit: bool,
    pub auto_commit_interval: Duration,
    pub session_timeout: Duration,
    pub heartbeat_interval: Duration,
    /// Upper bound on one long-poll fetch
    pub fetch_wait_max: Duration,
    pub fetch_max_bytes: usize,
    /// Pause after a failed group or fetch request
    pub retry_backoff: Duration,
    /// Advertised strategies, in preference order
    pub assignment_strategies: Vec<String>,
    /// How often the group leader re-checks partition counts
    pub metadata_refresh_interval: Duration,
}

impl ConsumerConfig {
    /// Defaults for `group_id`
    pub fn new(group_id: impl Into<String>) -> Self {
        Self {
            bootstrap_servers: Vec::new(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            group_id: group_id.into(),
            auto_offset_reset: OffsetReset::default(),
            enable_auto_commit: true,
            auto_commit_interval: Duration::from_millis(DEFAULT_AUTO_COMMIT_INTERVAL_MS),
            session_timeout: Duration::from_millis(DEFAULT_SESSION_TIMEOUT_MS),
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
            fetch_wait_max: Duration::from_millis(DEFAULT_FETCH_WAIT_MAX_MS),
            fetch_max_bytes: DEFAULT_FETCH_MAX_BYTES,
            retry_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
            assignment_strategies: parse_strategies(DEFAULT_ASSIGNMENT_STRATEGIES)
                .unwrap_or_default(),
            metadata_refresh_interval: Duration::from_millis(DEFAULT_METADATA_REFRESH_INTERVAL_MS),
        }
    }

    /// Parse and validate consumer properties; producer-only properties are ignored
    ///
    /// `group.id` is required, and `heartbeat.interval.ms` must be below
    /// `session.timeout.ms`.
    pub fn from_client_config(config: &ClientConfig) -> Result<Self> {
        config.check_known()?;

        let group_id = config
            .get("group.id")
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| KafkaError::InvalidConfig("group.id is required".to_string()))?;

        let auto_offset_reset = match config.get("auto.offset.reset") {
            None => OffsetReset::default(),
            Some(raw) => OffsetReset::parse(raw).ok_or_else(|| {
                KafkaError::InvalidConfig(format!(
                    "auto.offset.reset: \"{}\" is not one of earliest, latest",
                    raw
                ))
            })?,
        };

        let session_timeout = config.parse_millis(
            "session.timeout.ms",
            DEFAULT_SESSION_TIMEOUT_MS,
            MIN_SESSION_TIMEOUT_MS,
            MAX_SESSION_TIMEOUT_MS,
        )?;
        let heartbeat_interval = config.parse_millis(
            "heartbeat.interval.ms",
            DEFAULT_HEARTBEAT_INTERVAL_MS,
            MIN_HEARTBEAT_INTERVAL_MS,
            MAX_HEARTBEAT_INTERVAL_MS,
        )?;
        if heartbeat_interval >= session_timeout {
            return Err(KafkaError::InvalidConfig(format!(
                "heartbeat.interval.ms ({}) must be lower than session.timeout.ms ({})",
                heartbeat_interval.as_millis(),
                session_timeout.as_millis()
            )));
        }

        let assignment_strategies = parse_strategies(
            config
                .get("partition.assignment.strategy")
                .unwrap_or(DEFAULT_ASSIGNMENT_STRATEGIES),
        )?;

        Ok(Self {
            bootstrap_servers: config.bootstrap_servers(),
            client_id: config.client_id(),
            group_id: group_id.to_string(),
            auto_offset_reset,
            enable_auto_commit: config.parse_bool("enable.auto.commit", true)?,
            auto_commit_interval: config.parse_millis(
                "auto.commit.interval.ms",
                DEFAULT_AUTO_COMMIT_INTERVAL_MS,
                0,
                MAX_AUTO_COMMIT_INTERVAL_MS,
            )?,
            session_timeout,
            heartbeat_interval,
            fetch_wait_max: config.parse_millis(
                "fetch.wait.max.ms",
                DEFAULT_FETCH_WAIT_MAX_MS,
                0,
                MAX_FETCH_WAIT_MAX_MS,
            )?,
            fetch_max_bytes: config.parse_bounded(
                "fetch.max.bytes",
                DEFAULT_FETCH_MAX_BYTES,
                MIN_FETCH_MAX_BYTES,
                MAX_FETCH_MAX_BYTES,
            )?,
            retry_backoff: config.parse_millis(
                "retry.backoff.ms",
                DEFAULT_RETRY_BACKOFF_MS,
                0,
                MAX_RETRY_BACKOFF_MS,
            )?,
            assignment_strategies,
            metadata_refresh_interval: config.parse_millis(
                "topic.metadata.refresh.interval.ms",
                DEFAULT_METADATA_REFRESH_INTERVAL_MS,
                0,
                MAX_METADATA_REFRESH_INTERVAL_MS,
            )?,
        })
    }
}

/// Parse a comma-separated partition.assignment.strategy list
fn parse_strategies(raw: &str) -> Result<Vec<String>> {
    let mut strategies = Vec::new();
    for name in raw.split(',').map(|s| s.trim().to_lowercase()) {
        if name.is_empty() {
            continue;
        }
        if name != STRATEGY_RANGE && name != STRATEGY_ROUNDROBIN {
            return Err(KafkaError::InvalidConfig(format!(
                "partition.assignment.strategy: unsupported strategy \"{}\"",
                name
            )));
        }
        if !strategies.contains(&name) {
            strategies.push(name);
        }
    }
    if strategies.is_empty() {
        return Err(KafkaError::InvalidConfig(
            "partition.assignment.strategy must name at least one strategy".to_string(),
        ));
    }
    Ok(strategies)
}
