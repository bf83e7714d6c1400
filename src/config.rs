use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::envelope::WireFormat;

/// Settings for a [`PubSubBroker`](crate::bus::PubSubBroker).
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```
/// use sourced_dispatch::PubSubConfig;
///
/// let config = PubSubConfig::from_json(r#"{ "channel": "orders" }"#).unwrap();
/// assert_eq!(config.channel, "orders");
/// assert_eq!(config.poll_interval_ms, 50);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PubSubConfig {
    /// Logical channel every envelope is published to and received from.
    pub channel: String,
    /// How long one receive call may block; also the stop-signal latency.
    pub poll_interval_ms: u64,
    pub format: WireFormat,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            channel: "events".to_string(),
            poll_interval_ms: 50,
            format: WireFormat::Json,
        }
    }
}

impl PubSubConfig {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_format(mut self, format: WireFormat) -> Self {
        self.format = format;
        self
    }

    /// Never zero, so receive threads cannot spin.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}
