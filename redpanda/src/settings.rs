//! Connection settings shared by the producer, admin and consumer clients.

use rdkafka::config::ClientConfig;
use std::time::Duration;

/// Settings every client is created from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientSettings {
    /// Comma-separated bootstrap servers
    pub brokers: String,
    /// Client id reported to the broker
    pub client_id: String,
    /// Producer acknowledgement mode
    pub producer_acks: String,
    /// Producer compression codec
    pub compression: String,
    /// Timeout for sends, metadata requests and topic creation
    pub timeout: Duration,
    /// Where a new consumer group starts reading
    pub auto_offset_reset: String,
    /// Consumer group session timeout
    pub session_timeout: Duration,
}

impl ClientSettings {
    fn base_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.brokers)
            .set("client.id", &self.client_id);
        config
    }

    pub(crate) fn producer_config(&self) -> ClientConfig {
        let mut config = self.base_config();
        config
            .set("message.timeout.ms", self.timeout.as_millis().to_string())
            .set("acks", &self.producer_acks)
            .set("compression.type", &self.compression);
        config
    }

    pub(crate) fn admin_config(&self) -> ClientConfig {
        self.base_config()
    }

    pub(crate) fn consumer_config(&self, group_id: &str) -> ClientConfig {
        let mut config = self.base_config();
        config
            .set("group.id", group_id)
            // The runtime commits each message after it reaches a final outcome
            .set("enable.auto.commit", "false")
            // Only processed messages are stored, so the final commit on
            // disconnect never skips messages that were received but not handled
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("session.timeout.ms", self.session_timeout.as_millis().to_string())
            .set("enable.partition.eof", "false");
        config
    }
}
