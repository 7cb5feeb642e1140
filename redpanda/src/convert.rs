//! Conversions between rdkafka types and the bus's broker types.

use freight_events_core::broker::{InboundMessage, MessageHeaders};
use freight_events_core::error::BrokerError;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{Header, Headers, Message, OwnedHeaders};
use tokio::task::JoinError;

/// rdkafka headers carrying every entry of `headers`.
pub(crate) fn to_kafka_headers(headers: &MessageHeaders) -> OwnedHeaders {
    headers
        .iter()
        .fold(OwnedHeaders::new_with_capacity(headers.len()), |acc, (key, value)| {
            acc.insert(Header {
                key,
                value: Some(value),
            })
        })
}

/// Copy a received message out of the consumer's buffer.
pub(crate) fn to_inbound<M: Message>(message: &M) -> InboundMessage {
    let mut headers = MessageHeaders::new();
    if let Some(kafka_headers) = message.headers() {
        for header in kafka_headers.iter() {
            headers.insert(header.key, header.value.unwrap_or_default());
        }
    }

    InboundMessage {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message.key().map(<[u8]>::to_vec),
        value: message.payload().map(<[u8]>::to_vec),
        headers,
    }
}

/// Errors that concern the request itself rather than the connection.
const fn is_rejection(code: RDKafkaErrorCode) -> bool {
    matches!(
        code,
        RDKafkaErrorCode::UnknownTopicOrPartition
            | RDKafkaErrorCode::UnknownTopic
            | RDKafkaErrorCode::MessageSizeTooLarge
            | RDKafkaErrorCode::TopicAuthorizationFailed
            | RDKafkaErrorCode::InvalidTopic
    )
}

/// Classify a send failure for `topic`.
pub(crate) fn send_error(topic: &str, err: &KafkaError) -> BrokerError {
    match err.rdkafka_error_code() {
        Some(code) if is_rejection(code) => BrokerError::Rejected {
            topic: topic.to_string(),
            reason: err.to_string(),
        },
        _ => BrokerError::Unavailable(err.to_string()),
    }
}

/// A blocking client call that could not be run.
pub(crate) fn join_error(err: &JoinError) -> BrokerError {
    BrokerError::Unavailable(format!("blocking client call failed: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdkafka::message::OwnedMessage;
    use rdkafka::message::Timestamp;

    #[test]
    fn headers_survive_the_round_trip() {
        let headers = MessageHeaders::new()
            .with("event-type", "LOAD_COMPLETED")
            .with("correlation-id", "c-1");

        let message = OwnedMessage::new(
            Some(b"{}".to_vec()),
            Some(b"load-7".to_vec()),
            "load-events".to_string(),
            Timestamp::NotAvailable,
            2,
            41,
            Some(to_kafka_headers(&headers)),
        );
        let inbound = to_inbound(&message);

        assert_eq!(inbound.topic, "load-events");
        assert_eq!(inbound.partition, 2);
        assert_eq!(inbound.offset, 41);
        assert_eq!(inbound.key.as_deref(), Some(b"load-7".as_slice()));
        assert_eq!(inbound.headers, headers);
    }

    #[test]
    fn unknown_topic_is_a_rejection() {
        let err = KafkaError::MessageProduction(RDKafkaErrorCode::UnknownTopicOrPartition);
        assert!(matches!(
            send_error("load-events", &err),
            BrokerError::Rejected { ref topic, .. } if topic == "load-events"
        ));
    }

    #[test]
    fn timeouts_are_unavailability() {
        let err = KafkaError::MessageProduction(RDKafkaErrorCode::MessageTimedOut);
        let mapped = send_error("load-events", &err);
        assert!(matches!(mapped, BrokerError::Unavailable(_)));
        assert!(mapped.is_transient());
    }
}
