//! Kafka-backed event bus.
//!
//! Producer: idempotent, `acks=all`, keyed by subject id so all events about
//! one entity land on one partition in order.
//!
//! Consumer: manual commits. A message is committed only after the handler
//! accepted it; on handler failure the consumer seeks back to the failed
//! offset and the message is delivered again after a backoff. When the seek
//! itself fails the message is retried in place instead, so no later commit
//! can move the group offset past it.

use super::{EventBus, EventHandler};
use crate::config::KafkaConfig;
use crate::error::{ServiceError, ServiceResult};
use async_trait::async_trait;
use event_schema::LifecycleEvent;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::Offset;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub struct KafkaEventBus {
    producer: FutureProducer,
    config: KafkaConfig,
}

impl KafkaEventBus {
    pub fn new(config: KafkaConfig) -> ServiceResult<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .set("max.in.flight.requests.per.connection", "5")
            .set("retries", "10")
            .set("message.timeout.ms", config.send_timeout.as_millis().to_string())
            .create()
            .map_err(|e| ServiceError::Bus(format!("Failed to create Kafka producer: {}", e)))?;

        info!(brokers = %config.brokers, "Kafka producer initialized");
        Ok(Self { producer, config })
    }

    fn create_consumer(&self) -> ServiceResult<StreamConsumer> {
        ClientConfig::new()
            .set("bootstrap.servers", &self.config.brokers)
            .set("group.id", &self.config.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "45000")
            .set("max.poll.interval.ms", "300000")
            .create()
            .map_err(|e| ServiceError::Bus(format!("Failed to create Kafka consumer: {}", e)))
    }
}

#[async_trait]
impl EventBus for KafkaEventBus {
    async fn publish(&self, topic: &str, event: &LifecycleEvent) -> ServiceResult<()> {
        let payload = event.to_vec()?;
        let key = event.subject_id.to_string();
        let event_id = event.dedup_key();

        let headers = OwnedHeaders::new()
            .insert(Header {
                key: "event_type",
                value: Some(event.event_type.as_str()),
            })
            .insert(Header {
                key: "event_id",
                value: Some(event_id.as_str()),
            })
            .insert(Header {
                key: "subject_id",
                value: Some(key.as_str()),
            });

        let record = FutureRecord::to(topic)
            .key(&key)
            .payload(&payload)
            .headers(headers);

        match self.producer.send(record, self.config.send_timeout).await {
            Ok((partition, offset)) => {
                debug!(
                    topic = %topic,
                    event_id = %event_id,
                    event_type = %event.event_type,
                    partition,
                    offset,
                    "Published lifecycle event to Kafka"
                );
                Ok(())
            }
            Err((err, _)) => {
                warn!(
                    topic = %topic,
                    event_id = %event_id,
                    error = %err,
                    "Failed to publish lifecycle event to Kafka"
                );
                Err(ServiceError::PublishFailed(err.to_string()))
            }
        }
    }

    async fn subscribe(
        &self,
        topics: &[String],
        handler: Arc<dyn EventHandler>,
    ) -> ServiceResult<()> {
        let consumer = self.create_consumer()?;
        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&topic_refs)
            .map_err(|e| ServiceError::Bus(format!("Failed to subscribe: {}", e)))?;

        info!(
            topics = ?topics,
            group = %self.config.group_id,
            "Kafka lifecycle consumer subscribed"
        );

        let retry_backoff = self.config.redelivery_backoff;
        tokio::spawn(async move {
            run_consumer(consumer, handler, retry_backoff).await;
        });
        Ok(())
    }
}

async fn run_consumer(
    consumer: StreamConsumer,
    handler: Arc<dyn EventHandler>,
    retry_backoff: Duration,
) {
    loop {
        let message = match consumer.recv().await {
            Ok(message) => message,
            Err(err) => {
                error!("Kafka error: {}", err);
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        let Some(data) = message.payload() else {
            debug!(topic = %message.topic(), "Received Kafka message with empty payload");
            commit(&consumer, &message);
            continue;
        };

        let event = match LifecycleEvent::from_slice(data) {
            Ok(event) => event,
            Err(e) => {
                // Cannot succeed on redelivery either
                warn!(
                    topic = %message.topic(),
                    offset = message.offset(),
                    event_type = ?header_value(&message, "event_type"),
                    error = %e,
                    "Dropping undecodable lifecycle message"
                );
                commit(&consumer, &message);
                continue;
            }
        };

        let outcome = settle(
            || handler.handle(&event),
            || {
                consumer.seek(
                    message.topic(),
                    message.partition(),
                    Offset::Offset(message.offset()),
                    Duration::from_secs(5),
                )
            },
            retry_backoff,
        )
        .await;

        match outcome {
            Settled::Acked => commit(&consumer, &message),
            Settled::Rewound => debug!(
                topic = %message.topic(),
                partition = message.partition(),
                offset = message.offset(),
                event_key = %event.dedup_key(),
                "Rewound partition to the rejected message"
            ),
        }
    }
}

/// How a delivered message left [`settle`]
#[derive(Debug, PartialEq, Eq)]
enum Settled {
    /// Handler accepted it; commit the offset
    Acked,
    /// Handler rejected it and the partition points at it again
    Rewound,
}

const SEEK_ATTEMPTS: u32 = 3;

/// Handle one message without ever letting a later commit pass it.
///
/// On rejection the partition is rewound to the message. If every seek
/// fails, the handler is retried in place until it accepts, because moving
/// on would let the next commit skip the rejected offset.
async fn settle<H, HFut, R, E>(mut handle: H, mut rewind: R, backoff: Duration) -> Settled
where
    H: FnMut() -> HFut,
    HFut: std::future::Future<Output = ServiceResult<()>>,
    R: FnMut() -> Result<(), E>,
    E: std::fmt::Display,
{
    loop {
        let err = match handle().await {
            Ok(()) => return Settled::Acked,
            Err(e) => e,
        };
        warn!(error = %err, "Lifecycle handler failed, message will be redelivered");
        tokio::time::sleep(backoff).await;

        for attempt in 1..=SEEK_ATTEMPTS {
            match rewind() {
                Ok(()) => return Settled::Rewound,
                Err(seek_err) => warn!(attempt, error = %seek_err, "Seek back to rejected offset failed"),
            }
        }
        error!("Could not rewind partition; retrying the message in place");
    }
}

fn commit(consumer: &StreamConsumer, message: &BorrowedMessage<'_>) {
    if let Err(commit_err) = consumer.commit_message(message, CommitMode::Async) {
        warn!("Failed to commit Kafka offset: {}", commit_err);
    }
}

fn header_value<'a>(message: &'a BorrowedMessage<'a>, key: &str) -> Option<&'a str> {
    message
        .headers()
        .and_then(|headers| {
            headers
                .iter()
                .find(|header| header.key == key)
                .and_then(|header| header.value)
        })
        .and_then(|value| std::str::from_utf8(value).ok())
}
