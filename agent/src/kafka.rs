//! Kafka collaborators: the config change-event consumer and the
//! measurement stream producer.

use async_trait::async_trait;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use sensorsim_env::{ChangeEventSource, EnvError, EventSubscription, Measurement, MeasurementSink};
use std::time::Duration;
use tracing::debug;

/// Queue timeout for stream deliveries.
pub const PRODUCE_TIMEOUT: Duration = Duration::from_secs(5);

fn kafka_error(err: KafkaError) -> EnvError {
    match err.rdkafka_error_code() {
        Some(RDKafkaErrorCode::UnknownTopicOrPartition | RDKafkaErrorCode::UnknownTopic) => {
            EnvError::TopicNotReady(err.to_string())
        }
        _ => EnvError::transport(err),
    }
}

/// Subscribes to the config change topic with a per-instance consumer group.
pub struct KafkaChangeEvents {
    brokers: String,
    topic: String,
    group_id: String,
}

impl KafkaChangeEvents {
    pub fn new(brokers: impl Into<String>, topic: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            brokers: brokers.into(),
            topic: topic.into(),
            group_id: group_id.into(),
        }
    }

    /// Consumer settings. A fresh group starts from the earliest offset.
    pub fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.brokers);
        config.set("group.id", &self.group_id);
        config.set("auto.offset.reset", "earliest");
        config.set("enable.auto.commit", "true");
        config.set("session.timeout.ms", "10000");
        config
    }
}

/// One consumer subscribed to the change topic. Dropping it leaves the group.
pub struct KafkaSubscription {
    consumer: StreamConsumer,
}

#[async_trait]
impl ChangeEventSource for KafkaChangeEvents {
    type Subscription = KafkaSubscription;

    async fn subscribe(&self) -> Result<KafkaSubscription, EnvError> {
        let consumer: StreamConsumer = self.client_config().create().map_err(kafka_error)?;
        consumer.subscribe(&[self.topic.as_str()]).map_err(kafka_error)?;
        debug!(topic = %self.topic, group_id = %self.group_id, "Subscribed to config topic");
        Ok(KafkaSubscription { consumer })
    }
}

#[async_trait]
impl EventSubscription for KafkaSubscription {
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, EnvError> {
        let msg = self.consumer.recv().await.map_err(kafka_error)?;
        Ok(msg.payload().map(<[u8]>::to_vec))
    }
}

impl Drop for KafkaSubscription {
    fn drop(&mut self) {
        self.consumer.unsubscribe();
    }
}

/// Publishes measurements keyed by sensor id.
pub struct KafkaMeasurementSink {
    producer: FutureProducer,
    topic: String,
    timeout: Duration,
}

impl KafkaMeasurementSink {
    /// Producer settings. Idempotence keeps retried sends from duplicating.
    pub fn client_config(brokers: &str) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", brokers);
        config.set("enable.idempotence", "true");
        config
    }

    /// Creates the producer. Does not wait for the broker.
    pub fn new(brokers: &str, topic: impl Into<String>) -> Result<Self, EnvError> {
        let producer: FutureProducer = Self::client_config(brokers).create().map_err(kafka_error)?;
        Ok(Self {
            producer,
            topic: topic.into(),
            timeout: PRODUCE_TIMEOUT,
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[async_trait]
impl MeasurementSink for KafkaMeasurementSink {
    fn name(&self) -> &'static str {
        "stream"
    }

    async fn deliver(&self, measurement: &Measurement) -> Result<(), EnvError> {
        let payload = measurement.to_json()?;
        let record = FutureRecord::to(&self.topic)
            .key(measurement.sensor_id.as_str())
            .payload(&payload);

        match self.producer.send(record, self.timeout).await {
            Ok(_) => Ok(()),
            Err((KafkaError::MessageProduction(RDKafkaErrorCode::MessageTimedOut), _)) => {
                Err(EnvError::Timeout(self.timeout.as_millis() as u64))
            }
            Err((err, _)) => Err(kafka_error(err)),
        }
    }
}
