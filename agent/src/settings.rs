//! Process configuration from flags and environment.

use clap::Parser;
use std::net::SocketAddr;
use uuid::Uuid;

/// Sensor simulator agent
#[derive(Parser, Debug, Clone)]
#[command(name = "sensorsim")]
#[command(about = "Simulate readings for every catalog sensor marked simulate=true", long_about = None)]
pub struct Settings {
    /// Sensor catalog base URL
    #[arg(long, env = "SENSOR_MANAGER_URL", default_value = "http://localhost:8080")]
    pub catalog_url: String,

    /// Measurement archive base URL
    #[arg(long, env = "ARCHIVER_URL", default_value = "http://localhost:8081")]
    pub archiver_url: String,

    /// Kafka bootstrap servers
    #[arg(long, env = "KAFKA_BOOTSTRAP_SERVERS", default_value = "localhost:9092")]
    pub kafka_brokers: String,

    /// Topic carrying sensor config change events
    #[arg(long, env = "KAFKA_CONFIG_TOPIC", default_value = "sensor-config-events")]
    pub config_topic: String,

    /// Topic measurements are streamed to
    #[arg(long, env = "KAFKA_TOPIC", default_value = "measurements")]
    pub measurement_topic: String,

    /// Introspection HTTP listen address
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8082")]
    pub listen: SocketAddr,

    /// Catalog listing page size
    #[arg(long, env = "CATALOG_PAGE_SIZE", default_value = "500")]
    pub page_size: u32,

    /// Instance identity used for the consumer group
    #[arg(long, env = "HOSTNAME")]
    pub instance_id: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Settings {
    /// Every instance consumes the full change stream, so each needs its own group.
    pub fn consumer_group(&self) -> String {
        let instance = self
            .instance_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        format!("sensorsim-{}", instance)
    }
}
