//! Simulated change-event topic with fault injection.

use async_trait::async_trait;
use chrono::Utc;
use sensorsim_env::{
    ChangeAction, ChangeEventSource, ConfigChangeEvent, EnvError, EventSubscription, SensorDefinition,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

type Delivery = Result<Option<Vec<u8>>, EnvError>;

struct TopicState {
    /// Sender of the currently open subscription
    live: Option<mpsc::UnboundedSender<Delivery>>,

    /// Messages published while nobody was subscribed
    backlog: VecDeque<Vec<u8>>,

    subscribe_failures: u32,
    attempts: Vec<tokio::time::Instant>,
}

/// A single-partition topic. Messages published with no open subscription
/// are retained and replayed to the next subscriber, in order.
pub struct SimEventSource {
    state: Mutex<TopicState>,
}

impl SimEventSource {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TopicState {
                live: None,
                backlog: VecDeque::new(),
                subscribe_failures: 0,
                attempts: Vec::new(),
            }),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Makes the next `n` subscribe calls fail as "topic not ready".
    pub fn fail_next_subscribes(&self, n: u32) {
        self.state().subscribe_failures = n;
    }

    /// Publishes a raw message value.
    pub fn publish_raw(&self, bytes: Vec<u8>) {
        let mut state = self.state();
        if let Some(live) = state.live.take() {
            match live.send(Ok(Some(bytes))) {
                Ok(()) => state.live = Some(live),
                // Subscriber went away; keep the message for the next one
                Err(mpsc::error::SendError(delivery)) => {
                    if let Ok(Some(bytes)) = delivery {
                        state.backlog.push_back(bytes);
                    }
                }
            }
            return;
        }
        state.backlog.push_back(bytes);
    }

    /// Publishes a decoded event.
    pub fn publish(&self, event: &ConfigChangeEvent) {
        // Serializing plain data structs cannot fail
        if let Ok(bytes) = serde_json::to_vec(event) {
            self.publish_raw(bytes);
        }
    }

    pub fn publish_upsert(&self, def: SensorDefinition) {
        self.publish(&ConfigChangeEvent {
            action: ChangeAction::Upserted,
            sensor_id: def.sensor_id.clone(),
            timestamp: Utc::now(),
            payload: Some(def),
        });
    }

    pub fn publish_delete(&self, sensor_id: &str) {
        self.publish(&ConfigChangeEvent {
            action: ChangeAction::Deleted,
            sensor_id: sensor_id.to_string(),
            timestamp: Utc::now(),
            payload: None,
        });
    }

    /// Breaks the open subscription with a transport error.
    pub fn inject_stream_error(&self) {
        let mut state = self.state();
        if let Some(live) = state.live.take() {
            let _ = live.send(Err(EnvError::transport("broker connection reset")));
        }
    }

    /// Virtual instants of every subscribe attempt.
    pub fn attempts(&self) -> Vec<tokio::time::Instant> {
        self.state().attempts.clone()
    }

    /// True while a subscriber holds the topic open.
    pub fn is_subscribed(&self) -> bool {
        self.state().live.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    fn state(&self) -> MutexGuard<'_, TopicState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SimEventSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving end of one subscription.
pub struct SimSubscription {
    rx: mpsc::UnboundedReceiver<Delivery>,
}

#[async_trait]
impl ChangeEventSource for SimEventSource {
    type Subscription = SimSubscription;

    async fn subscribe(&self) -> Result<SimSubscription, EnvError> {
        let mut state = self.state();
        state.attempts.push(tokio::time::Instant::now());
        if state.subscribe_failures > 0 {
            state.subscribe_failures -= 1;
            return Err(EnvError::TopicNotReady("sensor-config-events".into()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        while let Some(bytes) = state.backlog.pop_front() {
            let _ = tx.send(Ok(Some(bytes)));
        }
        state.live = Some(tx);
        Ok(SimSubscription { rx })
    }
}

#[async_trait]
impl EventSubscription for SimSubscription {
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, EnvError> {
        match self.rx.recv().await {
            Some(delivery) => delivery,
            None => Err(EnvError::closed("sim topic")),
        }
    }
}
