//! # Worker Command Channel
//!
//! In-process control plane for a fleet of simulated charging stations. An
//! orchestrator posts request envelopes onto the broadcast channel; each
//! station's [`CommandDispatcher`] picks up the ones addressed to it, runs
//! the command and answers with a response envelope carrying the request's
//! correlation uuid.

pub mod classifier;
pub mod dispatcher;
pub mod envelope;

pub use classifier::classify;
pub use dispatcher::CommandDispatcher;
pub use envelope::{
    ProcedureName, RequestEnvelope, RequestPayload, ResponseEnvelope, ResponsePayload,
    ResponseStatus,
};

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, error};

/// Broadcast bus shared by an orchestrator and its station dispatchers
///
/// Messages are raw JSON values so that malformed traffic reaches the
/// dispatcher's validation instead of being rejected at the type level.
#[derive(Clone)]
pub struct WorkerChannel {
    sender: broadcast::Sender<Value>,
}

impl WorkerChannel {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Value> {
        self.sender.subscribe()
    }

    /// Publish a raw message; without subscribers it just evaporates
    pub fn post(&self, message: Value) {
        if self.sender.send(message).is_err() {
            debug!("worker channel has no subscribers");
        }
    }

    pub fn post_request(&self, envelope: &RequestEnvelope) {
        match serde_json::to_value(envelope) {
            Ok(message) => self.post(message),
            Err(e) => error!("failed to encode request envelope: {e}"),
        }
    }

    pub fn post_response(&self, envelope: &ResponseEnvelope) {
        match serde_json::to_value(envelope) {
            Ok(message) => self.post(message),
            Err(e) => error!("failed to encode response envelope: {e}"),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn channel_fans_out_to_every_subscriber() {
        let channel = WorkerChannel::new(8);
        let mut a = channel.subscribe();
        let mut b = channel.subscribe();

        channel.post(json!({"ping": 1}));
        assert_eq!(a.recv().await.unwrap(), json!({"ping": 1}));
        assert_eq!(b.recv().await.unwrap(), json!({"ping": 1}));
    }

    #[tokio::test]
    async fn posting_without_subscribers_is_harmless() {
        let channel = WorkerChannel::new(8);
        channel.post(json!({"ping": 1}));
    }

    #[tokio::test]
    async fn envelopes_round_trip_through_the_channel() {
        let channel = WorkerChannel::new(8);
        let mut receiver = channel.subscribe();

        let request = RequestEnvelope::new(ProcedureName::Heartbeat, RequestPayload::default());
        channel.post_request(&request);

        let raw = receiver.recv().await.unwrap();
        let parsed: RequestEnvelope = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed, request);
    }
}
