use facesync_core::RecognitionResult;
use serde::Serialize;
use tokio::sync::broadcast;

/// Trigger fired once per recognized face.
pub const FACE_DETECTED: &str = "face_detected";

#[derive(Debug, Clone, Serialize)]
pub struct TriggerEvent {
    pub trigger: &'static str,
    pub payload: RecognitionResult,
}

/// Fan-out channel for trigger events. Emitting with no subscribers is fine.
#[derive(Clone)]
pub struct TriggerBus {
    tx: broadcast::Sender<TriggerEvent>,
}

impl TriggerBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TriggerEvent> {
        self.tx.subscribe()
    }

    /// Publish a `face_detected` event. Returns the number of subscribers reached.
    pub fn emit(&self, payload: RecognitionResult) -> usize {
        let event = TriggerEvent {
            trigger: FACE_DETECTED,
            payload,
        };
        match self.tx.send(event) {
            Ok(n) => n,
            Err(_) => {
                tracing::trace!("trigger emitted with no subscribers");
                0
            }
        }
    }
}
