//! Notifications the engine publishes for the UI layer.

use serde::Serialize;
use tokio::sync::broadcast;

use modsync_core::types::{ModuleIdentity, ScriptRole};

use crate::binding::ViewId;
use crate::conflict::ConflictState;
use crate::coordinator::ScriptState;

const DEFAULT_CAPACITY: usize = 64;

/// Something the UI may want to surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    ConflictSurfaced {
        module: ModuleIdentity,
        state: ConflictState,
    },
    BindingInactive {
        view: ViewId,
        reason: String,
    },
    ScriptStatus {
        directory: String,
        role: ScriptRole,
        state: ScriptState,
    },
}

/// Broadcast channel for [`EngineEvent`]s. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Publish an event; having no subscribers is fine.
    pub fn emit(&self, event: EngineEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("engine event dropped: no subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.emit(EngineEvent::BindingInactive {
            view: ViewId(3),
            reason: "no portal".into(),
        });
        match rx.recv().await.expect("event") {
            EngineEvent::BindingInactive { view, .. } => assert_eq!(view, ViewId(3)),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn emit_without_subscribers_is_silent() {
        EventBus::new(4).emit(EngineEvent::BindingInactive {
            view: ViewId(1),
            reason: String::new(),
        });
    }

    #[test]
    fn events_serialize_with_tag() {
        let json = serde_json::to_value(EngineEvent::BindingInactive {
            view: ViewId(2),
            reason: "r".into(),
        })
        .expect("serialize");
        assert_eq!(json["event"], "binding_inactive");
        assert_eq!(json["view"], 2);
    }
}
