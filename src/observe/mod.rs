use crate::feed::ConnectionState;
use crate::shipment::OrderState;
use tracing::{info, warn};

/// Structured events the engine emits for logging and metrics collection.
/// Escalations and backoffs always pass through here — they must never be
/// silently lost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    AccountState {
        account_id: String,
        state: ConnectionState,
    },
    AccountBackoff {
        account_id: String,
        failures: u32,
    },
    ReauthRequired {
        account_id: String,
    },
    Decision {
        account_id: String,
        conversation_id: String,
        action: String,
    },
    EventDropped {
        account_id: String,
        reason: String,
    },
    OrderTransition {
        order_id: String,
        from: OrderState,
        to: OrderState,
    },
    OrderEscalated {
        order_id: String,
        retries: u32,
    },
}

pub trait ObservabilitySink: Send + Sync {
    fn emit(&self, event: EngineEvent);
}

/// Default sink: structured tracing output.
pub struct TracingSink;

impl ObservabilitySink for TracingSink {
    fn emit(&self, event: EngineEvent) {
        match event {
            EngineEvent::AccountState { account_id, state } => {
                info!(account = %account_id, state = %state, "account state changed");
            }
            EngineEvent::AccountBackoff {
                account_id,
                failures,
            } => {
                warn!(
                    account = %account_id,
                    failures,
                    "account entered backoff after repeated connection failures"
                );
            }
            EngineEvent::ReauthRequired { account_id } => {
                warn!(account = %account_id, "credential expired, re-auth required");
            }
            EngineEvent::Decision {
                account_id,
                conversation_id,
                action,
            } => {
                info!(
                    account = %account_id,
                    conversation = %conversation_id,
                    action = %action,
                    "reply decision"
                );
            }
            EngineEvent::EventDropped { account_id, reason } => {
                warn!(account = %account_id, reason = %reason, "event dropped");
            }
            EngineEvent::OrderTransition { order_id, from, to } => {
                info!(order = %order_id, from = %from, to = %to, "order transition");
            }
            EngineEvent::OrderEscalated { order_id, retries } => {
                warn!(
                    order = %order_id,
                    retries,
                    "order escalated, human attention required"
                );
            }
        }
    }
}

/// Records every event; used by tests to assert on emitted observations.
#[derive(Default)]
pub struct RecordingSink {
    events: std::sync::Mutex<Vec<EngineEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().expect("sink lock").clone()
    }
}

impl ObservabilitySink for RecordingSink {
    fn emit(&self, event: EngineEvent) {
        self.events.lock().expect("sink lock").push(event);
    }
}
