use crate::api::outbound::{OutboundSender, SendOutcome};
use crate::bus::{Event, Message};
use crate::config::EngineConfig;
use crate::convo::ConversationStore;
use crate::feed::{ConnectionState, StatusBoard};
use crate::observe::{EngineEvent, ObservabilitySink};
use crate::reply::{Action, ReplyEngine, is_bargain_message};
use crate::shipment::ShipmentOrchestrator;
use crate::utils::backoff_delay;
use crate::utils::task_tracker::TaskTracker;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

/// Everything an account pipeline needs to process events.
#[derive(Clone)]
pub struct PipelineDeps {
    pub reply: ReplyEngine,
    pub sender: Arc<OutboundSender>,
    pub orchestrator: ShipmentOrchestrator,
    pub status: StatusBoard,
    pub sink: Arc<dyn ObservabilitySink>,
}

struct AccountQueue {
    events: Mutex<VecDeque<Event>>,
    notify: Notify,
}

struct Pipeline {
    queue: Arc<AccountQueue>,
}

/// The central router: one isolated, strictly-ordered pipeline per account.
/// A slow or failing account never delays the others — each pipeline has its
/// own bounded queue and its own worker task.
pub struct Dispatcher {
    deps: PipelineDeps,
    config: EngineConfig,
    pipelines: Mutex<HashMap<String, Pipeline>>,
    workers: TaskTracker,
}

impl Dispatcher {
    pub fn new(deps: PipelineDeps, config: EngineConfig) -> Self {
        Self {
            deps,
            config,
            pipelines: Mutex::new(HashMap::new()),
            workers: TaskTracker::new(),
        }
    }

    /// Enqueue an event into its account's pipeline, creating the pipeline
    /// on first sight. Events are processed strictly in arrival order per
    /// account; there is no cross-account ordering.
    pub async fn submit(&self, event: Event) {
        let account_id = event.account_id().to_string();
        let queue = self.ensure_pipeline(&account_id).await;

        let dropped = {
            let mut events = queue.events.lock().await;
            enqueue_bounded(&mut events, event, self.config.queue_capacity)
        };
        if let Some(reason) = dropped {
            self.deps.sink.emit(EngineEvent::EventDropped {
                account_id,
                reason: reason.to_string(),
            });
        }
        queue.notify.notify_one();
    }

    async fn ensure_pipeline(&self, account_id: &str) -> Arc<AccountQueue> {
        let mut pipelines = self.pipelines.lock().await;
        if let Some(pipeline) = pipelines.get(account_id) {
            return pipeline.queue.clone();
        }

        let queue = Arc::new(AccountQueue {
            events: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        });
        pipelines.insert(
            account_id.to_string(),
            Pipeline {
                queue: queue.clone(),
            },
        );

        let worker = Worker {
            account_id: account_id.to_string(),
            queue: queue.clone(),
            deps: self.deps.clone(),
            config: self.config.clone(),
        };
        let handle = tokio::spawn(worker.run());
        self.workers
            .spawn(worker_name(account_id), handle)
            .await;
        debug!(account = %account_id, "pipeline created");
        queue
    }

    /// Tear down one account's pipeline: cancel the worker, discard the
    /// queue. In-flight work is aborted promptly.
    pub async fn close_account(&self, account_id: &str) {
        self.workers.cancel(&worker_name(account_id)).await;
        if self.pipelines.lock().await.remove(account_id).is_some() {
            info!(account = %account_id, "pipeline closed");
        }
    }

    pub async fn shutdown(&self) {
        self.workers.cancel_all().await;
        self.pipelines.lock().await.clear();
    }

    /// Number of events waiting in one account's queue.
    pub async fn queue_len(&self, account_id: &str) -> usize {
        match self.pipelines.lock().await.get(account_id) {
            Some(p) => p.queue.events.lock().await.len(),
            None => 0,
        }
    }
}

fn worker_name(account_id: &str) -> String {
    format!("pipeline:{}", account_id)
}

/// Bounded-queue insert with the overflow policy: the oldest
/// non-order-related event is evicted first; order-related events are never
/// dropped — a queue saturated with them grows past capacity rather than
/// lose one, and it is the incoming non-order event that is discarded.
/// Returns the drop reason when something was discarded.
fn enqueue_bounded(
    events: &mut VecDeque<Event>,
    event: Event,
    capacity: usize,
) -> Option<&'static str> {
    if events.len() < capacity {
        events.push_back(event);
        return None;
    }
    match events.iter().position(|e| !e.is_order_related()) {
        Some(idx) => {
            events.remove(idx);
            events.push_back(event);
            Some("queue overflow, oldest non-order event evicted")
        }
        None if !event.is_order_related() => {
            Some("queue saturated with order events, incoming dropped")
        }
        None => {
            events.push_back(event);
            None
        }
    }
}

/// Single-threaded per-account worker: pops events in arrival order and
/// routes them to the reply engine or the shipment orchestrator. Repeated
/// failures trip this account into Backoff without touching its siblings.
struct Worker {
    account_id: String,
    queue: Arc<AccountQueue>,
    deps: PipelineDeps,
    config: EngineConfig,
}

impl Worker {
    async fn run(self) {
        // Conversation state is owned by this worker; no cross-account
        // mutation is possible.
        let mut store = ConversationStore::new();
        let mut consecutive_failures = 0u32;

        loop {
            let event = self.next_event().await;
            let ok = match event {
                Event::Message(msg) => self.process_message(&mut store, msg).await,
                Event::Order(order_event) => {
                    self.deps.orchestrator.handle_event(&order_event).await;
                    true
                }
            };

            if ok {
                consecutive_failures = 0;
                continue;
            }

            consecutive_failures += 1;
            if consecutive_failures >= self.config.max_consecutive_failures {
                // Isolate this account: park it in Backoff for one window,
                // then resume. Other pipelines are unaffected.
                self.deps
                    .status
                    .set(&self.account_id, ConnectionState::Backoff);
                self.deps.sink.emit(EngineEvent::AccountBackoff {
                    account_id: self.account_id.clone(),
                    failures: consecutive_failures,
                });
                let delay = backoff_delay(
                    consecutive_failures,
                    self.config.reconnect_base_delay_secs,
                    self.config.reconnect_max_delay_secs,
                );
                warn!(
                    account = %self.account_id,
                    "pipeline backing off for {:?} after repeated failures",
                    delay
                );
                tokio::time::sleep(delay).await;
                if self.deps.status.get(&self.account_id) == Some(ConnectionState::Backoff) {
                    self.deps.status.set(&self.account_id, ConnectionState::Live);
                }
                consecutive_failures = 0;
            }
        }
    }

    async fn next_event(&self) -> Event {
        loop {
            if let Some(event) = self.queue.events.lock().await.pop_front() {
                return event;
            }
            self.queue.notify.notified().await;
        }
    }

    /// Returns false when the message could not be handled (send path
    /// exhausted) so the failure-isolation counter advances.
    async fn process_message(&self, store: &mut ConversationStore, msg: Message) -> bool {
        let (action, bargain) = {
            let convo = store.get_or_create(&msg.account_id, &msg.conversation_id);
            if !convo.record_message(msg.clone()) {
                // Second-layer dedup: the normalizer cache is bounded, so a
                // very late replay can still reach here.
                debug!(account = %msg.account_id, message = %msg.id, "stale duplicate ignored");
                return true;
            }
            convo.awaiting_reply = true;
            let action = self.deps.reply.decide(convo, &msg).await;
            (action, is_bargain_message(&msg.content))
        };

        let mut outcome_label = action.as_str();
        let mut ok = true;

        match &action {
            Action::Reply(text) => {
                if bargain {
                    store
                        .get_or_create(&msg.account_id, &msg.conversation_id)
                        .bargain_rounds += 1;
                }
                match self
                    .deps
                    .sender
                    .send(&msg.account_id, &msg.conversation_id, text)
                    .await
                {
                    SendOutcome::Delivered => {
                        store
                            .get_or_create(&msg.account_id, &msg.conversation_id)
                            .awaiting_reply = false;
                    }
                    SendOutcome::Failed => {
                        // Delivery is not guaranteed by the decision engine;
                        // a dead send path becomes an escalation.
                        outcome_label = "escalate";
                        ok = false;
                    }
                }
            }
            Action::Ignore | Action::Escalate => {}
        }

        self.deps.sink.emit(EngineEvent::Decision {
            account_id: msg.account_id.clone(),
            conversation_id: msg.conversation_id.clone(),
            action: outcome_label.to_string(),
        });
        ok
    }
}
