pub mod ledger;

pub use ledger::ShipmentLedger;

use crate::api::MarketplaceApi;
use crate::bus::{OrderEvent, OrderEventKind};
use crate::config::{AutoShipRuleConfig, ShippingConfig};
use crate::observe::{EngineEvent, ObservabilitySink};
use crate::utils::task_tracker::TaskTracker;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Order lifecycle. Transitions only move forward along
/// Created → Paid → ShipmentPending → Shipped → Confirmed → Closed, with
/// Cancelled reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    Created,
    Paid,
    ShipmentPending,
    Shipped,
    Confirmed,
    Closed,
    Cancelled,
}

impl OrderState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Cancelled)
    }

    pub fn can_transition(self, next: Self) -> bool {
        if next == Self::Cancelled {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Self::Created, Self::Paid)
                | (Self::Paid, Self::ShipmentPending)
                | (Self::ShipmentPending, Self::Shipped)
                | (Self::Shipped, Self::Confirmed)
                | (Self::Confirmed, Self::Closed)
        )
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Paid => "paid",
            Self::ShipmentPending => "shipment_pending",
            Self::Shipped => "shipped",
            Self::Confirmed => "confirmed",
            Self::Closed => "closed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct Order {
    pub id: String,
    pub account_id: String,
    pub item_id: String,
    pub item_title: Option<String>,
    pub state: OrderState,
    /// Assigned once at first sight of the order and reused verbatim on
    /// every shipment retry.
    pub idempotency_key: String,
    pub retry_count: u32,
    /// Set when automated handling gave up; the order keeps its last state
    /// and waits for a human.
    pub escalated: bool,
}

impl Order {
    fn from_event(ev: &OrderEvent) -> Self {
        Self {
            id: ev.order_id.clone(),
            account_id: ev.account_id.clone(),
            item_id: ev.item_id.clone(),
            item_title: ev.item_title.clone(),
            state: OrderState::Created,
            idempotency_key: uuid::Uuid::new_v4().to_string(),
            retry_count: 0,
            escalated: false,
        }
    }
}

fn auto_ship_eligible(rules: &[AutoShipRuleConfig], order: &Order) -> bool {
    rules.iter().filter(|r| r.enabled).any(|rule| {
        rule.item_ids.iter().any(|id| id == &order.item_id)
            || order.item_title.as_ref().is_some_and(|title| {
                rule.keywords.iter().any(|kw| title.contains(kw.as_str()))
            })
    })
}

struct Inner {
    api: Arc<dyn MarketplaceApi>,
    config: ShippingConfig,
    orders: Mutex<HashMap<String, Order>>,
    ledger: Mutex<ShipmentLedger>,
    sink: Arc<dyn ObservabilitySink>,
    timers: TaskTracker,
}

/// Per-order state machine driving automatic shipment and confirmation.
/// Called from account pipelines; long-running work (retries, confirm
/// delays) suspends only the calling pipeline or runs on its own timer task.
#[derive(Clone)]
pub struct ShipmentOrchestrator {
    inner: Arc<Inner>,
}

impl ShipmentOrchestrator {
    pub fn new(
        api: Arc<dyn MarketplaceApi>,
        config: ShippingConfig,
        sink: Arc<dyn ObservabilitySink>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                config,
                orders: Mutex::new(HashMap::new()),
                ledger: Mutex::new(ShipmentLedger::new()),
                sink,
                timers: TaskTracker::new(),
            }),
        }
    }

    /// Feed one order event through the state machine.
    pub async fn handle_event(&self, ev: &OrderEvent) {
        let should_ship = {
            let mut orders = self.inner.orders.lock().await;
            let order = orders
                .entry(ev.order_id.clone())
                .or_insert_with(|| Order::from_event(ev));

            match ev.kind {
                OrderEventKind::Created => false,
                OrderEventKind::Paid => {
                    if !self.apply(order, OrderState::Paid) {
                        false
                    } else if auto_ship_eligible(&self.inner.config.auto_ship, order) {
                        self.apply(order, OrderState::ShipmentPending)
                    } else {
                        debug!(order = %order.id, "paid order not eligible for auto-ship");
                        false
                    }
                }
                OrderEventKind::Confirmed => {
                    self.apply(order, OrderState::Confirmed);
                    false
                }
                OrderEventKind::Closed => {
                    self.apply(order, OrderState::Closed);
                    false
                }
                OrderEventKind::Cancelled => {
                    self.apply(order, OrderState::Cancelled);
                    false
                }
            }
        };

        match ev.kind {
            OrderEventKind::Confirmed | OrderEventKind::Cancelled | OrderEventKind::Closed => {
                self.inner.timers.cancel(&confirm_task_name(&ev.order_id)).await;
            }
            _ => {}
        }

        if should_ship {
            self.attempt_shipment(&ev.order_id).await;
        }
    }

    /// Apply a transition if the state machine allows it. Invalid
    /// transitions are logged and rejected, never applied.
    fn apply(&self, order: &mut Order, to: OrderState) -> bool {
        let from = order.state;
        if !from.can_transition(to) {
            warn!(
                order = %order.id,
                from = %from,
                to = %to,
                "rejected invalid order transition"
            );
            return false;
        }
        order.state = to;
        self.inner.sink.emit(EngineEvent::OrderTransition {
            order_id: order.id.clone(),
            from,
            to,
        });
        true
    }

    /// Drive ShipmentPending → Shipped with bounded retries. The same
    /// idempotency key is reused on every call; the local ledger guarantees
    /// the remote API is not asked to ship an order it already shipped.
    pub async fn attempt_shipment(&self, order_id: &str) {
        let Some((account_id, key)) = ({
            let orders = self.inner.orders.lock().await;
            orders.get(order_id).and_then(|o| {
                (o.state == OrderState::ShipmentPending && !o.escalated)
                    .then(|| (o.account_id.clone(), o.idempotency_key.clone()))
            })
        }) else {
            return;
        };

        let mut attempt = 0u32;
        loop {
            if self.inner.ledger.lock().await.contains(order_id) {
                debug!(order = %order_id, "shipment already recorded, skipping remote call");
                self.mark_shipped(order_id).await;
                return;
            }

            match self.inner.api.ship_order(&account_id, order_id, &key).await {
                Ok(()) => {
                    self.inner.ledger.lock().await.record(order_id, &key);
                    self.mark_shipped(order_id).await;
                    return;
                }
                Err(e) => {
                    let retryable = e.is_retryable();
                    if retryable && attempt < self.inner.config.retry_max {
                        let retries = {
                            let mut orders = self.inner.orders.lock().await;
                            match orders.get_mut(order_id) {
                                Some(o) => {
                                    o.retry_count += 1;
                                    o.retry_count
                                }
                                None => return,
                            }
                        };
                        let delay = shipment_backoff(
                            attempt,
                            self.inner.config.retry_base_delay_ms,
                            e.retry_after(),
                        );
                        warn!(
                            order = %order_id,
                            retry = retries,
                            max = self.inner.config.retry_max,
                            error = %e,
                            "shipment call failed, retrying in {:?}",
                            delay
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    } else {
                        warn!(order = %order_id, error = %e, "shipment failed, escalating");
                        self.escalate(order_id).await;
                        return;
                    }
                }
            }
        }
    }

    async fn mark_shipped(&self, order_id: &str) {
        let shipped = {
            let mut orders = self.inner.orders.lock().await;
            match orders.get_mut(order_id) {
                Some(order) if order.state == OrderState::ShipmentPending => {
                    self.apply(order, OrderState::Shipped)
                }
                _ => false,
            }
        };
        if shipped && self.inner.config.confirm_active {
            self.schedule_confirm(order_id).await;
        }
    }

    /// Retries exhausted: flag the order for a human. It keeps its last
    /// state so the operator sees exactly where automation stopped.
    async fn escalate(&self, order_id: &str) {
        let retries = {
            let mut orders = self.inner.orders.lock().await;
            match orders.get_mut(order_id) {
                Some(order) => {
                    order.escalated = true;
                    order.retry_count
                }
                None => return,
            }
        };
        self.inner.sink.emit(EngineEvent::OrderEscalated {
            order_id: order_id.to_string(),
            retries,
        });
    }

    /// Some marketplaces require the seller to actively confirm shipment.
    /// Schedule a delayed confirm call; a confirmation event arriving first
    /// cancels the timer.
    async fn schedule_confirm(&self, order_id: &str) {
        let this = self.clone();
        let order_id = order_id.to_string();
        let delay = Duration::from_secs(self.inner.config.confirm_delay_secs);
        let name = confirm_task_name(&order_id);
        self.inner
            .timers
            .spawn_auto_cleanup(name, async move {
                tokio::time::sleep(delay).await;
                this.confirm_now(&order_id).await;
            })
            .await;
    }

    async fn confirm_now(&self, order_id: &str) {
        let Some(account_id) = ({
            let orders = self.inner.orders.lock().await;
            orders.get(order_id).and_then(|o| {
                (o.state == OrderState::Shipped).then(|| o.account_id.clone())
            })
        }) else {
            return;
        };

        match self.inner.api.confirm_shipment(&account_id, order_id).await {
            Ok(()) => {
                let mut orders = self.inner.orders.lock().await;
                if let Some(order) = orders.get_mut(order_id) {
                    self.apply(order, OrderState::Confirmed);
                }
                info!(order = %order_id, "shipment confirmed");
            }
            Err(e) => {
                warn!(order = %order_id, error = %e, "confirm-shipment call failed");
            }
        }
    }

    /// Snapshot of one order, for diagnostics and tests.
    pub async fn order(&self, order_id: &str) -> Option<Order> {
        self.inner.orders.lock().await.get(order_id).cloned()
    }

    pub async fn shutdown(&self) {
        self.inner.timers.cancel_all().await;
    }
}

fn confirm_task_name(order_id: &str) -> String {
    format!("confirm:{}", order_id)
}

fn shipment_backoff(attempt: u32, base_ms: u64, hint_secs: Option<u64>) -> Duration {
    if let Some(secs) = hint_secs {
        return Duration::from_secs(secs);
    }
    let base = (base_ms as f64) * 2.0_f64.powi(attempt.min(16) as i32);
    let jitter = base * 0.25 * fastrand::f64();
    Duration::from_millis((base + jitter).min(60_000.0) as u64)
}
