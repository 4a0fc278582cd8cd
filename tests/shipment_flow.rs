mod common;

use common::{
    FeedScript, RecordingApi, ScriptFeed, StaticCreds, order_payload, single_account_config,
    wait_until,
};
use stallbot::config::{AutoShipRuleConfig, Config, ShippingConfig};
use stallbot::engine::Engine;
use stallbot::observe::{EngineEvent, RecordingSink};
use stallbot::shipment::OrderState;
use std::sync::Arc;
use std::time::Duration;

fn auto_ship_config() -> Config {
    let mut config = single_account_config(vec![]);
    config.shipping = ShippingConfig {
        auto_ship: vec![AutoShipRuleConfig {
            name: "virtual-goods".into(),
            item_ids: vec!["item-virtual".into()],
            keywords: vec!["自动发货".into()],
            enabled: true,
        }],
        retry_max: 3,
        retry_base_delay_ms: 1,
        confirm_delay_secs: 0,
        confirm_active: false,
    };
    config
}

fn build_engine(
    config: Config,
    feed: Arc<ScriptFeed>,
    api: Arc<RecordingApi>,
) -> (Engine, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::new());
    let engine = Engine::with_parts(config, feed, Arc::new(StaticCreds), api, sink.clone())
        .expect("engine builds");
    (engine, sink)
}

fn transitions(sink: &RecordingSink) -> Vec<(OrderState, OrderState)> {
    sink.events()
        .into_iter()
        .filter_map(|e| match e {
            EngineEvent::OrderTransition { from, to, .. } => Some((from, to)),
            _ => None,
        })
        .collect()
}

async fn wait_for_order_state(engine: &Engine, order_id: &str, state: OrderState) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if engine
            .orchestrator()
            .order(order_id)
            .await
            .is_some_and(|o| o.state == state)
        {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "order {} never reached {:?}",
            order_id,
            state
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_paid_order_ships_within_one_cycle() {
    let feed = Arc::new(ScriptFeed::new());
    feed.script(
        "a1",
        FeedScript::Session(vec![order_payload("o1", "item-virtual", "paid")]),
    );
    let api = Arc::new(RecordingApi::new());
    let (engine, sink) = build_engine(auto_ship_config(), feed, api.clone());

    engine.start().await;
    wait_for_order_state(&engine, "o1", OrderState::Shipped).await;

    let order = engine.orchestrator().order("o1").await.unwrap();
    assert_eq!(order.retry_count, 0);
    assert!(!order.escalated);
    assert_eq!(api.ship_call_count(), 1);
    assert_eq!(
        transitions(&sink),
        vec![
            (OrderState::Created, OrderState::Paid),
            (OrderState::Paid, OrderState::ShipmentPending),
            (OrderState::ShipmentPending, OrderState::Shipped),
        ]
    );
    engine.shutdown().await;
}

#[tokio::test]
async fn test_shipment_failures_escalate_in_place() {
    let feed = Arc::new(ScriptFeed::new());
    feed.script(
        "a1",
        FeedScript::Session(vec![order_payload("o2", "item-virtual", "paid")]),
    );
    // Fails more times than retry_max allows
    let api = Arc::new(RecordingApi::with_ship_failures(10));
    let (engine, sink) = build_engine(auto_ship_config(), feed, api.clone());

    engine.start().await;
    wait_until(Duration::from_secs(5), || {
        sink.events()
            .iter()
            .any(|e| matches!(e, EngineEvent::OrderEscalated { .. }))
    })
    .await;

    let order = engine.orchestrator().order("o2").await.unwrap();
    assert!(order.escalated);
    assert_eq!(order.state, OrderState::ShipmentPending);
    assert_eq!(order.retry_count, 3);
    // initial attempt + three retries, same idempotency key throughout
    assert_eq!(api.ship_call_count(), 4);
    let calls = api.ship_calls.lock().unwrap();
    let keys: std::collections::HashSet<&str> =
        calls.iter().map(|(_, key)| key.as_str()).collect();
    assert_eq!(keys.len(), 1, "idempotency key must never change");
    drop(calls);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_replayed_paid_event_ships_exactly_once() {
    let feed = Arc::new(ScriptFeed::new());
    feed.script(
        "a1",
        FeedScript::Session(vec![
            order_payload("o1", "item-virtual", "paid"),
            order_payload("o1", "item-virtual", "paid"),
            order_payload("o1", "item-virtual", "paid"),
        ]),
    );
    let api = Arc::new(RecordingApi::new());
    let (engine, _sink) = build_engine(auto_ship_config(), feed, api.clone());

    engine.start().await;
    wait_for_order_state(&engine, "o1", OrderState::Shipped).await;
    // Give the replayed events time to be (not) acted upon
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(api.ship_call_count(), 1);
    assert_eq!(
        engine.orchestrator().order("o1").await.unwrap().state,
        OrderState::Shipped
    );
    engine.shutdown().await;
}

#[tokio::test]
async fn test_ineligible_item_stays_paid() {
    let feed = Arc::new(ScriptFeed::new());
    feed.script(
        "a1",
        FeedScript::Session(vec![serde_json::json!({
            "type": "order",
            "orderId": "o3",
            "itemId": "physical-goods",
            "itemTitle": "需要人工发货的东西",
            "status": "paid",
        })]),
    );
    let api = Arc::new(RecordingApi::new());
    let (engine, _sink) = build_engine(auto_ship_config(), feed, api.clone());

    engine.start().await;
    wait_for_order_state(&engine, "o3", OrderState::Paid).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(
        engine.orchestrator().order("o3").await.unwrap().state,
        OrderState::Paid
    );
    assert_eq!(api.ship_call_count(), 0);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_cancellation_is_terminal() {
    let feed = Arc::new(ScriptFeed::new());
    feed.script(
        "a1",
        FeedScript::Session(vec![
            order_payload("o4", "other-item", "created"),
            order_payload("o4", "other-item", "cancelled"),
            // Late pay event after cancellation must be rejected
            order_payload("o4", "other-item", "paid"),
        ]),
    );
    let api = Arc::new(RecordingApi::new());
    let (engine, _sink) = build_engine(auto_ship_config(), feed, api.clone());

    engine.start().await;
    wait_for_order_state(&engine, "o4", OrderState::Cancelled).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(
        engine.orchestrator().order("o4").await.unwrap().state,
        OrderState::Cancelled
    );
    assert_eq!(api.ship_call_count(), 0);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_confirmation_and_close_complete_the_order() {
    let feed = Arc::new(ScriptFeed::new());
    feed.script(
        "a1",
        FeedScript::Session(vec![
            order_payload("o5", "item-virtual", "paid"),
            order_payload("o5", "item-virtual", "confirmed"),
            order_payload("o5", "item-virtual", "closed"),
        ]),
    );
    let api = Arc::new(RecordingApi::new());
    let (engine, _sink) = build_engine(auto_ship_config(), feed, api.clone());

    engine.start().await;
    wait_for_order_state(&engine, "o5", OrderState::Closed).await;
    engine.shutdown().await;
}

#[tokio::test]
async fn test_active_confirmation_issues_confirm_call() {
    let feed = Arc::new(ScriptFeed::new());
    feed.script(
        "a1",
        FeedScript::Session(vec![order_payload("o6", "item-virtual", "paid")]),
    );
    let api = Arc::new(RecordingApi::new());
    let mut config = auto_ship_config();
    config.shipping.confirm_active = true;
    config.shipping.confirm_delay_secs = 0;
    let (engine, _sink) = build_engine(config, feed, api.clone());

    engine.start().await;
    wait_for_order_state(&engine, "o6", OrderState::Confirmed).await;

    assert_eq!(*api.confirms.lock().unwrap(), vec!["o6"]);
    engine.shutdown().await;
}
