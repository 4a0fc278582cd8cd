mod common;

use common::{
    FeedScript, RecordingApi, ScriptFeed, StaticCreds, contains_rule, message_payload,
    single_account_config, wait_until,
};
use stallbot::engine::Engine;
use stallbot::observe::{EngineEvent, RecordingSink};
use std::sync::Arc;
use std::time::Duration;

fn build_engine(
    config: stallbot::config::Config,
    feed: Arc<ScriptFeed>,
    api: Arc<RecordingApi>,
) -> (Engine, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::new());
    let engine = Engine::with_parts(config, feed, Arc::new(StaticCreds), api, sink.clone())
        .expect("engine builds");
    (engine, sink)
}

#[tokio::test]
async fn test_price_question_gets_rule_reply() {
    let feed = Arc::new(ScriptFeed::new());
    feed.script(
        "a1",
        FeedScript::Session(vec![message_payload("m1", "c1", "多少钱")]),
    );
    let api = Arc::new(RecordingApi::new());
    let config = single_account_config(vec![contains_rule("多少钱", "亲，价格见详情页", 0)]);
    let (engine, _sink) = build_engine(config, feed, api.clone());

    engine.start().await;
    wait_until(Duration::from_secs(5), || !api.sent_texts().is_empty()).await;

    assert_eq!(api.sent_texts(), vec!["亲，价格见详情页"]);
    let sends = api.sends.lock().unwrap();
    assert_eq!(sends[0].0, "a1");
    assert_eq!(sends[0].1, "c1");
    drop(sends);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_raw_events_reply_once() {
    let feed = Arc::new(ScriptFeed::new());
    feed.script(
        "a1",
        FeedScript::Session(vec![
            message_payload("m1", "c1", "多少钱"),
            message_payload("m1", "c1", "多少钱"),
            message_payload("m1", "c1", "多少钱"),
            // A distinct trailing message proves the pipeline kept going.
            message_payload("m2", "c1", "你好"),
        ]),
    );
    let api = Arc::new(RecordingApi::new());
    let config = single_account_config(vec![
        contains_rule("多少钱", "亲，价格见详情页", 10),
        contains_rule("你好", "您好！", 0),
    ]);
    let (engine, _sink) = build_engine(config, feed, api.clone());

    engine.start().await;
    wait_until(Duration::from_secs(5), || api.sent_texts().len() >= 2).await;

    // Exactly one reply for the triplicated message id
    assert_eq!(api.sent_texts(), vec!["亲，价格见详情页", "您好！"]);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_identical_content_decided_identically() {
    let feed = Arc::new(ScriptFeed::new());
    feed.script(
        "a1",
        FeedScript::Session(vec![
            message_payload("m1", "c1", "包邮吗?"),
            message_payload("m2", "c2", "包邮吗?"),
            message_payload("m3", "c3", "包邮吗?"),
        ]),
    );
    let api = Arc::new(RecordingApi::new());
    let config = single_account_config(vec![
        contains_rule("包邮", "满99包邮哦", 5),
        contains_rule("吗", "请稍等", 0),
    ]);
    let (engine, _sink) = build_engine(config, feed, api.clone());

    engine.start().await;
    wait_until(Duration::from_secs(5), || api.sent_texts().len() >= 3).await;

    assert_eq!(api.sent_texts(), vec!["满99包邮哦"; 3]);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_unmatched_message_is_ignored_not_escalated() {
    let feed = Arc::new(ScriptFeed::new());
    feed.script(
        "a1",
        FeedScript::Session(vec![
            message_payload("m1", "c1", "随便聊聊"),
            message_payload("m2", "c1", "多少钱"),
        ]),
    );
    let api = Arc::new(RecordingApi::new());
    let config = single_account_config(vec![contains_rule("多少钱", "亲，价格见详情页", 0)]);
    let (engine, sink) = build_engine(config, feed, api.clone());

    engine.start().await;
    wait_until(Duration::from_secs(5), || !api.sent_texts().is_empty()).await;

    assert_eq!(api.sent_texts(), vec!["亲，价格见详情页"]);
    let decisions: Vec<String> = sink
        .events()
        .into_iter()
        .filter_map(|e| match e {
            EngineEvent::Decision { action, .. } => Some(action),
            _ => None,
        })
        .collect();
    assert_eq!(decisions, vec!["ignore", "reply"]);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_bargain_rounds_capped_with_refusal() {
    let feed = Arc::new(ScriptFeed::new());
    feed.script(
        "a1",
        FeedScript::Session(vec![
            message_payload("m1", "c1", "能便宜点吗"),
            message_payload("m2", "c1", "再便宜点"),
            message_payload("m3", "c1", "还能便宜吗"),
            message_payload("m4", "c1", "最后问一次能便宜吗"),
        ]),
    );
    let api = Arc::new(RecordingApi::new());
    let config = single_account_config(vec![contains_rule("便宜", "给您让5元", 0)]);
    let (engine, _sink) = build_engine(config, feed, api.clone());

    engine.start().await;
    wait_until(Duration::from_secs(5), || api.sent_texts().len() >= 4).await;

    let texts = api.sent_texts();
    assert_eq!(&texts[..3], &["给您让5元", "给您让5元", "给您让5元"]);
    assert_eq!(texts[3], "抱歉，这个价格已经是最优惠的了，不能再便宜了哦！");
    engine.shutdown().await;
}

#[tokio::test]
async fn test_malformed_and_unknown_payloads_skipped_without_stalling() {
    let feed = Arc::new(ScriptFeed::new());
    feed.script(
        "a1",
        FeedScript::Session(vec![
            serde_json::json!({"type": "message"}),
            serde_json::json!({"type": "presence", "who": "buyer"}),
            serde_json::json!({"no": "type"}),
            message_payload("m1", "c1", "多少钱"),
        ]),
    );
    let api = Arc::new(RecordingApi::new());
    let config = single_account_config(vec![contains_rule("多少钱", "亲，价格见详情页", 0)]);
    let (engine, _sink) = build_engine(config, feed, api.clone());

    engine.start().await;
    wait_until(Duration::from_secs(5), || !api.sent_texts().is_empty()).await;

    assert_eq!(api.sent_texts(), vec!["亲，价格见详情页"]);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_reload_rules_applies_to_subsequent_messages() {
    let feed = Arc::new(ScriptFeed::new());
    feed.script(
        "a1",
        FeedScript::Session(vec![message_payload("m1", "c1", "多少钱")]),
    );
    let api = Arc::new(RecordingApi::new());
    let config = single_account_config(vec![contains_rule("多少钱", "老规矩", 0)]);
    let (engine, _sink) = build_engine(config, feed.clone(), api.clone());

    engine.start().await;
    wait_until(Duration::from_secs(5), || !api.sent_texts().is_empty()).await;
    assert_eq!(api.sent_texts(), vec!["老规矩"]);

    let new_reply = stallbot::config::ReplyConfig {
        rules: vec![contains_rule("多少钱", "新价格表", 0)],
        ..stallbot::config::ReplyConfig::default()
    };
    engine.reload_rules(&new_reply).await.unwrap();

    // Feed a second session with the same question after a forced reconnect
    feed.script(
        "a1",
        FeedScript::Session(vec![message_payload("m2", "c1", "多少钱")]),
    );
    engine.close_account("a1").await;
    engine.start().await;
    wait_until(Duration::from_secs(5), || api.sent_texts().len() >= 2).await;

    assert_eq!(api.sent_texts()[1], "新价格表");
    engine.shutdown().await;
}
