// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::{AtomicUsize, Ordering};

use proptest::prelude::*;

use super::*;
use crate::test_support::{connected_client, eventually, FakeBroker};

const DEST: &str = "/topic/conversation/c1";

async fn manager_with_broker() -> anyhow::Result<(SubscriptionManager, FakeBroker)> {
    let broker = FakeBroker::new();
    let manager = SubscriptionManager::new();
    manager.set_client(Some(connected_client(&broker).await?));
    Ok((manager, broker))
}

fn counter() -> (Arc<AtomicUsize>, impl Fn(&Inbound) + Send + Sync + 'static) {
    let hits = Arc::new(AtomicUsize::new(0));
    let sink = Arc::clone(&hits);
    (hits, move |_: &Inbound| {
        sink.fetch_add(1, Ordering::SeqCst);
    })
}

// ── Multiplexing ───────────────────────────────────────────────────────

#[tokio::test]
async fn listeners_share_one_broker_subscription() -> anyhow::Result<()> {
    let (manager, broker) = manager_with_broker().await?;
    let (a_hits, a) = counter();
    let (b_hits, b) = counter();
    let first = manager.subscribe(DEST, a);
    let second = manager.subscribe(DEST, b);
    broker.wait_until(|b| b.active_subscriptions(DEST) == 1).await?;

    broker.publish(DEST, r#"{"messageId":"m1","senderType":"AGENT"}"#);
    eventually(|| a_hits.load(Ordering::SeqCst) == 1 && b_hits.load(Ordering::SeqCst) == 1).await?;
    assert_eq!(broker.subscribe_total(DEST), 1);
    assert_eq!(manager.listener_count(DEST), 2);

    first.unsubscribe();
    assert!(manager.has_subscription(DEST));
    second.unsubscribe();
    assert!(!manager.has_subscription(DEST));
    broker.wait_until(|b| b.active_subscriptions(DEST) == 0).await?;
    Ok(())
}

#[tokio::test]
async fn listener_removed_during_dispatch_does_not_skip_others() -> anyhow::Result<()> {
    let (manager, broker) = manager_with_broker().await?;
    let slot: Arc<Mutex<Option<Unsubscribe>>> = Arc::new(Mutex::new(None));
    let own = Arc::clone(&slot);
    let handle = manager.subscribe(DEST, move |_| {
        if let Some(handle) = own.lock().take() {
            handle.unsubscribe();
        }
    });
    *slot.lock() = Some(handle);
    let (hits, later) = counter();
    let _later = manager.subscribe(DEST, later);
    broker.wait_until(|b| b.active_subscriptions(DEST) == 1).await?;

    broker.publish(DEST, "{}");
    eventually(|| hits.load(Ordering::SeqCst) == 1).await?;
    assert_eq!(manager.listener_count(DEST), 1);
    Ok(())
}

#[tokio::test]
async fn subscribe_without_client_is_inactive() {
    let manager = SubscriptionManager::new();
    let handle = manager.subscribe(DEST, |_| {});
    assert!(!handle.is_active());
    assert!(manager.active_subscriptions().is_empty());
}

#[tokio::test]
async fn unsubscribe_destination_drops_all_listeners() -> anyhow::Result<()> {
    let (manager, broker) = manager_with_broker().await?;
    let _a = manager.subscribe(DEST, |_| {});
    let _b = manager.subscribe(DEST, |_| {});
    let _c = manager.subscribe("/user/queue/reply", |_| {});
    assert_eq!(manager.active_subscriptions(), vec!["/topic/conversation/c1", "/user/queue/reply"]);

    manager.unsubscribe(DEST);
    assert_eq!(manager.active_subscriptions(), vec!["/user/queue/reply"]);

    manager.dispose();
    assert!(manager.active_subscriptions().is_empty());
    assert!(manager.client().is_none());
    broker.wait_until(|b| b.active_subscriptions(DEST) == 0).await?;
    Ok(())
}

// ── One-shot ───────────────────────────────────────────────────────────

#[tokio::test]
async fn once_resolves_with_first_event_and_cleans_up() -> anyhow::Result<()> {
    let (manager, broker) = manager_with_broker().await?;
    let (hits, cb) = counter();
    let pending = manager.subscribe_once("/topic/widget/temp/t1", move |e| cb(e), Duration::from_secs(5));
    broker.wait_until(|b| b.active_subscriptions("/topic/widget/temp/t1") == 1).await?;

    broker.publish("/topic/widget/temp/t1", r#"{"type":"error","code":"E","message":"m"}"#);
    let event = pending.await?;

    assert_eq!(event.kind(), "error");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(!manager.has_subscription("/topic/widget/temp/t1"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn once_times_out_without_residue() -> anyhow::Result<()> {
    let (manager, broker) = manager_with_broker().await?;
    let result = manager.subscribe_once(DEST, |_| {}, Duration::from_millis(100)).await;

    assert_eq!(result, Err(ChatError::Timeout { destination: DEST.to_owned() }));
    assert!(!manager.has_subscription(DEST));
    broker.wait_until(|b| b.active_subscriptions(DEST) == 0).await?;
    Ok(())
}

#[tokio::test]
async fn once_keeps_existing_listeners() -> anyhow::Result<()> {
    let (manager, _broker) = manager_with_broker().await?;
    let _durable = manager.subscribe(DEST, |_| {});
    let result = manager.subscribe_once(DEST, |_| {}, Duration::from_millis(20)).await;

    assert!(matches!(result, Err(ChatError::Timeout { .. })));
    assert_eq!(manager.listener_count(DEST), 1);
    Ok(())
}

#[tokio::test]
async fn once_without_client_fails_fast() {
    let manager = SubscriptionManager::new();
    let result = manager.subscribe_once(DEST, |_| {}, Duration::from_secs(30)).await;
    assert_eq!(result, Err(ChatError::NotConnected));
}

#[tokio::test]
async fn once_is_cancelled_by_teardown() -> anyhow::Result<()> {
    let (manager, _broker) = manager_with_broker().await?;
    let pending = manager.subscribe_once(DEST, |_| {}, Duration::from_secs(30));
    manager.unsubscribe_all();
    assert_eq!(pending.await, Err(ChatError::Cancelled { destination: DEST.to_owned() }));
    Ok(())
}

// ── Properties ─────────────────────────────────────────────────────────

fn subscribe_then_release(order: Vec<usize>) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    runtime.block_on(async move {
        let (manager, broker) = manager_with_broker().await?;
        let client = manager.client().ok_or_else(|| anyhow::anyhow!("no client"))?;
        let mut handles: Vec<Option<Unsubscribe>> =
            (0..order.len()).map(|_| Some(manager.subscribe(DEST, |_| {}))).collect();
        anyhow::ensure!(client.subscription_count(DEST) == 1, "expected one underlying subscription");

        for (step, index) in order.iter().enumerate() {
            if let Some(handle) = handles[*index].take() {
                handle.unsubscribe();
            }
            let expected = usize::from(step + 1 < order.len());
            anyhow::ensure!(
                client.subscription_count(DEST) == expected,
                "after {} releases expected {expected} subscriptions",
                step + 1
            );
        }
        broker.wait_until(|b| b.active_subscriptions(DEST) == 0).await?;
        anyhow::ensure!(broker.subscribe_total(DEST) == 1, "broker saw more than one SUBSCRIBE");
        Ok(())
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn one_broker_subscription_per_destination(
        order in (1usize..8).prop_flat_map(|n| Just((0..n).collect::<Vec<_>>()).prop_shuffle())
    ) {
        let result = subscribe_then_release(order);
        prop_assert!(result.is_ok(), "{:?}", result.err());
    }
}
