//! Tests for merged head subscriptions: one channel fed by every endpoint,
//! including endpoints that join after subscription start.

mod common;

use std::time::Duration;

use alloy::providers::{Provider, ext::AnvilApi};
use common::{BUFFER_TIME, RETRY_PERIOD, driver, pool_over, spawn_anvil, ws_pool};
use multiplex_provider::{Error, HeadEvent};
use tokio::{sync::mpsc, time::timeout};

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

async fn next_event(rx: &mut mpsc::Receiver<HeadEvent>) -> HeadEvent {
    timeout(EVENT_TIMEOUT, rx.recv()).await.expect("timed out").expect("channel closed")
}

// ============================================================================
// Basic Delivery
// ============================================================================

#[tokio::test]
async fn test_heads_arrive_from_single_endpoint() -> anyhow::Result<()> {
    let anvil = spawn_anvil()?;
    let pool = ws_pool(&[&anvil]).await?;

    let (tx, mut rx) = mpsc::channel(16);
    let subscription = pool.subscribe_heads(tx)?;

    let miner = driver(&anvil);
    for expected in 1..=3 {
        miner.anvil_mine(Some(1), None).await?;
        let event = next_event(&mut rx).await;
        assert_eq!(event.header.number, expected);
        assert_eq!(event.source.url.as_ref(), anvil.ws_endpoint());
    }

    subscription.unsubscribe().await;
    pool.close().await;
    Ok(())
}

#[tokio::test]
async fn test_events_carry_their_source_endpoint() -> anyhow::Result<()> {
    let anvil = spawn_anvil()?;
    let pool = ws_pool(&[&anvil]).await?;

    let (tx, mut rx) = mpsc::channel(16);
    let subscription = pool.subscribe_heads(tx)?;

    driver(&anvil).anvil_mine(Some(1), None).await?;
    let event = next_event(&mut rx).await;

    // The source handle points at the node that announced the block, so
    // follow-up queries hit a node that has it
    let block = event
        .source
        .provider
        .get_block_by_number(event.header.number.into())
        .await?
        .expect("announced block should exist on its source");
    assert_eq!(block.header.hash, event.header.hash);

    subscription.unsubscribe().await;
    pool.close().await;
    Ok(())
}

// ============================================================================
// Endpoint Churn
// ============================================================================

#[tokio::test]
async fn test_endpoint_added_mid_subscription_gets_a_worker() -> anyhow::Result<()> {
    let anvil_a = spawn_anvil()?;
    let pool = ws_pool(&[&anvil_a]).await?;

    let (tx, mut rx) = mpsc::channel(16);
    let subscription = pool.subscribe_heads(tx)?;

    // A second node shows up after the subscription started
    let anvil_b = spawn_anvil()?;
    pool.add_endpoint(anvil_b.ws_endpoint());

    // Give the reconnect loop a moment to dial the new slot
    tokio::time::sleep(RETRY_PERIOD + BUFFER_TIME).await;

    driver(&anvil_b).anvil_mine(Some(1), None).await?;
    let event = next_event(&mut rx).await;
    assert_eq!(event.header.number, 1);
    assert_eq!(event.source.url.as_ref(), anvil_b.ws_endpoint());

    subscription.unsubscribe().await;
    pool.close().await;
    Ok(())
}

#[tokio::test]
async fn test_subscription_survives_endpoint_removal() -> anyhow::Result<()> {
    let anvil_a = spawn_anvil()?;
    let anvil_b = spawn_anvil()?;
    let pool = ws_pool(&[&anvil_a, &anvil_b]).await?;

    let (tx, mut rx) = mpsc::channel(16);
    let subscription = pool.subscribe_heads(tx)?;

    pool.remove_endpoint(&anvil_b.ws_endpoint());

    driver(&anvil_a).anvil_mine(Some(1), None).await?;
    let event = next_event(&mut rx).await;
    assert_eq!(event.source.url.as_ref(), anvil_a.ws_endpoint());

    subscription.unsubscribe().await;
    pool.close().await;
    Ok(())
}

// ============================================================================
// Termination
// ============================================================================

#[tokio::test]
async fn test_subscribe_with_no_slots_errors() -> anyhow::Result<()> {
    let pool = pool_over(Vec::<String>::new()).await?;

    let (tx, _rx) = mpsc::channel(16);
    assert!(matches!(pool.subscribe_heads(tx), Err(Error::NoEndpoint)));

    pool.close().await;
    Ok(())
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery() -> anyhow::Result<()> {
    let anvil = spawn_anvil()?;
    let pool = ws_pool(&[&anvil]).await?;

    let (tx, mut rx) = mpsc::channel(16);
    let subscription = pool.subscribe_heads(tx)?;
    subscription.unsubscribe().await;

    driver(&anvil).anvil_mine(Some(1), None).await?;
    tokio::time::sleep(BUFFER_TIME).await;

    // All workers are gone, so the sender side is closed and empty
    assert!(rx.recv().await.is_none());

    pool.close().await;
    Ok(())
}

#[tokio::test]
async fn test_closing_the_pool_terminates_subscriptions() -> anyhow::Result<()> {
    let anvil = spawn_anvil()?;
    let pool = ws_pool(&[&anvil]).await?;

    let (tx, mut rx) = mpsc::channel(16);
    let _subscription = pool.subscribe_heads(tx)?;

    pool.close().await;

    // Workers exit on the pool's cancellation; the channel drains to None
    let closed = timeout(EVENT_TIMEOUT, rx.recv()).await.expect("timed out");
    assert!(closed.is_none());

    Ok(())
}

// ============================================================================
// Stream Convenience
// ============================================================================

#[tokio::test]
async fn test_heads_as_stream() -> anyhow::Result<()> {
    use tokio_stream::StreamExt;

    let anvil = spawn_anvil()?;
    let pool = ws_pool(&[&anvil]).await?;

    let (subscription, mut stream) = pool.subscribe_heads_stream()?;

    driver(&anvil).anvil_mine(Some(2), None).await?;
    let first = timeout(EVENT_TIMEOUT, stream.next()).await?.expect("stream ended");
    let second = timeout(EVENT_TIMEOUT, stream.next()).await?.expect("stream ended");
    assert_eq!(first.header.number, 1);
    assert_eq!(second.header.number, 2);

    subscription.unsubscribe().await;
    pool.close().await;
    Ok(())
}
