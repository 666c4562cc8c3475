//! Common test utilities and helpers for integration tests.

#![allow(dead_code)]

use std::time::Duration;

use alloy::providers::{Provider, ProviderBuilder};
use alloy_node_bindings::{Anvil, AnvilInstance};
use multiplex_provider::{MultiplexProvider, MultiplexProviderBuilder};

/// Per-attempt budget tightened for tests.
pub const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(2);

/// Pause between dispatch attempts, tightened for tests.
pub const RETRY_DELAY: Duration = Duration::from_millis(50);

/// Redial / subscription re-attach period, tightened for tests.
pub const RETRY_PERIOD: Duration = Duration::from_millis(200);

/// Buffer time for async operations.
pub const BUFFER_TIME: Duration = Duration::from_millis(100);

pub fn spawn_anvil() -> anyhow::Result<AnvilInstance> {
    Ok(Anvil::new().try_spawn()?)
}

/// Builds a pool over the given endpoint URLs with test timings.
pub async fn pool_over<I, S>(urls: I) -> anyhow::Result<MultiplexProvider>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Ok(MultiplexProviderBuilder::new()
        .urls(urls)
        .attempt_timeout(ATTEMPT_TIMEOUT)
        .retry_delay(RETRY_DELAY)
        .retry_period(RETRY_PERIOD)
        .build()
        .await?)
}

/// Builds a pool over the WebSocket endpoints of the given Anvil instances.
pub async fn ws_pool(anvils: &[&AnvilInstance]) -> anyhow::Result<MultiplexProvider> {
    pool_over(anvils.iter().map(|anvil| anvil.ws_endpoint())).await
}

/// A plain HTTP provider for driving one Anvil instance (mining, funding).
pub fn driver(anvil: &AnvilInstance) -> impl Provider {
    ProviderBuilder::new().connect_http(anvil.endpoint_url())
}
