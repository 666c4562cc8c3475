use std::{marker::PhantomData, sync::Arc, time::Duration};

use alloy::network::{Ethereum, Network};
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use super::{
    dialer::Dialer,
    discovery::{Discovery, StaticEndpoints},
    errors::Error,
    provider::MultiplexProvider,
    registry::EndpointRegistry,
    retry::RetryPolicy,
};

#[cfg(feature = "k8s-discovery")]
use super::k8s::KubernetesEndpoints;

/// Default timeout for dialing one endpoint.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);
/// Default period between reconnect passes; also the pause before a
/// subscription worker re-attaches after a stream failure.
pub const DEFAULT_RETRY_PERIOD: Duration = Duration::from_secs(10);
/// Default budget for a single dispatch attempt.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default pause between dispatch attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
/// Default attempt limit; zero means one attempt per pooled endpoint.
pub const DEFAULT_RETRY_LIMIT: u32 = 0;
/// Default buffer of the stream returned by
/// [`MultiplexProvider::subscribe_heads_stream`].
pub const DEFAULT_SUBSCRIPTION_BUFFER_CAPACITY: usize = 128;

// Capacity of the new-endpoint announcement topic. Publishing never blocks;
// a subscriber this far behind only loses attach latency, not correctness.
const NEW_ENDPOINT_TOPIC_CAPACITY: usize = 10;

/// Builder for constructing a [`MultiplexProvider`].
///
/// Configure endpoint discovery, the retry budget, and the background
/// redial cadence, then call [`build`](Self::build).
pub struct MultiplexProviderBuilder<N: Network = Ethereum> {
    discoverers: Vec<Box<dyn Discovery>>,
    retry_limit: u32,
    attempt_timeout: Duration,
    retry_delay: Duration,
    dial_timeout: Duration,
    retry_period: Duration,
    subscription_buffer_capacity: usize,
    _network: PhantomData<N>,
}

impl<N: Network> Default for MultiplexProviderBuilder<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: Network> MultiplexProviderBuilder<N> {
    /// Creates a builder with default settings and no endpoints.
    #[must_use]
    pub fn new() -> Self {
        Self {
            discoverers: Vec::new(),
            retry_limit: DEFAULT_RETRY_LIMIT,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            retry_delay: DEFAULT_RETRY_DELAY,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            retry_period: DEFAULT_RETRY_PERIOD,
            subscription_buffer_capacity: DEFAULT_SUBSCRIPTION_BUFFER_CAPACITY,
            _network: PhantomData,
        }
    }

    /// Adds one static endpoint URL.
    #[must_use]
    pub fn url(self, url: impl Into<String>) -> Self {
        self.urls([url.into()])
    }

    /// Adds a static list of endpoint URLs.
    #[must_use]
    pub fn urls<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.discoverers.push(Box::new(StaticEndpoints::new(urls)));
        self
    }

    /// Adds a discovery source, consulted once during [`build`](Self::build).
    #[must_use]
    pub fn discovery(mut self, discovery: impl Discovery + 'static) -> Self {
        self.discoverers.push(Box::new(discovery));
        self
    }

    /// Discovers endpoints from a Kubernetes service, building URLs with
    /// `scheme`. Use [`discovery`](Self::discovery) with a configured
    /// [`KubernetesEndpoints`] to point at an explicit kubeconfig.
    #[cfg(feature = "k8s-discovery")]
    #[must_use]
    pub fn k8s_endpoints(
        self,
        namespace: impl Into<String>,
        service: impl Into<String>,
        scheme: impl Into<String>,
    ) -> Self {
        self.discovery(KubernetesEndpoints::new(namespace, service, scheme))
    }

    /// Sets the total attempt count for first-success dispatch.
    ///
    /// Zero (the default) means one attempt per pooled endpoint at call
    /// time.
    #[must_use]
    pub fn retry_limit(mut self, limit: u32) -> Self {
        self.retry_limit = limit;
        self
    }

    /// Sets the budget for a single dispatch attempt.
    /// [`Duration::ZERO`] falls back to [`DEFAULT_ATTEMPT_TIMEOUT`].
    #[must_use]
    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Sets the pause between dispatch attempts.
    /// [`Duration::ZERO`] falls back to [`DEFAULT_RETRY_DELAY`].
    #[must_use]
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Sets the timeout for dialing one endpoint.
    /// [`Duration::ZERO`] falls back to [`DEFAULT_DIAL_TIMEOUT`].
    #[must_use]
    pub fn dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    /// Sets the cadence of background redial passes and the re-attach pause
    /// of subscription workers.
    /// [`Duration::ZERO`] falls back to [`DEFAULT_RETRY_PERIOD`].
    #[must_use]
    pub fn retry_period(mut self, period: Duration) -> Self {
        self.retry_period = period;
        self
    }

    /// Sets the buffer capacity used by
    /// [`MultiplexProvider::subscribe_heads_stream`].
    #[must_use]
    pub fn subscription_buffer_capacity(mut self, capacity: usize) -> Self {
        self.subscription_buffer_capacity = capacity;
        self
    }

    /// Builds the pool: runs discovery, dials every discovered endpoint
    /// once, and starts the background reconnect loop.
    ///
    /// Construction succeeds even when no endpoint is reachable — the pool
    /// can recover later — but a discovery failure aborts it.
    ///
    /// # Errors
    ///
    /// * [`Error::Discovery`] - a discovery source failed.
    pub async fn build(self) -> Result<MultiplexProvider<N>, Error> {
        debug!(
            retry_limit = self.retry_limit,
            attempt_timeout_ms = self.attempt_timeout.as_millis(),
            retry_delay_ms = self.retry_delay.as_millis(),
            retry_period_ms = self.retry_period.as_millis(),
            "building multiplex provider"
        );

        let (nudge_tx, nudge_rx) = mpsc::channel(1);
        let (new_endpoint_tx, _) = broadcast::channel(NEW_ENDPOINT_TOPIC_CAPACITY);
        let registry = Arc::new(EndpointRegistry::new(nudge_tx));

        for discovery in &self.discoverers {
            for url in discovery.discover().await? {
                registry.add(url);
            }
        }

        let retry_policy = RetryPolicy {
            limit: self.retry_limit,
            attempt_timeout: or_default(self.attempt_timeout, DEFAULT_ATTEMPT_TIMEOUT),
            delay: or_default(self.retry_delay, DEFAULT_RETRY_DELAY),
        };
        let retry_period = or_default(self.retry_period, DEFAULT_RETRY_PERIOD);

        let dialer = Dialer {
            registry: registry.clone(),
            new_endpoint_tx: new_endpoint_tx.clone(),
            dial_timeout: or_default(self.dial_timeout, DEFAULT_DIAL_TIMEOUT),
            retry_period,
        };

        dialer.dial_unresolved().await;
        if registry.connected().is_empty() {
            warn!("no endpoint reachable at construction, pool may recover in the background");
        }

        let cancel = CancellationToken::new();
        let reconnect_task = tokio::spawn(dialer.run(nudge_rx, cancel.child_token()));

        info!(
            endpoints = registry.len(),
            connected = registry.connected().len(),
            "multiplex provider initialized"
        );

        Ok(MultiplexProvider {
            registry,
            retry_policy,
            retry_period,
            subscription_buffer_capacity: self.subscription_buffer_capacity,
            new_endpoints: new_endpoint_tx,
            reconnect_task: Arc::new(Mutex::new(Some(reconnect_task))),
            _shutdown: Arc::new(cancel.clone().drop_guard()),
            cancel,
        })
    }
}

fn or_default(value: Duration, fallback: Duration) -> Duration {
    if value.is_zero() { fallback } else { value }
}
