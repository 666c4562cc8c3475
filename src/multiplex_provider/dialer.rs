//! Background dialing of unresolved endpoint slots.
//!
//! Discovery only registers URLs; this module turns them into live
//! connections. One pass dials every unresolved slot in parallel under a
//! fixed timeout and commits successes back to the registry, publishing the
//! slot id so subscription workers can attach. The background loop re-runs a
//! pass whenever a new slot is registered and on a periodic ticker, so
//! endpoints that failed a dial (or dropped later) are picked up again.

use std::{sync::Arc, time::Duration};

use alloy::{network::Network, providers::RootProvider};
use futures::future::join_all;
use tokio::{
    sync::{broadcast, mpsc},
    time::{Instant, MissedTickBehavior, interval_at, timeout},
};
use tokio_util::sync::CancellationToken;

use super::registry::EndpointRegistry;

pub(crate) struct Dialer<N: Network> {
    pub(crate) registry: Arc<EndpointRegistry<N>>,
    /// Topic announcing newly connected slot ids.
    pub(crate) new_endpoint_tx: broadcast::Sender<u64>,
    pub(crate) dial_timeout: Duration,
    pub(crate) retry_period: Duration,
}

impl<N: Network> Dialer<N> {
    /// One dial pass: connect every unresolved slot in parallel.
    ///
    /// Failures leave the slot unresolved for the next pass. Running a pass
    /// when nothing is unresolved is a no-op.
    pub(crate) async fn dial_unresolved(&self) {
        let urls = self.registry.unresolved_urls();
        if urls.is_empty() {
            return;
        }

        let dials = urls.into_iter().map(|url| async move {
            let outcome = timeout(self.dial_timeout, RootProvider::<N>::connect(url.as_ref())).await;
            (url, outcome)
        });

        for (url, outcome) in join_all(dials).await {
            match outcome {
                Ok(Ok(provider)) => {
                    // The slot may have been removed while we were dialing;
                    // in that case the fresh connection is simply dropped.
                    if let Some(id) = self.registry.replace(url.as_ref(), provider) {
                        info!(url = %url, id, "connected to endpoint");
                        let _ = self.new_endpoint_tx.send(id);
                    }
                }
                Ok(Err(err)) => {
                    warn!(url = %url, error = %err, "failed to dial endpoint");
                }
                Err(_elapsed) => {
                    warn!(url = %url, timeout = ?self.dial_timeout, "endpoint dial timed out");
                }
            }
        }
    }

    /// Runs dial passes until cancellation: one per registry nudge, one per
    /// `retry_period` tick.
    pub(crate) async fn run(self, mut nudge_rx: mpsc::Receiver<Arc<str>>, cancel: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + self.retry_period, self.retry_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    trace!("reconnect loop stopped");
                    return;
                }
                nudge = nudge_rx.recv() => {
                    match nudge {
                        Some(url) => {
                            trace!(url = %url, "new endpoint registered, dialing");
                            self.dial_unresolved().await;
                        }
                        // Registry gone; nothing left to dial.
                        None => return,
                    }
                }
                _ = ticker.tick() => {
                    self.dial_unresolved().await;
                }
            }
        }
    }
}
