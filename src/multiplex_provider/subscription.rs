//! Merged new-head subscriptions across every pool endpoint.
//!
//! One worker per endpoint feeds a single caller-owned channel. Workers are
//! spawned for every slot known at subscription time and for every endpoint
//! the dialer connects afterwards. A worker that loses its stream waits one
//! retry period and re-attaches, unless its endpoint has been removed from
//! the registry in the meantime.
//!
//! Events are delivered at-least-once per source endpoint and are not
//! de-duplicated across endpoints; consumers that need exactly-one-per-block
//! should key off the block hash. The caller owns the output channel, so a
//! slow consumer exerts backpressure on every worker instead of dropping
//! events.

use std::{sync::Arc, time::Duration};

use alloy::{
    network::{Ethereum, Network},
    providers::Provider,
    transports::{RpcError, TransportErrorKind},
};
use tokio::{
    sync::{broadcast, mpsc},
    task::{JoinHandle, JoinSet},
    time::sleep,
};
use tokio_util::sync::CancellationToken;

use super::registry::{Endpoint, EndpointRegistry};

/// A new-head notification together with the endpoint that produced it.
///
/// Follow-up queries (e.g. fetching the full block) should go to
/// `source.provider`: other endpoints may not have imported the block yet.
#[derive(Debug, Clone)]
pub struct HeadEvent<N: Network = Ethereum> {
    /// The announced header.
    pub header: N::HeaderResponse,
    /// The endpoint whose stream announced it.
    pub source: Endpoint<N>,
}

/// Handle to a merged head subscription.
///
/// Dropping the handle does not stop delivery; call
/// [`unsubscribe`](Self::unsubscribe) for a clean shutdown, or drop the
/// receiving end of the event channel (workers stop at their next send).
/// Closing the pool cancels every subscription as well.
#[derive(Debug)]
pub struct HeadsSubscription {
    cancel: CancellationToken,
    supervisor: JoinHandle<()>,
}

impl HeadsSubscription {
    /// Spawns workers for all current slots plus a supervisor that attaches
    /// workers to endpoints announced on `new_endpoints`.
    pub(crate) fn spawn<N: Network>(
        registry: Arc<EndpointRegistry<N>>,
        mut new_endpoints: broadcast::Receiver<u64>,
        tx: mpsc::Sender<HeadEvent<N>>,
        cancel: CancellationToken,
        retry_period: Duration,
    ) -> Self {
        let mut workers = JoinSet::new();
        for id in registry.ids() {
            workers.spawn(head_worker(
                registry.clone(),
                id,
                tx.clone(),
                cancel.clone(),
                retry_period,
            ));
        }

        let worker_cancel = cancel.clone();
        let supervisor = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = worker_cancel.cancelled() => break,
                    arrival = new_endpoints.recv() => match arrival {
                        Ok(id) => {
                            debug!(id, "attaching head worker to new endpoint");
                            workers.spawn(head_worker(
                                registry.clone(),
                                id,
                                tx.clone(),
                                worker_cancel.clone(),
                                retry_period,
                            ));
                        }
                        Err(broadcast::error::RecvError::Lagged(count)) => {
                            warn!(skipped = count, "missed new-endpoint announcements");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    // Reap finished workers so the set doesn't grow with churn
                    Some(_) = workers.join_next(), if !workers.is_empty() => {}
                }
            }
            while workers.join_next().await.is_some() {}
        });

        Self { cancel, supervisor }
    }

    /// Cancels every worker and waits for all of them to finish.
    pub async fn unsubscribe(self) {
        self.cancel.cancel();
        let _ = self.supervisor.await;
    }
}

/// Feeds one endpoint's head stream into the shared channel, re-attaching
/// after failures until the endpoint disappears or the subscription ends.
async fn head_worker<N: Network>(
    registry: Arc<EndpointRegistry<N>>,
    id: u64,
    tx: mpsc::Sender<HeadEvent<N>>,
    cancel: CancellationToken,
    retry_period: Duration,
) {
    loop {
        let Some(endpoint) = registry.get_by_id(id) else {
            trace!(id, "endpoint gone, stopping head worker");
            return;
        };

        match serve_heads(&endpoint, &tx, &cancel).await {
            Ok(()) => return,
            Err(err) => {
                warn!(id, url = %endpoint.url, error = %err, "head subscription failed");
            }
        }

        tokio::select! {
            () = cancel.cancelled() => return,
            () = sleep(retry_period) => {}
        }
        trace!(id, url = %endpoint.url, "retrying head subscription");
    }
}

/// Forwards headers from one endpoint until the stream fails.
///
/// `Ok(())` means a clean stop (cancellation, or the caller dropped the
/// receiver); an error means the worker should retry-wait and re-attach.
async fn serve_heads<N: Network>(
    endpoint: &Endpoint<N>,
    tx: &mpsc::Sender<HeadEvent<N>>,
    cancel: &CancellationToken,
) -> Result<(), RpcError<TransportErrorKind>> {
    let mut subscription = tokio::select! {
        () = cancel.cancelled() => return Ok(()),
        subscribed = async { endpoint.provider.subscribe_blocks().await } => subscribed?,
    };

    loop {
        tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            received = subscription.recv() => match received {
                Ok(header) => {
                    let event = HeadEvent { header, source: endpoint.clone() };
                    tokio::select! {
                        () = cancel.cancelled() => return Ok(()),
                        sent = tx.send(event) => {
                            if sent.is_err() {
                                trace!(url = %endpoint.url, "event receiver dropped, stopping head worker");
                                return Ok(());
                            }
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    warn!(url = %endpoint.url, skipped = count, "head stream lagged, skipping");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(TransportErrorKind::custom_str("head stream closed"));
                }
            }
        }
    }
}
