//! Core [`MultiplexProvider`] implementation: pooled dispatch with
//! first-success reads and broadcast writes.

use std::{borrow::Cow, sync::Arc, time::Duration};

use alloy::{
    eips::BlockNumberOrTag,
    network::{Ethereum, Network},
    primitives::{Address, BlockHash, BlockNumber, Bytes, TxHash, U256},
    providers::{Provider, RootProvider},
    rpc::{
        json_rpc::{RpcRecv, RpcSend},
        types::{Filter, Log},
    },
    transports::{TransportErrorKind, TransportResult},
};
use serde_json::Value;
use tokio::{
    sync::{Mutex, broadcast, mpsc},
    task::JoinHandle,
};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};

use super::{
    errors::{BroadcastError, CoreError, EndpointError, Error},
    registry::{Endpoint, EndpointRegistry},
    retry::{RetryPolicy, retry},
    subscription::{HeadEvent, HeadsSubscription},
};

/// A pool of upstream JSON-RPC endpoints behind one provider-like surface.
///
/// Reads rotate across connected endpoints until one succeeds; writes fan
/// out to every connected endpoint and succeed when at least one accepts.
/// Endpoints that cannot be reached stay registered and are redialed in the
/// background, so the pool recovers on its own.
///
/// Cloning is cheap; all clones share the pool. Background work stops when
/// [`close`](Self::close) is called or the last clone is dropped.
#[derive(Clone, Debug)]
pub struct MultiplexProvider<N: Network = Ethereum> {
    pub(crate) registry: Arc<EndpointRegistry<N>>,
    pub(crate) retry_policy: RetryPolicy,
    pub(crate) retry_period: Duration,
    pub(crate) subscription_buffer_capacity: usize,
    pub(crate) new_endpoints: broadcast::Sender<u64>,
    pub(crate) cancel: CancellationToken,
    pub(crate) reconnect_task: Arc<Mutex<Option<JoinHandle<()>>>>,
    pub(crate) _shutdown: Arc<DropGuard>,
}

impl<N: Network> MultiplexProvider<N> {
    /// Runs `op` against the pool, rotating across endpoints until one
    /// attempt succeeds or the attempt budget is exhausted.
    pub(crate) async fn first_success<T, F, Fut>(&self, op: F) -> Result<T, Error>
    where
        F: Fn(RootProvider<N>) -> Fut,
        Fut: Future<Output = TransportResult<T>>,
    {
        let endpoints = self.registry.connected();
        if endpoints.is_empty() {
            return Err(Error::NoEndpoint);
        }
        retry(self.retry_policy, &endpoints, op).await.map_err(Error::from)
    }

    /// Runs `op` once against every connected endpoint.
    ///
    /// Every endpoint completes its attempt: nothing is canceled when the
    /// first success lands, and the spawned attempts keep running even if
    /// the caller drops this future. Returns the first collected success, or
    /// [`Error::AllFailed`] with one entry per endpoint.
    pub(crate) async fn broadcast<T, F, Fut>(&self, op: F) -> Result<T, Error>
    where
        T: Send + 'static,
        F: Fn(Endpoint<N>) -> Fut,
        Fut: Future<Output = TransportResult<T>> + Send + 'static,
    {
        let endpoints = self.registry.connected();
        if endpoints.is_empty() {
            return Err(Error::NoEndpoint);
        }

        let mut attempts = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            let url = endpoint.url.clone();
            attempts.push((url, tokio::spawn(op(endpoint))));
        }

        let mut result = None;
        let mut errors = Vec::with_capacity(attempts.len());
        for (url, attempt) in attempts {
            match attempt.await {
                Ok(Ok(value)) => {
                    trace!(url = %url, "broadcast target accepted");
                    if result.is_none() {
                        result = Some(value);
                    }
                }
                Ok(Err(err)) => {
                    warn!(url = %url, error = %err, "broadcast target failed");
                    errors.push(EndpointError::new(url, err));
                }
                Err(join_err) => {
                    warn!(url = %url, error = %join_err, "broadcast task died");
                    errors.push(EndpointError::new(
                        url,
                        TransportErrorKind::custom_str(&join_err.to_string()),
                    ));
                }
            }
        }

        result.ok_or_else(|| BroadcastError::new(errors).into())
    }

    /// Shuts the pool down: stops the reconnect loop, cancels every
    /// subscription, and drops all connection handles. Idempotent.
    pub async fn close(&self) {
        self.cancel.cancel();
        let task = self.reconnect_task.lock().await.take();
        if let Some(task) = task {
            let _ = task.await;
        }
        self.registry.clear();
        info!("provider pool closed");
    }

    /// All registered endpoint URLs, connected or not.
    #[must_use]
    pub fn endpoint_urls(&self) -> Vec<Arc<str>> {
        self.registry.urls()
    }

    /// Handles of all currently connected endpoints.
    #[must_use]
    pub fn providers(&self) -> Vec<RootProvider<N>> {
        self.registry.connected().into_iter().map(|endpoint| endpoint.provider).collect()
    }

    /// Registers an endpoint URL; the background loop dials it shortly.
    /// Returns the slot id. Re-adding a known URL is a no-op.
    pub fn add_endpoint(&self, url: impl Into<Arc<str>>) -> u64 {
        self.registry.add(url)
    }

    /// Removes an endpoint and drops its connection. Subscription workers
    /// bound to it stop at their next re-attach.
    pub fn remove_endpoint(&self, url: &str) {
        self.registry.remove(url);
    }

    /// Performs a JSON-RPC call outside the typed surface, with rotation
    /// and retry like any other read.
    ///
    /// # Errors
    ///
    /// * [`Error::NoEndpoint`] - the pool has no connected endpoint.
    /// * [`Error::Rpc`] / [`Error::Timeout`] - the final attempt's failure
    ///   after the attempt budget was exhausted.
    pub async fn raw_request<P, R>(
        &self,
        method: impl Into<Cow<'static, str>>,
        params: P,
    ) -> Result<R, Error>
    where
        P: RpcSend + Clone,
        R: RpcRecv,
    {
        let method = method.into();
        self.first_success(move |provider| {
            let method = method.clone();
            let params = params.clone();
            async move { provider.raw_request(method, params).await }
        })
        .await
    }

    /// Performs a JSON-RPC call on every connected endpoint, returning the
    /// first collected result.
    ///
    /// # Errors
    ///
    /// * [`Error::NoEndpoint`] - the pool has no connected endpoint.
    /// * [`Error::AllFailed`] - every endpoint failed; the aggregate lists
    ///   each endpoint's error.
    pub async fn raw_broadcast<P, R>(
        &self,
        method: impl Into<Cow<'static, str>>,
        params: P,
    ) -> Result<R, Error>
    where
        P: RpcSend + Clone + 'static,
        R: RpcRecv + Send + 'static,
    {
        let method = method.into();
        self.broadcast(move |endpoint| {
            let method = method.clone();
            let params = params.clone();
            async move { endpoint.provider.raw_request(method, params).await }
        })
        .await
    }

    /// Submits a signed, encoded transaction to **every** connected
    /// endpoint and returns its hash.
    ///
    /// Endpoints may hold disjoint mempools; maximum propagation beats
    /// lowest latency for submissions, so nothing short-circuits on first
    /// success. Succeeds if at least one endpoint accepted the transaction.
    ///
    /// # Errors
    ///
    /// * [`Error::NoEndpoint`] - the pool has no connected endpoint.
    /// * [`Error::AllFailed`] - no endpoint accepted the submission.
    pub async fn send_raw_transaction(&self, encoded_tx: &[u8]) -> Result<TxHash, Error> {
        let data = Bytes::copy_from_slice(encoded_tx);
        self.broadcast(move |endpoint| {
            let data = data.clone();
            async move {
                let pending = endpoint.provider.send_raw_transaction(&data).await?;
                Ok(*pending.tx_hash())
            }
        })
        .await
    }

    /// Sends `calls` as one JSON-RPC batch, rotating across endpoints until
    /// an endpoint accepts the batch.
    ///
    /// Per-call errors are reported in the matching output element and do
    /// not trigger rotation; only failing to deliver the batch does.
    ///
    /// # Errors
    ///
    /// * [`Error::NoEndpoint`] - the pool has no connected endpoint.
    /// * [`Error::Rpc`] / [`Error::Timeout`] - no endpoint accepted the
    ///   batch; the final attempt's failure.
    pub async fn batch_call(
        &self,
        calls: &[BatchCall],
    ) -> Result<Vec<Result<Value, Error>>, Error> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }
        let calls: Arc<[BatchCall]> = calls.to_vec().into();
        let outcomes = self
            .first_success(move |provider| {
                let calls = calls.clone();
                async move { run_batch(provider, &calls).await }
            })
            .await?;
        Ok(convert_batch_outcomes(outcomes))
    }

    /// Sends `calls` as one JSON-RPC batch to every connected endpoint,
    /// returning the per-call results of the first endpoint collected.
    ///
    /// # Errors
    ///
    /// * [`Error::NoEndpoint`] - the pool has no connected endpoint.
    /// * [`Error::AllFailed`] - no endpoint accepted the batch.
    pub async fn batch_broadcast(
        &self,
        calls: &[BatchCall],
    ) -> Result<Vec<Result<Value, Error>>, Error> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }
        let calls: Arc<[BatchCall]> = calls.to_vec().into();
        let outcomes = self
            .broadcast(move |endpoint| {
                let calls = calls.clone();
                async move { run_batch(endpoint.provider, &calls).await }
            })
            .await?;
        Ok(convert_batch_outcomes(outcomes))
    }

    /// Subscribes to new heads from **all** endpoints, current and future,
    /// merged into `tx`.
    ///
    /// Every event carries its source endpoint so follow-up queries can hit
    /// the node that announced the block. Events are not de-duplicated
    /// across endpoints. The channel is caller-owned: a slow consumer
    /// blocks the per-endpoint workers rather than dropping events.
    ///
    /// # Errors
    ///
    /// * [`Error::NoEndpoint`] - no endpoint is registered at all. Slots
    ///   that are merely unconnected are fine; their workers attach when
    ///   the dialer brings them up.
    pub fn subscribe_heads(
        &self,
        tx: mpsc::Sender<HeadEvent<N>>,
    ) -> Result<HeadsSubscription, Error> {
        if self.registry.is_empty() {
            return Err(Error::NoEndpoint);
        }
        // Listen for announcements before snapshotting ids so an endpoint
        // connecting in between is not missed.
        let new_endpoints = self.new_endpoints.subscribe();
        Ok(HeadsSubscription::spawn(
            self.registry.clone(),
            new_endpoints,
            tx,
            self.cancel.child_token(),
            self.retry_period,
        ))
    }

    /// Like [`subscribe_heads`](Self::subscribe_heads), but delivers events
    /// as a stream over an internal channel.
    ///
    /// # Errors
    ///
    /// * [`Error::NoEndpoint`] - no endpoint is registered at all.
    pub fn subscribe_heads_stream(
        &self,
    ) -> Result<(HeadsSubscription, ReceiverStream<HeadEvent<N>>), Error> {
        let (tx, rx) = mpsc::channel(self.subscription_buffer_capacity);
        let subscription = self.subscribe_heads(tx)?;
        Ok((subscription, ReceiverStream::new(rx)))
    }

    multiplex_rpc!(
        /// Fetch the latest block number.
        ///
        /// This is a wrapper function for [`Provider::get_block_number`].
        ///
        /// # Errors
        ///
        /// * [`Error::NoEndpoint`] - the pool has no connected endpoint.
        /// * [`Error::Rpc`] / [`Error::Timeout`] - every attempt failed;
        ///   contains the final attempt's error.
        fn get_block_number() -> BlockNumber
    );

    multiplex_rpc!(
        /// Returns the chain ID of the network.
        ///
        /// This is a wrapper function for [`Provider::get_chain_id`] (`eth_chainId`).
        ///
        /// # Errors
        ///
        /// * [`Error::NoEndpoint`] - the pool has no connected endpoint.
        /// * [`Error::Rpc`] / [`Error::Timeout`] - every attempt failed;
        ///   contains the final attempt's error.
        fn get_chain_id() -> u64
    );

    multiplex_rpc!(
        /// Returns the current gas price in wei.
        ///
        /// This is a wrapper function for [`Provider::get_gas_price`] (`eth_gasPrice`).
        ///
        /// # Errors
        ///
        /// * [`Error::NoEndpoint`] - the pool has no connected endpoint.
        /// * [`Error::Rpc`] / [`Error::Timeout`] - every attempt failed;
        ///   contains the final attempt's error.
        fn get_gas_price() -> u128
    );

    multiplex_rpc!(
        /// Fetch a block by its hash.
        ///
        /// This is a wrapper function for [`Provider::get_block_by_hash`].
        ///
        /// # Errors
        ///
        /// * [`Error::NoEndpoint`] - the pool has no connected endpoint.
        /// * [`Error::BlockNotFound`] - no block with this hash is available.
        /// * [`Error::Rpc`] / [`Error::Timeout`] - every attempt failed;
        ///   contains the final attempt's error.
        fn get_block_by_hash(hash: BlockHash) -> N::BlockResponse; or BlockNotFound
    );

    multiplex_rpc!(
        /// Fetch a block by number or tag.
        ///
        /// This is a wrapper function for [`Provider::get_block_by_number`].
        ///
        /// # Errors
        ///
        /// * [`Error::NoEndpoint`] - the pool has no connected endpoint.
        /// * [`Error::BlockNotFound`] - the block is not available on the
        ///   answering endpoint.
        /// * [`Error::Rpc`] / [`Error::Timeout`] - every attempt failed;
        ///   contains the final attempt's error.
        fn get_block_by_number(number: BlockNumberOrTag) -> N::BlockResponse; or BlockNotFound
    );

    multiplex_rpc!(
        /// Fetch a transaction by its hash.
        ///
        /// This is a wrapper function for [`Provider::get_transaction_by_hash`].
        ///
        /// # Errors
        ///
        /// * [`Error::NoEndpoint`] - the pool has no connected endpoint.
        /// * [`Error::TransactionNotFound`] - the transaction is unknown to
        ///   the answering endpoint.
        /// * [`Error::Rpc`] / [`Error::Timeout`] - every attempt failed;
        ///   contains the final attempt's error.
        fn get_transaction_by_hash(hash: TxHash) -> N::TransactionResponse; or TransactionNotFound
    );

    multiplex_rpc!(
        /// Returns the balance of the account at the latest block.
        ///
        /// This is a wrapper function for [`Provider::get_balance`] (`eth_getBalance`).
        ///
        /// # Errors
        ///
        /// * [`Error::NoEndpoint`] - the pool has no connected endpoint.
        /// * [`Error::Rpc`] / [`Error::Timeout`] - every attempt failed;
        ///   contains the final attempt's error.
        fn get_balance(address: Address) -> U256
    );

    multiplex_rpc!(
        /// Returns the nonce of the account at the latest block.
        ///
        /// This is a wrapper function for [`Provider::get_transaction_count`]
        /// (`eth_getTransactionCount`).
        ///
        /// # Errors
        ///
        /// * [`Error::NoEndpoint`] - the pool has no connected endpoint.
        /// * [`Error::Rpc`] / [`Error::Timeout`] - every attempt failed;
        ///   contains the final attempt's error.
        fn get_transaction_count(address: Address) -> u64
    );

    multiplex_rpc!(
        /// Returns the contract code at the given address, latest block.
        ///
        /// This is a wrapper function for [`Provider::get_code_at`] (`eth_getCode`).
        ///
        /// # Errors
        ///
        /// * [`Error::NoEndpoint`] - the pool has no connected endpoint.
        /// * [`Error::Rpc`] / [`Error::Timeout`] - every attempt failed;
        ///   contains the final attempt's error.
        fn get_code_at(address: Address) -> Bytes
    );

    multiplex_rpc!(
        /// Executes a call without creating a transaction.
        ///
        /// This is a wrapper function for [`Provider::call`] (`eth_call`).
        ///
        /// # Errors
        ///
        /// * [`Error::NoEndpoint`] - the pool has no connected endpoint.
        /// * [`Error::Rpc`] / [`Error::Timeout`] - every attempt failed;
        ///   contains the final attempt's error.
        @clone [tx]
        fn call(tx: N::TransactionRequest) -> Bytes
    );

    multiplex_rpc!(
        /// Estimates the gas required for a transaction.
        ///
        /// This is a wrapper function for [`Provider::estimate_gas`] (`eth_estimateGas`).
        ///
        /// # Errors
        ///
        /// * [`Error::NoEndpoint`] - the pool has no connected endpoint.
        /// * [`Error::Rpc`] / [`Error::Timeout`] - every attempt failed;
        ///   contains the final attempt's error.
        @clone [tx]
        fn estimate_gas(tx: N::TransactionRequest) -> u64
    );

    multiplex_rpc!(
        /// Fetch logs matching the given filter.
        ///
        /// This is a wrapper function for [`Provider::get_logs`] (`eth_getLogs`).
        ///
        /// # Errors
        ///
        /// * [`Error::NoEndpoint`] - the pool has no connected endpoint.
        /// * [`Error::Rpc`] / [`Error::Timeout`] - every attempt failed;
        ///   contains the final attempt's error.
        fn get_logs(filter: &Filter) -> Vec<Log>
    );
}

/// One call of a JSON-RPC batch; results come back as raw JSON values.
#[derive(Debug, Clone)]
pub struct BatchCall {
    /// The JSON-RPC method name.
    pub method: Cow<'static, str>,
    /// The call parameters, already serialized.
    pub params: Value,
}

impl BatchCall {
    /// A batch entry for `method` with the given parameters.
    #[must_use]
    pub fn new(method: impl Into<Cow<'static, str>>, params: Value) -> Self {
        Self { method: method.into(), params }
    }
}

/// Delivers one batch to one endpoint. Per-call outcomes stay separate; the
/// outer error is transport-level delivery failure only.
async fn run_batch<N: Network>(
    provider: RootProvider<N>,
    calls: &[BatchCall],
) -> TransportResult<Vec<TransportResult<Value>>> {
    let client = provider.client();
    let mut batch = client.new_batch();

    let mut waiters = Vec::with_capacity(calls.len());
    for call in calls {
        waiters.push(batch.add_call::<_, Value>(call.method.clone(), &call.params)?);
    }
    batch.send().await?;

    let mut outcomes = Vec::with_capacity(waiters.len());
    for waiter in waiters {
        outcomes.push(waiter.await);
    }
    Ok(outcomes)
}

fn convert_batch_outcomes(outcomes: Vec<TransportResult<Value>>) -> Vec<Result<Value, Error>> {
    outcomes
        .into_iter()
        .map(|outcome| outcome.map_err(|err| Error::from(CoreError::Rpc(err))))
        .collect()
}
