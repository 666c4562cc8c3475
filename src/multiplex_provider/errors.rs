//! Error types and RPC error classification for pool operations.
//!
//! This module provides:
//! * The public [`enum@Error`] returned by every pool operation, plus the
//!   per-endpoint [`EndpointError`] and the broadcast aggregate
//!   [`BroadcastError`]
//! * RPC error classification used by the retry orchestrator to decide
//!   whether rotating to another endpoint can help
//!
//! # Error Classification
//!
//! Ethereum clients return various error codes and messages for different
//! failure conditions. Failures tied to the request itself (a block that does
//! not exist, an invalid log filter) will fail identically on every endpoint,
//! so they stop the rotation immediately. Errors that don't match a known
//! pattern are retried by default.
//!
//! The known patterns cover Geth and Anvil; other clients may use different
//! codes/messages, in which case the error surfaces as [`Error::Rpc`] after
//! the attempt budget is exhausted.

use std::sync::Arc;

use alloy::transports::{RpcError, TransportErrorKind};
use thiserror::Error;
use tokio::time::error as TokioError;

/// Errors returned by [`super::MultiplexProvider`] operations.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// The pool has no connected endpoint to dispatch to.
    #[error("no endpoint connected")]
    NoEndpoint,

    /// The final attempt exceeded the per-attempt timeout.
    #[error("operation timed out")]
    Timeout,

    /// An RPC error remained after the attempt budget was exhausted (or the
    /// error was classified as non-retryable).
    #[error("RPC call failed: {0}")]
    Rpc(Arc<RpcError<TransportErrorKind>>),

    /// The requested block was not found.
    ///
    /// Returned when the endpoint answers `None` for the requested block, or
    /// when a client-specific RPC error response indicates a missing block
    /// (e.g. Geth's `-32000` with a "block ... not found"-like message).
    #[error("block not found")]
    BlockNotFound,

    /// The requested transaction was not found.
    #[error("transaction not found")]
    TransactionNotFound,

    /// Every endpoint of a broadcast failed.
    #[error(transparent)]
    AllFailed(#[from] BroadcastError),

    /// Endpoint discovery failed during construction.
    #[error("endpoint discovery failed: {0}")]
    Discovery(Arc<dyn std::error::Error + Send + Sync + 'static>),
}

/// A failure scoped to one endpoint, carrying the endpoint URL.
///
/// Produced by the broadcast path, where the caller needs to know which
/// endpoints rejected the submission.
#[derive(Error, Debug, Clone)]
#[error("{url}: {cause}")]
pub struct EndpointError {
    /// URL of the endpoint that failed.
    pub url: Arc<str>,
    /// The underlying transport or RPC error.
    pub cause: Arc<RpcError<TransportErrorKind>>,
}

impl EndpointError {
    pub(crate) fn new(url: Arc<str>, cause: RpcError<TransportErrorKind>) -> Self {
        Self { url, cause: Arc::new(cause) }
    }
}

/// Aggregate of every endpoint's failure when a broadcast found no taker.
#[derive(Error, Debug, Clone)]
#[error("{}", self.join())]
pub struct BroadcastError {
    errors: Vec<EndpointError>,
}

impl BroadcastError {
    pub(crate) fn new(errors: Vec<EndpointError>) -> Self {
        Self { errors }
    }

    /// The per-endpoint failures, one per endpoint the broadcast reached.
    #[must_use]
    pub fn errors(&self) -> &[EndpointError] {
        &self.errors
    }

    fn join(&self) -> String {
        self.errors.iter().map(ToString::to_string).collect::<Vec<_>>().join(",")
    }
}

/// Low-level error produced inside the retry loop.
///
/// Converted to [`enum@Error`] at the dispatch boundary, where
/// block-not-found responses are given their own variant.
#[derive(Error, Debug)]
pub(crate) enum CoreError {
    #[error("operation timed out")]
    Timeout,

    #[error("RPC call failed: {0}")]
    Rpc(RpcError<TransportErrorKind>),
}

impl From<RpcError<TransportErrorKind>> for CoreError {
    fn from(err: RpcError<TransportErrorKind>) -> Self {
        CoreError::Rpc(err)
    }
}

impl From<TokioError::Elapsed> for CoreError {
    fn from(_: TokioError::Elapsed) -> Self {
        CoreError::Timeout
    }
}

impl From<CoreError> for Error {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Timeout => Error::Timeout,
            CoreError::Rpc(RpcError::ErrorResp(ref err_resp))
                if is_block_not_found(err_resp.code, err_resp.message.as_ref()) =>
            {
                Error::BlockNotFound
            }
            CoreError::Rpc(e) => Error::Rpc(Arc::new(e)),
        }
    }
}

/// Returns `true` if rotating to another endpoint could plausibly succeed
/// where this attempt failed.
pub(crate) fn should_retry(err: &RpcError<TransportErrorKind>) -> bool {
    match err {
        // Check if the error is explicitly marked as retryable
        RpcError::ErrorResp(err_resp) if err_resp.is_retry_err() => true,
        // Request-scoped failures repeat on every endpoint
        RpcError::ErrorResp(err_resp) => {
            is_retryable_error(err_resp.code, err_resp.message.as_ref())
        }
        // The next endpoint has its own transport
        RpcError::Transport(_) => true,
        // Serializing the request fails the same way everywhere
        RpcError::SerError(_) => false,
        // Default to retrying unknown errors
        _ => true,
    }
}

fn is_retryable_error(code: i64, message: &str) -> bool {
    let non_retryable = is_block_not_found(code, message) || is_invalid_log_filter(code, message);
    !non_retryable
}

fn is_block_not_found(code: i64, message: &str) -> bool {
    geth::is_block_not_found(code, message) || anvil::is_block_not_found(code, message)
}

fn is_invalid_log_filter(code: i64, message: &str) -> bool {
    geth::is_invalid_log_filter(code, message)
}

// Geth (go-ethereum) specific error detection.
mod geth {
    // Default error code used by Geth for various errors.
    // Reference: <https://github.com/ethereum/go-ethereum/blob/494908a8523af0e67d22d7930df15787ca5776b2/rpc/errors.go#L61>
    pub const DEFAULT_ERROR_CODE: i64 = -32000;

    pub fn is_block_not_found(code: i64, message: &str) -> bool {
        if code != DEFAULT_ERROR_CODE {
            return false;
        }

        matches!(
            message,
            "pending block is not available"
                | "finalized block not found"
                | "safe block not found"
                | "earliest header not found"
                | "finalized header not found"
                | "safe header not found"
                | "header not found"
                | "header for hash not found"
        ) || (
            // Tracer pattern: "block {number} not found"
            message.starts_with("block") && message.ends_with("not found")
        )
    }

    pub fn is_invalid_log_filter(code: i64, message: &str) -> bool {
        matches!(
            (code, message),
            (
                DEFAULT_ERROR_CODE,
                "invalid block range params" |
                    "block range extends beyond current head block" |
                    "can't specify fromBlock/toBlock with blockHash" |
                    "pending logs are not supported" |
                    "unknown block" |
                    "exceed max topics" |
                    "exceed max addresses or topics per search position" |
                    "filter not found"
            )
        )
    }
}

mod anvil {
    /// Reference: <https://github.com/foundry-rs/foundry/blob/2b85d1fbd3647865efdae4c0e17b994638ff722c/crates/anvil/rpc/src/error.rs#L102>
    pub const INVALID_PARAMS_ERROR_CODE: i64 = -32602;

    pub fn is_block_not_found(code: i64, message: &str) -> bool {
        if code != INVALID_PARAMS_ERROR_CODE {
            return false;
        }
        message.contains("BlockOutOfRangeError")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geth_block_not_found_patterns() {
        assert!(geth::is_block_not_found(-32000, "header not found"));
        assert!(geth::is_block_not_found(-32000, "header for hash not found"));
        assert!(geth::is_block_not_found(-32000, "pending block is not available"));
        assert!(geth::is_block_not_found(-32000, "block 12345 not found"));
        assert!(geth::is_block_not_found(-32000, "block 0x1234 not found"));

        assert!(!geth::is_block_not_found(-32000, "some other error"));
        assert!(!geth::is_block_not_found(-32001, "header not found"));
    }

    #[test]
    fn anvil_block_not_found_patterns() {
        assert!(anvil::is_block_not_found(
            -32602,
            "BlockOutOfRangeError: block height is 7 but requested was 99"
        ));
        assert!(!anvil::is_block_not_found(-32000, "BlockOutOfRangeError"));
        assert!(!anvil::is_block_not_found(-32602, "wrong params"));
    }

    #[test]
    fn request_scoped_errors_do_not_rotate() {
        assert!(!is_retryable_error(-32000, "header not found"));
        assert!(!is_retryable_error(-32000, "invalid block range params"));
        assert!(!is_retryable_error(-32000, "filter not found"));
        assert!(!is_retryable_error(-32602, "BlockOutOfRangeError"));

        assert!(is_retryable_error(-32000, "some transient error"));
        assert!(is_retryable_error(-32603, "internal error"));
    }

    #[test]
    fn broadcast_error_joins_with_commas() {
        let make = |url: &str| {
            EndpointError::new(
                Arc::from(url),
                RpcError::Transport(TransportErrorKind::custom_str("connection refused")),
            )
        };
        let err = BroadcastError::new(vec![make("ws://a:8546"), make("ws://b:8546")]);
        let text = err.to_string();
        assert!(text.contains("ws://a:8546"));
        assert!(text.contains("ws://b:8546"));
        assert_eq!(text.matches(',').count(), 1);
        assert_eq!(err.errors().len(), 2);
    }

    #[test]
    fn core_error_maps_block_not_found() {
        let resp = alloy::rpc::json_rpc::ErrorPayload {
            code: -32000,
            message: "header not found".into(),
            data: None,
        };
        let err = Error::from(CoreError::Rpc(RpcError::ErrorResp(resp)));
        assert!(matches!(err, Error::BlockNotFound));

        assert!(matches!(Error::from(CoreError::Timeout), Error::Timeout));
    }
}
