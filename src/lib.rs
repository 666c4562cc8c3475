//! # multiplex-provider
//!
//! A multiplexing provider pool for Ethereum-like JSON-RPC nodes, built on
//! [alloy](https://alloy.rs/).
//!
//! The pool keeps a registry of endpoint URLs, dials unresolved endpoints in
//! the background, and dispatches every call with one of two policies:
//!
//! * **first-success** — read calls rotate across connected endpoints until
//!   one succeeds, with a per-attempt timeout and a bounded attempt count;
//! * **broadcast** — write calls (transaction submission) fan out to every
//!   connected endpoint and succeed if at least one of them accepts.
//!
//! Head subscriptions are multiplexed: one worker per endpoint feeds a single
//! caller-owned channel, workers re-attach after stream errors, and endpoints
//! added after subscription start get their own worker automatically.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use multiplex_provider::MultiplexProviderBuilder;
//!
//! let provider = MultiplexProviderBuilder::new()
//!     .url("ws://node-a:8546")
//!     .url("ws://node-b:8546")
//!     .build()
//!     .await?;
//!
//! let number = provider.get_block_number().await?;
//! provider.close().await;
//! ```

#[macro_use]
mod macros;

pub mod multiplex_provider;

pub use multiplex_provider::*;
