//! A Rust client for [flagd](https://flagd.dev), the OpenFeature flag-evaluation daemon.
//!
//! # Overview
//!
//! The crate revolves around a [`FlagdClient`] that resolves feature flags against a remote
//! flagd instance. Each resolution takes a flag key, a caller-supplied default, and an
//! [`EvaluationContext`] (key-value attributes of the subject being evaluated), and returns a
//! [`ResolutionDetails`] carrying the value, the server's reason and variant, and an
//! [`ErrorCode`] when anything went wrong. Resolution calls never return `Err` — in production
//! a flag lookup should degrade to the default value, not crash the caller.
//!
//! Every flag has a fixed value kind, resolved through the matching typed operation:
//! - [`FlagdClient::resolve_boolean()`]
//! - [`FlagdClient::resolve_string()`]
//! - [`FlagdClient::resolve_float()`]
//! - [`FlagdClient::resolve_object()`]
//!
//! # Connection lifecycle
//!
//! Constructing a client opens a long-lived event subscription to flagd in a background task
//! (see [`connection::ConnectionManager`]). Resolutions are gated on the server's
//! `provider_ready` signal: before it arrives they return the default with
//! `PROVIDER_NOT_READY`, and once the bounded, jittered reconnect budget is exhausted they
//! return `CONNECTION_ERROR` instead. The gate is a non-blocking read of a state snapshot;
//! callers never wait on the connection task.
//!
//! # Caching
//!
//! With [`FlagdOptions::with_cache`] enabled, successful resolutions are stored in a
//! [`cache::ResolutionCache`] keyed by a deterministic [`fingerprint`] of the flag key and
//! context, so repeated lookups of the same pair skip the network. Server-pushed
//! `configuration_change` events invalidate exactly the affected flag's entries; undecodable
//! notifications and stream disconnects flush the whole cache, trading extra resolutions for
//! never serving stale values.
//!
//! # Configuration
//!
//! [`FlagdOptions`] carries host/port/tls, the retry budget, and the cache knobs, each
//! overridable through `FLAGD_WEB_*` environment variables (see [`FlagdOptions::from_env`]).
//!
//! # Logging
//!
//! The crate uses the [`log`](https://docs.rs/log/latest/log/) crate with target `flagd`.
//! Integrate a `log`-compatible logger implementation for visibility into connection and cache
//! behavior.

#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

pub mod cache;
pub mod connect;
pub mod connection;
pub mod service;

mod client;
mod config;
mod context;
mod error;
mod fingerprint;
mod resolution;

pub use client::FlagdClient;
pub use config::FlagdOptions;
pub use connection::ConnectionState;
pub use context::{ContextValue, EvaluationContext};
pub use error::{Error, Result};
pub use fingerprint::fingerprint;
pub use resolution::{ErrorCode, ResolutionDetails, Value};
