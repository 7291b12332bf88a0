//! The boundary to the remote flag-evaluation service.
//!
//! [`FlagService`] is the full set of operations the adapter needs from flagd: one unary
//! resolution call per value kind plus a long-lived event stream. The default implementation is
//! [`ConnectClient`](crate::connect::ConnectClient); tests and embedders may substitute their
//! own transport.
use std::collections::HashMap;
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use serde::Deserialize;

use crate::{EvaluationContext, Result};

/// A successful unary resolution as reported by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<T> {
    /// The resolved value.
    pub value: T,
    /// Server-supplied reason for the resolution.
    pub reason: Option<String>,
    /// Name of the variant the server picked, if any.
    pub variant: Option<String>,
}

/// The kind of change applied to a flag's definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    /// The flag was removed.
    Delete,
    /// The flag was created.
    Write,
    /// The flag's definition was modified.
    Update,
}

/// Details of a single flag's change inside a configuration-change notification.
#[derive(Debug, Clone, Deserialize)]
pub struct FlagChange {
    /// The kind of change.
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    /// The configuration source the change originated from.
    #[serde(default)]
    pub source: String,
}

/// Flag key → change details, as carried by a `configuration_change` event.
pub type ChangeSet = HashMap<String, FlagChange>;

/// An inbound message on the event stream.
#[derive(Debug)]
pub enum ServiceEvent {
    /// The server confirmed it is ready to serve resolutions.
    ProviderReady,
    /// One or more flag definitions changed.
    ///
    /// `Err` means the notification's payload could not be decoded; the scope of the change is
    /// then unknown, and the receiver must treat every cached entry as suspect.
    ConfigurationChange(Result<ChangeSet>),
    /// A message type this client does not know. Ignored.
    Other(String),
}

/// A long-lived stream of server-pushed events.
///
/// The remote end may close or error the stream at any time; both drive the connection
/// manager's retry protocol.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<ServiceEvent>> + Send>>;

/// Operations required from the remote flag-evaluation service.
#[async_trait]
pub trait FlagService: Send + Sync {
    /// Resolve a boolean flag.
    async fn resolve_boolean(
        &self,
        flag_key: &str,
        context: &EvaluationContext,
    ) -> Result<Resolved<bool>>;

    /// Resolve a string flag.
    async fn resolve_string(
        &self,
        flag_key: &str,
        context: &EvaluationContext,
    ) -> Result<Resolved<String>>;

    /// Resolve a numeric flag.
    async fn resolve_float(
        &self,
        flag_key: &str,
        context: &EvaluationContext,
    ) -> Result<Resolved<f64>>;

    /// Resolve a structured flag.
    ///
    /// `value` is `None` when the server explicitly reports that the flag has no value
    /// payload, which is distinct from a transport error.
    async fn resolve_object(
        &self,
        flag_key: &str,
        context: &EvaluationContext,
    ) -> Result<Resolved<Option<serde_json::Value>>>;

    /// Open the long-lived event subscription.
    async fn open_event_stream(&self) -> Result<EventStream>;
}
