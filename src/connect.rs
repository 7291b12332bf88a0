//! The default [`FlagService`] implementation, speaking flagd's Connect protocol with JSON
//! payloads over HTTP.
//!
//! Unary resolutions are plain `POST` requests with JSON bodies. The event stream is a
//! server-streaming call whose response body carries enveloped frames: a flags byte, a
//! big-endian `u32` payload length, then the JSON payload.
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::service::{ChangeSet, EventStream, FlagService, Resolved, ServiceEvent};
use crate::{Error, EvaluationContext, FlagdOptions, Result};

const SERVICE_PATH: &str = "flagd.evaluation.v1.Service";

/// End-of-stream marker in a Connect envelope's flags byte.
const END_STREAM_FLAG: u8 = 0b10;

/// A client for flagd's evaluation service.
pub struct ConnectClient {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::Client,
    base_url: Url,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResolveRequest<'a> {
    flag_key: &'a str,
    context: &'a EvaluationContext,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResolveResponse<T> {
    value: T,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    variant: Option<String>,
}

/// Error body returned by Connect endpoints on non-2xx responses.
#[derive(Deserialize)]
struct ConnectError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct EventMessage {
    #[serde(rename = "type", default)]
    event_type: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl ConnectClient {
    /// Create a client for the endpoint described by `options`.
    pub fn new(options: &FlagdOptions) -> Result<ConnectClient> {
        let base_url = Url::parse(&options.base_url()).map_err(Error::InvalidBaseUrl)?;

        Ok(ConnectClient {
            client: reqwest::Client::new(),
            base_url,
        })
    }

    fn endpoint(&self, method: &str) -> Result<Url> {
        self.base_url
            .join(&format!("{SERVICE_PATH}/{method}"))
            .map_err(Error::InvalidBaseUrl)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        flag_key: &str,
        context: &EvaluationContext,
    ) -> Result<Resolved<T>> {
        let url = self.endpoint(method)?;

        log::trace!(target: "flagd", flag_key, method; "issuing resolution request");
        let response = self
            .client
            .post(url)
            .json(&ResolveRequest { flag_key, context })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let body: ResolveResponse<T> = response.json().await.map_err(|err| {
            log::warn!(target: "flagd", flag_key; "failed to decode resolution response: {:?}", err);
            Error::ParseError
        })?;

        Ok(Resolved {
            value: body.value,
            reason: body.reason,
            variant: body.variant,
        })
    }
}

/// Map a non-2xx Connect response to an [`Error`].
async fn error_from_response(response: reqwest::Response) -> Error {
    let status = response.status();
    let body: ConnectError = match response.json().await {
        Ok(body) => body,
        Err(_) => {
            return match status {
                StatusCode::NOT_FOUND => Error::FlagNotFound,
                StatusCode::SERVICE_UNAVAILABLE => Error::Unavailable,
                _ => Error::General(format!("server returned {status}")),
            }
        }
    };

    match body.code.as_str() {
        "not_found" => Error::FlagNotFound,
        "invalid_argument" => Error::TypeMismatch,
        "data_loss" => Error::ParseError,
        "unavailable" => Error::Unavailable,
        _ => Error::General(body.message),
    }
}

/// Decode one stream frame into a [`ServiceEvent`].
///
/// A frame that does not decode may have been a change notification, so its scope is treated as
/// unknown rather than dropped.
fn decode_event(payload: &[u8]) -> ServiceEvent {
    let message: EventMessage = match serde_json::from_slice(payload) {
        Ok(message) => message,
        Err(_) => return ServiceEvent::ConfigurationChange(Err(Error::ParseError)),
    };

    match message.event_type.as_str() {
        "provider_ready" => ServiceEvent::ProviderReady,
        "configuration_change" => {
            let changes: Result<ChangeSet> = message
                .data
                .get("flags")
                .cloned()
                .ok_or(Error::ParseError)
                .and_then(|flags| serde_json::from_value(flags).map_err(Error::from));
            ServiceEvent::ConfigurationChange(changes)
        }
        other => ServiceEvent::Other(other.to_owned()),
    }
}

/// Upper bound on a single envelope's declared payload length. Real flagd events are tiny; a
/// corrupt length prefix must not make the buffer grow without bound.
const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

/// Split the next complete envelope off the front of `buffer`.
///
/// Returns `(flags, payload)` when a whole frame is buffered, `Ok(None)` when more bytes are
/// needed, and `Err` when the length prefix is implausible — the stream cannot be
/// re-synchronized past a corrupt header.
fn next_frame(buffer: &mut Vec<u8>) -> Result<Option<(u8, Vec<u8>)>> {
    if buffer.len() < 5 {
        return Ok(None);
    }
    let length = u32::from_be_bytes([buffer[1], buffer[2], buffer[3], buffer[4]]) as usize;
    if length > MAX_FRAME_LEN {
        return Err(Error::ParseError);
    }
    if buffer.len() < 5 + length {
        return Ok(None);
    }

    let flags = buffer[0];
    let frame: Vec<u8> = buffer[5..5 + length].to_vec();
    buffer.drain(..5 + length);
    Ok(Some((flags, frame)))
}

#[async_trait]
impl FlagService for ConnectClient {
    async fn resolve_boolean(
        &self,
        flag_key: &str,
        context: &EvaluationContext,
    ) -> Result<Resolved<bool>> {
        self.call("ResolveBoolean", flag_key, context).await
    }

    async fn resolve_string(
        &self,
        flag_key: &str,
        context: &EvaluationContext,
    ) -> Result<Resolved<String>> {
        self.call("ResolveString", flag_key, context).await
    }

    async fn resolve_float(
        &self,
        flag_key: &str,
        context: &EvaluationContext,
    ) -> Result<Resolved<f64>> {
        self.call("ResolveFloat", flag_key, context).await
    }

    async fn resolve_object(
        &self,
        flag_key: &str,
        context: &EvaluationContext,
    ) -> Result<Resolved<Option<serde_json::Value>>> {
        // The object endpoint may omit `value` entirely; `Option` + default captures that as
        // the explicit "no value" signal.
        self.call("ResolveObject", flag_key, context).await
    }

    async fn open_event_stream(&self) -> Result<EventStream> {
        let url = self.endpoint("EventStream")?;

        let response = self
            .client
            .post(url)
            .header("content-type", "application/connect+json")
            .header("connect-protocol-version", "1")
            .body("{}")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        log::debug!(target: "flagd", "event stream opened");
        let body = Box::pin(response.bytes_stream());

        let stream = futures_util::stream::unfold(
            (body, Vec::new(), false),
            |(mut body, mut buffer, done)| async move {
                if done {
                    return None;
                }
                loop {
                    match next_frame(&mut buffer) {
                        Ok(Some((flags, frame))) => {
                            if flags & END_STREAM_FLAG != 0 {
                                // The end-of-stream frame carries trailers/an optional error;
                                // either way the subscription is over.
                                return Some((
                                    Err(Error::StreamClosed),
                                    (body, buffer, true),
                                ));
                            }
                            return Some((Ok(decode_event(&frame)), (body, buffer, false)));
                        }
                        Ok(None) => {}
                        Err(err) => return Some((Err(err), (body, buffer, true))),
                    }
                    match body.next().await {
                        Some(Ok(chunk)) => buffer.extend_from_slice(&chunk),
                        Some(Err(err)) => {
                            return Some((Err(Error::from(err)), (body, buffer, true)))
                        }
                        None => return None,
                    }
                }
            },
        );

        Ok(Box::pin(stream))
    }
}
