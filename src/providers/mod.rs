//! Uniform provider forwarder contract (spec §4.7).
//!
//! Every forwarder takes a [`ForwardRequest`] and returns a
//! [`ForwardResponse`]; the orchestrator (§4.8) never branches on provider
//! beyond picking which forwarder function to call.

pub mod anthropic;
pub mod openai_compat;
pub mod usage;

use std::sync::Arc;

use bytes::Bytes;
use futures::stream::BoxStream;
use reqwest::header::HeaderMap;
use thiserror::Error;
use tokio::sync::{Mutex, Notify};

pub use usage::{UsageExtractor, UsageSnapshot};

use crate::store::types::AuthKind;

/// One outbound call, already resolved to a concrete account (spec §4.7).
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub path: String,
    pub method: reqwest::Method,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub api_key: String,
    pub base_url: Option<String>,
    pub auth_type: AuthKind,
    pub external_account_id: Option<String>,
}

/// Either the whole response body, or a live byte stream for SSE.
pub enum ForwardBody {
    Full(Bytes),
    Stream(BoxStream<'static, Result<Bytes, std::io::Error>>),
}

pub struct ForwardResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub content_type: Option<String>,
    pub body: ForwardBody,
    pub is_stream: bool,
    /// Populated synchronously for non-streaming responses; filled in by a
    /// background tee as a streaming response is consumed (spec §4.7).
    pub usage: Arc<Mutex<UsageSnapshot>>,
    /// Fires once `usage` holds its final value: immediately for a
    /// non-streaming response, or once the background tee has seen the
    /// stream's end (or early disconnect) for a streaming one.
    pub usage_done: Arc<Notify>,
}

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Send a built request and wrap the response per spec §4.7's shared tee
/// behavior: streaming bodies are teed into a background usage scan,
/// non-streaming bodies are parsed once, synchronously.
pub(crate) async fn send_and_collect(
    builder: reqwest::RequestBuilder,
    extractor: UsageExtractor,
) -> Result<ForwardResponse, ForwardError> {
    let resp = builder.send().await?;
    let status = resp.status().as_u16();
    let headers = resp.headers().clone();
    let content_type = headers
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let is_stream = content_type.as_deref().is_some_and(|ct| ct.starts_with("text/event-stream"));

    if is_stream {
        let (stream, usage, usage_done) = usage::tee(resp, extractor);
        Ok(ForwardResponse {
            status,
            headers,
            content_type,
            body: ForwardBody::Stream(stream),
            is_stream: true,
            usage,
            usage_done,
        })
    } else {
        let bytes = resp.bytes().await?;
        let snapshot = serde_json::from_slice::<serde_json::Value>(&bytes)
            .map(|v| usage::from_full_body(extractor, &v))
            .unwrap_or_default();
        let usage_done = Arc::new(Notify::new());
        usage_done.notify_one();
        Ok(ForwardResponse {
            status,
            headers,
            content_type,
            body: ForwardBody::Full(bytes),
            is_stream: false,
            usage: Arc::new(Mutex::new(snapshot)),
            usage_done,
        })
    }
}
