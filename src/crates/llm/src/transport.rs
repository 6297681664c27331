//! Pluggable HTTP transport.
//!
//! Adapters never talk to the network directly: they go through
//! [`HttpTransport`], which exposes a JSON POST and an SSE POST. The
//! production implementation wraps `reqwest` with `eventsource-stream`
//! decoding; tests substitute canned responses and frames.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::pin::Pin;
use thiserror::Error;

/// Transport-level failure, before provider error mapping.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The server answered with a non-2xx status.
    #[error("HTTP status {status}")]
    Status {
        status: u16,
        body: String,
        headers: HashMap<String, String>,
    },

    /// The request never completed: DNS, TLS, connect, reset.
    #[error("network error: {0}")]
    Network(String),
}

/// A successful (2xx) HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

/// One decoded server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// `event:` field; empty or "message" when unset.
    pub event: String,
    /// `data:` payload.
    pub data: String,
}

/// Stream of decoded SSE frames.
pub type SseStream = Pin<Box<dyn Stream<Item = Result<SseFrame, TransportError>> + Send>>;

/// The HTTP surface adapters depend on.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// POST a JSON body and read the full response. Non-2xx statuses are
    /// returned as [`TransportError::Status`].
    async fn post_json(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: Value,
    ) -> Result<HttpResponse, TransportError>;

    /// POST a JSON body and read the response as an SSE stream.
    async fn post_sse(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: Value,
    ) -> Result<SseStream, TransportError>;
}

/// Production transport over `reqwest`.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build with the given request timeout.
    pub fn new(timeout: std::time::Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(Self { client })
    }

    fn apply_headers(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: &Value,
    ) -> reqwest::RequestBuilder {
        let mut builder = self.client.post(url);
        for (name, value) in headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder.json(body)
    }
}

fn collect_headers(headers: &reqwest::header::HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                value.to_str().unwrap_or_default().to_string(),
            )
        })
        .collect()
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn post_json(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: Value,
    ) -> Result<HttpResponse, TransportError> {
        tracing::debug!(url, "POST (json)");
        let response = self
            .apply_headers(url, headers, &body)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let status = response.status().as_u16();
        let headers = collect_headers(response.headers());
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        if !(200..300).contains(&status) {
            return Err(TransportError::Status {
                status,
                body,
                headers,
            });
        }
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    async fn post_sse(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: Value,
    ) -> Result<SseStream, TransportError> {
        tracing::debug!(url, "POST (sse)");
        let response = self
            .apply_headers(url, headers, &body)
            .header("accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let headers = collect_headers(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status,
                body,
                headers,
            });
        }
        let stream = response.bytes_stream().eventsource().map(|item| {
            item.map(|event| SseFrame {
                event: event.event,
                data: event.data,
            })
            .map_err(|e| TransportError::Network(e.to_string()))
        });
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    /// Frames can be boxed into an [`SseStream`] without a live socket,
    /// which is how adapter streaming tests drive their state machines.
    #[tokio::test]
    async fn test_canned_frames_make_a_stream() {
        let frames = vec![
            Ok(SseFrame {
                event: "message_start".into(),
                data: "{}".into(),
            }),
            Ok(SseFrame {
                event: "message_stop".into(),
                data: "{}".into(),
            }),
        ];
        let mut stream: SseStream = Box::pin(stream::iter(frames));
        let mut seen = Vec::new();
        while let Some(frame) = stream.next().await {
            seen.push(frame.unwrap().event);
        }
        assert_eq!(seen, vec!["message_start", "message_stop"]);
    }
}
