use std::error::Error as StdError;
use std::time::Duration;

use anyhow::{Context, Result};
use g3studio_contracts::request::RequestEnvelope;
use g3studio_contracts::{ClientError, TransportCategory};
use reqwest::blocking::Client as HttpClient;

/// Status line and fully-read body of one HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub reason: String,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// `HTTP 503 Service Unavailable`, or just `HTTP 503` without a reason phrase.
    pub fn status_line(&self) -> String {
        let reason = self.reason.trim();
        if reason.is_empty() {
            format!("HTTP {}", self.status)
        } else {
            format!("HTTP {} {reason}", self.status)
        }
    }
}

/// A failure below HTTP: nothing usable came back from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendFailure {
    pub category: TransportCategory,
    pub message: String,
}

impl SendFailure {
    pub fn new(category: TransportCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }

    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        let category = if err.is_timeout() {
            TransportCategory::Timeout
        } else if err.is_connect() {
            TransportCategory::Connect
        } else if err.is_body() {
            TransportCategory::Body
        } else if err.is_decode() {
            TransportCategory::Decode
        } else if err.is_request() {
            TransportCategory::Request
        } else {
            TransportCategory::Other
        };
        Self::new(category, error_chain_text(err, 400))
    }

    /// The status line arrived but the body did not. Unless the client timer
    /// fired, the connection went away mid-body.
    pub fn body_read(err: &reqwest::Error) -> Self {
        let category = if err.is_timeout() {
            TransportCategory::Timeout
        } else {
            TransportCategory::Body
        };
        Self::new(category, error_chain_text(err, 400))
    }

    pub fn into_error(self) -> ClientError {
        ClientError::transport(self.category, self.message)
    }
}

/// One HTTP exchange. Implementations must not retry on their own.
pub trait HttpSender: Send + Sync {
    fn send(&self, envelope: &RequestEnvelope) -> Result<RawResponse, SendFailure>;
}

pub struct ReqwestSender {
    http: HttpClient,
}

impl ReqwestSender {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .context("HTTP client construction failed")?;
        Ok(Self { http })
    }
}

impl HttpSender for ReqwestSender {
    fn send(&self, envelope: &RequestEnvelope) -> Result<RawResponse, SendFailure> {
        let body = envelope
            .body_bytes()
            .map_err(|err| SendFailure::new(TransportCategory::Request, err.to_string()))?;
        let mut request = self.http.post(envelope.url());
        for (name, value) in envelope.headers() {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request
            .body(body)
            .send()
            .map_err(|err| SendFailure::from_reqwest(&err))?;
        let status = response.status();
        let reason = status.canonical_reason().unwrap_or_default().to_string();
        // A failed status stays an HTTP error even when its body is lost.
        let body = match response.bytes() {
            Ok(bytes) => bytes.to_vec(),
            Err(err) if !status.is_success() => {
                tracing::debug!(
                    status = status.as_u16(),
                    "error response body unreadable: {}",
                    error_chain_text(&err, 400)
                );
                Vec::new()
            }
            Err(err) => return Err(SendFailure::body_read(&err)),
        };
        Ok(RawResponse {
            status: status.as_u16(),
            reason,
            body,
        })
    }
}

fn error_chain_text(err: &(dyn StdError + 'static), max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut cause = Some(err);
    while let Some(current) = cause {
        let text = current.to_string();
        let trimmed = text.trim();
        if !trimmed.is_empty()
            && !parts
                .last()
                .map(|existing| existing == trimmed)
                .unwrap_or(false)
        {
            parts.push(trimmed.to_string());
        }
        cause = current.source();
    }
    let joined = parts.join(" | caused by: ");
    if joined.chars().count() <= max_chars {
        return joined;
    }
    joined.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Outer(std::io::Error);

    impl std::fmt::Display for Outer {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "error sending request")
        }
    }

    impl StdError for Outer {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn error_chain_text_walks_sources() {
        let err = Outer(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset by peer",
        ));
        assert_eq!(
            error_chain_text(&err, 400),
            "error sending request | caused by: connection reset by peer"
        );
        assert_eq!(error_chain_text(&err, 5), "error…");
    }

    #[test]
    fn status_line_falls_back_without_reason() {
        let response = RawResponse {
            status: 599,
            reason: String::new(),
            body: Vec::new(),
        };
        assert_eq!(response.status_line(), "HTTP 599");
        assert!(!response.is_success());
    }
}
