//! Transport layer abstraction for sync operations.

use crate::error::{SyncError, SyncResult, TransportErrorKind};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Progress callback: `(bytes transferred, total bytes if known)`.
pub type ProgressCallback = Arc<dyn Fn(u64, Option<u64>) + Send + Sync>;

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// DELETE
    Delete,
    /// PATCH
    Patch,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
        };
        f.write_str(name)
    }
}

/// A single HTTP request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Request method.
    pub method: HttpMethod,
    /// Absolute URL.
    pub url: String,
    /// Extra headers.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: Option<Bytes>,
    /// Caller-supplied timeout.
    pub timeout: Duration,
}

impl HttpRequest {
    /// Creates a request without body.
    pub fn new(method: HttpMethod, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            timeout,
        }
    }

    /// Sets a JSON body and content type.
    pub fn json_body(mut self, body: impl Into<Bytes>) -> Self {
        self.headers
            .push(("content-type".into(), "application/json".into()));
        self.body = Some(body.into());
        self
    }

    /// Adds a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Uniform response shape returned by every [`HttpClient`] call.
///
/// HTTP error statuses are ordinary responses; only transport-level failures
/// surface as errors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response headers (lower-cased names).
    pub headers: HashMap<String, String>,
    /// Response body.
    pub body: Bytes,
    /// Reason phrase, when the transport provides one.
    pub status_message: Option<String>,
}

impl HttpResponse {
    /// Creates a response with the given status and empty body.
    pub fn with_status(status: u16) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    /// Creates a response with a JSON body.
    pub fn json(status: u16, body: impl Into<Bytes>) -> Self {
        let mut headers = HashMap::new();
        headers.insert("content-type".into(), "application/json".into());
        Self {
            status,
            headers,
            body: body.into(),
            status_message: None,
        }
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Converts a non-2xx response into [`SyncError::ServerRejected`].
    pub fn error_for_status(self) -> SyncResult<Self> {
        if self.is_success() {
            return Ok(self);
        }
        let excerpt: String = String::from_utf8_lossy(&self.body).chars().take(200).collect();
        let message = match (&self.status_message, excerpt.is_empty()) {
            (Some(reason), true) => reason.clone(),
            (Some(reason), false) => format!("{reason}: {excerpt}"),
            (None, _) => excerpt,
        };
        Err(SyncError::ServerRejected {
            status: self.status,
            message,
        })
    }

    /// Decodes the body as JSON.
    pub fn json_body<T: DeserializeOwned>(&self) -> SyncResult<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| SyncError::Protocol(format!("failed to decode response body: {e}")))
    }
}

/// One part of a multipart upload.
#[derive(Debug, Clone, PartialEq)]
pub struct MultipartPart {
    /// Form field name.
    pub name: String,
    /// File name; `None` for plain fields.
    pub file_name: Option<String>,
    /// Content type of the part.
    pub content_type: Option<String>,
    /// Part content.
    pub data: Bytes,
}

impl MultipartPart {
    /// Creates a plain text field.
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            file_name: None,
            content_type: Some("application/json".into()),
            data: Bytes::from(value.into()),
        }
    }

    /// Creates a file part.
    pub fn file(name: impl Into<String>, file_name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            file_name: Some(file_name.into()),
            content_type: Some("application/octet-stream".into()),
            data: data.into(),
        }
    }
}

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport. The engine
/// never talks to the network any other way, so tests substitute
/// [`MockHttpClient`] and hosts can route through their own stack.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a request and returns the response.
    async fn send(&self, request: HttpRequest) -> SyncResult<HttpResponse>;

    /// Downloads `url`, optionally restricted to a byte range.
    async fn download_range(
        &self,
        url: &str,
        range: Option<(u64, Option<u64>)>,
        timeout: Duration,
        progress: Option<ProgressCallback>,
    ) -> SyncResult<HttpResponse>;

    /// Posts a multipart form.
    async fn upload_multipart(
        &self,
        url: &str,
        parts: Vec<MultipartPart>,
        timeout: Duration,
        progress: Option<ProgressCallback>,
    ) -> SyncResult<HttpResponse>;

    /// Sends a GET request.
    async fn get(&self, url: &str, timeout: Duration) -> SyncResult<HttpResponse> {
        self.send(HttpRequest::new(HttpMethod::Get, url, timeout)).await
    }

    /// Sends a POST request with a JSON body.
    async fn post_json(&self, url: &str, body: Vec<u8>, timeout: Duration) -> SyncResult<HttpResponse> {
        self.send(HttpRequest::new(HttpMethod::Post, url, timeout).json_body(body))
            .await
    }

    /// Sends a PUT request with a JSON body.
    async fn put_json(&self, url: &str, body: Vec<u8>, timeout: Duration) -> SyncResult<HttpResponse> {
        self.send(HttpRequest::new(HttpMethod::Put, url, timeout).json_body(body))
            .await
    }

    /// Sends a PATCH request with a JSON body.
    async fn patch_json(&self, url: &str, body: Vec<u8>, timeout: Duration) -> SyncResult<HttpResponse> {
        self.send(HttpRequest::new(HttpMethod::Patch, url, timeout).json_body(body))
            .await
    }

    /// Sends a DELETE request.
    async fn delete(&self, url: &str, timeout: Duration) -> SyncResult<HttpResponse> {
        self.send(HttpRequest::new(HttpMethod::Delete, url, timeout))
            .await
    }
}

/// A scripted reply for [`MockHttpClient`].
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Return this response.
    Respond(HttpResponse),
    /// Fail at the transport level.
    Fail(TransportErrorKind, String),
}

impl MockReply {
    /// Shorthand for an empty response with `status`.
    pub fn status(status: u16) -> Self {
        MockReply::Respond(HttpResponse::with_status(status))
    }

    /// Shorthand for a JSON response.
    pub fn json(status: u16, body: &str) -> Self {
        MockReply::Respond(HttpResponse::json(status, body.to_string()))
    }

    fn into_result(self) -> SyncResult<HttpResponse> {
        match self {
            MockReply::Respond(response) => Ok(response),
            MockReply::Fail(kind, message) => Err(SyncError::transport(kind, message)),
        }
    }
}

/// A request observed by [`MockHttpClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    /// Method (multipart uploads record as POST).
    pub method: HttpMethod,
    /// Target URL.
    pub url: String,
    /// Body of plain requests.
    pub body: Option<Bytes>,
    /// Parts of multipart uploads.
    pub parts: Vec<MultipartPart>,
}

impl RecordedRequest {
    /// Decodes the body as JSON.
    pub fn json_body(&self) -> Option<serde_json::Value> {
        self.body
            .as_ref()
            .and_then(|b| serde_json::from_slice(b).ok())
    }
}

/// A mock HTTP client for testing.
///
/// Replies are taken, in order, from the first non-empty route queue whose
/// pattern is contained in the URL, then from the global queue, then the
/// default reply (`200` with an empty JSON object).
#[derive(Debug)]
pub struct MockHttpClient {
    offline: AtomicBool,
    routes: Mutex<Vec<(String, VecDeque<MockReply>)>>,
    queue: Mutex<VecDeque<MockReply>>,
    default_reply: Mutex<MockReply>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl Default for MockHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHttpClient {
    /// Creates a new mock client.
    pub fn new() -> Self {
        Self {
            offline: AtomicBool::new(false),
            routes: Mutex::new(Vec::new()),
            queue: Mutex::new(VecDeque::new()),
            default_reply: Mutex::new(MockReply::json(200, "{}")),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queues a reply for any URL.
    pub fn enqueue(&self, reply: MockReply) {
        self.queue.lock().push_back(reply);
    }

    /// Queues a reply for URLs containing `pattern`.
    pub fn enqueue_for(&self, pattern: &str, reply: MockReply) {
        let mut routes = self.routes.lock();
        match routes.iter_mut().find(|(p, _)| p == pattern) {
            Some((_, queue)) => queue.push_back(reply),
            None => routes.push((pattern.to_string(), VecDeque::from([reply]))),
        }
    }

    /// Sets the reply used when no queue has one.
    pub fn set_default(&self, reply: MockReply) {
        *self.default_reply.lock() = reply;
    }

    /// Makes every call fail with a connection error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Returns all requests seen so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    /// Returns requests whose URL contains `pattern`.
    pub fn requests_to(&self, pattern: &str) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.url.contains(pattern))
            .cloned()
            .collect()
    }

    fn reply_for(&self, request: RecordedRequest) -> SyncResult<HttpResponse> {
        let url = request.url.clone();
        self.requests.lock().push(request);

        if self.offline.load(Ordering::SeqCst) {
            return Err(SyncError::transport(
                TransportErrorKind::Connection,
                "mock client is offline",
            ));
        }

        let routed = self
            .routes
            .lock()
            .iter_mut()
            .find(|(pattern, queue)| url.contains(pattern.as_str()) && !queue.is_empty())
            .and_then(|(_, queue)| queue.pop_front());

        let reply = routed
            .or_else(|| self.queue.lock().pop_front())
            .unwrap_or_else(|| self.default_reply.lock().clone());
        reply.into_result()
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn send(&self, request: HttpRequest) -> SyncResult<HttpResponse> {
        self.reply_for(RecordedRequest {
            method: request.method,
            url: request.url,
            body: request.body,
            parts: Vec::new(),
        })
    }

    async fn download_range(
        &self,
        url: &str,
        _range: Option<(u64, Option<u64>)>,
        _timeout: Duration,
        progress: Option<ProgressCallback>,
    ) -> SyncResult<HttpResponse> {
        let response = self.reply_for(RecordedRequest {
            method: HttpMethod::Get,
            url: url.to_string(),
            body: None,
            parts: Vec::new(),
        })?;
        if let Some(progress) = progress {
            let len = response.body.len() as u64;
            progress(len, Some(len));
        }
        Ok(response)
    }

    async fn upload_multipart(
        &self,
        url: &str,
        parts: Vec<MultipartPart>,
        _timeout: Duration,
        progress: Option<ProgressCallback>,
    ) -> SyncResult<HttpResponse> {
        let total: u64 = parts.iter().map(|p| p.data.len() as u64).sum();
        let response = self.reply_for(RecordedRequest {
            method: HttpMethod::Post,
            url: url.to_string(),
            body: None,
            parts,
        })?;
        if let Some(progress) = progress {
            progress(total, Some(total));
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_default_reply() {
        let client = MockHttpClient::new();
        let response = client
            .get("https://sync.example.com/ping", Duration::from_secs(1))
            .await
            .unwrap();
        assert!(response.is_success());
        assert_eq!(client.requests().len(), 1);
    }

    #[tokio::test]
    async fn mock_routes_take_priority() {
        let client = MockHttpClient::new();
        client.enqueue(MockReply::status(201));
        client.enqueue_for("/errors", MockReply::status(503));

        let timeout = Duration::from_secs(1);
        let errors = client.post_json("https://x/errors", b"[]".to_vec(), timeout).await.unwrap();
        let other = client.post_json("https://x/upload", b"[]".to_vec(), timeout).await.unwrap();

        assert_eq!(errors.status, 503);
        assert_eq!(other.status, 201);
        assert_eq!(client.requests_to("/errors").len(), 1);
    }

    #[tokio::test]
    async fn mock_offline_fails_with_connection_error() {
        let client = MockHttpClient::new();
        client.set_offline(true);

        let result = client.get("https://x", Duration::from_secs(1)).await;
        assert!(matches!(
            result,
            Err(SyncError::Transport {
                kind: TransportErrorKind::Connection,
                ..
            })
        ));
        // The attempt is still recorded
        assert_eq!(client.requests().len(), 1);
    }

    #[tokio::test]
    async fn mock_multipart_reports_progress() {
        let client = MockHttpClient::new();
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        let progress: ProgressCallback = Arc::new(move |sent, total| {
            *sink.lock() = Some((sent, total));
        });

        client
            .upload_multipart(
                "https://x/files",
                vec![MultipartPart::file("file_0", "a.bin", vec![0u8; 10])],
                Duration::from_secs(1),
                Some(progress),
            )
            .await
            .unwrap();

        assert_eq!(*seen.lock(), Some((10, Some(10))));
        assert_eq!(client.requests()[0].parts.len(), 1);
    }

    #[test]
    fn error_for_status() {
        assert!(HttpResponse::with_status(204).error_for_status().is_ok());

        let mut response = HttpResponse::json(500, "boom");
        response.status_message = Some("Internal Server Error".into());
        let err = response.error_for_status().unwrap_err();
        assert_eq!(err.http_status(), Some(500));
        assert!(err.to_string().contains("Internal Server Error: boom"));
    }
}
