//! `reqwest`-backed [`HttpClient`].
//!
//! Only compiled with the `reqwest` feature. Status codes are passed through
//! untouched; reqwest errors are mapped to [`TransportErrorKind`] so the
//! orchestrator can tell connectivity failures apart from everything else.

use crate::error::{SyncError, SyncResult, TransportErrorKind};
use crate::transport::{
    HttpClient, HttpMethod, HttpRequest, HttpResponse, MultipartPart, ProgressCallback,
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, Stream, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Size of the chunks multipart bodies are streamed in.
const UPLOAD_CHUNK: usize = 64 * 1024;

/// HTTP client over a shared `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    /// Creates a client with a default connection pool.
    pub fn new() -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("skiff/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(map_error)?;
        Ok(Self { client })
    }

    /// Wraps an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn read_response(
        response: reqwest::Response,
        progress: Option<&ProgressCallback>,
    ) -> SyncResult<HttpResponse> {
        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect::<HashMap<_, _>>();
        let total = response.content_length();

        let mut response = response;
        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await.map_err(map_error)? {
            body.extend_from_slice(&chunk);
            if let Some(progress) = progress {
                progress(body.len() as u64, total);
            }
        }

        Ok(HttpResponse {
            status: status.as_u16(),
            headers,
            body: body.freeze(),
            status_message: status.canonical_reason().map(str::to_string),
        })
    }
}

fn map_error(error: reqwest::Error) -> SyncError {
    let kind = if error.is_timeout() {
        TransportErrorKind::Timeout
    } else if error.is_connect() {
        let text = format!("{error:?}").to_ascii_lowercase();
        if text.contains("dns") || text.contains("resolve") {
            TransportErrorKind::Dns
        } else if text.contains("unreachable") {
            TransportErrorKind::Unreachable
        } else {
            TransportErrorKind::Connection
        }
    } else if error.is_request() || error.is_body() {
        TransportErrorKind::Connection
    } else {
        TransportErrorKind::Other
    };
    SyncError::transport(kind, error.to_string())
}

/// Streams `data` in chunks, adding each chunk to `sent` as reqwest pulls it.
fn counted_stream(
    data: Bytes,
    sent: Arc<AtomicU64>,
    total: u64,
    progress: ProgressCallback,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
    let chunks: Vec<Bytes> = (0..data.len())
        .step_by(UPLOAD_CHUNK)
        .map(|start| data.slice(start..(start + UPLOAD_CHUNK).min(data.len())))
        .collect();
    stream::iter(chunks).map(move |chunk| {
        let len = chunk.len() as u64;
        let done = sent.fetch_add(len, Ordering::SeqCst) + len;
        progress(done, Some(total));
        Ok(chunk)
    })
}

fn method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Delete => reqwest::Method::DELETE,
        HttpMethod::Patch => reqwest::Method::PATCH,
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn send(&self, request: HttpRequest) -> SyncResult<HttpResponse> {
        let mut builder = self
            .client
            .request(method(request.method), &request.url)
            .timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        let response = builder.send().await.map_err(map_error)?;
        Self::read_response(response, None).await
    }

    async fn download_range(
        &self,
        url: &str,
        range: Option<(u64, Option<u64>)>,
        timeout: Duration,
        progress: Option<ProgressCallback>,
    ) -> SyncResult<HttpResponse> {
        let mut builder = self.client.get(url).timeout(timeout);
        if let Some((start, end)) = range {
            let value = match end {
                Some(end) => format!("bytes={start}-{end}"),
                None => format!("bytes={start}-"),
            };
            builder = builder.header(reqwest::header::RANGE, value);
        }
        let response = builder.send().await.map_err(map_error)?;
        Self::read_response(response, progress.as_ref()).await
    }

    async fn upload_multipart(
        &self,
        url: &str,
        parts: Vec<MultipartPart>,
        timeout: Duration,
        progress: Option<ProgressCallback>,
    ) -> SyncResult<HttpResponse> {
        let total: u64 = parts.iter().map(|p| p.data.len() as u64).sum();
        let sent = Arc::new(AtomicU64::new(0));
        let mut form = reqwest::multipart::Form::new();
        for part in parts {
            let MultipartPart {
                name,
                file_name,
                content_type,
                data,
            } = part;
            let mut field = match &progress {
                Some(progress) => {
                    let len = data.len() as u64;
                    let body = reqwest::Body::wrap_stream(counted_stream(
                        data,
                        sent.clone(),
                        total,
                        progress.clone(),
                    ));
                    reqwest::multipart::Part::stream_with_length(body, len)
                }
                None => reqwest::multipart::Part::bytes(data.to_vec()),
            };
            if let Some(file_name) = file_name {
                field = field.file_name(file_name);
            }
            if let Some(content_type) = content_type {
                field = field.mime_str(&content_type).map_err(map_error)?;
            }
            form = form.part(name, field);
        }

        let response = self
            .client
            .post(url)
            .timeout(timeout)
            .multipart(form)
            .send()
            .await
            .map_err(map_error)?;
        Self::read_response(response, None).await
    }
}
