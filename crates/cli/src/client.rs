//! HTTP client for the kiln server, including the SSE event stream reader.

use reqwest::multipart::{Form, Part};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use std::collections::VecDeque;
use thiserror::Error;

use common::{JobSummary, StreamEvent};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status}: {detail}")]
    Api { status: StatusCode, detail: String },

    #[error("unexpected response: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// Whether this failure should come with the how-to-authenticate hint.
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            Self::Api { status, .. }
                if *status == StatusCode::UNAUTHORIZED || *status == StatusCode::FORBIDDEN
        )
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

pub struct Client {
    http: reqwest::Client,
    server_url: String,
    api_key: Option<String>,
}

impl Client {
    pub fn new(server_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            server_url: server_url.into(),
            api_key,
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut builder = self
            .http
            .request(method, format!("{}{}", self.server_url, path));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }

    fn zip_form(zip_bytes: Vec<u8>) -> Result<Form> {
        let part = Part::bytes(zip_bytes)
            .file_name("project.zip")
            .mime_str("application/zip")?;
        Ok(Form::new().part("file", part))
    }

    /// Submit and stream: the first event on the returned stream is the
    /// job id, then logs, then the verdict.
    pub async fn submit_streaming(&self, zip_bytes: Vec<u8>) -> Result<EventStream> {
        let response = self
            .request(Method::POST, "/submit-stream")
            .multipart(Self::zip_form(zip_bytes)?)
            .send()
            .await?;
        Ok(EventStream::new(ensure_success(response).await?))
    }

    /// Submit without waiting; returns the job id.
    pub async fn submit_async(&self, zip_bytes: Vec<u8>) -> Result<String> {
        let response = self
            .request(Method::POST, "/submit-async")
            .multipart(Self::zip_form(zip_bytes)?)
            .send()
            .await?;
        let body: serde_json::Value = ensure_success(response).await?.json().await?;
        body["job_id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ClientError::Protocol("response carried no job_id".to_string()))
    }

    /// Reconnect to a job's stream.
    pub async fn wait(&self, job_id: &str, from_beginning: bool) -> Result<EventStream> {
        let mut builder = self.request(Method::GET, &format!("/jobs/{job_id}/stream"));
        if from_beginning {
            builder = builder.query(&[("from_beginning", "true")]);
        }
        let response = builder.send().await?;
        Ok(EventStream::new(ensure_success(response).await?))
    }

    pub async fn list_jobs(&self) -> Result<Vec<JobSummary>> {
        let response = self.request(Method::GET, "/jobs").send().await?;
        Ok(ensure_success(response).await?.json().await?)
    }
}

async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let detail = match response.json::<serde_json::Value>().await {
        Ok(body) => body["detail"]
            .as_str()
            .unwrap_or("request failed")
            .to_string(),
        Err(_) => "request failed".to_string(),
    };
    Err(ClientError::Api { status, detail })
}

/// Incremental parser for `data: <json>\n\n` frames. Frames may arrive split
/// across network chunks; comment/keepalive lines are ignored.
#[derive(Default)]
pub struct SseParser {
    buf: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &str) -> Vec<StreamEvent> {
        self.buf.push_str(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buf.find("\n\n") {
            let frame: String = self.buf.drain(..pos + 2).collect();
            for line in frame.lines() {
                let Some(payload) = line.strip_prefix("data: ") else {
                    continue;
                };
                if let Ok(event) = serde_json::from_str::<StreamEvent>(payload) {
                    events.push(event);
                }
            }
        }
        events
    }
}

/// A live SSE response being consumed event by event.
pub struct EventStream {
    response: Response,
    parser: SseParser,
    pending: VecDeque<StreamEvent>,
}

impl EventStream {
    fn new(response: Response) -> Self {
        Self {
            response,
            parser: SseParser::new(),
            pending: VecDeque::new(),
        }
    }

    /// The next event, or `None` once the server closes the stream.
    pub async fn next_event(&mut self) -> Result<Option<StreamEvent>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }
            match self.response.chunk().await? {
                Some(bytes) => {
                    let text = String::from_utf8_lossy(&bytes);
                    self.pending.extend(self.parser.push(&text));
                }
                None => return Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_whole_frames() {
        let mut parser = SseParser::new();
        let events = parser.push(
            "data: {\"type\":\"job_id\",\"job_id\":\"j1\"}\n\ndata: {\"type\":\"complete\",\"success\":true}\n\n",
        );
        assert_eq!(
            events,
            vec![
                StreamEvent::JobId {
                    job_id: "j1".into()
                },
                StreamEvent::Complete { success: true },
            ]
        );
    }

    #[test]
    fn reassembles_frames_split_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.push("data: {\"type\":\"log\",").is_empty());
        assert!(parser.push("\"data\":\"1 passed\\n\"}").is_empty());
        let events = parser.push("\n\n");
        assert_eq!(
            events,
            vec![StreamEvent::Log {
                data: "1 passed\n".into()
            }]
        );
    }

    #[test]
    fn ignores_keepalive_comments() {
        let mut parser = SseParser::new();
        let events = parser.push(": keep-alive\n\ndata: {\"type\":\"complete\",\"success\":false}\n\n");
        assert_eq!(events, vec![StreamEvent::Complete { success: false }]);
    }
}
