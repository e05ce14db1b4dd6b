use crate::codec::FrameDecoder;
use crate::protocol::{ErrorResponse, ExplainRequest, StatusResponse, StreamEvent};
use futures::{Stream, StreamExt};
use reqwest::Client as HttpClient;
use std::fmt::Display;
use tracing::{debug, warn};

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8000";
pub const INCOMPLETE_STREAM: &str = "connection closed before the explanation finished";

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },
}

/// Everything the user sees of one explanation, rebuilt event by event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExplanationView {
    pub text: String,
    pub tool_results: Vec<String>,
    pub errors: Vec<String>,
    pub complete: bool,
}

impl ExplanationView {
    pub fn apply(&mut self, event: StreamEvent) {
        if self.complete {
            debug!(kind = event.kind(), "ignoring event after done");
            return;
        }
        match event {
            StreamEvent::Text { content } => self.text.push_str(&content),
            StreamEvent::ToolResult { content } => self.tool_results.push(content),
            StreamEvent::Error { content } => self.errors.push(content),
            StreamEvent::Done => self.complete = true,
        }
    }

    pub fn is_loading(&self) -> bool {
        !self.complete
    }
}

/// Read a framed event stream until `done`, calling `on_update` after every
/// event. A stream that ends early is reported as an error in the view.
pub async fn consume<S, B, E, F>(stream: S, mut on_update: F) -> ExplanationView
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
    F: FnMut(&ExplanationView),
{
    futures::pin_mut!(stream);
    let mut decoder = FrameDecoder::new();
    let mut view = ExplanationView::default();

    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(chunk) => {
                for event in decoder.push(chunk.as_ref()) {
                    view.apply(event);
                    on_update(&view);
                    if view.complete {
                        return view;
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "explanation stream failed");
                view.errors.push(format!("connection lost: {e}"));
                view.complete = true;
                on_update(&view);
                return view;
            }
        }
    }

    decoder.finish();
    view.errors.push(INCOMPLETE_STREAM.to_string());
    view.complete = true;
    on_update(&view);
    view
}

#[derive(Clone)]
pub struct ExplainClient {
    base_url: String,
    http: HttpClient,
}

impl ExplainClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: normalize_base_url(base_url),
            http: HttpClient::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn status(&self) -> Result<StatusResponse, ClientError> {
        let response = self.http.get(format!("{}/", self.base_url)).send().await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }

    pub async fn explain<F>(&self, term: &str, on_update: F) -> Result<ExplanationView, ClientError>
    where
        F: FnMut(&ExplanationView),
    {
        let request = ExplainRequest {
            text: term.to_string(),
        };
        let response = self
            .http
            .post(format!("{}/explain-research-term", self.base_url))
            .json(&request)
            .send()
            .await?;
        let response = check_status(response).await?;

        Ok(consume(response.bytes_stream(), on_update).await)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorResponse>(&body)
        .map(|e| e.error)
        .unwrap_or(body);
    Err(ClientError::Status {
        status: status.as_u16(),
        message,
    })
}

fn normalize_base_url(value: &str) -> String {
    value.trim_end_matches('/').to_string()
}
