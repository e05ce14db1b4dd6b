use crate::agent::Agent;
use crate::protocol::{ErrorResponse, ExplainRequest, StatusResponse};
use crate::publisher::Publisher;
use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use std::error::Error;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

pub const DEFAULT_LISTEN: &str = "127.0.0.1:8000";
pub const DEFAULT_MAX_TERM_CHARS: usize = 500;
pub const DEFAULT_CHANNEL_CAPACITY: usize = 16;
pub const DEFAULT_CORS_ORIGINS: [&str; 2] = ["http://localhost:3000", "http://localhost:8000"];

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: String,
    pub max_term_chars: usize,
    /// Frames buffered between the agent loop and the response body.
    pub channel_capacity: usize,
    /// Browser origins allowed to call the API.
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            max_term_chars: DEFAULT_MAX_TERM_CHARS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            cors_origins: DEFAULT_CORS_ORIGINS.map(String::from).to_vec(),
        }
    }
}

struct ServerState {
    /// `None` when no model API key is configured.
    agent: Option<Arc<Agent>>,
    config: ServerConfig,
}

type ServerResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

pub async fn run(config: ServerConfig, agent: Option<Agent>) -> ServerResult<()> {
    let listen = config.listen.clone();
    let app = router(config, agent.map(Arc::new));

    let listener = tokio::net::TcpListener::bind(&listen).await?;
    info!(address = %listen, "paperlens server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn router(config: ServerConfig, agent: Option<Arc<Agent>>) -> axum::Router {
    let cors = cors_layer(&config.cors_origins);
    let state = Arc::new(ServerState { agent, config });
    axum::Router::new()
        .route("/", get(status))
        .route("/explain-research-term", post(explain_research_term))
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(origin = %origin, error = %e, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(true)
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutting down");
    }
}

async fn status(State(state): State<Arc<ServerState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok".to_string(),
        message: "paperlens explanation service".to_string(),
        anthropic_configured: state.agent.is_some(),
    })
}

async fn explain_research_term(
    State(state): State<Arc<ServerState>>,
    payload: Result<Json<ExplainRequest>, JsonRejection>,
) -> Response {
    let payload = match payload {
        Ok(Json(payload)) => payload,
        Err(rejection) => return error_response(rejection.status(), rejection.body_text()),
    };

    let term = match validate_term(&payload.text, state.config.max_term_chars) {
        Ok(term) => term.to_string(),
        Err(message) => return error_response(StatusCode::BAD_REQUEST, message),
    };

    let Some(agent) = state.agent.clone() else {
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "ANTHROPIC_API_KEY is not configured".to_string(),
        );
    };

    let (publisher, frames) =
        Publisher::channel(state.config.channel_capacity, CancellationToken::new());
    tokio::spawn(async move {
        let _ = agent.explain(&term, &publisher).await;
    });

    let body = Body::from_stream(ReceiverStream::new(frames).map(Ok::<_, std::convert::Infallible>));
    let mut response = body.into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    response
}

fn validate_term(text: &str, max_chars: usize) -> Result<&str, String> {
    let term = text.trim();
    if term.is_empty() {
        return Err("text must not be empty".to_string());
    }
    let length = term.chars().count();
    if length > max_chars {
        return Err(format!(
            "text is too long ({length} characters, at most {max_chars} allowed)"
        ));
    }
    Ok(term)
}

fn error_response(status: StatusCode, error: String) -> Response {
    (status, Json(ErrorResponse { error })).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentConfig;
    use crate::agent::tests::{ScriptedModel, Turn, agent_with, paper_server, text};
    use crate::codec::FrameDecoder;
    use crate::protocol::StreamEvent;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn body_bytes(response: Response) -> axum::body::Bytes {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
    }

    fn explain_request(body: &'static str) -> Request<Body> {
        Request::post("/explain-research-term")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn explanation_is_streamed_as_framed_events() {
        let model = ScriptedModel::new(vec![Turn::Events(vec![
            text("Attention "),
            text("weighs inputs."),
        ])]);
        let agent = agent_with(model, Some(paper_server()), AgentConfig::default());
        let app = router(ServerConfig::default(), Some(Arc::new(agent)));

        let response = app
            .oneshot(explain_request(r#"{"text": "  attention  "}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "text/event-stream");
        assert_eq!(headers[header::CACHE_CONTROL], "no-cache");
        assert_eq!(headers["x-accel-buffering"], "no");

        let body = body_bytes(response).await;
        let mut decoder = FrameDecoder::new();
        let events = decoder.push(&body);
        assert_eq!(decoder.finish(), 0);
        assert_eq!(
            events,
            vec![
                StreamEvent::text("Attention "),
                StreamEvent::text("weighs inputs."),
                StreamEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn malformed_body_gets_json_error() {
        let app = router(ServerConfig::default(), None);

        let response = app
            .oneshot(explain_request(r#"{"term": "attention"}"#))
            .await
            .unwrap();

        assert!(response.status().is_client_error());
        let body: ErrorResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert!(body.error.contains("text"), "{}", body.error);
    }

    #[tokio::test]
    async fn cors_allows_configured_origins_only() {
        let app = router(ServerConfig::default(), None);
        let preflight = |origin: &'static str| {
            Request::builder()
                .method(Method::OPTIONS)
                .uri("/explain-research-term")
                .header(header::ORIGIN, origin)
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                .body(Body::empty())
                .unwrap()
        };

        let allowed = app
            .clone()
            .oneshot(preflight("http://localhost:3000"))
            .await
            .unwrap();
        assert_eq!(
            allowed.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://localhost:3000"
        );
        assert_eq!(
            allowed.headers()[header::ACCESS_CONTROL_ALLOW_CREDENTIALS],
            "true"
        );

        let refused = app.oneshot(preflight("http://evil.example")).await.unwrap();
        assert!(
            refused
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .is_none()
        );
    }

    #[test]
    fn term_is_trimmed_and_bounded() {
        assert_eq!(validate_term("  attention  ", 10), Ok("attention"));
        assert!(validate_term(" \n\t ", 10).is_err());
        assert!(validate_term("ééééé", 5).is_ok());
        assert!(
            validate_term("ééééé", 4)
                .unwrap_err()
                .contains("at most 4")
        );
    }

    #[tokio::test]
    async fn explain_without_api_key_is_a_server_error() {
        let state = Arc::new(ServerState {
            agent: None,
            config: ServerConfig::default(),
        });

        let response = explain_research_term(
            State(state.clone()),
            Ok(Json(ExplainRequest {
                text: "attention".to_string(),
            })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = explain_research_term(
            State(state),
            Ok(Json(ExplainRequest {
                text: "   ".to_string(),
            })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn status_reports_missing_api_key() {
        let state = Arc::new(ServerState {
            agent: None,
            config: ServerConfig::default(),
        });
        let Json(body) = status(State(state)).await;
        assert_eq!(body.status, "ok");
        assert!(!body.anthropic_configured);
    }
}
