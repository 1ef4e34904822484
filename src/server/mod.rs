//! HTTP server
//!
//! hyper http1 with TokioIo, one task per TCP connection. Routes:
//! - `POST /generate-key` provisions a session
//! - `GET /ws/{session_id}` upgrades to the session WebSocket
//! - `GET /health` reports counts

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{Sink, Stream};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{self, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, error, info, warn};

use crate::app::AppState;
use crate::gateway::{self, SessionGateway};
use crate::ssh::ShellTransport;

/// How long shutdown waits for gateways to finish teardown
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

const WS_PREFIX: &str = "/ws/";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateKeyResponse {
    public_key: String,
    session_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    sessions: usize,
    active_bridges: usize,
}

/// Accept connections until `shutdown` resolves, then stop every gateway.
pub async fn serve<T, F>(
    state: Arc<AppState<T>>,
    listener: TcpListener,
    shutdown: F,
) -> std::io::Result<()>
where
    T: ShellTransport,
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let state = Arc::clone(&state);
                    tokio::spawn(async move {
                        let io = TokioIo::new(stream);

                        let service = service_fn(move |req| {
                            let state = Arc::clone(&state);
                            async move { handle_request(state, addr, req).await }
                        });

                        if let Err(err) = http1::Builder::new()
                            .serve_connection(io, service)
                            .with_upgrades()
                            .await
                        {
                            debug!("Error serving connection from {}: {:?}", addr, err);
                        }
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {:?}", e);
                }
            },
            _ = &mut shutdown => break,
        }
    }

    let stopping = state.bridges.shutdown_all();
    info!("Shutting down, stopping {} active session(s)", stopping);

    let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
    while !state.bridges.is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    if !state.bridges.is_empty() {
        warn!(
            "{} session(s) still active after {:?}",
            state.bridges.len(),
            DRAIN_TIMEOUT
        );
    }

    Ok(())
}

/// Route incoming HTTP requests
async fn handle_request<T: ShellTransport>(
    state: Arc<AppState<T>>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    debug!("{} {} from {}", method, path, addr);

    if method == Method::OPTIONS {
        return Ok(preflight_response());
    }

    let response = match (method, path.as_str()) {
        (Method::POST, "/generate-key") => generate_key(&state),
        (Method::GET, "/health") => health(&state),
        (Method::GET, p) if p.starts_with(WS_PREFIX) => {
            let segment = p[WS_PREFIX.len()..].to_string();
            handle_session_upgrade(state, req, &segment)
        }
        _ => not_found_response(&path),
    };

    Ok(response)
}

fn generate_key<T: ShellTransport>(state: &AppState<T>) -> Response<Full<Bytes>> {
    match state.provision() {
        Ok(provisioned) => json_response(
            StatusCode::OK,
            &GenerateKeyResponse {
                public_key: provisioned.public_key,
                session_id: provisioned.session_id.to_string(),
            },
        ),
        Err(e) => {
            error!("Key provisioning failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

fn health<T: ShellTransport>(state: &AppState<T>) -> Response<Full<Bytes>> {
    json_response(
        StatusCode::OK,
        &HealthResponse {
            status: "ok",
            sessions: state.store.len(),
            active_bridges: state.bridges.len(),
        },
    )
}

/// Upgrade `/ws/{session_id}` and hand the socket to a gateway.
///
/// Refused sessions are still upgraded so the client receives a 1008 close.
fn handle_session_upgrade<T: ShellTransport>(
    state: Arc<AppState<T>>,
    req: Request<Incoming>,
    segment: &str,
) -> Response<Full<Bytes>> {
    if !hyper_tungstenite::is_upgrade_request(&req) {
        return error_response(StatusCode::BAD_REQUEST, "Expected a WebSocket upgrade");
    }

    let (response, websocket) = match hyper_tungstenite::upgrade(req, None) {
        Ok(upgrade) => upgrade,
        Err(e) => {
            error!("WebSocket upgrade error: {:?}", e);
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("WebSocket upgrade failed: {}", e),
            );
        }
    };

    tokio::spawn(attach_session(state, segment.to_string(), websocket));
    response
}

/// Admit the session once the handshake has completed, then serve or refuse it.
///
/// Nothing is registered for a handshake that never completes, so the
/// provisioned session stays claimable.
async fn attach_session<T, F, S, E>(state: Arc<AppState<T>>, segment: String, websocket: F)
where
    T: ShellTransport,
    F: Future<Output = Result<S, E>>,
    S: Stream<Item = Result<Message, WsError>>
        + Sink<Message, Error = WsError>
        + Unpin
        + Send,
    E: std::fmt::Debug,
{
    let ws = match websocket.await {
        Ok(ws) => ws,
        Err(e) => {
            error!("WebSocket upgrade failed for /ws/{}: {:?}", segment, e);
            return;
        }
    };

    let admitted = gateway::parse_session_id(&segment)
        .and_then(|session_id| SessionGateway::admit(state, session_id));

    match admitted {
        Ok(session) => {
            let session_id = session.session_id();
            match session.run(ws).await {
                Ok(()) => info!("Session {} closed", session_id),
                Err(e) => warn!("Session {} ended with error: {}", session_id, e),
            }
        }
        Err(e) => gateway::refuse(ws, &e.to_string()).await,
    }
}

fn with_cors(mut response: Response<Full<Bytes>>) -> Response<Full<Bytes>> {
    response.headers_mut().insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    response
}

fn json_response<B: Serialize>(status: StatusCode, body: &B) -> Response<Full<Bytes>> {
    let json_body = match serde_json::to_vec(body) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("Failed to encode response: {}", e);
            br#"{"error":"Internal error"}"#.to_vec()
        }
    };
    let mut response = Response::new(Full::new(Bytes::from(json_body)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    with_cors(response)
}

fn error_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    json_response(status, &serde_json::json!({ "error": message }))
}

/// CORS preflight response
fn preflight_response() -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::NO_CONTENT;
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    with_cors(response)
}

/// Not found response
fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    json_response(
        StatusCode::NOT_FOUND,
        &serde_json::json!({ "error": "Not Found", "path": path }),
    )
}
