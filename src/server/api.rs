use crate::assistant::AssistantError;
use crate::models::api::{
    ChatRequest,
    ChatResponse,
    ErrorResponse,
    StartChatResponse,
    StatusQuery,
    StatusResponse,
};
use crate::models::recommendation::StudentProfile;
use crate::session::ConversationSession;
use axum::{
    extract::{ ConnectInfo, Path, Query, Request, State },
    http::{ header, HeaderValue, Method, StatusCode },
    middleware::{ self, Next },
    response::{ IntoResponse, Response },
    routing::{ delete, get, post },
    Json,
    Router,
};
use governor::{ DefaultKeyedRateLimiter, Quota, RateLimiter };
use log::{ error, info, warn };
use std::error::Error;
use std::net::{ IpAddr, Ipv4Addr, SocketAddr };
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::{ CancellationToken, DropGuard };
use tower_http::cors::{ AllowOrigin, Any, CorsLayer };
use uuid::Uuid;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);
const LIMITER_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

type ClientLimiter = DefaultKeyedRateLimiter<IpAddr>;

#[derive(Clone)]
struct AppState {
    session: ConversationSession,
    limiter: Option<Arc<ClientLimiter>>,
    shutdown: CancellationToken,
}

impl AppState {
    /// Token for one request. It is cancelled when the returned guard drops,
    /// which also happens if the client goes away mid-request.
    fn request_token(&self) -> (CancellationToken, DropGuard) {
        let token = self.shutdown.child_token();
        let guard = token.clone().drop_guard();
        (token, guard)
    }
}

pub fn router(
    session: ConversationSession,
    cors_origin: Option<&str>,
    rate_limit_per_second: u32,
    shutdown: CancellationToken
) -> Result<Router, Box<dyn Error + Send + Sync>> {
    let limiter = NonZeroU32::new(rate_limit_per_second).map(|rate|
        Arc::new(RateLimiter::keyed(Quota::per_second(rate)))
    );
    if let Some(limiter) = &limiter {
        spawn_limiter_pruner(Arc::clone(limiter), shutdown.clone());
    }
    let state = AppState { session, limiter, shutdown };

    let allow_origin = match cors_origin {
        Some(origin) =>
            AllowOrigin::exact(
                HeaderValue::from_str(origin).map_err(|e|
                    format!("Invalid CORS origin '{}': {}", origin, e)
                )?
            ),
        None => AllowOrigin::from(Any),
    };
    let cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Ok(
        Router::new()
            .route("/chat", post(chat_handler))
            .route("/chat/{thread_id}", delete(end_chat_handler))
            .route("/recommendations", post(recommendations_handler))
            .route("/api/chat", post(start_chat_handler))
            .route("/api/chat/status", get(chat_status_handler))
            .route("/health", get(health_handler))
            .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
            .layer(cors)
            .with_state(state)
    )
}

/// Forgets clients that have been quiet long enough to have a full budget again.
fn spawn_limiter_pruner(limiter: Arc<ClientLimiter>, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(LIMITER_PRUNE_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    limiter.retain_recent();
                    limiter.shrink_to_fit();
                }
            }
        }
    });
}

pub async fn serve(
    addr: SocketAddr,
    app: Router,
    tls: Option<(String, String)>,
    shutdown: CancellationToken
) -> Result<(), Box<dyn Error + Send + Sync>> {
    if let Some((cert_path, key_path)) = tls {
        let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(
            &cert_path,
            &key_path
        ).await?;
        let handle = axum_server::Handle::new();
        let stopper = handle.clone();
        tokio::spawn(async move {
            shutdown.cancelled().await;
            stopper.graceful_shutdown(Some(SHUTDOWN_GRACE));
        });

        info!("HTTPS server listening on: https://{}", addr);
        axum_server::bind_rustls(addr, tls_config).handle(handle).serve(app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    } else {
        let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
            format!("Failed to bind HTTP server to {}: {}. Try a different port.", addr, e)
        })?;
        info!("HTTP server listening on: http://{}", addr);
        axum
            ::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(async move { shutdown.cancelled().await }).await?;
    }
    info!("Server stopped");
    Ok(())
}

/// Peer address of the request. Requests without connection info share one budget.
fn client_ip(req: &Request) -> IpAddr {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

async fn rate_limit(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if let Some(limiter) = &state.limiter {
        let ip = client_ip(&req);
        if limiter.check_key(&ip).is_err() {
            warn!("Rate limit exceeded for {} on {} {}", ip, req.method(), req.uri().path());
            return (
                StatusCode::TOO_MANY_REQUESTS,
                Json(ErrorResponse::new("Too many requests")),
            ).into_response();
        }
    }
    next.run(req).await
}

fn error_response(request_id: &Uuid, err: &AssistantError) -> Response {
    match err {
        AssistantError::ThreadBusy { .. } => {
            warn!("[{}] {}", request_id, err);
            (
                StatusCode::CONFLICT,
                Json(ErrorResponse::new("A reply is still being generated for this conversation")),
            ).into_response()
        }
        _ => {
            error!("[{}] {}", request_id, err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("Internal server error")),
            ).into_response()
        }
    }
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(message))).into_response()
}

async fn chat_handler(State(state): State<AppState>, Json(req): Json<ChatRequest>) -> Response {
    if req.message.trim().is_empty() {
        return bad_request("Message must not be empty");
    }
    let request_id = Uuid::new_v4();
    info!("[{}] POST /chat (thread: {})", request_id, req.thread_id.as_deref().unwrap_or("new"));

    let (cancel, _guard) = state.request_token();
    match state.session.send_message(&req.message, req.thread_id.as_deref(), &cancel).await {
        Ok(reply) =>
            Json(ChatResponse {
                message: reply.reply,
                thread_id: reply.thread_id,
            }).into_response(),
        Err(e) => error_response(&request_id, &e),
    }
}

async fn end_chat_handler(State(state): State<AppState>, Path(thread_id): Path<String>) -> StatusCode {
    if state.session.end_conversation(&thread_id).await {
        info!("Ended conversation {}", thread_id);
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn recommendations_handler(
    State(state): State<AppState>,
    Json(profile): Json<StudentProfile>
) -> Response {
    let request_id = Uuid::new_v4();
    info!("[{}] POST /recommendations for student {}", request_id, profile.student_id);

    let (cancel, _guard) = state.request_token();
    match state.session.request_recommendations(&profile, &cancel).await {
        Ok(outcome) => {
            for failure in &outcome.failures {
                warn!("[{}] {} assistant skipped: {}", request_id, failure.source, failure.error);
            }
            Json(outcome.recommendations).into_response()
        }
        Err(e) => error_response(&request_id, &e),
    }
}

async fn start_chat_handler(State(state): State<AppState>, Json(req): Json<ChatRequest>) -> Response {
    if req.message.trim().is_empty() {
        return bad_request("Message must not be empty");
    }
    let request_id = Uuid::new_v4();
    match state.session.start_message(&req.message, req.thread_id.as_deref()).await {
        Ok(pending) => {
            info!("[{}] Started run {} on thread {}", request_id, pending.run_id, pending.thread_id);
            Json(StartChatResponse {
                thread_id: pending.thread_id,
                run_id: pending.run_id,
            }).into_response()
        }
        Err(e) => error_response(&request_id, &e),
    }
}

async fn chat_status_handler(State(state): State<AppState>, Query(query): Query<StatusQuery>) -> Response {
    let (Some(thread_id), Some(run_id)) = (query.thread_id, query.run_id) else {
        return bad_request("Missing threadId or runId");
    };
    let request_id = Uuid::new_v4();
    match state.session.run_status(&thread_id, &run_id).await {
        Ok(snapshot) =>
            Json(StatusResponse {
                status: snapshot.status,
                messages: snapshot.messages,
            }).into_response(),
        Err(e) => error_response(&request_id, &e),
    }
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}
