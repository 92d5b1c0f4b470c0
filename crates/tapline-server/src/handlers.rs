//! HTTP and WebSocket handlers for Tapline.
//!
//! This module wires the relay into axum: registration, tap submission,
//! pairing, status, and the realtime connection lifecycle.

use crate::config::{Config, PushConfig};
use crate::error::ApiError;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{
        rejection::JsonRejection,
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tapline_core::{
    ConnectionHandle, EventRelay, PairDirectory, PairId, ParticipantId, PresenceRegistry,
    PushAttempt, Session,
};
use tapline_protocol::{codec, Encoding, MessageCodec, ServerMessage};
use tapline_push::{DisabledGateway, ExpoConfig, ExpoPushGateway, PushGateway};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Pairs and their members.
    pub directory: Arc<PairDirectory>,
    /// How to reach each participant.
    pub presence: Arc<PresenceRegistry>,
    /// The tap relay.
    pub relay: EventRelay,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state, seeding the configured pairs.
    ///
    /// # Errors
    ///
    /// Returns an error if a configured pair is invalid or conflicts with
    /// another one.
    pub fn new(config: Config, gateway: Arc<dyn PushGateway>) -> Result<Self> {
        let directory = Arc::new(PairDirectory::new());
        for pair in &config.pairs {
            let [first, second] = &pair.members;
            directory
                .seed_pair(
                    PairId::new(pair.id.clone()),
                    ParticipantId::parse(first.as_str())?,
                    ParticipantId::parse(second.as_str())?,
                )
                .with_context(|| format!("Invalid pair in configuration: {}", pair.id))?;
        }

        let presence = Arc::new(PresenceRegistry::new());
        let relay = EventRelay::new(
            Arc::clone(&directory),
            Arc::clone(&presence),
            gateway,
            config.relay_config(),
        );

        Ok(Self {
            directory,
            presence,
            relay,
            config,
        })
    }
}

/// Build the push gateway for the configuration.
///
/// # Errors
///
/// Returns an error if the HTTP client cannot be built.
pub fn build_gateway(config: &PushConfig) -> Result<Arc<dyn PushGateway>> {
    if !config.enabled {
        info!("Push delivery disabled");
        return Ok(Arc::new(DisabledGateway));
    }

    let gateway = ExpoPushGateway::new(ExpoConfig {
        endpoint: config.endpoint.clone(),
        timeout: config.timeout(),
    })?;
    info!(endpoint = %gateway.endpoint(), "Push delivery via Expo");
    Ok(Arc::new(gateway))
}

/// Build the HTTP router.
pub fn router(state: Arc<AppState>) -> Router {
    let websocket_path = state.config.transport.websocket_path.clone();

    Router::new()
        .route(&websocket_path, get(ws_handler))
        .route("/register", post(register_handler))
        .route("/tap", post(tap_handler))
        .route("/status", get(status_handler))
        .route("/pairs", post(create_pair_handler))
        .route("/pairs/join", post(join_pair_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    // Describe metrics once the recorder is installed
    metrics::init_metrics();

    let gateway = build_gateway(&config.push)?;
    let state = Arc::new(AppState::new(config.clone(), gateway)?);
    let app = router(state);

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Tapline server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

#[derive(Debug, Default, Deserialize)]
struct WhoQuery {
    who: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FromQuery {
    from: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterBody {
    device_id: Option<String>,
    expo_push_token: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct TapBody {
    x: Option<Value>,
    y: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatePairBody {
    device_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinPairBody {
    code: String,
    device_id: String,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    tokens: BTreeMap<String, bool>,
    ws: BTreeMap<String, bool>,
}

/// Register a push destination.
///
/// The identity comes from `?who=`, or `deviceId` in the body.
async fn register_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WhoQuery>,
    body: Result<Json<RegisterBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let body = body.map(|Json(body)| body).unwrap_or_default();

    let who = query
        .who
        .or(body.device_id)
        .and_then(|raw| state.directory.resolve(&raw).ok())
        .ok_or(ApiError::MissingField(
            "Query who or body deviceId must be a known participant",
        ))?;

    let token = body
        .expo_push_token
        .as_ref()
        .and_then(Value::as_str)
        .filter(|token| !token.is_empty())
        .ok_or(ApiError::MissingField("Body expoPushToken is required"))?;

    state.presence.register_push_destination(&who, token);
    info!(participant = %who, "Push destination registered");

    Ok(Json(json!({ "ok": true, "who": who })))
}

/// Submit a tap to the sender's counterpart.
async fn tap_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FromQuery>,
    body: Result<Json<TapBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let from = query
        .from
        .ok_or(ApiError::MissingField("Query from must be a known participant"))?;

    let body = body.map(|Json(body)| body).unwrap_or_default();
    let (Some(x), Some(y)) = (
        body.x.as_ref().and_then(Value::as_f64),
        body.y.as_ref().and_then(Value::as_f64),
    ) else {
        return Err(ApiError::MissingField("Body must contain numeric x and y"));
    };

    let outcome = state.relay.relay_tap(&from, x, y)?;
    debug!(
        from = %outcome.event.from,
        to = %outcome.event.to,
        path = outcome.path(),
        "Tap relayed"
    );
    metrics::record_tap(outcome.path());

    observe_push(outcome.push);

    Ok(Json(json!({ "ok": true })))
}

/// Count the outcome of a dispatched push once it finishes.
fn observe_push(attempt: PushAttempt) {
    if let PushAttempt::Dispatched(task) = attempt {
        tokio::spawn(async move {
            match task.await {
                Ok(status) => metrics::record_push(status.label()),
                Err(e) => warn!(error = %e, "Push task failed"),
            }
        });
    }
}

/// Hand taps that were queued for a closed connection, but never written,
/// to the push path. Returns how many taps were rerouted.
///
/// Must run after the session is closed so no new taps are queued.
fn push_unsent(
    state: &AppState,
    outbound: &mut mpsc::UnboundedReceiver<ServerMessage>,
    failed: Option<ServerMessage>,
) -> usize {
    outbound.close();

    let mut rerouted = 0;
    let unsent = failed.into_iter().chain(std::iter::from_fn(|| outbound.try_recv().ok()));
    for message in unsent {
        if let ServerMessage::Tap(event) = message {
            let attempt = state.relay.fallback_to_push(&event);
            if matches!(attempt, PushAttempt::Dispatched(_)) {
                rerouted += 1;
                metrics::record_tap("push");
            }
            observe_push(attempt);
        }
    }
    rerouted
}

/// Report reachability per participant, booleans only.
async fn status_handler(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let mut response = StatusResponse {
        tokens: BTreeMap::new(),
        ws: BTreeMap::new(),
    };

    for id in state.directory.participants() {
        let status = state.presence.status(&id);
        response.tokens.insert(id.to_string(), status.push);
        response.ws.insert(id.to_string(), status.live);
    }

    Json(response)
}

/// Open a new pair and return its invite code.
async fn create_pair_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CreatePairBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let founder = ParticipantId::parse(body.device_id)?;

    let (pair, code) = state.directory.create_pair(founder)?;
    info!(pair = %pair.id, founder = %pair.first, "Pair created");

    Ok(Json(json!({ "pairId": pair.id, "code": code })))
}

/// Join a pair with an invite code.
async fn join_pair_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<JoinPairBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let member = ParticipantId::parse(body.device_id)?;

    let pair = state.directory.join_pair(&body.code, member)?;
    info!(pair = %pair.id, "Pair joined");

    Ok(Json(json!({ "pairId": pair.id, "partner": pair.first })))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    let (handle, mut outbound) = ConnectionHandle::channel();
    let mut session = Session::new(
        handle,
        Arc::clone(&state.directory),
        Arc::clone(&state.presence),
    );
    let connection_id = session.id();
    let mut codec = MessageCodec::with_max_message_size(state.config.limits.max_message_size);

    debug!(connection = %connection_id, "WebSocket connected");

    // Split the WebSocket
    let (mut sender, mut receiver) = socket.split();

    // A relayed message the socket failed to take
    let mut failed = None;

    // Message processing loop
    loop {
        tokio::select! {
            biased;

            // Events relayed to this connection
            Some(message) = outbound.recv() => {
                if send_message(&mut sender, &codec, &message).await.is_err() {
                    failed = Some(message);
                    break;
                }
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                let (data, encoding) = match msg {
                    Some(Ok(Message::Text(text))) => (text.into_bytes(), Encoding::Json),
                    Some(Ok(Message::Binary(data))) => (data, Encoding::MessagePack),
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                        continue;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        // Ignore pongs
                        continue;
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                };

                let start = Instant::now();
                metrics::record_message(data.len(), "inbound");

                let reply = session.handle_message(codec.decode(&data, encoding));
                if send_message(&mut sender, &codec, &reply).await.is_err() {
                    break;
                }

                metrics::set_bound_connections(state.presence.stats().bound_connections);
                metrics::record_latency(start.elapsed().as_secs_f64());
            }
        }
    }

    // Cleanup: release the registry binding, then reroute what never went out
    session.close();
    metrics::set_bound_connections(state.presence.stats().bound_connections);

    let rerouted = push_unsent(&state, &mut outbound, failed);
    if rerouted > 0 {
        debug!(connection = %connection_id, rerouted, "Unsent taps rerouted to push");
    }

    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Send a message in the connection's current encoding.
async fn send_message(
    sender: &mut SplitSink<WebSocket, Message>,
    codec: &MessageCodec,
    message: &ServerMessage,
) -> Result<()> {
    let frame = match codec.encoding() {
        Encoding::Json => Message::Text(codec::encode_text(message)?),
        Encoding::MessagePack => Message::Binary(codec::encode_binary(message)?.to_vec()),
    };

    let len = match &frame {
        Message::Text(text) => text.len(),
        Message::Binary(data) => data.len(),
        _ => 0,
    };
    metrics::record_message(len, "outbound");

    sender.send(frame).await?;
    Ok(())
}
