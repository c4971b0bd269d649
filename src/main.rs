mod config;
mod room;
mod types;

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;

use crate::room::Registry;
use crate::types::*;

#[derive(Clone)]
struct AppState {
    registry: Arc<Registry>,
}

impl IntoResponse for RoomError {
    fn into_response(self) -> Response {
        let status = match self {
            RoomError::RoomNotFound | RoomError::RoomInactive | RoomError::PlayerNotFound => {
                StatusCode::NOT_FOUND
            }
            RoomError::RoomFull | RoomError::InvalidCode | RoomError::InvalidName => {
                StatusCode::BAD_REQUEST
            }
        };
        (
            status,
            Json(serde_json::json!({ "message": self.to_string() })),
        )
            .into_response()
    }
}

// ─── Routes ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateRoomRequest {
    #[serde(default)]
    host_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JoinRoomRequest {
    name: String,
}

#[derive(Debug, Serialize)]
struct Ack {
    success: bool,
}

async fn create_room(
    State(state): State<AppState>,
    Json(body): Json<CreateRoomRequest>,
) -> Json<Room> {
    Json(state.registry.create_room(body.host_id))
}

async fn get_room(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<RoomSnapshot>, RoomError> {
    Ok(Json(state.registry.snapshot(&code).await?))
}

async fn delete_room(State(state): State<AppState>, Path(code): Path<String>) -> Json<Ack> {
    Json(Ack {
        success: state.registry.delete_room(&code),
    })
}

async fn join_room(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(body): Json<JoinRoomRequest>,
) -> Result<Json<Player>, RoomError> {
    Ok(Json(state.registry.join_room(&code, &body.name).await?))
}

async fn enable_buzzers(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<Ack>, RoomError> {
    state.registry.enable_buzzers(&code).await?;
    Ok(Json(Ack { success: true }))
}

async fn disable_buzzers(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<Ack>, RoomError> {
    state.registry.disable_buzzers(&code).await?;
    Ok(Json(Ack { success: true }))
}

async fn reset_buzzers(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<Ack>, RoomError> {
    state.registry.reset_buzzers(&code).await?;
    Ok(Json(Ack { success: true }))
}

async fn remove_player(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Ack>, RoomError> {
    state.registry.remove_player(&id).await?;
    Ok(Json(Ack { success: true }))
}

// ─── WebSocket ────────────────────────────────────────────────────

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (sender, mut receiver) = socket.split();
    let sender = Arc::new(Mutex::new(sender));

    let socket_id = uuid::Uuid::new_v4().to_string();
    tracing::info!("WebSocket connected: {}", socket_id);

    // Room and player this socket joined, set by a join_room message.
    let mut joined_room: Option<String> = None;
    let mut joined_player: Option<String> = None;
    let mut event_task: Option<JoinHandle<()>> = None;

    while let Some(Ok(msg)) = receiver.next().await {
        let Message::Text(text) = msg else { continue };

        let client_msg: ClientMsg = match serde_json::from_str(&text) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("Invalid message: {}", e);
                continue;
            }
        };

        match client_msg {
            ClientMsg::JoinRoom { room_code, player_id } => {
                let rx = match state.registry.subscribe(&room_code) {
                    Ok(rx) => rx,
                    Err(e) => {
                        send_msg(
                            &sender,
                            &ServerMsg::ErrorMessage {
                                message: e.to_string(),
                            },
                        )
                        .await;
                        continue;
                    }
                };

                if let Some(task) = event_task.take() {
                    task.abort();
                }
                event_task = Some(tokio::spawn(forward_events(rx, sender.clone())));

                // A (re)subscriber gets the full current state up front;
                // missed events are not replayed.
                match state.registry.snapshot(&room_code).await {
                    Ok(snapshot) => {
                        send_msg(
                            &sender,
                            &ServerMsg::RoomSnapshot {
                                room_code: snapshot.room.code.clone(),
                                data: snapshot,
                            },
                        )
                        .await;
                    }
                    Err(e) => {
                        send_msg(
                            &sender,
                            &ServerMsg::ErrorMessage {
                                message: e.to_string(),
                            },
                        )
                        .await;
                        continue;
                    }
                }

                if let Some(player_id) = &player_id {
                    if let Err(e) = state.registry.set_connected(player_id, true).await {
                        tracing::warn!("Connect status update failed: {}", e);
                    }
                }

                joined_room = Some(room_code);
                joined_player = player_id;
            }

            ClientMsg::BuzzerPressed => {
                if let (Some(code), Some(player_id)) = (&joined_room, &joined_player) {
                    if let Err(e) = state.registry.press_buzzer(code, player_id).await {
                        tracing::warn!("Buzzer press rejected: {}", e);
                    }
                }
            }
        }
    }

    tracing::info!("WebSocket disconnected: {}", socket_id);
    if let Some(task) = event_task.take() {
        task.abort();
    }

    // A subscriber that goes away counts as its player disconnecting.
    if let Some(player_id) = &joined_player {
        if let Err(e) = state.registry.set_connected(player_id, false).await {
            tracing::warn!("Disconnect status update failed: {}", e);
        }
    }
}

/// Forwards room events to one socket until the socket or the room goes
/// away. A lagging socket skips events rather than stalling the stream.
async fn forward_events(
    mut rx: tokio::sync::broadcast::Receiver<ServerMsg>,
    sender: Arc<Mutex<SplitSink<WebSocket, Message>>>,
) {
    loop {
        match rx.recv().await {
            Ok(msg) => {
                if let Ok(json) = serde_json::to_string(&msg) {
                    let mut s = sender.lock().await;
                    if s.send(Message::Text(json.into())).await.is_err() {
                        return;
                    }
                }
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
        }
    }
}

async fn send_msg(sender: &Arc<Mutex<SplitSink<WebSocket, Message>>>, msg: &ServerMsg) {
    if let Ok(json) = serde_json::to_string(msg) {
        let mut s = sender.lock().await;
        let _ = s.send(Message::Text(json.into())).await;
    }
}

// ─── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let server_config = config::load();
    let registry = Registry::new();
    let state = AppState { registry };

    let app = Router::new()
        .route("/api/rooms", post(create_room))
        .route("/api/rooms/{code}", get(get_room).delete(delete_room))
        .route("/api/rooms/{code}/join", post(join_room))
        .route("/api/rooms/{code}/enable-buzzers", post(enable_buzzers))
        .route("/api/rooms/{code}/disable-buzzers", post(disable_buzzers))
        .route("/api/rooms/{code}/reset-buzzers", post(reset_buzzers))
        .route("/api/players/{id}", delete(remove_player))
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", server_config.port))
        .await
        .expect("Failed to bind");

    tracing::info!("BuzzRush server running on port {}", server_config.port);

    axum::serve(listener, app).await.unwrap();
}
