use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A game session room, identified by its short invite code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub code: String,
    pub host_id: String,
    pub is_active: bool,
    pub buzzer_enabled: bool,
    pub current_round: u32,
    pub first_to_buzz_player_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A player in a room.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: String,
    pub name: String,
    pub room_code: String,
    pub color: String,
    pub is_connected: bool,
    pub has_buzzed: bool,
    pub buzz_time: Option<DateTime<Utc>>,
    pub joined_at: DateTime<Utc>,
}

/// Partial update over a room's mutable fields.
#[derive(Debug, Clone, Default)]
pub struct RoomPatch {
    pub is_active: Option<bool>,
    pub buzzer_enabled: Option<bool>,
    pub current_round: Option<u32>,
    /// `Some(None)` clears the latched winner.
    pub first_to_buzz_player_id: Option<Option<String>>,
}

/// Partial update over a player's mutable fields.
#[derive(Debug, Clone, Default)]
pub struct PlayerPatch {
    pub is_connected: Option<bool>,
    pub has_buzzed: Option<bool>,
    pub buzz_time: Option<Option<DateTime<Utc>>>,
}

/// Full current state of a room, used to (re)synchronize a subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub room: Room,
    pub players: Vec<Player>,
}

/// Payload of a winning buzzer press.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuzzerPressData {
    pub player_id: String,
    pub player_name: String,
    /// Press time as epoch milliseconds.
    pub timestamp: i64,
    /// Press time as an ISO-8601 string.
    pub buzz_time: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerLeftData {
    pub player_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuzzerGateData {
    pub buzzer_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetData {
    pub reset: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomUpdatedData {
    pub players: Vec<Player>,
}

/// Messages sent from server to clients, as `{type, roomCode, data}`.
///
/// The first seven variants are the room events fanned out to every
/// subscriber; `room_snapshot` and `error_message` are only ever sent to a
/// single socket by the transport layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    PlayerJoined {
        #[serde(rename = "roomCode")]
        room_code: String,
        data: Player,
    },
    PlayerLeft {
        #[serde(rename = "roomCode")]
        room_code: String,
        data: PlayerLeftData,
    },
    BuzzerPressed {
        #[serde(rename = "roomCode")]
        room_code: String,
        data: BuzzerPressData,
    },
    BuzzerEnabled {
        #[serde(rename = "roomCode")]
        room_code: String,
        data: BuzzerGateData,
    },
    BuzzerDisabled {
        #[serde(rename = "roomCode")]
        room_code: String,
        data: BuzzerGateData,
    },
    BuzzerReset {
        #[serde(rename = "roomCode")]
        room_code: String,
        data: ResetData,
    },
    RoomUpdated {
        #[serde(rename = "roomCode")]
        room_code: String,
        data: RoomUpdatedData,
    },
    RoomSnapshot {
        #[serde(rename = "roomCode")]
        room_code: String,
        data: RoomSnapshot,
    },
    ErrorMessage {
        message: String,
    },
}

/// Messages sent from clients to the server via WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Subscribe this socket to a room's events. A player id makes the
    /// subscription count as that player (re)connecting.
    JoinRoom {
        #[serde(rename = "roomCode")]
        room_code: String,
        #[serde(rename = "playerId", default)]
        player_id: Option<String>,
    },
    /// Press the buzzer as the player this socket joined with.
    BuzzerPressed,
}

/// Failures reported to the command caller. Race-losing buzzer presses are
/// not errors and never appear here.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    #[error("room not found")]
    RoomNotFound,
    #[error("room is not active")]
    RoomInactive,
    #[error("room is full")]
    RoomFull,
    #[error("player not found")]
    PlayerNotFound,
    #[error("invalid room code")]
    InvalidCode,
    #[error("invalid player name")]
    InvalidName,
}
