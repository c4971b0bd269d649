use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rand::Rng;
use tokio::sync::{Mutex, broadcast};
use uuid::Uuid;

use crate::types::*;

/// Colors handed out in join order. The palette length doubles as the room
/// capacity, so two players in the same room never share a color.
pub const PLAYER_COLORS: [&str; 6] = ["blue", "green", "amber", "purple", "cyan", "red"];

/// Maximum players per room, enforced server-side.
pub const ROOM_CAPACITY: usize = PLAYER_COLORS.len();

const EVENT_CHANNEL_CAPACITY: usize = 256;
const CODE_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const CODE_LEN: usize = 6;

fn generate_room_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LEN)
        .map(|_| char::from(CODE_CHARS[rng.random_range(0..CODE_CHARS.len())]))
        .collect()
}

/// Codes are case-insensitive on input.
fn normalize_code(code: &str) -> Result<String, RoomError> {
    let code = code.trim().to_ascii_uppercase();
    if code.len() != CODE_LEN || !code.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(RoomError::InvalidCode);
    }
    Ok(code)
}

/// Everything a room owns. One lock guards the room fields and its players
/// together, so arbitration and reset are observable only as a whole.
struct RoomState {
    room: Room,
    players: Vec<Player>,
}

/// Shared handle to one room: its state plus the event fan-out channel.
#[derive(Clone)]
struct RoomHandle {
    state: Arc<Mutex<RoomState>>,
    event_tx: broadcast::Sender<ServerMsg>,
}

impl RoomHandle {
    /// Fire-and-forget. Nobody listening is fine, and a lagging receiver
    /// skips messages instead of slowing the engine down.
    fn send(&self, msg: ServerMsg) {
        let _ = self.event_tx.send(msg);
    }
}

/// Registry holds all active rooms and the player index.
pub struct Registry {
    /// room code -> handle
    rooms: DashMap<String, RoomHandle>,
    /// player id -> room code
    players: DashMap<String, String>,
}

impl Registry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            rooms: DashMap::new(),
            players: DashMap::new(),
        })
    }

    fn handle(&self, code: &str) -> Result<(String, RoomHandle), RoomError> {
        let code = normalize_code(code)?;
        let handle = self
            .rooms
            .get(&code)
            .map(|h| h.value().clone())
            .ok_or(RoomError::RoomNotFound)?;
        Ok((code, handle))
    }

    fn room_of(&self, player_id: &str) -> Result<String, RoomError> {
        self.players
            .get(player_id)
            .map(|c| c.value().clone())
            .ok_or(RoomError::PlayerNotFound)
    }

    // ─── Room registry ────────────────────────────────────────────────

    pub fn create_room(&self, host_id: Option<String>) -> Room {
        let host_id = host_id.unwrap_or_else(|| format!("host_{}", Uuid::new_v4()));

        // Codes are random; on the rare collision with a live room, roll
        // again rather than hand two hosts the same code.
        loop {
            let code = generate_room_code();
            match self.rooms.entry(code.clone()) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(slot) => {
                    let room = Room {
                        code,
                        host_id,
                        is_active: true,
                        buzzer_enabled: false,
                        current_round: 1,
                        first_to_buzz_player_id: None,
                        created_at: Utc::now(),
                    };
                    let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
                    slot.insert(RoomHandle {
                        state: Arc::new(Mutex::new(RoomState {
                            room: room.clone(),
                            players: Vec::new(),
                        })),
                        event_tx,
                    });
                    tracing::info!("Room created: {} host: {}", room.code, room.host_id);
                    return room;
                }
            }
        }
    }

    pub async fn get_room(&self, code: &str) -> Result<Room, RoomError> {
        let (_, handle) = self.handle(code)?;
        let state = handle.state.lock().await;
        Ok(state.room.clone())
    }

    /// Room fields plus the player list in join order.
    pub async fn snapshot(&self, code: &str) -> Result<RoomSnapshot, RoomError> {
        let (_, handle) = self.handle(code)?;
        let state = handle.state.lock().await;
        Ok(RoomSnapshot {
            room: state.room.clone(),
            players: state.players.clone(),
        })
    }

    pub async fn update_room(&self, code: &str, patch: RoomPatch) -> Result<Room, RoomError> {
        let (_, handle) = self.handle(code)?;
        let mut state = handle.state.lock().await;
        if let Some(active) = patch.is_active {
            state.room.is_active = active;
        }
        if let Some(enabled) = patch.buzzer_enabled {
            state.room.buzzer_enabled = enabled;
        }
        if let Some(round) = patch.current_round {
            state.room.current_round = round;
        }
        if let Some(winner) = patch.first_to_buzz_player_id {
            state.room.first_to_buzz_player_id = winner;
        }
        Ok(state.room.clone())
    }

    pub fn delete_room(&self, code: &str) -> bool {
        let Ok(code) = normalize_code(code) else {
            return false;
        };
        if self.rooms.remove(&code).is_some() {
            self.players.retain(|_, room_code| *room_code != code);
            true
        } else {
            false
        }
    }

    // ─── Player registry ──────────────────────────────────────────────

    pub async fn join_room(&self, code: &str, name: &str) -> Result<Player, RoomError> {
        let name = name.trim();
        if name.is_empty() || name.chars().count() > 30 {
            return Err(RoomError::InvalidName);
        }

        let (code, handle) = self.handle(code)?;
        let mut state = handle.state.lock().await;
        if !state.room.is_active {
            return Err(RoomError::RoomInactive);
        }
        if state.players.len() >= ROOM_CAPACITY {
            return Err(RoomError::RoomFull);
        }

        let player = Player {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            room_code: code.clone(),
            color: PLAYER_COLORS[state.players.len() % PLAYER_COLORS.len()].to_string(),
            is_connected: true,
            has_buzzed: false,
            buzz_time: None,
            joined_at: Utc::now(),
        };
        state.players.push(player.clone());
        self.players.insert(player.id.clone(), code.clone());

        tracing::info!("Player {} joined room {}", player.name, code);
        handle.send(ServerMsg::PlayerJoined {
            room_code: code,
            data: player.clone(),
        });
        Ok(player)
    }

    /// Players of a room in join order.
    pub async fn list_players(&self, code: &str) -> Result<Vec<Player>, RoomError> {
        let (_, handle) = self.handle(code)?;
        let state = handle.state.lock().await;
        Ok(state.players.clone())
    }

    pub async fn get_player(&self, id: &str) -> Result<Player, RoomError> {
        let code = self.room_of(id)?;
        let (_, handle) = self.handle(&code)?;
        let state = handle.state.lock().await;
        state
            .players
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or(RoomError::PlayerNotFound)
    }

    pub async fn update_player(&self, id: &str, patch: PlayerPatch) -> Result<Player, RoomError> {
        let code = self.room_of(id)?;
        let (_, handle) = self.handle(&code)?;
        let mut state = handle.state.lock().await;
        let player = state
            .players
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or(RoomError::PlayerNotFound)?;
        if let Some(connected) = patch.is_connected {
            player.is_connected = connected;
        }
        if let Some(buzzed) = patch.has_buzzed {
            player.has_buzzed = buzzed;
        }
        if let Some(time) = patch.buzz_time {
            player.buzz_time = time;
        }
        Ok(player.clone())
    }

    pub async fn remove_player(&self, id: &str) -> Result<Player, RoomError> {
        let code = self.room_of(id)?;
        let (code, handle) = self.handle(&code)?;
        let mut state = handle.state.lock().await;
        let idx = state
            .players
            .iter()
            .position(|p| p.id == id)
            .ok_or(RoomError::PlayerNotFound)?;
        let player = state.players.remove(idx);
        self.players.remove(id);

        handle.send(ServerMsg::PlayerLeft {
            room_code: code,
            data: PlayerLeftData {
                player_id: player.id.clone(),
            },
        });
        Ok(player)
    }

    /// Flip a player's liveness flag and push the refreshed player list to
    /// the room. Used when a subscriber appears or goes away.
    pub async fn set_connected(&self, id: &str, connected: bool) -> Result<(), RoomError> {
        let code = self.room_of(id)?;
        let (code, handle) = self.handle(&code)?;
        let mut state = handle.state.lock().await;
        let player = state
            .players
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or(RoomError::PlayerNotFound)?;
        player.is_connected = connected;

        let players = state.players.clone();
        handle.send(ServerMsg::RoomUpdated {
            room_code: code,
            data: RoomUpdatedData { players },
        });
        Ok(())
    }

    // ─── Arbitration engine ───────────────────────────────────────────

    pub async fn enable_buzzers(&self, code: &str) -> Result<(), RoomError> {
        self.set_buzzer_gate(code, true).await
    }

    pub async fn disable_buzzers(&self, code: &str) -> Result<(), RoomError> {
        self.set_buzzer_gate(code, false).await
    }

    /// Arming or disarming never touches a latched winner; only
    /// `reset_buzzers` clears it.
    async fn set_buzzer_gate(&self, code: &str, enabled: bool) -> Result<(), RoomError> {
        let (code, handle) = self.handle(code)?;
        let mut state = handle.state.lock().await;
        state.room.buzzer_enabled = enabled;

        let data = BuzzerGateData {
            buzzer_enabled: enabled,
        };
        let msg = if enabled {
            ServerMsg::BuzzerEnabled {
                room_code: code,
                data,
            }
        } else {
            ServerMsg::BuzzerDisabled {
                room_code: code,
                data,
            }
        };
        handle.send(msg);
        Ok(())
    }

    /// Clears the winner and every player's buzz state in one critical
    /// section; no subscriber can observe a partially reset room.
    pub async fn reset_buzzers(&self, code: &str) -> Result<(), RoomError> {
        let (code, handle) = self.handle(code)?;
        let mut state = handle.state.lock().await;
        state.room.first_to_buzz_player_id = None;
        for player in &mut state.players {
            player.has_buzzed = false;
            player.buzz_time = None;
        }

        handle.send(ServerMsg::BuzzerReset {
            room_code: code,
            data: ResetData { reset: true },
        });
        Ok(())
    }

    pub async fn press_buzzer(&self, code: &str, player_id: &str) -> Result<(), RoomError> {
        self.press_buzzer_at(code, player_id, Utc::now()).await
    }

    /// The check-and-set runs under the room lock, so concurrent presses
    /// serialize and exactly one latches the winner per armed window. Late
    /// and duplicate presses are absorbed without an event or an error;
    /// only a missing room or player is reported.
    pub async fn press_buzzer_at(
        &self,
        code: &str,
        player_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RoomError> {
        let (code, handle) = self.handle(code)?;
        let mut state = handle.state.lock().await;

        if !state.room.buzzer_enabled || state.room.first_to_buzz_player_id.is_some() {
            return Ok(());
        }

        let player = state
            .players
            .iter_mut()
            .find(|p| p.id == player_id)
            .ok_or(RoomError::PlayerNotFound)?;
        if player.has_buzzed {
            return Ok(());
        }

        player.has_buzzed = true;
        player.buzz_time = Some(now);
        let data = BuzzerPressData {
            player_id: player.id.clone(),
            player_name: player.name.clone(),
            timestamp: now.timestamp_millis(),
            buzz_time: now.to_rfc3339(),
        };
        state.room.first_to_buzz_player_id = Some(player_id.to_string());

        tracing::info!("Buzzer: {} wins room {}", data.player_name, code);
        handle.send(ServerMsg::BuzzerPressed {
            room_code: code,
            data,
        });
        Ok(())
    }

    // ─── Broadcaster ──────────────────────────────────────────────────

    /// Subscribe to a room's event stream. Dropping the receiver
    /// unsubscribes; the channel reclaims the slot on its own.
    pub fn subscribe(&self, code: &str) -> Result<broadcast::Receiver<ServerMsg>, RoomError> {
        let (_, handle) = self.handle(code)?;
        Ok(handle.event_tx.subscribe())
    }
}
