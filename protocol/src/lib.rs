//! Wire protocol for battle sessions.
//!
//! All frames are newline-free JSON text. Clients announce themselves with
//! `READY`; the server answers with `WAITING_FOR_OPPONENT`, `GAME_STARTED`
//! and periodic `SYNC_STATE` broadcasts.

use serde::{Deserialize, Serialize};

/// Unique identifier for a room. Rooms are addressed by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub String);

impl RoomId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier a participant announces in their `READY` message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Battle lifecycle status. Progression is monotonic:
/// `waiting → playing → ended`, with no skips and no reversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BattleStatus {
    Waiting,
    Playing,
    Ended,
}

/// Messages sent by clients to the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Idempotent join announcement carrying the participant identity.
    #[serde(rename = "READY")]
    Ready {
        #[serde(rename = "userId")]
        user_id: UserId,
    },
}

/// State snapshot broadcast to clients in `SYNC_STATE`.
///
/// `start_time` is present only once the battle has started; `elapsed_time`
/// is milliseconds since start, frozen once the battle ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSync {
    pub status: BattleStatus,
    #[serde(rename = "startTime", skip_serializing_if = "Option::is_none", default)]
    pub start_time: Option<u64>,
    #[serde(rename = "elapsedTime")]
    pub elapsed_time: u64,
}

/// Messages sent by the session to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Reply to a `READY` while the room still has a free slot.
    #[serde(rename = "WAITING_FOR_OPPONENT")]
    WaitingForOpponent,
    /// Broadcast once when the second participant joins.
    #[serde(rename = "GAME_STARTED")]
    GameStarted,
    /// Broadcast of the synchronized timer state.
    #[serde(rename = "SYNC_STATE")]
    SyncState { payload: StateSync },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_message_parses() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"READY","userId":"u1"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Ready {
                user_id: UserId::new("u1")
            }
        );
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"ATTACK"}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>("not json").is_err());
    }

    #[test]
    fn waiting_and_started_serialize_as_bare_tags() {
        assert_eq!(
            serde_json::to_string(&ServerMessage::WaitingForOpponent).unwrap(),
            r#"{"type":"WAITING_FOR_OPPONENT"}"#
        );
        assert_eq!(
            serde_json::to_string(&ServerMessage::GameStarted).unwrap(),
            r#"{"type":"GAME_STARTED"}"#
        );
    }

    #[test]
    fn sync_state_omits_start_time_while_waiting() {
        let msg = ServerMessage::SyncState {
            payload: StateSync {
                status: BattleStatus::Waiting,
                start_time: None,
                elapsed_time: 0,
            },
        };
        assert_eq!(
            serde_json::to_string(&msg).unwrap(),
            r#"{"type":"SYNC_STATE","payload":{"status":"waiting","elapsedTime":0}}"#
        );
    }

    #[test]
    fn sync_state_carries_start_time_once_playing() {
        let msg = ServerMessage::SyncState {
            payload: StateSync {
                status: BattleStatus::Playing,
                start_time: Some(1_700_000_000_000),
                elapsed_time: 2_000,
            },
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(
            json,
            r#"{"type":"SYNC_STATE","payload":{"status":"playing","startTime":1700000000000,"elapsedTime":2000}}"#
        );

        let back: ServerMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }
}
