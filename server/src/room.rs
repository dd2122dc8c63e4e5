//! Per-room session actor and the room registry.
//!
//! Each room is one tokio task owning the battle state machine, the set of
//! attached connections and the room's durable storage. Every event for a
//! room — connection attach, inbound frame, disconnect, the tick wake-up —
//! flows through a single mpsc receiver and is handled one at a time, so
//! the state machine and the session registry need no locks. Rooms are
//! fully independent; the only cross-room sharing is the storage backend,
//! keyed disjointly per room.

use crate::engine::{BattleEngine, BattleSnapshot, REQUIRED_PARTICIPANTS};
use crate::store::{RoomStorage, RoomStore, NEXT_TICK_KEY, STATE_KEY};
use battleroom_protocol::{BattleStatus, ClientMessage, RoomId, ServerMessage, UserId};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Unique id for a live connection within a room.
pub type ConnId = u64;

/// Commands from the session actor to one connection's transport.
#[derive(Debug)]
pub enum Outbound {
    /// A JSON text frame to deliver.
    Frame(String),
    /// Close the connection with the protocol-error close code.
    Reject,
}

/// Events delivered to a room's session actor.
#[derive(Debug)]
pub enum RoomEvent {
    /// A new connection attached. No identity yet; that arrives with READY.
    Connected {
        conn: ConnId,
        tx: mpsc::Sender<Outbound>,
    },
    /// A text frame arrived from a connection.
    Frame { conn: ConnId, text: String },
    /// A connection closed (either side).
    Disconnected { conn: ConnId },
}

/// Server-side room settings.
#[derive(Debug, Clone)]
pub struct RoomSettings {
    /// Cadence of the synchronized timer broadcast.
    pub tick_interval: Duration,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Drift-corrected tick schedule: advance one interval from the last
/// planned deadline, but if that moment has already passed (the actor was
/// delayed or suspended), re-baseline to `now + interval` so the backlog
/// collapses into at most one catch-up tick instead of a rapid-fire burst.
fn next_deadline_ms(last_deadline: u64, now: u64, interval: u64) -> u64 {
    let next = last_deadline + interval;
    if next < now {
        now + interval
    } else {
        next
    }
}

struct Session {
    tx: mpsc::Sender<Outbound>,
    user: Option<UserId>,
}

/// The session actor for one room. Constructed from a room id and a
/// storage handle only; lookup lives in [`RoomManager`].
pub struct SessionActor {
    room: RoomId,
    engine: BattleEngine,
    sessions: HashMap<ConnId, Session>,
    storage: RoomStorage,
    events: mpsc::Receiver<RoomEvent>,
    /// Epoch-ms deadline of the armed tick wake-up, if any.
    next_wake: Option<u64>,
    tick_interval_ms: u64,
}

impl SessionActor {
    pub fn new(
        room: RoomId,
        storage: RoomStorage,
        events: mpsc::Receiver<RoomEvent>,
        settings: &RoomSettings,
    ) -> Self {
        Self {
            room,
            engine: BattleEngine::new(),
            sessions: HashMap::new(),
            storage,
            events,
            next_wake: None,
            tick_interval_ms: settings.tick_interval.as_millis() as u64,
        }
    }

    /// Run the actor until its event channel closes. Recovery completes
    /// before the first event is processed.
    pub async fn run(mut self) {
        self.recover().await;

        loop {
            let wake = self.next_wake.map(wake_instant);
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },
                _ = async { tokio::time::sleep_until(wake.unwrap()).await }, if wake.is_some() => {
                    self.handle_tick().await;
                }
            }
        }

        tracing::debug!(room = %self.room, "session actor stopped");
    }

    /// Load the persisted room record, if any, and resume the timer from
    /// the persisted deadline when the battle was mid-game.
    async fn recover(&mut self) {
        match self.storage.get_json::<BattleSnapshot>(STATE_KEY).await {
            Ok(Some(snapshot)) => {
                self.engine.restore(snapshot);
                tracing::info!(
                    room = %self.room,
                    status = ?self.engine.status(),
                    "restored persisted session"
                );
            }
            Ok(None) => {}
            Err(error) => {
                tracing::warn!(room = %self.room, %error, "failed to load persisted session");
            }
        }

        if self.engine.is_playing() {
            // A deadline already in the past fires immediately; the tick
            // handler re-baselines, so a long gap yields a single
            // catch-up tick rather than one per missed interval.
            let deadline = match self.storage.get_json::<u64>(NEXT_TICK_KEY).await {
                Ok(Some(deadline)) => deadline,
                Ok(None) => now_ms(),
                Err(error) => {
                    tracing::warn!(room = %self.room, %error, "failed to load tick deadline");
                    now_ms()
                }
            };
            self.next_wake = Some(deadline);
        }
    }

    async fn handle_event(&mut self, event: RoomEvent) {
        match event {
            RoomEvent::Connected { conn, tx } => {
                tracing::debug!(room = %self.room, conn, "connection attached");
                self.sessions.insert(conn, Session { tx, user: None });
            }
            RoomEvent::Frame { conn, text } => self.handle_frame(conn, text).await,
            RoomEvent::Disconnected { conn } => self.handle_disconnect(conn).await,
        }
    }

    async fn handle_frame(&mut self, conn: ConnId, text: String) {
        match serde_json::from_str::<ClientMessage>(&text) {
            Ok(ClientMessage::Ready { user_id }) => self.handle_ready(conn, user_id).await,
            Err(error) => {
                tracing::debug!(
                    room = %self.room,
                    conn,
                    %error,
                    "malformed frame, rejecting connection"
                );
                if let Some(session) = self.sessions.get(&conn) {
                    let _ = session.tx.send(Outbound::Reject).await;
                }
            }
        }
    }

    async fn handle_ready(&mut self, conn: ConnId, user_id: UserId) {
        if let Some(session) = self.sessions.get_mut(&conn) {
            session.user = Some(user_id.clone());
        }
        let count = self.engine.add_participant(user_id);

        // Persist unconditionally so a crash mid-join cannot lose the join.
        self.persist_state().await;

        if count < REQUIRED_PARTICIPANTS {
            self.send_to(conn, &ServerMessage::WaitingForOpponent).await;
        } else if self.engine.status() == BattleStatus::Waiting {
            // The room just became full: start exactly once.
            let now = now_ms();
            self.engine.start(now);
            self.next_wake = Some(now + self.tick_interval_ms);
            self.broadcast(&ServerMessage::GameStarted).await;
            self.broadcast_sync().await;
            self.persist_state().await;
            tracing::info!(room = %self.room, "battle started");
        }
    }

    async fn handle_disconnect(&mut self, conn: ConnId) {
        let Some(session) = self.sessions.remove(&conn) else {
            return;
        };
        tracing::debug!(room = %self.room, conn, "connection detached");

        if let Some(user) = session.user {
            self.engine.remove_participant(&user);
        }

        // A participant dropping mid-game ends the battle; elapsed time
        // stays frozen at its last ticked value.
        if self.engine.is_playing() {
            self.engine.end();
            self.persist_state().await;
            self.broadcast_sync().await;
            tracing::info!(room = %self.room, "participant disconnected mid-battle, session ended");
        }
    }

    /// One timer wake-up. The baseline deadline comes from storage; absent
    /// or unreadable falls back to "now".
    async fn handle_tick(&mut self) {
        self.next_wake = None;

        let now = now_ms();
        let last_deadline = match self.storage.get_json::<u64>(NEXT_TICK_KEY).await {
            Ok(Some(deadline)) => deadline,
            Ok(None) => now,
            Err(error) => {
                tracing::warn!(room = %self.room, %error, "failed to read tick deadline");
                now
            }
        };

        let sync = self.engine.tick(now);
        self.broadcast(&ServerMessage::SyncState { payload: sync }).await;

        if self.engine.is_playing() {
            let next = next_deadline_ms(last_deadline, now, self.tick_interval_ms);
            self.persist_state().await;
            if let Err(error) = self.storage.put_json(NEXT_TICK_KEY, &next).await {
                tracing::warn!(room = %self.room, %error, "failed to persist tick deadline");
            }
            // Re-arm even when persistence failed: durability is
            // best-effort, liveness is not.
            self.next_wake = Some(next);
        }
    }

    async fn persist_state(&self) {
        if let Err(error) = self.storage.put_json(STATE_KEY, &self.engine.snapshot()).await {
            tracing::warn!(room = %self.room, %error, "failed to persist battle state");
        }
    }

    async fn broadcast_sync(&self) {
        let payload = self.engine.sync_state();
        self.broadcast(&ServerMessage::SyncState { payload }).await;
    }

    /// Best-effort fan-out: a failed send to one connection must not block
    /// or fail sends to the others.
    async fn broadcast(&self, message: &ServerMessage) {
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(error) => {
                tracing::warn!(room = %self.room, %error, "failed to encode broadcast");
                return;
            }
        };
        for session in self.sessions.values() {
            let _ = session.tx.send(Outbound::Frame(text.clone())).await;
        }
    }

    async fn send_to(&self, conn: ConnId, message: &ServerMessage) {
        let Some(session) = self.sessions.get(&conn) else {
            return;
        };
        match serde_json::to_string(message) {
            Ok(text) => {
                let _ = session.tx.send(Outbound::Frame(text)).await;
            }
            Err(error) => {
                tracing::warn!(room = %self.room, %error, "failed to encode message");
            }
        }
    }
}

fn wake_instant(deadline_ms: u64) -> Instant {
    Instant::now() + Duration::from_millis(deadline_ms.saturating_sub(now_ms()))
}

// ============================================================================
// RoomConnection - one connection's handle to its room actor
// ============================================================================

/// What [`RoomManager::connect`] returns: send inbound events, receive
/// outbound commands. The WebSocket bridge owns one of these per socket.
pub struct RoomConnection {
    conn: ConnId,
    events: mpsc::Sender<RoomEvent>,
    outbound: mpsc::Receiver<Outbound>,
}

impl RoomConnection {
    /// Forward a text frame from the client to the room actor.
    pub async fn send_text(&self, text: impl Into<String>) {
        let _ = self
            .events
            .send(RoomEvent::Frame {
                conn: self.conn,
                text: text.into(),
            })
            .await;
    }

    /// Notify the room actor that this connection closed.
    pub async fn disconnect(self) {
        let _ = self
            .events
            .send(RoomEvent::Disconnected { conn: self.conn })
            .await;
    }

    /// Receive the next outbound command for this connection.
    pub async fn recv(&mut self) -> Option<Outbound> {
        self.outbound.recv().await
    }

    /// Split into raw parts for the transport bridge.
    pub fn into_parts(self) -> (ConnId, mpsc::Sender<RoomEvent>, mpsc::Receiver<Outbound>) {
        (self.conn, self.events, self.outbound)
    }
}

// ============================================================================
// RoomManager - maps room ids to live session actors
// ============================================================================

/// Registry mapping room ids to live session actors: get-or-create the
/// actor for a room and attach connections to it.
pub struct RoomManager {
    rooms: DashMap<RoomId, RoomEntry>,
    store: Arc<dyn RoomStore>,
    settings: RoomSettings,
}

struct RoomEntry {
    event_tx: mpsc::Sender<RoomEvent>,
    next_conn_id: AtomicU64,
}

impl RoomManager {
    pub fn new(store: Arc<dyn RoomStore>, settings: RoomSettings) -> Self {
        Self {
            rooms: DashMap::new(),
            store,
            settings,
        }
    }

    /// Get or create the room's session actor and attach a new connection.
    /// Admission is unconditional; identity arrives later with READY.
    pub async fn connect(&self, room_id: RoomId) -> RoomConnection {
        let (event_tx, conn) = {
            let entry = self
                .rooms
                .entry(room_id.clone())
                .or_insert_with(|| self.spawn_room(room_id.clone()));
            (
                entry.event_tx.clone(),
                entry.next_conn_id.fetch_add(1, Ordering::SeqCst),
            )
        };

        let (out_tx, out_rx) = mpsc::channel(256);
        let _ = event_tx
            .send(RoomEvent::Connected { conn, tx: out_tx })
            .await;

        RoomConnection {
            conn,
            events: event_tx,
            outbound: out_rx,
        }
    }

    fn spawn_room(&self, room_id: RoomId) -> RoomEntry {
        let (event_tx, event_rx) = mpsc::channel(256);
        let storage = RoomStorage::new(Arc::clone(&self.store), room_id.clone());
        let actor = SessionActor::new(room_id.clone(), storage, event_rx, &self.settings);
        tokio::spawn(actor.run());
        tracing::info!(room = %room_id, "room actor spawned");

        RoomEntry {
            event_tx,
            next_conn_id: AtomicU64::new(1),
        }
    }

    /// Drop a room's live actor without touching its durable record. The
    /// actor task exits once its remaining connections are gone; the next
    /// `connect` recreates it and recovery reloads the record.
    pub fn evict(&self, room_id: &RoomId) -> bool {
        let removed = self.rooms.remove(room_id).is_some();
        if removed {
            tracing::info!(room = %room_id, "room actor evicted");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: u64 = 1_000;

    #[test]
    fn on_time_tick_advances_one_interval() {
        assert_eq!(next_deadline_ms(10_000, 10_000, INTERVAL), 11_000);
        // Slightly late but before the next slot: keep the planned cadence.
        assert_eq!(next_deadline_ms(10_000, 10_400, INTERVAL), 11_000);
    }

    #[test]
    fn late_tick_rebaselines_instead_of_compounding() {
        // Delivered five intervals late: the next deadline is now + one
        // interval, not last + two, so there is no catch-up burst.
        let now = 15_000;
        assert_eq!(next_deadline_ms(10_000, now, INTERVAL), now + INTERVAL);
    }

    #[test]
    fn boundary_deadline_is_not_rebaselined() {
        // next == now means the slot has not passed yet.
        assert_eq!(next_deadline_ms(10_000, 11_000, INTERVAL), 11_000);
    }
}
