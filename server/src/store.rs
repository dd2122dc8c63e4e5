//! Durable per-room key-value storage.
//!
//! Rooms persist an opaque record (the battle snapshot plus the next tick
//! deadline) under disjoint per-room keys. The contract is deliberately
//! minimal: `get` and `put`. Storage failures are recoverable by design —
//! the session actor logs them and keeps its in-memory state authoritative.

use battleroom_protocol::RoomId;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Storage key for the serialized battle snapshot.
pub const STATE_KEY: &str = "battle_state";
/// Storage key for the next scheduled tick deadline (epoch ms).
pub const NEXT_TICK_KEY: &str = "next_tick_at";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("stored value is not valid JSON: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Type alias for boxed storage futures.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Durable key-value store shared by all rooms, keyed disjointly per room.
pub trait RoomStore: Send + Sync + 'static {
    fn get(&self, room: &RoomId, key: &str) -> StoreFuture<'_, Option<Vec<u8>>>;
    fn put(&self, room: &RoomId, key: &str, value: Vec<u8>) -> StoreFuture<'_, ()>;
}

/// Handle scoping a shared store to a single room, with JSON codec helpers.
/// This is what the session actor is constructed with.
#[derive(Clone)]
pub struct RoomStorage {
    store: Arc<dyn RoomStore>,
    room: RoomId,
}

impl RoomStorage {
    pub fn new(store: Arc<dyn RoomStore>, room: RoomId) -> Self {
        Self { store, room }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.store.get(&self.room, key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn put_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(value)?;
        self.store.put(&self.room, key, bytes).await
    }
}

/// In-memory store backing the default server wiring. Survives room actor
/// eviction (the map outlives individual room tasks) but not process death.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<(RoomId, String), Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RoomStore for MemoryStore {
    fn get(&self, room: &RoomId, key: &str) -> StoreFuture<'_, Option<Vec<u8>>> {
        let entry = self
            .entries
            .get(&(room.clone(), key.to_string()))
            .map(|v| v.clone());
        Box::pin(async move { Ok(entry) })
    }

    fn put(&self, room: &RoomId, key: &str, value: Vec<u8>) -> StoreFuture<'_, ()> {
        self.entries.insert((room.clone(), key.to_string()), value);
        Box::pin(async move { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rooms_are_keyed_disjointly() {
        let store: Arc<dyn RoomStore> = Arc::new(MemoryStore::new());
        let a = RoomStorage::new(Arc::clone(&store), RoomId::new("a"));
        let b = RoomStorage::new(Arc::clone(&store), RoomId::new("b"));

        a.put_json(STATE_KEY, &1u64).await.unwrap();
        b.put_json(STATE_KEY, &2u64).await.unwrap();

        assert_eq!(a.get_json::<u64>(STATE_KEY).await.unwrap(), Some(1));
        assert_eq!(b.get_json::<u64>(STATE_KEY).await.unwrap(), Some(2));
        assert_eq!(a.get_json::<u64>(NEXT_TICK_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn corrupt_record_is_a_codec_error() {
        let store = Arc::new(MemoryStore::new());
        let room = RoomId::new("r");
        store
            .put(&room, STATE_KEY, b"not json".to_vec())
            .await
            .unwrap();

        let storage = RoomStorage::new(store, room);
        assert!(matches!(
            storage.get_json::<u64>(STATE_KEY).await,
            Err(StoreError::Codec(_))
        ));
    }
}
