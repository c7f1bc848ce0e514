//! Room task: one authoritative coordinator driven by a tick interval

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use super::server::{Outbound, ServerCoordinator};
use super::ConnectionId;
use crate::config::EngineConfig;
use crate::util::time::tick_duration;
use crate::ws::protocol::ClientMsg;

/// How long a room waits for its first connection before closing
pub const IDLE_ROOM_TIMEOUT: Duration = Duration::from_secs(30);

/// Something that happened on one of the room's sockets
#[derive(Debug)]
pub enum RoomEvent {
    Connect { conn: ConnectionId },
    Message { conn: ConnectionId, msg: ClientMsg },
    Disconnect { conn: ConnectionId },
}

/// Handle to a running room
#[derive(Clone)]
pub struct RoomHandle {
    pub id: String,
    pub event_tx: mpsc::Sender<RoomEvent>,
    pub outbound_tx: broadcast::Sender<Outbound>,
    pub connection_count: Arc<AtomicUsize>,
}

impl RoomHandle {
    pub fn connection_count(&self) -> usize {
        self.connection_count.load(Ordering::Relaxed)
    }

    /// Receive everything the room sends; each connection filters by recipient
    pub fn subscribe(&self) -> broadcast::Receiver<Outbound> {
        self.outbound_tx.subscribe()
    }
}

/// The room task
pub struct Room {
    id: String,
    coordinator: ServerCoordinator,
    event_rx: mpsc::Receiver<RoomEvent>,
    outbound_tx: broadcast::Sender<Outbound>,
    connection_count: Arc<AtomicUsize>,
    idle_timeout: Duration,
}

impl Room {
    pub fn new(id: String, coordinator: ServerCoordinator) -> (Self, RoomHandle) {
        let (event_tx, event_rx) = mpsc::channel(256);
        let (outbound_tx, _) = broadcast::channel(256);
        let connection_count = Arc::new(AtomicUsize::new(0));

        let handle = RoomHandle {
            id: id.clone(),
            event_tx,
            outbound_tx: outbound_tx.clone(),
            connection_count: connection_count.clone(),
        };
        let room = Self {
            id,
            coordinator,
            event_rx,
            outbound_tx,
            connection_count,
            idle_timeout: IDLE_ROOM_TIMEOUT,
        };
        (room, handle)
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Run until the last connection leaves, or until nobody has connected
    /// within the idle timeout
    pub async fn run(mut self) {
        info!(room_id = %self.id, "Room started");

        let mut ticker = interval(tick_duration());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let idle = tokio::time::sleep(self.idle_timeout);
        tokio::pin!(idle);

        loop {
            tokio::select! {
                event = self.event_rx.recv() => {
                    let Some(event) = event else {
                        break;
                    };
                    let left = matches!(event, RoomEvent::Disconnect { .. });
                    self.handle_event(event);
                    self.flush();
                    if left && self.coordinator.connection_count() == 0 {
                        info!(room_id = %self.id, "All connections left, closing room");
                        break;
                    }
                }
                now = ticker.tick(), if self.coordinator.is_running() => {
                    self.coordinator.timer_step(now.into_std());
                    self.flush();
                }
                _ = &mut idle, if self.coordinator.connection_count() == 0 => {
                    info!(room_id = %self.id, "No connection arrived, closing idle room");
                    break;
                }
            }
        }

        info!(room_id = %self.id, tick = self.coordinator.tick(), "Room closed");
    }

    fn handle_event(&mut self, event: RoomEvent) {
        match event {
            RoomEvent::Connect { conn } => self.coordinator.on_connect(conn),
            RoomEvent::Message { conn, msg } => {
                debug!(room_id = %self.id, connection_id = %conn, kind = msg.kind(), "Message received");
                self.coordinator.handle_message(conn, msg);
            }
            RoomEvent::Disconnect { conn } => self.coordinator.on_disconnect(conn),
        }
        self.connection_count
            .store(self.coordinator.connection_count(), Ordering::Relaxed);
    }

    fn flush(&mut self) {
        for outbound in self.coordinator.take_outgoing() {
            // No subscribers just means nobody is listening yet
            let _ = self.outbound_tx.send(outbound);
        }
    }
}

/// Registry of all active rooms
pub struct RoomRegistry {
    rooms: DashMap<String, RoomHandle>,
    config: EngineConfig,
}

impl RoomRegistry {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            rooms: DashMap::new(),
            config,
        }
    }

    pub fn get(&self, id: &str) -> Option<RoomHandle> {
        self.rooms.get(id).map(|r| r.value().clone())
    }

    /// Handle to the named room, spawning its task if it is not running
    pub fn get_or_create(self: &Arc<Self>, id: &str) -> RoomHandle {
        match self.rooms.entry(id.to_string()) {
            Entry::Occupied(entry) if !entry.get().event_tx.is_closed() => entry.get().clone(),
            Entry::Occupied(mut entry) => {
                let handle = self.spawn_room(id);
                entry.insert(handle.clone());
                handle
            }
            Entry::Vacant(entry) => {
                let handle = self.spawn_room(id);
                entry.insert(handle.clone());
                handle
            }
        }
    }

    fn spawn_room(self: &Arc<Self>, id: &str) -> RoomHandle {
        let coordinator = ServerCoordinator::new(self.config, ChaCha8Rng::from_entropy());
        let (room, handle) = Room::new(id.to_string(), coordinator);

        let registry = Arc::clone(self);
        let room_id = id.to_string();
        let event_tx = handle.event_tx.clone();
        tokio::spawn(async move {
            room.run().await;
            // A replacement room may already hold the slot
            registry
                .rooms
                .remove_if(&room_id, |_, h| h.event_tx.same_channel(&event_tx));
        });
        handle
    }

    pub fn active_rooms(&self) -> usize {
        self.rooms.len()
    }

    pub fn total_connections(&self) -> usize {
        self.rooms.iter().map(|r| r.value().connection_count()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::server::Recipient;
    use crate::ws::protocol::ServerMsg;
    use tokio_test::assert_ok;
    use uuid::Uuid;

    #[tokio::test]
    async fn room_serves_a_connection_and_closes_when_empty() {
        let registry = Arc::new(RoomRegistry::new(EngineConfig::server()));
        let room = registry.get_or_create("moon-base");
        assert_eq!(registry.active_rooms(), 1);

        let mut outbound = room.subscribe();
        let conn = Uuid::new_v4();
        assert_ok!(room.event_tx.send(RoomEvent::Connect { conn }).await);

        let first = tokio::time::timeout(Duration::from_secs(5), outbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.to, Recipient::Only(conn));
        let ServerMsg::Init { epoch, .. } = first.msg.as_ref() else {
            panic!("expected init, got {}", first.msg.kind());
        };

        assert_ok!(
            room.event_tx
                .send(RoomEvent::Message {
                    conn,
                    msg: ClientMsg::Chat {
                        epoch: *epoch,
                        tick: 0,
                        text: "hello".into(),
                    },
                })
                .await
        );
        let chat = loop {
            let out = tokio::time::timeout(Duration::from_secs(5), outbound.recv())
                .await
                .unwrap()
                .unwrap();
            if let ServerMsg::Chat { text, .. } = out.msg.as_ref() {
                break text.clone();
            }
        };
        assert_eq!(chat, "hello");
        assert_eq!(registry.total_connections(), 1);

        assert_ok!(room.event_tx.send(RoomEvent::Disconnect { conn }).await);
        for _ in 0..100 {
            if registry.active_rooms() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(registry.active_rooms(), 0);
        assert!(room.event_tx.is_closed());
    }

    #[tokio::test]
    async fn room_nobody_joins_closes_after_the_idle_timeout() {
        let coordinator = ServerCoordinator::new(EngineConfig::server(), ChaCha8Rng::seed_from_u64(4));
        let (room, handle) = Room::new("ghost-town".into(), coordinator);
        let task = tokio::spawn(room.with_idle_timeout(Duration::from_millis(50)).run());

        assert_ok!(tokio::time::timeout(Duration::from_secs(5), task).await);
        assert!(handle.event_tx.is_closed());
    }

    #[tokio::test]
    async fn same_id_shares_one_room() {
        let registry = Arc::new(RoomRegistry::new(EngineConfig::server()));
        let a = registry.get_or_create("crater");
        let b = registry.get_or_create("crater");
        let c = registry.get_or_create("ridge");
        assert!(a.event_tx.same_channel(&b.event_tx));
        assert!(!a.event_tx.same_channel(&c.event_tx));
        assert_eq!(registry.active_rooms(), 2);
        assert!(registry.get("crater").is_some());
    }
}
