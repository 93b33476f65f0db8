use crate::result::QueryResult;
use shardpipe_core::ShardpipeError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::oneshot;

/// Backend-assigned connection identifier from the handshake packet.
pub type ConnectionId = u32;

/// Local identity of one transport channel, assigned before the backend has
/// told us its connection id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(u64);

pub type ResponseSender = oneshot::Sender<Result<QueryResult, ShardpipeError>>;
pub type ResponseReceiver = oneshot::Receiver<Result<QueryResult, ShardpipeError>>;

/// Channel identity to backend connection id, written once per connection at
/// handshake completion.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    map: Mutex<HashMap<ChannelId, ConnectionId>>,
}

impl ChannelRegistry {
    pub fn put(&self, channel_id: ChannelId, connection_id: ConnectionId) {
        self.map.lock().unwrap().insert(channel_id, connection_id);
    }

    pub fn get(&self, channel_id: ChannelId) -> Option<ConnectionId> {
        self.map.lock().unwrap().get(&channel_id).copied()
    }

    pub fn remove(&self, channel_id: ChannelId) -> Option<ConnectionId> {
        self.map.lock().unwrap().remove(&channel_id)
    }
}

/// At most one outstanding response slot per backend connection. A second
/// registration while one is in flight is a caller bug and fails loudly.
#[derive(Debug, Default)]
pub struct FutureRegistry {
    map: Mutex<HashMap<ConnectionId, ResponseSender>>,
}

impl FutureRegistry {
    pub fn register(&self, connection_id: ConnectionId) -> Result<ResponseReceiver, ShardpipeError> {
        let mut map = self.map.lock().unwrap();
        if map.contains_key(&connection_id) {
            return Err(ShardpipeError::Execution(format!(
                "response future already in flight for connection {connection_id}"
            )));
        }
        let (sender, receiver) = oneshot::channel();
        map.insert(connection_id, sender);
        Ok(receiver)
    }

    /// Completes and clears the slot. Returns false when no waiter was
    /// registered (the caller is expected to log and discard).
    pub fn complete(
        &self,
        connection_id: ConnectionId,
        outcome: Result<QueryResult, ShardpipeError>,
    ) -> bool {
        let sender = self.map.lock().unwrap().remove(&connection_id);
        match sender {
            Some(sender) => sender.send(outcome).is_ok(),
            None => false,
        }
    }

    /// Drops a registered slot without completing it, for request paths that
    /// fail before the command reaches the wire.
    pub fn discard(&self, connection_id: ConnectionId) {
        self.map.lock().unwrap().remove(&connection_id);
    }
}

/// Instance-scoped registries shared by the connections of one proxy backend.
#[derive(Debug, Default)]
pub struct BackendRegistries {
    pub channels: ChannelRegistry,
    pub futures: FutureRegistry,
    next_channel: AtomicU64,
}

impl BackendRegistries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate_channel_id(&self) -> ChannelId {
        ChannelId(self.next_channel.fetch_add(1, Ordering::Relaxed))
    }
}
