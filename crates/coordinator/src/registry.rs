//! Connection registry: live sockets and durable device identities.
//!
//! Two maps with different lifetimes:
//!
//! - `connections` — one entry per live websocket, keyed by a volatile
//!   connection id. Every live connection is a broadcast subscriber, whether
//!   or not it has identified itself yet.
//! - `devices` — one entry per durable device UUID, created on the first
//!   `device_info` and never hard-deleted; departed devices are retained as
//!   `disconnected` for history.
//!
//! Not internally synchronized — the [`Coordinator`](crate::Coordinator)
//! serializes all access behind its single lock.

use std::collections::HashMap;

use chrono::Utc;
use fedgrid_core::capability::DeviceCapabilities;
use fedgrid_core::status::DeviceState;
use fedgrid_core::types::Timestamp;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::{DeviceSnapshot, Outbound};

/// Volatile transport-level identity for one live channel.
pub type ConnId = Uuid;

/// Channel sender half for pushing messages to one connection.
pub type OutboundSender = mpsc::UnboundedSender<Outbound>;

/// Registry entry for one durable device identity.
#[derive(Debug, Clone)]
pub struct DeviceRecord {
    pub uuid: Uuid,
    /// The connection currently speaking for this device. Stale after
    /// disconnect (the record then carries `state: Disconnected`).
    pub conn_id: ConnId,
    pub capabilities: DeviceCapabilities,
    pub state: DeviceState,
    pub last_seen: Timestamp,
}

impl DeviceRecord {
    /// Wire-shaped view for `all_devices` and persistence.
    pub fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            uuid: self.uuid,
            sid: self.conn_id,
            client: self.capabilities.client,
            user_agent: self.capabilities.user_agent.clone(),
            cpu_cores: self.capabilities.effective_cores(),
            gpu: self.capabilities.gpu.clone(),
            status: self.state,
            last_seen: self.last_seen,
        }
    }
}

/// One live websocket connection.
struct ConnectionEntry {
    /// Durable identity this connection speaks for, once registered.
    /// Cleared when a newer connection supersedes this one.
    device_uuid: Option<Uuid>,
    sender: OutboundSender,
}

/// Tracks live connections and the durable device registry.
#[derive(Default)]
pub struct Registry {
    devices: HashMap<Uuid, DeviceRecord>,
    connections: HashMap<ConnId, ConnectionEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly upgraded connection as a broadcast subscriber.
    pub fn add_connection(&mut self, conn_id: ConnId, sender: OutboundSender) {
        self.connections.insert(
            conn_id,
            ConnectionEntry {
                device_uuid: None,
                sender,
            },
        );
    }

    /// Insert or update the device entry for `uuid` and bind it to `conn_id`.
    ///
    /// If a prior entry for the same UUID is still `connected` under a
    /// different connection, that connection is superseded: its link to the
    /// device is severed so its later messages and its eventual disconnect
    /// are ignored. This handles reconnect-before-disconnect races.
    pub fn register(
        &mut self,
        uuid: Uuid,
        conn_id: ConnId,
        capabilities: DeviceCapabilities,
    ) -> &DeviceRecord {
        if let Some(existing) = self.devices.get(&uuid) {
            if existing.state == DeviceState::Connected && existing.conn_id != conn_id {
                let old_conn = existing.conn_id;
                if let Some(entry) = self.connections.get_mut(&old_conn) {
                    entry.device_uuid = None;
                }
                tracing::info!(
                    uuid = %uuid,
                    old_conn = %old_conn,
                    new_conn = %conn_id,
                    "Superseding stale connection for reconnecting device"
                );
            }
        }

        if let Some(entry) = self.connections.get_mut(&conn_id) {
            entry.device_uuid = Some(uuid);
        }

        let record = self.devices.entry(uuid).or_insert_with(|| DeviceRecord {
            uuid,
            conn_id,
            capabilities: DeviceCapabilities::default(),
            state: DeviceState::Connected,
            last_seen: Utc::now(),
        });
        record.conn_id = conn_id;
        record.capabilities = capabilities;
        record.state = DeviceState::Connected;
        record.last_seen = Utc::now();
        record
    }

    /// Handle a transport-level disconnect.
    ///
    /// Removes the connection entry and, if it still owned a device, marks
    /// that device `disconnected` and returns its UUID so the caller can
    /// reclaim in-flight jobs. Unknown or repeated connection ids are a
    /// no-op (transports may fire disconnect more than once).
    pub fn mark_disconnected(&mut self, conn_id: ConnId) -> Option<Uuid> {
        let entry = self.connections.remove(&conn_id)?;
        let uuid = entry.device_uuid?;

        let record = self.devices.get_mut(&uuid)?;
        if record.conn_id != conn_id {
            // A newer connection took over this device already.
            return None;
        }
        record.state = DeviceState::Disconnected;
        record.last_seen = Utc::now();
        Some(uuid)
    }

    /// Whether `conn_id` may speak for `uuid`.
    ///
    /// True when the connection is the device's current channel, or when the
    /// device is not currently connected at all (first contact, or a message
    /// racing ahead of `device_info`). False means the sender was superseded
    /// and its messages are ignored.
    pub fn conn_speaks_for(&self, conn_id: ConnId, uuid: Uuid) -> bool {
        match self.devices.get(&uuid) {
            Some(record) if record.state == DeviceState::Connected => record.conn_id == conn_id,
            _ => true,
        }
    }

    pub fn find(&self, uuid: Uuid) -> Option<&DeviceRecord> {
        self.devices.get(&uuid)
    }

    /// Snapshot of every known device, most recently seen first.
    pub fn list(&self) -> Vec<DeviceSnapshot> {
        let mut snapshots: Vec<DeviceSnapshot> =
            self.devices.values().map(DeviceRecord::snapshot).collect();
        snapshots.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        snapshots
    }

    /// All devices currently `connected`.
    pub fn connected(&self) -> Vec<&DeviceRecord> {
        self.devices
            .values()
            .filter(|d| d.state == DeviceState::Connected)
            .collect()
    }

    /// Push a message to one connection. Returns `false` if the connection
    /// is unknown or its channel is closed.
    pub fn send_to_conn(&self, conn_id: ConnId, message: Outbound) -> bool {
        match self.connections.get(&conn_id) {
            Some(entry) => entry.sender.send(message).is_ok(),
            None => false,
        }
    }

    /// Push a message to the connection currently speaking for a device.
    pub fn send_to_device(&self, uuid: Uuid, message: Outbound) -> bool {
        match self.devices.get(&uuid) {
            Some(record) if record.state == DeviceState::Connected => {
                self.send_to_conn(record.conn_id, message)
            }
            _ => false,
        }
    }

    /// Best-effort fan-out to every live connection.
    ///
    /// Connections whose send channels are closed are skipped; their own
    /// disconnect events clean them up. Delivery is at most once, never
    /// retried.
    pub fn broadcast(&self, message: &Outbound) {
        for (conn_id, entry) in &self.connections {
            if entry.sender.send(message.clone()).is_err() {
                tracing::debug!(conn_id = %conn_id, "Broadcast skipped closed connection");
            }
        }
    }

    /// Number of live connections (identified or not).
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Drop every connection's sender, closing all outbound channels.
    ///
    /// Used during graceful shutdown; the per-socket send tasks observe the
    /// closed channel and end their connections.
    pub fn shutdown_all(&mut self) {
        let count = self.connections.len();
        self.connections.clear();
        tracing::info!(count, "Closed all coordinator connections");
    }
}
