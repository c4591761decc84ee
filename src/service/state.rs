//! Service state: both engines plus connection tracking.
//!
//! Owned exclusively by the service loop. No concurrent access.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::copypaste::{CachedClipboard, CopyPasteEngine};
use crate::dnd::DndEngine;
use crate::dnd::watchdog::WatchdogScheduler;
use crate::ipc::protocol::Role;
use crate::notify::Notifier;
use crate::staging::LocalStaging;
use crate::transport::{HostSender, RPC_NONE};

use super::ServiceConfig;

/// Unique identifier for a socket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug)]
pub struct ServiceState {
    pub dnd: DndEngine,
    pub cp: CopyPasteEngine<CachedClipboard>,
    /// Role of every connection that completed the handshake.
    roles: HashMap<ConnectionId, Role>,
    /// The single host connection, if attached.
    host: Option<ConnectionId>,
}

impl ServiceState {
    /// Build both engines. They stay inert until the host announces
    /// its capabilities.
    pub fn new(
        config: &ServiceConfig,
        host_tx: HostSender,
        notifier: Notifier,
        watchdog: Box<dyn WatchdogScheduler>,
    ) -> Self {
        let staging = LocalStaging::new(&config.staging_root);

        let mut dnd = DndEngine::new(
            host_tx.clone(),
            notifier.clone(),
            Box::new(staging.clone()),
            watchdog,
        )
        .with_ungrab_timeout(config.ungrab_timeout);
        dnd.set_allowed(config.dnd_allowed);

        let mut cp = CopyPasteEngine::new(
            host_tx,
            notifier,
            Box::new(staging),
            CachedClipboard::default(),
        );
        cp.set_allowed(config.cp_allowed);

        Self {
            dnd,
            cp,
            roles: HashMap::new(),
            host: None,
        }
    }

    /// Record a handshaken connection.
    ///
    /// A connection's role is fixed by its first handshake: a repeated
    /// `hello` fails with `already_handshaken`. Returns
    /// `Err("host_already_connected")` if a second host tries to attach.
    pub fn add_connection(&mut self, id: ConnectionId, role: Role) -> Result<(), &'static str> {
        if self.roles.contains_key(&id) {
            return Err("already_handshaken");
        }
        if role == Role::Host {
            if self.host.is_some() {
                return Err("host_already_connected");
            }
            self.host = Some(id);
        }
        self.roles.insert(id, role);
        Ok(())
    }

    /// Forget a connection. A departing host takes both transports with it.
    pub fn remove_connection(&mut self, id: ConnectionId) {
        self.roles.remove(&id);
        if self.host == Some(id) {
            self.host = None;
            tracing::info!("host detached");
            self.dnd.on_version_changed(RPC_NONE);
            self.cp.on_version_changed(RPC_NONE);
        }
    }

    pub fn role(&self, id: ConnectionId) -> Option<Role> {
        self.roles.get(&id).copied()
    }

    pub fn host(&self) -> Option<ConnectionId> {
        self.host
    }

    /// Connections that receive UI notifications.
    pub fn ui_connections(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.roles
            .iter()
            .filter(|(_, role)| **role == Role::Ui)
            .map(|(id, _)| *id)
    }
}
