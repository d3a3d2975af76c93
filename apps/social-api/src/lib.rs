pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod models;
pub mod notify;
pub mod routes;

use std::sync::Arc;

use config::Config;
use db::store::Store;
use gateway::presence::PresenceTracker;
use gateway::registry::ConnectionRegistry;
use notify::bus::{self, NotificationBus};
use notify::Notifier;

/// Shared application state available to all route handlers and connections.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: Arc<Config>,
    pub registry: Arc<ConnectionRegistry>,
    pub presence: Arc<PresenceTracker>,
    pub notifier: Notifier,
}

impl AppState {
    /// Wire up the relay around `store` and start the notification forwarder.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(store: Arc<dyn Store>, config: Config) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let presence = Arc::new(PresenceTracker::new(store.clone(), registry.clone()));
        let (bus, rx) = NotificationBus::channel(config.relay.notification_bus_capacity);
        bus::spawn_forwarder(rx, registry.clone());
        let notifier = Notifier::new(store.clone(), bus, &config.public_url);

        Self {
            store,
            config: Arc::new(config),
            registry,
            presence,
            notifier,
        }
    }
}
