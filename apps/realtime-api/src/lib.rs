pub mod config;
pub mod error;
pub mod gateway;
pub mod models;
pub mod routes;
pub mod store;

use std::sync::Arc;

use config::Config;
use gateway::admin::AdminBroadcaster;
use gateway::calls::CallRelay;
use gateway::notify::NotificationService;
use gateway::registry::ConnectionRegistry;
use store::external::{CallHistoryStore, NotificationStore, UserDirectory};
use store::presence::PresenceStore;

/// Shared application state available to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub presence: Arc<dyn PresenceStore>,
    pub users: Arc<dyn UserDirectory>,
    pub registry: Arc<ConnectionRegistry>,
    pub notifications: Arc<NotificationService>,
    pub calls: Arc<CallRelay>,
    pub admin: Arc<AdminBroadcaster>,
}

impl AppState {
    /// Wire the realtime services around a presence store and the external
    /// persistence collaborators.
    pub fn new(
        config: Config,
        presence: Arc<dyn PresenceStore>,
        users: Arc<dyn UserDirectory>,
        notification_store: Arc<dyn NotificationStore>,
        call_history: Arc<dyn CallHistoryStore>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let notifications = Arc::new(NotificationService::new(
            presence.clone(),
            users.clone(),
            notification_store,
            registry.clone(),
        ));
        let calls = Arc::new(CallRelay::new(
            presence.clone(),
            users.clone(),
            call_history,
            registry.clone(),
        ));
        let admin = Arc::new(AdminBroadcaster::new(presence.clone(), registry.clone()));

        Self {
            config: Arc::new(config),
            presence,
            users,
            registry,
            notifications,
            calls,
            admin,
        }
    }
}
