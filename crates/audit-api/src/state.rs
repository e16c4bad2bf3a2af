use audit_core::config::ConfigHandle;
use audit_core::jobs::JobQueue;
use audit_core::repository::AuditRepository;
use redis::aio::ConnectionManager;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ConfigHandle>,
    pub repository: Arc<AuditRepository>,
    pub queue: Arc<dyn JobQueue>,
    pub redis: ConnectionManager,
}
