//! Relay Web
//!
//! Two HTTP apps over the relay core: the user app (per-account live feed,
//! task start, input submission) and the admin app (global feed, active
//! tasks, pending input requests). They listen on separate ports.

pub mod routes;
pub mod sse;

use axum::Router;
use relay_core::{
    CorrelationRegistry, EventHub, InputPolicy, Launcher, RelayConfig, SubmissionGateway,
    TaskManager,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Starts runners and tracks the active ones
    pub manager: TaskManager,
    /// Routes submitted values to pending requests
    pub gateway: SubmissionGateway,
}

impl AppState {
    /// Wire a fresh registry and hub to `launcher`.
    pub fn new(launcher: Arc<dyn Launcher>, policy: InputPolicy) -> Self {
        let registry = Arc::new(CorrelationRegistry::new());
        let manager = TaskManager::new(Arc::clone(&registry), EventHub::new(), launcher, policy);
        Self {
            manager,
            gateway: SubmissionGateway::new(registry),
        }
    }

    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(Arc::new(config.task.launcher()), config.input.policy())
    }

    pub fn hub(&self) -> &EventHub {
        self.manager.hub()
    }
}

/// Listener configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub user_port: u16,
    pub admin_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        let server = relay_core::ServerConfig::default();
        Self {
            host: server.host,
            user_port: server.user_port,
            admin_port: server.admin_port,
        }
    }
}

impl From<&relay_core::ServerConfig> for Config {
    fn from(server: &relay_core::ServerConfig) -> Self {
        Self {
            host: server.host.clone(),
            user_port: server.user_port,
            admin_port: server.admin_port,
        }
    }
}

fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Router for the user-facing app.
pub fn create_user_app(state: AppState) -> Router {
    routes::user_routes(state).layer(cors())
}

/// Router for the admin app.
pub fn create_admin_app(state: AppState) -> Router {
    routes::admin_routes(state).layer(cors())
}

/// Serve both apps until one of the listeners fails.
pub async fn serve(config: Config, state: AppState) -> Result<(), std::io::Error> {
    let host: std::net::IpAddr = config.host.parse().map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("invalid host {:?}: {}", config.host, e),
        )
    })?;
    let user_addr = SocketAddr::new(host, config.user_port);
    let admin_addr = SocketAddr::new(host, config.admin_port);

    let user_listener = tokio::net::TcpListener::bind(user_addr).await?;
    let admin_listener = tokio::net::TcpListener::bind(admin_addr).await?;

    tracing::info!("User app listening on {}", user_addr);
    tracing::info!("Admin app listening on {}", admin_addr);

    let user = axum::serve(user_listener, create_user_app(state.clone()));
    let admin = axum::serve(admin_listener, create_admin_app(state));

    tokio::try_join!(
        async move { user.await },
        async move { admin.await }
    )?;
    Ok(())
}
