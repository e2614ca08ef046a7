//! Relay HTTP Server
//!
//! Axum server hosting the webhook with request tracing and graceful shutdown.

use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::conversation::ConversationBuilder;
use crate::gemini::GeminiClient;
use crate::history::HistoryStore;
use crate::telegram::TelegramClient;
use crate::webhook::{webhook_router, RelayState};

/// Relay server
pub struct RelayServer {
    addr: SocketAddr,
    state: Arc<RelayState>,
}

impl RelayServer {
    pub fn new(addr: SocketAddr, state: Arc<RelayState>) -> Self {
        Self { addr, state }
    }

    /// Wire every component from config; opens the history database
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let store = Arc::new(HistoryStore::open(&config.db_path)?);
        let model = Arc::new(GeminiClient::from_config(config)?);
        let platform = Arc::new(TelegramClient::from_config(config)?);

        info!(
            "Model: {}, history window: {} turns",
            model.model(),
            config.max_history_messages
        );

        let state = RelayState::new(
            store,
            ConversationBuilder::from_config(config),
            model,
            platform,
        );
        Ok(Self::new(config.socket_addr(), Arc::new(state)))
    }

    /// Build the router with all routes and middleware
    pub fn build_router(&self) -> Router {
        webhook_router(self.state.clone()).layer(TraceLayer::new_for_http())
    }

    /// Start the server and run until shutdown signal
    pub async fn run(self) -> anyhow::Result<()> {
        let router = self.build_router();

        info!("Starting relay server on {}", self.addr);
        let listener = tokio::net::TcpListener::bind(self.addr).await?;

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("Relay server shut down gracefully");
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
