use std::sync::Arc;

use tokio::sync::broadcast;

use crate::config::AppConfig;
use crate::media::capture::{CaptureSpec, SharedCapture};
use crate::session::{SessionManager, SessionRegistry};

/// Application-wide state shared across handlers.
///
/// The session registry and the shared capture handle are the only
/// cross-session state; both are owned here and handed to the session
/// manager by reference, never accessed as ambient globals.
pub struct AppState {
    /// Resolved startup configuration
    pub config: Arc<AppConfig>,
    /// Registry of live sessions
    pub registry: Arc<SessionRegistry>,
    /// Lazily-opened shared capture devices
    pub capture: Arc<SharedCapture>,
    /// Session lifecycle manager
    pub manager: SessionManager,
    /// Shutdown signal sender
    pub shutdown_tx: broadcast::Sender<()>,
}

impl AppState {
    pub fn new(config: AppConfig, shutdown_tx: broadcast::Sender<()>) -> Arc<Self> {
        let config = Arc::new(config);
        let registry = Arc::new(SessionRegistry::new());
        let capture = Arc::new(SharedCapture::new(CaptureSpec::platform_default()));
        let manager = SessionManager::new(config.clone(), registry.clone(), capture.clone());

        Arc::new(Self {
            config,
            registry,
            capture,
            manager,
            shutdown_tx,
        })
    }

    /// Subscribe to the shutdown signal
    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }
}
