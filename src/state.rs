use std::sync::Arc;

use crate::config::AppConfig;
use crate::lifecycle::ShutdownHandle;
use crate::stream::{ClientRegistry, StreamPublisher};
use crate::video::{CaptureSession, FrameEncoder};

/// Application-wide state shared across handlers
///
/// The capture session is owned here and by the lifecycle controller; every
/// stream and snapshot goes through it.
pub struct AppState {
    /// Resolved startup configuration
    pub config: AppConfig,
    /// The one open capture device
    pub session: Arc<CaptureSession>,
    /// Shared stateless encoder
    pub encoder: Arc<dyn FrameEncoder>,
    /// Connected stream consumers
    pub clients: Arc<ClientRegistry>,
    /// Per-request stream factory
    pub publisher: StreamPublisher,
    /// Shutdown requests and the pumps' parent token
    pub shutdown: ShutdownHandle,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        session: Arc<CaptureSession>,
        encoder: Arc<dyn FrameEncoder>,
        shutdown: ShutdownHandle,
    ) -> Arc<Self> {
        let clients = Arc::new(ClientRegistry::new());
        let publisher = StreamPublisher::new(
            session.clone(),
            encoder.clone(),
            config.stream.clone(),
            clients.clone(),
            shutdown.clone(),
        );

        Arc::new(Self {
            config,
            session,
            encoder,
            clients,
            publisher,
            shutdown,
        })
    }
}
