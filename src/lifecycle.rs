//! Orderly shutdown
//!
//! Signal handlers and pumps only *request* shutdown: they record a reason
//! and cancel the shared token. The main task then calls
//! [`LifecycleController::shutdown`], which releases the capture session.

use std::fmt;
use std::sync::{Arc, OnceLock};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::video::CaptureSession;

/// What ended the process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT or SIGTERM
    Signal(&'static str),
    /// The capture device disappeared while streaming
    DeviceLost(String),
    /// The server stopped on its own
    ServerExited,
}

impl ShutdownReason {
    /// Process exit status for this reason
    pub fn exit_code(&self) -> i32 {
        match self {
            ShutdownReason::Signal(_) | ShutdownReason::ServerExited => 0,
            ShutdownReason::DeviceLost(_) => 1,
        }
    }
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Signal(name) => write!(f, "received {}", name),
            ShutdownReason::DeviceLost(reason) => write!(f, "capture device lost: {}", reason),
            ShutdownReason::ServerExited => write!(f, "server exited"),
        }
    }
}

/// Cloneable handle for requesting and observing shutdown
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    token: CancellationToken,
    reason: Arc<OnceLock<ShutdownReason>>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            reason: Arc::new(OnceLock::new()),
        }
    }

    /// Record `reason` and cancel every pump.
    ///
    /// Only the first request's reason is kept; returns whether this call
    /// was the first.
    pub fn request(&self, reason: ShutdownReason) -> bool {
        let first = self.reason.set(reason.clone()).is_ok();
        if first {
            info!("Shutdown requested: {}", reason);
        }
        self.token.cancel();
        first
    }

    pub fn is_requested(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.get().cloned()
    }

    /// Parent token; pumps run on child tokens of it
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub async fn requested(&self) {
        self.token.cancelled().await
    }
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns the session release and the signal listener
pub struct LifecycleController {
    session: Arc<CaptureSession>,
    handle: ShutdownHandle,
}

impl LifecycleController {
    pub fn new(session: Arc<CaptureSession>) -> Self {
        Self {
            session,
            handle: ShutdownHandle::new(),
        }
    }

    pub fn handle(&self) -> ShutdownHandle {
        self.handle.clone()
    }

    /// Listen for SIGINT/SIGTERM until shutdown is requested some other way
    pub fn spawn_signal_listener(&self) -> JoinHandle<()> {
        let handle = self.handle.clone();
        tokio::spawn(async move {
            tokio::select! {
                signal = wait_for_signal() => {
                    handle.request(ShutdownReason::Signal(signal));
                }
                _ = handle.requested() => {}
            }
        })
    }

    /// Stop all pumps and release the capture session.
    ///
    /// Safe to call more than once; the session is released by the first call.
    pub async fn shutdown(&self) -> ShutdownReason {
        self.handle.request(ShutdownReason::ServerExited);
        let reason = self
            .handle
            .reason()
            .unwrap_or(ShutdownReason::ServerExited);

        // Release may wait for a read that is still blocked in the driver
        let session = self.session.clone();
        match tokio::task::spawn_blocking(move || session.release()).await {
            Ok(true) => info!("Capture session released ({})", reason),
            Ok(false) => {}
            Err(e) => error!("Capture session release task failed: {}", e),
        }

        reason
    }
}

/// Resolve with the name of the first termination signal received
async fn wait_for_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}
