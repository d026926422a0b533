//! Per-request stream endpoint
//!
//! Each accepted request gets its own pump task feeding a capacity-1 channel.
//! The response body pulls from that channel lazily, so a slow client only
//! slows its own pump, and dropping the body ends the pump on its next wait.

use axum::{
    body::Body,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error};

use super::clients::{ClientGuard, ClientRegistry};
use super::multipart::MULTIPART_CONTENT_TYPE;
use super::pump::{PumpExit, StreamPump};
use crate::config::StreamConfig;
use crate::error::{AppError, Result};
use crate::lifecycle::{ShutdownHandle, ShutdownReason};
use crate::video::{CaptureSession, FrameEncoder};

/// Opens multipart streams against the shared capture session
#[derive(Clone)]
pub struct StreamPublisher {
    session: Arc<CaptureSession>,
    encoder: Arc<dyn FrameEncoder>,
    config: StreamConfig,
    clients: Arc<ClientRegistry>,
    shutdown: ShutdownHandle,
}

impl StreamPublisher {
    pub fn new(
        session: Arc<CaptureSession>,
        encoder: Arc<dyn FrameEncoder>,
        config: StreamConfig,
        clients: Arc<ClientRegistry>,
        shutdown: ShutdownHandle,
    ) -> Self {
        Self {
            session,
            encoder,
            config,
            clients,
            shutdown,
        }
    }

    pub fn clients(&self) -> &Arc<ClientRegistry> {
        &self.clients
    }

    /// Start a pump for a new consumer and return its body stream.
    ///
    /// Fails only if shutdown has already begun; once the response is
    /// returned, per-frame errors never reach the client.
    pub fn open(&self, client_id: String) -> Result<Response> {
        if self.shutdown.is_requested() {
            return Err(AppError::ServiceUnavailable(
                "Server is shutting down".to_string(),
            ));
        }

        // Registered now, unregistered when both the pump and the body are gone
        let guard = Arc::new(ClientGuard::new(client_id, self.clients.clone()));
        let client_id = guard.id().clone();

        // Capacity 1: the pump blocks on send until the body has taken the previous chunk
        let (tx, mut rx) = mpsc::channel::<Bytes>(1);

        let pump = StreamPump::new(
            self.session.clone(),
            self.encoder.clone(),
            self.config.clone(),
            self.shutdown.token().child_token(),
        )
        .with_label(client_id.clone());

        let shutdown = self.shutdown.clone();
        let pump_guard = guard.clone();
        tokio::spawn(async move {
            let _guard = pump_guard;
            match pump.run(tx).await {
                PumpExit::ConsumerGone => debug!("[{}] Consumer disconnected", client_id),
                PumpExit::Shutdown => debug!("[{}] Pump stopped for shutdown", client_id),
                PumpExit::Fatal(AppError::DeviceLost { device, reason }) => {
                    error!("[{}] Capture device {} lost: {}", client_id, device, reason);
                    shutdown.request(ShutdownReason::DeviceLost(format!("{}: {}", device, reason)));
                }
                PumpExit::Fatal(e) => debug!("[{}] Pump ended: {}", client_id, e),
            }
        });

        let clients = self.clients.clone();
        let body_stream = async_stream::stream! {
            while let Some(chunk) = rx.recv().await {
                yield Ok::<Bytes, std::io::Error>(chunk);
                // Counted once hyper has taken the chunk
                clients.record_frame_sent(guard.id());
            }
        };

        Ok(multipart_response(Body::from_stream(body_stream)))
    }
}

fn multipart_response(body: Body) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, MULTIPART_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
            (header::PRAGMA, "no-cache"),
            (header::EXPIRES, "0"),
        ],
        body,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::multipart::MultipartReader;
    use crate::stream::pump::tests::TagEncoder;
    use crate::video::capture::tests::ScriptedSource;
    use crate::video::{FrameSource, RawFrame};
    use futures::StreamExt;
    use std::time::Duration;

    /// Reports the device as gone on every read
    struct UnpluggedSource;

    impl FrameSource for UnpluggedSource {
        fn read_frame(&mut self) -> Result<RawFrame> {
            Err(AppError::DeviceLost {
                device: "/dev/video0".to_string(),
                reason: "No such device".to_string(),
            })
        }
    }

    fn publisher(source: Box<dyn FrameSource>) -> (StreamPublisher, ShutdownHandle) {
        let shutdown = ShutdownHandle::new();
        let publisher = StreamPublisher::new(
            Arc::new(CaptureSession::new("/dev/video0", 1, source)),
            Arc::new(TagEncoder),
            StreamConfig::new(50.0, 30).unwrap(),
            Arc::new(ClientRegistry::new()),
            shutdown.clone(),
        );
        (publisher, shutdown)
    }

    #[tokio::test]
    async fn test_stream_headers_and_parts() {
        let (publisher, _shutdown) = publisher(Box::new(ScriptedSource::new(vec![Ok(7)])));
        let response = publisher.open("c1".to_string()).unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "multipart/x-mixed-replace; boundary=frame"
        );
        assert_eq!(response.headers()[header::PRAGMA], "no-cache");
        assert_eq!(publisher.clients().count(), 1);

        let mut body = response.into_body().into_data_stream();
        let mut reader = MultipartReader::new();
        for _ in 0..3 {
            let chunk = body.next().await.unwrap().unwrap();
            reader.push(&chunk);
        }
        let first = reader.next_part().unwrap().unwrap();
        assert_eq!(&first.payload[..], b"frame-7");

        drop(body);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(publisher.clients().count(), 0);
    }

    #[tokio::test]
    async fn test_rejects_after_shutdown() {
        let (publisher, shutdown) = publisher(Box::new(ScriptedSource::new(vec![Ok(1)])));
        shutdown.request(ShutdownReason::Signal("SIGINT"));

        let err = publisher.open("late".to_string()).unwrap_err();
        assert!(matches!(err, AppError::ServiceUnavailable(_)));
        assert_eq!(publisher.clients().count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_ends_body() {
        let (publisher, shutdown) = publisher(Box::new(ScriptedSource::new(vec![Ok(1)])));
        let response = publisher.open("c1".to_string()).unwrap();
        let mut body = response.into_body().into_data_stream();
        assert!(body.next().await.is_some());

        shutdown.request(ShutdownReason::Signal("SIGTERM"));
        let drained = tokio::time::timeout(Duration::from_secs(1), async {
            while body.next().await.is_some() {}
        })
        .await;
        assert!(drained.is_ok());
    }

    #[tokio::test]
    async fn test_device_loss_requests_shutdown() {
        let (publisher, shutdown) = publisher(Box::new(UnpluggedSource));
        let _response = publisher.open("c1".to_string()).unwrap();

        tokio::time::timeout(Duration::from_secs(1), shutdown.requested())
            .await
            .unwrap();
        assert!(matches!(
            shutdown.reason(),
            Some(ShutdownReason::DeviceLost(_))
        ));
    }
}
