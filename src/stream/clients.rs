//! Connected stream consumers
//!
//! Tracked for logging and the health endpoint only; consumers hold no frame
//! backlog.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// Client ID type (UUID string)
pub type ClientId = String;

/// Per-client session information
#[derive(Debug, Clone)]
pub struct ClientSession {
    pub id: ClientId,
    pub connected_at: Instant,
    pub frames_sent: u64,
    /// FPS calculator (1-second rolling window)
    pub fps_calculator: FpsCalculator,
}

impl ClientSession {
    pub fn new(id: ClientId) -> Self {
        Self {
            id,
            connected_at: Instant::now(),
            frames_sent: 0,
            fps_calculator: FpsCalculator::new(),
        }
    }

    pub fn connected_duration(&self) -> Duration {
        self.connected_at.elapsed()
    }

    pub fn stats(&self) -> ClientStats {
        ClientStats {
            id: self.id.clone(),
            fps: self.fps_calculator.current_fps(),
            connected_secs: self.connected_duration().as_secs(),
            frames_sent: self.frames_sent,
        }
    }
}

/// Rolling window FPS calculator
#[derive(Debug, Clone)]
pub struct FpsCalculator {
    frame_times: VecDeque<Instant>,
    window: Duration,
}

impl FpsCalculator {
    pub fn new() -> Self {
        Self {
            frame_times: VecDeque::with_capacity(64),
            window: Duration::from_secs(1),
        }
    }

    pub fn record_frame(&mut self) {
        let now = Instant::now();
        self.frame_times.push_back(now);
        self.evict(now);
    }

    /// Frames recorded during the last window
    pub fn current_fps(&self) -> u32 {
        let now = Instant::now();
        self.frame_times
            .iter()
            .rev()
            .take_while(|&&t| now.duration_since(t) <= self.window)
            .count() as u32
    }

    fn evict(&mut self, now: Instant) {
        while let Some(&oldest) = self.frame_times.front() {
            if now.duration_since(oldest) > self.window {
                self.frame_times.pop_front();
            } else {
                break;
            }
        }
    }
}

impl Default for FpsCalculator {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of one client for the health endpoint
#[derive(Debug, Clone, Serialize)]
pub struct ClientStats {
    pub id: String,
    pub fps: u32,
    pub connected_secs: u64,
    pub frames_sent: u64,
}

/// Registry of active stream consumers
#[derive(Default)]
pub struct ClientRegistry {
    clients: RwLock<HashMap<ClientId, ClientSession>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.clients.read().len()
    }

    /// Register a consumer and return the key it is tracked under.
    ///
    /// Requested ids are caller-supplied, so a duplicate gets a random
    /// suffix instead of replacing the live entry.
    pub fn register(&self, client_id: ClientId) -> ClientId {
        let (client_id, total) = {
            let mut clients = self.clients.write();
            let mut key = client_id;
            if clients.contains_key(&key) {
                key = format!("{}-{}", key, uuid::Uuid::new_v4().simple());
            }
            clients.insert(key.clone(), ClientSession::new(key.clone()));
            (key, clients.len())
        };
        info!("Client {} connected (total: {})", client_id, total);
        client_id
    }

    pub fn unregister(&self, client_id: &str) {
        if let Some(session) = self.clients.write().remove(client_id) {
            let duration_secs = session.connected_duration().as_secs_f32();
            let avg_fps = if duration_secs > 0.1 {
                session.frames_sent as f32 / duration_secs
            } else {
                0.0
            };
            info!(
                "Client {} disconnected after {:.1}s ({} frames, {:.1} avg FPS)",
                client_id, duration_secs, session.frames_sent, avg_fps
            );
        }
    }

    pub fn record_frame_sent(&self, client_id: &str) {
        if let Some(session) = self.clients.write().get_mut(client_id) {
            session.frames_sent += 1;
            session.fps_calculator.record_frame();
        }
    }

    /// Per-client statistics, longest connected first
    pub fn stats(&self) -> Vec<ClientStats> {
        let clients = self.clients.read();
        let mut sessions: Vec<&ClientSession> = clients.values().collect();
        sessions.sort_by_key(|s| s.connected_at);
        sessions.into_iter().map(ClientSession::stats).collect()
    }
}

/// RAII guard for client lifecycle management
///
/// Unregisters the client however the stream ends, including an abrupt
/// disconnect that drops the response body.
pub struct ClientGuard {
    client_id: ClientId,
    registry: Arc<ClientRegistry>,
}

impl ClientGuard {
    pub fn new(client_id: ClientId, registry: Arc<ClientRegistry>) -> Self {
        let client_id = registry.register(client_id);
        Self {
            client_id,
            registry,
        }
    }

    pub fn id(&self) -> &ClientId {
        &self.client_id
    }
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.registry.unregister(&self.client_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fps_calculator() {
        let mut calc = FpsCalculator::new();
        assert_eq!(calc.current_fps(), 0);

        calc.record_frame();
        calc.record_frame();
        calc.record_frame();
        assert_eq!(calc.current_fps(), 3);
    }

    #[test]
    fn test_guard_registers_and_unregisters() {
        let registry = Arc::new(ClientRegistry::new());
        let guard = ClientGuard::new("a".to_string(), registry.clone());
        let other = ClientGuard::new("b".to_string(), registry.clone());
        assert_eq!(registry.count(), 2);

        registry.record_frame_sent(guard.id());
        registry.record_frame_sent(guard.id());
        let stats = registry.stats();
        let a = stats.iter().find(|s| s.id == "a").unwrap();
        let b = stats.iter().find(|s| s.id == "b").unwrap();
        assert_eq!(a.frames_sent, 2);
        assert_eq!(a.fps, 2);
        assert_eq!(b.frames_sent, 0);

        drop(guard);
        assert_eq!(registry.count(), 1);
        drop(other);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_duplicate_id_keeps_both_consumers() {
        let registry = Arc::new(ClientRegistry::new());
        let first = ClientGuard::new("x".to_string(), registry.clone());
        let second = ClientGuard::new("x".to_string(), registry.clone());
        assert_eq!(first.id(), "x");
        assert_ne!(first.id(), second.id());
        assert!(second.id().starts_with("x-"));
        assert_eq!(registry.count(), 2);

        registry.record_frame_sent(second.id());
        let stats = registry.stats();
        let x = stats.iter().find(|s| s.id == "x").unwrap();
        assert_eq!(x.frames_sent, 0);

        drop(first);
        assert_eq!(registry.count(), 1);
        assert_eq!(registry.stats()[0].id, *second.id());
        assert_eq!(registry.stats()[0].frames_sent, 1);
        drop(second);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_record_for_unknown_client_is_ignored() {
        let registry = ClientRegistry::new();
        registry.record_frame_sent("ghost");
        assert_eq!(registry.count(), 0);
    }
}
