//! Registry of live device sessions.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};

use crate::config::CoreConfig;
use crate::protocol::{Request, Response};
use crate::session::DeviceSession;

/// Owns the `device_id → session` map. All mutation goes through the mutex,
/// so accepts and lookups racing each other stay consistent; a lock-free map
/// would reintroduce the duplicate-session races this guards against.
pub struct ConnectionManager {
    config: Arc<CoreConfig>,
    sessions: Mutex<HashMap<String, Arc<DeviceSession>>>,
}

impl ConnectionManager {
    pub fn new(config: Arc<CoreConfig>) -> Self {
        Self {
            config,
            sessions: Mutex::default(),
        }
    }

    /// Register a new session over the given outbound channel, assigning a
    /// fresh device id.
    pub async fn accept(&self, outbound: mpsc::Sender<String>) -> Arc<DeviceSession> {
        let device_id: String = uuid::Uuid::new_v4().to_string().chars().take(8).collect();
        self.accept_with_id(device_id, outbound).await
    }

    /// Register a session under a caller-chosen id. An existing session for
    /// the same id is closed best-effort before being replaced.
    pub async fn accept_with_id(
        &self,
        device_id: String,
        outbound: mpsc::Sender<String>,
    ) -> Arc<DeviceSession> {
        let session = Arc::new(DeviceSession::new(
            device_id.clone(),
            outbound,
            self.config.reply_timeout(),
        ));

        let previous = {
            let mut sessions = self.sessions.lock().await;
            sessions.insert(device_id.clone(), session.clone())
        };
        if let Some(previous) = previous {
            tracing::warn!(device_id, "evicting duplicate session");
            previous.close();
        }

        tracing::info!(device_id, "device connected");
        session
    }

    /// Remove and tear down a session. No-op for unknown ids.
    pub async fn disconnect(&self, device_id: &str) {
        let session = {
            let mut sessions = self.sessions.lock().await;
            sessions.remove(device_id)
        };
        if let Some(session) = session {
            session.close();
            tracing::info!(device_id, "device disconnected");
        }
    }

    pub async fn get(&self, device_id: &str) -> Option<Arc<DeviceSession>> {
        self.sessions.lock().await.get(device_id).cloned()
    }

    pub async fn sessions(&self) -> Vec<Arc<DeviceSession>> {
        self.sessions.lock().await.values().cloned().collect()
    }

    /// Send to one device; optionally wait for the matching reply (up to the
    /// configured reply timeout). `None` when the device is unknown, the
    /// reply timed out, or no reply was requested.
    pub async fn send_request(
        &self,
        device_id: &str,
        request: Request,
        wait_reply: bool,
    ) -> Option<Response> {
        let Some(session) = self.get(device_id).await else {
            tracing::warn!(device_id, "device not connected");
            return None;
        };

        if wait_reply {
            session.request_reply(request).await
        } else {
            session.send(&request).await;
            None
        }
    }

    /// Fire-and-forget across every connected device.
    pub async fn broadcast(&self, request: &Request) {
        for session in self.sessions().await {
            session.send(request).await;
        }
    }

    /// Tear down every session, for server shutdown.
    pub async fn shutdown(&self) {
        let sessions: Vec<_> = {
            let mut map = self.sessions.lock().await;
            map.drain().map(|(_, session)| session).collect()
        };
        for session in sessions {
            session.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    fn manager() -> ConnectionManager {
        ConnectionManager::new(Arc::new(CoreConfig::default()))
    }

    #[tokio::test]
    async fn accept_assigns_ids_and_registers() {
        let manager = manager();
        let (tx, _rx) = mpsc::channel(4);
        let session = manager.accept(tx).await;

        assert_eq!(session.device_id.len(), 8);
        assert!(manager.get(&session.device_id).await.is_some());
    }

    #[tokio::test]
    #[traced_test]
    async fn duplicate_accept_evicts_the_old_session() {
        let manager = manager();
        let (tx1, _rx1) = mpsc::channel(4);
        let (tx2, _rx2) = mpsc::channel(4);

        let first = manager.accept_with_id("dev".to_string(), tx1).await;
        let second = manager.accept_with_id("dev".to_string(), tx2).await;

        assert!(first.is_closed());
        assert!(!second.is_closed());
        assert!(logs_contain("evicting duplicate session"));
        let registered = manager.get("dev").await.unwrap();
        assert!(Arc::ptr_eq(&registered, &second));
    }

    #[tokio::test]
    async fn disconnect_tears_the_session_down() {
        let manager = manager();
        let (tx, _rx) = mpsc::channel(4);
        let session = manager.accept_with_id("dev".to_string(), tx).await;

        manager.disconnect("dev").await;
        assert!(session.is_closed());
        assert!(manager.get("dev").await.is_none());
        assert_eq!(session.pending_reply_count(), 0);
        assert_eq!(session.open_task_count(), 0);
    }

    #[tokio::test]
    async fn broadcast_reaches_every_device() {
        let manager = manager();
        let (tx1, mut rx1) = mpsc::channel(4);
        let (tx2, mut rx2) = mpsc::channel(4);
        manager.accept_with_id("a".to_string(), tx1).await;
        manager.accept_with_id("b".to_string(), tx2).await;

        manager.broadcast(&Request::pause()).await;
        assert!(rx1.recv().await.unwrap().contains("mphelper pause"));
        assert!(rx2.recv().await.unwrap().contains("mphelper pause"));
    }
}
