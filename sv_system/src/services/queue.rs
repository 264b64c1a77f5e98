use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use rand::Rng;

use crate::data::PlayMode;
use crate::services::PlayQueueStore;

/// In-memory play queue store, one entry per device.
///
/// Stands in for the external queue backend; the trait is the seam a real
/// deployment re-implements.
#[derive(Debug, Default)]
pub struct MemoryQueueStore {
    devices: Mutex<HashMap<String, QueueState>>,
}

#[derive(Debug, Default)]
struct QueueState {
    items: Vec<i64>,
    mode: PlayMode,
    /// -1 means "nothing played yet", so the first advance lands on index 0.
    index: i64,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn advance(&self, device_id: &str, wrap: bool, forward: bool) -> Option<i64> {
        let mut devices = self.devices.lock().expect("queue store poisoned");
        let state = devices.get_mut(device_id)?;
        let len = state.items.len() as i64;
        if len == 0 {
            return None;
        }

        let next_index = match state.mode {
            PlayMode::SingleLoop => {
                if (0..len).contains(&state.index) {
                    state.index
                } else {
                    0
                }
            }
            PlayMode::Shuffle => rand::rng().random_range(0..len),
            PlayMode::PlaylistLoop => step_wrapping(state.index, len, forward),
            PlayMode::Sequential if wrap => step_wrapping(state.index, len, forward),
            PlayMode::Sequential => {
                if forward {
                    let next = state.index + 1;
                    if next >= len {
                        return None;
                    }
                    next
                } else {
                    if state.index <= 0 {
                        return None;
                    }
                    state.index - 1
                }
            }
        };

        state.index = next_index;
        Some(state.items[next_index as usize])
    }
}

fn step_wrapping(index: i64, len: i64, forward: bool) -> i64 {
    let step = if forward { 1 } else { -1 };
    (index + step).rem_euclid(len)
}

#[async_trait]
impl PlayQueueStore for MemoryQueueStore {
    async fn set_mode(&self, device_id: &str, mode: PlayMode) {
        let mut devices = self.devices.lock().expect("queue store poisoned");
        devices.entry(device_id.to_string()).or_default().mode = mode;
        tracing::info!(device_id, ?mode, "play mode changed");
    }

    async fn mode(&self, device_id: &str) -> PlayMode {
        let devices = self.devices.lock().expect("queue store poisoned");
        devices.get(device_id).map(|s| s.mode).unwrap_or_default()
    }

    async fn set_queue(&self, device_id: &str, content_ids: Vec<i64>, start_index: usize) {
        let mut devices = self.devices.lock().expect("queue store poisoned");
        let state = devices.entry(device_id.to_string()).or_default();
        tracing::info!(device_id, items = content_ids.len(), start_index, "queue set");
        state.items = content_ids;
        state.index = start_index as i64;
    }

    async fn add_to_queue(&self, device_id: &str, content_ids: Vec<i64>) {
        let mut devices = self.devices.lock().expect("queue store poisoned");
        let state = devices.entry(device_id.to_string()).or_default();
        state.items.extend(content_ids);
    }

    async fn next(&self, device_id: &str, wrap: bool) -> Option<i64> {
        self.advance(device_id, wrap, true)
    }

    async fn previous(&self, device_id: &str, wrap: bool) -> Option<i64> {
        self.advance(device_id, wrap, false)
    }

    async fn clear(&self, device_id: &str) {
        let mut devices = self.devices.lock().expect("queue store poisoned");
        if let Some(state) = devices.get_mut(device_id) {
            state.items.clear();
            state.index = -1;
        }
        tracing::info!(device_id, "queue cleared");
    }

    async fn queue(&self, device_id: &str) -> Vec<i64> {
        let devices = self.devices.lock().expect("queue store poisoned");
        devices
            .get(device_id)
            .map(|s| s.items.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with(items: Vec<i64>, start: usize) -> MemoryQueueStore {
        let store = MemoryQueueStore::new();
        store.set_queue("dev", items, start).await;
        store
    }

    #[tokio::test]
    async fn sequential_stops_at_the_end() {
        let store = store_with(vec![10, 20], 0).await;
        assert_eq!(store.next("dev", false).await, Some(20));
        assert_eq!(store.next("dev", false).await, None);
    }

    #[tokio::test]
    async fn sequential_wraps_when_user_initiated() {
        let store = store_with(vec![10, 20], 1).await;
        assert_eq!(store.next("dev", true).await, Some(10));
        assert_eq!(store.previous("dev", true).await, Some(20));
    }

    #[tokio::test]
    async fn previous_wraps_to_the_tail() {
        let store = store_with(vec![10, 20, 30], 0).await;
        assert_eq!(store.previous("dev", true).await, Some(30));
    }

    #[tokio::test]
    async fn playlist_loop_wraps_without_the_flag() {
        let store = store_with(vec![10, 20], 1).await;
        store.set_mode("dev", PlayMode::PlaylistLoop).await;
        assert_eq!(store.next("dev", false).await, Some(10));
    }

    #[tokio::test]
    async fn single_loop_repeats_the_current_track() {
        let store = store_with(vec![10, 20], 1).await;
        store.set_mode("dev", PlayMode::SingleLoop).await;
        assert_eq!(store.next("dev", false).await, Some(20));
        assert_eq!(store.next("dev", false).await, Some(20));
    }

    #[tokio::test]
    async fn shuffle_stays_inside_the_queue() {
        let store = store_with(vec![10, 20, 30], 0).await;
        store.set_mode("dev", PlayMode::Shuffle).await;
        for _ in 0..20 {
            let id = store.next("dev", false).await.unwrap();
            assert!([10, 20, 30].contains(&id));
        }
    }

    #[tokio::test]
    async fn empty_and_unknown_devices_yield_nothing() {
        let store = MemoryQueueStore::new();
        assert_eq!(store.next("dev", true).await, None);
        store.set_queue("dev", vec![], 0).await;
        assert_eq!(store.next("dev", true).await, None);
        assert!(store.queue("dev").await.is_empty());
    }
}
