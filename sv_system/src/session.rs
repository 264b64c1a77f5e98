//! Per-device session state.
//!
//! A session is owned by exactly one inbound frame loop plus the detached
//! tasks it launches. The small state struct sits behind a synchronous
//! mutex that is never held across an await, which is what lets gate flags
//! be written before the first suspension of whichever handler sets them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::audio::AudioBuffer;
use crate::data::PendingAction;
use crate::protocol::{PlayingState, Request, Response};

/// The listening state machine. `Idle` is the only resting state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListenState {
    #[default]
    Idle,
    Woken,
    Listening,
    Processing,
    Responding,
}

/// Abort a stored timer/task handle, if any. Aborting is the normal
/// cancellation signal, never an error.
pub(crate) fn cancel_task(slot: &mut Option<JoinHandle<()>>) {
    if let Some(handle) = slot.take() {
        handle.abort();
    }
}

#[derive(Debug, Default)]
pub(crate) struct SessionState {
    pub listen: ListenState,
    pub playing: PlayingState,
    /// Present only between a wake and the end of that recording round.
    pub audio: Option<AudioBuffer>,
    /// Last non-empty streaming ASR partial.
    pub instruction_text: Option<String>,
    pub instruction_timer: Option<JoinHandle<()>>,
    pub wake_timeout: Option<JoinHandle<()>>,
    pub auto_play: Option<JoinHandle<()>>,
    /// Latest detached pipeline task, aborted on teardown.
    pub pipeline_task: Option<JoinHandle<()>>,
    /// Outstanding `start_recording` request, for the failure rollback.
    pub start_recording_id: Option<String>,
    pub pending_action: Option<PendingAction>,
    /// Content most recently dispatched for playback.
    pub current_content_id: Option<i64>,
}

/// One live device connection.
pub struct DeviceSession {
    pub device_id: String,
    outbound: mpsc::Sender<String>,
    reply_timeout: Duration,
    state: Mutex<SessionState>,
    pending_replies: Mutex<HashMap<String, oneshot::Sender<Response>>>,
    pipeline_active: AtomicBool,
    queue_active: AtomicBool,
    instruction_dispatched: AtomicBool,
    closed: AtomicBool,
}

impl DeviceSession {
    pub fn new(device_id: String, outbound: mpsc::Sender<String>, reply_timeout: Duration) -> Self {
        Self {
            device_id,
            outbound,
            reply_timeout,
            state: Mutex::default(),
            pending_replies: Mutex::default(),
            pipeline_active: AtomicBool::new(false),
            queue_active: AtomicBool::new(false),
            instruction_dispatched: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().expect("session state poisoned")
    }

    pub fn listen_state(&self) -> ListenState {
        self.state().listen
    }

    pub fn playing_state(&self) -> PlayingState {
        self.state().playing
    }

    pub fn pipeline_active(&self) -> bool {
        self.pipeline_active.load(Ordering::SeqCst)
    }

    pub fn set_pipeline_active(&self, active: bool) {
        self.pipeline_active.store(active, Ordering::SeqCst);
    }

    pub fn queue_active(&self) -> bool {
        self.queue_active.load(Ordering::SeqCst)
    }

    pub fn set_queue_active(&self, active: bool) {
        self.queue_active.store(active, Ordering::SeqCst);
    }

    pub fn instruction_dispatched(&self) -> bool {
        self.instruction_dispatched.load(Ordering::SeqCst)
    }

    pub fn set_instruction_dispatched(&self, dispatched: bool) {
        self.instruction_dispatched.store(dispatched, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Serialize and queue a request. Failures are logged and do not close
    /// the session; disconnection surfaces through the transport itself.
    /// After teardown this is a silent no-op.
    pub async fn send(&self, request: &Request) {
        if self.is_closed() {
            return;
        }
        tracing::debug!(
            device_id = %self.device_id,
            command = %request.command,
            "sending request"
        );
        if let Err(error) = self.outbound.send(request.to_frame()).await {
            tracing::error!(device_id = %self.device_id, %error, "failed to send request");
        }
    }

    /// Send a request and wait for the matching reply.
    ///
    /// The reply slot is registered before the transport write so a fast
    /// device cannot answer into the void, and removed on every exit path.
    /// A timeout yields `None`, never an error.
    pub async fn request_reply(&self, request: Request) -> Option<Response> {
        let (sender, receiver) = oneshot::channel();
        self.pending_replies()
            .insert(request.id.clone(), sender);

        self.send(&request).await;

        let result = tokio::time::timeout(self.reply_timeout, receiver).await;
        self.pending_replies().remove(&request.id);

        match result {
            Ok(Ok(response)) => Some(response),
            // Sender dropped: the session was torn down underneath us.
            Ok(Err(_)) => None,
            Err(_) => {
                tracing::warn!(
                    device_id = %self.device_id,
                    request_id = %request.id,
                    "device reply timed out"
                );
                None
            }
        }
    }

    /// Resolve the reply future waiting on `response.id`, if any.
    pub fn complete_reply(&self, response: Response) {
        if let Some(sender) = self.pending_replies().remove(&response.id) {
            let _ = sender.send(response);
        }
    }

    /// Consume the pending confirmation slot: `Some` only when one is
    /// installed and still fresh; an expired slot is dropped on the way out.
    pub fn take_valid_pending_action(&self) -> Option<PendingAction> {
        let mut state = self.state();
        match state.pending_action.take() {
            Some(action) if !action.is_expired() => Some(action),
            Some(action) => {
                tracing::debug!(
                    device_id = %self.device_id,
                    action = %action.action_type,
                    "pending action expired"
                );
                None
            }
            None => None,
        }
    }

    /// Tear the session down: cancel every timer and detached task, release
    /// the audio buffer, drop the pending action and fail out all pending
    /// replies.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut state = self.state();
        cancel_task(&mut state.wake_timeout);
        cancel_task(&mut state.instruction_timer);
        cancel_task(&mut state.auto_play);
        cancel_task(&mut state.pipeline_task);
        state.audio = None;
        state.instruction_text = None;
        state.pending_action = None;
        drop(state);

        self.pending_replies().clear();
        tracing::debug!(device_id = %self.device_id, "session closed");
    }

    /// Live reply futures, for leak accounting.
    pub fn pending_reply_count(&self) -> usize {
        self.pending_replies().len()
    }

    /// Timer/task slots still holding a handle, for leak accounting.
    pub fn open_task_count(&self) -> usize {
        let state = self.state();
        [
            &state.wake_timeout,
            &state.instruction_timer,
            &state.auto_play,
            &state.pipeline_task,
        ]
        .into_iter()
        .filter(|slot| slot.is_some())
        .count()
    }

    fn pending_replies(&self) -> MutexGuard<'_, HashMap<String, oneshot::Sender<Response>>> {
        self.pending_replies.lock().expect("pending replies poisoned")
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> (DeviceSession, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(16);
        (
            DeviceSession::new("dev".to_string(), tx, Duration::from_secs(10)),
            rx,
        )
    }

    #[tokio::test]
    async fn reply_resolves_a_waiting_request() {
        let (session, mut rx) = session();
        let session = std::sync::Arc::new(session);
        let request = Request::get_version();
        let id = request.id.clone();

        let waiter = tokio::spawn({
            let session = session.clone();
            async move { session.request_reply(request).await }
        });

        // The request reaches the transport only after the slot exists.
        let frame = rx.recv().await.unwrap();
        assert!(frame.contains("get_version"));
        assert_eq!(session.pending_reply_count(), 1);

        session.complete_reply(Response {
            id: id.clone(),
            code: Some(0),
            msg: None,
            data: None,
        });

        let reply = waiter.await.unwrap().unwrap();
        assert_eq!(reply.id, id);
        assert!(reply.is_success());
        assert_eq!(session.pending_reply_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reply_timeout_returns_none_and_cleans_the_slot() {
        let (session, _rx) = session();
        let result = session.request_reply(Request::get_version()).await;
        assert_eq!(result, None);
        assert_eq!(session.pending_reply_count(), 0);
    }

    #[tokio::test]
    async fn close_clears_replies_and_silences_sends() {
        let (session, mut rx) = session();
        session
            .pending_replies()
            .insert("r1".to_string(), oneshot::channel().0);

        session.close();
        assert_eq!(session.pending_reply_count(), 0);
        assert_eq!(session.open_task_count(), 0);

        // Writes after close are no-ops.
        session.send(&Request::pause()).await;
        assert!(rx.try_recv().is_err());
    }
}
