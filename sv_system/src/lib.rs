//! Per-device voice-interaction coordination: the wire codec, session
//! registry, listening state machine, streaming-ASR debouncer, cloud
//! interception gate, auto-play scheduler and the speech pipeline.

use std::sync::Arc;

use crate::config::CoreConfig;
use crate::coordinator::Coordinator;
use crate::handlers::HandlerRouter;
use crate::manager::ConnectionManager;
use crate::pipeline::VoicePipeline;
use crate::services::{
    AsrService, ContentCatalog, ConversationStore, LlmService, PlayQueueStore, TtsService,
};

pub mod audio;
pub mod config;
pub mod coordinator;
pub mod data;
pub mod handlers;
pub mod manager;
pub mod nlu;
pub mod pipeline;
pub mod protocol;
pub mod services;
pub mod session;
mod error;

pub use crate::data::*;
pub use crate::error::ServiceError;

pub type VoiceSystemHandle = Arc<VoiceSystem>;

/// The downstream collaborators the core is wired to at startup.
///
/// Passed in explicitly: there is no module-level singleton to reach for,
/// which keeps tests and multi-instance embedding honest.
pub struct Collaborators {
    pub asr: Arc<dyn AsrService>,
    pub nlu: Arc<dyn crate::nlu::NluService>,
    pub tts: Arc<dyn TtsService>,
    pub llm: Arc<dyn LlmService>,
    pub catalog: Arc<dyn ContentCatalog>,
    pub queue: Arc<dyn PlayQueueStore>,
    pub conversation: Arc<dyn ConversationStore>,
}

/// Single place collating the session registry, the pipeline, and the
/// event coordinator.
pub struct VoiceSystem {
    config: Arc<CoreConfig>,
    manager: Arc<ConnectionManager>,
    pipeline: Arc<VoicePipeline>,
    coordinator: Coordinator,
}

impl VoiceSystem {
    pub fn new(config: CoreConfig, collaborators: Collaborators) -> Self {
        let config = Arc::new(config);
        let manager = Arc::new(ConnectionManager::new(config.clone()));

        let router = HandlerRouter::new(
            collaborators.catalog.clone(),
            collaborators.queue.clone(),
            collaborators.llm,
            collaborators.conversation,
        );
        let pipeline = Arc::new(VoicePipeline::new(
            collaborators.asr,
            collaborators.nlu,
            collaborators.tts,
            router,
            collaborators.queue,
            collaborators.catalog,
            config.clone(),
        ));

        let coordinator = Coordinator::new(manager.clone(), pipeline.clone(), config.clone());

        Self {
            config,
            manager,
            pipeline,
            coordinator,
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Advance a device's play queue and start the result, as if the user
    /// had asked for the next/previous track. Commands other than
    /// [`DeviceCommand::Next`] / [`DeviceCommand::Previous`] are ignored.
    ///
    /// Returns `false` when the device is not connected.
    pub async fn skip_track(&self, device_id: &str, command: DeviceCommand) -> bool {
        let Some(session) = self.manager.get(device_id).await else {
            tracing::warn!(device_id, "device not connected");
            return false;
        };
        self.pipeline.play_queue_track(&session, command).await;
        true
    }

    /// Tear down every live session.
    pub async fn shutdown(&self) {
        self.manager.shutdown().await;
    }
}
