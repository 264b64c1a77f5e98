use std::sync::Arc;
use std::time::Duration;

use axum::error_handling::HandleErrorLayer;
use axum::http::StatusCode;
use axum::{BoxError, Router};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;

use crate::api::AppState;
use crate::config::{Config, SharedConfig};
use sv_system::nlu::RuleNlu;
use sv_system::services::{
    HttpAsr, HttpLlm, HttpTts, LlmService, MemoryCatalog, MemoryConversationStore,
    MemoryQueueStore,
};
use sv_system::{Collaborators, VoiceSystem, VoiceSystemHandle};

pub struct Application {
    pub tcp: TcpListener,
    pub config: SharedConfig,
    pub system: VoiceSystemHandle,
}

impl Application {
    #[tracing::instrument(name = "Create application", skip(config), fields(addr = config.app.host, port = config.app.port))]
    pub async fn new(config: Config) -> eyre::Result<Self> {
        let tcp = TcpListener::bind(config.app.bind_address()).await?;
        let config = Arc::new(config);

        let asr = Arc::new(HttpAsr::new(config.asr.clone())?);
        let tts = Arc::new(HttpTts::new(config.tts.clone())?);
        let llm: Arc<dyn LlmService> = Arc::new(HttpLlm::new(config.llm.clone())?);
        let nlu = Arc::new(RuleNlu::new(Some(llm.clone())));

        // The catalog/queue/conversation stores live in memory; a deployment
        // with external stores swaps these behind the same ports.
        let catalog = Arc::new(MemoryCatalog::new());
        let queue = Arc::new(MemoryQueueStore::new());
        let conversation = Arc::new(MemoryConversationStore::new());

        let system = Arc::new(VoiceSystem::new(
            config.core.clone(),
            Collaborators {
                asr,
                nlu,
                tts,
                llm,
                catalog,
                queue,
                conversation,
            },
        ));

        Ok(Application {
            tcp,
            config,
            system,
        })
    }

    /// Start running the Axum server, consuming `Application`.
    /// The future completes when the Tokio-Runtime has been shut down (due to f.e a SIGINT).
    ///
    /// # Arguments
    ///
    /// * `quitter` - A way to inform the spawned runtime to shut down. Especially useful for tests
    ///   where we won't provide a signal for shutdown.
    pub async fn run(self, quitter: Arc<tokio::sync::Notify>) -> eyre::Result<()> {
        tracing::info!("Setup complete, starting server...");

        let app = construct_server(self.config.clone(), self.system.clone()).await?;

        tracing::info!("Listening on {:?}", self.tcp.local_addr()?);

        let server = axum::serve(self.tcp, app.into_make_service());

        let result = tokio::select! {
            _ = quitter.notified() => Ok(()),
            res = tokio::signal::ctrl_c() => {
                tracing::trace!("Received CTRL-C notification, exiting...");
                quitter.notify_waiters();
                res.map_err(|e| eyre::eyre!(e))
            },
            res = server => res.map_err(|e| eyre::eyre!(e))
        };

        self.system.shutdown().await;

        result
    }
}

async fn construct_server(config: SharedConfig, system: VoiceSystemHandle) -> eyre::Result<Router> {
    let state = AppState { config, system };

    let app_layers = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new().br(true).gzip(true).deflate(true));

    let app = crate::api::config(state.clone())
        .layer(app_layers)
        .with_state(state);

    Ok(apply_security_middleware(app))
}

fn apply_security_middleware(router: Router) -> Router {
    let security = ServiceBuilder::new()
        .layer(HandleErrorLayer::new(generic_error_handler))
        .load_shed()
        .concurrency_limit(512)
        .layer(tower_http::timeout::TimeoutLayer::new(Duration::from_secs(60)));

    router.layer(security)
}

async fn generic_error_handler(_error: BoxError) -> impl axum::response::IntoResponse {
    tracing::trace!(error=?_error, "Error occurred in normal response handler");
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal Error")
}
