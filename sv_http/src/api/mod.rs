use std::sync::Arc;

use aide::axum::IntoApiResponse;
use aide::axum::routing::{get, get_with};
use aide::openapi::OpenApi;
use aide::scalar::Scalar;
use aide::transform::TransformOpenApi;
use axum::response::IntoResponse;
use axum::{Extension, Router};

use crate::api::error::ApiResponseError;
use crate::api::extractor::Json;
use crate::config::SharedConfig;
use sv_system::VoiceSystemHandle;

pub mod device;
pub mod error;
mod extractor;
pub mod ws;

pub type ApiRouter<S = ()> = aide::axum::ApiRouter<S>;
pub type ApiResult<T, E = error::ApiError> = Result<T, E>;

#[derive(Clone)]
pub struct AppState {
    pub(crate) config: SharedConfig,
    pub(crate) system: VoiceSystemHandle,
}

/// Root router: the documented REST surface under `/api`, and the device
/// WebSocket endpoint at `/ws`.
pub fn config(_app_state: AppState) -> Router<AppState> {
    aide::r#gen::on_error(|error| {
        tracing::error!(?error, "Aide Error");
    });

    aide::r#gen::extract_schemas(true);
    let mut api = OpenApi::default();

    let base_router = ApiRouter::new()
        .nest_api_service("/docs", docs_routes())
        .merge(device::routes::config());

    ApiRouter::new()
        .nest("/api", base_router)
        .route("/ws", axum::routing::get(ws::ws_handler))
        .finish_api_with(&mut api, api_docs)
        .layer(Extension(Arc::new(api)))
}

pub fn docs_routes() -> ApiRouter {
    aide::r#gen::infer_responses(true);

    let router: ApiRouter = ApiRouter::new()
        .api_route(
            "/",
            get_with(
                Scalar::new("/api/docs/api.json")
                    .with_title("SproutVoice")
                    .axum_handler(),
                |op| op.description("This documentation page."),
            ),
        )
        .route("/api.json", get(serve_docs));

    aide::r#gen::infer_responses(false);

    router
}

async fn serve_docs(Extension(api): Extension<Arc<OpenApi>>) -> impl IntoApiResponse {
    Json(api).into_response()
}

fn api_docs(api: TransformOpenApi) -> TransformOpenApi {
    api.title("SproutVoice")
        .summary("Voice-interaction server for speech-enabled smart speakers")
        .default_response_with::<Json<ApiResponseError<()>>, _>(|res| {
            res.example(ApiResponseError {
                code: 500,
                message: "An error occurred".to_string(),
                details: None,
            })
        })
}
