//! HTTP server for the reply and synthesis boundaries

pub mod health;
pub mod reply;
pub mod tts;

use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ServeConfig;
use crate::providers::{ChatClient, SpeechToText, TextToSpeech};
use crate::Result;

/// Shared state for the boundary handlers
pub struct ApiState {
    pub stt: SpeechToText,
    pub chat: ChatClient,
    pub tts: TextToSpeech,
}

impl ApiState {
    /// Build the upstream clients from configuration.
    #[must_use]
    pub fn new(config: ServeConfig) -> Self {
        let api_key = Arc::new(config.api_key);
        Self {
            stt: SpeechToText::new(Arc::clone(&api_key), config.stt_model),
            chat: ChatClient::new(Arc::clone(&api_key), config.chat_model),
            tts: TextToSpeech::new(api_key, config.tts_model, config.tts_voice),
        }
    }
}

/// Build the full router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .merge(health::router())
        .merge(reply::router(Arc::clone(&state)))
        .merge(tts::router(state))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

/// Run the boundary server until the process is stopped.
///
/// # Errors
///
/// Returns an error if the port cannot be bound.
pub async fn serve(config: ServeConfig, port: u16) -> Result<()> {
    let state = Arc::new(ApiState::new(config));
    let app = router(state);

    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "boundary server listening");

    axum::serve(listener, app).await?;
    Ok(())
}
