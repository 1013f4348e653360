//! HTTP API server.
//!
//! Runs the worker pool and reconciler in the same process and exposes the
//! trigger surface over REST.

use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::error::HarkError;
use crate::orchestrator::Orchestrator;
use crate::pipeline::ProcessingStatus;
use crate::store::{Episode, Podcast};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::error;

/// Shared application state.
struct AppState {
    orchestrator: Orchestrator,
}

/// Run the HTTP API server.
pub async fn run_serve(host: &str, port: u16, settings: Settings) -> anyhow::Result<()> {
    if let Err(e) = preflight::check(Operation::Process, &settings) {
        Output::error(&format!("{}", e));
        Output::info("Run 'hark doctor' for detailed diagnostics.");
        return Err(e.into());
    }

    let orchestrator = Orchestrator::new(settings)?;
    let running = orchestrator.start();
    let cancel = running.cancel_token();

    let app = router(Arc::new(AppState { orchestrator }));

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    Output::header("Hark API Server");
    println!();
    Output::success(&format!("Listening on http://{}", addr));
    println!();
    println!("Endpoints:");
    Output::kv("Health", "GET  /health");
    Output::kv("Podcasts", "GET  /api/podcasts");
    Output::kv("Add podcast", "POST /api/podcasts");
    Output::kv("Podcast", "GET  /api/podcasts/{id}");
    Output::kv("Sync podcast", "POST /api/podcasts/{id}/sync");
    Output::kv("Retry episode", "POST /api/episodes/{id}/retry");
    Output::kv("Ask", "POST /api/qa/ask");
    Output::kv("Job status", "GET  /api/jobs/status");
    println!();
    Output::info("Press Ctrl+C to stop the server.");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = cancel.cancelled() => {}
            }
        })
        .await?;

    Output::info("Shutting down workers...");
    running.shutdown().await;
    Ok(())
}

fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/podcasts", get(list_podcasts).post(add_podcast))
        .route("/api/podcasts/{id}", get(get_podcast))
        .route("/api/podcasts/{id}/sync", post(sync_podcast))
        .route("/api/episodes/{id}/retry", post(retry_episode))
        .route("/api/qa/ask", post(ask))
        .route("/api/jobs/status", get(job_status))
        .layer(cors)
        .with_state(state)
}

// === Request/Response Types ===

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddPodcastRequest {
    feed_url: String,
    #[serde(default)]
    download_until: Option<NaiveDate>,
}

#[derive(Serialize)]
struct PodcastDetail {
    podcast: Podcast,
    episodes: Vec<Episode>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncResponse {
    job_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RetryResponse {
    episode_id: i64,
    status: ProcessingStatus,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AskRequest {
    podcast_id: i64,
    question: String,
}

#[derive(Deserialize)]
struct StatusQuery {
    limit: Option<usize>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Client errors carry their message; anything else is logged and
/// reported without detail.
fn error_response(e: HarkError) -> Response {
    let status = match &e {
        HarkError::NotFound(_) => StatusCode::NOT_FOUND,
        HarkError::AlreadyExists(_) => StatusCode::CONFLICT,
        HarkError::InvalidInput(_) | HarkError::InvalidTransition { .. } => {
            StatusCode::BAD_REQUEST
        }
        _ => {
            error!("Request failed: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "Internal server error".to_string(),
                }),
            )
                .into_response();
        }
    };
    (status, Json(ErrorResponse { error: e.to_string() })).into_response()
}

// === Handlers ===

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn list_podcasts(State(state): State<Arc<AppState>>) -> Response {
    match state.orchestrator.list_podcasts().await {
        Ok(podcasts) => Json(podcasts).into_response(),
        Err(e) => error_response(e),
    }
}

async fn add_podcast(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AddPodcastRequest>,
) -> Response {
    match state
        .orchestrator
        .add_podcast(&req.feed_url, req.download_until)
        .await
    {
        Ok(podcast) => (StatusCode::CREATED, Json(podcast)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_podcast(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> Response {
    match state.orchestrator.podcast(id).await {
        Ok((podcast, episodes)) => Json(PodcastDetail { podcast, episodes }).into_response(),
        Err(e) => error_response(e),
    }
}

async fn sync_podcast(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> Response {
    match state.orchestrator.sync_podcast(id).await {
        Ok(job_id) => (StatusCode::ACCEPTED, Json(SyncResponse { job_id })).into_response(),
        Err(e) => error_response(e),
    }
}

async fn retry_episode(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> Response {
    match state.orchestrator.retry_episode(id).await {
        Ok(status) => Json(RetryResponse {
            episode_id: id,
            status,
        })
        .into_response(),
        Err(e) => error_response(e),
    }
}

async fn ask(State(state): State<Arc<AppState>>, Json(req): Json<AskRequest>) -> Response {
    match state.orchestrator.ask(req.podcast_id, &req.question).await {
        Ok(answer) => Json(answer).into_response(),
        Err(e) => error_response(e),
    }
}

async fn job_status(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatusQuery>,
) -> Response {
    match state.orchestrator.status(query.limit).await {
        Ok(status) => Json(status).into_response(),
        Err(e) => error_response(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::ParsedFeed;
    use crate::testing::Rig;
    use crate::transcription::RawTranscript;

    fn state(rig: &Rig) -> Arc<AppState> {
        Arc::new(AppState {
            orchestrator: rig.orchestrator(),
        })
    }

    fn rig() -> Rig {
        Rig::new(
            ParsedFeed {
                title: Some("Harbour Talk".to_string()),
                ..Default::default()
            },
            RawTranscript::default(),
        )
    }

    #[tokio::test]
    async fn test_add_then_duplicate() {
        let rig = rig();
        let state = state(&rig);
        let request = || AddPodcastRequest {
            feed_url: "https://example.com/harbour.xml".to_string(),
            download_until: None,
        };

        let created = add_podcast(State(state.clone()), Json(request())).await;
        assert_eq!(created.status(), StatusCode::CREATED);

        let duplicate = add_podcast(State(state.clone()), Json(request())).await;
        assert_eq!(duplicate.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_unknown_ids_are_not_found() {
        let rig = rig();
        let state = state(&rig);

        assert_eq!(get_podcast(State(state.clone()), Path(9)).await.status(), StatusCode::NOT_FOUND);
        assert_eq!(sync_podcast(State(state.clone()), Path(9)).await.status(), StatusCode::NOT_FOUND);
        assert_eq!(retry_episode(State(state.clone()), Path(9)).await.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_ask_failure_hides_details() {
        let rig = rig();
        let state = state(&rig);
        let podcast = state
            .orchestrator
            .add_podcast("https://example.com/harbour.xml", None)
            .await
            .unwrap();
        rig.embedder.fail_next();

        let response = ask(
            State(state.clone()),
            Json(AskRequest {
                podcast_id: podcast.id,
                question: "Anything?".to_string(),
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_add_request_is_camel_case() {
        let req: AddPodcastRequest = serde_json::from_str(
            r#"{"feedUrl":"https://example.com/feed.xml","downloadUntil":"2024-01-31"}"#,
        )
        .unwrap();
        assert_eq!(req.feed_url, "https://example.com/feed.xml");
        assert_eq!(req.download_until, NaiveDate::from_ymd_opt(2024, 1, 31));
    }
}
