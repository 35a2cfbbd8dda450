//! Stream management routes.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{delete, get, patch, post, put},
};

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::{
    CreateDestinationRequest, CreateStreamRequest, DestinationResponse, StreamResponse,
    UpdateDestinationRequest, UpdateStreamRequest,
};
use crate::api::server::AppState;
use crate::domain::{Destination, Stream};
use crate::manager::DestinationUpdate;

/// Create the streams router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_stream))
        .route("/", get(list_streams))
        .route("/{id}", get(get_stream))
        .route("/{id}", put(update_stream))
        .route("/{id}", delete(delete_stream))
        .route("/{id}/start", post(start_stream))
        .route("/{id}/stop", post(stop_stream))
        .route("/{id}/thumbnail", get(get_thumbnail))
        .route("/{id}/destinations", post(add_destination))
        .route("/{id}/destinations/{destination_id}", patch(update_destination))
        .route("/{id}/destinations/{destination_id}", delete(remove_destination))
        .route(
            "/{id}/destinations/{destination_id}/restart",
            post(restart_destination),
        )
}

/// Convert a stream to its response, attaching relay runtime status.
fn stream_to_response(state: &AppState, stream: &Stream) -> StreamResponse {
    let mut response =
        StreamResponse::from_domain(stream, state.ingest.public_ingest_url(&stream.api_key));
    response.destinations = stream
        .destinations
        .iter()
        .map(|dest| {
            DestinationResponse::from_domain(dest)
                .with_relay(state.supervisor.relay_status(&stream.id, &dest.id))
        })
        .collect();
    response
}

pub async fn create_stream(
    State(state): State<AppState>,
    Json(request): Json<CreateStreamRequest>,
) -> ApiResult<(StatusCode, Json<StreamResponse>)> {
    let stream = state.manager.create_stream(&request.name).await?;
    Ok((StatusCode::CREATED, Json(stream_to_response(&state, &stream))))
}

pub async fn list_streams(State(state): State<AppState>) -> ApiResult<Json<Vec<StreamResponse>>> {
    let streams = state.manager.list_streams().await?;
    let responses = streams
        .iter()
        .map(|stream| stream_to_response(&state, stream))
        .collect();
    Ok(Json(responses))
}

pub async fn get_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<StreamResponse>> {
    let stream = state.manager.get_stream(&id).await?;
    Ok(Json(stream_to_response(&state, &stream)))
}

pub async fn update_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateStreamRequest>,
) -> ApiResult<Json<StreamResponse>> {
    let stream = state
        .manager
        .update_stream(&id, request.name, request.ffmpeg_flags)
        .await?;
    Ok(Json(stream_to_response(&state, &stream)))
}

pub async fn delete_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.manager.delete_stream(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn start_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<StreamResponse>> {
    let stream = state.manager.start_stream(&id).await?;
    Ok(Json(stream_to_response(&state, &stream)))
}

pub async fn stop_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<StreamResponse>> {
    let stream = state.manager.stop_stream(&id).await?;
    Ok(Json(stream_to_response(&state, &stream)))
}

pub async fn get_thumbnail(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    // Verify the stream exists before disclosing anything about files.
    state.manager.get_stream(&id).await?;

    let bytes = state
        .thumbnails
        .get_thumbnail(&id)
        .await
        .ok_or_else(|| ApiError::not_found("thumbnail not available"))?;

    Ok((
        [
            (header::CONTENT_TYPE, "image/png"),
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
        ],
        bytes,
    ))
}

pub async fn add_destination(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<CreateDestinationRequest>,
) -> ApiResult<(StatusCode, Json<StreamResponse>)> {
    let mut destination = Destination::new(request.platform, request.server_url, request.stream_key);
    destination.enabled = request.enabled;
    destination.ffmpeg_flags = request.ffmpeg_flags;

    let stream = state.manager.add_destination(&id, destination).await?;
    Ok((StatusCode::CREATED, Json(stream_to_response(&state, &stream))))
}

pub async fn update_destination(
    State(state): State<AppState>,
    Path((id, destination_id)): Path<(String, String)>,
    Json(request): Json<UpdateDestinationRequest>,
) -> ApiResult<Json<StreamResponse>> {
    let update = DestinationUpdate {
        platform: request.platform,
        server_url: request.server_url,
        stream_key: request.stream_key,
        enabled: request.enabled,
        ffmpeg_flags: request.ffmpeg_flags,
    };
    let stream = state
        .manager
        .update_destination(&id, &destination_id, update)
        .await?;
    Ok(Json(stream_to_response(&state, &stream)))
}

pub async fn remove_destination(
    State(state): State<AppState>,
    Path((id, destination_id)): Path<(String, String)>,
) -> ApiResult<Json<StreamResponse>> {
    let stream = state.manager.remove_destination(&id, &destination_id).await?;
    Ok(Json(stream_to_response(&state, &stream)))
}

pub async fn restart_destination(
    State(state): State<AppState>,
    Path((id, destination_id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    state
        .manager
        .restart_destination(&id, &destination_id)
        .await?;
    Ok(StatusCode::ACCEPTED)
}
