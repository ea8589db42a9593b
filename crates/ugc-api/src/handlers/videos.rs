//! Video generation handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use validator::Validate;

use ugc_models::{ProductData, Video, VideoId, VideoStyle};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::services::{DownloadLink, ScriptCreated, ScriptOptions, VideoPage, VideoView};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateScriptRequest {
    pub product_data: ProductData,
    #[serde(default)]
    pub style: VideoStyle,
    #[serde(default)]
    pub options: ScriptOptions,
}

#[derive(Debug, Deserialize)]
pub struct EditScriptRequest {
    pub script: String,
}

#[derive(Debug, Deserialize)]
pub struct ListVideosQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_page() -> u32 {
    1
}

fn default_limit() -> u32 {
    20
}

/// Acknowledgement for state-changing operations.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoActionResponse {
    pub success: bool,
    pub video: Video,
}

impl From<Video> for VideoActionResponse {
    fn from(video: Video) -> Self {
        Self {
            success: true,
            video,
        }
    }
}

/// POST /api/videos/generate-script
pub async fn generate_script(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<GenerateScriptRequest>,
) -> ApiResult<(StatusCode, Json<ScriptCreated>)> {
    request
        .product_data
        .validate()
        .map_err(|e| ApiError::validation(e.to_string()))?;
    if let Some(duration) = request.options.target_duration {
        if !(5..=60).contains(&duration) {
            return Err(ApiError::validation("targetDuration must be between 5 and 60 seconds"));
        }
    }

    let created = state
        .generation
        .generate_script(&user.uid, request.product_data, request.style, request.options)
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// PUT /api/videos/:video_id/script
pub async fn edit_script(
    State(state): State<AppState>,
    user: AuthUser,
    Path(video_id): Path<String>,
    Json(request): Json<EditScriptRequest>,
) -> ApiResult<Json<VideoActionResponse>> {
    let video = state
        .generation
        .edit_script(&user.uid, &VideoId::from_string(video_id), &request.script)
        .await?;
    Ok(Json(video.into()))
}

/// POST /api/videos/:video_id/confirm
pub async fn confirm_video(
    State(state): State<AppState>,
    user: AuthUser,
    Path(video_id): Path<String>,
) -> ApiResult<(StatusCode, Json<VideoActionResponse>)> {
    let video = state
        .generation
        .confirm(&user.uid, &VideoId::from_string(video_id))
        .await?;
    Ok((StatusCode::ACCEPTED, Json(video.into())))
}

/// POST /api/videos/:video_id/retry
pub async fn retry_video(
    State(state): State<AppState>,
    user: AuthUser,
    Path(video_id): Path<String>,
) -> ApiResult<(StatusCode, Json<VideoActionResponse>)> {
    let video = state
        .generation
        .retry(&user.uid, &VideoId::from_string(video_id))
        .await?;
    Ok((StatusCode::ACCEPTED, Json(video.into())))
}

/// DELETE /api/videos/:video_id
pub async fn cancel_video(
    State(state): State<AppState>,
    user: AuthUser,
    Path(video_id): Path<String>,
) -> ApiResult<Json<VideoActionResponse>> {
    let video = state
        .generation
        .cancel(&user.uid, &VideoId::from_string(video_id))
        .await?;
    Ok(Json(video.into()))
}

/// GET /api/videos/:video_id/download
pub async fn download_video(
    State(state): State<AppState>,
    user: AuthUser,
    Path(video_id): Path<String>,
) -> ApiResult<Json<DownloadLink>> {
    let link = state
        .generation
        .download(&user.uid, &VideoId::from_string(video_id))
        .await?;
    Ok(Json(link))
}

/// GET /api/videos/:video_id
pub async fn get_video(
    State(state): State<AppState>,
    user: AuthUser,
    Path(video_id): Path<String>,
) -> ApiResult<Json<VideoView>> {
    let view = state
        .generation
        .get(&user.uid, &VideoId::from_string(video_id))
        .await?;
    Ok(Json(view))
}

/// GET /api/videos
pub async fn list_videos(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ListVideosQuery>,
) -> ApiResult<Json<VideoPage>> {
    let page = state
        .generation
        .list(&user.uid, query.page, query.limit)
        .await?;
    Ok(Json(page))
}
