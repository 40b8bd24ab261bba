use crate::AppState;
use crate::api::error::AppError;
use crate::error::MergeError;
use crate::models::{
    FoldOptions, MergeOptions, MergeOutcome, SessionResponse, StagedFileResponse, UploadResponse,
};
use crate::utils::validation::FALLBACK_NAME;
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::TryStreamExt;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Deserialize;
use tokio_util::io::{ReaderStream, StreamReader};
use uuid::Uuid;

#[derive(Debug, Default, Deserialize)]
pub struct UploadQuery {
    pub skip_page_count: Option<bool>,
}

fn body_error(e: impl std::fmt::Display) -> AppError {
    let err_msg = e.to_string();
    if err_msg.contains("length limit exceeded") {
        AppError::PayloadTooLarge("Request body exceeds the maximum allowed limit".to_string())
    } else {
        AppError::BadRequest(err_msg)
    }
}

#[utoipa::path(
    post,
    path = "/sessions",
    responses(
        (status = 201, description = "Session created", body = SessionResponse)
    ),
    tag = "sessions"
)]
pub async fn create_session(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<SessionResponse>), AppError> {
    let id = state.sessions.create(&state.config.staging_dir)?;
    let session = state.sessions.acquire(id)?;
    Ok((StatusCode::CREATED, Json(SessionResponse::from(&*session))))
}

#[utoipa::path(
    get,
    path = "/sessions/{id}",
    params(
        ("id" = Uuid, Path, description = "Session ID")
    ),
    responses(
        (status = 200, description = "Staged files, accumulator and last outcome", body = SessionResponse),
        (status = 404, description = "Session not found"),
        (status = 409, description = "Another operation is running on the session")
    ),
    tag = "sessions"
)]
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionResponse>, AppError> {
    let session = state.sessions.acquire(id)?;
    Ok(Json(SessionResponse::from(&*session)))
}

#[utoipa::path(
    delete,
    path = "/sessions/{id}",
    params(
        ("id" = Uuid, Path, description = "Session ID")
    ),
    responses(
        (status = 204, description = "Session and all its temporary files deleted"),
        (status = 404, description = "Session not found"),
        (status = 409, description = "Another operation is running on the session")
    ),
    tag = "sessions"
)]
pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.sessions.remove(id)?;
    tracing::info!("🧹 Session {} deleted", id);
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/sessions/{id}/files",
    request_body(content = Multipart, description = "One or more `file` fields"),
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ("skip_page_count" = Option<bool>, Query, description = "Do not open uploads to count pages")
    ),
    responses(
        (status = 200, description = "Files staged", body = UploadResponse),
        (status = 400, description = "No file provided"),
        (status = 404, description = "Session not found"),
        (status = 413, description = "File too large; nothing from the request is kept")
    ),
    tag = "sessions"
)]
pub async fn upload_files(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<UploadQuery>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut session = state.sessions.acquire(id)?;
    let mut staged_ids = Vec::new();

    let received: Result<(), AppError> = async {
        while let Some(field) = multipart.next_field().await.map_err(body_error)? {
            if field.name() != Some("file") {
                continue;
            }

            let original_filename = field.file_name().unwrap_or(FALLBACK_NAME).to_string();
            let body_with_io_error = field.map_err(std::io::Error::other);
            let reader = StreamReader::new(body_with_io_error);

            let staged_id = state
                .merges
                .stage(
                    &mut session,
                    &original_filename,
                    reader,
                    query.skip_page_count,
                )
                .await
                .map_err(|e| match e {
                    MergeError::Io(io) if io.to_string().contains("length limit exceeded") => {
                        body_error(io)
                    }
                    other => AppError::from(other),
                })?;
            staged_ids.push(staged_id);
        }
        Ok(())
    }
    .await;

    // A request stages all of its files or none of them
    if let Err(e) = received {
        for file_id in &staged_ids {
            session.remove_staged(*file_id);
        }
        if !staged_ids.is_empty() {
            tracing::warn!(
                "Upload to session {} failed, discarded {} file(s) staged by the same request",
                id,
                staged_ids.len()
            );
        }
        return Err(e);
    }

    if staged_ids.is_empty() {
        return Err(AppError::BadRequest("No file provided".to_string()));
    }

    let files = session
        .staged
        .iter()
        .filter(|f| staged_ids.contains(&f.id))
        .map(StagedFileResponse::from)
        .collect();

    Ok(Json(UploadResponse { files }))
}

#[utoipa::path(
    delete,
    path = "/sessions/{id}/files/{file_id}",
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ("file_id" = Uuid, Path, description = "Staged file ID")
    ),
    responses(
        (status = 200, description = "File removed", body = SessionResponse),
        (status = 404, description = "Session or file not found")
    ),
    tag = "sessions"
)]
pub async fn remove_file(
    State(state): State<AppState>,
    Path((id, file_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<SessionResponse>, AppError> {
    let mut session = state.sessions.acquire(id)?;
    state
        .merges
        .remove_staged(&mut session, file_id)
        .ok_or_else(|| AppError::NotFound(format!("staged file {} not found", file_id)))?;
    Ok(Json(SessionResponse::from(&*session)))
}

#[utoipa::path(
    post,
    path = "/sessions/{id}/fold",
    request_body(content = FoldOptions, description = "Optional order and strategy"),
    params(
        ("id" = Uuid, Path, description = "Session ID")
    ),
    responses(
        (status = 200, description = "Staged files merged into the accumulator", body = SessionResponse),
        (status = 400, description = "A staged file could not be merged"),
        (status = 409, description = "Merge blocked or session busy")
    ),
    tag = "sessions"
)]
pub async fn fold_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    options: Option<Json<FoldOptions>>,
) -> Result<Json<SessionResponse>, AppError> {
    let mut session = state.sessions.acquire(id)?;
    let options = options.map(|Json(o)| o).unwrap_or_default();
    state.merges.fold(&mut session, options).await?;
    Ok(Json(SessionResponse::from(&*session)))
}

#[utoipa::path(
    post,
    path = "/sessions/{id}/merge",
    request_body = MergeOptions,
    params(
        ("id" = Uuid, Path, description = "Session ID")
    ),
    responses(
        (status = 200, description = "Merged and delivered", body = MergeOutcome),
        (status = 400, description = "Invalid options, nothing to merge or unreadable input"),
        (status = 409, description = "Merge blocked or session busy")
    ),
    tag = "sessions"
)]
pub async fn merge_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(options): Json<MergeOptions>,
) -> Result<Json<MergeOutcome>, AppError> {
    let mut session = state.sessions.acquire(id)?;
    let outcome = state.merges.finalize(&mut session, options).await?;
    Ok(Json(outcome))
}

#[utoipa::path(
    get,
    path = "/sessions/{id}/artifacts/{name}",
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ("name" = String, Path, description = "Artifact name, e.g. merged.pdf or merged.part01")
    ),
    responses(
        (status = 200, description = "Artifact stream"),
        (status = 404, description = "Session or artifact not found")
    ),
    tag = "sessions"
)]
pub async fn download_artifact(
    State(state): State<AppState>,
    Path((id, name)): Path<(Uuid, String)>,
) -> Result<Response, AppError> {
    let (file, content_type, size) = {
        let session = state.sessions.acquire(id)?;
        let artifact = session
            .artifact(&name)
            .ok_or_else(|| AppError::NotFound(format!("artifact '{}' not found", name)))?;
        let file = tokio::fs::File::open(&artifact.path)
            .await
            .map_err(MergeError::Io)?;
        (file, artifact.content_type.to_string(), artifact.size)
    };

    let ascii_filename = name
        .chars()
        .filter(|c| c.is_ascii() && !c.is_control() && *c != '"' && *c != '\\' && *c != ';')
        .take(64)
        .collect::<String>();
    let fallback_filename = if ascii_filename.is_empty() {
        "file"
    } else {
        &ascii_filename
    };
    let encoded_filename = utf8_percent_encode(&name, NON_ALPHANUMERIC).to_string();
    let content_disposition = format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback_filename, encoded_filename
    );

    let body = Body::from_stream(ReaderStream::new(file));

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_LENGTH, size.to_string()),
            (header::CONTENT_DISPOSITION, content_disposition),
        ],
        body,
    )
        .into_response())
}
