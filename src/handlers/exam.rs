// src/handlers/exam.rs

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use validator::Validate;

use crate::{
    error::{AppError, SubmitError},
    models::attempt::SubmitTrigger,
    session::{handle::SessionHandle, integrity::Violation},
    state::AppState,
    store::SessionKey,
    utils::jwt::Claims,
};

#[derive(Debug, Deserialize, Validate)]
pub struct SelectOptionRequest {
    #[validate(range(min = 1, message = "question_id must be positive."))]
    pub question_id: i64,
    #[validate(range(min = 0, max = 64, message = "option_index is out of range."))]
    pub option_index: i64,
}

#[derive(Debug, Deserialize)]
pub struct ViolationRequest {
    pub kind: Violation,
}

#[derive(Debug, Deserialize)]
pub struct ConnectivityRequest {
    pub online: bool,
}

fn session_key(quiz_id: i64, claims: &Claims) -> Result<SessionKey, AppError> {
    Ok(SessionKey::new(quiz_id, claims.user_id()?))
}

/// Looks up the caller's live session for `quiz_id`.
async fn live_session(
    state: &AppState,
    quiz_id: i64,
    claims: &Claims,
) -> Result<Arc<SessionHandle>, AppError> {
    let key = session_key(quiz_id, claims)?;
    state.sessions.get(key).await.ok_or_else(|| {
        AppError::NotFound(format!(
            "No exam in progress for quiz {}. Start the exam first.",
            quiz_id
        ))
    })
}

/// Opens a new attempt or resumes the stored one.
///
/// Resuming restores the answers and timer from the latest saved progress,
/// so a reload never restarts the clock.
pub async fn start_exam(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(quiz_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let key = session_key(quiz_id, &claims)?;
    let handle = state
        .sessions
        .open(&state.deps(), key, claims.name.clone())
        .await?;

    Ok(Json(handle.view().await))
}

pub async fn get_session(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(quiz_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let handle = live_session(&state, quiz_id, &claims).await?;
    Ok(Json(handle.view().await))
}

pub async fn select_option(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(quiz_id): Path<i64>,
    Json(payload): Json<SelectOptionRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let handle = live_session(&state, quiz_id, &claims).await?;
    let selection = handle
        .select_option(payload.question_id, payload.option_index as usize)
        .await?;

    Ok(Json(json!({
        "question_id": payload.question_id,
        "selected": selection,
    })))
}

pub async fn toggle_flag(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((quiz_id, question_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, AppError> {
    let handle = live_session(&state, quiz_id, &claims).await?;
    let flagged = handle.toggle_flag(question_id).await?;
    Ok(Json(json!({ "question_id": question_id, "flagged": flagged })))
}

pub async fn toggle_bookmark(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((quiz_id, question_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, AppError> {
    let handle = live_session(&state, quiz_id, &claims).await?;
    let bookmarked = handle.toggle_bookmark(question_id).await?;
    Ok(Json(json!({ "question_id": question_id, "bookmarked": bookmarked })))
}

pub async fn toggle_review(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((quiz_id, question_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, AppError> {
    let handle = live_session(&state, quiz_id, &claims).await?;
    let marked = handle.toggle_mark_for_review(question_id).await?;
    Ok(Json(json!({ "question_id": question_id, "marked_for_review": marked })))
}

pub async fn visit_question(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((quiz_id, question_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, AppError> {
    let handle = live_session(&state, quiz_id, &claims).await?;
    let first_visit = handle.visit(question_id).await?;
    Ok(Json(json!({ "question_id": question_id, "first_visit": first_visit })))
}

/// Records an integrity violation. The response carries the warning to show
/// and, once the threshold is reached, the forced submission's receipt.
pub async fn report_violation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(quiz_id): Path<i64>,
    Json(payload): Json<ViolationRequest>,
) -> Result<impl IntoResponse, AppError> {
    let handle = live_session(&state, quiz_id, &claims).await?;
    let report = handle.report_violation(payload.kind).await;
    if report.receipt.is_some() {
        state.sessions.remove(handle.key()).await;
    }
    Ok(Json(report))
}

pub async fn report_connectivity(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(quiz_id): Path<i64>,
    Json(payload): Json<ConnectivityRequest>,
) -> Result<impl IntoResponse, AppError> {
    let handle = live_session(&state, quiz_id, &claims).await?;
    let changed = handle.set_online(payload.online).await;
    let view = handle.view().await;

    Ok(Json(json!({
        "online": payload.online,
        "changed": changed,
        "paused": view.paused,
        "remaining_secs": view.remaining_secs,
    })))
}

/// Page teardown: persist the latest progress immediately.
pub async fn flush(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(quiz_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let handle = live_session(&state, quiz_id, &claims).await?;
    handle.flush().await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Manual submission. Failures keep the session open so the student can
/// retry; the body carries a `reason` code and a message to show.
pub async fn submit(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(quiz_id): Path<i64>,
) -> Result<impl IntoResponse, Response> {
    let handle = live_session(&state, quiz_id, &claims)
        .await
        .map_err(IntoResponse::into_response)?;
    let receipt = handle
        .submit(SubmitTrigger::Manual)
        .await
        .map_err(SubmitError::into_response)?;
    state.sessions.remove(handle.key()).await;
    Ok(Json(receipt))
}

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}
