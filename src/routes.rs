// src/routes.rs

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{handlers::exam, state::AppState, utils::jwt::auth_middleware};

/// Assembles the main application router.
///
/// * `/health` is public.
/// * Everything under `/api/exam/{quiz_id}` acts on the caller's session for
///   that quiz and requires a bearer token.
pub fn create_router(state: AppState) -> Router {
    let origins = [
        HeaderValue::from_static("http://localhost:3000"),
        HeaderValue::from_static("http://127.0.0.1:3000"),
    ];

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    let exam_routes = Router::new()
        .route("/", get(exam::get_session))
        .route("/start", post(exam::start_exam))
        .route("/answers", post(exam::select_option))
        .route("/questions/{question_id}/flag", post(exam::toggle_flag))
        .route("/questions/{question_id}/bookmark", post(exam::toggle_bookmark))
        .route("/questions/{question_id}/review", post(exam::toggle_review))
        .route("/questions/{question_id}/visit", post(exam::visit_question))
        .route("/violations", post(exam::report_violation))
        .route("/connectivity", post(exam::report_connectivity))
        .route("/flush", post(exam::flush))
        .route("/submit", post(exam::submit))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/health", get(exam::health))
        .nest("/api/exam/{quiz_id}", exam_routes)
        // Global Middleware (applied from outside in)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
