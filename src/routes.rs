// src/routes.rs

use axum::{
    Router,
    extract::DefaultBodyLimit,
    handler::Handler,
    http::{HeaderValue, Method, header},
    middleware,
    routing::{delete, get, post, put},
};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

use crate::{
    config::MAX_UPLOAD_BYTES,
    handlers::{
        auth, candidate, evaluation, profile, question, quiz, report, system_config, users,
    },
    state::AppState,
    utils::jwt::{admin_middleware, auth_middleware},
};

/// Browser origins allowed by CORS: the configured frontend plus the local dev server.
fn allowed_origins(frontend_url: &str) -> Vec<HeaderValue> {
    let configured = url::Url::parse(frontend_url)
        .ok()
        .map(|u| u.origin().ascii_serialization());

    configured
        .into_iter()
        .chain(["http://localhost:5173".to_string()])
        .filter_map(|origin| HeaderValue::from_str(&origin).ok())
        .collect()
}

/// Assembles the main application router.
///
/// * Public: auth endpoints and uploaded files.
/// * Authenticated: profile, quizzes (read), candidate side, reports.
/// * Admin: users, evaluations, quiz/question mutation, config.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(allowed_origins(&state.config.frontend_url))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    let auth_layer = middleware::from_fn_with_state(state.clone(), auth_middleware);
    let admin_only = || middleware::from_fn(admin_middleware);

    let auth_routes = Router::new()
        .route("/signup", post(auth::signup))
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh))
        .route("/logout", post(auth::logout))
        .route("/password-reset/request", post(auth::request_password_reset))
        .route("/password-reset/confirm", post(auth::reset_password));

    let profile_routes = Router::new()
        .route("/me", get(profile::get_me).put(profile::update_me))
        .layer(auth_layer.clone());

    let user_routes = Router::new()
        .route("/", get(users::list_users).post(users::create_user))
        .route(
            "/{id}",
            get(users::get_user)
                .put(users::update_user)
                .delete(users::delete_user),
        )
        // Auth first, then Admin check
        .layer(admin_only())
        .layer(auth_layer.clone());

    let quiz_routes = Router::new()
        .route(
            "/",
            get(quiz::list_quizzes).post(quiz::create_quiz.layer(admin_only())),
        )
        .route(
            "/{id}",
            get(quiz::get_quiz)
                .put(quiz::update_quiz.layer(admin_only()))
                .delete(quiz::delete_quiz.layer(admin_only())),
        )
        .route(
            "/{id}/questions",
            get(question::list_questions).post(question::create_question.layer(admin_only())),
        )
        .layer(auth_layer.clone());

    let question_routes = Router::new()
        .route(
            "/{id}",
            put(question::update_question).delete(question::delete_question),
        )
        .layer(admin_only())
        .layer(auth_layer.clone());

    let evaluation_routes = Router::new()
        .route(
            "/",
            get(evaluation::list_evaluations).post(evaluation::create_evaluation),
        )
        .route(
            "/{id}",
            get(evaluation::get_evaluation)
                .put(evaluation::update_evaluation)
                .delete(evaluation::delete_evaluation),
        )
        .route("/{id}/participants", get(evaluation::list_participants))
        .route("/{id}/evaluators", get(evaluation::list_evaluators))
        .route("/participants", post(evaluation::add_participant))
        .route("/participants/{id}", delete(evaluation::delete_participant))
        .route(
            "/participants/{id}/send-mail",
            post(evaluation::send_participant_mail),
        )
        .route(
            "/participants/{id}/reminder",
            post(evaluation::send_participant_reminder),
        )
        .layer(admin_only())
        .layer(auth_layer.clone());

    let candidate_routes = Router::new()
        .route("/", get(candidate::my_evaluations))
        .route("/quiz/{quiz_id}", get(candidate::quiz_for_respondent))
        .route("/participant/{participant_id}", post(candidate::submit))
        .route("/{evaluation_id}", get(candidate::my_evaluation))
        .route("/{evaluation_id}/answers", get(candidate::my_answers))
        .layer(auth_layer.clone());

    let report_routes = Router::new()
        .route("/", get(report::list_reports))
        .route("/{evaluation_id}", get(report::get_report))
        .route(
            "/{evaluation_id}/send-email",
            post(report::send_report_email.layer(admin_only())),
        )
        .layer(auth_layer.clone());

    let config_routes = Router::new()
        .route("/", get(system_config::get_config).put(system_config::update_config))
        .route("/reminders/run", post(system_config::run_reminders))
        .layer(admin_only())
        .layer(auth_layer);

    let uploads = ServeDir::new(&state.config.upload_dir);

    Router::new()
        .nest("/api/auth", auth_routes)
        .nest("/api/profile", profile_routes)
        .nest("/api/users", user_routes)
        .nest("/api/quizzes", quiz_routes)
        .nest("/api/questions", question_routes)
        .nest("/api/evaluations", evaluation_routes)
        .nest("/api/candidate-evaluations", candidate_routes)
        .nest("/api/reports", report_routes)
        .nest("/api/config", config_routes)
        .nest_service("/uploads", uploads)
        // Global Middleware (applied from outside in)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frontend_origin_drops_path_and_slash() {
        let origins = allowed_origins("https://eval.example.com/app/");
        assert_eq!(origins[0], "https://eval.example.com");
        assert_eq!(origins[1], "http://localhost:5173");
    }

    #[test]
    fn unparsable_frontend_url_keeps_dev_origin() {
        assert_eq!(allowed_origins("not a url").len(), 1);
    }
}
