// src/handlers/report.rs

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use sqlx::PgPool;
use validator::Validate;

use crate::{
    error::AppError,
    handlers::evaluation::summarize,
    models::{
        evaluation::{EVALUATION_COLUMNS, Evaluation},
        pagination::{PageQuery, Paginated},
        user::UserRole,
    },
    services::{
        emails,
        mailer::SharedMailer,
        pdf::render_report,
        report::{authorize_report_access, build_report, load_snapshot},
    },
    utils::jwt::Claims,
};

/// Optional recipient override for report delivery.
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SendReportRequest {
    #[validate(email)]
    pub candidat_email: Option<String>,
    pub candidat_name: Option<String>,
}

/// Row filter of the report listing for each role, `$1` being the caller id.
fn visibility_clause(role: UserRole) -> &'static str {
    match role {
        UserRole::Admin => "TRUE",
        UserRole::Evaluator => {
            r#"EXISTS (
                SELECT 1 FROM evaluation_participants p
                WHERE p.evaluation_id = e.id AND p.user_id = $1
                  AND p.participant_role = 'EVALUATOR' AND p.completed_at IS NOT NULL
            )"#
        }
        UserRole::Candidat => {
            r#"EXISTS (
                SELECT 1 FROM evaluation_participants p
                WHERE p.evaluation_id = e.id AND p.user_id = $1
                  AND p.participant_role = 'CANDIDAT'
            ) AND EXISTS (
                SELECT 1 FROM evaluation_participants p
                WHERE p.evaluation_id = e.id
                  AND p.participant_role = 'EVALUATOR' AND p.completed_at IS NOT NULL
            )"#
        }
    }
}

/// Evaluations whose report the caller may open.
pub async fn list_reports(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;
    let page = query.page();
    let filter = visibility_clause(claims.role);

    // Every variant references `$1`.
    let total: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM evaluations e WHERE ($1::BIGINT IS NOT NULL) AND {}",
        filter
    ))
    .bind(user_id)
    .fetch_one(&pool)
    .await?;

    let evaluations = sqlx::query_as::<_, Evaluation>(&format!(
        r#"
        SELECT {} FROM evaluations e
        WHERE ($1::BIGINT IS NOT NULL) AND {}
        ORDER BY e.created_at DESC, e.id DESC
        LIMIT $2 OFFSET $3
        "#,
        EVALUATION_COLUMNS, filter
    ))
    .bind(user_id)
    .bind(page.limit)
    .bind(page.offset())
    .fetch_all(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to list reports: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    let summaries = summarize(&pool, evaluations).await?;
    Ok(Json(Paginated::new(summaries, total, page)))
}

/// Aggregated report of one evaluation.
pub async fn get_report(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(evaluation_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    if evaluation_id <= 0 {
        return Err(AppError::BadRequest("Invalid evaluation id".to_string()));
    }

    let snapshot = load_snapshot(&pool, evaluation_id).await?;
    authorize_report_access(claims.role, claims.user_id()?, &snapshot.participants)?;

    Ok(Json(build_report(&snapshot)))
}

/// Mails the PDF report, by default to the candidate. Every participant must have
/// completed first.
/// Admin only.
pub async fn send_report_email(
    State(pool): State<PgPool>,
    State(mailer): State<SharedMailer>,
    Path(evaluation_id): Path<i64>,
    payload: Option<Json<SendReportRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let Json(payload) = payload.unwrap_or_default();
    payload.validate()?;

    let snapshot = load_snapshot(&pool, evaluation_id).await?;

    if !snapshot.all_completed() {
        return Err(AppError::BadRequest(
            "Every participant must complete the evaluation before the report is sent"
                .to_string(),
        ));
    }

    let candidate = snapshot.candidate();
    let email = payload
        .candidat_email
        .or_else(|| candidate.map(|c| c.email.clone()))
        .ok_or(AppError::BadRequest(
            "No recipient email available".to_string(),
        ))?;
    let name = payload
        .candidat_name
        .or_else(|| candidate.map(|c| c.name.clone()))
        .unwrap_or_else(|| email.clone());

    let report = build_report(&snapshot);
    let pdf = render_report(&report).map_err(|e| {
        tracing::error!("Report PDF for evaluation {} failed: {}", evaluation_id, e);
        AppError::InternalServerError(e.to_string())
    })?;

    let mail = emails::report(&name, &email, &report.evaluation_ref, pdf);
    mailer.send(mail).await.map_err(|e| {
        tracing::error!("Report mail for evaluation {} failed: {}", evaluation_id, e);
        AppError::InternalServerError(format!("Failed to send report: {}", e))
    })?;

    tracing::info!("Report of evaluation {} sent to {}", evaluation_id, email);
    Ok(Json(json!({
        "message": "Report sent",
        "recipient": email,
    })))
}
