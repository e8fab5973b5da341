// src/handlers/candidate.rs

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use sqlx::PgPool;

use crate::{
    config::QUESTIONS_PER_PAGE,
    error::AppError,
    handlers::{evaluation::summarize, quiz::fetch_quiz},
    models::{
        answer::SubmitAnswersRequest,
        evaluation::{
            EVALUATION_COLUMNS, Evaluation, EvaluationSummary, PARTICIPANT_COLUMNS, Participant,
            ParticipantEvaluation, ParticipantRole,
        },
        pagination::{PageQuery, Paginated},
        quiz::{QuestionPagination, QuestionWithOptions, RespondentQuiz, sort_for_respondent},
    },
    services::{
        mailer::SharedMailer,
        notification::candidate_name,
        report::{load_evaluation, load_participants},
        submission::{load_formatted_answers, submit_answers},
    },
    utils::jwt::Claims,
};

/// Query of the respondent questionnaire. Values stay raw strings so junk falls back
/// to defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RespondentQuizQuery {
    pub participant_id: Option<String>,
    pub page: Option<String>,
    pub limit: Option<String>,
}

/// Evaluations the caller participates in, newest first.
pub async fn my_evaluations(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;
    let page = query.page();

    let total: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(DISTINCT evaluation_id)
        FROM evaluation_participants
        WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .fetch_one(&pool)
    .await?;

    let evaluations = sqlx::query_as::<_, Evaluation>(&format!(
        r#"
        SELECT {} FROM evaluations
        WHERE id IN (SELECT evaluation_id FROM evaluation_participants WHERE user_id = $1)
        ORDER BY created_at DESC, id DESC
        LIMIT $2 OFFSET $3
        "#,
        EVALUATION_COLUMNS
    ))
    .bind(user_id)
    .bind(page.limit)
    .bind(page.offset())
    .fetch_all(&pool)
    .await?;

    let data: Vec<ParticipantEvaluation> = summarize(&pool, evaluations)
        .await?
        .into_iter()
        .map(|summary| ParticipantEvaluation::for_user(summary, user_id))
        .collect();

    Ok(Json(Paginated::new(data, total, page)))
}

/// One evaluation, visible to its participants and to admins.
pub async fn my_evaluation(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(evaluation_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;
    let evaluation = load_evaluation(&pool, evaluation_id).await?;
    let roster = load_participants(&pool, evaluation_id).await?;

    if !claims.is_admin() && !roster.iter().any(|p| p.user_id == user_id) {
        return Err(AppError::Forbidden(
            "You are not a participant of this evaluation".to_string(),
        ));
    }

    let summary = EvaluationSummary::new(evaluation, roster);
    Ok(Json(ParticipantEvaluation::for_user(summary, user_id)))
}

/// A page of the questionnaire, "AUTRE" questions last.
///
/// With `participantId` the answer also names the candidate and tells whether the
/// caller is answering about themself.
pub async fn quiz_for_respondent(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(quiz_id): Path<i64>,
    Query(query): Query<RespondentQuizQuery>,
) -> Result<impl IntoResponse, AppError> {
    let page = PageQuery {
        page: query.page,
        limit: query.limit,
    }
    .resolve(QUESTIONS_PER_PAGE);

    let quiz = fetch_quiz(&pool, quiz_id).await?;
    let mut questions = QuestionWithOptions::fetch_for_quiz(&pool, quiz_id).await?;
    sort_for_respondent(&mut questions);

    let total_questions = questions.len() as i64;
    let questions: Vec<QuestionWithOptions> = questions
        .into_iter()
        .skip(usize::try_from(page.offset()).unwrap_or(usize::MAX))
        .take(page.limit as usize)
        .collect();

    let participant_id = query
        .participant_id
        .as_deref()
        .and_then(|raw| raw.trim().parse::<i64>().ok())
        .filter(|id| *id > 0);

    let (candidate, is_candidate) = match participant_id {
        None => (None, false),
        Some(participant_id) => {
            let participant = sqlx::query_as::<_, Participant>(&format!(
                "SELECT {} FROM evaluation_participants WHERE id = $1",
                PARTICIPANT_COLUMNS
            ))
            .bind(participant_id)
            .fetch_optional(&pool)
            .await?
            .ok_or(AppError::NotFound("Participant not found".to_string()))?;

            if !claims.is_admin() && participant.user_id != claims.user_id()? {
                return Err(AppError::Forbidden(
                    "This participation belongs to another user".to_string(),
                ));
            }

            let roster = load_participants(&pool, participant.evaluation_id).await?;
            (
                candidate_name(&roster).map(str::to_string),
                participant.participant_role == ParticipantRole::Candidat,
            )
        }
    };

    let respondent_quiz = RespondentQuiz {
        quiz,
        questions,
        candidate_name: candidate,
        is_candidate,
        pagination: QuestionPagination::new(total_questions, page),
    };

    Ok(Json(json!({ "quiz": respondent_quiz })))
}

/// Saves a draft or final submission for a participation.
pub async fn submit(
    State(pool): State<PgPool>,
    State(mailer): State<SharedMailer>,
    Extension(claims): Extension<Claims>,
    Path(participant_id): Path<i64>,
    Json(payload): Json<SubmitAnswersRequest>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = submit_answers(&pool, &mailer, &claims, participant_id, payload).await?;
    Ok(Json(outcome))
}

/// The caller's previously saved answers for an evaluation.
pub async fn my_answers(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(evaluation_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let participant = sqlx::query_as::<_, Participant>(&format!(
        "SELECT {} FROM evaluation_participants WHERE evaluation_id = $1 AND user_id = $2",
        PARTICIPANT_COLUMNS
    ))
    .bind(evaluation_id)
    .bind(claims.user_id()?)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound(
        "No participation found for this evaluation".to_string(),
    ))?;

    let answers = load_formatted_answers(&pool, participant.id).await?;

    Ok(Json(json!({
        "participantId": participant.id,
        "evaluationId": evaluation_id,
        "completedAt": participant.completed_at,
        "answers": answers,
    })))
}
