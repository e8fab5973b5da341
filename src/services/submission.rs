// src/services/submission.rs

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder, Transaction};

use crate::{
    error::AppError,
    models::{
        answer::{AnswerDetailRow, AnswerInput, FormattedAnswer, SubmitAnswersRequest, format_answer},
        evaluation::{PARTICIPANT_COLUMNS, Participant},
        quiz::QuestionType,
    },
    services::{emails, mailer::SharedMailer, pdf},
    utils::jwt::Claims,
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionOutcome {
    pub participant_id: i64,
    pub saved_answers: usize,
    pub is_draft: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub evaluation_completed: bool,
}

#[derive(FromRow)]
struct QuestionKey {
    id: i64,
    #[sqlx(rename = "type")]
    question_type: QuestionType,
}

#[derive(FromRow)]
struct OptionKey {
    id: i64,
    question_id: i64,
}

/// Column values stored for one answer once the input is narrowed to its question type.
#[derive(Debug, Default, PartialEq)]
struct StoredAnswer {
    selected_option_id: Option<i64>,
    text_answer: Option<String>,
    numeric_answer: Option<f64>,
    selections: Vec<i64>,
}

fn narrow(input: &AnswerInput, question_type: QuestionType) -> StoredAnswer {
    match question_type {
        QuestionType::Text => StoredAnswer {
            text_answer: input.text_answer.clone(),
            ..Default::default()
        },
        QuestionType::Scale => StoredAnswer {
            numeric_answer: input.numeric_answer,
            ..Default::default()
        },
        QuestionType::SingleChoice => StoredAnswer {
            selected_option_id: input.selected_option_id,
            ..Default::default()
        },
        QuestionType::MultipleChoice => {
            let mut seen = HashSet::new();
            let selections = input
                .selected_option_ids
                .iter()
                .flatten()
                .copied()
                .filter(|id| seen.insert(*id))
                .collect();
            StoredAnswer {
                selections,
                ..Default::default()
            }
        }
    }
}

fn validate_ids(participant_id: i64, req: &SubmitAnswersRequest) -> Result<(), AppError> {
    if participant_id <= 0 || req.evaluation_id <= 0 {
        return Err(AppError::BadRequest(
            "participantId and evaluationId must be positive integers".to_string(),
        ));
    }
    if let Some(bad) = req.answers.iter().find(|a| a.question_id <= 0) {
        return Err(AppError::BadRequest(format!(
            "Invalid questionId {}",
            bad.question_id
        )));
    }
    Ok(())
}

/// Saves a participant's answers in one transaction.
///
/// Existing answers for the same question are overwritten. A final submission stamps
/// the participant's `completed_at`, closes the evaluation once every participant is
/// done, and mails a PDF summary in the background.
pub async fn submit_answers(
    pool: &PgPool,
    mailer: &SharedMailer,
    claims: &Claims,
    participant_id: i64,
    req: SubmitAnswersRequest,
) -> Result<SubmissionOutcome, AppError> {
    validate_ids(participant_id, &req)?;

    let participant = sqlx::query_as::<_, Participant>(&format!(
        "SELECT {} FROM evaluation_participants WHERE id = $1",
        PARTICIPANT_COLUMNS
    ))
    .bind(participant_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Participant not found".to_string()))?;

    if participant.evaluation_id != req.evaluation_id {
        return Err(AppError::NotFound(
            "Participant does not belong to this evaluation".to_string(),
        ));
    }

    if !claims.is_admin() && participant.user_id != claims.user_id()? {
        return Err(AppError::Forbidden(
            "You can only submit your own answers".to_string(),
        ));
    }

    if req.is_final_submit {
        if let Some(completed_at) = participant.completed_at {
            return Err(AppError::AlreadyCompleted(completed_at));
        }
    }

    let quiz_id: Option<i64> = sqlx::query_scalar("SELECT quiz_id FROM evaluations WHERE id = $1")
        .bind(req.evaluation_id)
        .fetch_optional(pool)
        .await?
        .flatten();
    let quiz_id = quiz_id.ok_or(AppError::NotFound("Evaluation or quiz not found".to_string()))?;

    let questions: HashMap<i64, QuestionType> =
        sqlx::query_as::<_, QuestionKey>("SELECT id, type FROM questions WHERE quiz_id = $1")
            .bind(quiz_id)
            .fetch_all(pool)
            .await?
            .into_iter()
            .map(|q| (q.id, q.question_type))
            .collect();

    let mut stored = Vec::with_capacity(req.answers.len());
    for input in &req.answers {
        let question_type = *questions.get(&input.question_id).ok_or_else(|| {
            AppError::BadRequest(format!(
                "Question {} does not belong to this evaluation",
                input.question_id
            ))
        })?;
        stored.push((input.question_id, narrow(input, question_type)));
    }
    check_options(pool, &stored).await?;

    let is_draft = req.is_draft && !req.is_final_submit;
    let now = Utc::now();

    let mut tx = pool.begin().await?;

    for (question_id, answer) in &stored {
        save_answer(&mut tx, participant_id, *question_id, answer, is_draft, now).await?;
    }

    let mut completed_at = participant.completed_at;
    let mut evaluation_completed = false;
    if req.is_final_submit {
        let stamped: Option<DateTime<Utc>> = sqlx::query_scalar(
            "UPDATE evaluation_participants SET completed_at = $2 \
             WHERE id = $1 AND completed_at IS NULL RETURNING completed_at",
        )
        .bind(participant_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        // A concurrent final submit won the race; the transaction is rolled back on drop.
        let Some(stamped) = stamped else {
            let existing: Option<DateTime<Utc>> = sqlx::query_scalar(
                "SELECT completed_at FROM evaluation_participants WHERE id = $1",
            )
            .bind(participant_id)
            .fetch_one(&mut *tx)
            .await?;
            return Err(AppError::AlreadyCompleted(existing.unwrap_or(now)));
        };
        completed_at = Some(stamped);

        let pending: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM evaluation_participants \
             WHERE evaluation_id = $1 AND completed_at IS NULL",
        )
        .bind(req.evaluation_id)
        .fetch_one(&mut *tx)
        .await?;

        if pending == 0 {
            sqlx::query(
                "UPDATE evaluations SET is_completed = TRUE, completed_at = $2, updated_at = NOW() \
                 WHERE id = $1",
            )
            .bind(req.evaluation_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            evaluation_completed = true;
        }
    }

    tx.commit().await?;

    tracing::info!(
        "Participant {} saved {} answer(s) (draft: {}, final: {})",
        participant_id,
        stored.len(),
        is_draft,
        req.is_final_submit
    );

    if req.is_final_submit {
        spawn_summary_mail(pool.clone(), mailer.clone(), participant_id, now);
    }

    Ok(SubmissionOutcome {
        participant_id,
        saved_answers: stored.len(),
        is_draft,
        completed_at,
        evaluation_completed,
    })
}

/// Selected options must belong to the question they answer.
async fn check_options(pool: &PgPool, stored: &[(i64, StoredAnswer)]) -> Result<(), AppError> {
    let wanted: Vec<i64> = stored
        .iter()
        .flat_map(|(_, a)| a.selected_option_id.into_iter().chain(a.selections.iter().copied()))
        .collect();
    if wanted.is_empty() {
        return Ok(());
    }

    let owners: HashMap<i64, i64> = sqlx::query_as::<_, OptionKey>(
        "SELECT id, question_id FROM question_options WHERE id = ANY($1)",
    )
    .bind(&wanted)
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(|o| (o.id, o.question_id))
    .collect();

    for (question_id, answer) in stored {
        let options = answer
            .selected_option_id
            .iter()
            .chain(answer.selections.iter());
        for option_id in options {
            if owners.get(option_id) != Some(question_id) {
                return Err(AppError::BadRequest(format!(
                    "Option {} does not belong to question {}",
                    option_id, question_id
                )));
            }
        }
    }
    Ok(())
}

async fn save_answer(
    tx: &mut Transaction<'_, Postgres>,
    participant_id: i64,
    question_id: i64,
    answer: &StoredAnswer,
    is_draft: bool,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    let answer_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO answers
            (participant_id, question_id, selected_option_id, text_answer, numeric_answer,
             is_draft, submitted_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
        ON CONFLICT (participant_id, question_id) DO UPDATE SET
            selected_option_id = EXCLUDED.selected_option_id,
            text_answer = EXCLUDED.text_answer,
            numeric_answer = EXCLUDED.numeric_answer,
            is_draft = EXCLUDED.is_draft,
            submitted_at = EXCLUDED.submitted_at,
            updated_at = NOW()
        RETURNING id
        "#,
    )
    .bind(participant_id)
    .bind(question_id)
    .bind(answer.selected_option_id)
    .bind(&answer.text_answer)
    .bind(answer.numeric_answer)
    .bind(is_draft)
    .bind((!is_draft).then_some(now))
    .fetch_one(&mut **tx)
    .await?;

    sqlx::query("DELETE FROM answer_options WHERE answer_id = $1")
        .bind(answer_id)
        .execute(&mut **tx)
        .await?;

    if !answer.selections.is_empty() {
        let mut builder =
            QueryBuilder::<Postgres>::new("INSERT INTO answer_options (answer_id, option_id) ");
        builder.push_values(&answer.selections, |mut row, option_id| {
            row.push_bind(answer_id).push_bind(*option_id);
        });
        builder.build().execute(&mut **tx).await?;
    }

    Ok(())
}

#[derive(FromRow)]
struct SelectionRow {
    answer_id: i64,
    option_id: i64,
    text: String,
}

/// A participant's answers in quiz order, rendered per question type.
pub async fn load_formatted_answers(
    pool: &PgPool,
    participant_id: i64,
) -> Result<Vec<FormattedAnswer>, sqlx::Error> {
    let rows = sqlx::query_as::<_, AnswerDetailRow>(
        r#"
        SELECT a.id AS answer_id, q.id AS question_id, q.text AS question_text,
               q.type AS question_type, q.category, q.subcategory, q.sort_order,
               a.text_answer, a.numeric_answer,
               o.text AS selected_option_text, o.value AS selected_option_value,
               a.is_draft, a.submitted_at
        FROM answers a
        JOIN questions q ON q.id = a.question_id
        LEFT JOIN question_options o ON o.id = a.selected_option_id
        WHERE a.participant_id = $1
        ORDER BY q.sort_order ASC, q.id ASC
        "#,
    )
    .bind(participant_id)
    .fetch_all(pool)
    .await?;

    let selection_rows = sqlx::query_as::<_, SelectionRow>(
        r#"
        SELECT ao.answer_id, o.id AS option_id, o.text
        FROM answer_options ao
        JOIN question_options o ON o.id = ao.option_id
        JOIN answers a ON a.id = ao.answer_id
        WHERE a.participant_id = $1
        ORDER BY o.id ASC
        "#,
    )
    .bind(participant_id)
    .fetch_all(pool)
    .await?;

    let mut selections: HashMap<i64, Vec<(i64, String)>> = HashMap::new();
    for row in selection_rows {
        selections
            .entry(row.answer_id)
            .or_default()
            .push((row.option_id, row.text));
    }

    Ok(rows
        .into_iter()
        .map(|row| {
            let chosen = selections.remove(&row.answer_id).unwrap_or_default();
            format_answer(row, &chosen)
        })
        .collect())
}

#[derive(FromRow)]
struct Recipient {
    name: String,
    email: String,
    reference: String,
}

fn spawn_summary_mail(pool: PgPool, mailer: SharedMailer, participant_id: i64, submitted_at: DateTime<Utc>) {
    tokio::spawn(async move {
        if let Err(e) = send_summary_mail(&pool, &mailer, participant_id, submitted_at).await {
            tracing::error!(
                "Failed to send answer summary for participant {}: {}",
                participant_id,
                e
            );
        }
    });
}

async fn send_summary_mail(
    pool: &PgPool,
    mailer: &SharedMailer,
    participant_id: i64,
    submitted_at: DateTime<Utc>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let recipient = sqlx::query_as::<_, Recipient>(
        r#"
        SELECT u.name, u.email, e.reference
        FROM evaluation_participants p
        JOIN users u ON u.id = p.user_id
        JOIN evaluations e ON e.id = p.evaluation_id
        WHERE p.id = $1
        "#,
    )
    .bind(participant_id)
    .fetch_one(pool)
    .await?;

    let answers = load_formatted_answers(pool, participant_id).await?;
    let bytes = pdf::render_answer_summary(&recipient.name, &recipient.reference, submitted_at, &answers)?;

    mailer
        .send(emails::answer_summary(
            &recipient.name,
            &recipient.email,
            &recipient.reference,
            bytes,
        ))
        .await?;
    Ok(())
}
