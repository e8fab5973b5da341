// src/services/report.rs

//! Report aggregation.
//!
//! `build_report` is pure: it takes an [`EvaluationSnapshot`] (everything loaded
//! from the database for one evaluation) and folds answers into per-question,
//! per-category and global figures. Only SCALE and SINGLE_CHOICE answers are
//! averaged; TEXT answers are collected verbatim and MULTIPLE_CHOICE selections
//! are listed.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};

use crate::{
    error::AppError,
    models::{
        evaluation::{
            CANDIDATE_BUCKET, EVALUATION_COLUMNS, Evaluation, EvaluatorType,
            PARTICIPANT_WITH_USER_SELECT, ParticipantRole, ParticipantWithUser, report_buckets,
        },
        quiz::{QUIZ_COLUMNS, QuestionType, QuestionWithOptions, Quiz},
        user::UserRole,
    },
};

/// One stored answer with the value of its selected option and its MULTIPLE_CHOICE selections.
#[derive(Debug, Clone, Default)]
pub struct AnswerRecord {
    pub answer_id: i64,
    pub participant_id: i64,
    pub question_id: i64,
    pub text_answer: Option<String>,
    pub numeric_answer: Option<f64>,
    pub selected_option_value: Option<i32>,
    pub selected_options: Vec<String>,
}

impl AnswerRecord {
    fn score(&self, question_type: QuestionType) -> Option<f64> {
        match question_type {
            QuestionType::Scale => self.numeric_answer,
            QuestionType::SingleChoice => self.selected_option_value.map(f64::from),
            QuestionType::Text | QuestionType::MultipleChoice => None,
        }
    }

    fn text(&self) -> Option<&str> {
        self.text_answer
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

/// Everything the aggregator reads for one evaluation.
#[derive(Debug, Clone)]
pub struct EvaluationSnapshot {
    pub evaluation: Evaluation,
    pub quiz: Quiz,
    pub questions: Vec<QuestionWithOptions>,
    pub participants: Vec<ParticipantWithUser>,
    pub answers: Vec<AnswerRecord>,
}

impl EvaluationSnapshot {
    pub fn candidate(&self) -> Option<&ParticipantWithUser> {
        self.participants
            .iter()
            .find(|p| p.participant_role == ParticipantRole::Candidat)
    }

    pub fn all_completed(&self) -> bool {
        !self.participants.is_empty() && self.participants.iter().all(|p| p.completed_at.is_some())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportParticipant {
    pub participant_id: i64,
    pub user_id: i64,
    pub name: String,
    pub email: String,
    pub role: ParticipantRole,
    pub evaluator_type: Option<&'static str>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaggedText {
    pub evaluator_type: &'static str,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaggedSelection {
    pub evaluator_type: &'static str,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionReport {
    pub question_id: i64,
    pub question_text: String,
    pub question_type: QuestionType,
    pub subcategory: Option<String>,
    pub overall_average: Option<f64>,
    pub averages_by_evaluator_type: BTreeMap<&'static str, f64>,
    pub counts_by_evaluator_type: BTreeMap<&'static str, usize>,
    pub text_answers: Vec<TaggedText>,
    pub selections: Vec<TaggedSelection>,
    pub total_evaluators: usize,
    pub answered_evaluators: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategorySection {
    pub category: String,
    pub questions: Vec<QuestionReport>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategorySummary {
    pub category: String,
    pub overall_average: Option<f64>,
    pub averages_by_evaluator_type: BTreeMap<&'static str, f64>,
    pub scored_questions: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalStats {
    pub mean: Option<f64>,
    pub count: usize,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationReport {
    pub evaluation_id: i64,
    pub evaluation_ref: String,
    pub deadline: DateTime<Utc>,
    pub quiz_id: i64,
    pub quiz_title: String,
    pub candidate: Option<ReportParticipant>,
    pub participants: Vec<ReportParticipant>,
    pub report: Vec<CategorySection>,
    pub category_summaries: Vec<CategorySummary>,
    pub global_stats: GlobalStats,
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn bucket_of(participant: &ParticipantWithUser) -> &'static str {
    match participant.participant_role {
        ParticipantRole::Candidat => CANDIDATE_BUCKET,
        ParticipantRole::Evaluator => participant
            .evaluator_type
            .unwrap_or(EvaluatorType::Other)
            .report_key(),
    }
}

#[derive(Default, Clone, Copy)]
struct Acc {
    sum: f64,
    count: usize,
}

impl Acc {
    fn push(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

/// Folds a snapshot into the report. Questions keep quiz order inside their category;
/// categories appear in order of first occurrence.
pub fn build_report(snapshot: &EvaluationSnapshot) -> EvaluationReport {
    let participants: HashMap<i64, &ParticipantWithUser> =
        snapshot.participants.iter().map(|p| (p.id, p)).collect();
    let total_evaluators = snapshot
        .participants
        .iter()
        .filter(|p| p.participant_role == ParticipantRole::Evaluator)
        .count();

    let mut answers_by_question: HashMap<i64, Vec<(&ParticipantWithUser, &AnswerRecord)>> =
        HashMap::new();
    for answer in &snapshot.answers {
        if let Some(participant) = participants.get(&answer.participant_id) {
            answers_by_question
                .entry(answer.question_id)
                .or_default()
                .push((*participant, answer));
        }
    }
    // Candidate's entry goes last so tagged text reads evaluators first.
    for entries in answers_by_question.values_mut() {
        entries.sort_by_key(|(p, a)| (p.participant_role == ParticipantRole::Candidat, a.participant_id));
    }

    let mut sections: Vec<CategorySection> = Vec::new();
    let mut all_scores: Vec<f64> = Vec::new();

    for item in &snapshot.questions {
        let question = &item.question;
        let entries = answers_by_question
            .get(&question.id)
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        let mut overall = Acc::default();
        let mut buckets: HashMap<&'static str, Acc> = HashMap::new();
        let mut text_answers = Vec::new();
        let mut selections = Vec::new();
        let mut answered_evaluators = 0;

        for (participant, answer) in entries {
            let bucket = bucket_of(participant);
            let is_evaluator = participant.participant_role == ParticipantRole::Evaluator;

            let answered = match question.question_type {
                QuestionType::Text => match answer.text() {
                    Some(text) => {
                        text_answers.push(TaggedText {
                            evaluator_type: bucket,
                            text: text.to_string(),
                        });
                        true
                    }
                    None => false,
                },
                QuestionType::MultipleChoice => {
                    if answer.selected_options.is_empty() {
                        false
                    } else {
                        selections.push(TaggedSelection {
                            evaluator_type: bucket,
                            options: answer.selected_options.clone(),
                        });
                        true
                    }
                }
                QuestionType::Scale | QuestionType::SingleChoice => {
                    match answer.score(question.question_type) {
                        Some(score) => {
                            overall.push(score);
                            buckets.entry(bucket).or_default().push(score);
                            all_scores.push(score);
                            true
                        }
                        None => false,
                    }
                }
            };

            if answered && is_evaluator {
                answered_evaluators += 1;
            }
        }

        let (averages_by_evaluator_type, counts_by_evaluator_type) =
            if question.question_type.is_scored() {
                let averages = report_buckets()
                    .map(|(key, _)| {
                        let mean = buckets.get(key).and_then(Acc::mean).unwrap_or(0.0);
                        (key, round2(mean))
                    })
                    .collect();
                let counts = report_buckets()
                    .map(|(key, _)| (key, buckets.get(key).map(|a| a.count).unwrap_or(0)))
                    .collect();
                (averages, counts)
            } else {
                (BTreeMap::new(), BTreeMap::new())
            };

        let entry = QuestionReport {
            question_id: question.id,
            question_text: question.text.clone(),
            question_type: question.question_type,
            subcategory: question.subcategory.clone(),
            overall_average: overall.mean().map(round2),
            averages_by_evaluator_type,
            counts_by_evaluator_type,
            text_answers,
            selections,
            total_evaluators,
            answered_evaluators,
        };

        match sections.iter_mut().find(|s| s.category == question.category) {
            Some(section) => section.questions.push(entry),
            None => sections.push(CategorySection {
                category: question.category.clone(),
                questions: vec![entry],
            }),
        }
    }

    let category_summaries = sections.iter().map(summarize_category).collect();
    let global_stats = global_stats(&all_scores);

    let roster: Vec<ReportParticipant> = snapshot
        .participants
        .iter()
        .map(|p| ReportParticipant {
            participant_id: p.id,
            user_id: p.user_id,
            name: p.name.clone(),
            email: p.email.clone(),
            role: p.participant_role,
            evaluator_type: p.evaluator_type.map(EvaluatorType::report_key),
            completed_at: p.completed_at,
        })
        .collect();

    EvaluationReport {
        evaluation_id: snapshot.evaluation.id,
        evaluation_ref: snapshot.evaluation.reference.clone(),
        deadline: snapshot.evaluation.deadline,
        quiz_id: snapshot.quiz.id,
        quiz_title: snapshot.quiz.title.clone(),
        candidate: roster
            .iter()
            .find(|p| p.role == ParticipantRole::Candidat)
            .cloned(),
        participants: roster,
        report: sections,
        category_summaries,
        global_stats,
    }
}

fn summarize_category(section: &CategorySection) -> CategorySummary {
    let mut overall = Acc::default();
    let mut buckets: HashMap<&'static str, Acc> = HashMap::new();
    let mut scored_questions = 0;

    for q in section.questions.iter().filter(|q| q.question_type.is_scored()) {
        if let Some(avg) = q.overall_average {
            overall.push(avg);
            scored_questions += 1;
        }
        for (key, avg) in &q.averages_by_evaluator_type {
            // A bucket with no answers reports 0; keep it out of the category mean.
            if q.counts_by_evaluator_type.get(key).copied().unwrap_or(0) > 0 {
                buckets.entry(*key).or_default().push(*avg);
            }
        }
    }

    CategorySummary {
        category: section.category.clone(),
        overall_average: overall.mean().map(round2),
        averages_by_evaluator_type: report_buckets()
            .map(|(key, _)| {
                (key, round2(buckets.get(key).and_then(Acc::mean).unwrap_or(0.0)))
            })
            .collect(),
        scored_questions,
    }
}

fn global_stats(scores: &[f64]) -> GlobalStats {
    if scores.is_empty() {
        return GlobalStats {
            mean: None,
            count: 0,
            min: None,
            max: None,
        };
    }
    let sum: f64 = scores.iter().sum();
    GlobalStats {
        mean: Some(round2(sum / scores.len() as f64)),
        count: scores.len(),
        min: scores.iter().copied().reduce(f64::min),
        max: scores.iter().copied().reduce(f64::max),
    }
}

/// Who may read an evaluation's report.
///
/// Admins always. Evaluators once their own participation is completed. The
/// candidate once at least one evaluator has completed.
pub fn authorize_report_access(
    role: UserRole,
    user_id: i64,
    participants: &[ParticipantWithUser],
) -> Result<(), AppError> {
    match role {
        UserRole::Admin => Ok(()),
        UserRole::Evaluator => {
            let completed = participants.iter().any(|p| {
                p.user_id == user_id
                    && p.participant_role == ParticipantRole::Evaluator
                    && p.completed_at.is_some()
            });
            if completed {
                Ok(())
            } else {
                Err(AppError::Forbidden(
                    "Evaluators can only view the report after completing their evaluation"
                        .to_string(),
                ))
            }
        }
        UserRole::Candidat => {
            let is_candidate = participants
                .iter()
                .any(|p| p.user_id == user_id && p.participant_role == ParticipantRole::Candidat);
            if !is_candidate {
                return Err(AppError::Forbidden(
                    "You are not the candidate of this evaluation".to_string(),
                ));
            }
            let any_evaluator_done = participants
                .iter()
                .any(|p| p.participant_role == ParticipantRole::Evaluator && p.completed_at.is_some());
            if any_evaluator_done {
                Ok(())
            } else {
                Err(AppError::Forbidden(
                    "The report is available once at least one evaluator has completed".to_string(),
                ))
            }
        }
    }
}

#[derive(FromRow)]
struct AnswerRow {
    id: i64,
    participant_id: i64,
    question_id: i64,
    text_answer: Option<String>,
    numeric_answer: Option<f64>,
    selected_option_value: Option<i32>,
}

#[derive(FromRow)]
struct SelectionRow {
    answer_id: i64,
    text: String,
}

pub async fn load_evaluation(pool: &PgPool, evaluation_id: i64) -> Result<Evaluation, AppError> {
    sqlx::query_as::<_, Evaluation>(&format!(
        "SELECT {} FROM evaluations WHERE id = $1",
        EVALUATION_COLUMNS
    ))
    .bind(evaluation_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Evaluation not found".to_string()))
}

pub async fn load_participants(
    pool: &PgPool,
    evaluation_id: i64,
) -> Result<Vec<ParticipantWithUser>, sqlx::Error> {
    sqlx::query_as::<_, ParticipantWithUser>(&format!(
        "{} WHERE p.evaluation_id = $1 ORDER BY p.id ASC",
        PARTICIPANT_WITH_USER_SELECT
    ))
    .bind(evaluation_id)
    .fetch_all(pool)
    .await
}

/// Loads everything `build_report` needs. Missing evaluation or quiz is a 404.
pub async fn load_snapshot(pool: &PgPool, evaluation_id: i64) -> Result<EvaluationSnapshot, AppError> {
    let evaluation = load_evaluation(pool, evaluation_id).await?;

    let quiz_id = evaluation
        .quiz_id
        .ok_or(AppError::NotFound("Evaluation or quiz not found".to_string()))?;
    let quiz = sqlx::query_as::<_, Quiz>(&format!(
        "SELECT {} FROM quizzes WHERE id = $1",
        QUIZ_COLUMNS
    ))
    .bind(quiz_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Evaluation or quiz not found".to_string()))?;

    let questions = QuestionWithOptions::fetch_for_quiz(pool, quiz_id).await?;
    let participants = load_participants(pool, evaluation_id).await?;

    let rows = sqlx::query_as::<_, AnswerRow>(
        r#"
        SELECT a.id, a.participant_id, a.question_id, a.text_answer, a.numeric_answer,
               o.value AS selected_option_value
        FROM answers a
        JOIN evaluation_participants p ON p.id = a.participant_id
        LEFT JOIN question_options o ON o.id = a.selected_option_id
        WHERE p.evaluation_id = $1
        "#,
    )
    .bind(evaluation_id)
    .fetch_all(pool)
    .await?;

    let selection_rows = sqlx::query_as::<_, SelectionRow>(
        r#"
        SELECT ao.answer_id, o.text
        FROM answer_options ao
        JOIN question_options o ON o.id = ao.option_id
        JOIN answers a ON a.id = ao.answer_id
        JOIN evaluation_participants p ON p.id = a.participant_id
        WHERE p.evaluation_id = $1
        ORDER BY o.id ASC
        "#,
    )
    .bind(evaluation_id)
    .fetch_all(pool)
    .await?;

    let mut selections: HashMap<i64, Vec<String>> = HashMap::new();
    for row in selection_rows {
        selections.entry(row.answer_id).or_default().push(row.text);
    }

    let answers = rows
        .into_iter()
        .map(|row| AnswerRecord {
            answer_id: row.id,
            participant_id: row.participant_id,
            question_id: row.question_id,
            text_answer: row.text_answer,
            numeric_answer: row.numeric_answer,
            selected_option_value: row.selected_option_value,
            selected_options: selections.remove(&row.id).unwrap_or_default(),
        })
        .collect();

    Ok(EvaluationSnapshot {
        evaluation,
        quiz,
        questions,
        participants,
        answers,
    })
}
