// src/models/answer.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::quiz::QuestionType;

/// Represents the 'answers' table in the database.
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub id: i64,
    pub participant_id: i64,
    pub question_id: i64,
    pub selected_option_id: Option<i64>,
    pub text_answer: Option<String>,
    pub numeric_answer: Option<f64>,
    pub is_draft: bool,
    pub submitted_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// One answer in a submission body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerInput {
    pub question_id: i64,
    pub selected_option_id: Option<i64>,
    pub selected_option_ids: Option<Vec<i64>>,
    pub text_answer: Option<String>,
    pub numeric_answer: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAnswersRequest {
    pub evaluation_id: i64,
    #[serde(default)]
    pub answers: Vec<AnswerInput>,
    #[serde(default)]
    pub is_draft: bool,
    #[serde(default)]
    pub is_final_submit: bool,
}

/// Flat row used to format a participant's answers: answer, question and chosen option.
#[derive(Debug, Clone, FromRow)]
pub struct AnswerDetailRow {
    pub answer_id: i64,
    pub question_id: i64,
    pub question_text: String,
    pub question_type: QuestionType,
    pub category: String,
    pub subcategory: Option<String>,
    pub sort_order: i32,
    pub text_answer: Option<String>,
    pub numeric_answer: Option<f64>,
    pub selected_option_text: Option<String>,
    pub selected_option_value: Option<i32>,
    pub is_draft: bool,
    pub submitted_at: Option<DateTime<Utc>>,
}

/// A participant's answer rendered for display and the summary PDF.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormattedAnswer {
    pub question_id: i64,
    pub question_text: String,
    pub question_type: QuestionType,
    pub category: String,
    pub subcategory: Option<String>,
    pub answer: String,
    pub numeric_value: Option<f64>,
    pub selected_option_ids: Vec<i64>,
    pub is_draft: bool,
    pub submitted_at: Option<DateTime<Utc>>,
}

/// Renders one answer row plus its multiple-choice selections as display text.
pub fn format_answer(row: AnswerDetailRow, selections: &[(i64, String)]) -> FormattedAnswer {
    let (answer, numeric_value) = match row.question_type {
        QuestionType::Text => (row.text_answer.clone().unwrap_or_default(), None),
        QuestionType::Scale => (
            row.numeric_answer.map(format_number).unwrap_or_default(),
            row.numeric_answer,
        ),
        QuestionType::SingleChoice => (
            row.selected_option_text.clone().unwrap_or_default(),
            row.selected_option_value.map(f64::from),
        ),
        QuestionType::MultipleChoice => (
            selections
                .iter()
                .map(|(_, text)| text.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            None,
        ),
    };

    FormattedAnswer {
        question_id: row.question_id,
        question_text: row.question_text,
        question_type: row.question_type,
        category: row.category,
        subcategory: row.subcategory,
        answer,
        numeric_value,
        selected_option_ids: selections.iter().map(|(id, _)| *id).collect(),
        is_draft: row.is_draft,
        submitted_at: row.submitted_at,
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 {
        format!("{}", n as i64)
    } else {
        format!("{:.2}", n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(question_type: QuestionType) -> AnswerDetailRow {
        AnswerDetailRow {
            answer_id: 1,
            question_id: 10,
            question_text: "Q".into(),
            question_type,
            category: "SUMMIT".into(),
            subcategory: None,
            sort_order: 0,
            text_answer: None,
            numeric_answer: None,
            selected_option_text: None,
            selected_option_value: None,
            is_draft: false,
            submitted_at: None,
        }
    }

    #[test]
    fn formats_each_question_type() {
        let scale = format_answer(
            AnswerDetailRow {
                numeric_answer: Some(4.0),
                ..row(QuestionType::Scale)
            },
            &[],
        );
        assert_eq!(scale.answer, "4");
        assert_eq!(scale.numeric_value, Some(4.0));

        let single = format_answer(
            AnswerDetailRow {
                selected_option_text: Some("Often".into()),
                selected_option_value: Some(3),
                ..row(QuestionType::SingleChoice)
            },
            &[],
        );
        assert_eq!(single.answer, "Often");
        assert_eq!(single.numeric_value, Some(3.0));

        let multi = format_answer(
            row(QuestionType::MultipleChoice),
            &[(5, "A".into()), (6, "B".into())],
        );
        assert_eq!(multi.answer, "A, B");
        assert_eq!(multi.selected_option_ids, vec![5, 6]);
        assert_eq!(multi.numeric_value, None);
    }

    #[test]
    fn submission_flags_default_to_false() {
        let req: SubmitAnswersRequest =
            serde_json::from_str(r#"{"evaluationId":3,"answers":[{"questionId":1,"numericAnswer":4}]}"#)
                .unwrap();
        assert!(!req.is_draft);
        assert!(!req.is_final_submit);
        assert_eq!(req.answers[0].numeric_answer, Some(4.0));
    }
}
