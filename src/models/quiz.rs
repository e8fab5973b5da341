// src/models/quiz.rs

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use validator::Validate;

use crate::{
    config::{SUBCATEGORY_PARENT, TRAILING_CATEGORY},
    models::pagination::Page,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "question_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestionType {
    Text,
    Scale,
    SingleChoice,
    MultipleChoice,
}

impl QuestionType {
    /// SCALE and SINGLE_CHOICE answers carry a number that can be averaged.
    pub fn is_scored(self) -> bool {
        matches!(self, QuestionType::Scale | QuestionType::SingleChoice)
    }
}

/// Represents the 'quizzes' table in the database.
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Quiz {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<chrono::DateTime<chrono::Utc>>,
}

pub const QUIZ_COLUMNS: &str = "id, title, description, is_active, created_at, updated_at, deleted_at";

/// Represents the 'questions' table in the database.
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: i64,
    pub quiz_id: i64,
    pub text: String,

    /// Mapped from the database column 'type' since `type` is a reserved keyword in Rust.
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub question_type: QuestionType,

    pub category: String,
    pub subcategory: Option<String>,
    #[serde(rename = "order")]
    pub sort_order: i32,
    pub weight: f64,
    pub language: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

pub const QUESTION_COLUMNS: &str =
    "id, quiz_id, text, type, category, subcategory, sort_order, weight, language, created_at";

/// Represents the 'question_options' table.
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionOption {
    pub id: i64,
    pub question_id: i64,
    pub text: String,
    pub value: i32,
    pub is_key: bool,
}

pub const OPTION_COLUMNS: &str = "id, question_id, text, value, is_key";

/// Question with its options, as returned to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionWithOptions {
    #[serde(flatten)]
    pub question: Question,
    pub options: Vec<QuestionOption>,
}

impl QuestionWithOptions {
    /// Loads a quiz's questions in display order, each with its options.
    pub async fn fetch_for_quiz(pool: &PgPool, quiz_id: i64) -> Result<Vec<Self>, sqlx::Error> {
        let questions = sqlx::query_as::<_, Question>(&format!(
            "SELECT {} FROM questions WHERE quiz_id = $1 ORDER BY sort_order ASC, id ASC",
            QUESTION_COLUMNS
        ))
        .bind(quiz_id)
        .fetch_all(pool)
        .await?;

        let ids: Vec<i64> = questions.iter().map(|q| q.id).collect();
        let options = sqlx::query_as::<_, QuestionOption>(&format!(
            "SELECT {} FROM question_options WHERE question_id = ANY($1) ORDER BY id ASC",
            OPTION_COLUMNS
        ))
        .bind(&ids)
        .fetch_all(pool)
        .await?;

        let mut by_question: HashMap<i64, Vec<QuestionOption>> = HashMap::new();
        for option in options {
            by_question.entry(option.question_id).or_default().push(option);
        }

        Ok(questions
            .into_iter()
            .map(|question| QuestionWithOptions {
                options: by_question.remove(&question.id).unwrap_or_default(),
                question,
            })
            .collect())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizWithQuestions {
    #[serde(flatten)]
    pub quiz: Quiz,
    pub questions: Vec<QuestionWithOptions>,
}

/// Quiz row of the listing, with its question count.
#[derive(Debug, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizListItem {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub quiz: Quiz,
    pub questions_count: i64,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct OptionInput {
    #[validate(length(min = 1, max = 500))]
    pub text: String,
    #[serde(default)]
    pub value: i32,
    #[serde(default)]
    pub is_key: bool,
}

/// DTO for creating a question, standalone or nested in a quiz.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateQuestionRequest {
    #[validate(length(min = 1, max = 2000))]
    pub text: String,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    #[validate(length(min = 1, max = 100))]
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub order: Option<i32>,
    pub weight: Option<f64>,
    pub language: Option<String>,
    #[serde(default)]
    #[validate(nested)]
    pub options: Vec<OptionInput>,
}

/// DTO for updating a question. A present `options` list replaces the existing ones.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateQuestionRequest {
    #[validate(length(min = 1, max = 2000))]
    pub text: Option<String>,
    #[serde(rename = "type")]
    pub question_type: Option<QuestionType>,
    #[validate(length(min = 1, max = 100))]
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub order: Option<i32>,
    pub weight: Option<f64>,
    pub language: Option<String>,
    #[validate(nested)]
    pub options: Option<Vec<OptionInput>>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateQuizRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    pub is_active: Option<bool>,
    #[serde(default)]
    #[validate(nested)]
    pub questions: Vec<CreateQuestionRequest>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateQuizRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: Option<String>,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    pub is_active: Option<bool>,
}

/// Respondent display order: quiz order, with the trailing "AUTRE" category last.
pub fn sort_for_respondent(questions: &mut [QuestionWithOptions]) {
    questions.sort_by_key(|q| {
        (
            q.question.category == TRAILING_CATEGORY,
            q.question.sort_order,
            q.question.id,
        )
    });
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QuestionPagination {
    pub current_page: i64,
    pub total_pages: i64,
    pub total_questions: i64,
    pub questions_per_page: i64,
    pub has_next_page: bool,
    pub has_previous_page: bool,
}

impl QuestionPagination {
    pub fn new(total_questions: i64, page: Page) -> Self {
        let total_pages = (total_questions + page.limit - 1) / page.limit;
        Self {
            current_page: page.page,
            total_pages,
            total_questions,
            questions_per_page: page.limit,
            has_next_page: page.page < total_pages,
            has_previous_page: page.page > 1,
        }
    }
}

/// One page of a quiz as shown to a respondent.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RespondentQuiz {
    #[serde(flatten)]
    pub quiz: Quiz,
    pub questions: Vec<QuestionWithOptions>,
    pub candidate_name: Option<String>,
    pub is_candidate: bool,
    pub pagination: QuestionPagination,
}

/// Subcategories only make sense under PINNACLE; anything else is dropped.
pub fn normalize_subcategory(category: &str, subcategory: Option<String>) -> Option<String> {
    if category == SUBCATEGORY_PARENT {
        subcategory.filter(|s| !s.trim().is_empty())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subcategory_kept_only_for_pinnacle() {
        assert_eq!(
            normalize_subcategory("PINNACLE", Some("VISION".into())),
            Some("VISION".into())
        );
        assert_eq!(normalize_subcategory("SUMMIT", Some("VISION".into())), None);
        assert_eq!(normalize_subcategory("PINNACLE", Some("  ".into())), None);
    }

    fn question(id: i64, category: &str, order: i32) -> QuestionWithOptions {
        QuestionWithOptions {
            question: Question {
                id,
                quiz_id: 1,
                text: format!("Q{}", id),
                question_type: QuestionType::Scale,
                category: category.to_string(),
                subcategory: None,
                sort_order: order,
                weight: 1.0,
                language: "fr".into(),
                created_at: chrono::Utc::now(),
            },
            options: Vec::new(),
        }
    }

    #[test]
    fn trailing_category_goes_last() {
        let mut questions = vec![
            question(1, "AUTRE", 0),
            question(2, "SUMMIT", 2),
            question(3, "PINNACLE", 1),
            question(4, "SUMMIT", 1),
        ];
        sort_for_respondent(&mut questions);
        let ids: Vec<i64> = questions.iter().map(|q| q.question.id).collect();
        assert_eq!(ids, vec![3, 4, 2, 1]);
    }

    #[test]
    fn question_pagination_flags() {
        let meta = QuestionPagination::new(12, Page { page: 2, limit: 5 });
        assert_eq!(meta.total_pages, 3);
        assert!(meta.has_next_page);
        assert!(meta.has_previous_page);

        let last = QuestionPagination::new(12, Page { page: 3, limit: 5 });
        assert!(!last.has_next_page);
    }

    #[test]
    fn only_scale_and_single_choice_are_scored() {
        assert!(QuestionType::Scale.is_scored());
        assert!(QuestionType::SingleChoice.is_scored());
        assert!(!QuestionType::MultipleChoice.is_scored());
        assert!(!QuestionType::Text.is_scored());
    }

    #[test]
    fn question_request_parses_type_field() {
        let req: CreateQuestionRequest = serde_json::from_str(
            r#"{"text":"Q","type":"SINGLE_CHOICE","options":[{"text":"A","value":3}]}"#,
        )
        .unwrap();
        assert_eq!(req.question_type, QuestionType::SingleChoice);
        assert_eq!(req.options[0].value, 3);
        assert!(!req.options[0].is_key);
    }
}
