// src/services/pdf.rs

use chrono::{DateTime, Utc};
use printpdf::{
    BuiltinFont, IndirectFontRef, Mm, PdfDocument, PdfDocumentReference, PdfLayerReference,
};

use crate::{
    models::{answer::FormattedAnswer, evaluation::report_buckets},
    services::report::EvaluationReport,
};

#[derive(Debug, thiserror::Error)]
#[error("PDF rendering failed: {0}")]
pub struct PdfError(String);

fn pdf_err<E: std::fmt::Display>(err: E) -> PdfError {
    PdfError(err.to_string())
}

const PAGE_WIDTH: f32 = 210.0;
const PAGE_HEIGHT: f32 = 297.0;
const MARGIN: f32 = 18.0;

/// Top-to-bottom text writer that opens a new A4 page when the cursor reaches the margin.
struct PdfWriter {
    doc: PdfDocumentReference,
    layer: PdfLayerReference,
    regular: IndirectFontRef,
    bold: IndirectFontRef,
    y: f32,
}

impl PdfWriter {
    fn new(title: &str) -> Result<Self, PdfError> {
        let (doc, page, layer) =
            PdfDocument::new(title, Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Layer 1");
        let regular = doc.add_builtin_font(BuiltinFont::Helvetica).map_err(pdf_err)?;
        let bold = doc.add_builtin_font(BuiltinFont::HelveticaBold).map_err(pdf_err)?;
        let layer = doc.get_page(page).get_layer(layer);
        Ok(Self {
            doc,
            layer,
            regular,
            bold,
            y: PAGE_HEIGHT - MARGIN,
        })
    }

    fn ensure_space(&mut self, needed: f32) {
        if self.y - needed < MARGIN {
            let (page, layer) = self
                .doc
                .add_page(Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Layer 1");
            self.layer = self.doc.get_page(page).get_layer(layer);
            self.y = PAGE_HEIGHT - MARGIN;
        }
    }

    fn write(&mut self, text: &str, size: f32, bold: bool, indent: f32) {
        // Helvetica averages roughly half an em per glyph.
        let usable = PAGE_WIDTH - 2.0 * MARGIN - indent;
        let glyph_mm = size * 0.3528 * 0.5;
        let max_chars = ((usable / glyph_mm) as usize).max(20);
        let line_height = size * 0.3528 * 1.4;

        for line in wrap(text, max_chars) {
            self.ensure_space(line_height);
            self.y -= line_height;
            let font = if bold { &self.bold } else { &self.regular };
            self.layer
                .use_text(line, size, Mm(MARGIN + indent), Mm(self.y), font);
        }
    }

    fn title(&mut self, text: &str) {
        self.write(text, 18.0, true, 0.0);
        self.gap(4.0);
    }

    fn heading(&mut self, text: &str) {
        self.gap(3.0);
        self.write(text, 13.0, true, 0.0);
        self.gap(1.5);
    }

    fn label(&mut self, text: &str) {
        self.write(text, 10.5, true, 0.0);
    }

    fn line(&mut self, text: &str) {
        self.write(text, 10.0, false, 4.0);
    }

    fn gap(&mut self, mm: f32) {
        self.y -= mm;
    }

    fn finish(self) -> Result<Vec<u8>, PdfError> {
        self.doc.save_to_bytes().map_err(pdf_err)
    }
}

/// Greedy word wrap. Words longer than a line are split.
fn wrap(text: &str, max_chars: usize) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.lines() {
        let mut current = String::new();
        for word in paragraph.split_whitespace() {
            let mut word = word.to_string();
            while word.chars().count() > max_chars {
                if !current.is_empty() {
                    lines.push(std::mem::take(&mut current));
                }
                let head: String = word.chars().take(max_chars).collect();
                word = word.chars().skip(max_chars).collect();
                lines.push(head);
            }
            let needed = current.chars().count() + word.chars().count() + usize::from(!current.is_empty());
            if needed > max_chars && !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(&word);
        }
        lines.push(current);
    }
    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}

fn fmt_score(value: Option<f64>) -> String {
    value.map(|v| format!("{:.2}", v)).unwrap_or_else(|| "-".to_string())
}

fn fmt_date(value: DateTime<Utc>) -> String {
    value.format("%d/%m/%Y").to_string()
}

/// PDF listing one participant's answers, grouped by category.
pub fn render_answer_summary(
    participant_name: &str,
    evaluation_ref: &str,
    submitted_at: DateTime<Utc>,
    answers: &[FormattedAnswer],
) -> Result<Vec<u8>, PdfError> {
    let mut pdf = PdfWriter::new(&format!("Answers {}", evaluation_ref))?;
    pdf.title("Answer summary");
    pdf.label(&format!("Participant: {}", participant_name));
    pdf.label(&format!("Evaluation: {}", evaluation_ref));
    pdf.label(&format!("Submitted on: {}", fmt_date(submitted_at)));

    let mut current_category: Option<&str> = None;
    for answer in answers {
        if current_category != Some(answer.category.as_str()) {
            pdf.heading(&answer.category);
            current_category = Some(answer.category.as_str());
        }
        pdf.gap(1.0);
        pdf.label(&answer.question_text);
        let shown = if answer.answer.is_empty() {
            "(no answer)"
        } else {
            answer.answer.as_str()
        };
        pdf.line(shown);
    }

    pdf.finish()
}

/// PDF version of an evaluation report: global figures, category summaries, then
/// every question with its averages and comments.
pub fn render_report(report: &EvaluationReport) -> Result<Vec<u8>, PdfError> {
    let mut pdf = PdfWriter::new(&format!("Report {}", report.evaluation_ref))?;
    pdf.title(&format!("Evaluation report {}", report.evaluation_ref));
    if let Some(candidate) = &report.candidate {
        pdf.label(&format!("Candidate: {}", candidate.name));
    }
    pdf.label(&format!("Questionnaire: {}", report.quiz_title));
    pdf.label(&format!("Deadline: {}", fmt_date(report.deadline)));
    pdf.label(&format!(
        "Participants: {} ({} completed)",
        report.participants.len(),
        report
            .participants
            .iter()
            .filter(|p| p.completed_at.is_some())
            .count()
    ));

    let stats = &report.global_stats;
    pdf.heading("Overall");
    pdf.line(&format!(
        "Mean {}  |  answers {}  |  min {}  |  max {}",
        fmt_score(stats.mean),
        stats.count,
        fmt_score(stats.min),
        fmt_score(stats.max)
    ));

    pdf.heading("By category");
    for summary in &report.category_summaries {
        pdf.label(&format!(
            "{}: {}",
            summary.category,
            fmt_score(summary.overall_average)
        ));
        let per_type: Vec<String> = report_buckets()
            .map(|(key, label)| {
                let value = summary.averages_by_evaluator_type.get(key).copied();
                format!("{} {}", label, fmt_score(value))
            })
            .collect();
        pdf.line(&per_type.join("  |  "));
    }

    for section in &report.report {
        pdf.heading(&section.category);
        for question in &section.questions {
            pdf.gap(1.0);
            pdf.label(&question.question_text);
            if question.question_type.is_scored() {
                pdf.line(&format!(
                    "Average {} ({} of {} evaluators answered)",
                    fmt_score(question.overall_average),
                    question.answered_evaluators,
                    question.total_evaluators
                ));
                let per_type: Vec<String> = report_buckets()
                    .filter(|(key, _)| {
                        question.counts_by_evaluator_type.get(key).copied().unwrap_or(0) > 0
                    })
                    .map(|(key, label)| {
                        let value = question.averages_by_evaluator_type.get(key).copied();
                        format!("{} {}", label, fmt_score(value))
                    })
                    .collect();
                if !per_type.is_empty() {
                    pdf.line(&per_type.join("  |  "));
                }
            }
            for text in &question.text_answers {
                pdf.line(&format!("[{}] {}", text.evaluator_type, text.text));
            }
            for selection in &question.selections {
                pdf.line(&format!(
                    "[{}] {}",
                    selection.evaluator_type,
                    selection.options.join(", ")
                ));
            }
        }
    }

    pdf.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{models::quiz::QuestionType, services::report::GlobalStats};

    #[test]
    fn wrap_respects_width() {
        let lines = wrap("one two three four five six", 9);
        assert!(lines.iter().all(|l| l.chars().count() <= 9));
        assert_eq!(lines.join(" "), "one two three four five six");
        assert_eq!(wrap("abcdefghij", 4), vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn answer_summary_is_a_pdf() {
        let answers: Vec<FormattedAnswer> = (0..40)
            .map(|i| FormattedAnswer {
                question_id: i,
                question_text: format!("Question number {} with a fairly long wording", i),
                question_type: QuestionType::Text,
                category: if i < 20 { "SUMMIT".into() } else { "AUTRE".into() },
                subcategory: None,
                answer: "A long free text answer ".repeat(10),
                numeric_value: None,
                selected_option_ids: vec![],
                is_draft: false,
                submitted_at: None,
            })
            .collect();
        let bytes = render_answer_summary("Ada", "EV-1", Utc::now(), &answers).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }

    #[test]
    fn empty_report_renders() {
        let report = EvaluationReport {
            evaluation_id: 1,
            evaluation_ref: "EV-1".into(),
            deadline: Utc::now(),
            quiz_id: 1,
            quiz_title: "Leadership".into(),
            candidate: None,
            participants: vec![],
            report: vec![],
            category_summaries: vec![],
            global_stats: GlobalStats {
                mean: None,
                count: 0,
                min: None,
                max: None,
            },
        };
        let bytes = render_report(&report).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }
}
