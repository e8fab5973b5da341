// src/services/emails.rs

use chrono::{DateTime, Utc};
use url::Url;

use crate::{
    models::evaluation::ParticipantRole,
    services::mailer::{MailAttachment, OutgoingMail},
    utils::html::escape_text,
};

/// Builds an absolute frontend link. A trailing slash on the base is optional.
pub fn frontend_link(base: &str, path: &str, query: &[(&str, &str)]) -> String {
    let normalized = if base.ends_with('/') {
        base.to_string()
    } else {
        format!("{}/", base)
    };

    match Url::parse(&normalized).and_then(|u| u.join(path.trim_start_matches('/'))) {
        Ok(mut url) => {
            if !query.is_empty() {
                url.query_pairs_mut().extend_pairs(query);
            }
            url.to_string()
        }
        Err(e) => {
            tracing::warn!("Invalid FRONTEND_URL '{}': {}", base, e);
            format!("{}{}", normalized, path.trim_start_matches('/'))
        }
    }
}

fn format_deadline(deadline: DateTime<Utc>) -> String {
    deadline.format("%d/%m/%Y").to_string()
}

fn wrap_html(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html><html><body style=\"font-family:Arial,sans-serif;color:#222\">\
         <h2>{}</h2>{}<p style=\"color:#888;font-size:12px\">This is an automated message, \
         please do not reply.</p></body></html>",
        escape_text(title),
        body
    )
}

/// Everything an invitation or reminder needs to know about its recipient.
#[derive(Debug, Clone)]
pub struct InvitationContext<'a> {
    pub recipient_name: &'a str,
    pub recipient_email: &'a str,
    pub role: ParticipantRole,
    pub evaluation_ref: &'a str,
    pub deadline: DateTime<Utc>,
    pub candidate_name: Option<&'a str>,
    pub temp_password: Option<&'a str>,
    pub frontend_url: &'a str,
}

impl InvitationContext<'_> {
    fn purpose(&self) -> String {
        match (self.role, self.candidate_name) {
            (ParticipantRole::Candidat, _) => {
                "You are invited to complete your self-assessment".to_string()
            }
            (ParticipantRole::Evaluator, Some(candidate)) => {
                format!("You are invited to evaluate {}", candidate)
            }
            (ParticipantRole::Evaluator, None) => "You are invited to an evaluation".to_string(),
        }
    }

    fn login_instructions(&self) -> (String, String) {
        let link = frontend_link(self.frontend_url, "login", &[]);
        match self.temp_password {
            Some(password) => (
                format!(
                    "Sign in at {} with your email {} and the temporary password: {}\n\
                     You will be asked to choose your own password after signing in.",
                    link, self.recipient_email, password
                ),
                format!(
                    "<p>Sign in at <a href=\"{link}\">{link}</a> with your email <b>{}</b> \
                     and the temporary password:</p><p style=\"font-size:18px\"><code>{}</code></p>\
                     <p>You will be asked to choose your own password after signing in.</p>",
                    escape_text(self.recipient_email),
                    escape_text(password),
                    link = link
                ),
            ),
            None => (
                format!(
                    "Sign in at {} with your usual credentials ({}).",
                    link, self.recipient_email
                ),
                format!(
                    "<p>Sign in at <a href=\"{link}\">{link}</a> with your usual credentials \
                     (<b>{}</b>).</p>",
                    escape_text(self.recipient_email),
                    link = link
                ),
            ),
        }
    }
}

pub fn invitation(ctx: &InvitationContext<'_>) -> OutgoingMail {
    let purpose = ctx.purpose();
    let deadline = format_deadline(ctx.deadline);
    let (login_text, login_html) = ctx.login_instructions();

    let text = format!(
        "Hello {},\n\n{} (evaluation {}).\nPlease answer before {}.\n\n{}\n",
        ctx.recipient_name, purpose, ctx.evaluation_ref, deadline, login_text
    );
    let html = wrap_html(
        "Evaluation invitation",
        &format!(
            "<p>Hello {},</p><p>{} (evaluation <b>{}</b>).</p><p>Please answer before \
             <b>{}</b>.</p>{}",
            escape_text(ctx.recipient_name),
            escape_text(&purpose),
            escape_text(ctx.evaluation_ref),
            deadline,
            login_html
        ),
    );

    OutgoingMail {
        to: ctx.recipient_email.to_string(),
        subject: format!("Invitation: evaluation {}", ctx.evaluation_ref),
        text,
        html,
        attachments: Vec::new(),
    }
}

pub fn reminder(ctx: &InvitationContext<'_>) -> OutgoingMail {
    let purpose = ctx.purpose();
    let deadline = format_deadline(ctx.deadline);
    let link = frontend_link(ctx.frontend_url, "login", &[]);

    let text = format!(
        "Hello {},\n\nReminder: {} (evaluation {}) and your answers are not submitted yet.\n\
         The deadline is {}.\n\nSign in at {}\n",
        ctx.recipient_name, purpose, ctx.evaluation_ref, deadline, link
    );
    let html = wrap_html(
        "Evaluation reminder",
        &format!(
            "<p>Hello {},</p><p>Reminder: {} (evaluation <b>{}</b>) and your answers are not \
             submitted yet.</p><p>The deadline is <b>{}</b>.</p>\
             <p><a href=\"{link}\">{link}</a></p>",
            escape_text(ctx.recipient_name),
            escape_text(&purpose),
            escape_text(ctx.evaluation_ref),
            deadline,
            link = link
        ),
    );

    OutgoingMail {
        to: ctx.recipient_email.to_string(),
        subject: format!("Reminder: evaluation {}", ctx.evaluation_ref),
        text,
        html,
        attachments: Vec::new(),
    }
}

pub fn password_reset(name: &str, email: &str, token: &str, frontend_url: &str) -> OutgoingMail {
    let link = frontend_link(frontend_url, "reset-password", &[("token", token)]);
    OutgoingMail {
        to: email.to_string(),
        subject: "Password reset".to_string(),
        text: format!(
            "Hello {},\n\nUse this link to choose a new password (valid for one hour):\n{}\n\n\
             If you did not ask for it, ignore this message.\n",
            name, link
        ),
        html: wrap_html(
            "Password reset",
            &format!(
                "<p>Hello {},</p><p>Use this link to choose a new password (valid for one \
                 hour):</p><p><a href=\"{link}\">{link}</a></p><p>If you did not ask for it, \
                 ignore this message.</p>",
                escape_text(name),
                link = link
            ),
        ),
        attachments: Vec::new(),
    }
}

pub fn answer_summary(name: &str, email: &str, evaluation_ref: &str, pdf: Vec<u8>) -> OutgoingMail {
    OutgoingMail {
        to: email.to_string(),
        subject: format!("Your answers: evaluation {}", evaluation_ref),
        text: format!(
            "Hello {},\n\nThank you, your answers to evaluation {} are recorded. \
             A summary is attached.\n",
            name, evaluation_ref
        ),
        html: wrap_html(
            "Answers recorded",
            &format!(
                "<p>Hello {},</p><p>Thank you, your answers to evaluation <b>{}</b> are \
                 recorded. A summary is attached.</p>",
                escape_text(name),
                escape_text(evaluation_ref)
            ),
        ),
        attachments: vec![MailAttachment::pdf(
            format!("answers-{}.pdf", slug(evaluation_ref)),
            pdf,
        )],
    }
}

pub fn report(name: &str, email: &str, evaluation_ref: &str, pdf: Vec<u8>) -> OutgoingMail {
    OutgoingMail {
        to: email.to_string(),
        subject: format!("Evaluation report {}", evaluation_ref),
        text: format!(
            "Hello {},\n\nThe report of evaluation {} is attached.\n",
            name, evaluation_ref
        ),
        html: wrap_html(
            "Evaluation report",
            &format!(
                "<p>Hello {},</p><p>The report of evaluation <b>{}</b> is attached.</p>",
                escape_text(name),
                escape_text(evaluation_ref)
            ),
        ),
        attachments: vec![MailAttachment::pdf(
            format!("report-{}.pdf", slug(evaluation_ref)),
            pdf,
        )],
    }
}

/// File-name safe version of a reference.
fn slug(reference: &str) -> String {
    let s: String = reference
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    if s.is_empty() { "evaluation".to_string() } else { s }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(role: ParticipantRole, temp: Option<&'a str>) -> InvitationContext<'a> {
        InvitationContext {
            recipient_name: "Bob <b>",
            recipient_email: "bob@example.com",
            role,
            evaluation_ref: "EV-2025",
            deadline: Utc::now(),
            candidate_name: Some("Alice"),
            temp_password: temp,
            frontend_url: "https://app.example.com",
        }
    }

    #[test]
    fn links_join_cleanly() {
        assert_eq!(
            frontend_link("https://app.example.com", "/login", &[]),
            "https://app.example.com/login"
        );
        assert_eq!(
            frontend_link("https://app.example.com/", "reset-password", &[("token", "ab c")]),
            "https://app.example.com/reset-password?token=ab+c"
        );
    }

    #[test]
    fn first_login_invitation_carries_password() {
        let mail = invitation(&ctx(ParticipantRole::Evaluator, Some("Xy7!abcdEFGH")));
        assert!(mail.text.contains("Xy7!abcdEFGH"));
        assert!(mail.text.contains("evaluate Alice"));
        assert!(mail.html.contains("&lt;b&gt;"));
        assert!(!mail.html.contains("Bob <b>"));
    }

    #[test]
    fn returning_user_gets_standard_instructions() {
        let mail = invitation(&ctx(ParticipantRole::Candidat, None));
        assert!(mail.text.contains("usual credentials"));
        assert!(mail.text.contains("self-assessment"));
    }

    #[test]
    fn attachments_use_safe_names() {
        let mail = report("Ann", "ann@example.com", "EV 1/2", b"%PDF".to_vec());
        assert_eq!(mail.attachments[0].file_name, "report-EV_1_2.pdf");
    }
}
