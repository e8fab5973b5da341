// tests/evaluation_flow_tests.rs
//
// End-to-end flows against a real Postgres. Skipped when DATABASE_URL is unset.

mod common;

use backend::{models::user::UserRole, utils::hash::verify_password};
use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use common::{TestApp, spawn_app};

struct Fixture {
    admin: String,
    evaluation_id: i64,
    question_id: i64,
}

async fn post(app: &TestApp, token: &str, path: &str, body: Value) -> reqwest::Response {
    app.client
        .post(app.url(path))
        .bearer_auth(token)
        .json(&body)
        .send()
        .await
        .expect("Failed to execute request")
}

async fn get(app: &TestApp, token: &str, path: &str) -> reqwest::Response {
    app.client
        .get(app.url(path))
        .bearer_auth(token)
        .send()
        .await
        .expect("Failed to execute request")
}

/// Admin, a one-question SCALE quiz and an evaluation using it.
async fn setup(app: &TestApp) -> Fixture {
    let (_, _, admin) = app.create_user(UserRole::Admin, "admin-pass").await;

    let quiz: Value = post(
        app,
        &admin,
        "/api/quizzes",
        json!({
            "title": "Leadership 360",
            "questions": [
                { "text": "Gives clear direction", "type": "SCALE", "category": "SUMMIT" }
            ]
        }),
    )
    .await
    .json()
    .await
    .unwrap();
    let quiz_id = quiz["id"].as_i64().unwrap();
    let question_id = quiz["questions"][0]["id"].as_i64().unwrap();

    let evaluation: Value = post(
        app,
        &admin,
        "/api/evaluations",
        json!({ "ref": format!("EV-{}", uuid::Uuid::new_v4()), "deadline": "2099-12-31", "quizId": quiz_id }),
    )
    .await
    .json()
    .await
    .unwrap();

    Fixture {
        admin,
        evaluation_id: evaluation["id"].as_i64().unwrap(),
        question_id,
    }
}

/// Adds a participant and returns (participant id, email).
async fn add(
    app: &TestApp,
    fx: &Fixture,
    role: &str,
    evaluator_type: Option<&str>,
) -> (i64, String) {
    let email = format!("{}@example.com", uuid::Uuid::new_v4());
    let response = post(
        app,
        &fx.admin,
        "/api/evaluations/participants",
        json!({
            "name": format!("{} {}", role, &email[..6]),
            "email": email,
            "role": role,
            "evaluatorType": evaluator_type,
            "evaluationId": fx.evaluation_id,
        }),
    )
    .await;
    assert_eq!(response.status().as_u16(), 201);
    let body: Value = response.json().await.unwrap();
    (body["participant"]["id"].as_i64().unwrap(), email)
}

async fn login_as(app: &TestApp, email: &str) -> String {
    app.set_password(email, "known-pass").await;
    let body: Value = app
        .client
        .post(app.url("/api/auth/login"))
        .json(&json!({ "email": email, "password": "known-pass" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    body["accessToken"].as_str().unwrap().to_string()
}

async fn answer(
    app: &TestApp,
    token: &str,
    fx: &Fixture,
    participant_id: i64,
    value: f64,
    final_submit: bool,
) -> reqwest::Response {
    post(
        app,
        token,
        &format!("/api/candidate-evaluations/participant/{}", participant_id),
        json!({
            "evaluationId": fx.evaluation_id,
            "answers": [{ "questionId": fx.question_id, "numericAnswer": value }],
            "isDraft": !final_submit,
            "isFinalSubmit": final_submit,
        }),
    )
    .await
}

#[tokio::test]
async fn evaluator_invitation_waits_for_the_candidate() {
    let Some(app) = spawn_app().await else { return };
    let fx = setup(&app).await;

    let (_, evaluator_email) = add(&app, &fx, "EVALUATOR", Some("PEER")).await;
    assert_eq!(app.mailer.count_to(&evaluator_email), 0);

    let (_, candidate_email) = add(&app, &fx, "CANDIDAT", None).await;
    assert_eq!(app.mailer.count_to(&candidate_email), 1);
    assert_eq!(app.mailer.count_to(&evaluator_email), 1);

    let mailed: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM evaluation_participants WHERE evaluation_id = $1 AND mail_sent_at IS NOT NULL",
    )
    .bind(fx.evaluation_id)
    .fetch_one(&app.pool)
    .await
    .unwrap();
    assert_eq!(mailed, 2);
}

#[tokio::test]
async fn candidate_first_mails_no_evaluator() {
    let Some(app) = spawn_app().await else { return };
    let fx = setup(&app).await;

    let (_, candidate_email) = add(&app, &fx, "CANDIDAT", None).await;
    assert_eq!(app.mailer.recipients(), vec![candidate_email]);

    let (_, evaluator_email) = add(&app, &fx, "EVALUATOR", Some("DIRECT_MANAGER")).await;
    assert_eq!(app.mailer.count_to(&evaluator_email), 1);
}

async fn password_hash(app: &TestApp, email: &str) -> String {
    sqlx::query_scalar("SELECT password FROM users WHERE email = $1")
        .bind(email)
        .fetch_one(&app.pool)
        .await
        .unwrap()
}

fn temp_password_in(text: &str) -> Option<String> {
    text.split("temporary password: ")
        .nth(1)
        .and_then(|rest| rest.lines().next())
        .map(|p| p.trim().to_string())
}

#[tokio::test]
async fn invitation_regenerates_password_only_before_first_login() {
    let Some(app) = spawn_app().await else { return };
    let fx = setup(&app).await;

    let (pid, email) = add(&app, &fx, "CANDIDAT", None).await;
    let first_hash = password_hash(&app, &email).await;
    let first_password = temp_password_in(&app.mailer.last_to(&email).unwrap().text).unwrap();
    assert!(verify_password(&first_password, &first_hash));

    let path = format!("/api/evaluations/participants/{}/send-mail", pid);
    assert_eq!(post(&app, &fx.admin, &path, json!({})).await.status().as_u16(), 200);
    let second_hash = password_hash(&app, &email).await;
    let second_password = temp_password_in(&app.mailer.last_to(&email).unwrap().text).unwrap();
    assert_ne!(first_hash, second_hash);
    assert!(verify_password(&second_password, &second_hash));
    assert!(!verify_password(&first_password, &second_hash));

    sqlx::query("UPDATE users SET is_first_login = FALSE WHERE email = $1")
        .bind(&email)
        .execute(&app.pool)
        .await
        .unwrap();

    assert_eq!(post(&app, &fx.admin, &path, json!({})).await.status().as_u16(), 200);
    assert_eq!(password_hash(&app, &email).await, second_hash);
    let mail = app.mailer.last_to(&email).unwrap();
    assert!(mail.subject.starts_with("Invitation"));
    assert!(temp_password_in(&mail.text).is_none());
}

#[tokio::test]
async fn reminder_sweep_targets_pending_invited_evaluators() {
    let Some(app) = spawn_app().await else { return };
    let fx = setup(&app).await;

    let (candidate_pid, candidate_email) = add(&app, &fx, "CANDIDAT", None).await;
    let (pending_pid, pending_email) = add(&app, &fx, "EVALUATOR", Some("PEER")).await;
    let (done_pid, done_email) = add(&app, &fx, "EVALUATOR", Some("DIRECT_MANAGER")).await;
    let (unmailed_pid, _) = add(&app, &fx, "EVALUATOR", Some("OTHER")).await;

    let done = login_as(&app, &done_email).await;
    assert!(answer(&app, &done, &fx, done_pid, 4.0, true).await.status().is_success());
    sqlx::query("UPDATE evaluation_participants SET mail_sent_at = NULL WHERE id = $1")
        .bind(unmailed_pid)
        .execute(&app.pool)
        .await
        .unwrap();

    let expired = setup(&app).await;
    add(&app, &expired, "CANDIDAT", None).await;
    let (expired_pid, _) = add(&app, &expired, "EVALUATOR", Some("PEER")).await;
    sqlx::query("UPDATE evaluations SET deadline = NOW() - INTERVAL '1 day' WHERE id = $1")
        .bind(expired.evaluation_id)
        .execute(&app.pool)
        .await
        .unwrap();

    let closed = setup(&app).await;
    add(&app, &closed, "CANDIDAT", None).await;
    let (closed_pid, _) = add(&app, &closed, "EVALUATOR", Some("PEER")).await;
    sqlx::query("UPDATE evaluations SET is_completed = TRUE WHERE id = $1")
        .bind(closed.evaluation_id)
        .execute(&app.pool)
        .await
        .unwrap();

    let response = post(&app, &fx.admin, "/api/config/reminders/run", json!({})).await;
    assert_eq!(response.status().as_u16(), 200);
    let sweep: Value = response.json().await.unwrap();
    assert_eq!(sweep["ran"], true);
    let reminded: Vec<i64> = sweep["reminded"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(Value::as_i64)
        .collect();

    assert!(reminded.contains(&pending_pid));
    for skipped in [candidate_pid, done_pid, unmailed_pid, expired_pid, closed_pid] {
        assert!(!reminded.contains(&skipped), "participant {} was reminded", skipped);
    }
    assert_eq!(app.mailer.count_subject(&pending_email, "Reminder"), 1);
    assert_eq!(app.mailer.count_subject(&candidate_email, "Reminder"), 0);

    let reminder_sent: Option<DateTime<Utc>> =
        sqlx::query_scalar("SELECT reminder_sent_at FROM evaluation_participants WHERE id = $1")
            .bind(pending_pid)
            .fetch_one(&app.pool)
            .await
            .unwrap();
    assert!(reminder_sent.is_some());

    let last_check: Option<DateTime<Utc>> =
        sqlx::query_scalar("SELECT last_reminder_check FROM system_config ORDER BY id LIMIT 1")
            .fetch_one(&app.pool)
            .await
            .unwrap();
    assert!(Utc::now() - last_check.unwrap() < chrono::Duration::minutes(1));

    // Enabled hourly sweeps wait out the interval after the run above.
    sqlx::query("UPDATE system_config SET reminder_enabled = TRUE, reminder_frequency = 'HOURLY_1'")
        .execute(&app.pool)
        .await
        .unwrap();
    let report = app.reminders.run_once(false).await.unwrap();
    assert!(!report.ran);
    assert_eq!(app.mailer.count_subject(&pending_email, "Reminder"), 1);

    sqlx::query("UPDATE system_config SET last_reminder_check = NOW() - INTERVAL '2 hours'")
        .execute(&app.pool)
        .await
        .unwrap();
    let report = app.reminders.run_once(false).await.unwrap();
    assert!(report.ran);
    assert!(report.reminded.contains(&pending_pid));
    assert_eq!(app.mailer.count_subject(&pending_email, "Reminder"), 2);

    sqlx::query("UPDATE system_config SET reminder_enabled = TRUE, reminder_frequency = 'DAILY_1'")
        .execute(&app.pool)
        .await
        .unwrap();
}

#[tokio::test]
async fn full_cycle_produces_expected_averages() {
    let Some(app) = spawn_app().await else { return };
    let fx = setup(&app).await;

    let (candidate_pid, candidate_email) = add(&app, &fx, "CANDIDAT", None).await;
    let (peer_pid, peer_email) = add(&app, &fx, "EVALUATOR", Some("PEER")).await;
    let (manager_pid, manager_email) = add(&app, &fx, "EVALUATOR", Some("DIRECT_MANAGER")).await;

    let candidate = login_as(&app, &candidate_email).await;
    let peer = login_as(&app, &peer_email).await;
    let manager = login_as(&app, &manager_email).await;

    // No evaluator has completed yet.
    let response = get(&app, &candidate, &format!("/api/reports/{}", fx.evaluation_id)).await;
    assert_eq!(response.status().as_u16(), 403);

    // A draft then a final answer on the same question leaves one row.
    assert!(answer(&app, &peer, &fx, peer_pid, 3.0, false).await.status().is_success());
    assert!(answer(&app, &peer, &fx, peer_pid, 5.0, true).await.status().is_success());
    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM answers WHERE participant_id = $1")
        .bind(peer_pid)
        .fetch_one(&app.pool)
        .await
        .unwrap();
    assert_eq!(rows, 1);

    let stamped: DateTime<Utc> =
        sqlx::query_scalar("SELECT completed_at FROM evaluation_participants WHERE id = $1")
            .bind(peer_pid)
            .fetch_one(&app.pool)
            .await
            .unwrap();

    // A second final submit is refused with the first completion timestamp.
    let response = answer(&app, &peer, &fx, peer_pid, 4.0, true).await;
    assert_eq!(response.status().as_u16(), 400);
    let body: Value = response.json().await.unwrap();
    let returned = DateTime::parse_from_rfc3339(body["completedAt"].as_str().unwrap()).unwrap();
    assert_eq!(returned.with_timezone(&Utc), stamped);

    // Drafts stay allowed after completion.
    assert!(answer(&app, &peer, &fx, peer_pid, 5.0, false).await.status().is_success());

    // Someone else's participation is off limits.
    let response = answer(&app, &peer, &fx, manager_pid, 1.0, true).await;
    assert_eq!(response.status().as_u16(), 403);

    assert!(answer(&app, &manager, &fx, manager_pid, 7.0, true).await.status().is_success());
    assert!(answer(&app, &candidate, &fx, candidate_pid, 6.0, true).await.status().is_success());

    let response = get(&app, &candidate, &format!("/api/reports/{}", fx.evaluation_id)).await;
    assert_eq!(response.status().as_u16(), 200);

    let report: Value = get(&app, &fx.admin, &format!("/api/reports/{}", fx.evaluation_id))
        .await
        .json()
        .await
        .unwrap();
    let question = &report["report"][0]["questions"][0];
    assert_eq!(question["overallAverage"].as_f64(), Some(6.0));
    let by_type = &question["averagesByEvaluatorType"];
    assert_eq!(by_type["PAIR"].as_f64(), Some(5.0));
    assert_eq!(by_type["MANAGER"].as_f64(), Some(7.0));
    assert_eq!(by_type["CANDIDAT"].as_f64(), Some(6.0));
    assert_eq!(by_type["SUBORDONNES"].as_f64(), Some(0.0));

    let is_completed: bool = sqlx::query_scalar("SELECT is_completed FROM evaluations WHERE id = $1")
        .bind(fx.evaluation_id)
        .fetch_one(&app.pool)
        .await
        .unwrap();
    assert!(is_completed);

    let response = post(
        &app,
        &fx.admin,
        &format!("/api/reports/{}/send-email", fx.evaluation_id),
        json!({}),
    )
    .await;
    assert_eq!(response.status().as_u16(), 200);
    let with_pdf = app
        .mailer
        .sent
        .lock()
        .unwrap()
        .iter()
        .filter(|m| m.to == candidate_email && !m.attachments.is_empty())
        .count();
    // Answer summary plus the report.
    assert!(with_pdf >= 1);
}

#[tokio::test]
async fn report_cannot_be_sent_before_everyone_completed() {
    let Some(app) = spawn_app().await else { return };
    let fx = setup(&app).await;
    add(&app, &fx, "CANDIDAT", None).await;

    let response = post(
        &app,
        &fx.admin,
        &format!("/api/reports/{}/send-email", fx.evaluation_id),
        json!({}),
    )
    .await;
    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn signup_then_duplicate_is_409() {
    let Some(app) = spawn_app().await else { return };
    let email = format!("{}@example.com", uuid::Uuid::new_v4());
    let phone = format!("06{}", &uuid::Uuid::new_v4().as_u128().to_string()[..8]);

    let form = || {
        reqwest::multipart::Form::new()
            .text("name", "Ada Lovelace")
            .text("email", email.clone())
            .text("phone", phone.clone())
            .text("password", "password123")
    };

    let response = app
        .client
        .post(app.url("/api/auth/signup"))
        .multipart(form())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["user"]["role"], "CANDIDAT");
    assert!(body["refreshToken"].is_string());

    let response = app
        .client
        .post(app.url("/api/auth/signup"))
        .multipart(form())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 409);
}

#[tokio::test]
async fn refresh_token_is_single_use_and_revoked_by_logout() {
    let Some(app) = spawn_app().await else { return };
    let (_, email, _) = app.create_user(UserRole::Evaluator, "pass-1234").await;

    let login: Value = app
        .client
        .post(app.url("/api/auth/login"))
        .json(&json!({ "email": email, "password": "pass-1234" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let refresh = login["refreshToken"].as_str().unwrap().to_string();

    let response = app
        .client
        .post(app.url("/api/auth/refresh"))
        .json(&json!({ "refreshToken": refresh }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let rotated: Value = response.json().await.unwrap();

    let response = app
        .client
        .post(app.url("/api/auth/refresh"))
        .json(&json!({ "refreshToken": refresh }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);

    let next = rotated["refreshToken"].as_str().unwrap();
    app.client
        .post(app.url("/api/auth/logout"))
        .json(&json!({ "refreshToken": next }))
        .send()
        .await
        .unwrap();
    let response = app
        .client
        .post(app.url("/api/auth/refresh"))
        .json(&json!({ "refreshToken": next }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);
}
