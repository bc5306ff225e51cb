mod common;

use axum::http::StatusCode;
use common::*;
use pathology_quiz::{
    config::QuizConfig, ApiError, Database, FlagQuestionRequest, FlagService, FlagType,
};
use serde_json::{json, Value};
use uuid::Uuid;

fn flag_body(question_id: Uuid) -> Value {
    json!({
        "question_id": question_id,
        "flag_type": "incorrect_answer",
        "description": "  Option B is also defensible  "
    })
}

#[tokio::test]
async fn test_flag_reaching_threshold_withdraws_question() {
    let app = create_test_app().await;
    let question = app.seed_question("Flag me", "easy", None).await;
    let id = id_of(&question);

    let response = as_user(app.server.post("/api/content/questions/flags"), app.user)
        .json(&flag_body(id))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["data"]["question_demoted"], true);
    assert_eq!(body["data"]["open_flag_count"], 1);
    assert_eq!(body["data"]["flag"]["status"], "open");
    assert_eq!(body["data"]["flag"]["description"], "Option B is also defensible");

    let question: Value = as_admin(app.server.get(&format!("/api/content/questions/{}", id)), app.admin)
        .await
        .json();
    assert_eq!(question["data"]["status"], "draft");

    as_user(app.server.post("/api/quiz/sessions"), app.user)
        .json(&json!({ "question_count": 1 }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    let history: Value = as_admin(
        app.server.get(&format!("/api/content/questions/{}/history", id)),
        app.admin,
    )
    .await
    .json();
    let last = history["data"].as_array().unwrap().last().unwrap().clone();
    assert_eq!(last["action"], "auto_unpublished");
}

#[tokio::test]
async fn test_duplicate_open_flag_is_rejected() {
    let app = create_test_app_with(QuizConfig {
        flag_threshold: 3,
        ..QuizConfig::default()
    })
    .await;
    let question = app.seed_question("Flag twice", "medium", None).await;
    let id = id_of(&question);

    let first: Value = as_user(app.server.post("/api/content/questions/flags"), app.user)
        .json(&flag_body(id))
        .await
        .json();
    assert_eq!(first["data"]["question_demoted"], false);

    as_user(app.server.post("/api/content/questions/flags"), app.user)
        .json(&flag_body(id))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    let other: Value = as_user(app.server.post("/api/content/questions/flags"), Uuid::new_v4())
        .json(&flag_body(id))
        .await
        .json();
    assert_eq!(other["data"]["open_flag_count"], 2);
    assert_eq!(other["data"]["question_demoted"], false);
}

#[tokio::test]
async fn test_flagging_unknown_or_unpublished_questions() {
    let app = create_test_app().await;

    as_user(app.server.post("/api/content/questions/flags"), app.user)
        .json(&flag_body(Uuid::new_v4()))
        .await
        .assert_status(StatusCode::NOT_FOUND);

    let mut draft = question_body("Still a draft", "easy", None);
    draft["status"] = json!("draft");
    let created: Value = as_admin(app.server.post("/api/content/questions"), app.admin)
        .json(&draft)
        .await
        .json();

    as_user(app.server.post("/api/content/questions/flags"), app.user)
        .json(&flag_body(id_of(&created["data"])))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_moderators_list_and_resolve_flags() {
    let app = create_test_app_with(QuizConfig {
        flag_threshold: 5,
        ..QuizConfig::default()
    })
    .await;
    let question = app.seed_question("Needs moderation", "hard", None).await;

    let flag: Value = as_user(app.server.post("/api/content/questions/flags"), app.user)
        .json(&flag_body(id_of(&question)))
        .await
        .json();
    let flag_id = id_of(&flag["data"]["flag"]);

    as_user(app.server.get("/api/content/questions/flags"), app.user)
        .await
        .assert_status(StatusCode::FORBIDDEN);

    let open: Value = as_admin(app.server.get("/api/content/questions/flags?status=open"), app.admin)
        .await
        .json();
    assert_eq!(open["data"].as_array().unwrap().len(), 1);

    let path = format!("/api/content/questions/flags/{}", flag_id);
    let resolved: Value = as_admin(app.server.patch(&path), app.admin)
        .json(&json!({ "resolution": "dismissed", "note": "answer key is correct" }))
        .await
        .json();
    assert_eq!(resolved["data"]["status"], "closed");
    assert_eq!(resolved["data"]["resolution"], "dismissed");
    assert_eq!(resolved["data"]["resolved_by"], app.admin.to_string());

    as_admin(app.server.patch(&path), app.admin)
        .json(&json!({ "resolution": "fixed" }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    let open: Value = as_admin(app.server.get("/api/content/questions/flags?status=open"), app.admin)
        .await
        .json();
    assert!(open["data"].as_array().unwrap().is_empty());

    // A closed flag no longer blocks a new report from the same user.
    as_user(app.server.post("/api/content/questions/flags"), app.user)
        .json(&flag_body(id_of(&question)))
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn test_concurrent_flags_from_one_user_store_a_single_open_flag() {
    let quiz = QuizConfig {
        flag_threshold: 10,
        ..QuizConfig::default()
    };
    let db = Database::new("sqlite::memory:").await.unwrap();
    let app = create_test_app_on(db.clone(), quiz.clone());
    let service = FlagService::new(db.clone(), quiz.flag_threshold);
    let reporter = Uuid::new_v4();

    for round in 0..20 {
        let question = app.seed_question(&format!("Question {}", round), "easy", None).await;
        let id = id_of(&question);
        let request = || FlagQuestionRequest {
            question_id: id,
            flag_type: FlagType::UnclearQuestion,
            description: None,
        };

        let (first, second) = tokio::join!(
            service.flag_question(reporter, request()),
            service.flag_question(reporter, request()),
        );
        let accepted = [&first, &second].iter().filter(|r| r.is_ok()).count();
        assert_eq!(accepted, 1);
        let rejected = if first.is_ok() { second } else { first };
        assert!(matches!(rejected, Err(ApiError::ValidationError(_))));

        assert_eq!(db.count_open_flags(id).await.unwrap(), 1);
    }
}
