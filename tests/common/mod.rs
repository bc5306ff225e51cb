#![allow(dead_code)]

use axum::http::{HeaderName, HeaderValue};
use axum_test::{TestRequest, TestServer};
use pathology_quiz::{
    auth::{CurrentUser, Role},
    config::QuizConfig,
    create_router, AppState, Database,
};
use serde_json::{json, Value};
use uuid::Uuid;

pub struct TestApp {
    pub server: TestServer,
    pub admin: Uuid,
    pub user: Uuid,
}

pub async fn create_test_app() -> TestApp {
    create_test_app_with(QuizConfig::default()).await
}

pub async fn create_test_app_with(quiz: QuizConfig) -> TestApp {
    let db = Database::new("sqlite::memory:").await.unwrap();
    create_test_app_on(db, quiz)
}

/// An app over `db`, for tests that also drive the services directly.
pub fn create_test_app_on(db: Database, quiz: QuizConfig) -> TestApp {
    let state = AppState::new(db, &quiz);
    TestApp {
        server: TestServer::new(create_router(state)).unwrap(),
        admin: Uuid::new_v4(),
        user: Uuid::new_v4(),
    }
}

pub fn as_user(request: TestRequest, id: Uuid) -> TestRequest {
    request.add_header(
        HeaderName::from_static("x-user-id"),
        HeaderValue::from_str(&id.to_string()).unwrap(),
    )
}

pub fn as_admin(request: TestRequest, id: Uuid) -> TestRequest {
    as_user(request, id).add_header(
        HeaderName::from_static("x-user-role"),
        HeaderValue::from_static("admin"),
    )
}

/// A question body with four options, the first one correct.
pub fn question_body(stem: &str, difficulty: &str, category_id: Option<Uuid>) -> Value {
    json!({
        "stem": stem,
        "teaching_point": "Look at the nuclei.",
        "references": ["Robbins, ch. 7"],
        "difficulty": difficulty,
        "category_id": category_id,
        "status": "published",
        "options": [
            { "text": "Correct", "is_correct": true, "explanation": "Classic finding" },
            { "text": "Distractor A", "is_correct": false },
            { "text": "Distractor B", "is_correct": false },
            { "text": "Distractor C", "is_correct": false }
        ],
        "images": [
            { "url": "https://img.example/stem.png", "section": "stem" },
            { "url": "https://img.example/answer.png", "section": "explanation" }
        ]
    })
}

impl TestApp {
    /// Create a published question and return its JSON representation.
    pub async fn seed_question(&self, stem: &str, difficulty: &str, category_id: Option<Uuid>) -> Value {
        let response = as_admin(self.server.post("/api/content/questions"), self.admin)
            .json(&question_body(stem, difficulty, category_id))
            .await;
        response.assert_status_ok();
        response.json::<Value>()["data"].clone()
    }

    pub async fn seed_category(&self, name: &str, parent_id: Option<Uuid>) -> Uuid {
        let response = as_admin(self.server.post("/api/content/categories"), self.admin)
            .json(&json!({ "name": name, "parent_id": parent_id }))
            .await;
        response.assert_status_ok();
        id_of(&response.json::<Value>()["data"])
    }

    pub async fn create_session(&self, config: Value) -> Value {
        let response = as_user(self.server.post("/api/quiz/sessions"), self.user)
            .json(&config)
            .await;
        response.assert_status_ok();
        response.json::<Value>()["data"].clone()
    }
}

pub fn learner(id: Uuid) -> CurrentUser {
    CurrentUser { id, role: Role::User }
}

pub fn id_of(value: &Value) -> Uuid {
    Uuid::parse_str(value["id"].as_str().unwrap()).unwrap()
}

/// Id of the correct option, or of a wrong one.
pub fn option_id(question: &Value, correct: bool) -> Uuid {
    let option = question["options"]
        .as_array()
        .unwrap()
        .iter()
        .find(|o| o["is_correct"].as_bool() == Some(correct))
        .unwrap();
    id_of(option)
}
