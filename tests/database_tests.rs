use chrono::Utc;
use pathology_quiz::*;
use uuid::Uuid;

fn published_question(difficulty: Difficulty, category_id: Option<Uuid>) -> Question {
    let id = Uuid::new_v4();
    let now = Utc::now();
    Question {
        id,
        stem: "Psammoma bodies are typical of?".to_string(),
        teaching_point: None,
        references: vec!["WHO Blue Books".to_string()],
        difficulty,
        category_id,
        status: QuestionStatus::Published,
        options: (0..3)
            .map(|i| QuestionOption {
                id: Uuid::new_v4(),
                question_id: id,
                text: format!("Choice {}", i),
                is_correct: i == 0,
                explanation: None,
                position: i,
            })
            .collect(),
        images: vec![QuestionImage {
            id: Uuid::new_v4(),
            question_id: id,
            url: "https://img.example/slide.png".to_string(),
            alt_text: Some("H&E, 40x".to_string()),
            section: ImageSection::Stem,
            position: 0,
        }],
        created_at: now,
        updated_at: now,
    }
}

#[tokio::test]
async fn test_database_connection_failure() {
    let result = Database::new("invalid://url").await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_question_round_trip_keeps_children() {
    let db = Database::new("sqlite::memory:").await.unwrap();
    let question = published_question(Difficulty::Hard, None);
    db.create_question(&question).await.unwrap();

    let loaded = db.get_question(question.id).await.unwrap().unwrap();
    assert_eq!(loaded.options.len(), 3);
    assert_eq!(loaded.correct_option_id(), question.correct_option_id());
    assert_eq!(loaded.images[0].alt_text.as_deref(), Some("H&E, 40x"));
    assert_eq!(loaded.references, question.references);
    assert_eq!(loaded.difficulty, Difficulty::Hard);
}

#[tokio::test]
async fn test_unknown_category_violates_foreign_key() {
    let db = Database::new("sqlite::memory:").await.unwrap();
    let question = published_question(Difficulty::Easy, Some(Uuid::new_v4()));

    let error = db.create_question(&question).await.unwrap_err();
    assert!(matches!(classify_database_error(error), ApiError::ValidationError(_)));
    assert!(db.get_question(question.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_published_candidates_filter_by_difficulty_and_set() {
    let db = Database::new("sqlite::memory:").await.unwrap();
    let easy = published_question(Difficulty::Easy, None);
    let hard = published_question(Difficulty::Hard, None);
    let mut draft = published_question(Difficulty::Easy, None);
    draft.status = QuestionStatus::Draft;
    for q in [&easy, &hard, &draft] {
        db.create_question(q).await.unwrap();
    }

    let all = db.find_published_question_ids(None, &[]).await.unwrap();
    assert_eq!(all.len(), 2);

    let only_easy = db.find_published_question_ids(Some(Difficulty::Easy), &[]).await.unwrap();
    assert_eq!(only_easy, vec![(easy.id, None)]);

    let set = QuestionSet {
        id: Uuid::new_v4(),
        name: "Hard cases".to_string(),
        description: None,
        question_ids: vec![hard.id, draft.id],
    };
    db.create_question_set(&set).await.unwrap();
    let in_set = db.find_published_question_ids(None, &[set.id]).await.unwrap();
    assert_eq!(in_set, vec![(hard.id, None)]);
}

#[tokio::test]
async fn test_status_transition_happens_once() {
    let db = Database::new("sqlite::memory:").await.unwrap();
    let question = published_question(Difficulty::Medium, None);
    db.create_question(&question).await.unwrap();

    let (first, second) = tokio::join!(
        db.transition_question_status(question.id, QuestionStatus::Published, QuestionStatus::Draft),
        db.transition_question_status(question.id, QuestionStatus::Published, QuestionStatus::Draft),
    );
    let moved = [first.unwrap(), second.unwrap()];
    assert_eq!(moved.iter().filter(|m| **m).count(), 1);

    let loaded = db.get_question(question.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, QuestionStatus::Draft);
}

#[tokio::test]
async fn test_concurrent_flags_demote_question_once() {
    let db = Database::new("sqlite::memory:").await.unwrap();
    let question = published_question(Difficulty::Medium, None);
    db.create_question(&question).await.unwrap();
    let service = FlagService::new(db.clone(), 2);

    let request = |flag_type| FlagQuestionRequest {
        question_id: question.id,
        flag_type,
        description: None,
    };
    let (a, b, c) = tokio::join!(
        service.flag_question(Uuid::new_v4(), request(FlagType::Typo)),
        service.flag_question(Uuid::new_v4(), request(FlagType::ImageIssue)),
        service.flag_question(Uuid::new_v4(), request(FlagType::Other)),
    );

    let demotions = [a, b, c]
        .into_iter()
        .filter_map(Result::ok)
        .filter(|r| r.question_demoted)
        .count();
    assert_eq!(demotions, 1);

    let reviews = db.get_question_reviews(question.id).await.unwrap();
    assert_eq!(reviews.iter().filter(|r| r.action == "auto_unpublished").count(), 1);
}

#[tokio::test]
async fn test_attempt_history_is_kept_in_order() {
    let db = Database::new("sqlite::memory:").await.unwrap();
    let question = published_question(Difficulty::Easy, None);
    db.create_question(&question).await.unwrap();

    let service = QuizService::new(db.clone(), StatsCache::new(60));
    let user = auth::CurrentUser {
        id: Uuid::new_v4(),
        role: auth::Role::User,
    };
    let session = service
        .create_session(
            user.id,
            serde_json::from_value(serde_json::json!({ "question_count": 1 })).unwrap(),
        )
        .await
        .unwrap();

    let wrong = question.options[1].id;
    let right = question.options[0].id;
    for selected in [wrong, right] {
        service
            .submit_answer(
                &user,
                session.id,
                SubmitAnswerRequest {
                    question_id: question.id,
                    selected_option_id: Some(selected),
                    time_spent_seconds: 7,
                },
            )
            .await
            .unwrap();
    }

    let attempts = db.get_attempts_for_session(session.id).await.unwrap();
    assert_eq!(attempts.len(), 2);
    assert!(!attempts[0].is_correct);
    assert!(attempts[1].is_correct);

    assert_eq!(db.attempt_totals_for_user(user.id).await.unwrap(), (2, 1));
}

#[tokio::test]
async fn test_large_id_lists_are_fetched_across_chunks() {
    let db = Database::new("sqlite::memory:").await.unwrap();
    let first = published_question(Difficulty::Easy, None);
    let last = published_question(Difficulty::Hard, None);
    db.create_question(&first).await.unwrap();
    db.create_question(&last).await.unwrap();

    let mut ids: Vec<Uuid> = (0..1_200).map(|_| Uuid::new_v4()).collect();
    ids[3] = first.id;
    ids[1_150] = last.id;

    let mut found = db.get_questions_by_ids(&ids).await.unwrap();
    found.sort_by_key(|q| q.difficulty);
    assert_eq!(found.len(), 2);
    assert_eq!(found[0].id, first.id);
    assert_eq!(found[1].id, last.id);
    assert_eq!(found[1].options.len(), 3);
    assert_eq!(found[1].images.len(), 1);
}
