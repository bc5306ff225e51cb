use chrono::Utc;
use std::collections::HashSet;
use uuid::Uuid;

use crate::auth::CurrentUser;
use crate::database::Database;
use crate::errors::{classify_database_error, ApiError, ApiResult};
use crate::models::*;
use crate::{log_service_start, log_service_success};

const SERVICE: &str = "question_service";

/// Question bank access and content management.
#[derive(Clone)]
pub struct QuestionService {
    db: Database,
}

impl QuestionService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    // Categories

    pub async fn create_category(&self, request: CreateCategoryRequest) -> ApiResult<Category> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(ApiError::ValidationError("category name is required".to_string()));
        }

        if let Some(parent_id) = request.parent_id {
            let parent = self.db.get_category(parent_id).await?.ok_or_else(|| {
                ApiError::ValidationError(format!("parent category '{}' does not exist", parent_id))
            })?;
            if parent.parent_id.is_some() {
                return Err(ApiError::ValidationError(
                    "categories may only be nested one level deep".to_string(),
                ));
            }
        }

        let existing = self.db.list_categories().await?;
        if existing
            .iter()
            .any(|c| c.parent_id == request.parent_id && c.name.eq_ignore_ascii_case(name))
        {
            return Err(ApiError::DuplicateResource(format!("category '{}'", name)));
        }

        let category = Category {
            id: Uuid::new_v4(),
            name: name.to_string(),
            parent_id: request.parent_id,
        };
        self.db
            .create_category(&category)
            .await
            .map_err(classify_database_error)?;
        Ok(category)
    }

    pub async fn list_categories(&self) -> ApiResult<Vec<Category>> {
        Ok(self.db.list_categories().await?)
    }

    // Questions

    pub async fn create_question(
        &self,
        request: CreateQuestionRequest,
        actor: &CurrentUser,
    ) -> ApiResult<Question> {
        validate_question(&request)?;

        if let Some(category_id) = request.category_id {
            if self.db.get_category(category_id).await?.is_none() {
                return Err(ApiError::ValidationError(format!(
                    "category '{}' does not exist",
                    category_id
                )));
            }
        }

        let now = Utc::now();
        let question_id = Uuid::new_v4();
        let options = request
            .options
            .into_iter()
            .enumerate()
            .map(|(position, option)| QuestionOption {
                id: Uuid::new_v4(),
                question_id,
                text: option.text.trim().to_string(),
                is_correct: option.is_correct,
                explanation: option.explanation,
                position: position as i64,
            })
            .collect();

        let mut positions = [0i64; 2];
        let images = request
            .images
            .into_iter()
            .map(|image| {
                let slot = &mut positions[image.section as usize];
                let position = *slot;
                *slot += 1;
                QuestionImage {
                    id: Uuid::new_v4(),
                    question_id,
                    url: image.url,
                    alt_text: image.alt_text,
                    section: image.section,
                    position,
                }
            })
            .collect();

        let question = Question {
            id: question_id,
            stem: request.stem.trim().to_string(),
            teaching_point: request.teaching_point,
            references: request.references,
            difficulty: request.difficulty,
            category_id: request.category_id,
            status: request.status.unwrap_or(QuestionStatus::Draft),
            options,
            images,
            created_at: now,
            updated_at: now,
        };

        self.db
            .create_question(&question)
            .await
            .map_err(classify_database_error)?;
        self.record_review(question.id, "created", Some(actor.id), None).await?;

        log_service_success!(SERVICE, "create_question", question_id = question.id, "question stored");
        Ok(question)
    }

    /// Non-admin callers only see published questions.
    pub async fn get_question(&self, id: Uuid, caller: &CurrentUser) -> ApiResult<Question> {
        match self.db.get_question(id).await? {
            Some(question) if caller.is_admin() || question.status == QuestionStatus::Published => {
                Ok(question)
            }
            _ => Err(ApiError::NotFound(format!("question '{}'", id))),
        }
    }

    pub async fn list_questions(
        &self,
        mut filter: QuestionFilter,
        caller: &CurrentUser,
    ) -> ApiResult<Vec<Question>> {
        if !caller.is_admin() {
            filter.status = Some(QuestionStatus::Published);
        }
        Ok(self.db.list_questions(&filter).await?)
    }

    pub async fn update_question_status(
        &self,
        id: Uuid,
        request: UpdateQuestionStatusRequest,
        actor: &CurrentUser,
    ) -> ApiResult<Question> {
        log_service_start!(SERVICE, "update_question_status", question_id = id);

        if !self.db.update_question_status(id, request.status).await? {
            return Err(ApiError::NotFound(format!("question '{}'", id)));
        }
        self.record_review(
            id,
            &format!("status_changed:{}", request.status),
            Some(actor.id),
            request.note,
        )
        .await?;

        self.db
            .get_question(id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("question '{}'", id)))
    }

    pub async fn question_history(&self, id: Uuid) -> ApiResult<Vec<QuestionReview>> {
        if self.db.get_question(id).await?.is_none() {
            return Err(ApiError::NotFound(format!("question '{}'", id)));
        }
        Ok(self.db.get_question_reviews(id).await?)
    }

    async fn record_review(
        &self,
        question_id: Uuid,
        action: &str,
        actor_id: Option<Uuid>,
        note: Option<String>,
    ) -> ApiResult<()> {
        let review = QuestionReview {
            id: Uuid::new_v4(),
            question_id,
            action: action.to_string(),
            actor_id,
            note,
            created_at: Utc::now(),
        };
        Ok(self.db.create_question_review(&review).await?)
    }

    // Question sets

    pub async fn create_question_set(&self, request: CreateQuestionSetRequest) -> ApiResult<QuestionSet> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(ApiError::ValidationError("question set name is required".to_string()));
        }

        let mut seen = HashSet::new();
        let question_ids: Vec<Uuid> = request
            .question_ids
            .into_iter()
            .filter(|id| seen.insert(*id))
            .collect();

        let found = self.db.get_questions_by_ids(&question_ids).await?;
        if found.len() != question_ids.len() {
            let known: HashSet<Uuid> = found.iter().map(|q| q.id).collect();
            let missing: Vec<String> = question_ids
                .iter()
                .filter(|id| !known.contains(id))
                .map(|id| id.to_string())
                .collect();
            return Err(ApiError::ValidationError(format!(
                "unknown question ids: {}",
                missing.join(", ")
            )));
        }

        let set = QuestionSet {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: request.description,
            question_ids,
        };
        self.db
            .create_question_set(&set)
            .await
            .map_err(classify_database_error)?;
        Ok(set)
    }

    pub async fn list_question_sets(&self) -> ApiResult<Vec<QuestionSet>> {
        Ok(self.db.list_question_sets().await?)
    }
}

/// Stem present, at least two options and exactly one marked correct.
pub fn validate_question(request: &CreateQuestionRequest) -> ApiResult<()> {
    if request.stem.trim().is_empty() {
        return Err(ApiError::ValidationError("question stem is required".to_string()));
    }
    if request.options.len() < 2 {
        return Err(ApiError::ValidationError(
            "a question needs at least two options".to_string(),
        ));
    }
    if request.options.iter().any(|o| o.text.trim().is_empty()) {
        return Err(ApiError::ValidationError("option text is required".to_string()));
    }
    let correct = request.options.iter().filter(|o| o.is_correct).count();
    if correct != 1 {
        return Err(ApiError::ValidationError(format!(
            "exactly one option must be correct, found {}",
            correct
        )));
    }
    if request.images.iter().any(|i| i.url.trim().is_empty()) {
        return Err(ApiError::ValidationError("image url is required".to_string()));
    }
    Ok(())
}
