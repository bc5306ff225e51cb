use chrono::Utc;
use uuid::Uuid;

use crate::auth::CurrentUser;
use crate::database::Database;
use crate::errors::{classify_database_error, ApiError, ApiResult};
use crate::models::*;
use crate::{log_service_start, log_service_success};

const SERVICE: &str = "flag_service";

/// User reports on published questions, with automatic withdrawal once
/// enough open reports accumulate.
#[derive(Clone)]
pub struct FlagService {
    db: Database,
    threshold: i64,
}

impl FlagService {
    pub fn new(db: Database, threshold: i64) -> Self {
        Self {
            db,
            threshold: threshold.max(1),
        }
    }

    pub async fn flag_question(&self, user_id: Uuid, request: FlagQuestionRequest) -> ApiResult<FlagResult> {
        log_service_start!(SERVICE, "flag_question", question_id = request.question_id);

        let question = self
            .db
            .get_question(request.question_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("question '{}'", request.question_id)))?;

        if question.status != QuestionStatus::Published {
            return Err(ApiError::ValidationError(
                "only published questions can be flagged".to_string(),
            ));
        }

        if self.db.has_open_flag(user_id, question.id).await? {
            return Err(duplicate_flag());
        }

        let flag = QuestionFlag {
            id: Uuid::new_v4(),
            question_id: question.id,
            user_id,
            flag_type: request.flag_type,
            description: request
                .description
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty()),
            status: FlagStatus::Open,
            resolution: None,
            resolution_note: None,
            resolved_by: None,
            resolved_at: None,
            created_at: Utc::now(),
        };
        // The open-flag unique index settles concurrent reports from the same user.
        self.db
            .create_flag(&flag)
            .await
            .map_err(|e| match classify_database_error(e) {
                ApiError::DuplicateResource(_) => duplicate_flag(),
                other => other,
            })?;

        let open_flag_count = self.db.count_open_flags(question.id).await?;
        let mut question_demoted = false;
        if open_flag_count >= self.threshold {
            // Conditional update: of several concurrent flaggers only one performs the move.
            question_demoted = self
                .db
                .transition_question_status(question.id, QuestionStatus::Published, QuestionStatus::Draft)
                .await?;

            if question_demoted {
                let review = QuestionReview {
                    id: Uuid::new_v4(),
                    question_id: question.id,
                    action: "auto_unpublished".to_string(),
                    actor_id: None,
                    note: Some(format!(
                        "{} open flag(s) reached threshold {}",
                        open_flag_count, self.threshold
                    )),
                    created_at: Utc::now(),
                };
                self.db.create_question_review(&review).await?;
                tracing::warn!(
                    question_id = %question.id,
                    open_flags = open_flag_count,
                    threshold = self.threshold,
                    "Question withdrawn to draft after flagging"
                );
            }
        }

        log_service_success!(SERVICE, "flag_question", question_id = question.id, "flag recorded");
        Ok(FlagResult {
            flag,
            open_flag_count,
            question_demoted,
        })
    }

    pub async fn list_flags(&self, status: Option<FlagStatus>) -> ApiResult<Vec<QuestionFlag>> {
        Ok(self.db.list_flags(status).await?)
    }

    /// Close an open flag. The question's status is left to the moderator.
    pub async fn resolve_flag(
        &self,
        actor: &CurrentUser,
        flag_id: Uuid,
        request: ResolveFlagRequest,
    ) -> ApiResult<QuestionFlag> {
        let flag = self
            .db
            .get_flag(flag_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("flag '{}'", flag_id)))?;

        let resolved = self
            .db
            .resolve_flag(flag.id, request.resolution, request.note.as_deref(), actor.id, Utc::now())
            .await?;
        if !resolved {
            return Err(ApiError::ValidationError("flag is already closed".to_string()));
        }

        self.db
            .get_flag(flag_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("flag '{}'", flag_id)))
    }
}

fn duplicate_flag() -> ApiError {
    ApiError::ValidationError("you already have an open flag on this question".to_string())
}
