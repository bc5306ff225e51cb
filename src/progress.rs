//! Cursor and lifecycle rules for a quiz session.
//!
//! `not_started -> in_progress -> completed`. The index only moves through
//! explicit navigation and is clamped to the question list. Completion is
//! terminal: afterwards only review metadata may change.

use chrono::{DateTime, Utc};

use crate::errors::ApiError;
use crate::models::{QuizSession, SessionAction, SessionStatus};

/// What the caller must persist after a successful action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressChange {
    /// Status, index or started_at changed.
    Progress,
    /// Only reviewed_at changed.
    Reviewed,
    /// Nothing to write.
    Unchanged,
}

pub fn apply_action(
    session: &mut QuizSession,
    action: SessionAction,
    now: DateTime<Utc>,
) -> Result<ProgressChange, ApiError> {
    match session.status {
        SessionStatus::Completed => match action {
            SessionAction::MarkReviewed => mark_reviewed(session, now),
            _ => Err(ApiError::ValidationError(
                "session is already completed".to_string(),
            )),
        },
        SessionStatus::NotStarted => match action {
            SessionAction::Start => {
                start(session, now);
                Ok(ProgressChange::Progress)
            }
            SessionAction::MarkReviewed => mark_reviewed(session, now),
            _ => Err(ApiError::ValidationError(
                "session has not been started".to_string(),
            )),
        },
        SessionStatus::InProgress => {
            let last = session.total_questions().saturating_sub(1);
            let target = match action {
                SessionAction::Start => return Ok(ProgressChange::Unchanged),
                SessionAction::Next => session.current_index.saturating_add(1).min(last),
                SessionAction::Previous => session.current_index.saturating_sub(1),
                SessionAction::GoTo { index } => index.min(last),
                SessionAction::MarkReviewed => return mark_reviewed(session, now),
            };

            if target == session.current_index {
                return Ok(ProgressChange::Unchanged);
            }
            session.current_index = target;
            session.updated_at = now;
            Ok(ProgressChange::Progress)
        }
    }
}

/// Move a fresh session to `in_progress`. No-op otherwise.
pub fn start(session: &mut QuizSession, now: DateTime<Utc>) -> bool {
    if session.status != SessionStatus::NotStarted {
        return false;
    }
    session.status = SessionStatus::InProgress;
    session.started_at = Some(now);
    session.updated_at = now;
    true
}

fn mark_reviewed(session: &mut QuizSession, now: DateTime<Utc>) -> Result<ProgressChange, ApiError> {
    if session.status != SessionStatus::Completed {
        return Err(ApiError::ValidationError(
            "only completed sessions can be reviewed".to_string(),
        ));
    }
    if !session.config.allow_review {
        return Err(ApiError::Forbidden(
            "review is disabled for this session".to_string(),
        ));
    }
    session.reviewed_at = Some(now);
    session.updated_at = now;
    Ok(ProgressChange::Reviewed)
}
