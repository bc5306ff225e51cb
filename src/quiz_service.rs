use chrono::{SubsecRound, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::auth::CurrentUser;
use crate::database::Database;
use crate::errors::{ApiError, ApiResult};
use crate::models::*;
use crate::progress::{self, ProgressChange};
use crate::scoring::{self, QuestionMeta};
use crate::stats_cache::StatsCache;
use crate::{log_service_start, log_service_success, log_service_warn};

const SERVICE: &str = "quiz_service";
/// Tries before giving up on completing a session that keeps receiving answers.
const COMPLETION_ATTEMPTS: usize = 3;

/// Session lifecycle: building, navigation, answers, completion and stats.
#[derive(Clone)]
pub struct QuizService {
    db: Database,
    stats_cache: StatsCache,
}

impl QuizService {
    pub fn new(db: Database, stats_cache: StatsCache) -> Self {
        Self { db, stats_cache }
    }

    /// Build a session from the published question bank.
    pub async fn create_session(&self, user_id: Uuid, config: SessionConfig) -> ApiResult<QuizSession> {
        log_service_start!(SERVICE, "create_session", user_id = user_id);

        if config.question_count == 0 {
            return Err(ApiError::ValidationError(
                "question_count must be at least 1".to_string(),
            ));
        }
        if config.timing == TimingMode::Timed && config.seconds_per_question.unwrap_or(0) == 0 {
            return Err(ApiError::ValidationError(
                "timed sessions need seconds_per_question".to_string(),
            ));
        }

        let candidates = self
            .db
            .find_published_question_ids(config.difficulty.as_difficulty(), &config.question_set_ids)
            .await?;
        let categories = self.expand_categories(&config.category_ids).await?;

        let question_ids = select_question_ids(
            candidates,
            &categories,
            config.shuffle_questions,
            config.question_count as usize,
            &mut rand::rng(),
        );
        if question_ids.is_empty() {
            return Err(ApiError::NoQuestionsMatch);
        }

        let now = Utc::now();
        let session = QuizSession {
            id: Uuid::new_v4(),
            user_id,
            config,
            question_ids,
            current_index: 0,
            status: SessionStatus::NotStarted,
            score: None,
            correct_answers: None,
            total_time_spent: None,
            started_at: None,
            completed_at: None,
            reviewed_at: None,
            created_at: now,
            updated_at: now,
        };
        self.db.create_session(&session).await?;

        log_service_success!(
            SERVICE,
            "create_session",
            session_id = session.id,
            format!("{} questions selected", session.total_questions())
        );
        Ok(session)
    }

    /// Selected categories plus the children of any selected parent.
    async fn expand_categories(&self, category_ids: &[Uuid]) -> ApiResult<HashSet<Uuid>> {
        let mut selected: HashSet<Uuid> = category_ids.iter().copied().collect();
        if selected.is_empty() {
            return Ok(selected);
        }

        for category in self.db.list_categories().await? {
            if category.parent_id.is_some_and(|parent| category_ids.contains(&parent)) {
                selected.insert(category.id);
            }
        }
        Ok(selected)
    }

    pub async fn list_sessions(&self, user_id: Uuid) -> ApiResult<Vec<QuizSession>> {
        Ok(self.db.list_sessions_for_user(user_id).await?)
    }

    async fn load_owned_session(&self, user: &CurrentUser, id: Uuid) -> ApiResult<QuizSession> {
        let session = self
            .db
            .get_session(id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("session '{}'", id)))?;

        if session.user_id != user.id {
            return Err(ApiError::Forbidden(
                "session belongs to another user".to_string(),
            ));
        }
        Ok(session)
    }

    /// The session with its questions in session order, prepared for display.
    pub async fn get_session_detail(&self, user: &CurrentUser, id: Uuid) -> ApiResult<SessionDetail> {
        let session = self.load_owned_session(user, id).await?;
        let mut by_id: HashMap<Uuid, Question> = self
            .db
            .get_questions_by_ids(&session.question_ids)
            .await?
            .into_iter()
            .map(|q| (q.id, q))
            .collect();

        let mut rng = rand::rng();
        let questions = session
            .question_ids
            .iter()
            .filter_map(|id| by_id.remove(id))
            .map(|question| present_question(question, &session.config, &mut rng))
            .collect();

        Ok(SessionDetail { session, questions })
    }

    pub async fn update_progress(
        &self,
        user: &CurrentUser,
        id: Uuid,
        action: SessionAction,
    ) -> ApiResult<QuizSession> {
        let mut session = self.load_owned_session(user, id).await?;
        let now = Utc::now();

        match progress::apply_action(&mut session, action, now)? {
            ProgressChange::Progress => {
                if !self.db.update_session_progress(&session).await? {
                    return Err(ApiError::ValidationError(
                        "session is already completed".to_string(),
                    ));
                }
            }
            ProgressChange::Reviewed => {
                self.db.mark_session_reviewed(session.id, now).await?;
            }
            ProgressChange::Unchanged => {}
        }
        Ok(session)
    }

    pub async fn submit_answer(
        &self,
        user: &CurrentUser,
        session_id: Uuid,
        request: SubmitAnswerRequest,
    ) -> ApiResult<QuizAttempt> {
        let mut attempts = self.record_attempts(user, session_id, vec![request]).await?;
        attempts
            .pop()
            .ok_or_else(|| ApiError::InternalError("attempt was not recorded".to_string()))
    }

    pub async fn submit_batch(
        &self,
        user: &CurrentUser,
        session_id: Uuid,
        request: BatchSubmitRequest,
    ) -> ApiResult<Vec<QuizAttempt>> {
        if request.attempts.is_empty() {
            return Err(ApiError::ValidationError("no attempts submitted".to_string()));
        }
        self.record_attempts(user, session_id, request.attempts).await
    }

    /// Grade and persist answers. Every entry is validated before anything is
    /// written; the rows are inserted in one transaction.
    async fn record_attempts(
        &self,
        user: &CurrentUser,
        session_id: Uuid,
        requests: Vec<SubmitAnswerRequest>,
    ) -> ApiResult<Vec<QuizAttempt>> {
        log_service_start!(SERVICE, "record_attempts", session_id = session_id);

        let mut session = self.load_owned_session(user, session_id).await?;
        if session.status == SessionStatus::Completed {
            return Err(ApiError::ValidationError(
                "session is already completed".to_string(),
            ));
        }

        let wanted: Vec<Uuid> = requests
            .iter()
            .map(|r| r.question_id)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let questions: HashMap<Uuid, Question> = self
            .db
            .get_questions_by_ids(&wanted)
            .await?
            .into_iter()
            .map(|q| (q.id, q))
            .collect();

        let now = Utc::now();
        let mut attempts = Vec::with_capacity(requests.len());
        for request in requests {
            let question = match questions.get(&request.question_id) {
                Some(question) if session.question_ids.contains(&question.id) => question,
                _ => {
                    return Err(ApiError::ValidationError(format!(
                        "question '{}' is not part of this session",
                        request.question_id
                    )));
                }
            };
            attempts.push(grade_answer(session.id, question, &request, now)?);
        }

        // Also bumps updated_at so cached stats are refreshed.
        progress::start(&mut session, now);
        session.updated_at = now;
        if !self.db.record_attempts(&session, &attempts).await? {
            return Err(ApiError::ValidationError(
                "session is already completed".to_string(),
            ));
        }

        log_service_success!(
            SERVICE,
            "record_attempts",
            session_id = session_id,
            format!("{} attempts stored", attempts.len())
        );
        Ok(attempts)
    }

    /// Score the session and mark it completed.
    pub async fn complete_session(&self, user: &CurrentUser, session_id: Uuid) -> ApiResult<QuizResult> {
        log_service_start!(SERVICE, "complete_session", session_id = session_id);

        for _ in 0..COMPLETION_ATTEMPTS {
            let session = self.load_owned_session(user, session_id).await?;
            if session.status == SessionStatus::Completed {
                return Err(ApiError::ValidationError(
                    "session is already completed".to_string(),
                ));
            }

            let attempts = self.db.get_attempts_for_session(session.id).await?;
            // Stored timestamps carry microsecond precision.
            let result = self
                .compute_result(&session, &attempts, Utc::now().trunc_subsecs(6))
                .await?;

            // Fails when the session was completed or answered since the read above.
            if self.db.complete_session(session.id, &result, attempts.len()).await? {
                self.stats_cache.invalidate(session.user_id).await;
                log_service_success!(
                    SERVICE,
                    "complete_session",
                    session_id = session_id,
                    format!("score {} ({}/{})", result.score, result.correct_answers, result.total_questions)
                );
                return Ok(result);
            }
            log_service_warn!(SERVICE, "complete_session", "session changed during completion, retrying");
        }

        Err(ApiError::BadRequest(
            "session is receiving answers, try completing it again".to_string(),
        ))
    }

    /// Recompute the summary of a completed session.
    pub async fn get_results(&self, user: &CurrentUser, session_id: Uuid) -> ApiResult<QuizResult> {
        let session = self.load_owned_session(user, session_id).await?;
        match (session.status, session.completed_at) {
            (SessionStatus::Completed, Some(completed_at)) => {
                let attempts = self.db.get_attempts_for_session(session.id).await?;
                self.compute_result(&session, &attempts, completed_at).await
            }
            _ => Err(ApiError::ValidationError(
                "session has not been completed".to_string(),
            )),
        }
    }

    async fn compute_result(
        &self,
        session: &QuizSession,
        attempts: &[QuizAttempt],
        completed_at: chrono::DateTime<Utc>,
    ) -> ApiResult<QuizResult> {
        let questions: HashMap<Uuid, QuestionMeta> = self
            .db
            .get_questions_by_ids(&session.question_ids)
            .await?
            .into_iter()
            .map(|q| {
                (
                    q.id,
                    QuestionMeta {
                        id: q.id,
                        difficulty: q.difficulty,
                        category_id: q.category_id,
                    },
                )
            })
            .collect();

        let metas = session
            .question_ids
            .iter()
            .map(|id| {
                questions.get(id).copied().ok_or_else(|| {
                    ApiError::InternalError(format!("question '{}' of session is missing", id))
                })
            })
            .collect::<ApiResult<Vec<_>>>()?;

        Ok(scoring::aggregate(session.id, &metas, attempts, completed_at))
    }

    /// Aggregate statistics for a user, served from the cache while the
    /// user's sessions are unchanged.
    pub async fn user_stats(&self, user_id: Uuid) -> ApiResult<UserStats> {
        let last_session_update = self.db.latest_session_update(user_id).await?;
        if let Some(stats) = self.stats_cache.get(user_id, last_session_update).await {
            return Ok(stats);
        }

        let completed: Vec<QuizSession> = self
            .db
            .list_sessions_for_user(user_id)
            .await?
            .into_iter()
            .filter(|s| s.status == SessionStatus::Completed)
            .collect();

        let scores: Vec<f64> = completed
            .iter()
            .filter_map(|s| s.score.map(f64::from))
            .collect();
        let average_score = if scores.is_empty() {
            0.0
        } else {
            (scores.iter().sum::<f64>() / scores.len() as f64 * 10.0).round() / 10.0
        };

        let (answered, correct) = match self.db.attempt_totals_for_user(user_id).await {
            Ok(totals) => totals,
            Err(e) => {
                log_service_warn!(SERVICE, "user_stats", format!("attempt totals unavailable: {}", e));
                (0, 0)
            }
        };

        let stats = UserStats {
            user_id,
            completed_sessions: completed.len() as u32,
            questions_answered: u32::try_from(answered).unwrap_or(u32::MAX),
            correct_answers: u32::try_from(correct).unwrap_or(u32::MAX),
            average_score,
            last_session_update,
        };
        self.stats_cache.insert(stats.clone()).await;
        Ok(stats)
    }
}

/// Apply the category filter, shuffle when asked, then truncate to `count`.
/// An empty category set keeps every candidate.
pub fn select_question_ids<R: Rng + ?Sized>(
    candidates: Vec<(Uuid, Option<Uuid>)>,
    categories: &HashSet<Uuid>,
    shuffle: bool,
    count: usize,
    rng: &mut R,
) -> Vec<Uuid> {
    let mut ids: Vec<Uuid> = candidates
        .into_iter()
        .filter(|(_, category)| {
            categories.is_empty() || category.is_some_and(|c| categories.contains(&c))
        })
        .map(|(id, _)| id)
        .collect();

    if shuffle {
        ids.shuffle(rng);
    }
    ids.truncate(count);
    ids
}

/// Grade one answer against the question's correct option.
/// A skipped question (no selection) is always incorrect.
pub fn grade_answer(
    session_id: Uuid,
    question: &Question,
    request: &SubmitAnswerRequest,
    now: chrono::DateTime<Utc>,
) -> ApiResult<QuizAttempt> {
    if let Some(selected) = request.selected_option_id {
        if !question.options.iter().any(|o| o.id == selected) {
            return Err(ApiError::ValidationError(format!(
                "option '{}' does not belong to question '{}'",
                selected, question.id
            )));
        }
    }

    let is_correct = match (request.selected_option_id, question.correct_option_id()) {
        (Some(selected), Some(correct)) => selected == correct,
        _ => false,
    };

    Ok(QuizAttempt {
        id: Uuid::new_v4(),
        session_id,
        question_id: question.id,
        selected_option_id: request.selected_option_id,
        is_correct,
        time_spent_seconds: request.time_spent_seconds,
        created_at: now,
    })
}

fn present_question<R: Rng + ?Sized>(
    question: Question,
    config: &SessionConfig,
    rng: &mut R,
) -> SessionQuestionView {
    let mut options = question.options;
    if config.shuffle_answers {
        options.shuffle(rng);
    }

    let (teaching_point, images) = if config.show_explanations {
        (question.teaching_point, question.images)
    } else {
        for option in &mut options {
            option.explanation = None;
        }
        let stem_images = question
            .images
            .into_iter()
            .filter(|i| i.section == ImageSection::Stem)
            .collect();
        (None, stem_images)
    };

    SessionQuestionView {
        id: question.id,
        stem: question.stem,
        difficulty: question.difficulty,
        category_id: question.category_id,
        teaching_point,
        references: question.references,
        options,
        images,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn question(correct: usize, options: usize) -> Question {
        let id = Uuid::new_v4();
        let now = Utc::now();
        Question {
            id,
            stem: "Stem".to_string(),
            teaching_point: Some("Teaching point".to_string()),
            references: vec![],
            difficulty: Difficulty::Medium,
            category_id: None,
            status: QuestionStatus::Published,
            options: (0..options)
                .map(|i| QuestionOption {
                    id: Uuid::new_v4(),
                    question_id: id,
                    text: format!("Option {}", i),
                    is_correct: i == correct,
                    explanation: Some("Because".to_string()),
                    position: i as i64,
                })
                .collect(),
            images: vec![],
            created_at: now,
            updated_at: now,
        }
    }

    fn answer(question: &Question, selected: Option<Uuid>) -> SubmitAnswerRequest {
        SubmitAnswerRequest {
            question_id: question.id,
            selected_option_id: selected,
            time_spent_seconds: 15,
        }
    }

    #[test]
    fn test_shuffle_and_truncate_yields_distinct_original_ids() {
        let mut rng = StdRng::seed_from_u64(7);
        for n in [1usize, 5, 20] {
            let candidates: Vec<(Uuid, Option<Uuid>)> =
                (0..n).map(|_| (Uuid::new_v4(), None)).collect();
            let originals: HashSet<Uuid> = candidates.iter().map(|(id, _)| *id).collect();

            for k in 1..=n {
                let picked = select_question_ids(candidates.clone(), &HashSet::new(), true, k, &mut rng);
                let unique: HashSet<Uuid> = picked.iter().copied().collect();
                assert_eq!(picked.len(), k);
                assert_eq!(unique.len(), k);
                assert!(unique.is_subset(&originals));
            }
        }
    }

    #[test]
    fn test_selection_falls_back_to_available_count() {
        let mut rng = StdRng::seed_from_u64(1);
        let candidates: Vec<(Uuid, Option<Uuid>)> = (0..3).map(|_| (Uuid::new_v4(), None)).collect();
        let picked = select_question_ids(candidates.clone(), &HashSet::new(), false, 10, &mut rng);
        let expected: Vec<Uuid> = candidates.iter().map(|(id, _)| *id).collect();
        assert_eq!(picked, expected);
    }

    #[test]
    fn test_category_filter_by_membership() {
        let mut rng = StdRng::seed_from_u64(3);
        let wanted = Uuid::new_v4();
        let other = Uuid::new_v4();
        let keep = Uuid::new_v4();
        let candidates = vec![
            (Uuid::new_v4(), Some(other)),
            (keep, Some(wanted)),
            (Uuid::new_v4(), None),
        ];
        let categories: HashSet<Uuid> = [wanted].into_iter().collect();

        let picked = select_question_ids(candidates, &categories, false, 10, &mut rng);
        assert_eq!(picked, vec![keep]);
    }

    #[test]
    fn test_grading() {
        let q = question(1, 4);
        let now = Utc::now();
        let session_id = Uuid::new_v4();

        let right = grade_answer(session_id, &q, &answer(&q, Some(q.options[1].id)), now).unwrap();
        assert!(right.is_correct);

        let wrong = grade_answer(session_id, &q, &answer(&q, Some(q.options[2].id)), now).unwrap();
        assert!(!wrong.is_correct);

        let skipped = grade_answer(session_id, &q, &answer(&q, None), now).unwrap();
        assert!(!skipped.is_correct);
        assert_eq!(skipped.selected_option_id, None);

        let foreign = grade_answer(session_id, &q, &answer(&q, Some(Uuid::new_v4())), now);
        assert!(matches!(foreign, Err(ApiError::ValidationError(_))));
    }

    #[test]
    fn test_presentation_hides_explanations_when_disabled() {
        let mut rng = StdRng::seed_from_u64(11);
        let config = SessionConfig {
            mode: QuizMode::Exam,
            timing: TimingMode::Untimed,
            seconds_per_question: None,
            question_count: 1,
            difficulty: DifficultyFilter::Mixed,
            category_ids: vec![],
            question_set_ids: vec![],
            shuffle_questions: false,
            shuffle_answers: true,
            show_explanations: false,
            allow_review: true,
        };

        let q = question(0, 5);
        let option_ids: HashSet<Uuid> = q.options.iter().map(|o| o.id).collect();
        let view = present_question(q, &config, &mut rng);

        assert!(view.teaching_point.is_none());
        assert!(view.options.iter().all(|o| o.explanation.is_none()));
        assert_eq!(view.options.len(), 5);
        assert_eq!(view.options.iter().map(|o| o.id).collect::<HashSet<_>>(), option_ids);
    }
}
